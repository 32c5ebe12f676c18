pub mod http;
pub mod store;

pub use http::HttpChatAdapter;
pub use store::FileIdentityStore;
