pub mod domain;
pub mod event;
pub mod frame;
mod lenient;
pub mod ports;
pub mod protocol;
pub mod reconcile;
pub mod session;

pub use domain::{Conversation, Message, Role, SessionError, SessionState, MOOD_FALLBACK, MOOD_THINKING};
pub use event::{DonePayload, MetaPayload, StreamEvent};
pub use frame::{Frame, FrameParser};
pub use ports::{
    ByteStream, ChatApi, EventStream, IdentityStore, MemoryIdentityStore, PortError, PortResult,
    THREAD_KEY, VISITOR_KEY,
};
pub use protocol::{BufferedReply, ReplyShape, SendRequest, SendResponse, ThreadHistory, VisitorGrant};
pub use reconcile::{PendingSend, SendOutcome, SessionEffect};
pub use session::{ChatSession, SendMode, SessionUpdate};
