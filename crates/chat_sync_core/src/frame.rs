//! crates/chat_sync_core/src/frame.rs
//!
//! Incremental parser for blank-line-delimited event-stream frames.
//!
//! Network chunks rarely line up with frame boundaries or even with UTF-8
//! character boundaries, so the parser keeps two pieces of state between calls:
//! the undecoded tail of the last chunk and the text of the frame still being
//! received.

const FRAME_DELIMITER: &str = "\n\n";
const DEFAULT_EVENT: &str = "message";

/// One decoded frame: its event name and its data lines in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub event: String,
    pub data_lines: Vec<String>,
}

impl Frame {
    /// The payload text: all data lines joined with `\n`.
    pub fn data(&self) -> String {
        self.data_lines.join("\n")
    }

    /// Reads the lines of one raw frame.
    pub fn parse(raw: &str) -> Self {
        let mut event = DEFAULT_EVENT.to_string();
        let mut data_lines = Vec::new();
        for line in raw.split('\n').filter(|l| !l.is_empty()) {
            if let Some(name) = line.strip_prefix("event:") {
                event = name.trim().to_string();
            } else if let Some(value) = line.strip_prefix("data:") {
                let value = value.strip_prefix(' ').unwrap_or(value);
                data_lines.push(value.to_string());
            }
        }
        Self { event, data_lines }
    }
}

/// Restartable per connection: create a new parser for every response body.
#[derive(Debug, Default)]
pub struct FrameParser {
    buffer: String,
    undecoded: Vec<u8>,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk and returns every frame it completed, in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.decode(chunk);
        if self.buffer.contains('\r') {
            self.buffer = self.buffer.replace("\r\n", "\n");
        }

        let mut frames = Vec::new();
        while let Some(split) = self.buffer.find(FRAME_DELIMITER) {
            let raw: String = self.buffer.drain(..split + FRAME_DELIMITER.len()).collect();
            let raw = &raw[..split];
            if raw.trim().is_empty() {
                continue;
            }
            frames.push(Frame::parse(raw));
        }
        frames
    }

    /// Bytes and characters received that do not yet form a complete frame.
    pub fn pending_len(&self) -> usize {
        self.buffer.len() + self.undecoded.len()
    }

    fn decode(&mut self, chunk: &[u8]) {
        self.undecoded.extend_from_slice(chunk);
        let mut consumed = 0;
        loop {
            match std::str::from_utf8(&self.undecoded[consumed..]) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    consumed = self.undecoded.len();
                    break;
                }
                Err(err) => {
                    let valid_end = consumed + err.valid_up_to();
                    // `valid_up_to` marks the end of a valid UTF-8 prefix.
                    if let Ok(text) = std::str::from_utf8(&self.undecoded[consumed..valid_end]) {
                        self.buffer.push_str(text);
                    }
                    match err.error_len() {
                        Some(bad) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            consumed = valid_end + bad;
                        }
                        // Incomplete sequence at the end: wait for the next chunk.
                        None => {
                            consumed = valid_end;
                            break;
                        }
                    }
                }
            }
        }
        self.undecoded.drain(..consumed);
    }
}
