mod session;
mod stream;

pub use session::{API_KEY_HEADER, CHAT_PATH, ChatSession, SendOutcome};
pub use stream::{NdjsonDecoder, ReplyAccumulator, StreamRecord};
