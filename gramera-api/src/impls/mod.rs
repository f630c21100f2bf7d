pub mod codec;
pub mod messaging;

pub use codec::JsonCodec;
pub use messaging::{SessionHandler, StreamError, StreamMessage};
