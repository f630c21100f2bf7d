pub mod id;

pub use id::{generate_session_id, SessionId, UserId};
