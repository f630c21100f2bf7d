// Gramera API Library
//
// HTTP endpoints and the WebSocket transport for the presence relay

pub mod http;
pub mod impls;

// Re-export commonly used types
pub use http::{create_router, AppState};
