// # Session Module
//
// Client-visible sessions and the process-wide session manager.

pub mod manager;
pub mod session;

pub use manager::{ConnectRequest, SessionManager};
pub use session::{BackendHandle, Session};
