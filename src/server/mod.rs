// # RPC Server Module
//
// The framed wire protocol, the action dispatcher and its handler table,
// and the TCP server tying them to the network.

pub mod actions;
pub mod context;
pub mod dispatcher;
pub mod protocol;
pub mod server;

pub use context::ActionContext;
pub use dispatcher::Dispatcher;
pub use protocol::{read_frame, write_frame, LobReference, Request, Response, SessionInfo};
pub use server::OjpServer;
