mod protocol;
mod server;
mod session;
mod tools;

pub use protocol::*;
pub use server::mcp_handler;
pub use session::{McpSession, McpSessionRegistry};
