//! WebSocket JSON-RPC transport for Plinth.

pub mod host;
pub mod protocol;
pub mod server;
pub mod session;

pub use host::SessionHost;
pub use protocol::RpcError;
pub use server::{Server, ServerConfig};
pub use session::{Session, SessionId};
