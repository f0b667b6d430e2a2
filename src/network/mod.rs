//! Network Layer
//!
//! WebSocket server, wire protocol and operational plumbing.
//! This layer owns the clock and all I/O; game rules live in `game/`.

pub mod protocol;
pub mod session;
pub mod rate_limit;
pub mod metrics;
pub mod server;

pub use protocol::{ClientMessage, ErrorCode, ProtocolError, ServerMessage};
pub use session::{ClientHandle, ConnectionId, SessionManager};
pub use rate_limit::{RateKey, RateLimiter};
pub use metrics::Metrics;
pub use server::{parse_port, GameServer, GameServerError, ServerConfig};
