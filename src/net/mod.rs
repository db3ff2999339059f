//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → axum-server acceptor
//!     → tls.rs (rustls handshake, certificate picked by SNI)
//!     → Hand off to HTTP layer
//!
//! Upgraded websocket:
//!     → connection.rs (registered until either side closes)
//!     → closed explicitly on shutdown
//! ```
//!
//! # Design Decisions
//! - TLS is optional and handled transparently
//! - Upgraded sockets are tracked for shutdown since they escape the
//!   request timeout

pub mod connection;
pub mod tls;

pub use connection::{ConnectionId, SocketGuard, SocketRegistry};
