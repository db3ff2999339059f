//! Reverse proxy subsystem.
//!
//! # Data Flow
//! ```text
//! matched host + authorized request
//!     → dispatcher.rs (ordered checks, server pick)
//!     → headers.rs (forwarding headers, credential stripping)
//!     → transport.rs (pooled upstream clients, streamed bodies)
//! ```

pub mod dispatcher;
pub mod headers;
pub mod login;
pub mod transport;

pub use transport::Transport;
