//! Zero trust access gateway library.
//!
//! The binary in `main.rs` wires these modules together through
//! [`lifecycle::Gateway`]; integration tests do the same against an
//! in-memory store.

pub mod audit;
pub mod auth;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod geo;
pub mod http;
pub mod lifecycle;
pub mod model;
pub mod net;
pub mod observability;
pub mod policy;
pub mod proxy;
pub mod routing;
pub mod store;

pub use config::GatewayConfig;
pub use error::{GatewayError, GatewayResult};
pub use http::HttpServer;
pub use lifecycle::{Gateway, Shutdown};
