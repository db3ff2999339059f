//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! TLS handshake (SNI)
//!     → certificates.rs (exact, then wildcard, then self-signed fallback)
//!
//! Incoming Request (Host header)
//!     → router.rs (current host table)
//!     → hosts.rs (exact domain map, then wildcard globs)
//!     → Return: matched Host or None
//!
//! Rebuild (startup, change events):
//!     node certificate/service ids
//!     → store lookup
//!     → build new index off to the side
//!     → atomic swap
//! ```
//!
//! # Design Decisions
//! - Lookups never block; rebuilds publish a complete index at once
//! - Deterministic: same input always matches same route

pub mod certificates;
pub mod hosts;
pub mod router;
pub mod self_cert;

pub use certificates::CertificateRouter;
pub use hosts::{Host, HostTable};
pub use router::ServiceRouter;
