//! Authentication subsystem.
//!
//! # Data Flow
//! ```text
//! request headers
//!     → signature.rs (Pritunl-Zero-* headers present?)
//!         → window / user / nonce.rs / HMAC checks → bound user
//!     → else cookie.rs (decrypt namespace cookie)
//!         → session.rs get_update (atomic touch + signature check)
//!     → authorizer.rs (request-scoped capability)
//!     → policy engine
//!
//! login (POST /auth/session or signed GET /auth/callback)
//!     → password.rs or signature.rs → policy engine → session.rs create
//! ```
//!
//! # Design Decisions
//! - Signature requests are stateless and re-validated every time
//! - Admin, user and proxy surfaces never share cookies or session keys
//! - Storage failures propagate as 500, credential failures as 401

pub mod agent;
pub mod authorizer;
pub mod cookie;
pub mod csrf;
pub mod nonce;
pub mod password;
pub mod session;
pub mod signature;

pub use authorizer::{AuthServices, Authorizer};
pub use session::{Session, SessionKind, SessionManager};
pub use signature::{Signature, SignatureAuthenticator};
