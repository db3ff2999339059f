//! Storage seams consumed by the gateway core.
//!
//! # Data Flow
//! ```text
//! Authorizer ──▶ UserStore, SessionRepository, NonceRepository
//! PolicyEngine ──▶ PolicyStore, UserStore (expired users)
//! CertificateRouter ──▶ CertificateStore
//! Dispatcher ──▶ ServiceStore
//! ```
//!
//! # Design Decisions
//! - Every operation the core relies on for atomicity is a single trait call
//!   (`insert_unique`, `touch`); callers never check-then-write
//! - Not-found is an error variant, so callers decide whether it matters
//! - `memory.rs` backs tests and single-node deployments seeded from config

use async_trait::async_trait;
use thiserror::Error;

use crate::auth::agent::Agent;
use crate::auth::session::{Session, SessionKind, SessionLifetime};
use crate::model::{CertificateRecord, Service, User};
use crate::policy::Policy;

pub mod memory;

pub use memory::MemoryStore;

/// Errors raised by a backing store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    /// A uniqueness constraint rejected the write.
    #[error("duplicate {0}")]
    Duplicate(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_by_token(&self, token: &str) -> StoreResult<User>;

    async fn get_by_id(&self, id: &str) -> StoreResult<User>;

    async fn get_by_username(&self, username: &str) -> StoreResult<User>;

    /// Mark a user disabled and clear its active period.
    async fn disable(&self, id: &str) -> StoreResult<()>;
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn insert(&self, session: &Session) -> StoreResult<()>;

    /// Find a fresh session of `kind` and set its last-active time to `now`.
    ///
    /// Must be one atomic find-and-update. Returns `None` when the session is
    /// missing, removed, or outside `lifetime`.
    async fn touch(
        &self,
        id: &str,
        kind: SessionKind,
        lifetime: SessionLifetime,
        now: i64,
    ) -> StoreResult<Option<Session>>;

    async fn update_agent(&self, id: &str, agent: &Agent) -> StoreResult<()>;

    /// Soft delete a single session.
    async fn remove(&self, id: &str) -> StoreResult<()>;

    /// Soft delete every session of a user.
    async fn remove_all(&self, user_id: &str) -> StoreResult<()>;
}

#[async_trait]
pub trait NonceRepository: Send + Sync {
    /// Atomically insert a nonce, failing with `Duplicate` if it exists.
    async fn insert_unique(&self, nonce: &str, timestamp: i64) -> StoreResult<()>;

    /// Drop nonces inserted before `timestamp`. Returns how many were removed.
    async fn purge_before(&self, timestamp: i64) -> StoreResult<usize>;
}

#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Policies bound to any of the given services.
    async fn get_by_services(&self, service_ids: &[String]) -> StoreResult<Vec<Policy>>;

    /// Policies bound to any of the given roles.
    async fn get_by_roles(&self, roles: &[String]) -> StoreResult<Vec<Policy>>;
}

#[async_trait]
pub trait CertificateStore: Send + Sync {
    /// Certificates with the given ids. Unknown ids are skipped.
    async fn get_by_ids(&self, ids: &[String]) -> StoreResult<Vec<CertificateRecord>>;
}

#[async_trait]
pub trait ServiceStore: Send + Sync {
    /// Services with the given ids. Unknown ids are skipped.
    async fn get_by_ids(&self, ids: &[String]) -> StoreResult<Vec<Service>>;
}
