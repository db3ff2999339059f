//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (normalize, semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → listener, transport and timers read it once at startup
//!     → seed tables (users, services, policies, certificates) fill the MemoryStore
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → server reseeds the store and publishes change events
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Listener and transport settings are not hot reloaded; only seed data is

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AuthConfig, CookieConfig, EventsConfig, GatewayConfig, ListenerConfig, NodeConfig,
    ObservabilityConfig, RouterConfig, SecurityConfig, SessionLimits, TimeoutConfig, TlsConfig,
};
pub use watcher::ConfigWatcher;
