//! Policy subsystem.
//!
//! # Data Flow
//! ```text
//! resolved user (+ target service in proxy mode)
//!     → engine.rs account checks (active period, disabled, super admin, roles)
//!     → service-bound policies   ─┐ each policy: rule.rs, first violation wins
//!     → role-bound policies      ─┘ flags merged across passing policies
//!     → Evaluation::Allow(Decision) | Evaluation::Deny(Denial)
//! ```
//!
//! # Design Decisions
//! - Rules are one tagged enum; values are typed (`IpNet` for networks)
//! - Account checks run before the policy store is touched
//! - Policy lookups are cached per service and per role set until a
//!   `Policies` or `Refresh` event arrives

use serde::{Deserialize, Serialize};

use crate::auth::session::SessionKind;

pub mod engine;
pub mod rule;

pub use engine::{Decision, Denial, Evaluation, PolicyEngine};
pub use rule::Rule;

/// A set of rules bound to services or to roles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Policy {
    pub id: String,
    pub name: String,

    /// Service ids this policy applies to.
    pub services: Vec<String>,

    /// Roles this policy applies to.
    pub roles: Vec<String>,

    pub rules: Vec<Rule>,

    pub admin_secondary: Option<String>,
    pub user_secondary: Option<String>,
    pub proxy_secondary: Option<String>,

    pub admin_device_secondary: bool,
    pub user_device_secondary: bool,
    pub proxy_device_secondary: bool,
}

impl Policy {
    /// Secondary provider id required for `kind`, if any.
    pub fn secondary(&self, kind: SessionKind) -> Option<&str> {
        let provider = match kind {
            SessionKind::Admin => &self.admin_secondary,
            SessionKind::User => &self.user_secondary,
            SessionKind::Proxy => &self.proxy_secondary,
        };
        provider.as_deref().filter(|p| !p.is_empty())
    }

    pub fn device_secondary(&self, kind: SessionKind) -> bool {
        match kind {
            SessionKind::Admin => self.admin_device_secondary,
            SessionKind::User => self.user_device_secondary,
            SessionKind::Proxy => self.proxy_device_secondary,
        }
    }

    pub fn normalize(&mut self) {
        for rule in &mut self.rules {
            rule.normalize();
        }
    }
}
