//! Session records and their lifecycle.
//!
//! # Design Decisions
//! - Freshness check and last-active refresh are one store call (`touch`)
//! - A wrong cookie signature looks exactly like a missing session
//! - Sessions are soft deleted; removal of a missing session is not an error

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::Sha512;
use std::sync::Arc;
use subtle::ConstantTimeEq;

use crate::auth::agent::Agent;
use crate::auth::cookie::CookieKeys;
use crate::config::AuthConfig;
use crate::context::RequestContext;
use crate::error::{GatewayError, GatewayResult};
use crate::model::unix_now;
use crate::store::{SessionRepository, StoreError};

const SESSION_ID_LEN: usize = 32;
const SESSION_SECRET_LEN: usize = 64;

/// Which surface a session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    Admin,
    User,
    Proxy,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::Admin => "admin",
            SessionKind::User => "user",
            SessionKind::Proxy => "proxy",
        }
    }
}

impl std::fmt::Display for SessionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Session {
    pub id: String,
    pub kind: SessionKind,
    pub user_id: String,
    pub secret: String,
    pub created_at: i64,
    pub last_active: i64,
    pub removed: bool,
    pub agent: Agent,
}

/// Inactivity and absolute lifetime limits. Zero disables a limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionLifetime {
    pub expire_secs: i64,
    pub max_duration_secs: i64,
}

impl SessionLifetime {
    pub fn new(expire_secs: u64, max_duration_secs: u64) -> Self {
        Self {
            expire_secs: expire_secs as i64,
            max_duration_secs: max_duration_secs as i64,
        }
    }

    pub fn is_fresh(&self, session: &Session, now: i64) -> bool {
        if session.removed {
            return false;
        }
        if self.expire_secs != 0 && session.last_active < now - self.expire_secs {
            return false;
        }
        if self.max_duration_secs != 0 && session.created_at < now - self.max_duration_secs {
            return false;
        }
        true
    }
}

/// Lifetimes for each session kind.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionLifetimes {
    pub admin: SessionLifetime,
    pub user: SessionLifetime,
    pub proxy: SessionLifetime,
}

impl SessionLifetimes {
    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            admin: SessionLifetime::new(config.admin.expire_secs, config.admin.max_duration_secs),
            user: SessionLifetime::new(config.user.expire_secs, config.user.max_duration_secs),
            proxy: SessionLifetime::new(config.proxy.expire_secs, config.proxy.max_duration_secs),
        }
    }

    pub fn get(&self, kind: SessionKind) -> SessionLifetime {
        match kind {
            SessionKind::Admin => self.admin,
            SessionKind::User => self.user,
            SessionKind::Proxy => self.proxy,
        }
    }
}

pub(crate) fn random_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Creates, refreshes and removes sessions.
#[derive(Clone)]
pub struct SessionManager {
    repo: Arc<dyn SessionRepository>,
    keys: Arc<CookieKeys>,
    lifetimes: SessionLifetimes,
}

impl SessionManager {
    pub fn new(
        repo: Arc<dyn SessionRepository>,
        keys: Arc<CookieKeys>,
        lifetimes: SessionLifetimes,
    ) -> Self {
        Self {
            repo,
            keys,
            lifetimes,
        }
    }

    /// Signature binding a session secret to the key of its kind.
    fn sign(&self, kind: SessionKind, secret: &str) -> GatewayResult<String> {
        let mut mac = Hmac::<Sha512>::new_from_slice(self.keys.signing_key(kind))
            .map_err(|e| GatewayError::Unknown(format!("hmac key: {}", e)))?;
        mac.update(secret.as_bytes());
        Ok(STANDARD_NO_PAD.encode(mac.finalize().into_bytes()))
    }

    /// Create and persist a session for a freshly authenticated user.
    ///
    /// Returns the session and the signature the caller embeds in its cookie.
    pub async fn create(
        &self,
        user_id: &str,
        ctx: &RequestContext,
        kind: SessionKind,
    ) -> GatewayResult<(Session, String)> {
        let now = unix_now();
        let session = Session {
            id: random_string(SESSION_ID_LEN),
            kind,
            user_id: user_id.to_string(),
            secret: random_string(SESSION_SECRET_LEN),
            created_at: now,
            last_active: now,
            removed: false,
            agent: ctx.agent.clone(),
        };
        let signature = self.sign(kind, &session.secret)?;

        self.repo.insert(&session).await?;

        tracing::info!(
            user_id = %user_id,
            kind = %kind,
            client_ip = %ctx.client_ip,
            "Session created"
        );
        Ok((session, signature))
    }

    /// Fetch a fresh session, refresh its last-active time and verify the
    /// signature. `None` for anything that is not a live, correctly signed
    /// session of `kind`.
    pub async fn get_update(
        &self,
        id: &str,
        ctx: &RequestContext,
        kind: SessionKind,
        signature: &str,
    ) -> GatewayResult<Option<Session>> {
        if id.is_empty() || signature.is_empty() {
            return Ok(None);
        }

        let Some(mut session) = self
            .repo
            .touch(id, kind, self.lifetimes.get(kind), unix_now())
            .await?
        else {
            return Ok(None);
        };

        let expected = self.sign(kind, &session.secret)?;
        if !bool::from(expected.as_bytes().ct_eq(signature.as_bytes())) {
            tracing::debug!(kind = %kind, "Session signature mismatch");
            return Ok(None);
        }

        if session.agent.diff(&ctx.agent) {
            self.repo.update_agent(&session.id, &ctx.agent).await?;
            session.agent = ctx.agent.clone();
        }

        Ok(Some(session))
    }

    pub async fn remove(&self, id: &str) -> GatewayResult<()> {
        match self.repo.remove(id).await {
            Ok(()) | Err(StoreError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn remove_all(&self, user_id: &str) -> GatewayResult<()> {
        match self.repo.remove_all(user_id).await {
            Ok(()) | Err(StoreError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
