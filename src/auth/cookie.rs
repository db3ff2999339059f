//! Encrypted session cookies.
//!
//! Each surface has its own cookie name and key. The cookie value is
//! `<session id>.<session signature>`, encrypted and authenticated with the
//! namespace key through `PrivateCookieJar`.

use axum::http::{header::SET_COOKIE, HeaderMap, HeaderValue};
use axum::response::{IntoResponse, IntoResponseParts, ResponseParts};
use axum_extra::extract::cookie::{Cookie, Key, PrivateCookieJar, SameSite};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;
use std::convert::Infallible;

use crate::auth::session::SessionKind;
use crate::config::CookieConfig;
use crate::error::{GatewayError, GatewayResult};

pub const ADMIN_COOKIE: &str = "pritunl-zero-console";
pub const USER_COOKIE: &str = "pritunl-zero-user";
pub const PROXY_COOKIE: &str = "pritunl-zero";

const KEY_LEN: usize = 64;

pub fn cookie_name(kind: SessionKind) -> &'static str {
    match kind {
        SessionKind::Admin => ADMIN_COOKIE,
        SessionKind::User => USER_COOKIE,
        SessionKind::Proxy => PROXY_COOKIE,
    }
}

/// Per-namespace cookie keys.
pub struct CookieKeys {
    admin: Key,
    user: Key,
    proxy: Key,
}

impl std::fmt::Debug for CookieKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieKeys").finish_non_exhaustive()
    }
}

impl CookieKeys {
    pub fn from_config(config: &CookieConfig) -> GatewayResult<Self> {
        Ok(Self {
            admin: load_key(&config.admin_key, "admin")?,
            user: load_key(&config.user_key, "user")?,
            proxy: load_key(&config.proxy_key, "proxy")?,
        })
    }

    pub fn key(&self, kind: SessionKind) -> &Key {
        match kind {
            SessionKind::Admin => &self.admin,
            SessionKind::User => &self.user,
            SessionKind::Proxy => &self.proxy,
        }
    }

    /// HMAC key half used to sign session secrets.
    pub fn signing_key(&self, kind: SessionKind) -> &[u8] {
        self.key(kind).signing()
    }
}

fn load_key(encoded: &str, namespace: &str) -> GatewayResult<Key> {
    if encoded.is_empty() {
        tracing::warn!(
            namespace = namespace,
            "No cookie key configured, generated an ephemeral one"
        );
        let mut bytes = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        return Key::try_from(&bytes[..])
            .map_err(|e| GatewayError::Unknown(format!("cookie key: {}", e)));
    }

    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| GatewayError::Parse(format!("{} cookie key: {}", namespace, e)))?;
    Key::try_from(bytes.as_slice())
        .map_err(|e| GatewayError::Parse(format!("{} cookie key: {}", namespace, e)))
}

/// Decrypted content of a session cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCookie {
    pub id: String,
    pub signature: String,
}

impl SessionCookie {
    /// Read and decrypt the cookie for `kind`. Unreadable cookies count as absent.
    pub fn read(headers: &HeaderMap, kind: SessionKind, keys: &CookieKeys) -> Option<Self> {
        let jar = PrivateCookieJar::from_headers(headers, keys.key(kind).clone());
        let cookie = jar.get(cookie_name(kind))?;
        let (id, signature) = cookie.value().split_once('.')?;
        if id.is_empty() || signature.is_empty() {
            return None;
        }
        Some(Self {
            id: id.to_string(),
            signature: signature.to_string(),
        })
    }

    fn value(&self) -> String {
        format!("{}.{}", self.id, self.signature)
    }

    /// Encrypted `Set-Cookie` for this session, optionally scoped to `domain`.
    pub fn set_cookie(
        &self,
        kind: SessionKind,
        keys: &CookieKeys,
        domain: Option<&str>,
    ) -> SetCookies {
        let mut cookie = Cookie::build((cookie_name(kind), self.value()))
            .path("/")
            .secure(true)
            .http_only(true)
            .same_site(SameSite::Lax)
            .build();
        if let Some(domain) = domain {
            cookie.set_domain(domain.to_string());
        }

        let response = PrivateCookieJar::new(keys.key(kind).clone())
            .add(cookie)
            .into_response();
        SetCookies(response.headers().get_all(SET_COOKIE).iter().cloned().collect())
    }
}

/// Removal cookies for `kind`: the host-only variant and, when given, the
/// variant scoped to `shared_domain`.
pub fn removal_cookies(kind: SessionKind, shared_domain: Option<&str>) -> SetCookies {
    let mut values = Vec::new();
    let mut push = |domain: Option<&str>| {
        let mut cookie = Cookie::build((cookie_name(kind), "")).path("/").build();
        if let Some(domain) = domain {
            cookie.set_domain(domain.to_string());
        }
        cookie.make_removal();
        if let Ok(value) = HeaderValue::from_str(&cookie.to_string()) {
            values.push(value);
        }
    };

    push(None);
    if let Some(domain) = shared_domain {
        push(Some(domain));
    }
    SetCookies(values)
}

/// A batch of `Set-Cookie` header values.
#[derive(Debug, Clone, Default)]
pub struct SetCookies(pub Vec<HeaderValue>);

impl SetCookies {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn extend(&mut self, other: SetCookies) {
        self.0.extend(other.0);
    }
}

impl IntoResponseParts for SetCookies {
    type Error = Infallible;

    fn into_response_parts(self, mut res: ResponseParts) -> Result<ResponseParts, Self::Error> {
        for value in self.0 {
            res.headers_mut().append(SET_COOKIE, value);
        }
        Ok(res)
    }
}
