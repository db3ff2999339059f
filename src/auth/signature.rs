//! HMAC-SHA512 request signatures.
//!
//! A signed request carries four headers:
//!
//! ```text
//! Pritunl-Zero-Token      public token of the user
//! Pritunl-Zero-Timestamp  unix seconds
//! Pritunl-Zero-Nonce      16..=128 chars, single use
//! Pritunl-Zero-Signature  base64(HMAC-SHA512(secret, token&timestamp&nonce&method&path))
//! ```

use axum::http::HeaderMap;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha512;
use std::sync::Arc;
use subtle::ConstantTimeEq;

use crate::auth::nonce::NonceGuard;
use crate::error::{GatewayError, GatewayResult};
use crate::model::{unix_now, User};
use crate::store::UserStore;

pub const TOKEN_HEADER: &str = "Pritunl-Zero-Token";
pub const SIGNATURE_HEADER: &str = "Pritunl-Zero-Signature";
pub const TIMESTAMP_HEADER: &str = "Pritunl-Zero-Timestamp";
pub const NONCE_HEADER: &str = "Pritunl-Zero-Nonce";

/// Header name prefix stripped before forwarding upstream.
pub const HEADER_PREFIX: &str = "pritunl-zero-";

pub const NONCE_MIN_LEN: usize = 16;
pub const NONCE_MAX_LEN: usize = 128;

type HmacSha512 = Hmac<Sha512>;

/// A parsed, not yet validated, request signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub token: String,
    pub signature: String,
    pub timestamp: i64,
    pub nonce: String,
    pub method: String,
    pub path: String,
}

impl Signature {
    pub fn parse(
        token: &str,
        signature: &str,
        timestamp: &str,
        nonce: &str,
        method: &str,
        path: &str,
    ) -> GatewayResult<Self> {
        let timestamp = match timestamp.trim().parse::<i64>() {
            Ok(ts) if ts != 0 => ts,
            _ => return Err(GatewayError::authentication("invalid signature timestamp")),
        };

        Ok(Self {
            token: token.to_string(),
            signature: signature.to_string(),
            timestamp,
            nonce: nonce.to_string(),
            method: method.to_string(),
            path: path.to_string(),
        })
    }

    /// Read the signature headers. `None` when none of them are present.
    pub fn from_headers(headers: &HeaderMap, method: &str, path: &str) -> Option<GatewayResult<Self>> {
        let get = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
        let (token, signature, timestamp, nonce) = (
            get(TOKEN_HEADER),
            get(SIGNATURE_HEADER),
            get(TIMESTAMP_HEADER),
            get(NONCE_HEADER),
        );

        if token.is_none() && signature.is_none() && timestamp.is_none() && nonce.is_none() {
            return None;
        }

        Some(Self::parse(
            token.unwrap_or_default(),
            signature.unwrap_or_default(),
            timestamp.unwrap_or_default(),
            nonce.unwrap_or_default(),
            method,
            path,
        ))
    }

    /// The string covered by the HMAC.
    pub fn auth_string(&self) -> String {
        auth_string(&self.token, self.timestamp, &self.nonce, &self.method, &self.path)
    }
}

fn auth_string(token: &str, timestamp: i64, nonce: &str, method: &str, path: &str) -> String {
    [token, &timestamp.to_string(), nonce, method, path].join("&")
}

/// Compute the base64 signature a client sends for a request.
pub fn sign(
    secret: &str,
    token: &str,
    timestamp: i64,
    nonce: &str,
    method: &str,
    path: &str,
) -> GatewayResult<String> {
    let mut mac = HmacSha512::new_from_slice(secret.as_bytes())
        .map_err(|e| GatewayError::Unknown(format!("hmac key: {}", e)))?;
    mac.update(auth_string(token, timestamp, nonce, method, path).as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Validates parsed signatures against stored user credentials.
#[derive(Clone)]
pub struct SignatureAuthenticator {
    users: Arc<dyn UserStore>,
    nonces: NonceGuard,
    window_secs: u64,
}

impl SignatureAuthenticator {
    pub fn new(users: Arc<dyn UserStore>, nonces: NonceGuard, window_secs: u64) -> Self {
        Self {
            users,
            nonces,
            window_secs,
        }
    }

    /// Validate a signature and return the user it belongs to.
    ///
    /// The nonce is consumed before the HMAC comparison, so a bad signature
    /// still burns its nonce.
    pub async fn validate(&self, sig: &Signature) -> GatewayResult<User> {
        if sig.token.is_empty() {
            return Err(GatewayError::authentication("missing signature token"));
        }

        if sig.nonce.len() < NONCE_MIN_LEN || sig.nonce.len() > NONCE_MAX_LEN {
            return Err(GatewayError::authentication("invalid signature nonce"));
        }

        if unix_now().abs_diff(sig.timestamp) > self.window_secs {
            return Err(GatewayError::authentication("signature timestamp outside window"));
        }

        let user = match self.users.get_by_token(&sig.token).await {
            Ok(user) => user,
            Err(crate::store::StoreError::NotFound(_)) => {
                return Err(GatewayError::authentication("unknown signature token"));
            }
            Err(e) => return Err(e.into()),
        };
        if !user.has_signature_credential() {
            return Err(GatewayError::authentication("user has no signature credential"));
        }

        self.nonces.validate(&sig.nonce).await?;

        let expected = sign(
            &user.secret,
            &user.token,
            sig.timestamp,
            &sig.nonce,
            &sig.method,
            &sig.path,
        )?;
        if !bool::from(expected.as_bytes().ct_eq(sig.signature.as_bytes())) {
            return Err(GatewayError::authentication("signature mismatch"));
        }

        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    const NONCE: &str = "0123456789abcdef0123";

    fn authenticator() -> (Arc<MemoryStore>, SignatureAuthenticator) {
        let store = Arc::new(MemoryStore::new());
        store.put_user(User {
            id: "u1".into(),
            token: "token-1".into(),
            secret: "secret-1".into(),
            ..Default::default()
        });
        let auth = SignatureAuthenticator::new(
            store.clone(),
            NonceGuard::new(store.clone()),
            60,
        );
        (store, auth)
    }

    fn signed(nonce: &str, timestamp: i64) -> Signature {
        let value = sign("secret-1", "token-1", timestamp, nonce, "GET", "/api").unwrap();
        Signature::parse("token-1", &value, &timestamp.to_string(), nonce, "GET", "/api").unwrap()
    }

    #[test]
    fn auth_string_joins_with_ampersand() {
        let sig = Signature::parse("t", "s", "42", "n", "POST", "/x").unwrap();
        assert_eq!(sig.auth_string(), "t&42&n&POST&/x");
    }

    #[test]
    fn zero_or_garbage_timestamp_is_rejected() {
        assert!(Signature::parse("t", "s", "0", NONCE, "GET", "/").is_err());
        assert!(Signature::parse("t", "s", "soon", NONCE, "GET", "/").is_err());
    }

    #[tokio::test]
    async fn valid_signature_succeeds_once() {
        let (_, auth) = authenticator();
        let sig = signed(NONCE, unix_now());

        let user = auth.validate(&sig).await.unwrap();
        assert_eq!(user.id, "u1");

        let err = auth.validate(&sig).await.unwrap_err();
        assert!(matches!(err, GatewayError::Authentication(ref m) if m.contains("duplicate")));
    }

    #[tokio::test]
    async fn stale_timestamp_fails_even_when_correct() {
        let (store, auth) = authenticator();

        let past = signed("stale-nonce-00000001", unix_now() - 120);
        assert!(auth.validate(&past).await.is_err());

        let future = signed("stale-nonce-00000002", unix_now() + 120);
        assert!(auth.validate(&future).await.is_err());

        // Rejected before the nonce store was touched.
        assert_eq!(store.nonce_count(), 0);
    }

    #[tokio::test]
    async fn extreme_timestamps_are_outside_window() {
        let (store, auth) = authenticator();
        let cases = [
            ("extreme-nonce-0000001", i64::MIN),
            ("extreme-nonce-0000002", i64::MAX),
        ];
        for (nonce, ts) in cases {
            let sig =
                Signature::parse("token-1", "x", &ts.to_string(), nonce, "GET", "/api").unwrap();
            let err = auth.validate(&sig).await.unwrap_err();
            assert!(matches!(err, GatewayError::Authentication(ref m) if m.contains("window")));
        }
        assert_eq!(store.nonce_count(), 0);
    }

    #[tokio::test]
    async fn bad_signature_still_burns_nonce() {
        let (store, auth) = authenticator();
        let mut sig = signed(NONCE, unix_now());
        sig.signature = "bm90IGEgc2lnbmF0dXJl".into();

        assert!(auth.validate(&sig).await.is_err());
        assert_eq!(store.nonce_count(), 1);
    }

    #[tokio::test]
    async fn nonce_length_is_bounded() {
        let (_, auth) = authenticator();
        assert!(auth.validate(&signed("short", unix_now())).await.is_err());
        let long = "n".repeat(NONCE_MAX_LEN + 1);
        assert!(auth.validate(&signed(&long, unix_now())).await.is_err());
    }

    #[tokio::test]
    async fn unknown_token_is_authentication_error() {
        let (_, auth) = authenticator();
        let mut sig = signed(NONCE, unix_now());
        sig.token = "nobody".into();
        assert!(matches!(
            auth.validate(&sig).await,
            Err(GatewayError::Authentication(_))
        ));
    }
}
