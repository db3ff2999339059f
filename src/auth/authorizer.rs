//! Request-scoped authorization capability.
//!
//! An `Authorizer` is built once per request from either the signature
//! headers or the session cookie of its surface, and dropped with the
//! response. It never persists anything itself.

use axum::http::HeaderMap;
use std::sync::Arc;

use crate::auth::cookie::{removal_cookies, CookieKeys, SessionCookie, SetCookies};
use crate::auth::session::{Session, SessionKind, SessionManager};
use crate::auth::signature::{Signature, SignatureAuthenticator};
use crate::context::RequestContext;
use crate::error::GatewayResult;
use crate::model::{Service, User};
use crate::store::{StoreError, UserStore};

/// Collaborators needed to authorize requests.
#[derive(Clone)]
pub struct AuthServices {
    pub users: Arc<dyn UserStore>,
    pub signatures: SignatureAuthenticator,
    pub sessions: SessionManager,
    pub cookies: Arc<CookieKeys>,
}

impl AuthServices {
    pub async fn authorize_admin(
        &self,
        headers: &HeaderMap,
        ctx: &RequestContext,
    ) -> GatewayResult<Authorizer> {
        self.authorize(SessionKind::Admin, None, None, headers, ctx).await
    }

    pub async fn authorize_user(
        &self,
        headers: &HeaderMap,
        ctx: &RequestContext,
    ) -> GatewayResult<Authorizer> {
        self.authorize(SessionKind::User, None, None, headers, ctx).await
    }

    /// Authorize a request for `service`. `shared_domain` is the parent
    /// domain the proxy cookie is scoped to for session-sharing services.
    pub async fn authorize_proxy(
        &self,
        service: Arc<Service>,
        shared_domain: Option<String>,
        headers: &HeaderMap,
        ctx: &RequestContext,
    ) -> GatewayResult<Authorizer> {
        self.authorize(SessionKind::Proxy, Some(service), shared_domain, headers, ctx)
            .await
    }

    async fn authorize(
        &self,
        kind: SessionKind,
        service: Option<Arc<Service>>,
        shared_domain: Option<String>,
        headers: &HeaderMap,
        ctx: &RequestContext,
    ) -> GatewayResult<Authorizer> {
        let mut authr = Authorizer {
            kind,
            session: None,
            signature: None,
            service,
            user: None,
            shared_domain,
        };

        if let Some(parsed) = Signature::from_headers(headers, ctx.method.as_str(), &ctx.path) {
            let signature = parsed?;
            let user = self.signatures.validate(&signature).await?;
            tracing::debug!(
                request_id = %ctx.request_id,
                user_id = %user.id,
                kind = %kind,
                "Signature authenticated"
            );
            authr.signature = Some(signature);
            authr.user = Some(user);
            return Ok(authr);
        }

        if let Some(cookie) = SessionCookie::read(headers, kind, &self.cookies) {
            authr.session = self
                .sessions
                .get_update(&cookie.id, ctx, kind, &cookie.signature)
                .await?;
        }

        Ok(authr)
    }
}

pub struct Authorizer {
    kind: SessionKind,
    session: Option<Session>,
    signature: Option<Signature>,
    service: Option<Arc<Service>>,
    user: Option<User>,
    shared_domain: Option<String>,
}

impl Authorizer {
    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    /// A session or a validated signature is bound.
    pub fn is_valid(&self) -> bool {
        self.session.is_some() || self.signature.is_some()
    }

    /// Authenticated by request signature rather than a session.
    pub fn is_api(&self) -> bool {
        self.signature.is_some()
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn service(&self) -> Option<&Arc<Service>> {
        self.service.as_ref()
    }

    /// Resolve the user behind this request.
    ///
    /// A session pointing at a deleted user is unbound, so the request is
    /// treated as unauthenticated from then on.
    pub async fn get_user(&mut self, users: &dyn UserStore) -> GatewayResult<Option<User>> {
        if let Some(user) = &self.user {
            return Ok(Some(user.clone()));
        }

        let Some(session) = &self.session else {
            return Ok(None);
        };

        match users.get_by_id(&session.user_id).await {
            Ok(user) => {
                self.user = Some(user.clone());
                Ok(Some(user))
            }
            Err(StoreError::NotFound(_)) => {
                tracing::warn!(user_id = %session.user_id, "Session references missing user");
                self.session = None;
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Soft remove the bound session and return the cookie removals for this
    /// surface. Proxy sessions of session-sharing services also clear the
    /// parent domain cookie.
    pub async fn clear(&mut self, sessions: &SessionManager) -> GatewayResult<SetCookies> {
        if let Some(session) = self.session.take() {
            sessions.remove(&session.id).await?;
        }
        self.signature = None;
        self.user = None;

        let shared = match self.kind {
            SessionKind::Proxy => self.shared_domain.as_deref(),
            _ => None,
        };
        Ok(removal_cookies(self.kind, shared))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::agent::Agent;
    use crate::auth::nonce::NonceGuard;
    use crate::auth::session::{SessionLifetime, SessionLifetimes};
    use crate::auth::signature::{sign, NONCE_HEADER, SIGNATURE_HEADER, TIMESTAMP_HEADER, TOKEN_HEADER};
    use crate::config::CookieConfig;
    use crate::error::GatewayError;
    use crate::model::unix_now;
    use crate::store::MemoryStore;
    use axum::http::{header::COOKIE, HeaderValue, Method};

    fn ctx() -> RequestContext {
        RequestContext {
            request_id: "test".into(),
            client_ip: "10.0.0.1".parse().unwrap(),
            method: Method::GET,
            path: "/data".into(),
            host: "app.example.com".into(),
            scheme: "https",
            port: 443,
            agent: Agent::default(),
        }
    }

    fn services() -> (Arc<MemoryStore>, AuthServices) {
        let store = Arc::new(MemoryStore::new());
        store.put_user(User {
            id: "u1".into(),
            token: "tok".into(),
            secret: "sec".into(),
            ..Default::default()
        });
        let keys = Arc::new(CookieKeys::from_config(&CookieConfig::default()).unwrap());
        let lifetime = SessionLifetime::new(3_600, 0);
        let services = AuthServices {
            users: store.clone(),
            signatures: SignatureAuthenticator::new(store.clone(), NonceGuard::new(store.clone()), 60),
            sessions: SessionManager::new(
                store.clone(),
                keys.clone(),
                SessionLifetimes {
                    admin: lifetime,
                    user: lifetime,
                    proxy: lifetime,
                },
            ),
            cookies: keys,
        };
        (store, services)
    }

    fn cookie_headers(set: &SetCookies) -> HeaderMap {
        let value = set.0[0].to_str().unwrap().split(';').next().unwrap().to_string();
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_str(&value).unwrap());
        headers
    }

    #[tokio::test]
    async fn no_credentials_is_not_valid() {
        let (_, services) = services();
        let authr = services.authorize_user(&HeaderMap::new(), &ctx()).await.unwrap();
        assert!(!authr.is_valid());
        assert!(!authr.is_api());
    }

    #[tokio::test]
    async fn signature_headers_bind_user_without_session() {
        let (_, services) = services();
        let ts = unix_now();
        let nonce = "nonce-for-authorizer-01";
        let sig = sign("sec", "tok", ts, nonce, "GET", "/data").unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(TOKEN_HEADER, HeaderValue::from_static("tok"));
        headers.insert(SIGNATURE_HEADER, HeaderValue::from_str(&sig).unwrap());
        headers.insert(TIMESTAMP_HEADER, HeaderValue::from_str(&ts.to_string()).unwrap());
        headers.insert(NONCE_HEADER, HeaderValue::from_static("nonce-for-authorizer-01"));

        let mut authr = services.authorize_admin(&headers, &ctx()).await.unwrap();
        assert!(authr.is_valid());
        assert!(authr.is_api());
        assert!(authr.session().is_none());
        let user = authr.get_user(services.users.as_ref()).await.unwrap().unwrap();
        assert_eq!(user.id, "u1");
    }

    #[tokio::test]
    async fn partial_signature_headers_are_rejected() {
        let (_, services) = services();
        let mut headers = HeaderMap::new();
        headers.insert(TOKEN_HEADER, HeaderValue::from_static("tok"));

        let err = services.authorize_user(&headers, &ctx()).await.err().unwrap();
        assert!(matches!(err, GatewayError::Authentication(_)));
    }

    #[tokio::test]
    async fn cookie_session_resolves_and_clears() {
        let (store, services) = services();
        let (session, signature) = services
            .sessions
            .create("u1", &ctx(), SessionKind::User)
            .await
            .unwrap();
        let set = SessionCookie {
            id: session.id.clone(),
            signature,
        }
        .set_cookie(SessionKind::User, &services.cookies, None);
        let headers = cookie_headers(&set);

        let mut authr = services.authorize_user(&headers, &ctx()).await.unwrap();
        assert!(authr.is_valid());
        assert!(!authr.is_api());

        let removal = authr.clear(&services.sessions).await.unwrap();
        assert_eq!(removal.0.len(), 1);
        assert!(!authr.is_valid());
        assert!(store.session(&session.id).unwrap().removed);
    }

    #[tokio::test]
    async fn missing_user_unbinds_session() {
        let (store, services) = services();
        let (session, signature) = services
            .sessions
            .create("u1", &ctx(), SessionKind::User)
            .await
            .unwrap();
        let headers = cookie_headers(
            &SessionCookie {
                id: session.id,
                signature,
            }
            .set_cookie(SessionKind::User, &services.cookies, None),
        );
        store.delete_user("u1");

        let mut authr = services.authorize_user(&headers, &ctx()).await.unwrap();
        assert!(authr.is_valid());
        assert!(authr.get_user(services.users.as_ref()).await.unwrap().is_none());
        assert!(!authr.is_valid());
    }
}
