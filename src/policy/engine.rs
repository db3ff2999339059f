//! Layered authorization decisions.

use dashmap::DashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::auth::session::SessionKind;
use crate::context::RequestContext;
use crate::error::{ErrorData, GatewayResult};
use crate::events::{ChangeEvent, EventBus};
use crate::model::{unix_now, Service, User};
use crate::observability::metrics;
use crate::policy::Policy;
use crate::store::{PolicyStore, StoreError, StoreResult, UserStore};

/// Secondary-factor requirements gathered from passing policies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Decision {
    pub device_secondary: bool,
    pub secondary_provider: Option<String>,
}

impl Decision {
    fn merge(&mut self, policy: &Policy, kind: SessionKind) {
        self.device_secondary |= policy.device_secondary(kind);
        if self.secondary_provider.is_none() {
            self.secondary_provider = policy.secondary(kind).map(str::to_string);
        }
    }
}

/// Why a request was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    /// Shown to the client.
    pub data: ErrorData,
    /// Recorded in the audit trail.
    pub audit: ErrorData,
}

impl Denial {
    fn account(audit_error: &str, audit_message: &str) -> Self {
        Self {
            data: ErrorData::new("unauthorized", "Not authorized"),
            audit: ErrorData::new(audit_error, audit_message),
        }
    }

    fn rule(data: ErrorData) -> Self {
        Self {
            audit: data.clone(),
            data,
        }
    }

    /// The account itself is no longer active, so every session of the
    /// user is void.
    pub fn is_account_disabled(&self) -> bool {
        self.audit.error == "user_disabled"
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    Allow(Decision),
    Deny(Denial),
}

impl Evaluation {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Evaluation::Allow(_))
    }
}

/// A cached lookup and the cache generation it was fetched in.
struct Cached {
    generation: u64,
    policies: Arc<Vec<Policy>>,
}

/// Evaluates account state and policies for admin, user and proxy requests.
pub struct PolicyEngine {
    policies: Arc<dyn PolicyStore>,
    users: Arc<dyn UserStore>,
    events: EventBus,
    by_service: DashMap<String, Cached>,
    by_roles: DashMap<Vec<String>, Cached>,
    generation: AtomicU64,
}

impl PolicyEngine {
    pub fn new(policies: Arc<dyn PolicyStore>, users: Arc<dyn UserStore>, events: EventBus) -> Self {
        Self {
            policies,
            users,
            events,
            by_service: DashMap::new(),
            by_roles: DashMap::new(),
            generation: AtomicU64::new(0),
        }
    }

    /// Drop cached policy lookups. Entries fetched before this call are never
    /// served afterwards, even if their fetch completes later.
    pub fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.by_service.clear();
        self.by_roles.clear();
    }

    /// Console access: active account, super administrator, role policies.
    pub async fn validate_admin(
        &self,
        user: &User,
        is_api: bool,
        ctx: &RequestContext,
    ) -> GatewayResult<Evaluation> {
        if let Some(denial) = self.check_account(user).await? {
            return Ok(self.deny(denial));
        }
        if !user.is_super() {
            return Ok(self.deny(Denial::account("user_not_super", "User is not super user")));
        }

        let mut decision = Decision::default();
        if let Some(denial) = self
            .role_pass(user, is_api, SessionKind::Admin, ctx, &mut decision)
            .await?
        {
            return Ok(self.deny(denial));
        }
        Ok(Evaluation::Allow(decision))
    }

    /// User portal access: active account, role policies.
    pub async fn validate_user(
        &self,
        user: &User,
        is_api: bool,
        ctx: &RequestContext,
    ) -> GatewayResult<Evaluation> {
        if let Some(denial) = self.check_account(user).await? {
            return Ok(self.deny(denial));
        }

        let mut decision = Decision::default();
        if let Some(denial) = self
            .role_pass(user, is_api, SessionKind::User, ctx, &mut decision)
            .await?
        {
            return Ok(self.deny(denial));
        }
        Ok(Evaluation::Allow(decision))
    }

    /// Proxied service access: active account, role match, service
    /// policies, then role policies.
    pub async fn validate_proxy(
        &self,
        user: &User,
        is_api: bool,
        service: &Service,
        ctx: &RequestContext,
    ) -> GatewayResult<Evaluation> {
        if let Some(denial) = self.check_account(user).await? {
            return Ok(self.deny(denial));
        }

        if !user.has_any_role(&service.roles) {
            return Ok(self.deny(Denial {
                data: ErrorData::new("service_unauthorized", "Not authorized for service"),
                audit: ErrorData::new(
                    "service_unauthorized",
                    "User does not have roles required to access service",
                ),
            }));
        }

        let mut decision = Decision::default();

        let policies = self.service_policies(&service.id).await?;
        if let Some(denial) = evaluate(&policies, is_api, SessionKind::Proxy, ctx, &mut decision) {
            return Ok(self.deny(denial));
        }

        if let Some(denial) = self
            .role_pass(user, is_api, SessionKind::Proxy, ctx, &mut decision)
            .await?
        {
            return Ok(self.deny(denial));
        }

        Ok(Evaluation::Allow(decision))
    }

    /// Expired and disabled accounts. Never touches the policy store.
    async fn check_account(&self, user: &User) -> GatewayResult<Option<Denial>> {
        if user.active_expired(unix_now()) {
            match self.users.disable(&user.id).await {
                Ok(()) | Err(StoreError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
            self.events.publish(ChangeEvent::Users);
            tracing::info!(user_id = %user.id, "User disabled after active period ended");
            return Ok(Some(Denial::account(
                "user_disabled",
                "User is disabled from expired active time",
            )));
        }

        if user.disabled {
            return Ok(Some(Denial::account("user_disabled", "User is disabled")));
        }

        Ok(None)
    }

    async fn role_pass(
        &self,
        user: &User,
        is_api: bool,
        kind: SessionKind,
        ctx: &RequestContext,
        decision: &mut Decision,
    ) -> GatewayResult<Option<Denial>> {
        if user.roles.is_empty() {
            return Ok(None);
        }
        let policies = self.role_policies(&user.roles).await?;
        Ok(evaluate(&policies, is_api, kind, ctx, decision))
    }

    async fn service_policies(&self, service_id: &str) -> GatewayResult<Arc<Vec<Policy>>> {
        let ids = [service_id.to_string()];
        self.cached(
            &self.by_service,
            service_id.to_string(),
            self.policies.get_by_services(&ids),
        )
        .await
    }

    async fn role_policies(&self, roles: &[String]) -> GatewayResult<Arc<Vec<Policy>>> {
        let mut key = roles.to_vec();
        key.sort();
        key.dedup();

        self.cached(&self.by_roles, key.clone(), self.policies.get_by_roles(&key))
            .await
    }

    async fn cached<K, F>(
        &self,
        cache: &DashMap<K, Cached>,
        key: K,
        fetch: F,
    ) -> GatewayResult<Arc<Vec<Policy>>>
    where
        K: Eq + Hash,
        F: Future<Output = StoreResult<Vec<Policy>>>,
    {
        let generation = self.generation.load(Ordering::SeqCst);
        let hit = cache
            .get(&key)
            .filter(|entry| entry.generation == generation)
            .map(|entry| entry.policies.clone());
        if let Some(policies) = hit {
            return Ok(policies);
        }

        let policies = Arc::new(fetch.await?);
        // Tagged with the generation read before the fetch, so an
        // invalidation that raced it leaves the entry unusable.
        cache.insert(
            key,
            Cached {
                generation,
                policies: policies.clone(),
            },
        );
        Ok(policies)
    }

    fn deny(&self, denial: Denial) -> Evaluation {
        metrics::record_policy_denial(&denial.data.error);
        Evaluation::Deny(denial)
    }
}

/// Run every policy's rules; the first violation denies. Flags are merged
/// only once all policies pass. Signature clients skip interactive rules and
/// secondary-factor flags.
fn evaluate(
    policies: &[Policy],
    is_api: bool,
    kind: SessionKind,
    ctx: &RequestContext,
    decision: &mut Decision,
) -> Option<Denial> {
    for policy in policies {
        for rule in &policy.rules {
            if is_api && rule.is_interactive() {
                continue;
            }
            if let Some(violation) = rule.evaluate(&ctx.agent, ctx.client_ip) {
                tracing::debug!(
                    request_id = %ctx.request_id,
                    policy_id = %policy.id,
                    error = %violation.error,
                    "Policy rule violated"
                );
                return Some(Denial::rule(violation));
            }
        }
    }

    if !is_api {
        for policy in policies {
            decision.merge(policy, kind);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::agent::Agent;
    use crate::policy::Rule;
    use crate::store::MemoryStore;
    use axum::http::Method;

    fn ctx(country: &str) -> RequestContext {
        RequestContext {
            request_id: "test".into(),
            client_ip: "198.51.100.7".parse().unwrap(),
            method: Method::GET,
            path: "/".into(),
            host: "app.example.com".into(),
            scheme: "https",
            port: 443,
            agent: Agent {
                country_code: country.into(),
                operating_system: "linux".into(),
                browser: "chrome".into(),
                ..Default::default()
            },
        }
    }

    fn ops_user() -> User {
        User {
            id: "u1".into(),
            username: "alice".into(),
            roles: vec!["ops".into()],
            ..Default::default()
        }
    }

    fn ops_service() -> Service {
        Service {
            id: "svc".into(),
            roles: vec!["ops".into()],
            ..Default::default()
        }
    }

    fn location_policy(disable: bool) -> Policy {
        Policy {
            id: "p-location".into(),
            services: vec!["svc".into()],
            rules: vec![Rule::Location {
                disable,
                values: vec!["US".into()],
            }],
            ..Default::default()
        }
    }

    fn engine(store: &Arc<MemoryStore>) -> PolicyEngine {
        PolicyEngine::new(store.clone(), store.clone(), EventBus::default())
    }

    #[tokio::test]
    async fn disabled_user_denied_without_policy_lookup() {
        let store = Arc::new(MemoryStore::new());
        store.put_policy(location_policy(false));
        let engine = engine(&store);
        let user = User {
            disabled: true,
            ..ops_user()
        };

        let eval = engine
            .validate_proxy(&user, false, &ops_service(), &ctx("US"))
            .await
            .unwrap();

        let Evaluation::Deny(denial) = eval else {
            panic!("expected deny");
        };
        assert_eq!(denial.data.error, "unauthorized");
        assert_eq!(denial.audit.error, "user_disabled");
        assert!(denial.is_account_disabled());
        assert_eq!(store.policy_queries(), 0);
    }

    #[tokio::test]
    async fn location_rule_denies_and_disabled_rule_allows() {
        let store = Arc::new(MemoryStore::new());
        store.put_policy(location_policy(false));
        let eval = engine(&store)
            .validate_proxy(&ops_user(), false, &ops_service(), &ctx("DE"))
            .await
            .unwrap();
        let Evaluation::Deny(denial) = eval else {
            panic!("expected deny");
        };
        assert_eq!(denial.data.error, "location_policy");

        let store = Arc::new(MemoryStore::new());
        store.put_policy(location_policy(true));
        let eval = engine(&store)
            .validate_proxy(&ops_user(), false, &ops_service(), &ctx("DE"))
            .await
            .unwrap();
        assert!(eval.is_allowed());
    }

    #[tokio::test]
    async fn role_mismatch_is_service_unauthorized() {
        let store = Arc::new(MemoryStore::new());
        let user = User {
            roles: vec!["dev".into()],
            ..ops_user()
        };
        let eval = engine(&store)
            .validate_proxy(&user, false, &ops_service(), &ctx("US"))
            .await
            .unwrap();
        assert_eq!(
            eval,
            Evaluation::Deny(Denial {
                data: ErrorData::new("service_unauthorized", "Not authorized for service"),
                audit: ErrorData::new(
                    "service_unauthorized",
                    "User does not have roles required to access service"
                ),
            })
        );
    }

    #[tokio::test]
    async fn expired_user_is_disabled_and_announced() {
        let store = Arc::new(MemoryStore::new());
        let user = User {
            active_until: unix_now() - 10,
            ..ops_user()
        };
        store.put_user(user.clone());
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let engine = PolicyEngine::new(store.clone(), store.clone(), events);

        let eval = engine.validate_user(&user, false, &ctx("US")).await.unwrap();

        let Evaluation::Deny(denial) = eval else {
            panic!("expected deny");
        };
        assert_eq!(denial.audit.message, "User is disabled from expired active time");
        assert!(store.get_by_id("u1").await.unwrap().disabled);
        assert_eq!(rx.recv().await.unwrap(), ChangeEvent::Users);
    }

    #[tokio::test]
    async fn admin_requires_super() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(&store);

        let eval = engine.validate_admin(&ops_user(), false, &ctx("US")).await.unwrap();
        let Evaluation::Deny(denial) = eval else {
            panic!("expected deny");
        };
        assert_eq!(denial.audit.error, "user_not_super");

        let admin = User {
            administrator: "super".into(),
            ..ops_user()
        };
        assert!(engine.validate_admin(&admin, false, &ctx("US")).await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn service_secondary_provider_wins_over_role() {
        let store = Arc::new(MemoryStore::new());
        store.put_policy(Policy {
            id: "a-service".into(),
            services: vec!["svc".into()],
            proxy_secondary: Some("service-provider".into()),
            ..Default::default()
        });
        store.put_policy(Policy {
            id: "b-role".into(),
            roles: vec!["ops".into()],
            proxy_secondary: Some("role-provider".into()),
            proxy_device_secondary: true,
            ..Default::default()
        });

        let eval = engine(&store)
            .validate_proxy(&ops_user(), false, &ops_service(), &ctx("US"))
            .await
            .unwrap();
        assert_eq!(
            eval,
            Evaluation::Allow(Decision {
                device_secondary: true,
                secondary_provider: Some("service-provider".into()),
            })
        );
    }

    #[tokio::test]
    async fn api_requests_skip_interactive_rules_but_not_networks() {
        let store = Arc::new(MemoryStore::new());
        store.put_policy(Policy {
            id: "p".into(),
            services: vec!["svc".into()],
            proxy_device_secondary: true,
            rules: vec![
                Rule::Browser {
                    disable: false,
                    values: vec!["firefox".into()],
                },
                Rule::WhitelistNetworks {
                    disable: false,
                    values: vec!["198.51.100.0/24".parse().unwrap()],
                },
            ],
            ..Default::default()
        });
        let engine = engine(&store);

        let api = engine
            .validate_proxy(&ops_user(), true, &ops_service(), &ctx("US"))
            .await
            .unwrap();
        assert_eq!(api, Evaluation::Allow(Decision::default()));

        let browser = engine
            .validate_proxy(&ops_user(), false, &ops_service(), &ctx("US"))
            .await
            .unwrap();
        let Evaluation::Deny(denial) = browser else {
            panic!("expected deny");
        };
        assert_eq!(denial.data.error, "browser_policy");
    }

    /// Policy store whose first role lookup reads its answer, then waits for
    /// `release` before returning it.
    struct HeldPolicies {
        inner: Arc<MemoryStore>,
        held: std::sync::atomic::AtomicBool,
        fetched: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait::async_trait]
    impl PolicyStore for HeldPolicies {
        async fn get_by_services(&self, service_ids: &[String]) -> StoreResult<Vec<Policy>> {
            self.inner.get_by_services(service_ids).await
        }

        async fn get_by_roles(&self, roles: &[String]) -> StoreResult<Vec<Policy>> {
            let policies = self.inner.get_by_roles(roles).await?;
            if !self.held.swap(true, Ordering::SeqCst) {
                self.fetched.notify_one();
                self.release.notified().await;
            }
            Ok(policies)
        }
    }

    #[tokio::test]
    async fn fetch_racing_invalidation_is_not_cached() {
        let store = Arc::new(MemoryStore::new());
        let held = Arc::new(HeldPolicies {
            inner: store.clone(),
            held: std::sync::atomic::AtomicBool::new(false),
            fetched: tokio::sync::Notify::new(),
            release: tokio::sync::Notify::new(),
        });
        let engine = Arc::new(PolicyEngine::new(held.clone(), store.clone(), EventBus::default()));

        let first = tokio::spawn({
            let engine = engine.clone();
            async move {
                engine
                    .validate_user(&ops_user(), false, &ctx("DE"))
                    .await
                    .unwrap()
            }
        });
        held.fetched.notified().await;

        store.put_policy(Policy {
            id: "p-role-location".into(),
            roles: vec!["ops".into()],
            rules: vec![Rule::Location {
                disable: false,
                values: vec!["US".into()],
            }],
            ..Default::default()
        });
        engine.invalidate();
        held.release.notify_one();

        // The in-flight lookup answers with what it read.
        assert!(first.await.unwrap().is_allowed());

        let eval = engine.validate_user(&ops_user(), false, &ctx("DE")).await.unwrap();
        let Evaluation::Deny(denial) = eval else {
            panic!("stale policies served after invalidation");
        };
        assert_eq!(denial.data.error, "location_policy");
    }

    #[tokio::test]
    async fn cache_serves_until_invalidated() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(&store);

        engine
            .validate_proxy(&ops_user(), false, &ops_service(), &ctx("US"))
            .await
            .unwrap();
        let after_first = store.policy_queries();
        engine
            .validate_proxy(&ops_user(), false, &ops_service(), &ctx("US"))
            .await
            .unwrap();
        assert_eq!(store.policy_queries(), after_first);

        store.put_policy(location_policy(false));
        engine.invalidate();
        let eval = engine
            .validate_proxy(&ops_user(), false, &ops_service(), &ctx("DE"))
            .await
            .unwrap();
        assert!(!eval.is_allowed());
    }
}
