//! In-memory store backed by `DashMap`.
//!
//! Seeded from the configuration file's `users`, `services`, `policies` and
//! `certificates` tables. Sessions and nonces live only in memory and survive
//! configuration reloads.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::auth::agent::Agent;
use crate::auth::session::{Session, SessionKind, SessionLifetime};
use crate::config::GatewayConfig;
use crate::model::{CertificateRecord, Service, User};
use crate::policy::Policy;
use crate::store::{
    CertificateStore, NonceRepository, PolicyStore, ServiceStore, SessionRepository, StoreError,
    StoreResult, UserStore,
};

/// Concurrent in-memory implementation of every store trait.
#[derive(Debug, Default)]
pub struct MemoryStore {
    users: DashMap<String, User>,
    /// token -> user id
    tokens: DashMap<String, String>,
    sessions: DashMap<String, Session>,
    nonces: DashMap<String, i64>,
    policies: DashMap<String, Policy>,
    certificates: DashMap<String, CertificateRecord>,
    services: DashMap<String, Service>,
    policy_queries: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store holding the config's seed records.
    pub fn from_config(config: &GatewayConfig) -> Self {
        let store = Self::new();
        store.reseed(config);
        store
    }

    /// Replace users, services, policies and certificates with the config's.
    ///
    /// Rows are upserted before stale ones are dropped, so concurrent readers
    /// see either the old or the new row and never an emptied table.
    pub fn reseed(&self, config: &GatewayConfig) {
        for user in &config.users {
            self.put_user(user.clone());
        }
        let tokens: HashMap<&str, &str> = config
            .users
            .iter()
            .filter(|u| !u.token.is_empty())
            .map(|u| (u.token.as_str(), u.id.as_str()))
            .collect();
        self.tokens
            .retain(|token, id| tokens.get(token.as_str()) == Some(&id.as_str()));
        replace_rows(&self.users, &config.users, |u| &u.id);

        for service in &config.services {
            self.put_service(service.clone());
        }
        replace_rows(&self.services, &config.services, |s| &s.id);

        for policy in &config.policies {
            self.put_policy(policy.clone());
        }
        replace_rows(&self.policies, &config.policies, |p| &p.id);

        for cert in &config.certificates {
            self.put_certificate(cert.clone());
        }
        replace_rows(&self.certificates, &config.certificates, |c| &c.id);

        tracing::debug!(
            users = self.users.len(),
            services = self.services.len(),
            policies = self.policies.len(),
            certificates = self.certificates.len(),
            "Memory store seeded"
        );
    }

    pub fn put_user(&self, user: User) {
        if !user.token.is_empty() {
            self.tokens.insert(user.token.clone(), user.id.clone());
        }
        self.users.insert(user.id.clone(), user);
    }

    pub fn delete_user(&self, id: &str) {
        if let Some((_, user)) = self.users.remove(id) {
            self.tokens.remove(&user.token);
        }
    }

    pub fn put_service(&self, service: Service) {
        self.services.insert(service.id.clone(), service);
    }

    pub fn put_policy(&self, policy: Policy) {
        self.policies.insert(policy.id.clone(), policy);
    }

    pub fn put_certificate(&self, cert: CertificateRecord) {
        self.certificates.insert(cert.id.clone(), cert);
    }

    /// Snapshot of a stored session, including removed ones.
    pub fn session(&self, id: &str) -> Option<Session> {
        self.sessions.get(id).map(|s| s.clone())
    }

    /// Number of policy lookups served so far.
    pub fn policy_queries(&self) -> u64 {
        self.policy_queries.load(Ordering::SeqCst)
    }

    pub fn nonce_count(&self) -> usize {
        self.nonces.len()
    }
}

/// Drop every row of `table` whose id is not among `rows`.
fn replace_rows<T>(table: &DashMap<String, T>, rows: &[T], id: impl Fn(&T) -> &String) {
    let keep: HashSet<&str> = rows.iter().map(|row| id(row).as_str()).collect();
    table.retain(|key, _| keep.contains(key.as_str()));
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn get_by_token(&self, token: &str) -> StoreResult<User> {
        let id = self
            .tokens
            .get(token)
            .map(|id| id.clone())
            .ok_or_else(|| StoreError::NotFound("user".into()))?;
        self.get_by_id(&id).await
    }

    async fn get_by_id(&self, id: &str) -> StoreResult<User> {
        self.users
            .get(id)
            .map(|u| u.clone())
            .ok_or_else(|| StoreError::NotFound("user".into()))
    }

    async fn get_by_username(&self, username: &str) -> StoreResult<User> {
        self.users
            .iter()
            .find(|u| u.username == username)
            .map(|u| u.clone())
            .ok_or_else(|| StoreError::NotFound("user".into()))
    }

    async fn disable(&self, id: &str) -> StoreResult<()> {
        let mut user = self
            .users
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound("user".into()))?;
        user.disabled = true;
        user.active_until = 0;
        Ok(())
    }
}

#[async_trait]
impl SessionRepository for MemoryStore {
    async fn insert(&self, session: &Session) -> StoreResult<()> {
        match self.sessions.entry(session.id.clone()) {
            Entry::Occupied(_) => Err(StoreError::Duplicate("session".into())),
            Entry::Vacant(slot) => {
                slot.insert(session.clone());
                Ok(())
            }
        }
    }

    async fn touch(
        &self,
        id: &str,
        kind: SessionKind,
        lifetime: SessionLifetime,
        now: i64,
    ) -> StoreResult<Option<Session>> {
        // The shard write lock is held across the check and the update.
        let Some(mut session) = self.sessions.get_mut(id) else {
            return Ok(None);
        };
        if session.kind != kind || !lifetime.is_fresh(&session, now) {
            return Ok(None);
        }
        session.last_active = now;
        Ok(Some(session.clone()))
    }

    async fn update_agent(&self, id: &str, agent: &Agent) -> StoreResult<()> {
        let mut session = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound("session".into()))?;
        session.agent = agent.clone();
        Ok(())
    }

    async fn remove(&self, id: &str) -> StoreResult<()> {
        let mut session = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound("session".into()))?;
        session.removed = true;
        Ok(())
    }

    async fn remove_all(&self, user_id: &str) -> StoreResult<()> {
        for mut session in self.sessions.iter_mut() {
            if session.user_id == user_id {
                session.removed = true;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl NonceRepository for MemoryStore {
    async fn insert_unique(&self, nonce: &str, timestamp: i64) -> StoreResult<()> {
        match self.nonces.entry(nonce.to_string()) {
            Entry::Occupied(_) => Err(StoreError::Duplicate("nonce".into())),
            Entry::Vacant(slot) => {
                slot.insert(timestamp);
                Ok(())
            }
        }
    }

    async fn purge_before(&self, timestamp: i64) -> StoreResult<usize> {
        let before = self.nonces.len();
        self.nonces.retain(|_, inserted| *inserted >= timestamp);
        Ok(before.saturating_sub(self.nonces.len()))
    }
}

#[async_trait]
impl PolicyStore for MemoryStore {
    async fn get_by_services(&self, service_ids: &[String]) -> StoreResult<Vec<Policy>> {
        self.policy_queries.fetch_add(1, Ordering::SeqCst);
        let mut policies: Vec<Policy> = self
            .policies
            .iter()
            .filter(|p| p.services.iter().any(|s| service_ids.contains(s)))
            .map(|p| p.clone())
            .collect();
        policies.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(policies)
    }

    async fn get_by_roles(&self, roles: &[String]) -> StoreResult<Vec<Policy>> {
        self.policy_queries.fetch_add(1, Ordering::SeqCst);
        let mut policies: Vec<Policy> = self
            .policies
            .iter()
            .filter(|p| p.roles.iter().any(|r| roles.contains(r)))
            .map(|p| p.clone())
            .collect();
        policies.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(policies)
    }
}

#[async_trait]
impl CertificateStore for MemoryStore {
    async fn get_by_ids(&self, ids: &[String]) -> StoreResult<Vec<CertificateRecord>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.certificates.get(id).map(|c| c.clone()))
            .collect())
    }
}

#[async_trait]
impl ServiceStore for MemoryStore {
    async fn get_by_ids(&self, ids: &[String]) -> StoreResult<Vec<Service>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.services.get(id).map(|s| s.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(id: &str, user_id: &str, created_at: i64) -> Session {
        Session {
            id: id.into(),
            kind: SessionKind::Proxy,
            user_id: user_id.into(),
            secret: "s".repeat(64),
            created_at,
            last_active: created_at,
            removed: false,
            agent: Agent::default(),
        }
    }

    #[tokio::test]
    async fn nonce_insert_is_single_use() {
        let store = MemoryStore::new();
        store.insert_unique("abcdefghijklmnop", 10).await.unwrap();
        let err = store.insert_unique("abcdefghijklmnop", 11).await.unwrap_err();
        assert_eq!(err, StoreError::Duplicate("nonce".into()));
    }

    #[tokio::test]
    async fn purge_drops_only_old_nonces() {
        let store = MemoryStore::new();
        store.insert_unique("old-nonce-000000", 10).await.unwrap();
        store.insert_unique("new-nonce-000000", 500).await.unwrap();

        assert_eq!(store.purge_before(100).await.unwrap(), 1);
        assert_eq!(store.nonce_count(), 1);
        assert!(store.insert_unique("old-nonce-000000", 600).await.is_ok());
    }

    #[tokio::test]
    async fn touch_respects_kind_and_removal() {
        let store = MemoryStore::new();
        store.insert(&session("s1", "u1", 1_000)).await.unwrap();
        let lifetime = SessionLifetime::new(60, 0);

        let refreshed = store
            .touch("s1", SessionKind::Proxy, lifetime, 1_030)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(refreshed.last_active, 1_030);

        assert!(store
            .touch("s1", SessionKind::Admin, lifetime, 1_031)
            .await
            .unwrap()
            .is_none());

        store.remove("s1").await.unwrap();
        assert!(store
            .touch("s1", SessionKind::Proxy, lifetime, 1_032)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn remove_all_only_touches_owner() {
        let store = MemoryStore::new();
        store.insert(&session("a", "u1", 1)).await.unwrap();
        store.insert(&session("b", "u1", 1)).await.unwrap();
        store.insert(&session("c", "u2", 1)).await.unwrap();

        store.remove_all("u1").await.unwrap();

        assert!(store.session("a").unwrap().removed);
        assert!(store.session("b").unwrap().removed);
        assert!(!store.session("c").unwrap().removed);
    }

    fn seeded_config() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.users = vec![User {
            id: "u1".into(),
            token: "tok".into(),
            secret: "sec".into(),
            roles: vec!["ops".into()],
            ..Default::default()
        }];
        config.policies = (0..200)
            .map(|i| Policy {
                id: format!("p-{:03}", i),
                roles: vec!["ops".into()],
                ..Default::default()
            })
            .collect();
        config
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn reseed_never_exposes_empty_tables() {
        let config = seeded_config();
        let store = std::sync::Arc::new(MemoryStore::from_config(&config));
        let done = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));

        let reseeder = std::thread::spawn({
            let store = store.clone();
            let done = done.clone();
            move || {
                while !done.load(Ordering::SeqCst) {
                    store.reseed(&config);
                }
            }
        });

        let roles = vec!["ops".to_string()];
        let mut short_reads = 0;
        let mut missing_users = 0;
        for _ in 0..5_000 {
            if store.get_by_roles(&roles).await.unwrap().len() != 200 {
                short_reads += 1;
            }
            if store.get_by_token("tok").await.is_err() {
                missing_users += 1;
            }
        }
        done.store(true, Ordering::SeqCst);
        reseeder.join().unwrap();

        assert_eq!(short_reads, 0);
        assert_eq!(missing_users, 0);
    }

    #[test]
    fn reseed_drops_rows_missing_from_config() {
        let mut config = seeded_config();
        let store = MemoryStore::from_config(&config);

        config.policies.truncate(1);
        config.users[0].token = "tok-2".into();
        store.reseed(&config);

        assert_eq!(store.policies.len(), 1);
        assert!(store.tokens.get("tok").is_none());
        assert_eq!(store.tokens.get("tok-2").unwrap().as_str(), "u1");
    }

    #[tokio::test]
    async fn token_index_follows_user_updates() {
        let store = MemoryStore::new();
        store.put_user(User {
            id: "u1".into(),
            token: "tok".into(),
            secret: "sec".into(),
            ..Default::default()
        });

        assert_eq!(store.get_by_token("tok").await.unwrap().id, "u1");

        store.delete_user("u1");
        assert_eq!(
            store.get_by_token("tok").await.unwrap_err(),
            StoreError::NotFound("user".into())
        );
    }
}
