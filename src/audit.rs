//! Audit side channel.
//!
//! Authorization failures are handed to an `AuditSink`. Storage of audit
//! records belongs to another system; the default sink writes them to the
//! `audit` tracing target.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::context::RequestContext;
use crate::error::GatewayResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditKind {
    AdminAuthFailed,
    UserAuthFailed,
    ProxyAuthFailed,
}

impl AuditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditKind::AdminAuthFailed => "admin_auth_failed",
            AuditKind::UserAuthFailed => "user_auth_failed",
            AuditKind::ProxyAuthFailed => "proxy_auth_failed",
        }
    }
}

pub type AuditFields = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    pub user_id: String,
    pub kind: AuditKind,
    pub fields: AuditFields,
    pub client_ip: String,
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(
        &self,
        user_id: &str,
        kind: AuditKind,
        fields: AuditFields,
        ctx: &RequestContext,
    ) -> GatewayResult<()>;
}

/// Writes audit records as structured log events.
#[derive(Debug, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(
        &self,
        user_id: &str,
        kind: AuditKind,
        fields: AuditFields,
        ctx: &RequestContext,
    ) -> GatewayResult<()> {
        tracing::warn!(
            target: "audit",
            user_id = %user_id,
            kind = kind.as_str(),
            client_ip = %ctx.client_ip,
            request_id = %ctx.request_id,
            fields = ?fields,
            "Authorization failed"
        );
        Ok(())
    }
}

/// Keeps audit records in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(
        &self,
        user_id: &str,
        kind: AuditKind,
        fields: AuditFields,
        ctx: &RequestContext,
    ) -> GatewayResult<()> {
        if let Ok(mut records) = self.records.lock() {
            records.push(AuditRecord {
                user_id: user_id.to_string(),
                kind,
                fields,
                client_ip: ctx.client_ip.to_string(),
            });
        }
        Ok(())
    }
}
