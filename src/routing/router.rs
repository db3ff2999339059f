//! Service lookup by host.
//!
//! # Responsibilities
//! - Hold the current host table
//! - Rebuild it from the service store when services change
//! - Return the matched host or explicit no-match
//!
//! # Design Decisions
//! - The table is immutable and swapped atomically on rebuild
//! - A failed rebuild keeps serving the previous table
//! - Explicit `None` rather than silent default

use arc_swap::ArcSwap;
use std::sync::Arc;

use crate::error::GatewayResult;
use crate::routing::hosts::{Host, HostTable};
use crate::store::ServiceStore;

pub struct ServiceRouter {
    store: Arc<dyn ServiceStore>,
    table: ArcSwap<HostTable>,
}

impl ServiceRouter {
    pub fn new(store: Arc<dyn ServiceStore>) -> Self {
        Self {
            store,
            table: ArcSwap::from_pointee(HostTable::default()),
        }
    }

    /// Rebuild the host table from the services with the given ids.
    pub async fn reload(&self, service_ids: &[String]) -> GatewayResult<usize> {
        let services = self.store.get_by_ids(service_ids).await?;
        let count = services.len();
        self.table.store(Arc::new(HostTable::build(services)));
        tracing::info!(services = count, "Service routes rebuilt");
        Ok(count)
    }

    pub fn match_host(&self, host: &str) -> Option<Arc<Host>> {
        self.table.load().lookup(host)
    }
}

impl std::fmt::Debug for ServiceRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRouter").finish_non_exhaustive()
    }
}
