//! Change notifications and scheduled tasks.
//!
//! # Data Flow
//! ```text
//! config watcher / policy engine / refresh timer
//!     → EventBus::publish(ChangeEvent)
//!     → subscribers (certificate router, dispatcher, policy cache)
//! ```
//!
//! # Design Decisions
//! - Broadcast channel: every subscriber sees every event
//! - A lagged subscriber treats the gap as `Refresh` and rebuilds everything
//! - Timers are plain tokio intervals that stop on shutdown

use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::auth::nonce::NonceGuard;

/// Something the gateway caches has changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeEvent {
    Certificates,
    Services,
    Policies,
    Users,
    /// Periodic full rebuild.
    Refresh,
}

impl ChangeEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeEvent::Certificates => "certificate.change",
            ChangeEvent::Services => "service.change",
            ChangeEvent::Policies => "policy.change",
            ChangeEvent::Users => "user.change",
            ChangeEvent::Refresh => "refresh",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ChangeEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: ChangeEvent) {
        tracing::debug!(event = event.as_str(), "Publishing change event");
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

/// Wait for the next event. Lag is reported as `Refresh`; `None` once the
/// bus is gone.
pub async fn next_event(rx: &mut broadcast::Receiver<ChangeEvent>) -> Option<ChangeEvent> {
    match rx.recv().await {
        Ok(event) => Some(event),
        Err(broadcast::error::RecvError::Lagged(skipped)) => {
            tracing::warn!(skipped = skipped, "Event subscriber lagged, forcing refresh");
            Some(ChangeEvent::Refresh)
        }
        Err(broadcast::error::RecvError::Closed) => None,
    }
}

/// Publish `Refresh` every `interval` until shutdown.
pub fn spawn_refresh(
    bus: EventBus,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => bus.publish(ChangeEvent::Refresh),
                _ = shutdown.recv() => {
                    tracing::debug!("Refresh timer stopped");
                    break;
                }
            }
        }
    })
}

/// Purge nonces older than `ttl` every `interval` until shutdown.
pub fn spawn_housekeeping(
    nonces: NonceGuard,
    ttl: Duration,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match nonces.purge_expired(ttl.as_secs()).await {
                        Ok(0) => {}
                        Ok(purged) => tracing::debug!(purged = purged, "Expired nonces purged"),
                        Err(e) => tracing::error!(error = %e, "Nonce purge failed"),
                    }
                }
                _ = shutdown.recv() => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Shutdown;

    #[tokio::test]
    async fn subscribers_see_published_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.publish(ChangeEvent::Policies);
        assert_eq!(next_event(&mut rx).await, Some(ChangeEvent::Policies));
    }

    #[tokio::test]
    async fn lag_becomes_refresh() {
        let bus = EventBus::new(1);
        let mut rx = bus.subscribe();
        bus.publish(ChangeEvent::Services);
        bus.publish(ChangeEvent::Certificates);
        assert_eq!(next_event(&mut rx).await, Some(ChangeEvent::Refresh));
    }

    #[tokio::test]
    async fn refresh_timer_ticks_until_shutdown() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let shutdown = Shutdown::new();
        let handle = spawn_refresh(bus.clone(), Duration::from_millis(20), shutdown.subscribe());

        assert_eq!(next_event(&mut rx).await, Some(ChangeEvent::Refresh));

        shutdown.trigger();
        handle.await.unwrap();
    }
}
