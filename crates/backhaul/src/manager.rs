//! Backhaul manager - selection, failover and deferral
//!
//! Guards are short-held `std::sync::Mutex` locks; none is held while an
//! adapter call is awaited.

use crate::error::{BackhaulError, BackhaulResult};
use crate::satellite::{PassWindow, SatelliteBudget, SatelliteGrant, SatellitePolicy};
use crate::selector::{TransportCandidate, TransportSelector};
use crate::store::{DeferReason, DeferredStore};
use crate::transport::{MessagePriority, TransportAdapter, TransportKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use wildlink_core::{current_timestamp_ms, Config};

/// Messages retried per flush pass
const FLUSH_BATCH: usize = 32;

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A message that left the node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendReport {
    pub transport: TransportKind,
    /// Satellite pass window, when sent over satellite
    pub window: Option<PassWindow>,
    /// Emergency satellite send beyond the daily cap
    pub over_budget: bool,
    /// Transports that failed before this one succeeded
    pub failed_over: Vec<TransportKind>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SendOutcome {
    Sent(SendReport),
    /// Kept in the deferred store for a later flush
    Deferred { id: i64, reason: DeferReason },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushReport {
    pub sent: usize,
    pub remaining: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackhaulStats {
    pub sent_per_transport: HashMap<TransportKind, u64>,
    pub failovers: u64,
    pub deferred: u64,
    pub flushed: u64,
}

enum Attempt {
    Sent(SendReport),
    Blocked(DeferReason),
}

pub struct BackhaulManager {
    adapters: Vec<Arc<dyn TransportAdapter>>,
    selector: Mutex<TransportSelector>,
    satellite: Mutex<SatellitePolicy>,
    store: Mutex<Box<dyn DeferredStore>>,
    stats: Mutex<BackhaulStats>,
    send_timeout: Duration,
}

impl BackhaulManager {
    pub fn new(config: &Config, store: Box<dyn DeferredStore>) -> Self {
        let mut selector = TransportSelector::new(&config.transport, config.satellite.module);
        // Only registered adapters count as available
        for kind in TransportKind::ALL {
            selector.set_available(kind, false);
        }
        Self {
            adapters: Vec::new(),
            selector: Mutex::new(selector),
            satellite: Mutex::new(SatellitePolicy::new(config.satellite.clone())),
            store: Mutex::new(store),
            stats: Mutex::new(BackhaulStats::default()),
            send_timeout: Duration::from_millis(config.transport.send_timeout_ms),
        }
    }

    /// Register an adapter; it is assumed available until the next health check
    pub fn register(&mut self, adapter: Arc<dyn TransportAdapter>) {
        let kind = adapter.kind();
        self.adapters.retain(|a| a.kind() != kind);
        self.adapters.push(adapter);
        lock(&self.selector).set_available(kind, true);
        info!(transport = %kind, "Backhaul transport registered");
    }

    fn adapter(&self, kind: TransportKind) -> Option<Arc<dyn TransportAdapter>> {
        self.adapters.iter().find(|a| a.kind() == kind).cloned()
    }

    pub fn set_battery_level(&self, battery_level: u8) {
        let low_power = {
            let mut satellite = lock(&self.satellite);
            satellite.set_battery_level(battery_level);
            satellite.is_low_power()
        };
        lock(&self.selector).set_satellite_low_power(low_power);
    }

    pub fn select_optimal_network(&self, size: usize, priority: MessagePriority) -> TransportKind {
        lock(&self.selector).select_optimal_network(size, priority)
    }

    pub fn candidates(&self, size: usize, priority: MessagePriority) -> Vec<TransportCandidate> {
        lock(&self.selector).candidates(size, priority)
    }

    pub fn satellite_budget(&self) -> SatelliteBudget {
        lock(&self.satellite).budget()
    }

    pub fn stats(&self) -> BackhaulStats {
        lock(&self.stats).clone()
    }

    pub fn deferred_count(&self) -> BackhaulResult<usize> {
        lock(&self.store).len()
    }

    /// Poll every adapter and update availability
    pub async fn refresh_health(&self) -> HashMap<TransportKind, bool> {
        let mut health = HashMap::new();
        for adapter in &self.adapters {
            let kind = adapter.kind();
            let available = timeout(self.send_timeout, adapter.is_available())
                .await
                .unwrap_or(false);
            health.insert(kind, available);
        }
        let mut selector = lock(&self.selector);
        for kind in TransportKind::ALL {
            selector.set_available(kind, health.get(&kind).copied().unwrap_or(false));
        }
        health
    }

    async fn attempt(&self, payload: &[u8], priority: MessagePriority) -> Attempt {
        let ranked = lock(&self.selector).ranked(payload.len(), priority);
        let mut failed_over = Vec::new();
        let mut budget_blocked = false;

        for kind in ranked {
            let Some(adapter) = self.adapter(kind) else {
                continue;
            };
            let grant: Option<SatelliteGrant> = if kind == TransportKind::Satellite {
                let authorized = lock(&self.satellite).authorize(priority);
                match authorized {
                    Ok(grant) => Some(grant),
                    Err(BackhaulError::BudgetExceeded(reason)) => {
                        debug!(%reason, "Satellite skipped");
                        budget_blocked = true;
                        continue;
                    }
                    Err(e) => {
                        debug!(error = %e, "Satellite skipped");
                        continue;
                    }
                }
            } else {
                None
            };

            let result = match timeout(self.send_timeout, adapter.send(payload, priority)).await {
                Ok(result) => result,
                Err(_) => Err(BackhaulError::Timeout(format!(
                    "{} send after {:?}",
                    kind, self.send_timeout
                ))),
            };
            match result {
                Ok(()) => {
                    if let Some(grant) = &grant {
                        lock(&self.satellite).record_send(grant);
                    }
                    let mut stats = lock(&self.stats);
                    *stats.sent_per_transport.entry(kind).or_insert(0) += 1;
                    stats.failovers += failed_over.len() as u64;
                    return Attempt::Sent(SendReport {
                        transport: kind,
                        window: grant.map(|g| g.window),
                        over_budget: grant.is_some_and(|g| g.over_budget),
                        failed_over,
                    });
                }
                Err(e) => {
                    warn!(transport = %kind, error = %e, "Backhaul send failed, failing over");
                    lock(&self.selector).set_available(kind, false);
                    failed_over.push(kind);
                }
            }
        }

        if budget_blocked && failed_over.is_empty() {
            Attempt::Blocked(DeferReason::BudgetExceeded)
        } else {
            Attempt::Blocked(DeferReason::TransportUnavailable)
        }
    }

    /// Send over the best available transport, failing over in rank order and
    /// deferring when nothing can take the message
    pub async fn send_message(&self, payload: &[u8], priority: MessagePriority) -> BackhaulResult<SendOutcome> {
        if payload.is_empty() {
            return Err(BackhaulError::Validation("payload is empty".to_string()));
        }
        match self.attempt(payload, priority).await {
            Attempt::Sent(report) => {
                debug!(transport = %report.transport, size = payload.len(), "Backhaul message sent");
                Ok(SendOutcome::Sent(report))
            }
            Attempt::Blocked(reason) => {
                let id = lock(&self.store).push(payload, priority, reason, current_timestamp_ms())?;
                lock(&self.stats).deferred += 1;
                info!(id, reason = reason.as_str(), size = payload.len(), "Backhaul message deferred");
                Ok(SendOutcome::Deferred { id, reason })
            }
        }
    }

    /// Retry stored messages, highest priority first
    pub async fn flush_deferred(&self) -> BackhaulResult<FlushReport> {
        let pending = lock(&self.store).pending(FLUSH_BATCH)?;
        let mut report = FlushReport::default();
        if pending.is_empty() {
            return Ok(report);
        }
        if !lock(&self.selector).any_available() {
            report.remaining = lock(&self.store).len()?;
            return Ok(report);
        }

        for message in pending {
            match self.attempt(&message.payload, message.priority).await {
                Attempt::Sent(_) => {
                    lock(&self.store).remove(message.id)?;
                    report.sent += 1;
                }
                Attempt::Blocked(_) => {
                    lock(&self.store).record_attempt(message.id)?;
                }
            }
        }
        lock(&self.stats).flushed += report.sent as u64;
        report.remaining = lock(&self.store).len()?;
        if report.sent > 0 {
            info!(sent = report.sent, remaining = report.remaining, "Deferred messages flushed");
        }
        Ok(report)
    }
}
