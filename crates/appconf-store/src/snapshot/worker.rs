//! Background provisioning
//!
//! Polls the engine for snapshots in `Provisioning` and drives each to a
//! terminal status. Timeouts are retried with randomized backoff up to
//! `max_attempts`, after which the snapshot is marked `Failed`.

use crate::config::SnapshotOptions;
use crate::errors::{cancelled, Result};
use crate::snapshot::engine::SnapshotEngine;
use appconf_core::backoff::backoff;
use appconf_core::{CancelSignal, ExErrorKind, Snapshot};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

pub struct ProvisioningWorker {
    engine: Arc<SnapshotEngine>,
    poll_interval: Duration,
    retry_min: Duration,
    retry_max: Duration,
    max_attempts: u32,
}

impl ProvisioningWorker {
    pub fn new(engine: Arc<SnapshotEngine>, options: &SnapshotOptions) -> Self {
        Self {
            engine,
            poll_interval: options.poll_interval(),
            retry_min: options.retry_min(),
            retry_max: options.retry_max(),
            max_attempts: options.max_attempts.max(1),
        }
    }

    /// Poll until `shutdown` carries `true` or its sender is dropped
    ///
    /// In-flight provisioning is cancelled on shutdown; the snapshot stays in
    /// `Provisioning` and is picked up again on the next start.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let cancel = CancelSignal::from_receiver(shutdown.clone());
        info!(op = "worker.start", poll_interval_ms = self.poll_interval.as_millis() as u64, "Provisioning worker starting");

        loop {
            if *shutdown.borrow() {
                info!(op = "worker.shutdown", "Shutdown signal received");
                break;
            }

            match self.run_once(&cancel).await {
                Ok(0) => {}
                Ok(count) => info!(op = "worker.poll.done", count, "Provisioned snapshots"),
                Err(e) if e.kind() == ExErrorKind::Cancelled => {
                    info!(op = "worker.shutdown", "Shutdown during provisioning");
                    break;
                }
                Err(e) => error!(op = "worker.poll.error", error = %e, "Provisioning pass failed"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(op = "worker.shutdown", "Shutdown during poll wait");
                        break;
                    }
                }
            }
        }
    }

    /// Drive every pending snapshot once; returns how many reached a
    /// terminal status
    ///
    /// # Errors
    ///
    /// `Cancelled` when the signal fires. Per-snapshot failures are logged
    /// and skipped.
    pub async fn run_once(&self, cancel: &CancelSignal) -> Result<usize> {
        let pending = self.engine.provisioning();
        let mut finished = 0;
        for name in pending {
            if cancel.is_cancelled() {
                return Err(cancelled("worker"));
            }
            match self.provision_with_retry(&name, cancel).await {
                Ok(snapshot) => {
                    info!(
                        op = "worker.provisioned",
                        snapshot = name.as_str(),
                        snapshot_status = snapshot.status.as_str(),
                        "Snapshot provisioned"
                    );
                    finished += 1;
                }
                Err(e) if e.kind() == ExErrorKind::Cancelled => return Err(e),
                // Another caller finished it first
                Err(e) if matches!(e.kind(), ExErrorKind::SnapshotState | ExErrorKind::NotFound) => {
                    info!(op = "worker.skip", snapshot = name.as_str(), error = %e, "Snapshot no longer pending");
                }
                Err(e) => {
                    error!(op = "worker.provision.error", snapshot = name.as_str(), error = %e, "Provisioning failed");
                }
            }
        }
        Ok(finished)
    }

    /// # Errors
    ///
    /// Non-transient errors from the engine, or `Cancelled`.
    pub async fn provision_with_retry(&self, name: &str, cancel: &CancelSignal) -> Result<Snapshot> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let err = match self.engine.provision(name, cancel).await {
                Ok(snapshot) => return Ok(snapshot),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => e,
            };
            if attempt >= self.max_attempts {
                warn!(op = "worker.give_up", snapshot = name, attempts = attempt, error = %err, "Retries exhausted");
                return self.engine.mark_failed(name, &err).await;
            }

            let delay = backoff(self.retry_min, self.retry_max, attempt);
            warn!(
                op = "worker.retry",
                snapshot = name,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Transient provisioning failure"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled("worker")),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
