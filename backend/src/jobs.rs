//! Background scans
//!
//! The expired-batch sweep and the transfer scan run periodically, and on
//! demand through the HTTP API. Every run registers a cancel token so that
//! `POST /jobs/:kind/cancel` can stop it between products.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::task::JoinHandle;

use crate::services::{CancelToken, DisposalWorkflow, TransferRecommender};
use crate::services::transfer::TransferScope;
use crate::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    DisposalSweep,
    TransferScan,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::DisposalSweep => "disposal-sweep",
            JobKind::TransferScan => "transfer-scan",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "disposal-sweep" => Some(JobKind::DisposalSweep),
            "transfer-scan" => Some(JobKind::TransferScan),
            _ => None,
        }
    }
}

/// Cancel tokens of the scans currently running, by kind
#[derive(Debug, Default)]
pub struct JobRegistry {
    running: Mutex<HashMap<JobKind, Vec<CancelToken>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new run. The run is unregistered when the guard drops.
    pub fn begin(self: &Arc<Self>, kind: JobKind) -> JobGuard {
        let token = CancelToken::new();
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push(token.clone());
        JobGuard {
            registry: Arc::clone(self),
            kind,
            token,
        }
    }

    /// Cancel every running scan of `kind`. Returns how many were signalled.
    pub fn cancel(&self, kind: JobKind) -> usize {
        let running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        let tokens = running.get(&kind).map(Vec::as_slice).unwrap_or_default();
        for token in tokens {
            token.cancel();
        }
        tokens.len()
    }

    pub fn running(&self, kind: JobKind) -> usize {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .map_or(0, Vec::len)
    }

    fn finish(&self, kind: JobKind, token: &CancelToken) {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(tokens) = running.get_mut(&kind) {
            tokens.retain(|t| !t.same_run(token));
        }
    }
}

/// Registration of one running scan
pub struct JobGuard {
    registry: Arc<JobRegistry>,
    kind: JobKind,
    token: CancelToken,
}

impl JobGuard {
    pub fn token(&self) -> &CancelToken {
        &self.token
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        self.registry.finish(self.kind, &self.token);
    }
}

/// Spawn the periodic scans enabled in configuration. They stop when
/// `shutdown` is cancelled.
pub fn spawn_workers(state: AppState, shutdown: CancelToken) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();
    let jobs = &state.config.jobs;

    if jobs.disposal_sweep_enabled {
        let period = Duration::from_secs(jobs.disposal_sweep_interval_secs.max(1));
        handles.push(spawn_periodic(
            state.clone(),
            shutdown.clone(),
            JobKind::DisposalSweep,
            period,
        ));
    }
    if jobs.transfer_scan_enabled {
        let period = Duration::from_secs(jobs.transfer_scan_interval_secs.max(1));
        handles.push(spawn_periodic(
            state.clone(),
            shutdown.clone(),
            JobKind::TransferScan,
            period,
        ));
    }

    handles
}

fn spawn_periodic(
    state: AppState,
    shutdown: CancelToken,
    kind: JobKind,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("{} worker started (every {:?})", kind.as_str(), period);

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("{} worker received shutdown signal", kind.as_str());
                    break;
                }
                _ = interval.tick() => {
                    run_once(&state, kind).await;
                }
            }
        }

        tracing::info!("{} worker stopped", kind.as_str());
    })
}

/// One scheduled run. Failures are logged; the next tick tries again.
pub async fn run_once(state: &AppState, kind: JobKind) {
    let guard = state.jobs.begin(kind);
    let today = Utc::now().date_naive();

    match kind {
        JobKind::DisposalSweep => {
            let workflow = DisposalWorkflow::new(state.repo.clone(), &state.config.stock);
            match workflow.mark_expired_candidates(today, guard.token()).await {
                Ok(candidates) if candidates.is_empty() => {
                    tracing::debug!("Disposal sweep found no expired batches");
                }
                Ok(candidates) => {
                    let at_risk: Decimal = candidates.iter().map(|c| c.value_at_risk).sum();
                    tracing::info!(
                        "Disposal sweep: {} batches pending disposal, {} at risk",
                        candidates.len(),
                        at_risk
                    );
                }
                Err(e) => tracing::warn!("Disposal sweep failed: {}", e),
            }
        }
        JobKind::TransferScan => {
            let recommender = TransferRecommender::new(
                state.repo.clone(),
                state.catalog.clone(),
                &state.config.stock,
                state.config.transfer.policy(),
            );
            match recommender
                .recommend(&TransferScope::default(), today, guard.token())
                .await
            {
                Ok(candidates) => {
                    let net: Decimal = candidates.iter().map(|c| c.net_benefit).sum();
                    tracing::info!(
                        "Transfer scan: {} recommendations, {} total net benefit",
                        candidates.len(),
                        net
                    );
                }
                Err(e) => tracing::warn!("Transfer scan failed: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_kind_parses_route_names() {
        for kind in [JobKind::DisposalSweep, JobKind::TransferScan] {
            assert_eq!(JobKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(JobKind::parse("reindex"), None);
    }

    #[test]
    fn guard_unregisters_and_cancel_reaches_running_scans() {
        let registry = Arc::new(JobRegistry::new());
        let guard = registry.begin(JobKind::TransferScan);
        assert_eq!(registry.running(JobKind::TransferScan), 1);

        assert_eq!(registry.cancel(JobKind::TransferScan), 1);
        assert!(guard.token().is_cancelled());
        assert_eq!(registry.cancel(JobKind::DisposalSweep), 0);

        drop(guard);
        assert_eq!(registry.running(JobKind::TransferScan), 0);
    }
}
