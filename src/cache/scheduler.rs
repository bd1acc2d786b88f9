//! Background refresh ("cache warming") per domain.
//!
//! Each domain runs one scheduler task. Runs are serialized within a domain:
//! a trigger arriving mid-run is held in a one-slot channel and starts a
//! single follow-up run. Domains refresh independently of each other.

use crate::cache::error::CacheError;
use crate::cache::orchestrator::DomainCache;
use crate::types::Domain;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    Idle,
    /// Waiting for the next tick or trigger
    Scheduled,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunReason {
    Startup,
    Scheduled,
    Manual,
}

/// Outcome of one refresh run.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshReport {
    pub domain: Domain,
    pub reason: RunReason,
    pub keys: usize,
    pub refreshed: usize,
    pub failed: usize,
    pub elapsed: Duration,
    pub finished_at: DateTime<Utc>,
}

/// Control surface of a running scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    domain: Domain,
    triggers: mpsc::Sender<()>,
    state: watch::Receiver<SchedulerState>,
    reports: watch::Receiver<Option<RefreshReport>>,
}

impl SchedulerHandle {
    /// Request an out-of-cycle run. Collapses with a run already pending.
    pub fn trigger(&self) -> Result<(), CacheError> {
        match self.triggers.try_send(()) {
            Ok(()) => {
                debug!("Queued manual {} refresh run", self.domain);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(())) => {
                debug!("Manual {} refresh run already pending", self.domain);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(())) => Err(CacheError::SchedulerUnavailable { domain: self.domain }),
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    pub fn last_report(&self) -> Option<RefreshReport> {
        self.reports.borrow().clone()
    }

    /// Receiver that changes after every completed run.
    pub fn reports(&self) -> watch::Receiver<Option<RefreshReport>> {
        self.reports.clone()
    }
}

pub struct RefreshScheduler {
    cache: Arc<DomainCache>,
    /// Keys refreshed on every run whether hot or not
    pinned: Vec<String>,
    period: Duration,
    triggers: mpsc::Receiver<()>,
    state: watch::Sender<SchedulerState>,
    reports: watch::Sender<Option<RefreshReport>>,
}

impl RefreshScheduler {
    pub fn new(cache: Arc<DomainCache>, pinned: Vec<String>) -> (Self, SchedulerHandle) {
        let domain = cache.domain();
        let period = cache.policy().refresh_period();
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        let (state_tx, state_rx) = watch::channel(SchedulerState::Idle);
        let (report_tx, report_rx) = watch::channel(None);

        let scheduler = Self {
            cache,
            pinned,
            period,
            triggers: trigger_rx,
            state: state_tx,
            reports: report_tx,
        };
        let handle = SchedulerHandle {
            domain,
            triggers: trigger_tx,
            state: state_rx,
            reports: report_rx,
        };
        (scheduler, handle)
    }

    /// Main loop. Ends when every handle has been dropped.
    pub async fn run(mut self) {
        let domain = self.cache.domain();
        info!("{} refresh scheduler is running. Refresh every {:?}.", domain, self.period);

        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick is immediate; only pinned keys need a start-up run
        interval.tick().await;
        if !self.pinned.is_empty() {
            self.run_once(RunReason::Startup).await;
        }

        loop {
            self.state.send_replace(SchedulerState::Scheduled);
            let reason = tokio::select! {
                _ = interval.tick() => RunReason::Scheduled,
                trigger = self.triggers.recv() => match trigger {
                    Some(()) => RunReason::Manual,
                    None => break,
                },
            };
            self.run_once(reason).await;
        }

        self.state.send_replace(SchedulerState::Idle);
        info!("{} refresh scheduler stopped", domain);
    }

    /// Keys for the next run: hot cached keys plus pinned keys.
    pub async fn candidates(&self) -> Vec<String> {
        let mut keys: BTreeSet<String> = self.cache.refresh_candidates().await.into_iter().collect();
        keys.extend(self.pinned.iter().cloned());
        keys.into_iter().collect()
    }

    /// Refresh every candidate key once. Failures are logged and counted;
    /// existing entries stay valid until their own expiry.
    pub async fn run_once(&self, reason: RunReason) -> RefreshReport {
        let domain = self.cache.domain();
        self.state.send_replace(SchedulerState::Running);
        let started = Instant::now();

        let keys = self.candidates().await;
        info!("Starting {:?} {} refresh of {} keys", reason, domain, keys.len());

        let mut refreshed = 0;
        let mut failed = 0;
        for key in &keys {
            match self.cache.refresh(key).await {
                Ok(_) => refreshed += 1,
                Err(e) => {
                    failed += 1;
                    warn!("Background refresh of {} '{}' failed: {}", domain, key, e);
                }
            }
        }

        let report = RefreshReport {
            domain,
            reason,
            keys: keys.len(),
            refreshed,
            failed,
            elapsed: started.elapsed(),
            finished_at: Utc::now(),
        };
        info!(
            "{} refresh complete: {} refreshed, {} failed in {:?}",
            domain, report.refreshed, report.failed, report.elapsed
        );

        self.state.send_replace(SchedulerState::Idle);
        self.reports.send_replace(Some(report.clone()));
        report
    }
}
