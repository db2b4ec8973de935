//! Periodic sweep — finds campaigns due for their next iteration and
//! runs them sequentially.
//!
//! Overlap is prevented by an atomic in-progress guard: a sweep that is
//! still running when the next timer fires is skipped, not queued. The
//! guard is process-local; multi-instance deployments need an external
//! lease over the due-campaign set.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use thumbpilot_core::contracts::CampaignStore;
use thumbpilot_core::EngineResult;

use crate::orchestrator::Orchestrator;

pub struct Scheduler {
    orchestrator: Arc<Orchestrator>,
    store: Arc<dyn CampaignStore>,
    sweep_in_progress: AtomicBool,
    handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(orchestrator: Arc<Orchestrator>, store: Arc<dyn CampaignStore>) -> Self {
        Self {
            orchestrator,
            store,
            sweep_in_progress: AtomicBool::new(false),
            handle: parking_lot::Mutex::new(None),
        }
    }

    /// Start the periodic sweep loop. A second call while running is a
    /// logged no-op. Intervals under one minute are clamped up: a
    /// zero-period `tokio::time::interval` panics.
    pub fn start(self: &Arc<Self>, interval_minutes: u64) {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            warn!("scheduler already running");
            return;
        }
        let interval_minutes = interval_minutes.max(1);
        info!(interval_minutes, "starting scheduler");
        let scheduler = self.clone();
        *handle = Some(tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(interval_minutes * 60));
            // The first tick fires immediately; campaigns not yet due are
            // filtered by the store query anyway.
            loop {
                interval.tick().await;
                if let Err(err) = scheduler.sweep().await {
                    warn!(error = %err, "sweep failed");
                }
            }
        }));
    }

    pub fn stop(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
            info!("scheduler stopped");
        }
    }

    /// One sweep: run an iteration for every due campaign, sequentially,
    /// swallowing per-campaign errors so one failing campaign cannot
    /// block the rest. Returns the number of iterations that succeeded.
    pub async fn sweep(&self) -> EngineResult<u32> {
        if self
            .sweep_in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!("previous sweep still in progress, skipping");
            return Ok(0);
        }

        let result = self.sweep_inner().await;
        self.sweep_in_progress.store(false, Ordering::SeqCst);
        result
    }

    async fn sweep_inner(&self) -> EngineResult<u32> {
        let due = self.store.list_due_campaigns(Utc::now()).await?;
        if due.is_empty() {
            return Ok(0);
        }
        info!(count = due.len(), "sweeping due campaigns");
        metrics::counter!("scheduler.sweeps").increment(1);

        let mut completed = 0u32;
        for campaign in due {
            match self.orchestrator.run_iteration(campaign.id).await {
                Ok(()) => completed += 1,
                Err(err) => {
                    warn!(campaign_id = %campaign.id, error = %err, "iteration failed, will retry next sweep");
                }
            }
        }
        Ok(completed)
    }

    /// On-demand iteration for a single campaign, outside the schedule.
    pub async fn trigger(&self, campaign_id: Uuid) -> EngineResult<()> {
        info!(campaign_id = %campaign_id, "manual trigger");
        self.orchestrator.run_iteration(campaign_id).await
    }
}
