//! Campaign orchestration — the only component that mutates campaign
//! state and triggers side effects against the live video.
//!
//! Drives the `pending -> analyzing -> generating -> testing ->
//! optimizing (loop) -> settled` pipeline, with `failed` reachable from
//! any non-terminal state. External calls go through one
//! [`DependencyGate`] per dependency.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use thumbpilot_core::config::EngineConfig;
use thumbpilot_core::contracts::{CampaignStore, ContentAnalysis, PlatformClient, VariantGenerator};
use thumbpilot_core::event_bus::{Notification, NotificationSink};
use thumbpilot_core::types::{
    Campaign, CampaignStatus, OptimizationRun, PerformanceSnapshot, RunAction, RunStatus,
    VideoMetrics,
};
use thumbpilot_core::{EngineError, EngineResult};
use thumbpilot_resilience::DependencyGate;

use crate::confidence::{evaluate_settle, SettleDecision};
use crate::rotation::RotationTracker;

pub struct Orchestrator {
    store: Arc<dyn CampaignStore>,
    platform: Arc<dyn PlatformClient>,
    generator: Arc<dyn VariantGenerator>,
    sink: Arc<dyn NotificationSink>,
    platform_gate: DependencyGate,
    generator_gate: DependencyGate,
    tracker: RotationTracker,
    config: EngineConfig,
    /// Content analyses by campaign, re-derived lazily after a restart.
    analyses: DashMap<Uuid, ContentAnalysis>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn CampaignStore>,
        platform: Arc<dyn PlatformClient>,
        generator: Arc<dyn VariantGenerator>,
        sink: Arc<dyn NotificationSink>,
        config: EngineConfig,
    ) -> Self {
        let tracker = RotationTracker::new(store.clone(), config.rotation.clone());
        Self {
            platform_gate: DependencyGate::from_config("platform", &config),
            generator_gate: DependencyGate::from_config("generator", &config),
            store,
            platform,
            generator,
            sink,
            tracker,
            config,
            analyses: DashMap::new(),
        }
    }

    pub fn tracker(&self) -> &RotationTracker {
        &self.tracker
    }

    // ─── Creation ───────────────────────────────────────────────────────

    /// Persist a new campaign in `pending`. The creation pipeline runs
    /// separately via [`Orchestrator::spawn_creation_pipeline`].
    pub async fn create_campaign(
        &self,
        user_id: &str,
        video_id: &str,
    ) -> EngineResult<Campaign> {
        if video_id.trim().is_empty() {
            return Err(EngineError::Validation("empty video id".into()));
        }
        let mut campaign = Campaign::new(user_id, video_id.trim());
        campaign.max_iterations = self.config.optimization.default_max_iterations;
        campaign.iterations_per_day = self.config.optimization.default_iterations_per_day;
        info!(campaign_id = %campaign.id, video_id, "creating campaign");
        self.store.create_campaign(campaign.clone()).await?;
        Ok(campaign)
    }

    /// Kick off the creation pipeline as a tracked task. Failures land in
    /// campaign state (`failed` + message), not just the log.
    pub fn spawn_creation_pipeline(self: &Arc<Self>, campaign_id: Uuid) -> JoinHandle<()> {
        let orchestrator = self.clone();
        tokio::spawn(async move {
            if let Err(err) = orchestrator.run_creation_pipeline(campaign_id).await {
                error!(campaign_id = %campaign_id, error = %err, "creation pipeline failed");
                orchestrator.fail_campaign(campaign_id, &err.to_string()).await;
            }
        })
    }

    /// The full creation pipeline: resolve the video, analyze content,
    /// generate the initial variant batch, seed the baseline rotation,
    /// and schedule the first iteration. Any stage failure is terminal
    /// for the campaign.
    pub async fn run_creation_pipeline(&self, campaign_id: Uuid) -> EngineResult<()> {
        let mut campaign = self.store.get_campaign(campaign_id).await?;
        if campaign.status != CampaignStatus::Pending {
            return Err(EngineError::Validation(format!(
                "creation pipeline requires pending status, found {}",
                campaign.status
            )));
        }

        let video_id = campaign.video_id.clone();
        let video = self
            .platform_gate
            .run("video_info", || self.platform.video_info(&video_id))
            .await?;

        campaign.transition(CampaignStatus::Analyzing)?;
        self.store.update_campaign(campaign.clone()).await?;
        self.notify_status(&campaign, Some(video.title.clone()));

        let analysis = self
            .generator_gate
            .run("analyze_content", || {
                self.generator.analyze_content(campaign_id, &video)
            })
            .await?;
        self.analyses.insert(campaign_id, analysis.clone());

        campaign.transition(CampaignStatus::Generating)?;
        self.store.update_campaign(campaign.clone()).await?;
        self.notify_status(&campaign, None);

        let batch = self.config.optimization.variants_per_batch;
        let generated = self
            .generator_gate
            .run("generate_variants", || {
                self.generator.generate_variants(
                    campaign_id,
                    &analysis.base_prompt,
                    batch,
                    &analysis.reference_elements,
                )
            })
            .await?;
        info!(campaign_id = %campaign_id, count = generated.len(), "generated initial variants");

        // Best-effort baseline: a placeholder zero-point still lets the
        // statistics anchor when the platform is not yet authorized.
        let baseline = match self.fetch_cumulative_metrics(&video_id).await {
            Ok(metrics) => metrics,
            Err(err) => {
                warn!(campaign_id = %campaign_id, error = %err, "baseline analytics unavailable, using placeholder");
                VideoMetrics::default()
            }
        };
        self.tracker.start_initial(campaign_id, baseline).await?;
        self.take_snapshot(&campaign).await;

        campaign.transition(CampaignStatus::Testing)?;
        campaign.next_run_at = Some(Utc::now());
        self.store.update_campaign(campaign.clone()).await?;
        self.notify_status(&campaign, None);

        let run = OptimizationRun::new(campaign_id, 1, RunStatus::Pending);
        self.store.insert_run(run.clone()).await?;
        self.sink.emit(Notification::OptimizationRun { run });
        Ok(())
    }

    // ─── Iteration loop ─────────────────────────────────────────────────

    /// One pass of the testing/optimizing loop: measure, decide, maybe
    /// swap, maybe generate more variants. Errors mark the run failed but
    /// leave the campaign in its loop state for the next sweep.
    pub async fn run_iteration(&self, campaign_id: Uuid) -> EngineResult<()> {
        let campaign = self.store.get_campaign(campaign_id).await?;
        if !matches!(
            campaign.status,
            CampaignStatus::Testing | CampaignStatus::Optimizing
        ) {
            return Err(EngineError::Validation(format!(
                "campaign {} is {}, not in the iteration loop",
                campaign_id, campaign.status
            )));
        }
        metrics::counter!("engine.iterations").increment(1);

        let iteration = campaign.iteration + 1;
        let mut run = match self.store.pending_run(campaign_id).await? {
            Some(mut pending) => {
                pending.status = RunStatus::Processing;
                self.store.update_run(pending.clone()).await?;
                pending
            }
            None => {
                let run = OptimizationRun::new(campaign_id, iteration, RunStatus::Processing);
                self.store.insert_run(run.clone()).await?;
                run
            }
        };

        match self.iteration_body(campaign, &mut run).await {
            Ok(()) => Ok(()),
            Err(err) => {
                run.status = RunStatus::Failed;
                run.notes = Some(err.to_string());
                run.finished_at = Some(Utc::now());
                if let Err(store_err) = self.store.update_run(run.clone()).await {
                    warn!(run_id = %run.id, error = %store_err, "failed to persist failed run");
                }
                self.sink.emit(Notification::OptimizationRun { run });
                metrics::counter!("engine.iteration_failures").increment(1);
                Err(err)
            }
        }
    }

    async fn iteration_body(
        &self,
        mut campaign: Campaign,
        run: &mut OptimizationRun,
    ) -> EngineResult<()> {
        self.take_snapshot(&campaign).await;

        let performances = self.tracker.variant_velocities(campaign.id).await?;
        run.best_velocity_before = performances.first().map(|p| p.avg_velocity);

        let decision = evaluate_settle(&campaign, &performances, &self.config.confidence);
        info!(
            campaign_id = %campaign.id,
            iteration = run.iteration,
            confidence = decision.outcome.confidence,
            relative_improvement = decision.outcome.relative_improvement,
            should_settle = decision.should_settle,
            reason = ?decision.reason,
            "evaluated settle criteria"
        );

        if decision.should_settle {
            self.settle(&mut campaign, run, &decision).await
        } else {
            self.continue_iteration(&mut campaign, run, &decision).await
        }
    }

    async fn continue_iteration(
        &self,
        campaign: &mut Campaign,
        run: &mut OptimizationRun,
        decision: &SettleDecision,
    ) -> EngineResult<()> {
        // Put the current best variant live. A failed swap is recovered
        // locally: the running exposure window keeps accruing for the
        // still-live creative, the rest of the iteration proceeds, and
        // the swap is re-attempted next iteration.
        let mut swap_failure: Option<String> = None;
        if let Some(best_variant) = self.swap_candidate(campaign, decision).await? {
            match self.apply_variant(campaign, Some(run.id), best_variant).await {
                Ok(()) => {
                    info!(campaign_id = %campaign.id, variant_id = %best_variant, "applied best variant");
                }
                Err(err) => {
                    warn!(campaign_id = %campaign.id, variant_id = %best_variant, error = %err, "swap failed, exposure window preserved");
                    swap_failure = Some(format!("swap failed: {err}"));
                    metrics::counter!("engine.swap_failures").increment(1);
                }
            }
        }

        let analysis = self.analysis_for(campaign).await?;
        let prompt = format!("{} (iteration {})", analysis.base_prompt, run.iteration);
        let generated = self
            .generator_gate
            .run("generate_variants", || {
                self.generator.generate_variants(
                    campaign.id,
                    &prompt,
                    self.config.optimization.variants_per_batch,
                    &analysis.reference_elements,
                )
            })
            .await?;
        run.variants_generated = generated.len() as u32;

        campaign.iteration = run.iteration;
        campaign.transition(CampaignStatus::Optimizing)?;
        campaign.next_run_at = Some(next_run_time(Utc::now(), campaign.iterations_per_day));
        self.store.update_campaign(campaign.clone()).await?;

        let after = self.tracker.variant_velocities(campaign.id).await?;
        run.best_velocity_after = after.first().map(|p| p.avg_velocity);
        run.velocity_delta = match (run.best_velocity_before, run.best_velocity_after) {
            (Some(before), Some(after)) => Some(after - before),
            _ => None,
        };
        // The audit row reflects the swap outcome even though the
        // iteration itself carried on.
        match swap_failure {
            Some(message) => {
                run.status = RunStatus::Failed;
                run.notes = Some(message);
            }
            None => run.status = RunStatus::Completed,
        }
        run.action = Some(RunAction::GeneratedVariations);
        run.finished_at = Some(Utc::now());
        self.store.update_run(run.clone()).await?;

        self.sink.emit(Notification::OptimizationRun { run: run.clone() });
        self.sink.emit(Notification::CampaignUpdate {
            campaign_id: campaign.id,
            fields: serde_json::json!({
                "status": campaign.status,
                "iteration": campaign.iteration,
                "next_run_at": campaign.next_run_at,
            }),
        });
        Ok(())
    }

    async fn settle(
        &self,
        campaign: &mut Campaign,
        run: &mut OptimizationRun,
        decision: &SettleDecision,
    ) -> EngineResult<()> {
        let winner = decision.outcome.best.clone();
        let winner_variant = winner.as_ref().and_then(|p| p.variant_id);

        // Apply the winner one last time if it is not already live. A
        // failure here propagates: "settled but not actually live" is the
        // one state the swap saga must never commit.
        if let Some(variant_id) = winner_variant {
            let live = self.live_variant(campaign.id).await?;
            if live != Some(variant_id) {
                self.apply_variant(campaign, Some(run.id), variant_id).await?;
            }
        }

        let final_velocity = winner.as_ref().map(|p| p.avg_velocity);
        let baseline_velocity = self
            .tracker
            .variant_velocities(campaign.id)
            .await?
            .into_iter()
            .find(|p| p.variant_id.is_none())
            .map(|p| p.avg_velocity);
        let improvement_pct = match (final_velocity, baseline_velocity) {
            (Some(f), Some(b)) if b > 0.0 => Some((f - b) / b * 100.0),
            _ => None,
        };

        campaign.winner_variant_id = winner_variant;
        campaign.final_velocity = final_velocity;
        campaign.improvement_pct = improvement_pct;
        campaign.next_run_at = None;
        campaign.transition(CampaignStatus::Settled)?;
        self.store.update_campaign(campaign.clone()).await?;

        run.status = RunStatus::Completed;
        run.action = Some(RunAction::Settled);
        run.best_velocity_after = final_velocity;
        run.finished_at = Some(Utc::now());
        self.store.update_run(run.clone()).await?;

        info!(
            campaign_id = %campaign.id,
            winner = ?winner_variant,
            confidence = decision.outcome.confidence,
            improvement_pct = ?improvement_pct,
            "campaign settled"
        );
        metrics::counter!("engine.settled").increment(1);
        self.sink.emit(Notification::OptimizationRun { run: run.clone() });
        self.notify_status(
            campaign,
            Some(format!("confidence {:.3}", decision.outcome.confidence)),
        );
        Ok(())
    }

    // ─── Swap saga ──────────────────────────────────────────────────────

    /// Apply a variant to the live video. Ordering is the correctness
    /// invariant: pre-swap metrics are read first, the upload happens
    /// second, and only a confirmed upload closes the active rotation and
    /// opens the new one — both anchored to the same pre-swap reading, so
    /// the window boundary coincides with the actual swap moment.
    pub async fn apply_variant(
        &self,
        campaign: &Campaign,
        run_id: Option<Uuid>,
        variant_id: Uuid,
    ) -> EngineResult<()> {
        let pre_swap = self.fetch_cumulative_metrics(&campaign.video_id).await?;

        let variant = self.store.get_variant(variant_id).await?;
        let video_id = campaign.video_id.clone();
        self.platform_gate
            .run("apply_creative", || {
                self.platform.apply_creative(&video_id, variant.image.clone())
            })
            .await?;

        self.tracker
            .close_active(campaign.id, pre_swap, Utc::now())
            .await?;
        self.tracker
            .begin(campaign.id, run_id, Some(variant_id), pre_swap)
            .await?;
        Ok(())
    }

    /// The best variant worth swapping to, if it differs from what is
    /// currently live.
    async fn swap_candidate(
        &self,
        campaign: &Campaign,
        decision: &SettleDecision,
    ) -> EngineResult<Option<Uuid>> {
        let Some(best) = decision.outcome.best.as_ref().and_then(|p| p.variant_id) else {
            // No closed windows yet: rotate the first untested variant in.
            let variants = self.store.list_variants(campaign.id).await?;
            let rotations = self.store.list_rotations(campaign.id).await?;
            let tested: Vec<Uuid> = rotations.iter().filter_map(|r| r.variant_id).collect();
            return Ok(variants
                .iter()
                .map(|v| v.id)
                .find(|id| !tested.contains(id)));
        };
        let live = self.live_variant(campaign.id).await?;
        Ok(if live == Some(best) { None } else { Some(best) })
    }

    async fn live_variant(&self, campaign_id: Uuid) -> EngineResult<Option<Uuid>> {
        Ok(self
            .store
            .active_rotation(campaign_id)
            .await?
            .and_then(|r| r.variant_id))
    }

    // ─── Support ────────────────────────────────────────────────────────

    async fn fetch_cumulative_metrics(&self, video_id: &str) -> EngineResult<VideoMetrics> {
        let end = Utc::now();
        let start = DateTime::<Utc>::UNIX_EPOCH;
        self.platform_gate
            .run("analytics", || self.platform.analytics(video_id, start, end))
            .await
    }

    /// Best-effort snapshot for the timeline. Losing one data point must
    /// not halt the loop, so failures are logged and swallowed.
    async fn take_snapshot(&self, campaign: &Campaign) {
        let metrics = match self.fetch_cumulative_metrics(&campaign.video_id).await {
            Ok(metrics) => metrics,
            Err(err) => {
                warn!(campaign_id = %campaign.id, error = %err, "snapshot skipped");
                return;
            }
        };
        let variant_id = match self.live_variant(campaign.id).await {
            Ok(v) => v,
            Err(_) => None,
        };
        let snapshot = PerformanceSnapshot {
            id: Uuid::new_v4(),
            campaign_id: campaign.id,
            variant_id,
            metrics,
            captured_at: Utc::now(),
        };
        if let Err(err) = self.store.insert_snapshot(snapshot.clone()).await {
            warn!(campaign_id = %campaign.id, error = %err, "snapshot not persisted");
            return;
        }
        self.sink.emit(Notification::PerformanceSnapshot { snapshot });
    }

    async fn analysis_for(&self, campaign: &Campaign) -> EngineResult<ContentAnalysis> {
        if let Some(analysis) = self.analyses.get(&campaign.id) {
            return Ok(analysis.clone());
        }
        // Re-derive after a restart: analyses are not persisted.
        let video_id = campaign.video_id.clone();
        let video = self
            .platform_gate
            .run("video_info", || self.platform.video_info(&video_id))
            .await?;
        let analysis = self
            .generator_gate
            .run("analyze_content", || {
                self.generator.analyze_content(campaign.id, &video)
            })
            .await?;
        self.analyses.insert(campaign.id, analysis.clone());
        Ok(analysis)
    }

    /// Terminal failure: record the message and notify, tolerating an
    /// already-terminal campaign.
    pub async fn fail_campaign(&self, campaign_id: Uuid, message: &str) {
        let Ok(mut campaign) = self.store.get_campaign(campaign_id).await else {
            return;
        };
        if campaign.transition(CampaignStatus::Failed).is_err() {
            return;
        }
        campaign.error = Some(message.to_string());
        if let Err(err) = self.store.update_campaign(campaign.clone()).await {
            warn!(campaign_id = %campaign_id, error = %err, "failed to persist campaign failure");
            return;
        }
        self.notify_status(&campaign, Some(message.to_string()));
    }

    fn notify_status(&self, campaign: &Campaign, detail: Option<String>) {
        self.sink.emit(Notification::StatusChange {
            campaign_id: campaign.id,
            status: campaign.status,
            detail,
        });
    }
}

/// `24 / iterations_per_day` hours from now; a zero target degrades to
/// one iteration per day.
fn next_run_time(now: DateTime<Utc>, iterations_per_day: u32) -> DateTime<Utc> {
    let per_day = iterations_per_day.max(1) as i64;
    now + Duration::seconds(24 * 3600 / per_day)
}
