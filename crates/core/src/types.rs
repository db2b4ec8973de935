use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};

/// Lifecycle of a thumbnail-optimization campaign.
///
/// Linear pipeline with an iteration loop at the end and a failure escape
/// from every non-terminal state. Transitions go through
/// [`Campaign::transition`], which rejects anything not in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Pending,
    Analyzing,
    Generating,
    Testing,
    Optimizing,
    Settled,
    Failed,
}

impl CampaignStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, CampaignStatus::Settled | CampaignStatus::Failed)
    }

    /// Valid forward transitions. `Failed` is reachable from any
    /// non-terminal state; everything else advances along the pipeline.
    pub fn can_transition(self, to: CampaignStatus) -> bool {
        use CampaignStatus::*;
        if to == Failed {
            return !self.is_terminal();
        }
        matches!(
            (self, to),
            (Pending, Analyzing)
                | (Analyzing, Generating)
                | (Generating, Testing)
                | (Testing, Optimizing)
                | (Testing, Settled)
                | (Optimizing, Optimizing)
                | (Optimizing, Settled)
        )
    }
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CampaignStatus::Pending => "pending",
            CampaignStatus::Analyzing => "analyzing",
            CampaignStatus::Generating => "generating",
            CampaignStatus::Testing => "testing",
            CampaignStatus::Optimizing => "optimizing",
            CampaignStatus::Settled => "settled",
            CampaignStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One end-to-end optimization job for a single video.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub user_id: String,
    pub video_id: String,
    pub status: CampaignStatus,
    pub iteration: u32,
    pub max_iterations: u32,
    pub iterations_per_day: u32,
    pub next_run_at: Option<DateTime<Utc>>,
    pub winner_variant_id: Option<Uuid>,
    pub final_velocity: Option<f64>,
    pub improvement_pct: Option<f64>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    pub fn new(user_id: impl Into<String>, video_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            video_id: video_id.into(),
            status: CampaignStatus::Pending,
            iteration: 0,
            max_iterations: 10,
            iterations_per_day: 2,
            next_run_at: None,
            winner_variant_id: None,
            final_velocity: None,
            improvement_pct: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Advance the status, rejecting transitions outside the table.
    pub fn transition(&mut self, to: CampaignStatus) -> EngineResult<()> {
        if !self.status.can_transition(to) {
            return Err(EngineError::Validation(format!(
                "illegal campaign transition {} -> {} for {}",
                self.status, to, self.id
            )));
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Cumulative-to-date metrics as reported by the external platform.
/// Always a running total, never a delta.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoMetrics {
    pub views: u64,
    pub watch_time_minutes: f64,
    pub average_view_duration_secs: f64,
}

/// One exposure window: the period during which exactly one creative
/// variant was live on the video. `variant_id = None` means the original
/// (baseline) thumbnail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rotation {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub run_id: Option<Uuid>,
    pub variant_id: Option<Uuid>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    /// Cumulative metrics captured at window start.
    pub baseline: VideoMetrics,
    /// Cumulative metrics captured at window end; populated on close.
    pub final_metrics: Option<VideoMetrics>,
    pub views_delta: u64,
    pub watch_minutes_delta: f64,
    /// Views per hour over the window; 0 when the window was too short.
    pub view_velocity: f64,
    /// Watch-minutes per hour over the window.
    pub watch_velocity: f64,
    pub exposure_secs: i64,
}

impl Rotation {
    pub fn open(
        campaign_id: Uuid,
        run_id: Option<Uuid>,
        variant_id: Option<Uuid>,
        baseline: VideoMetrics,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            campaign_id,
            run_id,
            variant_id,
            started_at,
            ended_at: None,
            is_active: true,
            baseline,
            final_metrics: None,
            views_delta: 0,
            watch_minutes_delta: 0.0,
            view_velocity: 0.0,
            watch_velocity: 0.0,
            exposure_secs: 0,
        }
    }
}

/// Immutable point-in-time record of aggregate metrics, kept for
/// timeline display. Best-effort; never consulted for settle decisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub metrics: VideoMetrics,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// What an iteration ultimately did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunAction {
    Settled,
    GeneratedVariations,
}

/// Audit record for one pass of the testing/optimizing loop.
/// Created when the iteration starts, updated when it ends, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationRun {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub iteration: u32,
    pub status: RunStatus,
    pub variants_generated: u32,
    pub best_velocity_before: Option<f64>,
    pub best_velocity_after: Option<f64>,
    pub velocity_delta: Option<f64>,
    pub action: Option<RunAction>,
    pub notes: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl OptimizationRun {
    pub fn new(campaign_id: Uuid, iteration: u32, status: RunStatus) -> Self {
        Self {
            id: Uuid::new_v4(),
            campaign_id,
            iteration,
            status,
            variants_generated: 0,
            best_velocity_before: None,
            best_velocity_after: None,
            velocity_delta: None,
            action: None,
            notes: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }
}

/// A creative variant. The engine treats the payload as opaque; lifecycle
/// beyond referencing it from rotations and runs belongs to the creative
/// store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variant {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub image: Bytes,
    pub created_at: DateTime<Utc>,
}
