//! Abstract contracts for the engine's external collaborators: the
//! persistence gateway, the platform client that reports analytics and
//! performs the live creative swap, and the creative generator.
//!
//! The engine depends only on these traits; implementations live at the
//! edges (a durable store, a real platform API client, a generation
//! service) and are injected as `Arc<dyn _>`.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineResult;
use crate::types::{
    Campaign, OptimizationRun, PerformanceSnapshot, Rotation, Variant, VideoMetrics,
};

/// Durable store for campaigns, rotations, runs, snapshots, and variants.
///
/// All rows are keyed by opaque ids. The engine always updates whole rows
/// it has just read; merge granularity is a gateway concern.
#[async_trait]
pub trait CampaignStore: Send + Sync {
    async fn create_campaign(&self, campaign: Campaign) -> EngineResult<()>;
    async fn get_campaign(&self, id: Uuid) -> EngineResult<Campaign>;
    async fn update_campaign(&self, campaign: Campaign) -> EngineResult<()>;
    /// Campaigns in a loop phase whose next scheduled run has passed.
    async fn list_due_campaigns(&self, now: DateTime<Utc>) -> EngineResult<Vec<Campaign>>;

    async fn insert_rotation(&self, rotation: Rotation) -> EngineResult<()>;
    async fn update_rotation(&self, rotation: Rotation) -> EngineResult<()>;
    async fn active_rotation(&self, campaign_id: Uuid) -> EngineResult<Option<Rotation>>;
    async fn list_rotations(&self, campaign_id: Uuid) -> EngineResult<Vec<Rotation>>;

    async fn insert_run(&self, run: OptimizationRun) -> EngineResult<()>;
    async fn update_run(&self, run: OptimizationRun) -> EngineResult<()>;
    async fn pending_run(&self, campaign_id: Uuid) -> EngineResult<Option<OptimizationRun>>;
    async fn list_runs(&self, campaign_id: Uuid) -> EngineResult<Vec<OptimizationRun>>;

    async fn insert_snapshot(&self, snapshot: PerformanceSnapshot) -> EngineResult<()>;
    async fn list_snapshots(&self, campaign_id: Uuid) -> EngineResult<Vec<PerformanceSnapshot>>;

    async fn insert_variant(&self, variant: Variant) -> EngineResult<()>;
    async fn get_variant(&self, id: Uuid) -> EngineResult<Variant>;
    async fn list_variants(&self, campaign_id: Uuid) -> EngineResult<Vec<Variant>>;
}

/// Descriptive video metadata plus the reference material the generator
/// consumes (frame thumbnails, transcript when available).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoInfo {
    pub title: String,
    pub current_thumbnail_url: String,
    pub frames: Vec<String>,
    pub transcript: Option<String>,
}

/// The external platform that hosts the video: reports cumulative
/// analytics and performs the live thumbnail swap. Every method is
/// invoked through the resilience gate, never directly.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    async fn video_info(&self, video_id: &str) -> EngineResult<VideoInfo>;
    /// Cumulative-to-date metrics over the given reporting range.
    async fn analytics(
        &self,
        video_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> EngineResult<VideoMetrics>;
    async fn apply_creative(&self, video_id: &str, image: Bytes) -> EngineResult<()>;
}

/// Output of the generator's content-analysis pass; fed back into every
/// subsequent variant batch as reference material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentAnalysis {
    pub base_prompt: String,
    pub reference_elements: Vec<String>,
}

/// External creative generator.
#[async_trait]
pub trait VariantGenerator: Send + Sync {
    async fn analyze_content(
        &self,
        campaign_id: Uuid,
        video: &VideoInfo,
    ) -> EngineResult<ContentAnalysis>;

    /// Produce `count` new creative variants and return their ids. The
    /// variants themselves land in the creative store.
    async fn generate_variants(
        &self,
        campaign_id: Uuid,
        base_prompt: &str,
        count: u32,
        reference_elements: &[String],
    ) -> EngineResult<Vec<Uuid>>;
}
