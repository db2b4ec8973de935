//! In-memory campaign store backed by DashMap.
//!
//! Production: replace with a durable gateway behind the same trait.
//! This provides the full `CampaignStore` surface for the demo binary and
//! the test suite.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use thumbpilot_core::contracts::CampaignStore;
use thumbpilot_core::types::{
    Campaign, CampaignStatus, OptimizationRun, PerformanceSnapshot, Rotation, RunStatus, Variant,
};
use thumbpilot_core::{EngineError, EngineResult};

#[derive(Default)]
pub struct InMemoryStore {
    campaigns: DashMap<Uuid, Campaign>,
    rotations: DashMap<Uuid, Rotation>,
    runs: DashMap<Uuid, OptimizationRun>,
    snapshots: DashMap<Uuid, PerformanceSnapshot>,
    variants: DashMap<Uuid, Variant>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CampaignStore for InMemoryStore {
    async fn create_campaign(&self, campaign: Campaign) -> EngineResult<()> {
        self.campaigns.insert(campaign.id, campaign);
        Ok(())
    }

    async fn get_campaign(&self, id: Uuid) -> EngineResult<Campaign> {
        self.campaigns
            .get(&id)
            .map(|r| r.value().clone())
            .ok_or_else(|| EngineError::NotFound(format!("campaign {id}")))
    }

    async fn update_campaign(&self, campaign: Campaign) -> EngineResult<()> {
        if !self.campaigns.contains_key(&campaign.id) {
            return Err(EngineError::NotFound(format!("campaign {}", campaign.id)));
        }
        self.campaigns.insert(campaign.id, campaign);
        Ok(())
    }

    async fn list_due_campaigns(&self, now: DateTime<Utc>) -> EngineResult<Vec<Campaign>> {
        let mut due: Vec<Campaign> = self
            .campaigns
            .iter()
            .filter(|r| {
                let c = r.value();
                matches!(
                    c.status,
                    CampaignStatus::Testing | CampaignStatus::Optimizing
                ) && c.next_run_at.is_some_and(|t| t <= now)
            })
            .map(|r| r.value().clone())
            .collect();
        due.sort_by_key(|c| c.next_run_at);
        Ok(due)
    }

    async fn insert_rotation(&self, rotation: Rotation) -> EngineResult<()> {
        self.rotations.insert(rotation.id, rotation);
        Ok(())
    }

    async fn update_rotation(&self, rotation: Rotation) -> EngineResult<()> {
        if !self.rotations.contains_key(&rotation.id) {
            return Err(EngineError::NotFound(format!("rotation {}", rotation.id)));
        }
        self.rotations.insert(rotation.id, rotation);
        Ok(())
    }

    async fn active_rotation(&self, campaign_id: Uuid) -> EngineResult<Option<Rotation>> {
        Ok(self
            .rotations
            .iter()
            .find(|r| r.value().campaign_id == campaign_id && r.value().is_active)
            .map(|r| r.value().clone()))
    }

    async fn list_rotations(&self, campaign_id: Uuid) -> EngineResult<Vec<Rotation>> {
        let mut rotations: Vec<Rotation> = self
            .rotations
            .iter()
            .filter(|r| r.value().campaign_id == campaign_id)
            .map(|r| r.value().clone())
            .collect();
        rotations.sort_by_key(|r| r.started_at);
        Ok(rotations)
    }

    async fn insert_run(&self, run: OptimizationRun) -> EngineResult<()> {
        self.runs.insert(run.id, run);
        Ok(())
    }

    async fn update_run(&self, run: OptimizationRun) -> EngineResult<()> {
        if !self.runs.contains_key(&run.id) {
            return Err(EngineError::NotFound(format!("run {}", run.id)));
        }
        self.runs.insert(run.id, run);
        Ok(())
    }

    async fn pending_run(&self, campaign_id: Uuid) -> EngineResult<Option<OptimizationRun>> {
        Ok(self
            .runs
            .iter()
            .find(|r| r.value().campaign_id == campaign_id && r.value().status == RunStatus::Pending)
            .map(|r| r.value().clone()))
    }

    async fn list_runs(&self, campaign_id: Uuid) -> EngineResult<Vec<OptimizationRun>> {
        let mut runs: Vec<OptimizationRun> = self
            .runs
            .iter()
            .filter(|r| r.value().campaign_id == campaign_id)
            .map(|r| r.value().clone())
            .collect();
        runs.sort_by_key(|r| r.iteration);
        Ok(runs)
    }

    async fn insert_snapshot(&self, snapshot: PerformanceSnapshot) -> EngineResult<()> {
        self.snapshots.insert(snapshot.id, snapshot);
        Ok(())
    }

    async fn list_snapshots(&self, campaign_id: Uuid) -> EngineResult<Vec<PerformanceSnapshot>> {
        let mut snapshots: Vec<PerformanceSnapshot> = self
            .snapshots
            .iter()
            .filter(|r| r.value().campaign_id == campaign_id)
            .map(|r| r.value().clone())
            .collect();
        snapshots.sort_by_key(|s| s.captured_at);
        Ok(snapshots)
    }

    async fn insert_variant(&self, variant: Variant) -> EngineResult<()> {
        self.variants.insert(variant.id, variant);
        Ok(())
    }

    async fn get_variant(&self, id: Uuid) -> EngineResult<Variant> {
        self.variants
            .get(&id)
            .map(|r| r.value().clone())
            .ok_or_else(|| EngineError::NotFound(format!("variant {id}")))
    }

    async fn list_variants(&self, campaign_id: Uuid) -> EngineResult<Vec<Variant>> {
        let mut variants: Vec<Variant> = self
            .variants
            .iter()
            .filter(|r| r.value().campaign_id == campaign_id)
            .map(|r| r.value().clone())
            .collect();
        variants.sort_by_key(|v| v.created_at);
        Ok(variants)
    }
}
