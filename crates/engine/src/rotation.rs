//! Rotation tracking — opens and closes time-bounded exposure windows per
//! campaign and turns raw cumulative counters into comparable per-variant
//! rates.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use thumbpilot_core::config::RotationConfig;
use thumbpilot_core::contracts::CampaignStore;
use thumbpilot_core::types::{Rotation, VideoMetrics};
use thumbpilot_core::EngineResult;

/// Closed-rotation aggregate for one variant: exposure-weighted average
/// velocity plus the sample counts the evaluator's eligibility gates need.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantPerformance {
    /// `None` is the original/baseline thumbnail.
    pub variant_id: Option<Uuid>,
    pub rotations: u32,
    pub exposure_hours: f64,
    pub avg_velocity: f64,
}

#[derive(Clone)]
pub struct RotationTracker {
    store: Arc<dyn CampaignStore>,
    config: RotationConfig,
}

impl RotationTracker {
    pub fn new(store: Arc<dyn CampaignStore>, config: RotationConfig) -> Self {
        Self { store, config }
    }

    /// Seed the baseline exposure window for a campaign. Idempotent: if an
    /// active rotation already exists it is returned untouched.
    pub async fn start_initial(
        &self,
        campaign_id: Uuid,
        baseline: VideoMetrics,
    ) -> EngineResult<Rotation> {
        if let Some(active) = self.store.active_rotation(campaign_id).await? {
            debug!(campaign_id = %campaign_id, rotation_id = %active.id, "active rotation exists, skipping seed");
            return Ok(active);
        }
        let rotation = Rotation::open(campaign_id, None, None, baseline, Utc::now());
        info!(
            campaign_id = %campaign_id,
            rotation_id = %rotation.id,
            baseline_views = baseline.views,
            "seeded baseline rotation"
        );
        self.store.insert_rotation(rotation.clone()).await?;
        Ok(rotation)
    }

    /// Close the active exposure window against the given cumulative
    /// metrics. Deltas are clamped at zero (reporting lag can make raw
    /// counters regress between polls), and velocities are only computed
    /// for windows of at least `min_exposure_minutes`; shorter windows
    /// report zero. Returns `None` when no rotation is active.
    pub async fn close_active(
        &self,
        campaign_id: Uuid,
        current: VideoMetrics,
        now: DateTime<Utc>,
    ) -> EngineResult<Option<Rotation>> {
        let Some(mut rotation) = self.store.active_rotation(campaign_id).await? else {
            return Ok(None);
        };

        let exposure_secs = (now - rotation.started_at).num_seconds().max(0);
        let exposure_hours = exposure_secs as f64 / 3600.0;

        let views_delta = current.views.saturating_sub(rotation.baseline.views);
        let watch_minutes_delta =
            (current.watch_time_minutes - rotation.baseline.watch_time_minutes).max(0.0);

        let long_enough = exposure_secs >= self.config.min_exposure_minutes * 60;
        let (view_velocity, watch_velocity) = if long_enough && exposure_hours > 0.0 {
            (
                views_delta as f64 / exposure_hours,
                watch_minutes_delta / exposure_hours,
            )
        } else {
            (0.0, 0.0)
        };

        rotation.ended_at = Some(now);
        rotation.is_active = false;
        rotation.final_metrics = Some(current);
        rotation.views_delta = views_delta;
        rotation.watch_minutes_delta = watch_minutes_delta;
        rotation.view_velocity = view_velocity;
        rotation.watch_velocity = watch_velocity;
        rotation.exposure_secs = exposure_secs;

        info!(
            campaign_id = %campaign_id,
            rotation_id = %rotation.id,
            views_delta,
            view_velocity,
            exposure_secs,
            "closed rotation"
        );
        self.store.update_rotation(rotation.clone()).await?;
        Ok(Some(rotation))
    }

    /// Open a fresh active window for a newly-applied variant. The caller
    /// closes the previous window first, and only after the corresponding
    /// creative swap has been confirmed.
    pub async fn begin(
        &self,
        campaign_id: Uuid,
        run_id: Option<Uuid>,
        variant_id: Option<Uuid>,
        baseline: VideoMetrics,
    ) -> EngineResult<Rotation> {
        let rotation = Rotation::open(campaign_id, run_id, variant_id, baseline, Utc::now());
        info!(
            campaign_id = %campaign_id,
            rotation_id = %rotation.id,
            variant_id = ?variant_id,
            "opened rotation"
        );
        self.store.insert_rotation(rotation.clone()).await?;
        Ok(rotation)
    }

    /// Aggregate closed rotations into per-variant performance,
    /// exposure-weighted and sorted best-first. Windows shorter than the
    /// minimum-exposure guard are skipped entirely; they carry no velocity
    /// and must not inflate the rotation counts the eligibility gates
    /// check.
    pub async fn variant_velocities(
        &self,
        campaign_id: Uuid,
    ) -> EngineResult<Vec<VariantPerformance>> {
        let rotations = self.store.list_rotations(campaign_id).await?;
        let guard_secs = self.config.min_exposure_minutes * 60;

        struct Acc {
            rotations: u32,
            exposure_hours: f64,
            weighted_velocity: f64,
        }
        let mut by_variant: HashMap<Option<Uuid>, Acc> = HashMap::new();

        for rotation in rotations
            .iter()
            .filter(|r| !r.is_active && r.exposure_secs >= guard_secs)
        {
            let hours = rotation.exposure_secs as f64 / 3600.0;
            let acc = by_variant.entry(rotation.variant_id).or_insert(Acc {
                rotations: 0,
                exposure_hours: 0.0,
                weighted_velocity: 0.0,
            });
            acc.rotations += 1;
            acc.exposure_hours += hours;
            acc.weighted_velocity += rotation.view_velocity * hours;
        }

        let mut performances: Vec<VariantPerformance> = by_variant
            .into_iter()
            .map(|(variant_id, acc)| VariantPerformance {
                variant_id,
                rotations: acc.rotations,
                exposure_hours: acc.exposure_hours,
                avg_velocity: if acc.exposure_hours > 0.0 {
                    acc.weighted_velocity / acc.exposure_hours
                } else {
                    0.0
                },
            })
            .collect();

        performances.sort_by(|a, b| {
            b.avg_velocity
                .partial_cmp(&a.avg_velocity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(performances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memstore::InMemoryStore;
    use chrono::Duration;

    fn tracker() -> (RotationTracker, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        (
            RotationTracker::new(store.clone(), RotationConfig::default()),
            store,
        )
    }

    fn metrics(views: u64, watch: f64) -> VideoMetrics {
        VideoMetrics {
            views,
            watch_time_minutes: watch,
            average_view_duration_secs: 0.0,
        }
    }

    #[tokio::test]
    async fn test_start_initial_is_idempotent() {
        let (tracker, _store) = tracker();
        let campaign_id = Uuid::new_v4();

        let first = tracker
            .start_initial(campaign_id, metrics(1000, 50.0))
            .await
            .unwrap();
        let second = tracker
            .start_initial(campaign_id, metrics(2000, 99.0))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.baseline.views, 1000);
    }

    #[tokio::test]
    async fn test_close_computes_delta_and_velocity() {
        let (tracker, store) = tracker();
        let campaign_id = Uuid::new_v4();

        // Baseline of 1000 views, window of exactly 2 hours.
        let started = Utc::now() - Duration::hours(2);
        store
            .insert_rotation(Rotation::open(
                campaign_id,
                None,
                None,
                metrics(1000, 100.0),
                started,
            ))
            .await
            .unwrap();

        let closed = tracker
            .close_active(campaign_id, metrics(1300, 160.0), Utc::now())
            .await
            .unwrap()
            .unwrap();

        assert!(!closed.is_active);
        assert_eq!(closed.views_delta, 300);
        assert!((closed.view_velocity - 150.0).abs() < 0.5);
        assert!((closed.watch_minutes_delta - 60.0).abs() < 1e-9);
        assert!(closed.exposure_secs >= 7200);
    }

    #[tokio::test]
    async fn test_regressed_counters_clamp_to_zero() {
        let (tracker, store) = tracker();
        let campaign_id = Uuid::new_v4();

        let started = Utc::now() - Duration::hours(1);
        store
            .insert_rotation(Rotation::open(
                campaign_id,
                None,
                None,
                metrics(1000, 100.0),
                started,
            ))
            .await
            .unwrap();

        // The platform reported fewer views than the baseline.
        let closed = tracker
            .close_active(campaign_id, metrics(900, 80.0), Utc::now())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(closed.views_delta, 0);
        assert_eq!(closed.watch_minutes_delta, 0.0);
        assert_eq!(closed.view_velocity, 0.0);
    }

    #[tokio::test]
    async fn test_short_window_reports_zero_velocity() {
        let (tracker, store) = tracker();
        let campaign_id = Uuid::new_v4();

        let started = Utc::now() - Duration::minutes(5);
        store
            .insert_rotation(Rotation::open(
                campaign_id,
                None,
                None,
                metrics(0, 0.0),
                started,
            ))
            .await
            .unwrap();

        let closed = tracker
            .close_active(campaign_id, metrics(500, 10.0), Utc::now())
            .await
            .unwrap()
            .unwrap();

        // Large delta, but the window was under ten minutes.
        assert_eq!(closed.views_delta, 500);
        assert_eq!(closed.view_velocity, 0.0);
    }

    #[tokio::test]
    async fn test_close_without_active_rotation_is_noop() {
        let (tracker, _store) = tracker();
        let closed = tracker
            .close_active(Uuid::new_v4(), metrics(1, 1.0), Utc::now())
            .await
            .unwrap();
        assert!(closed.is_none());
    }

    #[tokio::test]
    async fn test_variant_velocities_weighted_by_exposure() {
        let (tracker, store) = tracker();
        let campaign_id = Uuid::new_v4();
        let variant = Some(Uuid::new_v4());

        // Two closed windows for the same variant: 1h at 100/h, 3h at 200/h.
        for (hours, velocity) in [(1i64, 100.0), (3, 200.0)] {
            let mut rotation = Rotation::open(
                campaign_id,
                None,
                variant,
                metrics(0, 0.0),
                Utc::now() - Duration::hours(hours),
            );
            rotation.is_active = false;
            rotation.ended_at = Some(Utc::now());
            rotation.exposure_secs = hours * 3600;
            rotation.view_velocity = velocity;
            store.insert_rotation(rotation).await.unwrap();
        }
        // One still-active window must be excluded.
        store
            .insert_rotation(Rotation::open(
                campaign_id,
                None,
                variant,
                metrics(0, 0.0),
                Utc::now(),
            ))
            .await
            .unwrap();

        let performances = tracker.variant_velocities(campaign_id).await.unwrap();
        assert_eq!(performances.len(), 1);
        let perf = &performances[0];
        assert_eq!(perf.rotations, 2);
        assert!((perf.exposure_hours - 4.0).abs() < 1e-9);
        // (100*1 + 200*3) / 4 = 175
        assert!((perf.avg_velocity - 175.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_sub_guard_windows_excluded_from_rotation_count() {
        let (tracker, store) = tracker();
        let campaign_id = Uuid::new_v4();
        let variant = Some(Uuid::new_v4());

        // One full hour-long window and one closed after two minutes. The
        // short window carries zero velocity and must not count as a
        // qualifying rotation.
        for (secs, velocity) in [(3600i64, 100.0), (120, 0.0)] {
            let mut rotation = Rotation::open(
                campaign_id,
                None,
                variant,
                metrics(0, 0.0),
                Utc::now() - Duration::seconds(secs),
            );
            rotation.is_active = false;
            rotation.ended_at = Some(Utc::now());
            rotation.exposure_secs = secs;
            rotation.view_velocity = velocity;
            store.insert_rotation(rotation).await.unwrap();
        }

        let performances = tracker.variant_velocities(campaign_id).await.unwrap();
        assert_eq!(performances.len(), 1);
        assert_eq!(performances[0].rotations, 1);
        assert!((performances[0].avg_velocity - 100.0).abs() < 1e-9);
    }
}
