//! Thumb Pilot — autonomous thumbnail optimization engine.
//!
//! Entry point that wires the engine against a simulated platform and
//! runs the scheduler. Production deployments swap the simulated
//! collaborators for real gateway/platform/generator implementations.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use clap::Parser;
use parking_lot::Mutex;
use rand::Rng;
use tracing::{info, warn};
use uuid::Uuid;

use thumbpilot_core::config::EngineConfig;
use thumbpilot_core::contracts::{
    CampaignStore, ContentAnalysis, PlatformClient, VariantGenerator, VideoInfo,
};
use thumbpilot_core::event_bus::noop_sink;
use thumbpilot_core::types::{Variant, VideoMetrics};
use thumbpilot_core::{EngineError, EngineResult};
use thumbpilot_engine::{InMemoryStore, Orchestrator, Scheduler};

#[derive(Parser, Debug)]
#[command(name = "thumb-pilot")]
#[command(about = "Autonomous thumbnail optimization engine")]
#[command(version)]
struct Cli {
    /// Sweep interval in minutes (overrides config)
    #[arg(long, env = "THUMB_PILOT__SCHEDULER__SWEEP_INTERVAL_MINUTES")]
    sweep_interval_minutes: Option<u64>,

    /// Video identifier to optimize in the demo simulation
    #[arg(long, default_value = "demo-video-1")]
    video_id: String,

    /// Per-call failure rate of the simulated platform, 0.0-1.0
    #[arg(long, default_value_t = 0.1)]
    flakiness: f64,
}

/// Simulated platform: cumulative metrics grow with wall-clock time and
/// a configurable fraction of calls fail with transient errors, which
/// exercises the resilience stack end to end.
struct SimulatedPlatform {
    state: Mutex<SimState>,
    flakiness: f64,
}

struct SimState {
    metrics: VideoMetrics,
    last_tick: DateTime<Utc>,
}

impl SimulatedPlatform {
    fn new(flakiness: f64) -> Self {
        Self {
            state: Mutex::new(SimState {
                metrics: VideoMetrics {
                    views: 10_000,
                    watch_time_minutes: 4_000.0,
                    average_view_duration_secs: 24.0,
                },
                last_tick: Utc::now(),
            }),
            flakiness: flakiness.clamp(0.0, 1.0),
        }
    }

    fn maybe_fail(&self) -> EngineResult<()> {
        if rand::thread_rng().gen_bool(self.flakiness) {
            return Err(EngineError::Transient("simulated 503".into()));
        }
        Ok(())
    }

    fn advance(&self) -> VideoMetrics {
        let mut state = self.state.lock();
        let now = Utc::now();
        let elapsed_secs = (now - state.last_tick).num_seconds().max(0) as f64;
        let views_per_sec = rand::thread_rng().gen_range(0.02..0.08);
        let new_views = (elapsed_secs * views_per_sec) as u64;
        state.metrics.views += new_views;
        state.metrics.watch_time_minutes += new_views as f64 * 0.4;
        state.last_tick = now;
        state.metrics
    }
}

#[async_trait]
impl PlatformClient for SimulatedPlatform {
    async fn video_info(&self, video_id: &str) -> EngineResult<VideoInfo> {
        self.maybe_fail()?;
        Ok(VideoInfo {
            title: format!("Demo video {video_id}"),
            current_thumbnail_url: "https://platform.test/thumb.jpg".into(),
            frames: vec!["frame-a".into(), "frame-b".into(), "frame-c".into()],
            transcript: Some("simulated transcript".into()),
        })
    }

    async fn analytics(
        &self,
        _video_id: &str,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> EngineResult<VideoMetrics> {
        self.maybe_fail()?;
        Ok(self.advance())
    }

    async fn apply_creative(&self, video_id: &str, image: Bytes) -> EngineResult<()> {
        self.maybe_fail()?;
        info!(video_id, bytes = image.len(), "simulated thumbnail swap");
        Ok(())
    }
}

/// Canned generator: stores placeholder image payloads as variants.
struct CannedGenerator {
    store: Arc<InMemoryStore>,
}

#[async_trait]
impl VariantGenerator for CannedGenerator {
    async fn analyze_content(
        &self,
        _campaign_id: Uuid,
        video: &VideoInfo,
    ) -> EngineResult<ContentAnalysis> {
        Ok(ContentAnalysis {
            base_prompt: format!("bold thumbnail for \"{}\"", video.title),
            reference_elements: video.frames.clone(),
        })
    }

    async fn generate_variants(
        &self,
        campaign_id: Uuid,
        base_prompt: &str,
        count: u32,
        _reference_elements: &[String],
    ) -> EngineResult<Vec<Uuid>> {
        let mut ids = Vec::new();
        for n in 0..count {
            let variant = Variant {
                id: Uuid::new_v4(),
                campaign_id,
                image: Bytes::from(format!("{base_prompt} #{n}").into_bytes()),
                created_at: Utc::now(),
            };
            ids.push(variant.id);
            self.store.insert_variant(variant).await?;
        }
        info!(campaign_id = %campaign_id, count, "generated demo variants");
        Ok(ids)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "thumb_pilot=info,thumbpilot_engine=info".into()),
        )
        .init();

    let cli = Cli::parse();

    info!("Thumb Pilot starting up");

    let mut config = EngineConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        EngineConfig::default()
    });
    if let Some(minutes) = cli.sweep_interval_minutes {
        config.scheduler.sweep_interval_minutes = minutes;
    }

    let store = Arc::new(InMemoryStore::new());
    let platform = Arc::new(SimulatedPlatform::new(cli.flakiness));
    let generator = Arc::new(CannedGenerator {
        store: store.clone(),
    });

    let sweep_interval = config.scheduler.sweep_interval_minutes;
    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        platform,
        generator,
        noop_sink(),
        config,
    ));

    let campaign = orchestrator
        .create_campaign("demo-user", &cli.video_id)
        .await?;
    info!(campaign_id = %campaign.id, video_id = %campaign.video_id, "demo campaign created");
    orchestrator.spawn_creation_pipeline(campaign.id);

    let scheduler = Arc::new(Scheduler::new(
        orchestrator,
        store.clone() as Arc<dyn CampaignStore>,
    ));
    scheduler.start(sweep_interval);

    info!(sweep_interval_minutes = sweep_interval, "Thumb Pilot is running");
    tokio::signal::ctrl_c().await?;
    scheduler.stop();

    let final_state = store.get_campaign(campaign.id).await?;
    info!(
        status = %final_state.status,
        iteration = final_state.iteration,
        winner = ?final_state.winner_variant_id,
        "shutting down"
    );
    Ok(())
}
