use serde::Deserialize;

/// Root engine configuration. Loaded from environment variables with the
/// prefix `THUMB_PILOT__` plus serde defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub rotation: RotationConfig,
    #[serde(default)]
    pub confidence: ConfidenceConfig,
    #[serde(default)]
    pub optimization: OptimizationConfig,
}

// ─── Scheduler ──────────────────────────────────────────────────────────
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_sweep_interval_minutes")]
    pub sweep_interval_minutes: u64,
}

fn default_sweep_interval_minutes() -> u64 { 30 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sweep_interval_minutes: default_sweep_interval_minutes(),
        }
    }
}

// ─── Retry ──────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff_ms() -> u64 { 1_000 }
fn default_max_backoff_ms() -> u64 { 30_000 }
fn default_backoff_multiplier() -> f64 { 2.0 }

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

// ─── Rate limiter ───────────────────────────────────────────────────────
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Minimum gap between the end of one call and the start of the next.
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
}

fn default_min_interval_ms() -> u64 { 1_000 }

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: default_min_interval_ms(),
        }
    }
}

// ─── Circuit breaker ────────────────────────────────────────────────────
#[derive(Debug, Clone, Deserialize)]
pub struct BreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,
}

fn default_failure_threshold() -> u32 { 5 }
fn default_reset_timeout_ms() -> u64 { 60_000 }

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout_ms: default_reset_timeout_ms(),
        }
    }
}

// ─── Rotation tracker ───────────────────────────────────────────────────
#[derive(Debug, Clone, Deserialize)]
pub struct RotationConfig {
    /// Windows shorter than this report zero velocity.
    #[serde(default = "default_min_exposure_minutes")]
    pub min_exposure_minutes: i64,
}

fn default_min_exposure_minutes() -> i64 { 10 }

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            min_exposure_minutes: default_min_exposure_minutes(),
        }
    }
}

// ─── Confidence evaluator ───────────────────────────────────────────────
#[derive(Debug, Clone, Deserialize)]
pub struct ConfidenceConfig {
    /// Minimum impressions per side for the proportion z-test.
    #[serde(default = "default_min_impressions")]
    pub min_impressions: u64,
    /// Minimum closed rotations per side for the velocity heuristic.
    #[serde(default = "default_min_rotations")]
    pub min_rotations: u32,
    /// Minimum total exposure per side for the velocity heuristic.
    #[serde(default = "default_min_exposure_hours")]
    pub min_exposure_hours: f64,
    /// Confidence at or above which the campaign settles.
    #[serde(default = "default_settle_confidence")]
    pub settle_confidence: f64,
    #[serde(default = "default_early_exit_min_iteration")]
    pub early_exit_min_iteration: u32,
    #[serde(default = "default_early_exit_min_rotations")]
    pub early_exit_min_rotations: u32,
    /// Relative improvement below which the early exit can fire.
    #[serde(default = "default_early_exit_improvement")]
    pub early_exit_improvement: f64,
    /// Confidence the early exit requires before locking in the best.
    #[serde(default = "default_early_exit_confidence")]
    pub early_exit_confidence: f64,
}

fn default_min_impressions() -> u64 { 500 }
fn default_min_rotations() -> u32 { 2 }
fn default_min_exposure_hours() -> f64 { 2.0 }
fn default_settle_confidence() -> f64 { 0.95 }
fn default_early_exit_min_iteration() -> u32 { 5 }
fn default_early_exit_min_rotations() -> u32 { 3 }
fn default_early_exit_improvement() -> f64 { 0.05 }
fn default_early_exit_confidence() -> f64 { 0.70 }

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            min_impressions: default_min_impressions(),
            min_rotations: default_min_rotations(),
            min_exposure_hours: default_min_exposure_hours(),
            settle_confidence: default_settle_confidence(),
            early_exit_min_iteration: default_early_exit_min_iteration(),
            early_exit_min_rotations: default_early_exit_min_rotations(),
            early_exit_improvement: default_early_exit_improvement(),
            early_exit_confidence: default_early_exit_confidence(),
        }
    }
}

// ─── Optimization loop ──────────────────────────────────────────────────
#[derive(Debug, Clone, Deserialize)]
pub struct OptimizationConfig {
    #[serde(default = "default_variants_per_batch")]
    pub variants_per_batch: u32,
    #[serde(default = "default_max_iterations")]
    pub default_max_iterations: u32,
    #[serde(default = "default_iterations_per_day")]
    pub default_iterations_per_day: u32,
}

fn default_variants_per_batch() -> u32 { 3 }
fn default_max_iterations() -> u32 { 10 }
fn default_iterations_per_day() -> u32 { 2 }

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            variants_per_batch: default_variants_per_batch(),
            default_max_iterations: default_max_iterations(),
            default_iterations_per_day: default_iterations_per_day(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("THUMB_PILOT")
                .separator("__")
                .try_parsing(true),
        );
        let config = builder.build()?;
        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_constants() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.scheduler.sweep_interval_minutes, 30);
        assert_eq!(cfg.retry.max_retries, 3);
        assert_eq!(cfg.breaker.failure_threshold, 5);
        assert_eq!(cfg.rotation.min_exposure_minutes, 10);
        assert_eq!(cfg.confidence.min_impressions, 500);
        assert_eq!(cfg.confidence.min_rotations, 2);
        assert!((cfg.confidence.settle_confidence - 0.95).abs() < f64::EPSILON);
        assert_eq!(cfg.confidence.early_exit_min_iteration, 5);
        assert_eq!(cfg.optimization.default_iterations_per_day, 2);
    }
}
