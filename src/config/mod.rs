use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub database: DatabaseConfig,
    pub dispatcher: DispatcherConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub chaos: ChaosConfig,
    pub load: LoadConfig,
    pub telemetry: TelemetryConfig,
    pub recovery: RecoveryConfig,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Database configuration for report persistence
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

/// Intent dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Probability (0.0 - 1.0) that a dispatch fails with a simulated error
    pub failure_rate: f64,
    /// Artificial latency added to every dispatch (milliseconds)
    pub latency_ms: u64,
    /// Breaker key used by `dispatch_intent` when no target is given
    pub global_target: String,
    /// Seed for the dispatcher's random source; `None` uses thread entropy
    pub rng_seed: Option<u64>,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failures inside the sliding window that open the circuit
    pub failure_threshold: u32,
    /// Sliding window for failure accrual (milliseconds)
    pub failure_window_ms: u64,
    /// Time an open circuit waits before moving to half-open (milliseconds)
    pub cooldown_ms: u64,
}

/// Failure injection engine configuration.
#[derive(Debug, Clone)]
pub struct ChaosConfig {
    /// Maximum number of simultaneously active failures
    pub max_concurrent_failures: usize,
    /// Severity used when an injection does not specify one (1 - 5)
    pub default_severity: u8,
    /// Injection records kept in history; the oldest are evicted first
    pub max_history: usize,
}

/// Load scenario generator configuration.
#[derive(Debug, Clone)]
pub struct LoadConfig {
    /// Length of one busy/idle CPU slice (milliseconds)
    pub cpu_slice_ms: u64,
    /// Size of each memory allocation chunk (megabytes)
    pub memory_chunk_mb: u64,
    /// Upper bound on memory a single constraint may allocate (megabytes)
    pub max_memory_mb: u64,
    /// Period of the spike pattern (milliseconds)
    pub spike_period_ms: u64,
    /// Length of the burst at the start of each spike period (milliseconds)
    pub spike_burst_ms: u64,
    /// Period of the oscillating pattern (milliseconds)
    pub oscillation_period_ms: u64,
}

/// Per-metric anomaly bounds. A sample breaches when it is above `max`
/// or below `min`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricThreshold {
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub min: Option<f64>,
}

impl MetricThreshold {
    /// Threshold with only an upper bound.
    pub fn max(max: f64) -> Self {
        Self {
            max: Some(max),
            min: None,
        }
    }

    /// Threshold with only a lower bound.
    pub fn min(min: f64) -> Self {
        Self {
            max: None,
            min: Some(min),
        }
    }
}

/// Baseline calculation configuration.
#[derive(Debug, Clone)]
pub struct BaselineConfig {
    /// EMA smoothing factor (0 < alpha < 1)
    /// Lower = smoother, less responsive
    /// Higher = more responsive, more noise
    pub ema_alpha: f64,

    /// Minimum samples before a baseline is valid
    pub min_samples: usize,

    /// Threshold multiplier for warning drift (e.g., 1.5 = 50% above baseline)
    pub warning_multiplier: f64,

    /// Threshold multiplier for critical drift
    pub critical_multiplier: f64,
}

/// Telemetry collector configuration.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Rolling window size for chaos-monitoring snapshots
    pub max_data_points: usize,
    /// Default chaos-monitoring sampling interval (milliseconds)
    pub sampling_interval_ms: u64,
    /// Sampling interval while collecting the baseline (milliseconds)
    pub baseline_sample_interval_ms: u64,
    /// Anomaly thresholds keyed by metric name
    pub thresholds: HashMap<String, MetricThreshold>,
    /// Baseline drift settings
    pub baseline: BaselineConfig,
}

/// Recovery path validator configuration.
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Wait after injecting a failure before the first recovery attempt (milliseconds)
    pub grace_period_ms: u64,
    /// Duration of the failure injected for each path (milliseconds)
    pub failure_duration_ms: u64,
    /// Simulated time each escalation stage takes (milliseconds)
    pub stage_delay_ms: u64,
    /// Probability that the primary strategy restores service
    pub primary_success_probability: f64,
    /// Probability that the secondary strategy restores service
    pub secondary_success_probability: f64,
    /// Probability that the fallback strategy restores service
    pub fallback_success_probability: f64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let database = DatabaseConfig {
            path: PathBuf::from(
                env::var("CHAOS_DATABASE_PATH")
                    .unwrap_or_else(|_| "./data/chaos-harness.db".to_string()),
            ),
            max_connections: env_or("CHAOS_DATABASE_MAX_CONNECTIONS", 5)?,
        };

        let dispatcher = DispatcherConfig {
            failure_rate: env_or("CHAOS_FAILURE_RATE", 0.0)?,
            latency_ms: env_or("CHAOS_LATENCY_MS", 0)?,
            global_target: env::var("CHAOS_GLOBAL_TARGET")
                .unwrap_or_else(|_| "intent_dispatcher".to_string()),
            rng_seed: env_opt("CHAOS_RNG_SEED")?,
        };

        let circuit_breaker = CircuitBreakerConfig {
            failure_threshold: env_or("CHAOS_CB_FAILURE_THRESHOLD", 3)?,
            failure_window_ms: env_or("CHAOS_CB_FAILURE_WINDOW_MS", 5000)?,
            cooldown_ms: env_or("CHAOS_CB_COOLDOWN_MS", 10_000)?,
        };

        let chaos = ChaosConfig {
            max_concurrent_failures: env_or("CHAOS_MAX_CONCURRENT_FAILURES", 3)?,
            default_severity: env_or("CHAOS_DEFAULT_SEVERITY", 3)?,
            max_history: env_or("CHAOS_MAX_INJECTION_HISTORY", 1000)?,
        };

        let load = LoadConfig {
            max_memory_mb: env_or("CHAOS_MAX_MEMORY_MB", 512)?,
            ..LoadConfig::default()
        };

        let thresholds = match env::var("CHAOS_TELEMETRY_THRESHOLDS") {
            Ok(raw) => serde_json::from_str::<HashMap<String, MetricThreshold>>(&raw).map_err(
                |e| AppError::Config {
                    message: format!("CHAOS_TELEMETRY_THRESHOLDS is not valid JSON: {}", e),
                },
            )?,
            Err(_) => TelemetryConfig::default_thresholds(),
        };

        let telemetry = TelemetryConfig {
            max_data_points: env_or("CHAOS_MAX_DATA_POINTS", 100)?,
            sampling_interval_ms: env_or("CHAOS_SAMPLING_INTERVAL_MS", 1000)?,
            baseline_sample_interval_ms: env_or("CHAOS_BASELINE_SAMPLE_INTERVAL_MS", 100)?,
            thresholds,
            baseline: BaselineConfig::default(),
        };

        let recovery = RecoveryConfig {
            grace_period_ms: env_or("CHAOS_RECOVERY_GRACE_MS", 100)?,
            failure_duration_ms: env_or("CHAOS_RECOVERY_FAILURE_DURATION_MS", 500)?,
            stage_delay_ms: env_or("CHAOS_RECOVERY_STAGE_DELAY_MS", 50)?,
            primary_success_probability: env_or("CHAOS_PRIMARY_SUCCESS_PROBABILITY", 0.7)?,
            secondary_success_probability: env_or("CHAOS_SECONDARY_SUCCESS_PROBABILITY", 0.6)?,
            fallback_success_probability: env_or("CHAOS_FALLBACK_SUCCESS_PROBABILITY", 0.9)?,
        };

        let config = Config {
            logging,
            database,
            dispatcher,
            circuit_breaker,
            chaos,
            load,
            telemetry,
            recovery,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check invariants that typed parsing cannot express.
    pub fn validate(&self) -> Result<(), AppError> {
        check_probability("CHAOS_FAILURE_RATE", self.dispatcher.failure_rate)?;
        check_probability(
            "CHAOS_PRIMARY_SUCCESS_PROBABILITY",
            self.recovery.primary_success_probability,
        )?;
        check_probability(
            "CHAOS_SECONDARY_SUCCESS_PROBABILITY",
            self.recovery.secondary_success_probability,
        )?;
        check_probability(
            "CHAOS_FALLBACK_SUCCESS_PROBABILITY",
            self.recovery.fallback_success_probability,
        )?;

        if self.telemetry.max_data_points == 0 {
            return Err(AppError::Config {
                message: "CHAOS_MAX_DATA_POINTS must be greater than zero".to_string(),
            });
        }
        if self.chaos.max_history == 0 {
            return Err(AppError::Config {
                message: "CHAOS_MAX_INJECTION_HISTORY must be greater than zero".to_string(),
            });
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(AppError::Config {
                message: "CHAOS_CB_FAILURE_THRESHOLD must be greater than zero".to_string(),
            });
        }
        if !(1..=5).contains(&self.chaos.default_severity) {
            return Err(AppError::Config {
                message: format!(
                    "CHAOS_DEFAULT_SEVERITY must be between 1 and 5, got {}",
                    self.chaos.default_severity
                ),
            });
        }
        Ok(())
    }
}

/// Read and parse `key`. A value that is set but does not parse is a config
/// error rather than a silent fallback.
fn env_opt<T: FromStr>(key: &str) -> Result<Option<T>, AppError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| AppError::Config {
                message: format!("{} has an invalid value: {:?}", key, raw),
            }),
        Err(_) => Ok(None),
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T, AppError> {
    Ok(env_opt(key)?.unwrap_or(default))
}

fn check_probability(key: &str, value: f64) -> Result<(), AppError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(AppError::Config {
            message: format!("{} must be within [0, 1], got {}", key, value),
        })
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/chaos-harness.db"),
            max_connections: 5,
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            failure_rate: 0.0,
            latency_ms: 0,
            global_target: "intent_dispatcher".to_string(),
            rng_seed: None,
        }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            failure_window_ms: 5000,
            cooldown_ms: 10_000,
        }
    }
}

impl CircuitBreakerConfig {
    /// Get the failure accrual window as Duration.
    pub fn failure_window(&self) -> Duration {
        Duration::from_millis(self.failure_window_ms)
    }

    /// Get the open-state cool-down as Duration.
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            max_concurrent_failures: 3,
            default_severity: 3,
            max_history: 1000,
        }
    }
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            cpu_slice_ms: 50,
            memory_chunk_mb: 1,
            max_memory_mb: 512,
            spike_period_ms: 5000,
            spike_burst_ms: 1000,
            oscillation_period_ms: 10_000,
        }
    }
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            ema_alpha: 0.2,
            min_samples: 3,
            warning_multiplier: 1.5,
            critical_multiplier: 2.0,
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            max_data_points: 100,
            sampling_interval_ms: 1000,
            baseline_sample_interval_ms: 100,
            thresholds: Self::default_thresholds(),
            baseline: BaselineConfig::default(),
        }
    }
}

impl TelemetryConfig {
    /// Thresholds for the metrics exported by the built-in sources.
    pub fn default_thresholds() -> HashMap<String, MetricThreshold> {
        let mut thresholds = HashMap::new();
        thresholds.insert("error_rate".to_string(), MetricThreshold::max(0.1));
        thresholds.insert("avg_dispatch_time_ms".to_string(), MetricThreshold::max(1000.0));
        thresholds.insert("circuit_open".to_string(), MetricThreshold::max(0.5));
        thresholds.insert("active_failures".to_string(), MetricThreshold::max(2.0));
        thresholds
    }

    /// Get the default sampling interval as Duration.
    pub fn sampling_interval(&self) -> Duration {
        Duration::from_millis(self.sampling_interval_ms)
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: 100,
            failure_duration_ms: 500,
            stage_delay_ms: 50,
            primary_success_probability: 0.7,
            secondary_success_probability: 0.6,
            fallback_success_probability: 0.9,
        }
    }
}
