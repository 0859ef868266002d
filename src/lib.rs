//! # Chaos Harness
//!
//! A chaos-engineering and resilience-verification harness. It injects
//! failures into a simulated backend, tracks how dependent components
//! behave, measures user-experience degradation, and verifies that declared
//! recovery strategies restore service within bounded time.
//!
//! ## Features
//!
//! - **Intent Dispatcher**: free-text intent classification and a
//!   circuit-breaker-gated dispatcher with configurable simulated failures
//! - **Failure Injection**: time-bounded failures under a concurrency cap with
//!   awaitable recovery
//! - **Load Scenarios**: concurrent CPU, memory, network and disk pressure
//! - **Telemetry**: baseline collection, periodic sampling, threshold
//!   anomalies and timeline projection
//! - **UX Impact**: severity-tagged impact records and a normalised score
//! - **Recovery Validation**: primary → secondary → fallback escalation with
//!   success statistics
//!
//! ## Architecture
//!
//! ```text
//! ChaosHarness ──FaultSource──→ IntentDispatcher ──→ CircuitBreaker (per target)
//!      │                              │
//!      └──────── MetricSource ────────┴──→ TelemetryCollector
//!                                                │
//! RecoveryPathValidator ──→ UxImpactTracker ──→ reports ──→ SQLite
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use chaos_harness::{ChaosTestbed, Config, RunOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let options = RunOptions::from_config(&config);
//!     let testbed = ChaosTestbed::new(config);
//!     testbed.start().await;
//!     let report = testbed.run(options).await?;
//!     println!("{}", serde_json::to_string_pretty(&report)?);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

/// Failure injection engine and load scenario generator.
pub mod chaos;
/// Configuration management.
pub mod config;
/// Intent store, classifier and circuit-breaker-gated dispatcher.
pub mod dispatcher;
/// Error types and result aliases.
pub mod error;
/// Injectable random sources for probabilistic branching.
pub mod random;
/// Recovery path validation.
pub mod recovery;
/// SQLite storage layer for report persistence.
pub mod storage;
/// Telemetry collection and anomaly detection.
pub mod telemetry;
/// End-to-end orchestration of every component.
pub mod testbed;
/// UX impact tracking and scoring.
pub mod ux_impact;

pub use chaos::{ChaosHarness, FailureOptions, FailureType, LoadScenarioGenerator};
pub use config::Config;
pub use dispatcher::{CircuitState, DispatchResult, IntentDispatcher};
pub use error::{AppError, AppResult, HarnessError, HarnessResult};
pub use recovery::{RecoveryPath, RecoveryPathValidator};
pub use telemetry::TelemetryCollector;
pub use testbed::{ChaosTestbed, RunOptions};
pub use ux_impact::{UxImpactTracker, UxSeverity};
