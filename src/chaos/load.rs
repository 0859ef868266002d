//! Load scenario generator.
//!
//! A scenario holds up to four independent constraints. Each present
//! constraint runs as its own task; [`LoadScenarioGenerator::load_scenario`]
//! returns once every task has finished.
//!
//! CPU pressure is real busy-work run on the blocking pool, sliced against
//! idle sleeps on the tokio clock, so the other constraints and the telemetry
//! sampler keep their worker threads. Memory pressure is real allocation.
//! Network and disk constraints are time-delay placeholders that only carry
//! a computed severity.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::LoadConfig;
use crate::error::{HarnessError, HarnessResult};

const MB: usize = 1024 * 1024;

// ============================================================================
// Constraints
// ============================================================================

/// Shape of CPU utilisation over time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadPattern {
    /// Steady utilisation at the target
    #[default]
    Constant,
    /// Full-utilisation bursts at the start of every spike period,
    /// a quarter of the target in between
    Spike,
    /// Sinusoidal between 0 and the target over the oscillation period
    Oscillating,
}

impl LoadPattern {
    /// Busy fraction (0.0 - 1.0) at `elapsed` into the constraint.
    pub fn utilization_at(&self, elapsed: Duration, target: f64, config: &LoadConfig) -> f64 {
        let elapsed_ms = elapsed.as_millis() as u64;
        let utilization = match self {
            LoadPattern::Constant => target,
            LoadPattern::Spike => {
                let period = config.spike_period_ms.max(1);
                if elapsed_ms % period < config.spike_burst_ms {
                    1.0
                } else {
                    target * 0.25
                }
            }
            LoadPattern::Oscillating => {
                let period = config.oscillation_period_ms.max(1) as f64;
                let phase = 2.0 * std::f64::consts::PI * elapsed_ms as f64 / period;
                target * (0.5 + 0.5 * phase.sin())
            }
        };
        utilization.clamp(0.0, 1.0)
    }
}

/// CPU pressure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuConstraint {
    /// Target busy fraction (0.0 - 1.0)
    pub utilization: f64,
    /// How long to apply load (milliseconds)
    pub duration_ms: u64,
    /// Utilisation shape
    #[serde(default)]
    pub pattern: LoadPattern,
}

/// Memory pressure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryConstraint {
    /// Megabytes to allocate
    pub target_mb: u64,
    /// How long to hold the allocation (milliseconds)
    pub duration_ms: u64,
}

/// Degraded network placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConstraint {
    /// Added round-trip latency (milliseconds)
    pub latency_ms: u64,
    /// Fraction of packets lost (0.0 - 1.0)
    pub packet_loss: f64,
    /// Available bandwidth (kbit/s)
    pub bandwidth_kbps: u64,
    /// How long the degradation lasts (milliseconds)
    pub duration_ms: u64,
}

/// Degraded disk placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskConstraint {
    /// Added I/O latency (milliseconds)
    pub latency_ms: u64,
    /// Fraction of failed I/O operations (0.0 - 1.0)
    pub error_rate: f64,
    /// How long the degradation lasts (milliseconds)
    pub duration_ms: u64,
}

/// Constraints to apply concurrently. Absent constraints are skipped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadScenarioConfig {
    /// CPU pressure
    #[serde(default)]
    pub cpu: Option<CpuConstraint>,
    /// Memory pressure
    #[serde(default)]
    pub memory: Option<MemoryConstraint>,
    /// Network degradation
    #[serde(default)]
    pub network: Option<NetworkConstraint>,
    /// Disk degradation
    #[serde(default)]
    pub disk: Option<DiskConstraint>,
}

impl LoadScenarioConfig {
    fn validate(&self) -> HarnessResult<()> {
        if let Some(cpu) = &self.cpu {
            check_fraction("cpu.utilization", cpu.utilization)?;
        }
        if let Some(network) = &self.network {
            check_fraction("network.packet_loss", network.packet_loss)?;
        }
        if let Some(disk) = &self.disk {
            check_fraction("disk.error_rate", disk.error_rate)?;
        }
        Ok(())
    }

    /// Whether no constraint is present.
    pub fn is_empty(&self) -> bool {
        self.cpu.is_none() && self.memory.is_none() && self.network.is_none() && self.disk.is_none()
    }
}

fn check_fraction(field: &str, value: f64) -> HarnessResult<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(HarnessError::invalid(
            field,
            format!("must be within [0, 1], got {}", value),
        ))
    }
}

// ============================================================================
// Severity Tables
// ============================================================================

/// Network severity (1-5): the worst of the latency, packet-loss and
/// bandwidth tables.
///
/// | severity | latency ms | packet loss | bandwidth kbps |
/// |----------|-----------|-------------|----------------|
/// | 5        | > 1000    | > 0.20      | < 56           |
/// | 4        | > 500     | > 0.10      | < 256          |
/// | 3        | > 200     | > 0.05      | < 1024         |
/// | 2        | > 100     | > 0.01      | < 5000         |
pub fn network_severity(constraint: &NetworkConstraint) -> u8 {
    let latency = match constraint.latency_ms {
        l if l > 1000 => 5,
        l if l > 500 => 4,
        l if l > 200 => 3,
        l if l > 100 => 2,
        _ => 1,
    };
    let loss = match constraint.packet_loss {
        p if p > 0.2 => 5,
        p if p > 0.1 => 4,
        p if p > 0.05 => 3,
        p if p > 0.01 => 2,
        _ => 1,
    };
    let bandwidth = match constraint.bandwidth_kbps {
        b if b < 56 => 5,
        b if b < 256 => 4,
        b if b < 1024 => 3,
        b if b < 5000 => 2,
        _ => 1,
    };
    latency.max(loss).max(bandwidth)
}

/// Disk severity (1-5): the worst of the latency and error-rate tables.
///
/// | severity | latency ms | error rate |
/// |----------|-----------|------------|
/// | 5        | > 500     | > 0.10     |
/// | 4        | > 200     | > 0.05     |
/// | 3        | > 100     | > 0.01     |
/// | 2        | > 50      | > 0.001    |
pub fn disk_severity(constraint: &DiskConstraint) -> u8 {
    let latency = match constraint.latency_ms {
        l if l > 500 => 5,
        l if l > 200 => 4,
        l if l > 100 => 3,
        l if l > 50 => 2,
        _ => 1,
    };
    let errors = match constraint.error_rate {
        e if e > 0.1 => 5,
        e if e > 0.05 => 4,
        e if e > 0.01 => 3,
        e if e > 0.001 => 2,
        _ => 1,
    };
    latency.max(errors)
}

/// CPU severity (1-5) from the target utilisation.
pub fn cpu_severity(constraint: &CpuConstraint) -> u8 {
    match constraint.utilization {
        u if u >= 0.9 => 5,
        u if u >= 0.75 => 4,
        u if u >= 0.5 => 3,
        u if u >= 0.25 => 2,
        _ => 1,
    }
}

/// Memory severity (1-5) from the allocated size.
pub fn memory_severity(allocated_mb: u64) -> u8 {
    match allocated_mb {
        m if m >= 1024 => 5,
        m if m >= 512 => 4,
        m if m >= 256 => 3,
        m if m >= 64 => 2,
        _ => 1,
    }
}

// ============================================================================
// Reports
// ============================================================================

/// Which resource a constraint pressured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    /// CPU busy-work
    Cpu,
    /// Memory allocation
    Memory,
    /// Network placeholder
    Network,
    /// Disk placeholder
    Disk,
}

/// Outcome of one constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintReport {
    /// Resource pressured
    pub kind: ConstraintKind,
    /// Requested duration (milliseconds)
    pub duration_ms: u64,
    /// Time actually spent (milliseconds)
    pub elapsed_ms: u64,
    /// Computed severity (1-5)
    pub severity: u8,
    /// Busy-work time consumed (CPU only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub busy_ms: Option<u64>,
    /// Memory held (memory only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocated_mb: Option<u64>,
}

/// Outcome of a whole scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadScenarioReport {
    /// When the scenario started
    pub started_at: DateTime<Utc>,
    /// When the last constraint finished
    pub completed_at: DateTime<Utc>,
    /// Per-constraint outcomes, ordered by kind
    pub constraints: Vec<ConstraintReport>,
}

impl LoadScenarioReport {
    /// Worst severity across constraints (0 when empty).
    pub fn max_severity(&self) -> u8 {
        self.constraints.iter().map(|c| c.severity).max().unwrap_or(0)
    }
}

// ============================================================================
// Generator
// ============================================================================

/// Runs load scenarios.
#[derive(Debug, Clone)]
pub struct LoadScenarioGenerator {
    config: LoadConfig,
}

impl LoadScenarioGenerator {
    /// Create a generator.
    pub fn new(config: LoadConfig) -> Self {
        Self { config }
    }

    /// Apply every present constraint concurrently and wait for all of them.
    pub async fn load_scenario(
        &self,
        scenario: LoadScenarioConfig,
    ) -> HarnessResult<LoadScenarioReport> {
        scenario.validate()?;
        let started_at = Utc::now();
        info!(
            cpu = scenario.cpu.is_some(),
            memory = scenario.memory.is_some(),
            network = scenario.network.is_some(),
            disk = scenario.disk.is_some(),
            "Load scenario started"
        );

        let mut tasks = JoinSet::new();
        if let Some(cpu) = scenario.cpu {
            let config = self.config.clone();
            tasks.spawn(run_cpu(cpu, config));
        }
        if let Some(memory) = scenario.memory {
            let config = self.config.clone();
            tasks.spawn(run_memory(memory, config));
        }
        if let Some(network) = scenario.network {
            tasks.spawn(run_network(network));
        }
        if let Some(disk) = scenario.disk {
            tasks.spawn(run_disk(disk));
        }

        let mut constraints = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => constraints.push(report),
                Err(e) => warn!(error = %e, "Load constraint task failed"),
            }
        }
        constraints.sort_by_key(|c| c.kind);

        let report = LoadScenarioReport {
            started_at,
            completed_at: Utc::now(),
            constraints,
        };
        info!(
            constraints = report.constraints.len(),
            max_severity = report.max_severity(),
            "Load scenario completed"
        );
        Ok(report)
    }
}

async fn run_cpu(constraint: CpuConstraint, config: LoadConfig) -> ConstraintReport {
    let slice = Duration::from_millis(config.cpu_slice_ms.max(1));
    let total = Duration::from_millis(constraint.duration_ms);
    let start = tokio::time::Instant::now();
    let mut offset = Duration::ZERO;
    let mut busy_total = Duration::ZERO;

    debug!(
        utilization = constraint.utilization,
        pattern = ?constraint.pattern,
        duration_ms = constraint.duration_ms,
        "CPU constraint started"
    );

    // Progress is counted in slices so the pattern schedule does not depend
    // on how long the blocking pool takes to pick up each busy slice.
    while offset < total {
        let step = slice.min(total - offset);
        let utilization =
            constraint
                .pattern
                .utilization_at(offset, constraint.utilization, &config);
        let busy = step.mul_f64(utilization);

        if !busy.is_zero() {
            match tokio::task::spawn_blocking(move || spin(busy)).await {
                Ok(spent) => busy_total += spent,
                Err(e) => {
                    warn!(error = %e, "CPU busy slice failed");
                    break;
                }
            }
        }

        let idle = step.saturating_sub(busy);
        if !idle.is_zero() {
            tokio::time::sleep(idle).await;
        }
        offset += step;
    }

    ConstraintReport {
        kind: ConstraintKind::Cpu,
        duration_ms: constraint.duration_ms,
        elapsed_ms: start.elapsed().as_millis() as u64,
        severity: cpu_severity(&constraint),
        busy_ms: Some(busy_total.as_millis() as u64),
        allocated_mb: None,
    }
}

/// Burn CPU for `budget`; returns the time actually spent.
fn spin(budget: Duration) -> Duration {
    let start = std::time::Instant::now();
    let mut acc: u64 = 0;
    while start.elapsed() < budget {
        for i in 0..1_000u64 {
            acc = std::hint::black_box(acc.wrapping_mul(31).wrapping_add(i));
        }
    }
    std::hint::black_box(acc);
    start.elapsed()
}

async fn run_memory(constraint: MemoryConstraint, config: LoadConfig) -> ConstraintReport {
    let start = tokio::time::Instant::now();
    let target_mb = if constraint.target_mb > config.max_memory_mb {
        warn!(
            requested_mb = constraint.target_mb,
            max_mb = config.max_memory_mb,
            "Memory constraint capped"
        );
        config.max_memory_mb
    } else {
        constraint.target_mb
    };

    let chunk_mb = config.memory_chunk_mb.max(1);
    let mut buffers: Vec<Vec<u8>> = Vec::new();
    let mut allocated_mb = 0;
    while allocated_mb < target_mb {
        let size = chunk_mb.min(target_mb - allocated_mb);
        buffers.push(vec![1u8; size as usize * MB]);
        allocated_mb += size;
    }
    debug!(allocated_mb, chunks = buffers.len(), "Memory constraint holding");

    tokio::time::sleep(Duration::from_millis(constraint.duration_ms)).await;
    drop(buffers);

    ConstraintReport {
        kind: ConstraintKind::Memory,
        duration_ms: constraint.duration_ms,
        elapsed_ms: start.elapsed().as_millis() as u64,
        severity: memory_severity(allocated_mb),
        busy_ms: None,
        allocated_mb: Some(allocated_mb),
    }
}

async fn run_network(constraint: NetworkConstraint) -> ConstraintReport {
    let start = tokio::time::Instant::now();
    let severity = network_severity(&constraint);
    debug!(severity, latency_ms = constraint.latency_ms, "Network constraint active");
    tokio::time::sleep(Duration::from_millis(constraint.duration_ms)).await;

    ConstraintReport {
        kind: ConstraintKind::Network,
        duration_ms: constraint.duration_ms,
        elapsed_ms: start.elapsed().as_millis() as u64,
        severity,
        busy_ms: None,
        allocated_mb: None,
    }
}

async fn run_disk(constraint: DiskConstraint) -> ConstraintReport {
    let start = tokio::time::Instant::now();
    let severity = disk_severity(&constraint);
    debug!(severity, latency_ms = constraint.latency_ms, "Disk constraint active");
    tokio::time::sleep(Duration::from_millis(constraint.duration_ms)).await;

    ConstraintReport {
        kind: ConstraintKind::Disk,
        duration_ms: constraint.duration_ms,
        elapsed_ms: start.elapsed().as_millis() as u64,
        severity,
        busy_ms: None,
        allocated_mb: None,
    }
}
