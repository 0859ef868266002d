//! Chaos generation: discrete failure injection and continuous resource load.
//!
//! - [`ChaosHarness`] injects time-bounded failures against named targets
//!   under a concurrency cap and schedules their recovery.
//! - [`LoadScenarioGenerator`] applies CPU, memory, network and disk pressure
//!   concurrently with injected failures.

pub mod injection;
pub mod load;

pub use injection::{
    default_dependencies, ChaosHarness, FailureInjection, FailureOptions, FailureType,
    InjectionOutcome, RejectionReason,
};
pub use load::{
    cpu_severity, disk_severity, memory_severity, network_severity, ConstraintKind,
    ConstraintReport, CpuConstraint, DiskConstraint, LoadPattern, LoadScenarioConfig,
    LoadScenarioGenerator, LoadScenarioReport, MemoryConstraint, NetworkConstraint,
};
