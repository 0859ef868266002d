use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use chaos_harness::{
    config::{Config, LogFormat},
    random::SeededRandom,
    recovery::RecoveryPath,
    storage::{ReportKind, ReportStore, SqliteStorage},
    ChaosTestbed, IntentDispatcher, RunOptions,
};

#[derive(Debug, Parser)]
#[command(name = "chaos-harness", version, about = "Chaos-engineering and resilience-verification harness")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Classify free text into an intent (compound text is split on "and then" / ";")
    Classify {
        /// Text to classify
        text: String,
    },
    /// Full verification run: baseline, database outage, load, recovery, reports
    Run {
        /// Seed for every probabilistic branch
        #[arg(long)]
        seed: Option<u64>,
        /// Chaos monitoring sampling period in milliseconds
        #[arg(long)]
        monitor_ms: Option<u64>,
        /// Skip the concurrent load scenario
        #[arg(long)]
        no_load: bool,
    },
    /// Validate the default recovery paths only
    Recovery {
        /// Seed for every probabilistic branch
        #[arg(long)]
        seed: Option<u64>,
    },
    /// List persisted reports, newest first
    Reports {
        /// Only reports of this kind (e.g. ux_impact, recovery_verification)
        #[arg(long)]
        kind: Option<String>,
        /// Maximum number of reports
        #[arg(long, default_value_t = 10)]
        limit: u32,
    },
    /// Print the component dependency graph
    Dependencies,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Chaos harness starting..."
    );

    match cli.command {
        Command::Classify { text } => {
            let dispatcher =
                IntentDispatcher::new(config.dispatcher.clone(), config.circuit_breaker.clone());
            dispatcher.initialize().await;
            let intent = dispatcher.process_compound_intent(&text).await?;
            let mut intents = vec![intent.clone()];
            for child_id in &intent.child_ids {
                if let Some(child) = dispatcher.get_intent(child_id).await? {
                    intents.push(child);
                }
            }
            println!("{}", serde_json::to_string_pretty(&intents)?);
        }
        Command::Run {
            seed,
            monitor_ms,
            no_load,
        } => {
            if seed.is_some() {
                config.dispatcher.rng_seed = seed;
            }
            let mut options = RunOptions::from_config(&config);
            if let Some(ms) = monitor_ms {
                options.monitor_interval = Duration::from_millis(ms);
            }
            if no_load {
                options.load = None;
            }

            let storage = open_storage(&config).await?;
            let testbed = ChaosTestbed::new(config).with_store(Arc::new(storage));
            testbed.start().await;

            let report = match testbed.run(options).await {
                Ok(r) => r,
                Err(e) => {
                    error!(error = %e, "Verification run failed");
                    return Err(e.into());
                }
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Recovery { seed } => {
            let storage = open_storage(&config).await?;
            let testbed = match seed.or(config.dispatcher.rng_seed) {
                Some(seed) => ChaosTestbed::with_random(config, Arc::new(SeededRandom::new(seed))),
                None => ChaosTestbed::new(config),
            }
            .with_store(Arc::new(storage));
            testbed.start().await;

            let report = testbed
                .recovery_validator()
                .validate_all(&RecoveryPath::defaults())
                .await?;
            testbed.harness().wait_for_recovery().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Reports { kind, limit } => {
            let kind = kind
                .map(|k| k.parse::<ReportKind>())
                .transpose()
                .map_err(anyhow::Error::msg)?;
            let storage = open_storage(&config).await?;
            let reports = storage.list_reports(kind, limit).await?;
            info!(count = reports.len(), "Reports loaded");
            println!("{}", serde_json::to_string_pretty(&reports)?);
        }
        Command::Dependencies => {
            let testbed = ChaosTestbed::new(config);
            let graph = testbed.harness().analyze_dependencies();
            println!("{}", serde_json::to_string_pretty(&graph)?);
        }
    }

    info!("Chaos harness finished");
    Ok(())
}

async fn open_storage(config: &Config) -> anyhow::Result<SqliteStorage> {
    match SqliteStorage::new(&config.database).await {
        Ok(s) => {
            info!(path = %config.database.path.display(), "Database initialized");
            Ok(s)
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize database");
            Err(e.into())
        }
    }
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
