//! CLI entrypoint for the tierpool storm harness.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tierpool::{PoolAllocator, PoolConfig};
use tierpool_harness::structured_log::{self, ArtifactIndex, LogEmitter, LogEntry, LogLevel, Outcome};
use tierpool_harness::{HarnessError, StatusReport, StormConfig, StormKind, run_storm};

/// Storm tooling for tierpool.
#[derive(Debug, Parser)]
#[command(name = "tierpool-harness")]
#[command(about = "Allocation storms, status reports and log validation for tierpool")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run an allocation storm against a fresh pool.
    Storm {
        /// churn, sawtooth, tiny-exhaustion, medium-thrash or aligned-mix.
        #[arg(long, default_value = "churn")]
        kind: String,
        #[arg(long, default_value_t = 4)]
        threads: usize,
        /// Operations per thread.
        #[arg(long, default_value_t = 10_000)]
        ops: usize,
        #[arg(long, default_value_t = 0x7149_0001)]
        seed: u64,
        /// Override the tiny arena cell count (TIERPOOL_* variables apply otherwise).
        #[arg(long)]
        tiny_cells: Option<usize>,
        /// Output path for the JSON storm report (stdout if omitted).
        #[arg(long)]
        report: Option<PathBuf>,
        /// Output path for the JSONL structured log.
        #[arg(long)]
        log: Option<PathBuf>,
        /// Output path for the artifact index (requires --report and --log).
        #[arg(long)]
        artifact_index: Option<PathBuf>,
    },
    /// Print the status of a pool built from the environment.
    Status {
        /// Emit JSON instead of the four-line summary.
        #[arg(long)]
        json: bool,
    },
    /// Validate a structured JSONL log.
    ValidateLog {
        #[arg(long)]
        log: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Storm {
            kind,
            threads,
            ops,
            seed,
            tiny_cells,
            report,
            log,
            artifact_index,
        } => {
            let kind = StormKind::parse(&kind)?;
            let mut config = PoolConfig::from_env()?;
            if let Some(cells) = tiny_cells {
                config.tiny_cells = cells;
            }
            let alloc = PoolAllocator::new(config);
            let run_id = format!("{}-{seed:x}", kind.as_str());

            let storm = StormConfig {
                threads,
                ops,
                seed,
                ..StormConfig::new(kind)
            };
            eprintln!(
                "Running {} storm: {threads} threads x {ops} ops (seed {seed:#x})",
                kind.as_str()
            );
            let outcome = run_storm(&alloc, &storm)?;

            let json = serde_json::to_string_pretty(&outcome)?;
            match &report {
                Some(path) => {
                    std::fs::write(path, &json)?;
                    eprintln!("Storm report written to {}", path.display());
                }
                None => println!("{json}"),
            }

            if let Some(path) = &log {
                let mut emitter = LogEmitter::to_file(path, &run_id)?;
                emitter.set_mode(outcome.status.mode.as_str());
                emitter.emit_entry(
                    LogEntry::new("", LogLevel::Info, "storm_start")
                        .with_details(serde_json::json!({
                            "kind": kind.as_str(),
                            "threads": threads,
                            "ops": ops,
                            "seed": seed,
                        })),
                )?;
                let records = alloc.drain_lifecycle_logs();
                emitter.emit_pool_records(&records)?;
                let verdict = if outcome.corruptions == 0 {
                    Outcome::Pass
                } else {
                    Outcome::Fail
                };
                emitter.emit_entry(
                    LogEntry::new("", LogLevel::Info, "storm_complete")
                        .with_outcome(verdict)
                        .with_duration_ms(outcome.elapsed_ms)
                        .with_details(serde_json::json!({
                            "allocations": outcome.allocations,
                            "failures": outcome.failures,
                            "corruptions": outcome.corruptions,
                        })),
                )?;
                emitter.flush()?;
                eprintln!(
                    "Structured log written to {} ({} pool records)",
                    path.display(),
                    records.len()
                );
            }

            if let Some(index_path) = &artifact_index {
                let mut index = ArtifactIndex::new(&run_id);
                if let Some(path) = &report {
                    index.add_file(path, "storm_report")?;
                }
                if let Some(path) = &log {
                    index.add_file(path, "structured_log")?;
                }
                std::fs::write(index_path, index.to_json()?)?;
                eprintln!("Artifact index written to {}", index_path.display());
            }

            if outcome.corruptions > 0 {
                return Err(HarnessError::CorruptionDetected {
                    count: outcome.corruptions,
                }
                .into());
            }
        }
        Command::Status { json } => {
            let alloc = PoolAllocator::from_env();
            let pool = alloc.try_pool().map_err(Clone::clone)?;
            let snapshot = pool.snapshot();
            if json {
                println!("{}", StatusReport::from(&snapshot).to_json()?);
            } else {
                println!("{snapshot}");
            }
        }
        Command::ValidateLog { log } => {
            let (lines, errors) = structured_log::validate_log_file(&log)?;
            for err in &errors {
                eprintln!("{err}");
            }
            if !errors.is_empty() {
                return Err(HarnessError::InvalidLog {
                    path: log.display().to_string(),
                    count: errors.len(),
                }
                .into());
            }
            eprintln!("{}: {lines} lines valid", log.display());
        }
    }

    Ok(())
}
