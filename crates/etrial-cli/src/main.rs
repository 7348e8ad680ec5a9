//! eTrial - candidate validation pipeline CLI
//!
//! ## Commands
//!
//! - `run`: evaluate a batch of candidates against a pipeline configuration
//! - `verify`: check that two audit records describe reproducible runs
//!
//! The process exit code is the worst final decision (PASS 0, REVISE 1,
//! KILL 2), or 3 for errors and failed verification.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, Level};

use etrial_core::domain::digest::sha256_hex;
use etrial_core::{verify, AuditRecord, Candidate, Decision, PipelineConfig, INTERNAL_ERROR_EXIT_CODE};
use etrial_pipeline::{DecisionBreakdown, Engine, PipelineRun, StageMode, StageStatistics};

#[derive(Parser)]
#[command(name = "etrial")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Threshold-gated validation pipeline for therapeutic candidates", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate candidates and write results plus audit records
    Run {
        /// Pipeline configuration (.toml or .json)
        #[arg(short, long)]
        config: PathBuf,

        /// JSON array of candidates
        #[arg(long)]
        candidates: PathBuf,

        /// Stages to run: prefilter, clinical or both (needs a [stages] section)
        #[arg(long)]
        mode: Option<StageMode>,

        /// Output directory (default: global.output_dir from the configuration)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Compare two audit records for reproducibility
    Verify {
        /// First audit record (JSON)
        left: PathBuf,

        /// Second audit record (JSON)
        right: PathBuf,
    },
}

/// Batch summary written next to the per-candidate files.
#[derive(Debug, Serialize)]
struct RunSummary {
    mode: Option<StageMode>,
    decisions: BTreeMap<String, Decision>,
    breakdown: DecisionBreakdown,
    stage1_stats: Option<StageStatistics>,
    stage2_stats: Option<StageStatistics>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    etrial_core::init_tracing(cli.json, level);

    let outcome = match cli.command {
        Commands::Run {
            config,
            candidates,
            mode,
            output,
        } => cmd_run(&config, &candidates, mode, output.as_deref()).await,
        Commands::Verify { left, right } => cmd_verify(&left, &right),
    };

    match outcome {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::from(INTERNAL_ERROR_EXIT_CODE as u8)
        }
    }
}

fn load_candidates(path: &Path) -> Result<Vec<Candidate>> {
    let content = std::fs::read_to_string(path).with_context(|| format!("read {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("parse candidates {:?}", path))
}

/// Candidate ids as safe file names. Ids that had to be rewritten get a
/// short digest suffix so distinct ids never share a file.
fn file_stem(id: &str) -> String {
    let sanitized: String = id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect();
    if sanitized == id {
        return sanitized;
    }
    let digest = sha256_hex(id.as_bytes());
    format!("{}-{}", sanitized, &digest[..8])
}

/// File stem per candidate; fails if two ids would still share one.
fn file_stems(runs: &BTreeMap<String, PipelineRun>) -> Result<BTreeMap<&str, String>> {
    let mut owners: BTreeMap<String, &str> = BTreeMap::new();
    let mut stems = BTreeMap::new();
    for id in runs.keys() {
        let stem = file_stem(id);
        if let Some(other) = owners.insert(stem.clone(), id.as_str()) {
            anyhow::bail!("candidates {:?} and {:?} map to the same output file {:?}", other, id, stem);
        }
        stems.insert(id.as_str(), stem);
    }
    Ok(stems)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value).context("serialize output")?;
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

fn write_runs(output: &Path, runs: &BTreeMap<String, PipelineRun>) -> Result<()> {
    let results_dir = output.join("results");
    let audit_dir = output.join("audit");
    std::fs::create_dir_all(&results_dir).with_context(|| format!("create {:?}", results_dir))?;
    std::fs::create_dir_all(&audit_dir).with_context(|| format!("create {:?}", audit_dir))?;
    let stems = file_stems(runs)?;
    for (id, run) in runs {
        let stem = &stems[id.as_str()];
        write_json(&results_dir.join(format!("{}.json", stem)), &run.result)?;
        run.audit.write_json(&audit_dir.join(format!("{}.json", stem)))?;
    }
    Ok(())
}

async fn cmd_run(
    config_path: &Path,
    candidates_path: &Path,
    mode: Option<StageMode>,
    output: Option<&Path>,
) -> Result<u8> {
    let config = PipelineConfig::from_path(config_path)
        .with_context(|| format!("load configuration {:?}", config_path))?;
    let candidates = load_candidates(candidates_path)?;
    let engine = Engine::from_config(&config)?;
    info!(candidates = candidates.len(), n_jobs = engine.n_jobs(), "loaded batch");

    let (summary, runs) = if engine.has_stages() {
        let mode = mode.unwrap_or_default();
        let outcome = engine.run_staged(&candidates, mode).await?;
        let summary = RunSummary {
            mode: Some(mode),
            decisions: decisions(&outcome.results),
            breakdown: outcome.decision_breakdown(),
            stage1_stats: outcome.stage1_stats,
            stage2_stats: outcome.stage2_stats,
        };
        (summary, outcome.results)
    } else {
        if mode.is_some() {
            anyhow::bail!("--mode needs a [stages] section in {:?}", config_path);
        }
        let runs = engine.run_batch(&candidates).await?;
        let summary = RunSummary {
            mode: None,
            decisions: decisions(&runs),
            breakdown: DecisionBreakdown::from_decisions(runs.values().map(PipelineRun::decision)),
            stage1_stats: None,
            stage2_stats: None,
        };
        (summary, runs)
    };

    let output = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.global.output_dir.clone());
    write_runs(&output, &runs)?;
    write_json(&output.join("summary.json"), &summary)?;

    print_summary(&summary);
    let worst = Decision::worst_of(summary.decisions.values().copied());
    Ok(worst.exit_code() as u8)
}

fn decisions(runs: &BTreeMap<String, PipelineRun>) -> BTreeMap<String, Decision> {
    runs.iter().map(|(id, run)| (id.clone(), run.decision())).collect()
}

fn print_summary(summary: &RunSummary) {
    for (id, decision) in &summary.decisions {
        println!("{:<24} {}", id, decision);
    }
    for stats in [&summary.stage1_stats, &summary.stage2_stats].into_iter().flatten() {
        println!(
            "stage {}: {} in, {} out ({:.0}% pass, {:.1} candidates/s)",
            stats.stage_name,
            stats.input_count,
            stats.output_count,
            stats.pass_rate() * 100.0,
            stats.throughput_per_sec()
        );
    }
    println!(
        "PASS {}  REVISE {}  KILL {}",
        summary.breakdown.pass, summary.breakdown.revise, summary.breakdown.kill
    );
}

fn cmd_verify(left: &Path, right: &Path) -> Result<u8> {
    let a = AuditRecord::read_json(left)?;
    let b = AuditRecord::read_json(right)?;
    let report = verify(&a, &b);
    if report.matches {
        println!("reproducible: config, input and module versions match");
        return Ok(0);
    }
    for difference in &report.differences {
        println!(
            "{}: {} -> {}",
            difference.field,
            difference.left.as_deref().unwrap_or("<absent>"),
            difference.right.as_deref().unwrap_or("<absent>")
        );
    }
    Ok(INTERNAL_ERROR_EXIT_CODE as u8)
}
