//! `fewtreat run` orchestration.

use anyhow::{Context, Result};
use ft_inference::{
    DiagnosticBundle, InferenceConfig, PanelData, Report, TaskSpec, WlsFixedEffects, run_task,
};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Seed stride between tasks. Within a task the engines derive per-draw
/// seeds far below this, so task streams never collide.
const TASK_SEED_STRIDE: u64 = 10_000_000_000;

#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    /// Path to the panel (JSON, `PanelData` layout).
    pub panel: PathBuf,

    /// Tasks to run, in report order.
    #[serde(default)]
    pub tasks: Vec<TaskSpec>,
    /// Path to a JSON array of further tasks, appended after `tasks`.
    #[serde(default)]
    pub tasks_path: Option<PathBuf>,

    /// Block-bootstrap replications per task.
    #[serde(default = "default_replications")]
    pub block_replications: usize,
    /// Wild-bootstrap replications per placebo world per task.
    #[serde(default = "default_replications")]
    pub wild_replications: usize,
    /// Base seed; task k derives its stream from `seed + k * 10^10`.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Where to write the report (pretty JSON). Defaults to stdout.
    #[serde(default)]
    pub report_json: Option<PathBuf>,
    /// Optional CSV copy of the report rows.
    #[serde(default)]
    pub report_csv: Option<PathBuf>,
    /// Directory for per-task draw bundles (JSON + CSV). Off when unset.
    #[serde(default)]
    pub diagnostics_dir: Option<PathBuf>,

    /// Threads (0 = auto). Use 1 for deterministic parity.
    #[serde(default = "default_threads")]
    pub threads: usize,
}

fn default_replications() -> usize {
    1000
}

fn default_seed() -> u64 {
    42
}

fn default_threads() -> usize {
    1
}

pub fn read_run_config(path: &Path) -> Result<(RunConfig, String)> {
    let bytes =
        std::fs::read(path).with_context(|| format!("reading run config {}", path.display()))?;
    let config: RunConfig = serde_json::from_slice(&bytes)
        .with_context(|| format!("parsing run config {}", path.display()))?;
    Ok((config, sha256_hex(&bytes)))
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    let out = h.finalize();
    let mut s = String::with_capacity(64);
    for b in out {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

pub fn cmd_run(config_path: &Path) -> Result<()> {
    let (config, config_sha256) = read_run_config(config_path)?;

    if config.threads > 0 {
        // Best-effort; if a global pool already exists, keep going.
        let _ = rayon::ThreadPoolBuilder::new().num_threads(config.threads).build_global();
    }

    let mut tasks = config.tasks.clone();
    if let Some(path) = &config.tasks_path {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading task list {}", path.display()))?;
        let more: Vec<TaskSpec> = serde_json::from_str(&json)
            .with_context(|| format!("parsing task list {}", path.display()))?;
        tasks.extend(more);
    }
    if tasks.is_empty() {
        anyhow::bail!("run config names no tasks");
    }

    tracing::info!(path = %config.panel.display(), "loading panel");
    let panel_json = std::fs::read_to_string(&config.panel)
        .with_context(|| format!("reading panel {}", config.panel.display()))?;
    let panel = PanelData::from_json(&panel_json)?;
    tracing::info!(
        observations = panel.n_obs(),
        clusters = panel.n_clusters(),
        tasks = tasks.len(),
        "panel loaded"
    );

    if let Some(dir) = &config.diagnostics_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating diagnostics dir {}", dir.display()))?;
    }

    let backend = WlsFixedEffects::new();
    let mut report = Report::new(&config_sha256, config.seed);
    let mut failures: Vec<String> = Vec::new();

    for (index, task) in tasks.iter().enumerate() {
        let task_config = InferenceConfig {
            block_replications: config.block_replications,
            wild_replications: config.wild_replications,
            seed: config.seed.wrapping_add((index as u64).wrapping_mul(TASK_SEED_STRIDE)),
            keep_draws: config.diagnostics_dir.is_some(),
        };
        tracing::info!(task = %task.id(), seed = task_config.seed, "running task");
        match run_task(&backend, &panel, task, &task_config) {
            Ok(output) => {
                tracing::info!(
                    task = %task.id(),
                    coefficient = output.result.coefficient,
                    p_randomization = output.result.p_randomization_coefficient,
                    "task complete"
                );
                report.rows.push((&output.result).into());
                if let (Some(dir), Some(bundle)) = (&config.diagnostics_dir, &output.diagnostics) {
                    write_bundle(dir, &task.id(), bundle)?;
                }
            }
            Err(err) => {
                tracing::error!(task = %task.id(), error = %err, "task failed");
                failures.push(err.to_string());
            }
        }
    }

    if let Some(path) = &config.report_csv {
        std::fs::write(path, report.to_csv())
            .with_context(|| format!("writing report CSV {}", path.display()))?;
    }
    crate::write_json(config.report_json.as_ref(), serde_json::to_value(&report)?)?;

    if !failures.is_empty() {
        anyhow::bail!(
            "{} of {} tasks failed:\n  {}",
            failures.len(),
            tasks.len(),
            failures.join("\n  ")
        );
    }
    Ok(())
}

fn write_bundle(dir: &Path, task_id: &str, bundle: &DiagnosticBundle) -> Result<()> {
    let stem = sanitize(task_id);
    std::fs::write(dir.join(format!("{stem}.json")), bundle.to_json()?)?;
    std::fs::write(dir.join(format!("{stem}_block.csv")), bundle.block_csv())?;
    std::fs::write(dir.join(format!("{stem}_randomization.csv")), bundle.randomization_csv())?;
    Ok(())
}

/// Task ids contain `/`; keep artifact names flat.
fn sanitize(id: &str) -> String {
    id.chars().map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' }).collect()
}
