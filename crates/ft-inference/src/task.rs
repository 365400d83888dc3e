//! Per-task orchestration of the inference pipeline.
//!
//! One task estimates one outcome column under one model specification and
//! produces an [`InferenceResult`]. The stages run in a fixed order: null
//! and full model fits, residual aggregation, variance correction, block
//! bootstrap, randomization inference, baseline cluster-robust p-value.
//! Tasks share nothing mutable, so a batch of tasks can run on independent
//! workers; within a task the replication batches are already parallel.
//!
//! Any stage failure aborts the task with the task id and stage named. No
//! partial result is produced.

use ft_core::{Error, RegressionBackend, RegressionData, Result};
use serde::{Deserialize, Serialize};

use crate::aggregate::{aggregate_cells, cluster_statistics};
use crate::artifacts::{DiagnosticBundle, ReportRow};
use crate::block_bootstrap::{run_block_bootstrap, BlockBootstrapConfig};
use crate::panel::{FixedEffect, PanelData};
use crate::randomization::{run_randomization, RandomizationConfig, WildInput, WildWorld};
use crate::regression::crve_p_value;
use crate::variance::{correct_variances, FallbackBranch};

/// Offset between the block-bootstrap and randomization seed streams of a
/// task. Per-draw seeds stay far below this, so the streams never collide.
const RANDOMIZATION_SEED_OFFSET: u64 = 1_000_000_000;

fn default_true() -> bool {
    true
}

fn default_replications() -> usize {
    1000
}

fn default_seed() -> u64 {
    42
}

/// A model specification: which regressors enter and which fixed effects
/// are absorbed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Identifier used in task ids and reports.
    pub id: String,
    /// Control columns, by panel column name.
    #[serde(default)]
    pub controls: Vec<String>,
    /// Fixed-effect dimensions to absorb.
    pub fixed_effects: Vec<FixedEffect>,
    /// Interact the treated window with the group flag.
    #[serde(default = "default_true")]
    pub group_interacted: bool,
}

/// One unit of work: an outcome column under a specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Outcome column name.
    pub outcome: String,
    /// Model specification.
    pub spec: ModelSpec,
}

impl TaskSpec {
    /// Identifier used in errors, logs, and artifact names.
    pub fn id(&self) -> String {
        format!("{}/{}", self.outcome, self.spec.id)
    }
}

/// Replication counts and seeding for one task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Block-bootstrap replications.
    #[serde(default = "default_replications")]
    pub block_replications: usize,
    /// Wild-bootstrap replications per world.
    #[serde(default = "default_replications")]
    pub wild_replications: usize,
    /// Base seed; the two engines derive disjoint streams from it.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Keep the raw draws for diagnostics.
    #[serde(default)]
    pub keep_draws: bool,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            block_replications: default_replications(),
            wild_replications: default_replications(),
            seed: default_seed(),
            keep_draws: false,
        }
    }
}

/// Terminal output of one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceResult {
    /// Outcome column.
    pub outcome: String,
    /// Specification id.
    pub specification: String,
    /// Treatment coefficient from the full model.
    pub coefficient: f64,
    /// Cluster-robust standard error of the coefficient.
    pub std_error: f64,
    /// Cluster-robust t-statistic.
    pub t_statistic: f64,
    /// Baseline p-value from the t distribution with G−1 degrees of freedom.
    pub p_crve: f64,
    /// Block bootstrap, unadjusted statistic.
    pub p_block_unadjusted: f64,
    /// Block bootstrap, variance-adjusted statistic.
    pub p_block_adjusted: f64,
    /// Randomization inference ranked by |coefficient|.
    pub p_randomization_coefficient: f64,
    /// Randomization inference ranked by |t|.
    pub p_randomization_tstat: f64,
    /// Which rule produced the corrected variances.
    pub variance_fallback: FallbackBranch,
    /// 2.5% and 97.5% quantiles of the null coefficient draws.
    pub null_coefficient_quantiles: [f64; 2],
    /// Clusters in the sample.
    pub n_clusters: usize,
    /// Worlds enumerated by the randomization engine.
    pub n_worlds: usize,
    /// Block-bootstrap replications used.
    pub block_replications: usize,
    /// Wild-bootstrap replications per world used.
    pub wild_replications: usize,
    /// Base seed of the task.
    pub seed: u64,
}

impl From<&InferenceResult> for ReportRow {
    fn from(r: &InferenceResult) -> Self {
        ReportRow {
            outcome: r.outcome.clone(),
            specification: r.specification.clone(),
            coefficient: r.coefficient,
            std_error: r.std_error,
            p_crve: r.p_crve,
            p_block_unadjusted: r.p_block_unadjusted,
            p_block_adjusted: r.p_block_adjusted,
            p_randomization_coefficient: r.p_randomization_coefficient,
            p_randomization_tstat: r.p_randomization_tstat,
        }
    }
}

/// Result plus optional diagnostics for one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutput {
    /// Summary statistics and p-values.
    pub result: InferenceResult,
    /// Raw draws, present when the config asked for them.
    pub diagnostics: Option<DiagnosticBundle>,
}

fn at_stage<T>(task_id: &str, stage: &str, result: Result<T>) -> Result<T> {
    result.map_err(|err| match err {
        Error::Validation(msg) => Error::Validation(format!("task {task_id}: {stage}: {msg}")),
        other => Error::Computation(format!("task {task_id}: {stage}: {other}")),
    })
}

/// Run the full inference pipeline for one task.
pub fn run_task<R: RegressionBackend>(
    backend: &R,
    panel: &PanelData,
    task: &TaskSpec,
    config: &InferenceConfig,
) -> Result<TaskOutput> {
    let task_id = task.id();
    if config.block_replications == 0 || config.wild_replications == 0 {
        return Err(Error::Validation(format!(
            "task {task_id}: replication counts must be >= 1 (block = {}, wild = {})",
            config.block_replications, config.wild_replications
        )));
    }
    at_stage(&task_id, "panel validation", panel.validate())?;

    let outcome = at_stage(&task_id, "inputs", panel.outcome(&task.outcome))?;
    let controls = at_stage(&task_id, "inputs", panel.resolve_controls(&task.spec.controls))?;
    let fixed_effects =
        at_stage(&task_id, "inputs", panel.fixed_effect_dims(&task.spec.fixed_effects))?;
    let treatment =
        panel.treatment_for_cluster(panel.treated_cluster, task.spec.group_interacted);

    let null_fit = at_stage(
        &task_id,
        "null model fit",
        backend.fit(&RegressionData {
            outcome,
            treatment: None,
            controls: &controls,
            fixed_effects: &fixed_effects,
            weights: &panel.weight,
            clusters: &panel.cluster,
        }),
    )?;
    let full_fit = at_stage(
        &task_id,
        "full model fit",
        backend.fit(&RegressionData {
            outcome,
            treatment: Some(&treatment),
            controls: &controls,
            fixed_effects: &fixed_effects,
            weights: &panel.weight,
            clusters: &panel.cluster,
        }),
    )?;
    let coefficient = full_fit.coefficient();
    let std_error = full_fit.std_error();
    let t_statistic = full_fit.t_statistic();
    if !(coefficient.is_finite() && t_statistic.is_finite()) {
        return Err(Error::Computation(format!(
            "task {task_id}: full model fit: non-finite statistics (coefficient {}, t {})",
            coefficient, t_statistic
        )));
    }
    let p_crve =
        at_stage(&task_id, "baseline p-value", crve_p_value(t_statistic, full_fit.n_clusters))?;

    let cells =
        at_stage(&task_id, "cluster aggregation", aggregate_cells(panel, &null_fit.residuals))?;
    let stats =
        at_stage(&task_id, "cluster aggregation", cluster_statistics(panel, &cells))?;
    let correction = at_stage(&task_id, "variance correction", correct_variances(&stats))?;

    let block = at_stage(
        &task_id,
        "block bootstrap",
        run_block_bootstrap(
            &stats,
            &correction,
            &BlockBootstrapConfig { replications: config.block_replications, seed: config.seed },
        ),
    )?;
    let block_p = block.p_values(coefficient);

    let mut worlds = Vec::with_capacity(panel.n_clusters());
    worlds.push(WildWorld { cluster: panel.treated_cluster, treatment: treatment.clone() });
    for c in panel.never_treated() {
        worlds.push(WildWorld {
            cluster: c,
            treatment: panel.treatment_for_cluster(c, task.spec.group_interacted),
        });
    }
    let mut randomization = at_stage(
        &task_id,
        "randomization inference",
        run_randomization(
            backend,
            &WildInput {
                fitted: &null_fit.fitted_values,
                residuals: &null_fit.residuals,
                clusters: &panel.cluster,
                weights: &panel.weight,
                controls: &controls,
                fixed_effects: &fixed_effects,
            },
            &worlds,
            &RandomizationConfig {
                replications: config.wild_replications,
                seed: config.seed.wrapping_add(RANDOMIZATION_SEED_OFFSET),
                keep_draws: config.keep_draws,
            },
        ),
    )?;

    let diagnostics = if config.keep_draws {
        let draws = randomization.draws.take().unwrap_or_default();
        Some(DiagnosticBundle::new(&task.outcome, &task.spec.id, &block, draws))
    } else {
        None
    };

    let result = InferenceResult {
        outcome: task.outcome.clone(),
        specification: task.spec.id.clone(),
        coefficient,
        std_error,
        t_statistic,
        p_crve,
        p_block_unadjusted: block_p.unadjusted,
        p_block_adjusted: block_p.adjusted,
        p_randomization_coefficient: randomization.p_by_coefficient,
        p_randomization_tstat: randomization.p_by_tstat,
        variance_fallback: correction.branch,
        null_coefficient_quantiles: randomization.null_coefficient_quantiles,
        n_clusters: panel.n_clusters(),
        n_worlds: randomization.n_worlds,
        block_replications: config.block_replications,
        wild_replications: config.wild_replications,
        seed: config.seed,
    };
    Ok(TaskOutput { result, diagnostics })
}
