//! # ft-inference
//!
//! Finite-sample inference for panel difference-in-differences with one
//! treated cluster.
//!
//! This crate provides:
//! - Weighted least squares with absorbed fixed effects and cluster-robust
//!   standard errors
//! - Cluster×period×group aggregation of null-model residuals
//! - A variance-corrected cluster block bootstrap (Ferman–Pinto style)
//! - Randomization inference with a wild cluster bootstrap
//! - Per-task orchestration assembling everything into one result
//!
//! ## Architecture
//!
//! Estimation goes through the `RegressionBackend` trait from ft-core; the
//! resampling engines never depend on a concrete estimator.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Cluster×period×group aggregation of residuals and weights.
pub mod aggregate;
/// Serializable diagnostic and report artifacts.
pub mod artifacts;
/// Cluster block bootstrap with a variance adjustment.
pub mod block_bootstrap;
/// Weighted absorption of high-dimensional fixed effects.
pub mod hdfe;
/// Columnar panel container and treatment-assignment helpers.
pub mod panel;
/// Randomization inference via a wild cluster bootstrap.
pub mod randomization;
/// Weighted least squares with absorbed fixed effects.
pub mod regression;
/// Per-task orchestration of the inference pipeline.
pub mod task;
/// Heteroskedasticity correction of the cluster contrasts.
pub mod variance;

pub use aggregate::{Cell, ClusterStatistic, aggregate_cells, cluster_statistics};
pub use artifacts::{DiagnosticBundle, Report, ReportRow, SCHEMA_VERSION};
pub use block_bootstrap::{
    BlockBootstrapConfig, BlockBootstrapDraws, BlockPValues, run_block_bootstrap,
};
pub use hdfe::FixedEffectsAbsorber;
pub use panel::{FixedEffect, PanelData};
pub use randomization::{
    RandomizationConfig, RandomizationDraw, RandomizationResult, WildInput, WildWorld,
    run_randomization,
};
pub use regression::{WlsFixedEffects, crve_p_value};
pub use task::{
    InferenceConfig, InferenceResult, ModelSpec, TaskOutput, TaskSpec, run_task,
};
pub use variance::{FallbackBranch, VarianceCorrection, correct_variances};
