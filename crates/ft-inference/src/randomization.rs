//! Randomization inference with a wild cluster bootstrap.
//!
//! With one treated cluster there is no asymptotic justification for the
//! usual cluster-robust t-test. Instead the null distribution is built
//! empirically: every never-treated cluster takes a turn as a placebo
//! "treated" cluster (plus the identity world, which keeps the real
//! assignment), and within each such world the outcome is resampled `B`
//! times by flipping the sign of every cluster's null-model residual block
//! at once. Each synthetic outcome is re-estimated through the regression
//! backend and the resulting coefficients and t-statistics form the null
//! distribution against which the true statistics are ranked.
//!
//! Sign draws are keyed by `(world cluster, replication)`, not by the
//! position of the world in the input slice, so reordering the placebo
//! worlds permutes the draw set without changing it. A fit failure in any
//! single draw aborts the whole run: dropping a draw would shrink the
//! p-value denominator and bias the test.

use ft_core::{Error, RegressionBackend, RegressionData, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// One treatment assignment to estimate under.
///
/// `worlds[0]` passed to [`run_randomization`] must be the real assignment;
/// the rest are placebo assignments, one per never-treated cluster.
#[derive(Debug, Clone)]
pub struct WildWorld {
    /// Cluster whose treatment flag is on under this assignment.
    pub cluster: usize,
    /// Treatment indicator for every observation under this assignment.
    pub treatment: Vec<f64>,
}

/// Observation-level inputs shared by every world.
///
/// `fitted` and `residuals` come from the null model (treatment excluded);
/// the synthetic outcomes are built from them, so the actual outcome vector
/// is never needed here.
#[derive(Debug, Clone, Copy)]
pub struct WildInput<'a> {
    /// Null-model fitted values.
    pub fitted: &'a [f64],
    /// Null-model residuals.
    pub residuals: &'a [f64],
    /// Dense cluster id per observation.
    pub clusters: &'a [usize],
    /// Observation weights.
    pub weights: &'a [f64],
    /// Control regressors, one slice per column.
    pub controls: &'a [&'a [f64]],
    /// Absorbed fixed-effect keys, one vector per dimension.
    pub fixed_effects: &'a [Vec<usize>],
}

/// Parameters for one randomization-inference run.
#[derive(Debug, Clone, Copy)]
pub struct RandomizationConfig {
    /// Wild-bootstrap replications per world.
    pub replications: usize,
    /// Base seed; draw `(c, r)` uses `seed + c·B + r` where `c` is the
    /// world's cluster id.
    pub seed: u64,
    /// Retain the individual draws for diagnostics.
    pub keep_draws: bool,
}

/// One re-estimated draw of the null distribution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RandomizationDraw {
    /// Cluster treated under this draw's world.
    pub world: usize,
    /// Replication index within the world.
    pub replication: usize,
    /// Re-estimated treatment coefficient.
    pub coefficient: f64,
    /// Re-estimated t-statistic.
    pub t_statistic: f64,
}

/// Summary of a randomization-inference run.
#[derive(Debug, Clone)]
pub struct RandomizationResult {
    /// Treatment coefficient under the real assignment and real outcome.
    pub true_coefficient: f64,
    /// Its t-statistic.
    pub true_t_statistic: f64,
    /// Fraction of draws with |coefficient| strictly above the truth.
    pub p_by_coefficient: f64,
    /// Fraction of draws with |t| strictly above the truth.
    pub p_by_tstat: f64,
    /// Number of worlds (1 + placebo count).
    pub n_worlds: usize,
    /// Replications per world.
    pub n_replications: usize,
    /// 2.5% and 97.5% quantiles of the null coefficient draws.
    pub null_coefficient_quantiles: [f64; 2],
    /// The raw draws, when requested.
    pub draws: Option<Vec<RandomizationDraw>>,
}

fn quantile_sorted(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return f64::NAN;
    }
    if p <= 0.0 {
        return sorted[0];
    }
    if p >= 1.0 {
        return sorted[n - 1];
    }
    let pos = p * ((n - 1) as f64);
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        return sorted[lo];
    }
    let frac = pos - lo as f64;
    sorted[lo] + frac * (sorted[hi] - sorted[lo])
}

fn validate(input: &WildInput<'_>, worlds: &[WildWorld], config: &RandomizationConfig) -> Result<usize> {
    if config.replications == 0 {
        return Err(Error::Validation("randomization inference needs replications >= 1".into()));
    }
    if worlds.is_empty() {
        return Err(Error::Validation("randomization inference needs at least one world".into()));
    }
    let n = input.fitted.len();
    if n == 0 {
        return Err(Error::Validation("no observations".into()));
    }
    for (name, len) in [
        ("residuals", input.residuals.len()),
        ("clusters", input.clusters.len()),
        ("weights", input.weights.len()),
    ] {
        if len != n {
            return Err(Error::Validation(format!(
                "{} length ({}) != fitted length ({})",
                name, len, n
            )));
        }
    }
    for (j, col) in input.controls.iter().enumerate() {
        if col.len() != n {
            return Err(Error::Validation(format!("control column {} has wrong length", j)));
        }
    }
    for (j, dim) in input.fixed_effects.iter().enumerate() {
        if dim.len() != n {
            return Err(Error::Validation(format!("fixed-effect dimension {} has wrong length", j)));
        }
    }
    for (j, world) in worlds.iter().enumerate() {
        if world.treatment.len() != n {
            return Err(Error::Validation(format!(
                "world {} (cluster {}) treatment column has wrong length",
                j, world.cluster
            )));
        }
        if worlds[..j].iter().any(|w| w.cluster == world.cluster) {
            return Err(Error::Validation(format!(
                "cluster {} appears in more than one world",
                world.cluster
            )));
        }
    }
    Ok(n)
}

/// Run randomization inference over the given worlds.
///
/// `worlds[0]` is the real assignment; the true statistics come from fitting
/// it against the reconstructed outcome `fitted + residuals`. All
/// `worlds.len() × replications` draws contribute to the p-value
/// denominators, identity world included.
pub fn run_randomization<R: RegressionBackend>(
    backend: &R,
    input: &WildInput<'_>,
    worlds: &[WildWorld],
    config: &RandomizationConfig,
) -> Result<RandomizationResult> {
    let n = validate(input, worlds, config)?;
    let b = config.replications;

    let n_clusters = input.clusters.iter().copied().max().unwrap_or(0) + 1;
    // The null model fixes fitted + residual = outcome, so the real outcome
    // is recoverable without carrying it separately.
    let outcome: Vec<f64> = input
        .fitted
        .iter()
        .zip(input.residuals)
        .map(|(f, e)| f + e)
        .collect();

    let true_fit = backend
        .fit(&RegressionData {
            outcome: &outcome,
            treatment: Some(&worlds[0].treatment),
            controls: input.controls,
            fixed_effects: input.fixed_effects,
            weights: input.weights,
            clusters: input.clusters,
        })
        .map_err(|e| Error::Computation(format!("true-assignment fit failed: {e}")))?;
    let true_coefficient = true_fit.coefficient();
    let true_t_statistic = true_fit.t_statistic();
    if !(true_coefficient.is_finite() && true_t_statistic.is_finite()) {
        return Err(Error::Computation(format!(
            "true-assignment fit produced a non-finite statistic (coefficient {}, t {})",
            true_coefficient, true_t_statistic
        )));
    }

    let draws: Vec<RandomizationDraw> = (0..worlds.len() * b)
        .into_par_iter()
        .map(|k| {
            let world = &worlds[k / b];
            let replication = k % b;
            let key = config
                .seed
                .wrapping_add((world.cluster as u64).wrapping_mul(b as u64))
                .wrapping_add(replication as u64);
            let mut rng = StdRng::seed_from_u64(key);
            let signs: Vec<f64> = (0..n_clusters)
                .map(|_| if rng.random::<bool>() { 1.0 } else { -1.0 })
                .collect();

            let synthetic: Vec<f64> = (0..n)
                .map(|i| input.fitted[i] + signs[input.clusters[i]] * input.residuals[i])
                .collect();

            let fit = backend
                .fit(&RegressionData {
                    outcome: &synthetic,
                    treatment: Some(&world.treatment),
                    controls: input.controls,
                    fixed_effects: input.fixed_effects,
                    weights: input.weights,
                    clusters: input.clusters,
                })
                .map_err(|e| {
                    Error::Computation(format!(
                        "world cluster {} replication {}: {e}",
                        world.cluster, replication
                    ))
                })?;
            let coefficient = fit.coefficient();
            let t_statistic = fit.t_statistic();
            if !(coefficient.is_finite() && t_statistic.is_finite()) {
                return Err(Error::Computation(format!(
                    "world cluster {} replication {} produced a non-finite statistic",
                    world.cluster, replication
                )));
            }
            Ok(RandomizationDraw { world: world.cluster, replication, coefficient, t_statistic })
        })
        .collect::<Result<_>>()?;

    let total = draws.len() as f64;
    let coef_abs = true_coefficient.abs();
    let t_abs = true_t_statistic.abs();
    let p_by_coefficient =
        draws.iter().filter(|d| d.coefficient.abs() > coef_abs).count() as f64 / total;
    let p_by_tstat =
        draws.iter().filter(|d| d.t_statistic.abs() > t_abs).count() as f64 / total;

    let mut coefficients: Vec<f64> = draws.iter().map(|d| d.coefficient).collect();
    coefficients.sort_by(|a, b| a.total_cmp(b));
    let null_coefficient_quantiles =
        [quantile_sorted(&coefficients, 0.025), quantile_sorted(&coefficients, 0.975)];

    Ok(RandomizationResult {
        true_coefficient,
        true_t_statistic,
        p_by_coefficient,
        p_by_tstat,
        n_worlds: worlds.len(),
        n_replications: b,
        null_coefficient_quantiles,
        draws: if config.keep_draws { Some(draws) } else { None },
    })
}
