//! Cluster block bootstrap with a heteroskedasticity adjustment.
//!
//! Resampling happens at the cluster level: each replication draws N cluster
//! indices uniformly with replacement and deals the drawn contrast values
//! into N fixed slots. A slot keeps its own treated flag, population weight,
//! and corrected standard deviation; only the contrast value changes. This
//! keeps every replication well-formed (the treated slot always exists, no
//! matter which clusters are drawn) and makes the statistic a single
//! matrix-vector product over the batch of replications.
//!
//! Two statistics per replication: the unadjusted one deals raw `W` values,
//! the adjusted one deals variance-normalized values `W/σ` and rescales each
//! by the receiving slot's own σ. The kernel only produces the raw draws;
//! squaring and comparing against the true point estimate happens in
//! [`BlockBootstrapDraws::p_values`], so the same draws can be reused against
//! any reference value.

use ft_core::{Error, Result};
use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::aggregate::ClusterStatistic;
use crate::variance::VarianceCorrection;

/// Parameters for one block-bootstrap run.
#[derive(Debug, Clone, Copy)]
pub struct BlockBootstrapConfig {
    /// Number of replications `B`.
    pub replications: usize,
    /// Seed for the replication index draws. Replication `b` uses
    /// `seed + b`, so results do not depend on thread scheduling.
    pub seed: u64,
}

/// Raw per-replication bootstrap statistics.
#[derive(Debug, Clone)]
pub struct BlockBootstrapDraws {
    /// Treated-minus-control contrast per replication, raw `W` values.
    pub unadjusted: Vec<f64>,
    /// Same contrast with variance-normalized values dealt into slots.
    pub adjusted: Vec<f64>,
}

/// The two block-bootstrap p-values for a given reference estimate.
#[derive(Debug, Clone, Copy)]
pub struct BlockPValues {
    /// From the unadjusted statistics.
    pub unadjusted: f64,
    /// From the variance-adjusted statistics.
    pub adjusted: f64,
}

impl BlockBootstrapDraws {
    /// Number of replications held.
    pub fn replications(&self) -> usize {
        self.unadjusted.len()
    }

    /// Two-sided p-values against `reference` (the full-model treatment
    /// coefficient): the fraction of replications whose squared statistic
    /// strictly exceeds `reference²`. NaN when the draw set is empty.
    pub fn p_values(&self, reference: f64) -> BlockPValues {
        BlockPValues {
            unadjusted: squared_exceedance(&self.unadjusted, reference),
            adjusted: squared_exceedance(&self.adjusted, reference),
        }
    }
}

fn squared_exceedance(draws: &[f64], reference: f64) -> f64 {
    let r2 = reference * reference;
    let n_over = draws.iter().filter(|&&d| d * d > r2).count();
    n_over as f64 / draws.len() as f64
}

/// One row of cluster-index draws per replication, each of length
/// `n_clusters`, uniform with replacement.
fn draw_index_rows(n_clusters: usize, replications: usize, seed: u64) -> Vec<Vec<usize>> {
    (0..replications)
        .into_par_iter()
        .map(|b| {
            let mut rng = StdRng::seed_from_u64(seed.wrapping_add(b as u64));
            (0..n_clusters).map(|_| rng.random_range(0..n_clusters)).collect()
        })
        .collect()
}

/// Run the block bootstrap over the per-cluster contrast statistics.
///
/// `correction.corrected[i]` must be the variance for `stats[i]`; both come
/// out of the aggregation and correction stages in cluster order.
pub fn run_block_bootstrap(
    stats: &[ClusterStatistic],
    correction: &VarianceCorrection,
    config: &BlockBootstrapConfig,
) -> Result<BlockBootstrapDraws> {
    if config.replications == 0 {
        return Err(Error::Validation("block bootstrap needs replications >= 1".into()));
    }
    let n = stats.len();
    if correction.corrected.len() != n {
        return Err(Error::Validation(format!(
            "corrected variances ({}) do not match clusters ({})",
            correction.corrected.len(),
            n
        )));
    }
    let n_treated = stats.iter().filter(|s| s.treated).count();
    if n_treated == 0 || n_treated == n {
        return Err(Error::Validation(format!(
            "block bootstrap needs both treated and control clusters (treated = {}, total = {})",
            n_treated, n
        )));
    }
    if let Some((i, &v)) = correction
        .corrected
        .iter()
        .enumerate()
        .find(|(_, v)| !(v.is_finite() && **v > 0.0))
    {
        return Err(Error::Validation(format!(
            "corrected variance for cluster {} must be positive, got {}",
            stats[i].cluster, v
        )));
    }

    let w: Vec<f64> = stats.iter().map(|s| s.w).collect();
    let sd: Vec<f64> = correction.corrected.iter().map(|v| v.sqrt()).collect();
    let w_norm: Vec<f64> = w.iter().zip(&sd).map(|(wi, si)| wi / si).collect();

    // Contrast over slots: treated slots average plainly, control slots get
    // population-share weights, treated minus control.
    let control_pop: f64 = stats.iter().filter(|s| !s.treated).map(|s| s.population).sum();
    if !(control_pop > 0.0) {
        return Err(Error::Validation("control clusters have zero total population".into()));
    }
    let contrast = DVector::from_fn(n, |i, _| {
        if stats[i].treated {
            1.0 / n_treated as f64
        } else {
            -stats[i].population / control_pop
        }
    });

    let rows = draw_index_rows(n, config.replications, config.seed);
    let b_total = rows.len();
    let unadj_values = DMatrix::from_fn(b_total, n, |b, i| w[rows[b][i]]);
    let adj_values = DMatrix::from_fn(b_total, n, |b, i| w_norm[rows[b][i]] * sd[i]);

    let unadjusted: Vec<f64> = (&unadj_values * &contrast).iter().copied().collect();
    let adjusted: Vec<f64> = (&adj_values * &contrast).iter().copied().collect();
    Ok(BlockBootstrapDraws { unadjusted, adjusted })
}
