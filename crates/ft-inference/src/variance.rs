//! Heteroskedasticity correction for the cluster contrast statistics.
//!
//! Cluster contrasts `W` from [`crate::aggregate`] have unequal variances
//! when clusters differ in size or cell precision. Before the adjusted block
//! bootstrap can compare them, each cluster needs a variance estimate. The
//! estimate comes from a weighted least-squares fit of `(W − mean(W))²` on
//! the precision proxy `q`, weighted by cluster population; the fitted
//! values are the corrected variances.
//!
//! With a handful of clusters that fit can predict negative variances. Two
//! ordered fallback rules recover: a negative minimum prediction with a
//! negative slope degrades to the constant 1 (no correction), a negative
//! minimum prediction with a negative intercept degrades to `q` itself. The
//! order of the checks matters and must not be swapped.

use ft_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::aggregate::ClusterStatistic;

/// Which rule produced the corrected variances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackBranch {
    /// Regression predictions were non-negative and used as-is.
    Fitted,
    /// Negative minimum prediction with a negative slope: constant 1.
    ConstantOne,
    /// Negative minimum prediction with a negative intercept: `q` itself.
    PrecisionProxy,
}

/// Corrected per-cluster variances plus the fit behind them.
#[derive(Debug, Clone)]
pub struct VarianceCorrection {
    /// One strictly positive variance per input cluster, input order.
    pub corrected: Vec<f64>,
    /// Intercept of the squared-deviation regression.
    pub intercept: f64,
    /// Slope of the squared-deviation regression.
    pub slope: f64,
    /// Rule that produced `corrected`.
    pub branch: FallbackBranch,
}

/// Fit the squared-deviation regression and apply the fallback policy.
///
/// Returns one corrected variance per cluster in input order. Every returned
/// value is strictly positive; if even the fallback rules cannot achieve
/// that (all contrasts identical, say) the task cannot proceed and an error
/// is returned.
pub fn correct_variances(stats: &[ClusterStatistic]) -> Result<VarianceCorrection> {
    if stats.len() < 2 {
        return Err(Error::Validation(format!(
            "variance correction needs at least 2 clusters, got {}",
            stats.len()
        )));
    }
    for stat in stats {
        if !(stat.q.is_finite() && stat.q > 0.0) {
            return Err(Error::Validation(format!(
                "cluster {} has an invalid precision proxy (q = {})",
                stat.cluster, stat.q
            )));
        }
        if !(stat.population.is_finite() && stat.population > 0.0) {
            return Err(Error::Validation(format!(
                "cluster {} has an invalid population weight ({})",
                stat.cluster, stat.population
            )));
        }
    }

    let n = stats.len();
    let w_mean = stats.iter().map(|s| s.w).sum::<f64>() / n as f64;
    // Response: squared deviation of the contrast from its cross-cluster mean.
    let y: Vec<f64> = stats.iter().map(|s| (s.w - w_mean) * (s.w - w_mean)).collect();

    let total_pop: f64 = stats.iter().map(|s| s.population).sum();
    let q_bar = stats.iter().map(|s| s.population * s.q).sum::<f64>() / total_pop;
    let y_bar = stats
        .iter()
        .zip(&y)
        .map(|(s, &yi)| s.population * yi)
        .sum::<f64>()
        / total_pop;

    let mut sxy = 0.0;
    let mut sxx = 0.0;
    for (s, &yi) in stats.iter().zip(&y) {
        let dx = s.q - q_bar;
        sxy += s.population * dx * (yi - y_bar);
        sxx += s.population * dx * dx;
    }
    // All q identical: the slope is unidentified, fall back to a flat fit at
    // the weighted mean response.
    let slope = if sxx > 0.0 { sxy / sxx } else { 0.0 };
    let intercept = y_bar - slope * q_bar;

    let predictions: Vec<f64> = stats.iter().map(|s| intercept + slope * s.q).collect();
    let min_prediction = predictions.iter().cloned().fold(f64::INFINITY, f64::min);

    let (corrected, branch) = if min_prediction < 0.0 && slope < 0.0 {
        log::warn!(
            "variance fit predicts a negative variance with slope {slope:.3e}; using constant 1"
        );
        (vec![1.0; n], FallbackBranch::ConstantOne)
    } else if min_prediction < 0.0 && intercept < 0.0 {
        log::warn!(
            "variance fit predicts a negative variance with intercept {intercept:.3e}; using the precision proxy"
        );
        (stats.iter().map(|s| s.q).collect(), FallbackBranch::PrecisionProxy)
    } else {
        (predictions, FallbackBranch::Fitted)
    };

    if let Some((idx, &value)) = corrected
        .iter()
        .enumerate()
        .find(|(_, v)| !(v.is_finite() && **v > 0.0))
    {
        return Err(Error::Computation(format!(
            "corrected variance for cluster {} is not positive ({}); contrasts are too degenerate to correct",
            stats[idx].cluster, value
        )));
    }

    Ok(VarianceCorrection { corrected, intercept, slope, branch })
}
