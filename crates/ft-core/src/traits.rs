//! Core traits for FewTreat
//!
//! The resampling engines re-estimate the same regression thousands of times
//! with perturbed outcomes and placebo treatment columns. They depend on this
//! trait, not on a concrete estimator, so the estimator can be swapped (or
//! mocked in tests) without touching the engines.

use crate::Result;
use crate::types::{RegressionData, RegressionFit};

/// Linear estimator used by the inference engines.
///
/// Implementations fit outcome on (treatment | controls) with all fixed
/// effects absorbed, observation weights applied, and cluster-robust standard
/// errors. `Send + Sync` so a single backend instance can serve rayon workers.
pub trait RegressionBackend: Send + Sync {
    /// Fit one regression.
    ///
    /// Fails on singular designs or absorber breakdown; callers must treat
    /// any error as fatal for their task, never as a skippable draw.
    fn fit(&self, data: &RegressionData<'_>) -> Result<RegressionFit>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ZeroBackend;

    impl RegressionBackend for ZeroBackend {
        fn fit(&self, data: &RegressionData<'_>) -> Result<RegressionFit> {
            let n = data.n_obs();
            Ok(RegressionFit {
                coefficients: vec![0.0; data.n_regressors()],
                std_errors: vec![1.0; data.n_regressors()],
                residuals: data.outcome.to_vec(),
                fitted_values: vec![0.0; n],
                degrees_of_freedom: n.saturating_sub(data.n_regressors()),
                n_clusters: 1,
            })
        }
    }

    #[test]
    fn trait_object_safe() {
        let backend: &dyn RegressionBackend = &ZeroBackend;
        let outcome = [1.0, 2.0, 3.0];
        let weights = [1.0, 1.0, 1.0];
        let clusters = [0usize, 0, 1];
        let fe = vec![vec![0usize, 0, 1]];
        let data = RegressionData {
            outcome: &outcome,
            treatment: None,
            controls: &[],
            fixed_effects: &fe,
            weights: &weights,
            clusters: &clusters,
        };
        let fit = backend.fit(&data).unwrap();
        assert_eq!(fit.residuals.len(), 3);
        assert_eq!(fit.degrees_of_freedom, 3);
    }
}
