//! Common data types for FewTreat

use serde::{Deserialize, Serialize};

/// One regression problem handed to a
/// [`RegressionBackend`](crate::traits::RegressionBackend).
///
/// Columns are borrowed from the caller; the backend copies nothing until it
/// assembles its design matrix. `treatment = None` requests the null model
/// (treatment column excluded), which is how the resampling engines obtain
/// residuals and fitted values under the null hypothesis.
#[derive(Debug, Clone, Copy)]
pub struct RegressionData<'a> {
    /// Dependent variable (length n).
    pub outcome: &'a [f64],

    /// Treatment column of interest, or `None` for the null model.
    pub treatment: Option<&'a [f64]>,

    /// Control columns, each of length n.
    pub controls: &'a [&'a [f64]],

    /// Fixed-effect dimensions. Each entry maps observation index to a
    /// 0-based group level; all entries have length n.
    pub fixed_effects: &'a [Vec<usize>],

    /// Observation weights (length n, strictly positive).
    pub weights: &'a [f64],

    /// Cluster key for robust inference (length n, 0-based ids).
    pub clusters: &'a [usize],
}

impl<'a> RegressionData<'a> {
    /// Number of observations.
    pub fn n_obs(&self) -> usize {
        self.outcome.len()
    }

    /// Number of explicit regressors (treatment, if present, plus controls).
    pub fn n_regressors(&self) -> usize {
        usize::from(self.treatment.is_some()) + self.controls.len()
    }
}

/// Output of one linear fit.
///
/// Backends place the treatment column first whenever it is part of the
/// design, so `coefficients[0]` is the treatment effect for a full-model fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionFit {
    /// Coefficient estimates, treatment first when it was included.
    pub coefficients: Vec<f64>,

    /// Cluster-robust standard errors, aligned with `coefficients`.
    pub std_errors: Vec<f64>,

    /// Residuals on the outcome scale (y − fitted), length n.
    pub residuals: Vec<f64>,

    /// Fitted values including the absorbed fixed effects, length n.
    pub fitted_values: Vec<f64>,

    /// Residual degrees of freedom (n − regressors − absorbed).
    pub degrees_of_freedom: usize,

    /// Number of distinct clusters seen by the robust variance estimator.
    pub n_clusters: usize,
}

impl RegressionFit {
    /// Focal (first) coefficient. `NaN` for a design with no regressors.
    pub fn coefficient(&self) -> f64 {
        self.coefficients.first().copied().unwrap_or(f64::NAN)
    }

    /// Cluster-robust standard error of the focal coefficient.
    pub fn std_error(&self) -> f64 {
        self.std_errors.first().copied().unwrap_or(f64::NAN)
    }

    /// t-statistic of the focal coefficient.
    pub fn t_statistic(&self) -> f64 {
        self.coefficient() / self.std_error()
    }
}
