//! Weighted least squares with absorbed fixed effects and cluster-robust
//! standard errors.
//!
//! This is the linear estimator behind the `RegressionBackend` contract: the
//! orchestrator uses it for the baseline fits and the wild engine re-invokes
//! it on every synthetic outcome. Fixed effects are absorbed by
//! [`crate::hdfe::FixedEffectsAbsorber`]; the remaining design is solved by
//! weighted normal equations; the covariance is the Liang–Zeger (HC0)
//! cluster sandwich with the usual `G/(G−1) · (N−1)/(N−K)` correction.
//!
//! # References
//!
//! - Arellano (1987), "Computing robust standard errors for within-groups
//!   estimators."
//! - Cameron & Miller (2015), "A practitioner's guide to cluster-robust
//!   inference." *Journal of Human Resources*.

use ft_core::{Error, RegressionBackend, RegressionData, RegressionFit, Result};
use nalgebra::{DMatrix, DVector};
use statrs::distribution::{ContinuousCDF, StudentsT};

use crate::hdfe::FixedEffectsAbsorber;
use crate::panel::build_cluster_indices;

/// Weighted least squares with absorbed fixed effects.
///
/// Stateless apart from the absorber settings, so one instance can be shared
/// across all replications of a task.
#[derive(Debug, Clone)]
pub struct WlsFixedEffects {
    tol: f64,
    max_iter: usize,
}

impl Default for WlsFixedEffects {
    fn default() -> Self {
        Self { tol: 1e-10, max_iter: 10_000 }
    }
}

impl WlsFixedEffects {
    /// New backend with default absorber settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the absorber convergence tolerance.
    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    /// Set the absorber iteration bound.
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    fn validate(data: &RegressionData<'_>) -> Result<()> {
        let n = data.outcome.len();
        if n == 0 {
            return Err(Error::Validation("outcome must be non-empty".into()));
        }
        if let Some(t) = data.treatment {
            if t.len() != n {
                return Err(Error::Validation(format!(
                    "treatment length ({}) != n ({})",
                    t.len(),
                    n
                )));
            }
        }
        for (j, c) in data.controls.iter().enumerate() {
            if c.len() != n {
                return Err(Error::Validation(format!(
                    "control {} has length {}, expected {}",
                    j,
                    c.len(),
                    n
                )));
            }
        }
        if data.weights.len() != n {
            return Err(Error::Validation(format!(
                "weights length ({}) != n ({})",
                data.weights.len(),
                n
            )));
        }
        if data.clusters.len() != n {
            return Err(Error::Validation(format!(
                "clusters length ({}) != n ({})",
                data.clusters.len(),
                n
            )));
        }
        if data.fixed_effects.is_empty() {
            return Err(Error::Validation(
                "at least one fixed-effect dimension required".into(),
            ));
        }
        Ok(())
    }
}

impl RegressionBackend for WlsFixedEffects {
    fn fit(&self, data: &RegressionData<'_>) -> Result<RegressionFit> {
        Self::validate(data)?;
        let n = data.outcome.len();

        let absorber = FixedEffectsAbsorber::new(data.fixed_effects.to_vec(), data.weights)?
            .with_tol(self.tol)
            .with_max_iter(self.max_iter);
        let df_absorbed = absorber.degrees_of_freedom_absorbed();

        // Regressor columns, treatment first.
        let mut cols: Vec<&[f64]> = Vec::with_capacity(data.n_regressors());
        if let Some(t) = data.treatment {
            cols.push(t);
        }
        cols.extend_from_slice(data.controls);
        let p = cols.len();

        let y_abs = absorber.partial_out(data.outcome)?;
        let x_abs = absorber.partial_out_many(&cols)?;

        let cluster_rows = build_cluster_indices(data.clusters);
        let g = cluster_rows.iter().filter(|r| !r.is_empty()).count();

        // Null model with no explicit regressors: the absorbed outcome is
        // already the residual.
        if p == 0 {
            let fitted: Vec<f64> =
                data.outcome.iter().zip(&y_abs).map(|(&y, &e)| y - e).collect();
            return Ok(RegressionFit {
                coefficients: vec![],
                std_errors: vec![],
                residuals: y_abs,
                fitted_values: fitted,
                degrees_of_freedom: n.saturating_sub(df_absorbed),
                n_clusters: g,
            });
        }

        // Weighted normal equations on the absorbed design: scale rows by
        // sqrt(w) so X'X and X'y carry the weights.
        let sqrt_w: Vec<f64> = data.weights.iter().map(|&w| w.sqrt()).collect();
        let mut x_scaled = DMatrix::<f64>::zeros(n, p);
        for (j, col) in x_abs.iter().enumerate() {
            for i in 0..n {
                x_scaled[(i, j)] = sqrt_w[i] * col[i];
            }
        }
        let y_scaled = DVector::from_iterator(n, y_abs.iter().zip(&sqrt_w).map(|(&v, &s)| s * v));

        let xtx = x_scaled.transpose() * &x_scaled;
        let xty = x_scaled.transpose() * &y_scaled;
        let xtx_inv = xtx
            .try_inverse()
            .ok_or_else(|| Error::Computation("X'X is singular after absorption".into()))?;
        let beta = &xtx_inv * &xty;

        // Residuals and fitted values on the outcome scale. Fitted values
        // include the absorbed fixed effects: fitted = y − residual.
        let mut residuals = y_abs;
        for (j, col) in x_abs.iter().enumerate() {
            let bj = beta[j];
            for i in 0..n {
                residuals[i] -= bj * col[i];
            }
        }
        let fitted_values: Vec<f64> =
            data.outcome.iter().zip(&residuals).map(|(&y, &e)| y - e).collect();

        // Scaled residuals for the weighted sandwich scores.
        let resid_scaled =
            DVector::from_iterator(n, residuals.iter().zip(&sqrt_w).map(|(&e, &s)| s * e));

        let k_model = p + df_absorbed;
        let std_errors = cluster_robust_se(
            &x_scaled,
            &resid_scaled,
            &xtx_inv,
            &cluster_rows,
            k_model,
        )?;

        Ok(RegressionFit {
            coefficients: beta.iter().copied().collect(),
            std_errors,
            residuals,
            fitted_values,
            degrees_of_freedom: n.saturating_sub(k_model),
            n_clusters: g,
        })
    }
}

/// Liang–Zeger cluster-robust (HC0 sandwich) standard errors.
///
/// `V = c · (X'X)⁻¹ [Σ_g s_g s_g'] (X'X)⁻¹` with `s_g = X_g' e_g` and the
/// small-sample correction `c = G/(G−1) · (N−1)/(N−K)`; `k_model` counts the
/// explicit regressors plus the absorbed fixed-effect degrees of freedom.
fn cluster_robust_se(
    x: &DMatrix<f64>,
    residuals: &DVector<f64>,
    xtx_inv: &DMatrix<f64>,
    cluster_rows: &[Vec<usize>],
    k_model: usize,
) -> Result<Vec<f64>> {
    let n = x.nrows();
    let p = x.ncols();
    let g = cluster_rows.iter().filter(|r| !r.is_empty()).count() as f64;
    if g < 2.0 {
        return Err(Error::Validation("cluster-robust SE needs at least 2 clusters".into()));
    }

    let mut meat = DMatrix::<f64>::zeros(p, p);
    let mut s_g = vec![0.0_f64; p];
    for rows in cluster_rows {
        if rows.is_empty() {
            continue;
        }
        s_g.iter_mut().for_each(|v| *v = 0.0);
        for &i in rows {
            let e_i = residuals[i];
            for j in 0..p {
                s_g[j] += x[(i, j)] * e_i;
            }
        }
        for a in 0..p {
            for b in 0..p {
                meat[(a, b)] += s_g[a] * s_g[b];
            }
        }
    }

    let n_f = n as f64;
    let k_f = k_model as f64;
    let correction =
        if n_f > k_f { (g / (g - 1.0)) * ((n_f - 1.0) / (n_f - k_f)) } else { 1.0 };

    let vcr = (xtx_inv * &meat) * xtx_inv * correction;
    Ok((0..p).map(|j| vcr[(j, j)].max(0.0).sqrt()).collect())
}

/// Two-sided baseline p-value for a cluster-robust t statistic, using a
/// Student t reference with `G − 1` degrees of freedom.
pub fn crve_p_value(t_stat: f64, n_clusters: usize) -> Result<f64> {
    if n_clusters < 2 {
        return Err(Error::Validation("CRVE p-value needs at least 2 clusters".into()));
    }
    if !t_stat.is_finite() {
        return Err(Error::Computation(format!("non-finite t statistic: {}", t_stat)));
    }
    let dist = StudentsT::new(0.0, 1.0, (n_clusters - 1) as f64)
        .map_err(|e| Error::Computation(format!("Student t construction failed: {}", e)))?;
    Ok(2.0 * (1.0 - dist.cdf(t_stat.abs())))
}
