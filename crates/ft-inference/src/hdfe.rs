//! Weighted fixed-effects absorption via the Method of Alternating
//! Projections (MAP).
//!
//! The weighted-least-squares estimator in [`crate::regression`] absorbs its
//! fixed effects by projecting each variable onto the orthogonal complement
//! of the dummy span under the weighted inner product: every projection pass
//! subtracts weighted group means. One dimension is exact in a single pass;
//! two or more dimensions alternate until the largest weighted group mean
//! falls below the tolerance, with Aitken Δ² acceleration on the iterates.
//!
//! # References
//!
//! - Correia (2017), "Linear Models with High-Dimensional Fixed Effects:
//!   An Efficient and Feasible Estimator." Working paper.
//! - Gaure (2013), "OLS with multiple high dimensional category variables."
//!   *Computational Statistics & Data Analysis*.

use ft_core::{Error, Result};
use std::collections::HashSet;

/// Default convergence tolerance (L∞ of weighted group means).
const DEFAULT_TOL: f64 = 1e-10;

/// Maximum MAP iterations (safety bound).
const DEFAULT_MAX_ITER: usize = 10_000;

/// Absorber for one or more fixed-effect dimensions under observation
/// weights.
///
/// Each dimension is a `Vec<usize>` mapping observation index to a 0-based
/// group level. Weighted demeaning with weights identically 1 reduces to the
/// ordinary within transform.
///
/// # Degrees of freedom
///
/// For 2-way specifications the absorbed df is exact via Union-Find on the
/// bipartite (dim0, dim1) graph:
/// `df = n_levels_0 + n_levels_1 − n_connected_components`.
#[derive(Debug, Clone)]
pub struct FixedEffectsAbsorber {
    /// Number of observations.
    n: usize,
    /// For each dimension: group_of\[i\] = group index for observation i.
    group_of: Vec<Vec<usize>>,
    /// For each dimension: number of distinct groups.
    n_levels: Vec<usize>,
    /// For each dimension d, for each group g: observation indices.
    group_indices: Vec<Vec<Vec<usize>>>,
    /// For each dimension d, for each group g: total weight.
    group_weight: Vec<Vec<f64>>,
    /// Observation weights.
    weights: Vec<f64>,
    /// Convergence tolerance (L∞ norm of weighted group means).
    tol: f64,
    /// Maximum number of MAP iterations.
    max_iter: usize,
}

impl FixedEffectsAbsorber {
    /// Create an absorber over `groups` (one entry per dimension, each of
    /// length n) with strictly positive observation `weights`.
    pub fn new(groups: Vec<Vec<usize>>, weights: &[f64]) -> Result<Self> {
        if groups.is_empty() {
            return Err(Error::Validation("at least one fixed-effect dimension required".into()));
        }
        let n = groups[0].len();
        if n == 0 {
            return Err(Error::Validation("n must be > 0".into()));
        }
        for (d, g) in groups.iter().enumerate() {
            if g.len() != n {
                return Err(Error::Validation(format!(
                    "fixed-effect dimension {} has length {}, expected {}",
                    d,
                    g.len(),
                    n
                )));
            }
        }
        if weights.len() != n {
            return Err(Error::Validation(format!(
                "weights length ({}) != n ({})",
                weights.len(),
                n
            )));
        }
        if weights.iter().any(|&w| !w.is_finite() || w <= 0.0) {
            return Err(Error::Validation("weights must be finite and > 0".into()));
        }

        let mut n_levels = Vec::with_capacity(groups.len());
        let mut group_indices = Vec::with_capacity(groups.len());
        let mut group_weight = Vec::with_capacity(groups.len());
        for g in &groups {
            let max_g = g.iter().copied().max().unwrap_or(0);
            let nl = max_g + 1;
            n_levels.push(nl);
            let mut idx: Vec<Vec<usize>> = vec![Vec::new(); nl];
            let mut wsum = vec![0.0_f64; nl];
            for (i, &gi) in g.iter().enumerate() {
                idx[gi].push(i);
                wsum[gi] += weights[i];
            }
            group_indices.push(idx);
            group_weight.push(wsum);
        }

        Ok(Self {
            n,
            group_of: groups,
            n_levels,
            group_indices,
            group_weight,
            weights: weights.to_vec(),
            tol: DEFAULT_TOL,
            max_iter: DEFAULT_MAX_ITER,
        })
    }

    /// Set convergence tolerance.
    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    /// Set maximum iterations.
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// Number of fixed-effect dimensions.
    pub fn n_dimensions(&self) -> usize {
        self.group_of.len()
    }

    /// Total number of observations.
    pub fn n_obs(&self) -> usize {
        self.n
    }

    /// Partial out (absorb) all fixed effects from a single vector.
    ///
    /// Returns the vector after removing weighted group means iteratively
    /// until convergence. Fails if the alternating projections have not
    /// converged within the iteration bound, since every downstream
    /// re-estimation requires an exact absorption.
    pub fn partial_out(&self, v: &[f64]) -> Result<Vec<f64>> {
        if v.len() != self.n {
            return Err(Error::Validation(format!("v length ({}) != n ({})", v.len(), self.n)));
        }

        let mut resid = v.to_vec();

        // Single dimension: one weighted pass is exact.
        if self.group_of.len() == 1 {
            self.demean_dim(&mut resid, 0);
            return Ok(resid);
        }

        // Multiple dimensions: MAP with Aitken Δ² acceleration. Every third
        // sweep extrapolates element-wise from three consecutive iterates:
        //   r_acc[i] = r0[i] − (r1[i]−r0[i])² / (r2[i] − 2·r1[i] + r0[i])
        let n = self.n;
        let mut r0 = vec![0.0_f64; n];
        let mut r1 = vec![0.0_f64; n];
        let mut phase = 0u8;

        for _iter in 0..self.max_iter {
            match phase {
                0 => {
                    r0.copy_from_slice(&resid);
                    phase = 1;
                }
                1 => {
                    r1.copy_from_slice(&resid);
                    phase = 2;
                }
                2 => {
                    for i in 0..n {
                        let denom = resid[i] - 2.0 * r1[i] + r0[i];
                        if denom.abs() > 1e-30 {
                            let delta = r1[i] - r0[i];
                            resid[i] = r0[i] - delta * delta / denom;
                        }
                    }
                    phase = 0;
                }
                _ => unreachable!(),
            }

            for d in 0..self.group_of.len() {
                self.demean_dim(&mut resid, d);
            }

            if self.max_group_mean_abs(&resid) < self.tol {
                return Ok(resid);
            }
        }

        Err(Error::Computation(format!(
            "fixed-effects absorption did not converge in {} iterations (tol {:e})",
            self.max_iter, self.tol
        )))
    }

    /// Partial out fixed effects from several vectors.
    pub fn partial_out_many(&self, cols: &[&[f64]]) -> Result<Vec<Vec<f64>>> {
        cols.iter().map(|c| self.partial_out(c)).collect()
    }

    /// Degrees of freedom absorbed by the fixed effects.
    ///
    /// - 1-way: `n_levels − 1`.
    /// - 2-way: `n_levels_0 + n_levels_1 − n_connected_components` (exact).
    /// - k-way (k > 2): `Σ n_levels_d − 1` (assumes one component).
    pub fn degrees_of_freedom_absorbed(&self) -> usize {
        let k = self.group_of.len();
        if k == 1 {
            return self.n_levels[0].saturating_sub(1);
        }

        let n_components =
            if k == 2 { self.count_connected_components_2way() } else { 1 };

        let total_levels: usize = self.n_levels.iter().sum();
        total_levels.saturating_sub(n_components)
    }

    // ------------------------------------------------------------------
    // Internal helpers
    // ------------------------------------------------------------------

    /// Single weighted demeaning pass for one dimension (in-place).
    fn demean_dim(&self, v: &mut [f64], d: usize) {
        for (group_obs, &wsum) in self.group_indices[d].iter().zip(&self.group_weight[d]) {
            if group_obs.is_empty() {
                continue;
            }
            let mut sum = 0.0;
            for &i in group_obs {
                sum += self.weights[i] * v[i];
            }
            let mean = sum / wsum;
            for &i in group_obs {
                v[i] -= mean;
            }
        }
    }

    /// Maximum absolute weighted group mean across all dimensions.
    fn max_group_mean_abs(&self, v: &[f64]) -> f64 {
        let mut max_val = 0.0_f64;
        for d in 0..self.group_of.len() {
            for (group_obs, &wsum) in self.group_indices[d].iter().zip(&self.group_weight[d]) {
                if group_obs.is_empty() {
                    continue;
                }
                let mut sum = 0.0;
                for &i in group_obs {
                    sum += self.weights[i] * v[i];
                }
                let abs_mean = (sum / wsum).abs();
                if abs_mean > max_val {
                    max_val = abs_mean;
                }
            }
        }
        max_val
    }

    /// Connected components of the bipartite (dim0, dim1) graph.
    fn count_connected_components_2way(&self) -> usize {
        let n0 = self.n_levels[0];
        let n1 = self.n_levels[1];
        let total = n0 + n1;

        let mut parent: Vec<usize> = (0..total).collect();
        let mut rank = vec![0u8; total];

        for i in 0..self.n {
            let a = self.group_of[0][i];
            let b = n0 + self.group_of[1][i];
            uf_union(&mut parent, &mut rank, a, b);
        }

        let mut used = vec![false; total];
        for i in 0..self.n {
            used[self.group_of[0][i]] = true;
            used[n0 + self.group_of[1][i]] = true;
        }

        let mut roots = HashSet::new();
        for node in 0..total {
            if used[node] {
                roots.insert(uf_find(&mut parent, node));
            }
        }
        roots.len()
    }
}

// ------------------------------------------------------------------
// Union-Find helpers (module-private)
// ------------------------------------------------------------------

fn uf_find(parent: &mut [usize], mut x: usize) -> usize {
    while parent[x] != x {
        parent[x] = parent[parent[x]]; // path halving
        x = parent[x];
    }
    x
}

fn uf_union(parent: &mut [usize], rank: &mut [u8], a: usize, b: usize) {
    let ra = uf_find(parent, a);
    let rb = uf_find(parent, b);
    if ra == rb {
        return;
    }
    if rank[ra] < rank[rb] {
        parent[ra] = rb;
    } else if rank[ra] > rank[rb] {
        parent[rb] = ra;
    } else {
        parent[rb] = ra;
        rank[ra] += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_dim_weighted_one_pass() {
        // Two groups of two obs each with uneven weights.
        let groups = vec![vec![0, 0, 1, 1]];
        let weights = [1.0, 3.0, 2.0, 2.0];
        let absorber = FixedEffectsAbsorber::new(groups, &weights).unwrap();

        let v = vec![2.0, 6.0, 10.0, 20.0];
        let r = absorber.partial_out(&v).unwrap();
        // Group 0 weighted mean = (1*2 + 3*6)/4 = 5; group 1 = (2*10+2*20)/4 = 15.
        assert!((r[0] - (-3.0)).abs() < 1e-12);
        assert!((r[1] - 1.0).abs() < 1e-12);
        assert!((r[2] - (-5.0)).abs() < 1e-12);
        assert!((r[3] - 5.0).abs() < 1e-12);
    }

    #[test]
    fn unit_weights_match_plain_demeaning() {
        let groups = vec![vec![0, 0, 0, 1, 1, 1]];
        let weights = [1.0; 6];
        let absorber = FixedEffectsAbsorber::new(groups, &weights).unwrap();
        let v = vec![1.0, 2.0, 3.0, 10.0, 20.0, 30.0];
        let r = absorber.partial_out(&v).unwrap();
        assert!((r[0] - (-1.0)).abs() < 1e-12);
        assert!((r[1] - 0.0).abs() < 1e-12);
        assert!((r[2] - 1.0).abs() < 1e-12);
        assert!((r[3] - (-10.0)).abs() < 1e-12);
        assert!((r[5] - 10.0).abs() < 1e-12);
    }

    #[test]
    fn two_way_weighted_converges() {
        // 2 entities × 3 periods, additive structure must vanish exactly.
        let entity = vec![0, 0, 0, 1, 1, 1];
        let time = vec![0, 1, 2, 0, 1, 2];
        let weights = [1.0, 2.0, 1.5, 0.5, 1.0, 2.5];
        let absorber = FixedEffectsAbsorber::new(vec![entity, time], &weights).unwrap();

        // y = entity_fe + time_fe: [5,10] and [1,2,3].
        let y = vec![6.0, 7.0, 8.0, 11.0, 12.0, 13.0];
        let r = absorber.partial_out(&y).unwrap();
        for (i, &ri) in r.iter().enumerate() {
            assert!(ri.abs() < 1e-7, "resid[{}] = {} (expected ~0)", i, ri);
        }
    }

    #[test]
    fn two_way_weighted_group_means_vanish() {
        let entity = vec![0, 0, 0, 1, 1];
        let time = vec![0, 1, 2, 1, 2];
        let weights = [2.0, 1.0, 1.0, 3.0, 1.0];
        let absorber =
            FixedEffectsAbsorber::new(vec![entity.clone(), time.clone()], &weights).unwrap();

        let y = vec![10.0, 20.0, 30.0, 25.0, 35.0];
        let r = absorber.partial_out(&y).unwrap();

        // Weighted means of residuals within every entity and period ~ 0.
        let wmean = |idx: &[usize]| {
            let num: f64 = idx.iter().map(|&i| weights[i] * r[i]).sum();
            let den: f64 = idx.iter().map(|&i| weights[i]).sum();
            num / den
        };
        assert!(wmean(&[0, 1, 2]).abs() < 1e-8);
        assert!(wmean(&[3, 4]).abs() < 1e-8);
        assert!(wmean(&[1, 3]).abs() < 1e-8);
        assert!(wmean(&[2, 4]).abs() < 1e-8);
    }

    #[test]
    fn degrees_of_freedom_one_way() {
        let absorber =
            FixedEffectsAbsorber::new(vec![vec![0, 0, 1, 1, 2, 2]], &[1.0; 6]).unwrap();
        assert_eq!(absorber.degrees_of_freedom_absorbed(), 2);
    }

    #[test]
    fn degrees_of_freedom_two_way_connected() {
        let entity = vec![0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2];
        let time = vec![0, 1, 2, 3, 0, 1, 2, 3, 0, 1, 2, 3];
        let absorber = FixedEffectsAbsorber::new(vec![entity, time], &[1.0; 12]).unwrap();
        // 3 + 4 − 1 component = 6.
        assert_eq!(absorber.degrees_of_freedom_absorbed(), 6);
    }

    #[test]
    fn degrees_of_freedom_two_way_disconnected() {
        let entity = vec![0, 0, 1, 1];
        let time = vec![0, 1, 2, 3];
        let absorber = FixedEffectsAbsorber::new(vec![entity, time], &[1.0; 4]).unwrap();
        // 2 entities + 4 periods − 2 components = 4.
        assert_eq!(absorber.degrees_of_freedom_absorbed(), 4);
    }

    #[test]
    fn validation_errors() {
        assert!(FixedEffectsAbsorber::new(vec![], &[]).is_err());
        assert!(FixedEffectsAbsorber::new(vec![vec![]], &[]).is_err());
        assert!(FixedEffectsAbsorber::new(vec![vec![0, 1], vec![0]], &[1.0, 1.0]).is_err());
        assert!(FixedEffectsAbsorber::new(vec![vec![0, 1]], &[1.0]).is_err());
        assert!(FixedEffectsAbsorber::new(vec![vec![0, 1]], &[1.0, -1.0]).is_err());

        let absorber = FixedEffectsAbsorber::new(vec![vec![0, 0, 1, 1]], &[1.0; 4]).unwrap();
        assert!(absorber.partial_out(&[1.0, 2.0]).is_err());
    }

    #[test]
    fn non_convergence_is_an_error() {
        let entity = vec![0, 0, 0, 1, 1, 1];
        let time = vec![0, 1, 2, 0, 1, 2];
        let weights = [1.0, 2.0, 1.0, 3.0, 1.0, 2.0];
        let absorber = FixedEffectsAbsorber::new(vec![entity, time], &weights)
            .unwrap()
            .with_tol(1e-14)
            .with_max_iter(1);
        let y = vec![6.0, 7.0, 8.0, 11.0, 12.0, 13.0];
        assert!(absorber.partial_out(&y).is_err());
    }
}
