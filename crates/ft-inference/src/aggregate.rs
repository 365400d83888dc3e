//! Cluster×period×group aggregation of null-model residuals.
//!
//! The block bootstrap never touches observation-level data: it works on one
//! contrast statistic `W` per cluster, built from weighted residual means of
//! the cluster's period×group cells, plus a precision proxy `q` that carries
//! how precisely each cell mean is estimated. This module produces both.
//!
//! Sign convention for the contrast (pinned by a known-answer test below):
//! a cell enters `W` with coefficient `s_g · s_t / n_periods(bucket)`, where
//! `s_t` is +1 for post periods and −1 for pre periods, and `s_g` is +1 for
//! group 1 and −1 for group 0 (identically +1 when the panel has a single
//! group). `W` is therefore the post-minus-pre difference of the group
//! contrast, the residual-scale analogue of the treatment coefficient.

use ft_core::{Error, Result};

use crate::panel::PanelData;

/// One cluster×period×group cell of the aggregated residual table.
#[derive(Debug, Clone)]
pub struct Cell {
    /// Cluster id.
    pub cluster: usize,
    /// Calendar period.
    pub period: i64,
    /// Group flag.
    pub group: u8,
    /// Weighted mean of null-model residuals in the cell.
    pub weighted_residual_mean: f64,
    /// Total weight in the cell.
    pub sum_weight: f64,
    /// Sum of squared weights in the cell.
    pub sum_weight_squared: f64,
}

impl Cell {
    /// `Σw² / (Σw)²`: the variance of the cell mean per unit of residual
    /// variance. Feeds the cluster precision proxy.
    pub fn precision_ratio(&self) -> f64 {
        self.sum_weight_squared / (self.sum_weight * self.sum_weight)
    }
}

/// Per-cluster contrast statistic consumed by the variance correction and
/// the block bootstrap. Exactly one row per cluster in the sample.
#[derive(Debug, Clone)]
pub struct ClusterStatistic {
    /// Cluster id.
    pub cluster: usize,
    /// Signed pre/post (and group) contrast of weighted residual means.
    pub w: f64,
    /// Precision proxy: contrast-weighted sum of cell precision ratios.
    pub q: f64,
    /// Total weight of the cluster across all its cells.
    pub population: f64,
    /// Whether this is the treated cluster.
    pub treated: bool,
}

/// Collapse observation-level residuals to cluster×period×group cells.
///
/// Every cluster must populate every (period, group) combination present in
/// the panel; a missing or zero-weight cell makes the contrast ill-defined
/// and is a fatal validation error.
pub fn aggregate_cells(panel: &PanelData, residuals: &[f64]) -> Result<Vec<Cell>> {
    let n = panel.n_obs();
    if residuals.len() != n {
        return Err(Error::Validation(format!(
            "residuals length ({}) != panel observations ({})",
            residuals.len(),
            n
        )));
    }

    let periods = panel.periods();
    let groups: Vec<u8> = if panel.has_groups() {
        vec![0, 1]
    } else {
        vec![panel.group.first().copied().unwrap_or(0)]
    };
    let n_clusters = panel.n_clusters();
    let n_periods = periods.len();
    let n_groups = groups.len();

    // periods() is sorted and contains every period value in the panel.
    let period_slot = |p: i64| periods.binary_search(&p).expect("period taken from the panel");
    let group_slot = |g: u8| if n_groups == 1 { 0 } else { g as usize };

    let n_cells = n_clusters * n_periods * n_groups;
    let mut sum_we = vec![0.0_f64; n_cells];
    let mut sum_w = vec![0.0_f64; n_cells];
    let mut sum_w2 = vec![0.0_f64; n_cells];

    for i in 0..n {
        let slot = (panel.cluster[i] * n_periods + period_slot(panel.period[i])) * n_groups
            + group_slot(panel.group[i]);
        let w = panel.weight[i];
        sum_we[slot] += w * residuals[i];
        sum_w[slot] += w;
        sum_w2[slot] += w * w;
    }

    let mut cells = Vec::with_capacity(n_cells);
    for c in 0..n_clusters {
        for (pi, &p) in periods.iter().enumerate() {
            for (gi, &g) in groups.iter().enumerate() {
                let slot = (c * n_periods + pi) * n_groups + gi;
                if sum_w[slot] <= 0.0 {
                    return Err(Error::Validation(format!(
                        "cluster {} has no weight in period {}, group {}: contrast cannot be formed",
                        c, p, g
                    )));
                }
                cells.push(Cell {
                    cluster: c,
                    period: p,
                    group: g,
                    weighted_residual_mean: sum_we[slot] / sum_w[slot],
                    sum_weight: sum_w[slot],
                    sum_weight_squared: sum_w2[slot],
                });
            }
        }
    }
    Ok(cells)
}

/// Reduce cells to one [`ClusterStatistic`] per cluster.
pub fn cluster_statistics(panel: &PanelData, cells: &[Cell]) -> Result<Vec<ClusterStatistic>> {
    let periods = panel.periods();
    let n_post = periods.iter().filter(|&&p| panel.is_post(p)).count();
    let n_pre = periods.len() - n_post;
    if n_pre == 0 || n_post == 0 {
        return Err(Error::Validation(format!(
            "contrast needs both pre and post periods (pre = {}, post = {})",
            n_pre, n_post
        )));
    }
    let two_groups = panel.has_groups();
    let n_clusters = panel.n_clusters();

    let coefficient = |period: i64, group: u8| -> f64 {
        let (s_t, bucket) = if panel.is_post(period) {
            (1.0, n_post as f64)
        } else {
            (-1.0, n_pre as f64)
        };
        let s_g = if !two_groups {
            1.0
        } else if group == 1 {
            1.0
        } else {
            -1.0
        };
        s_g * s_t / bucket
    };

    let mut stats: Vec<ClusterStatistic> = (0..n_clusters)
        .map(|c| ClusterStatistic {
            cluster: c,
            w: 0.0,
            q: 0.0,
            population: 0.0,
            treated: c == panel.treated_cluster,
        })
        .collect();

    for cell in cells {
        if cell.cluster >= n_clusters {
            return Err(Error::Validation(format!(
                "cell references cluster {} outside 0..{}",
                cell.cluster, n_clusters
            )));
        }
        let a = coefficient(cell.period, cell.group);
        let stat = &mut stats[cell.cluster];
        stat.w += a * cell.weighted_residual_mean;
        stat.q += a * a * cell.precision_ratio();
        stat.population += cell.sum_weight;
    }

    for stat in &stats {
        if !(stat.q.is_finite() && stat.q > 0.0) {
            return Err(Error::Validation(format!(
                "cluster {} has a degenerate precision proxy (q = {})",
                stat.cluster, stat.q
            )));
        }
    }
    Ok(stats)
}
