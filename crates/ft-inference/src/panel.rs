//! Columnar panel container consumed by the inference tasks.
//!
//! One `PanelData` holds the full estimation sample for a batch of tasks:
//! cluster / period / group keys, observation weights, and named outcome and
//! control columns. Treatment is never stored as a column; it is derived from
//! `treated_cluster` and `post_start` so the same panel serves the real
//! assignment and every placebo assignment.

use ft_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A fixed-effect dimension that can be absorbed by a specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixedEffect {
    /// One level per cluster.
    Cluster,
    /// One level per calendar period.
    Period,
    /// One level per group flag value.
    Group,
    /// Cluster × group interaction levels.
    ClusterByGroup,
    /// Period × group interaction levels.
    PeriodByGroup,
}

/// Columnar panel for one estimation sample.
///
/// All per-observation vectors share the same length. Cluster ids are dense
/// 0-based indices; `period` is a calendar value compared against
/// `post_start`; `group` is a 0/1 flag (0 everywhere for a two-way layout).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelData {
    /// Cluster id per observation (0-based, dense).
    pub cluster: Vec<usize>,
    /// Calendar period per observation.
    pub period: Vec<i64>,
    /// Group flag per observation (0 or 1).
    pub group: Vec<u8>,
    /// Observation weight (strictly positive).
    pub weight: Vec<f64>,
    /// Outcome columns by name.
    pub outcomes: BTreeMap<String, Vec<f64>>,
    /// Control columns by name.
    #[serde(default)]
    pub controls: BTreeMap<String, Vec<f64>>,
    /// Id of the single treated cluster.
    pub treated_cluster: usize,
    /// First treated period (inclusive).
    pub post_start: i64,
}

impl PanelData {
    /// Number of observations.
    pub fn n_obs(&self) -> usize {
        self.cluster.len()
    }

    /// Number of clusters (max id + 1; ids are required to be dense).
    pub fn n_clusters(&self) -> usize {
        self.cluster.iter().copied().max().map_or(0, |m| m + 1)
    }

    /// Whether `period` falls in the treated window.
    pub fn is_post(&self, period: i64) -> bool {
        period >= self.post_start
    }

    /// Whether both group flags are present in the sample.
    pub fn has_groups(&self) -> bool {
        self.group.iter().any(|&g| g == 0) && self.group.iter().any(|&g| g == 1)
    }

    /// Sorted distinct calendar periods.
    pub fn periods(&self) -> Vec<i64> {
        let mut p = self.period.clone();
        p.sort_unstable();
        p.dedup();
        p
    }

    /// Never-treated clusters in ascending id order.
    pub fn never_treated(&self) -> Vec<usize> {
        (0..self.n_clusters()).filter(|&c| c != self.treated_cluster).collect()
    }

    /// Check structural consistency of the panel.
    ///
    /// Cell-level balance (every cluster populated in every period × group
    /// cell) is checked later by the aggregator; this validates shapes, id
    /// ranges, weights, and the pre/post split.
    pub fn validate(&self) -> Result<()> {
        let n = self.n_obs();
        if n == 0 {
            return Err(Error::Validation("panel has no observations".into()));
        }
        for (name, len) in [
            ("period", self.period.len()),
            ("group", self.group.len()),
            ("weight", self.weight.len()),
        ] {
            if len != n {
                return Err(Error::Validation(format!(
                    "panel column `{}` has length {}, expected {}",
                    name, len, n
                )));
            }
        }
        if self.outcomes.is_empty() {
            return Err(Error::Validation("panel declares no outcome columns".into()));
        }
        for (name, col) in self.outcomes.iter().chain(self.controls.iter()) {
            if col.len() != n {
                return Err(Error::Validation(format!(
                    "panel column `{}` has length {}, expected {}",
                    name,
                    col.len(),
                    n
                )));
            }
            if col.iter().any(|v| !v.is_finite()) {
                return Err(Error::Validation(format!(
                    "panel column `{}` contains a non-finite value",
                    name
                )));
            }
        }
        if self.weight.iter().any(|&w| !w.is_finite() || w <= 0.0) {
            return Err(Error::Validation("weights must be finite and > 0".into()));
        }
        if self.group.iter().any(|&g| g > 1) {
            return Err(Error::Validation("group flags must be 0 or 1".into()));
        }

        let n_clusters = self.n_clusters();
        if n_clusters < 2 {
            return Err(Error::Validation("panel needs at least 2 clusters".into()));
        }
        let mut seen = vec![false; n_clusters];
        for &c in &self.cluster {
            seen[c] = true;
        }
        if let Some(missing) = seen.iter().position(|s| !s) {
            return Err(Error::Validation(format!(
                "cluster ids are not dense: id {} has no observations",
                missing
            )));
        }
        if self.treated_cluster >= n_clusters {
            return Err(Error::Validation(format!(
                "treated cluster {} outside id range 0..{}",
                self.treated_cluster, n_clusters
            )));
        }

        let has_pre = self.period.iter().any(|&p| !self.is_post(p));
        let has_post = self.period.iter().any(|&p| self.is_post(p));
        if !has_pre || !has_post {
            return Err(Error::Validation(format!(
                "panel needs both pre and post periods relative to post_start = {}",
                self.post_start
            )));
        }
        Ok(())
    }

    /// Look up an outcome column by name.
    pub fn outcome(&self, name: &str) -> Result<&[f64]> {
        self.outcomes
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::Validation(format!("unknown outcome column `{}`", name)))
    }

    /// Resolve control columns by name, preserving the requested order.
    pub fn resolve_controls(&self, names: &[String]) -> Result<Vec<&[f64]>> {
        names
            .iter()
            .map(|name| {
                self.controls
                    .get(name)
                    .map(Vec::as_slice)
                    .ok_or_else(|| Error::Validation(format!("unknown control column `{}`", name)))
            })
            .collect()
    }

    /// Treated-window indicator before masking to any cluster: post period,
    /// optionally interacted with the group flag.
    pub fn potential_treatment(&self, group_interacted: bool) -> Vec<f64> {
        let interact = group_interacted && self.has_groups();
        self.period
            .iter()
            .zip(&self.group)
            .map(|(&p, &g)| {
                let post = if self.is_post(p) { 1.0 } else { 0.0 };
                if interact { post * f64::from(g) } else { post }
            })
            .collect()
    }

    /// Treatment column for a (real or placebo) treated cluster: the
    /// potential-treatment pattern masked to observations of that cluster.
    pub fn treatment_for_cluster(&self, treated: usize, group_interacted: bool) -> Vec<f64> {
        let mut col = self.potential_treatment(group_interacted);
        for (ti, &c) in col.iter_mut().zip(&self.cluster) {
            if c != treated {
                *ti = 0.0;
            }
        }
        col
    }

    /// Fixed-effect level vectors for a specification, in the given order.
    pub fn fixed_effect_dims(&self, effects: &[FixedEffect]) -> Result<Vec<Vec<usize>>> {
        let period_index: BTreeMap<i64, usize> =
            self.periods().into_iter().enumerate().map(|(i, p)| (p, i)).collect();
        let period_level = |p: i64| period_index[&p];

        effects
            .iter()
            .map(|fe| {
                let dim: Vec<usize> = match fe {
                    FixedEffect::Cluster => self.cluster.clone(),
                    FixedEffect::Period => self.period.iter().map(|&p| period_level(p)).collect(),
                    FixedEffect::Group => self.group.iter().map(|&g| g as usize).collect(),
                    FixedEffect::ClusterByGroup => self
                        .cluster
                        .iter()
                        .zip(&self.group)
                        .map(|(&c, &g)| c * 2 + g as usize)
                        .collect(),
                    FixedEffect::PeriodByGroup => self
                        .period
                        .iter()
                        .zip(&self.group)
                        .map(|(&p, &g)| period_level(p) * 2 + g as usize)
                        .collect(),
                };
                Ok(dim)
            })
            .collect()
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Observation indices per cluster id: one row per cluster, ascending ids.
pub fn build_cluster_indices(clusters: &[usize]) -> Vec<Vec<usize>> {
    let n_clusters = clusters.iter().copied().max().map_or(0, |m| m + 1);
    let mut rows: Vec<Vec<usize>> = vec![Vec::new(); n_clusters];
    for (i, &c) in clusters.iter().enumerate() {
        rows[c].push(i);
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_panel() -> PanelData {
        // 3 clusters × 2 periods × 2 groups, one obs per cell.
        let mut cluster = Vec::new();
        let mut period = Vec::new();
        let mut group = Vec::new();
        for c in 0..3usize {
            for p in [2000i64, 2001] {
                for g in [0u8, 1] {
                    cluster.push(c);
                    period.push(p);
                    group.push(g);
                }
            }
        }
        let n = cluster.len();
        let mut outcomes = BTreeMap::new();
        outcomes.insert("y".to_string(), (0..n).map(|i| i as f64).collect());
        PanelData {
            cluster,
            period,
            group,
            weight: vec![1.0; n],
            outcomes,
            controls: BTreeMap::new(),
            treated_cluster: 2,
            post_start: 2001,
        }
    }

    #[test]
    fn validate_accepts_well_formed_panel() {
        let panel = small_panel();
        panel.validate().unwrap();
        assert_eq!(panel.n_obs(), 12);
        assert_eq!(panel.n_clusters(), 3);
        assert!(panel.has_groups());
        assert_eq!(panel.periods(), vec![2000, 2001]);
        assert_eq!(panel.never_treated(), vec![0, 1]);
    }

    #[test]
    fn validate_rejects_bad_shapes() {
        let mut panel = small_panel();
        panel.weight.pop();
        assert!(panel.validate().is_err());

        let mut panel = small_panel();
        panel.weight[3] = 0.0;
        assert!(panel.validate().is_err());

        let mut panel = small_panel();
        panel.treated_cluster = 9;
        assert!(panel.validate().is_err());

        // All periods post.
        let mut panel = small_panel();
        panel.post_start = 1999;
        assert!(panel.validate().is_err());

        // Non-dense cluster ids.
        let mut panel = small_panel();
        for c in panel.cluster.iter_mut() {
            if *c == 1 {
                *c = 0;
            }
        }
        assert!(panel.validate().is_err());
    }

    #[test]
    fn treatment_masking() {
        let panel = small_panel();
        let treat = panel.treatment_for_cluster(panel.treated_cluster, true);
        // Nonzero only for cluster 2, period 2001, group 1.
        for (i, &t) in treat.iter().enumerate() {
            let expect = panel.cluster[i] == 2 && panel.period[i] == 2001 && panel.group[i] == 1;
            assert_eq!(t, if expect { 1.0 } else { 0.0 });
        }

        let treat_any_group = panel.treatment_for_cluster(2, false);
        let n_on = treat_any_group.iter().filter(|&&t| t == 1.0).count();
        assert_eq!(n_on, 2); // both groups in the post period
    }

    #[test]
    fn potential_treatment_covers_all_clusters() {
        let panel = small_panel();
        let pot = panel.potential_treatment(true);
        let n_on = pot.iter().filter(|&&t| t == 1.0).count();
        assert_eq!(n_on, 3); // one post×group-1 cell per cluster
    }

    #[test]
    fn fixed_effect_levels() {
        let panel = small_panel();
        let dims = panel
            .fixed_effect_dims(&[FixedEffect::Cluster, FixedEffect::Period, FixedEffect::Group])
            .unwrap();
        assert_eq!(dims.len(), 3);
        assert_eq!(dims[0], panel.cluster);
        assert_eq!(dims[1][0], 0); // period 2000
        assert_eq!(dims[1][2], 1); // period 2001
        assert_eq!(dims[2][1], 1); // group 1

        let interacted = panel.fixed_effect_dims(&[FixedEffect::ClusterByGroup]).unwrap();
        assert_eq!(interacted[0][0], 0); // cluster 0 × group 0
        assert_eq!(interacted[0][1], 1); // cluster 0 × group 1
        assert_eq!(*interacted[0].iter().max().unwrap(), 5);
    }

    #[test]
    fn cluster_index_rows() {
        let rows = build_cluster_indices(&[0, 1, 1, 2, 0]);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], vec![0, 4]);
        assert_eq!(rows[1], vec![1, 2]);
        assert_eq!(rows[2], vec![3]);
    }

    #[test]
    fn json_round_trip() {
        let panel = small_panel();
        let json = panel.to_json().unwrap();
        let back = PanelData::from_json(&json).unwrap();
        assert_eq!(back.n_obs(), panel.n_obs());
        assert_eq!(back.treated_cluster, panel.treated_cluster);
        assert_eq!(back.outcomes["y"], panel.outcomes["y"]);
    }
}
