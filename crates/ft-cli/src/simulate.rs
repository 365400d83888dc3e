//! `fewtreat simulate`: synthetic panels for demos and calibration studies.

use anyhow::Result;
use ft_inference::PanelData;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[allow(clippy::too_many_arguments)]
pub fn cmd_simulate(
    output: Option<&PathBuf>,
    clusters: usize,
    periods: usize,
    post_periods: usize,
    obs_per_cell: usize,
    two_groups: bool,
    effect: f64,
    seed: u64,
) -> Result<()> {
    let panel =
        synthetic_panel(clusters, periods, post_periods, obs_per_cell, two_groups, effect, seed)?;
    tracing::info!(
        observations = panel.n_obs(),
        clusters = panel.n_clusters(),
        post_start = panel.post_start,
        "panel simulated"
    );
    crate::write_json(output, serde_json::to_value(&panel)?)
}

/// Build a balanced panel with cluster and period effects, one control
/// column `x1` entering the outcome with coefficient 0.5, and an optional
/// shift added to treated post observations (group 1 when two groups are
/// present). Cluster 0 is the treated cluster; periods start at 2000.
fn synthetic_panel(
    clusters: usize,
    periods: usize,
    post_periods: usize,
    obs_per_cell: usize,
    two_groups: bool,
    effect: f64,
    seed: u64,
) -> Result<PanelData> {
    anyhow::ensure!(clusters >= 2, "need at least 2 clusters, got {clusters}");
    anyhow::ensure!(
        periods >= 2 && post_periods >= 1 && post_periods < periods,
        "need pre and post periods, got {periods} with {post_periods} post"
    );
    anyhow::ensure!(obs_per_cell >= 1, "need at least 1 observation per cell");

    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, 1.0).expect("unit normal parameters are valid");
    let post_start = 2000 + (periods - post_periods) as i64;
    let group_flags: &[u8] = if two_groups { &[0, 1] } else { &[0] };

    let cluster_effects: Vec<f64> = (0..clusters).map(|_| noise.sample(&mut rng)).collect();
    let period_effects: Vec<f64> = (0..periods).map(|_| noise.sample(&mut rng)).collect();

    let n = clusters * periods * group_flags.len() * obs_per_cell;
    let mut cluster = Vec::with_capacity(n);
    let mut period = Vec::with_capacity(n);
    let mut group = Vec::with_capacity(n);
    let mut weight = Vec::with_capacity(n);
    let mut y = Vec::with_capacity(n);
    let mut x1 = Vec::with_capacity(n);

    for c in 0..clusters {
        for t in 0..periods {
            let p = 2000 + t as i64;
            for &g in group_flags {
                for _ in 0..obs_per_cell {
                    let x = noise.sample(&mut rng);
                    let treated = c == 0 && p >= post_start && (!two_groups || g == 1);
                    let mut value = cluster_effects[c]
                        + period_effects[t]
                        + 0.5 * x
                        + 0.5 * noise.sample(&mut rng);
                    if treated {
                        value += effect;
                    }
                    cluster.push(c);
                    period.push(p);
                    group.push(g);
                    weight.push(rng.random_range(0.5..1.5));
                    y.push(value);
                    x1.push(x);
                }
            }
        }
    }

    Ok(PanelData {
        cluster,
        period,
        group,
        weight,
        outcomes: BTreeMap::from([("y".to_string(), y)]),
        controls: BTreeMap::from([("x1".to_string(), x1)]),
        treated_cluster: 0,
        post_start,
    })
}
