//! Calibration of the resampling p-values under a true null.
//!
//! With no treatment signal anywhere, a valid test's p-value is close to
//! uniform on [0, 1], so the average p across many independently simulated
//! panels must sit near 0.5. These runs repeat the full chain (null fit,
//! aggregation, correction, resampling) over fresh noise draws; the bands
//! are wide multiples of the Monte Carlo standard error of the mean, so a
//! failure indicates a real calibration defect (an inverted sign, a wrong
//! comparison direction, a dropped draw), not bad luck.

use std::collections::BTreeMap;

use ft_core::{RegressionBackend, RegressionData};
use ft_inference::{
    BlockBootstrapConfig, FixedEffect, InferenceConfig, ModelSpec, PanelData, TaskSpec,
    WlsFixedEffects, aggregate_cells, cluster_statistics, correct_variances,
    run_block_bootstrap, run_task,
};
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

fn null_panel(
    n_clusters: usize,
    two_groups: bool,
    obs_per_cell: usize,
    seed: u64,
) -> PanelData {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, 1.0).unwrap();
    let periods = [2000i64, 2001, 2002, 2003];
    let groups: &[u8] = if two_groups { &[0, 1] } else { &[0] };

    let mut cluster = Vec::new();
    let mut period = Vec::new();
    let mut group = Vec::new();
    let mut y = Vec::new();
    for c in 0..n_clusters {
        for &p in &periods {
            for &g in groups {
                for _ in 0..obs_per_cell {
                    cluster.push(c);
                    period.push(p);
                    group.push(g);
                    let level = 0.4 * c as f64 + 0.2 * (p - 2000) as f64;
                    y.push(level + noise.sample(&mut rng));
                }
            }
        }
    }
    let n = cluster.len();
    let mut outcomes = BTreeMap::new();
    outcomes.insert("y".to_string(), y);
    PanelData {
        cluster,
        period,
        group,
        weight: vec![1.0; n],
        outcomes,
        controls: BTreeMap::new(),
        treated_cluster: n_clusters - 1,
        post_start: 2002,
    }
}

#[test]
fn block_bootstrap_is_calibrated_under_the_null() {
    let backend = WlsFixedEffects::default();
    let n_tasks = 200;
    let mut sum_unadjusted = 0.0;
    let mut sum_adjusted = 0.0;

    for t in 0..n_tasks {
        let panel = null_panel(21, true, 1, 1000 + t as u64);
        let treatment = panel.treatment_for_cluster(panel.treated_cluster, true);
        let fixed_effects = panel
            .fixed_effect_dims(&[FixedEffect::Cluster, FixedEffect::Period])
            .unwrap();
        let outcome = panel.outcome("y").unwrap();

        let null_fit = backend
            .fit(&RegressionData {
                outcome,
                treatment: None,
                controls: &[],
                fixed_effects: &fixed_effects,
                weights: &panel.weight,
                clusters: &panel.cluster,
            })
            .unwrap();
        let full_fit = backend
            .fit(&RegressionData {
                outcome,
                treatment: Some(&treatment),
                controls: &[],
                fixed_effects: &fixed_effects,
                weights: &panel.weight,
                clusters: &panel.cluster,
            })
            .unwrap();

        let cells = aggregate_cells(&panel, &null_fit.residuals).unwrap();
        let stats = cluster_statistics(&panel, &cells).unwrap();
        let correction = correct_variances(&stats).unwrap();
        let draws = run_block_bootstrap(
            &stats,
            &correction,
            &BlockBootstrapConfig { replications: 200, seed: 5000 + t as u64 },
        )
        .unwrap();
        let p = draws.p_values(full_fit.coefficient());

        assert!((0.0..=1.0).contains(&p.unadjusted));
        assert!((0.0..=1.0).contains(&p.adjusted));
        sum_unadjusted += p.unadjusted;
        sum_adjusted += p.adjusted;
    }

    // sd of the mean of 200 uniform draws is ~0.02; the band is ~6σ wide.
    let mean_unadjusted = sum_unadjusted / n_tasks as f64;
    let mean_adjusted = sum_adjusted / n_tasks as f64;
    assert!(
        (0.38..=0.62).contains(&mean_unadjusted),
        "mean unadjusted p = {}",
        mean_unadjusted
    );
    assert!(
        (0.38..=0.62).contains(&mean_adjusted),
        "mean adjusted p = {}",
        mean_adjusted
    );
}

#[test]
fn randomization_inference_is_calibrated_under_the_null() {
    let backend = WlsFixedEffects::default();
    let task = TaskSpec {
        outcome: "y".to_string(),
        spec: ModelSpec {
            id: "base".to_string(),
            controls: Vec::new(),
            fixed_effects: vec![FixedEffect::Cluster, FixedEffect::Period],
            group_interacted: true,
        },
    };
    let n_tasks = 24;
    let mut sum_by_coefficient = 0.0;
    let mut sum_by_tstat = 0.0;

    for t in 0..n_tasks {
        let panel = null_panel(8, false, 2, 300 + t as u64);
        let config = InferenceConfig {
            block_replications: 100,
            wild_replications: 60,
            seed: 9000 + t as u64,
            keep_draws: false,
        };
        let result = run_task(&backend, &panel, &task, &config).unwrap().result;
        assert!((0.0..=1.0).contains(&result.p_randomization_coefficient));
        assert!((0.0..=1.0).contains(&result.p_randomization_tstat));
        sum_by_coefficient += result.p_randomization_coefficient;
        sum_by_tstat += result.p_randomization_tstat;
    }

    // sd of the mean of 24 uniform draws is ~0.06; the band is ~3.7σ wide.
    let mean_by_coefficient = sum_by_coefficient / n_tasks as f64;
    let mean_by_tstat = sum_by_tstat / n_tasks as f64;
    assert!(
        (0.28..=0.72).contains(&mean_by_coefficient),
        "mean p_beta = {}",
        mean_by_coefficient
    );
    assert!(
        (0.28..=0.72).contains(&mean_by_tstat),
        "mean p_t = {}",
        mean_by_tstat
    );
}
