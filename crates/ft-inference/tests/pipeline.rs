//! End-to-end pipeline tests on synthetic panels.
//!
//! Covers the contract of a full inference task:
//! - every reported p-value lies in [0, 1]
//! - identical seeds reproduce bit-identical p-values
//! - different seeds agree within Monte Carlo tolerance
//! - a treated cluster with no post-period change is not flagged
//! - the orchestrator reports the same baseline fit a direct call gives

use std::collections::BTreeMap;

use ft_core::{RegressionBackend, RegressionData};
use ft_inference::{
    FixedEffect, InferenceConfig, ModelSpec, PanelData, TaskSpec, WlsFixedEffects,
    run_task,
};
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Null panel: cluster, period, and group level shifts plus iid noise, no
/// treatment signal anywhere. One observation per cluster×period×group cell.
fn null_panel(n_clusters: usize, periods: &[i64], post_start: i64, seed: u64) -> PanelData {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, 1.0).unwrap();

    let mut cluster = Vec::new();
    let mut period = Vec::new();
    let mut group = Vec::new();
    let mut y = Vec::new();
    for c in 0..n_clusters {
        for &p in periods {
            for g in [0u8, 1] {
                cluster.push(c);
                period.push(p);
                group.push(g);
                let level = 0.3 * c as f64
                    + 0.15 * (p - periods[0]) as f64
                    + 0.1 * f64::from(g);
                y.push(level + noise.sample(&mut rng));
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
        post_start,
    }
}

fn base_task() -> TaskSpec {
    TaskSpec {
        outcome: "y".to_string(),
        spec: ModelSpec {
            id: "base".to_string(),
            controls: Vec::new(),
            fixed_effects: vec![FixedEffect::Cluster, FixedEffect::Period],
            group_interacted: true,
        },
    }
}

fn assert_unit_interval(result: &ft_inference::InferenceResult) {
    for (name, p) in [
        ("p_crve", result.p_crve),
        ("p_block_unadjusted", result.p_block_unadjusted),
        ("p_block_adjusted", result.p_block_adjusted),
        ("p_randomization_coefficient", result.p_randomization_coefficient),
        ("p_randomization_tstat", result.p_randomization_tstat),
    ] {
        assert!((0.0..=1.0).contains(&p), "{} = {} out of range", name, p);
    }
}

// ---------------------------------------------------------------------------
// Reproducibility
// ---------------------------------------------------------------------------

#[test]
fn seeded_runs_are_bit_identical_and_seed_robust() {
    // 50 control clusters + 1 treated, 6 periods, 2 groups.
    let periods: Vec<i64> = (2000..2006).collect();
    let panel = null_panel(51, &periods, 2003, 7);
    let task = base_task();
    let backend = WlsFixedEffects::default();

    let config = InferenceConfig {
        block_replications: 1000,
        wild_replications: 60,
        seed: 20_240_111,
        keep_draws: false,
    };
    let first = run_task(&backend, &panel, &task, &config).unwrap().result;
    let second = run_task(&backend, &panel, &task, &config).unwrap().result;

    assert_unit_interval(&first);
    assert_eq!(first.n_clusters, 51);
    assert_eq!(first.n_worlds, 51);
    assert!(
        first.null_coefficient_quantiles[0] <= first.null_coefficient_quantiles[1]
    );

    for (a, b) in [
        (first.p_crve, second.p_crve),
        (first.p_block_unadjusted, second.p_block_unadjusted),
        (first.p_block_adjusted, second.p_block_adjusted),
        (first.p_randomization_coefficient, second.p_randomization_coefficient),
        (first.p_randomization_tstat, second.p_randomization_tstat),
    ] {
        assert_eq!(a.to_bits(), b.to_bits());
    }

    // A different seed draws different replications but estimates the same
    // quantities. Seed-to-seed sd of a mid-range p is ~0.022 at B = 1000 and
    // ~0.013 at 51×60 randomization draws, so these bounds sit near 4.5σ.
    let other = InferenceConfig { seed: 77_777, ..config };
    let third = run_task(&backend, &panel, &task, &other).unwrap().result;
    assert_unit_interval(&third);
    assert!((first.p_block_unadjusted - third.p_block_unadjusted).abs() < 0.1);
    assert!((first.p_block_adjusted - third.p_block_adjusted).abs() < 0.1);
    assert!(
        (first.p_randomization_coefficient - third.p_randomization_coefficient).abs() < 0.06
    );
    assert!((first.p_randomization_tstat - third.p_randomization_tstat).abs() < 0.06);

    // The baseline fit does not depend on the seed at all.
    assert_eq!(first.coefficient.to_bits(), third.coefficient.to_bits());
    assert_eq!(first.p_crve.to_bits(), third.p_crve.to_bits());
}

// ---------------------------------------------------------------------------
// True null on the treated cluster
// ---------------------------------------------------------------------------

#[test]
fn flat_treated_cluster_is_not_flagged() {
    // Controls carry real cluster×post shifts of ±1 (balanced so the period
    // effects absorb none of them on average); the treated cluster's post
    // outcome equals its pre outcome up to noise. The true effect is null
    // while placebo worlds see effects of magnitude ~1, so the empirical
    // null dominates the true statistic.
    let mut rng = rand::rngs::StdRng::seed_from_u64(99);
    let noise = Normal::new(0.0, 0.01).unwrap();
    let n_clusters = 11; // 10 controls, treated last
    let periods = [2000i64, 2001, 2002, 2003];
    let post_start = 2002;

    let mut cluster = Vec::new();
    let mut period = Vec::new();
    let mut group = Vec::new();
    let mut y = Vec::new();
    for c in 0..n_clusters {
        // +1 for even control ids, −1 for odd, nothing for the treated.
        let post_shift = if c == n_clusters - 1 {
            0.0
        } else if c % 2 == 0 {
            1.0
        } else {
            -1.0
        };
        for &p in &periods {
            for g in [0u8, 1] {
                cluster.push(c);
                period.push(p);
                group.push(g);
                let mut level = 0.5 * c as f64 + 0.1 * f64::from(g);
                if p >= post_start {
                    level += post_shift;
                }
                y.push(level + noise.sample(&mut rng));
            }
        }
    }
    let n = cluster.len();
    let mut outcomes = BTreeMap::new();
    outcomes.insert("y".to_string(), y);
    let panel = PanelData {
        cluster,
        period,
        group,
        weight: vec![1.0; n],
        outcomes,
        controls: BTreeMap::new(),
        treated_cluster: n_clusters - 1,
        post_start,
    };

    let backend = WlsFixedEffects::default();
    let config = InferenceConfig {
        block_replications: 400,
        wild_replications: 60,
        seed: 3,
        keep_draws: false,
    };
    let result = run_task(&backend, &panel, &base_task(), &config).unwrap().result;

    assert_unit_interval(&result);
    assert!(result.coefficient.abs() < 0.05, "coefficient = {}", result.coefficient);
    assert!(
        result.p_randomization_coefficient > 0.5,
        "p_beta = {}",
        result.p_randomization_coefficient
    );
    assert!(result.p_randomization_tstat > 0.5, "p_t = {}", result.p_randomization_tstat);
    // Placebo effects of both signs: the null distribution straddles zero.
    assert!(result.null_coefficient_quantiles[0] < 0.0);
    assert!(result.null_coefficient_quantiles[1] > 0.0);
}

// ---------------------------------------------------------------------------
// Orchestrator wiring
// ---------------------------------------------------------------------------

#[test]
fn reported_baseline_matches_direct_fit() {
    let periods: Vec<i64> = (2000..2004).collect();
    let panel = null_panel(8, &periods, 2002, 21);
    let task = base_task();
    let backend = WlsFixedEffects::default();
    let config = InferenceConfig {
        block_replications: 50,
        wild_replications: 10,
        seed: 1,
        keep_draws: false,
    };
    let result = run_task(&backend, &panel, &task, &config).unwrap().result;

    let treatment = panel.treatment_for_cluster(panel.treated_cluster, true);
    let fixed_effects = panel
        .fixed_effect_dims(&[FixedEffect::Cluster, FixedEffect::Period])
        .unwrap();
    let direct = backend
        .fit(&RegressionData {
            outcome: panel.outcome("y").unwrap(),
            treatment: Some(&treatment),
            controls: &[],
            fixed_effects: &fixed_effects,
            weights: &panel.weight,
            clusters: &panel.cluster,
        })
        .unwrap();

    assert_eq!(result.coefficient.to_bits(), direct.coefficient().to_bits());
    assert_eq!(result.std_error.to_bits(), direct.std_error().to_bits());
    assert_eq!(result.t_statistic.to_bits(), direct.t_statistic().to_bits());
}
