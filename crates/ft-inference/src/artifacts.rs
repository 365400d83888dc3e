//! Serializable inference artifacts.
//!
//! Two export surfaces: a per-task [`DiagnosticBundle`] holding the raw
//! resampling draws, and the batch [`Report`] with one summary row per task.
//! JSON is the authoritative format (full f64 precision via serde); the CSV
//! exports are for report tooling and downstream analysis.
//!
//! # Schema versioning
//!
//! The `schema_version` field tracks breaking changes. Current: `"1.0.0"`.

use serde::{Deserialize, Serialize};

use crate::block_bootstrap::BlockBootstrapDraws;
use crate::randomization::RandomizationDraw;

/// Current schema version for inference artifacts.
pub const SCHEMA_VERSION: &str = "1.0.0";

// ---------------------------------------------------------------------------
// Per-task diagnostics
// ---------------------------------------------------------------------------

/// Raw resampling draws for one task, persisted on request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticBundle {
    /// Schema version for forward compatibility.
    pub schema_version: String,
    /// Timestamp (ISO 8601) when the bundle was created.
    pub created_at: String,
    /// Outcome column the task estimated.
    pub outcome: String,
    /// Specification id the task estimated.
    pub specification: String,
    /// Unadjusted block-bootstrap statistic per replication.
    pub block_unadjusted: Vec<f64>,
    /// Variance-adjusted block-bootstrap statistic per replication.
    pub block_adjusted: Vec<f64>,
    /// Every randomization draw, world by world.
    pub randomization: Vec<RandomizationDraw>,
}

impl DiagnosticBundle {
    /// Bundle the draws of one task.
    pub fn new(
        outcome: &str,
        specification: &str,
        block: &BlockBootstrapDraws,
        randomization: Vec<RandomizationDraw>,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            created_at: utc_now_iso8601(),
            outcome: outcome.to_string(),
            specification: specification.to_string(),
            block_unadjusted: block.unadjusted.clone(),
            block_adjusted: block.adjusted.clone(),
            randomization,
        }
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Block-bootstrap draws as CSV.
    ///
    /// Columns: `replication_id,unadjusted_statistic,adjusted_statistic`
    pub fn block_csv(&self) -> String {
        let mut csv = String::from("replication_id,unadjusted_statistic,adjusted_statistic\n");
        for (i, (u, a)) in self.block_unadjusted.iter().zip(&self.block_adjusted).enumerate() {
            csv.push_str(&format!("{},{:.6},{:.6}\n", i, u, a));
        }
        csv
    }

    /// Randomization draws as CSV.
    ///
    /// Columns: `world_id,replication_id,coefficient,t_statistic`
    pub fn randomization_csv(&self) -> String {
        let mut csv = String::from("world_id,replication_id,coefficient,t_statistic\n");
        for d in &self.randomization {
            csv.push_str(&format!(
                "{},{},{:.6},{:.6}\n",
                d.world, d.replication, d.coefficient, d.t_statistic
            ));
        }
        csv
    }
}

// ---------------------------------------------------------------------------
// Batch report
// ---------------------------------------------------------------------------

/// One summary row per task in the final report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportRow {
    /// Outcome column.
    pub outcome: String,
    /// Specification id.
    pub specification: String,
    /// Treatment coefficient from the full model.
    pub coefficient: f64,
    /// Cluster-robust standard error.
    pub std_error: f64,
    /// Baseline cluster-robust p-value.
    pub p_crve: f64,
    /// Block bootstrap, unadjusted statistic.
    pub p_block_unadjusted: f64,
    /// Block bootstrap, variance-adjusted statistic.
    pub p_block_adjusted: f64,
    /// Randomization inference ranked by |coefficient|.
    pub p_randomization_coefficient: f64,
    /// Randomization inference ranked by |t|.
    pub p_randomization_tstat: f64,
}

/// The batch report: metadata plus one [`ReportRow`] per completed task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    /// Schema version for forward compatibility.
    pub schema_version: String,
    /// Timestamp (ISO 8601) when the report was created.
    pub created_at: String,
    /// SHA-256 of the run configuration that produced the report.
    pub config_sha256: String,
    /// Base seed of the run.
    pub seed: u64,
    /// One row per task, in task order.
    pub rows: Vec<ReportRow>,
}

impl Report {
    /// Start an empty report for a run.
    pub fn new(config_sha256: &str, seed: u64) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            created_at: utc_now_iso8601(),
            config_sha256: config_sha256.to_string(),
            seed,
            rows: Vec::new(),
        }
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Rows as CSV.
    ///
    /// Columns: `outcome,specification,coefficient,std_error,p_crve,`
    /// `p_block_unadjusted,p_block_adjusted,p_randomization_coefficient,`
    /// `p_randomization_tstat`
    pub fn to_csv(&self) -> String {
        let mut csv = String::from(
            "outcome,specification,coefficient,std_error,p_crve,p_block_unadjusted,\
             p_block_adjusted,p_randomization_coefficient,p_randomization_tstat\n",
        );
        for r in &self.rows {
            csv.push_str(&format!(
                "{},{},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6}\n",
                r.outcome,
                r.specification,
                r.coefficient,
                r.std_error,
                r.p_crve,
                r.p_block_unadjusted,
                r.p_block_adjusted,
                r.p_randomization_coefficient,
                r.p_randomization_tstat
            ));
        }
        csv
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn utc_now_iso8601() -> String {
    let d = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default();
    let secs = d.as_secs();
    let day_secs = secs % 86400;
    let (y, mo, da) = civil_from_days(secs / 86400);
    format!(
        "{y:04}-{mo:02}-{da:02}T{:02}:{:02}:{:02}Z",
        day_secs / 3600,
        (day_secs % 3600) / 60,
        day_secs % 60
    )
}

fn civil_from_days(mut days: u64) -> (u64, u64, u64) {
    // Algorithm from Howard Hinnant (public domain).
    days += 719468;
    let era = days / 146097;
    let doe = days - era * 146097;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let y = yoe + era * 400 + u64::from(m <= 2);
    (y, m, d)
}
