//! Experiment data structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::recommend::PostConfigPatch;

/// Lifecycle of an experiment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentStatus {
    /// Collecting assignments and outcomes
    #[default]
    Active,
    /// Analysis criteria met; no longer contributes to recommendations
    Completed,
}

impl ExperimentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExperimentStatus::Active => "active",
            ExperimentStatus::Completed => "completed",
        }
    }
}

/// One alternative configuration under comparison
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variant {
    /// Variant identifier, unique within the experiment
    pub id: String,

    /// Relative assignment weight; unweighted variants share equally
    #[serde(default)]
    pub weight: Option<f64>,

    /// Configuration patch applied to posts assigned to this variant
    #[serde(default)]
    pub config: PostConfigPatch,
}

impl Variant {
    /// Effective weight used by the assignment distribution
    pub fn effective_weight(&self) -> f64 {
        self.weight.unwrap_or(1.0)
    }
}

/// Definition of one experiment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentDefinition {
    /// Experiment identifier
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// Ordered variants; order matters for the assignment distribution
    pub variants: Vec<Variant>,

    /// Lifecycle status
    #[serde(default)]
    pub status: ExperimentStatus,

    /// When the experiment started collecting data
    pub start_time: DateTime<Utc>,

    /// Metric the experiment is judged on (e.g. "engagement_rate")
    pub metric: String,

    /// Designated baseline variant for lift computation, if any
    #[serde(default)]
    pub control: Option<String>,
}

impl ExperimentDefinition {
    /// Age of the experiment
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.start_time
    }

    /// Look up a variant by id
    pub fn variant(&self, variant_id: &str) -> Option<&Variant> {
        self.variants.iter().find(|v| v.id == variant_id)
    }

    /// Whether the experiment still collects assignments
    pub fn is_active(&self) -> bool {
        self.status == ExperimentStatus::Active
    }
}

/// One observed metric value for a post under a variant.
///
/// Append-only: records are aggregated over, never mutated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub experiment_id: String,
    pub variant_id: String,
    pub post_id: String,
    pub metric_name: String,
    pub metric_value: f64,
    pub recorded_at: DateTime<Utc>,
}

impl OutcomeRecord {
    /// Create a record stamped with the current time
    pub fn new(
        experiment_id: &str,
        variant_id: &str,
        post_id: &str,
        metric_name: &str,
        metric_value: f64,
    ) -> Self {
        Self {
            experiment_id: experiment_id.to_string(),
            variant_id: variant_id.to_string(),
            post_id: post_id.to_string(),
            metric_name: metric_name.to_string(),
            metric_value,
            recorded_at: Utc::now(),
        }
    }
}

/// Record of a winner promoted to the default configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromotionRecord {
    /// Experiment the winner came from
    pub experiment_id: String,

    /// Promoted variant
    pub variant_id: String,

    /// When the promotion happened
    pub promoted_at: DateTime<Utc>,

    /// Winner's mean metric at promotion time, the watch-window baseline
    pub baseline_metric: f64,

    /// Set when post-promotion performance regressed past the threshold
    pub rollback_flagged: bool,
}

impl PromotionRecord {
    pub fn new(experiment_id: &str, variant_id: &str, baseline_metric: f64) -> Self {
        Self {
            experiment_id: experiment_id.to_string(),
            variant_id: variant_id.to_string(),
            promoted_at: Utc::now(),
            baseline_metric,
            rollback_flagged: false,
        }
    }
}
