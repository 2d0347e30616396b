//! Experiment registry, variant assignment and analysis
//!
//! Assignment is a pure function of `(experiment_id, post_id)`: a SHA-256
//! digest of the pair is scaled into the cumulative variant weight
//! distribution. Repeated calls for the same post always return the same
//! variant; idempotence here is a hard invariant, not an optimization.
//!
//! Analysis aggregates the experiment metric per variant and declares a
//! winner only among variants with sufficient data (sample count and
//! experiment age thresholds). Confidence comes from a one-sided
//! two-sample z statistic against the runner-up.

use std::sync::{Arc, RwLock};

use sha2::{Digest, Sha256};
use statrs::function::erf::erf;

use super::model::{ExperimentDefinition, ExperimentStatus, OutcomeRecord, Variant};
use super::recommend::{PostConfig, PostConfigPatch};
use super::store::ExperimentStore;
use super::ExperimentError;

/// State key holding the promoted default configuration
const STATE_DEFAULT_CONFIG: &str = "default_config";

/// Data-sufficiency thresholds for analysis
#[derive(Debug, Clone, Copy)]
pub struct AnalysisThresholds {
    /// Minimum per-variant sample count
    pub min_samples: usize,

    /// Minimum experiment age
    pub min_duration: chrono::Duration,
}

impl Default for AnalysisThresholds {
    fn default() -> Self {
        Self {
            min_samples: 30,
            min_duration: chrono::Duration::hours(24),
        }
    }
}

/// Validated collection of experiment definitions
#[derive(Debug, Default)]
pub struct ExperimentRegistry {
    experiments: Vec<ExperimentDefinition>,
}

impl ExperimentRegistry {
    /// Build a registry, rejecting malformed definitions at load time
    pub fn from_definitions(
        definitions: Vec<ExperimentDefinition>,
    ) -> Result<Self, ExperimentError> {
        let mut seen = std::collections::HashSet::new();

        for def in &definitions {
            if def.id.is_empty() {
                return Err(ExperimentError::InvalidDefinition(
                    "experiment id must not be empty".into(),
                ));
            }
            if !seen.insert(def.id.clone()) {
                return Err(ExperimentError::InvalidDefinition(format!(
                    "duplicate experiment id '{}'",
                    def.id
                )));
            }
            if def.metric.is_empty() {
                return Err(ExperimentError::InvalidDefinition(format!(
                    "experiment '{}' has no metric",
                    def.id
                )));
            }
            if def.variants.is_empty() {
                return Err(ExperimentError::InvalidDefinition(format!(
                    "experiment '{}' has no variants",
                    def.id
                )));
            }

            let mut variant_ids = std::collections::HashSet::new();
            for variant in &def.variants {
                if !variant_ids.insert(variant.id.as_str()) {
                    return Err(ExperimentError::InvalidDefinition(format!(
                        "experiment '{}' has duplicate variant '{}'",
                        def.id, variant.id
                    )));
                }
                if variant.effective_weight() <= 0.0 {
                    return Err(ExperimentError::InvalidDefinition(format!(
                        "variant '{}' of '{}' has non-positive weight",
                        variant.id, def.id
                    )));
                }
            }

            if let Some(control) = &def.control {
                if def.variant(control).is_none() {
                    return Err(ExperimentError::InvalidDefinition(format!(
                        "control '{}' is not a variant of '{}'",
                        control, def.id
                    )));
                }
            }
        }

        Ok(Self {
            experiments: definitions,
        })
    }

    /// Look up by id
    pub fn get(&self, experiment_id: &str) -> Option<&ExperimentDefinition> {
        self.experiments.iter().find(|e| e.id == experiment_id)
    }

    /// Experiments still collecting assignments, in definition order
    pub fn active(&self) -> impl Iterator<Item = &ExperimentDefinition> {
        self.experiments.iter().filter(|e| e.is_active())
    }

    /// All experiments in definition order
    pub fn all(&self) -> &[ExperimentDefinition] {
        &self.experiments
    }

    /// Transition an experiment to Completed; returns `false` if unknown
    pub fn mark_completed(&mut self, experiment_id: &str) -> bool {
        match self
            .experiments
            .iter_mut()
            .find(|e| e.id == experiment_id)
        {
            Some(e) => {
                e.status = ExperimentStatus::Completed;
                true
            }
            None => false,
        }
    }
}

/// Pure deterministic variant assignment.
///
/// Returns `None` only for an (invalid) empty variant list; the registry
/// rejects those at load time.
pub fn assign<'a>(experiment: &'a ExperimentDefinition, post_id: &str) -> Option<&'a Variant> {
    if experiment.variants.is_empty() {
        return None;
    }

    let mut hasher = Sha256::new();
    hasher.update(experiment.id.as_bytes());
    hasher.update(b":");
    hasher.update(post_id.as_bytes());
    let digest = hasher.finalize();

    let mut buf = [0u8; 8];
    buf.copy_from_slice(&digest[..8]);
    let bucket = u64::from_be_bytes(buf);

    let total: f64 = experiment
        .variants
        .iter()
        .map(|v| v.effective_weight())
        .sum();
    let point = (bucket as f64 / u64::MAX as f64) * total;

    let mut cumulative = 0.0;
    let last = experiment.variants.len() - 1;
    for (i, variant) in experiment.variants.iter().enumerate() {
        cumulative += variant.effective_weight();
        if point < cumulative || i == last {
            return Some(variant);
        }
    }

    None
}

/// Per-variant aggregate statistics
#[derive(Debug, Clone)]
pub struct VariantStats {
    pub variant_id: String,
    pub samples: usize,
    pub mean: f64,
    pub variance: f64,
    /// Meets both the sample-count and experiment-age thresholds
    pub sufficient: bool,
}

/// Analysis result for one experiment
#[derive(Debug, Clone)]
pub struct ExperimentAnalysis {
    pub experiment_id: String,

    /// Stats per variant, in definition order
    pub variants: Vec<VariantStats>,

    /// Best sufficient variant; `None` while data is insufficient
    pub winner: Option<String>,

    /// Certainty that the winner beats the runner-up, in [0, 1]
    pub confidence: f64,

    /// Percentage improvement of the winner over the baseline variant
    pub lift_pct: Option<f64>,
}

impl ExperimentAnalysis {
    /// Whether the winner is still unresolved (a pending state, not an error)
    pub fn is_pending(&self) -> bool {
        self.winner.is_none()
    }
}

/// The experiment engine: assignment, recording, analysis, recommendation
pub struct ExperimentEngine {
    registry: RwLock<ExperimentRegistry>,
    store: Arc<dyn ExperimentStore>,
    thresholds: AnalysisThresholds,
}

impl ExperimentEngine {
    pub fn new(
        registry: ExperimentRegistry,
        store: Arc<dyn ExperimentStore>,
        thresholds: AnalysisThresholds,
    ) -> Self {
        Self {
            registry: RwLock::new(registry),
            store,
            thresholds,
        }
    }

    /// Active experiment definitions, cloned out of the registry
    pub fn active_experiments(&self) -> Vec<ExperimentDefinition> {
        self.registry
            .read()
            .unwrap()
            .active()
            .cloned()
            .collect()
    }

    /// Completed experiment definitions, cloned out of the registry
    pub fn completed_experiments(&self) -> Vec<ExperimentDefinition> {
        self.registry
            .read()
            .unwrap()
            .all()
            .iter()
            .filter(|e| !e.is_active())
            .cloned()
            .collect()
    }

    /// Sufficiency thresholds in use
    pub fn thresholds(&self) -> AnalysisThresholds {
        self.thresholds
    }

    /// Assign a variant for a post; deterministic for the same pair
    pub fn assign_variant(
        &self,
        experiment_id: &str,
        post_id: &str,
    ) -> Result<Variant, ExperimentError> {
        let registry = self.registry.read().unwrap();
        let experiment = registry
            .get(experiment_id)
            .ok_or_else(|| ExperimentError::UnknownExperiment(experiment_id.to_string()))?;

        assign(experiment, post_id).cloned().ok_or_else(|| {
            ExperimentError::InvalidDefinition(format!("experiment '{experiment_id}' is empty"))
        })
    }

    /// Append an outcome record; prior records are never mutated
    pub fn record_outcome(
        &self,
        experiment_id: &str,
        variant_id: &str,
        post_id: &str,
        metric_name: &str,
        metric_value: f64,
    ) -> Result<(), ExperimentError> {
        {
            let registry = self.registry.read().unwrap();
            let experiment = registry
                .get(experiment_id)
                .ok_or_else(|| ExperimentError::UnknownExperiment(experiment_id.to_string()))?;
            if experiment.variant(variant_id).is_none() {
                return Err(ExperimentError::UnknownVariant {
                    experiment: experiment_id.to_string(),
                    variant: variant_id.to_string(),
                });
            }
        }

        let record = OutcomeRecord::new(experiment_id, variant_id, post_id, metric_name, metric_value);
        self.store.record_outcome(&record)?;

        tracing::debug!(
            experiment = experiment_id,
            variant = variant_id,
            post = post_id,
            metric = metric_name,
            value = metric_value,
            "outcome recorded"
        );
        Ok(())
    }

    /// Analyze one experiment against the configured thresholds
    pub fn analyze(&self, experiment_id: &str) -> Result<ExperimentAnalysis, ExperimentError> {
        let (experiment, metric) = {
            let registry = self.registry.read().unwrap();
            let experiment = registry
                .get(experiment_id)
                .ok_or_else(|| ExperimentError::UnknownExperiment(experiment_id.to_string()))?;
            (experiment.clone(), experiment.metric.clone())
        };

        let outcomes = self.store.outcomes(experiment_id, &metric)?;
        let old_enough = experiment.age() >= self.thresholds.min_duration;

        let variants: Vec<VariantStats> = experiment
            .variants
            .iter()
            .map(|variant| {
                let values: Vec<f64> = outcomes
                    .iter()
                    .filter(|o| o.variant_id == variant.id)
                    .map(|o| o.metric_value)
                    .collect();
                let stats = aggregate(&variant.id, &values);
                let sufficient = old_enough && stats.samples >= self.thresholds.min_samples;
                VariantStats { sufficient, ..stats }
            })
            .collect();

        let mut sufficient: Vec<&VariantStats> =
            variants.iter().filter(|v| v.sufficient).collect();
        sufficient.sort_by(|a, b| {
            b.mean
                .partial_cmp(&a.mean)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let (winner, confidence, lift_pct) = match sufficient.as_slice() {
            [] => (None, 0.0, None),
            [only] => (Some(only.variant_id.clone()), 1.0, None),
            [best, rest @ ..] => {
                let runner_up = rest[0];
                let confidence = separation_confidence(best, runner_up);

                let baseline = experiment
                    .control
                    .as_deref()
                    .filter(|c| *c != best.variant_id)
                    .and_then(|c| variants.iter().find(|v| v.variant_id == c))
                    .filter(|v| v.samples > 0)
                    .unwrap_or(runner_up);
                let lift = (baseline.mean != 0.0)
                    .then(|| (best.mean - baseline.mean) / baseline.mean.abs() * 100.0);

                (Some(best.variant_id.clone()), confidence, lift)
            }
        };

        Ok(ExperimentAnalysis {
            experiment_id: experiment_id.to_string(),
            variants,
            winner,
            confidence,
            lift_pct,
        })
    }

    /// Configuration recommendation for a post.
    ///
    /// Starts from the promoted defaults and applies the assigned variant
    /// patch of every active experiment in definition order. Safe to call
    /// repeatedly for the same `post_id` with identical results.
    pub fn recommend(&self, account: &str, post_id: &str) -> Result<PostConfig, ExperimentError> {
        let mut config = self.default_config()?;

        let registry = self.registry.read().unwrap();
        for experiment in registry.active() {
            if let Some(variant) = assign(experiment, post_id) {
                config.apply(&variant.config);
                tracing::trace!(
                    account,
                    post = post_id,
                    experiment = %experiment.id,
                    variant = %variant.id,
                    "variant applied to recommendation"
                );
            }
        }

        Ok(config)
    }

    /// The promoted default configuration
    pub fn default_config(&self) -> Result<PostConfig, ExperimentError> {
        match self.store.load_state(STATE_DEFAULT_CONFIG)? {
            Some(json) => serde_json::from_str(&json)
                .map_err(|e| ExperimentError::Storage(anyhow::Error::new(e))),
            None => Ok(PostConfig::default()),
        }
    }

    /// Fold a winning variant's patch into the stored defaults
    pub fn promote_defaults(&self, patch: &PostConfigPatch) -> Result<PostConfig, ExperimentError> {
        let config = self.default_config()?.with_patch(patch);
        let json = serde_json::to_string(&config)
            .map_err(|e| ExperimentError::Storage(anyhow::Error::new(e)))?;
        self.store.save_state(STATE_DEFAULT_CONFIG, &json)?;
        Ok(config)
    }

    /// Transition an experiment to Completed
    pub fn mark_completed(&self, experiment_id: &str) -> bool {
        self.registry.write().unwrap().mark_completed(experiment_id)
    }
}

/// Mean and sample variance for one variant's observed values
fn aggregate(variant_id: &str, values: &[f64]) -> VariantStats {
    let samples = values.len();
    let mean = if samples == 0 {
        0.0
    } else {
        values.iter().sum::<f64>() / samples as f64
    };
    let variance = if samples < 2 {
        0.0
    } else {
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (samples - 1) as f64
    };

    VariantStats {
        variant_id: variant_id.to_string(),
        samples,
        mean,
        variance,
        sufficient: false,
    }
}

/// One-sided confidence that `best` truly beats `runner_up`.
///
/// Two-sample z statistic mapped through the standard normal CDF,
/// Phi(z) = (1 + erf(z / sqrt 2)) / 2.
fn separation_confidence(best: &VariantStats, runner_up: &VariantStats) -> f64 {
    let se = (best.variance / best.samples as f64
        + runner_up.variance / runner_up.samples as f64)
        .sqrt();

    if se == 0.0 {
        // Zero spread: the ordering is exact
        return if best.mean > runner_up.mean { 1.0 } else { 0.5 };
    }

    let z = (best.mean - runner_up.mean) / se;
    (0.5 * (1.0 + erf(z / std::f64::consts::SQRT_2))).clamp(0.0, 1.0)
}
