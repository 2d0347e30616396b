//! Interval-gated promotion cycle
//!
//! The optimizer runs on a schedule but skips when the last run was
//! within the configured interval (the timestamp is persisted in the
//! experiment store, so the gate holds across processes). Each cycle:
//!
//! 1. Analyze every active experiment; promote the winner of any
//!    experiment that clears the confidence, sample and duration
//!    thresholds, folding its config patch into the stored defaults
//!    and marking the experiment Completed.
//! 2. Watch promoted variants: compare outcomes recorded after the
//!    promotion against the recorded baseline mean; a regression past
//!    the rollback threshold flags the promotion instead of silently
//!    keeping it.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::engine::ExperimentEngine;
use super::model::PromotionRecord;
use super::store::ExperimentStore;
use super::ExperimentError;

/// State key holding the last optimizer run timestamp
const STATE_LAST_RUN: &str = "optimizer_last_run";

/// Thresholds governing the promotion cycle
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    /// Minimum winner confidence required to promote
    pub confidence_threshold: f64,

    /// Minimum time between cycles
    pub interval: chrono::Duration,

    /// Relative regression that flags a promotion for rollback
    /// (e.g. -0.15 for a 15% drop against the baseline)
    pub rollback_threshold: f64,

    /// Minimum post-promotion samples before judging a regression
    pub watch_min_samples: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.95,
            interval: chrono::Duration::hours(6),
            rollback_threshold: -0.15,
            watch_min_samples: 10,
        }
    }
}

/// What one optimizer cycle did
#[derive(Debug, Default)]
pub struct OptimizerOutcome {
    /// Cycle skipped by the interval gate
    pub skipped: bool,

    /// `(experiment_id, variant_id)` pairs promoted this cycle
    pub promoted: Vec<(String, String)>,

    /// Experiment ids whose promotion was flagged for rollback
    pub rollback_flagged: Vec<String>,
}

/// The promotion cycle driver
pub struct Optimizer {
    engine: Arc<ExperimentEngine>,
    store: Arc<dyn ExperimentStore>,
    config: OptimizerConfig,
}

impl Optimizer {
    pub fn new(
        engine: Arc<ExperimentEngine>,
        store: Arc<dyn ExperimentStore>,
        config: OptimizerConfig,
    ) -> Self {
        Self {
            engine,
            store,
            config,
        }
    }

    /// Run one cycle, honoring the interval gate
    pub fn run(&self) -> Result<OptimizerOutcome, ExperimentError> {
        let now = Utc::now();

        if let Some(last_run) = self.last_run()? {
            if now - last_run < self.config.interval {
                tracing::debug!(
                    last_run = %last_run,
                    interval_secs = self.config.interval.num_seconds(),
                    "optimizer cycle skipped by interval gate"
                );
                return Ok(OptimizerOutcome {
                    skipped: true,
                    ..Default::default()
                });
            }
        }
        self.store.save_state(STATE_LAST_RUN, &now.to_rfc3339())?;

        let mut outcome = OptimizerOutcome::default();
        outcome.promoted = self.promote_winners()?;
        outcome.rollback_flagged = self.watch_promotions()?;

        Ok(outcome)
    }

    fn last_run(&self) -> Result<Option<DateTime<Utc>>, ExperimentError> {
        let Some(raw) = self.store.load_state(STATE_LAST_RUN)? else {
            return Ok(None);
        };

        match DateTime::parse_from_rfc3339(&raw) {
            Ok(dt) => Ok(Some(dt.with_timezone(&Utc))),
            Err(e) => {
                // A corrupt gate value must not wedge the cycle forever
                tracing::warn!(raw, error = %e, "discarding unparsable optimizer gate");
                Ok(None)
            }
        }
    }

    /// Promote winners that clear every threshold
    fn promote_winners(&self) -> Result<Vec<(String, String)>, ExperimentError> {
        let mut promoted = Vec::new();

        for experiment in self.engine.active_experiments() {
            let analysis = self.engine.analyze(&experiment.id)?;

            let Some(winner_id) = analysis.winner else {
                tracing::debug!(experiment = %experiment.id, "winner unresolved, keeping active");
                continue;
            };
            if analysis.confidence < self.config.confidence_threshold {
                tracing::debug!(
                    experiment = %experiment.id,
                    winner = %winner_id,
                    confidence = analysis.confidence,
                    "confidence below promotion threshold"
                );
                continue;
            }

            let Some(variant) = experiment.variant(&winner_id) else {
                continue;
            };
            let baseline = analysis
                .variants
                .iter()
                .find(|v| v.variant_id == winner_id)
                .map(|v| v.mean)
                .unwrap_or_default();

            self.engine.promote_defaults(&variant.config)?;
            self.store
                .record_promotion(&PromotionRecord::new(&experiment.id, &winner_id, baseline))?;
            self.engine.mark_completed(&experiment.id);

            tracing::info!(
                experiment = %experiment.id,
                variant = %winner_id,
                confidence = analysis.confidence,
                lift_pct = ?analysis.lift_pct,
                "variant promoted to defaults"
            );
            promoted.push((experiment.id, winner_id));
        }

        Ok(promoted)
    }

    /// Flag promotions whose post-promotion performance regressed
    fn watch_promotions(&self) -> Result<Vec<String>, ExperimentError> {
        let mut flagged = Vec::new();

        for promotion in self.store.promotions()? {
            if promotion.rollback_flagged || promotion.baseline_metric == 0.0 {
                continue;
            }

            let Some(metric) = self.promotion_metric(&promotion) else {
                continue;
            };

            let recent = self.store.outcomes_since(
                &promotion.experiment_id,
                &promotion.variant_id,
                &metric,
                promotion.promoted_at,
            )?;
            if recent.len() < self.config.watch_min_samples {
                continue;
            }

            let recent_mean =
                recent.iter().map(|o| o.metric_value).sum::<f64>() / recent.len() as f64;
            let change =
                (recent_mean - promotion.baseline_metric) / promotion.baseline_metric.abs();

            if change <= self.config.rollback_threshold {
                tracing::warn!(
                    experiment = %promotion.experiment_id,
                    variant = %promotion.variant_id,
                    baseline = promotion.baseline_metric,
                    recent_mean,
                    change_pct = change * 100.0,
                    "post-promotion regression, flagging for rollback"
                );
                self.store.flag_rollback(&promotion.experiment_id)?;
                flagged.push(promotion.experiment_id.clone());
            }
        }

        Ok(flagged)
    }

    /// Metric an old promotion was judged on; the definition may be gone
    fn promotion_metric(&self, promotion: &PromotionRecord) -> Option<String> {
        let active = self.engine.active_experiments();
        let completed = self.engine.completed_experiments();
        active
            .iter()
            .chain(completed.iter())
            .find(|e| e.id == promotion.experiment_id)
            .map(|e| e.metric.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::super::engine::{AnalysisThresholds, ExperimentRegistry};
    use super::super::model::{ExperimentDefinition, ExperimentStatus, Variant};
    use super::super::recommend::{ImageStyle, PostConfigPatch};
    use super::super::store::MemoryExperimentStore;
    use super::*;

    fn definition() -> ExperimentDefinition {
        ExperimentDefinition {
            id: "style".to_string(),
            name: "Image style".to_string(),
            variants: vec![
                Variant {
                    id: "plain".to_string(),
                    weight: None,
                    config: PostConfigPatch::default(),
                },
                Variant {
                    id: "photo".to_string(),
                    weight: None,
                    config: PostConfigPatch {
                        image_style: Some(ImageStyle::Photo),
                        ..Default::default()
                    },
                },
            ],
            status: ExperimentStatus::Active,
            start_time: Utc::now() - chrono::Duration::days(7),
            metric: "engagement_rate".to_string(),
            control: Some("plain".to_string()),
        }
    }

    fn setup(config: OptimizerConfig) -> (Arc<ExperimentEngine>, Arc<MemoryExperimentStore>, Optimizer) {
        let store = Arc::new(MemoryExperimentStore::new());
        let registry = ExperimentRegistry::from_definitions(vec![definition()]).unwrap();
        let engine = Arc::new(ExperimentEngine::new(
            registry,
            store.clone(),
            AnalysisThresholds {
                min_samples: 3,
                min_duration: chrono::Duration::hours(1),
            },
        ));
        let optimizer = Optimizer::new(engine.clone(), store.clone(), config);
        (engine, store, optimizer)
    }

    fn feed_outcomes(engine: &ExperimentEngine, variant: &str, value: f64, count: usize) {
        for i in 0..count {
            engine
                .record_outcome("style", variant, &format!("{variant}-{i}"), "engagement_rate", value)
                .unwrap();
        }
    }

    #[test]
    fn test_interval_gate_skips_second_run() {
        let (_engine, _store, optimizer) = setup(OptimizerConfig::default());

        let first = optimizer.run().unwrap();
        assert!(!first.skipped);

        let second = optimizer.run().unwrap();
        assert!(second.skipped);
    }

    #[test]
    fn test_promotes_confident_winner() {
        let (engine, store, optimizer) = setup(OptimizerConfig {
            interval: chrono::Duration::zero(),
            ..Default::default()
        });

        feed_outcomes(&engine, "plain", 0.2, 10);
        feed_outcomes(&engine, "photo", 0.8, 10);

        let outcome = optimizer.run().unwrap();
        assert_eq!(
            outcome.promoted,
            vec![("style".to_string(), "photo".to_string())]
        );

        // Winner's patch is now the default
        assert_eq!(
            engine.default_config().unwrap().image_style,
            ImageStyle::Photo
        );
        // Experiment left the active set
        assert!(engine.active_experiments().is_empty());
        // Promotion recorded with the winner's mean as baseline
        let promotions = store.promotions().unwrap();
        assert_eq!(promotions.len(), 1);
        assert!((promotions[0].baseline_metric - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_no_promotion_without_confidence() {
        let (engine, _store, optimizer) = setup(OptimizerConfig {
            interval: chrono::Duration::zero(),
            ..Default::default()
        });

        // Overlapping noisy samples: winner exists but confidence is low
        for (i, v) in [0.1, 0.9, 0.2, 0.8, 0.3].iter().enumerate() {
            engine
                .record_outcome("style", "plain", &format!("p{i}"), "engagement_rate", *v)
                .unwrap();
            engine
                .record_outcome("style", "photo", &format!("q{i}"), "engagement_rate", *v + 0.01)
                .unwrap();
        }

        let outcome = optimizer.run().unwrap();
        assert!(outcome.promoted.is_empty());
        assert!(!engine.active_experiments().is_empty());
    }

    #[test]
    fn test_regression_flags_rollback() {
        let (engine, store, optimizer) = setup(OptimizerConfig {
            interval: chrono::Duration::zero(),
            watch_min_samples: 5,
            ..Default::default()
        });

        feed_outcomes(&engine, "plain", 0.2, 10);
        feed_outcomes(&engine, "photo", 0.8, 10);
        let promoted = optimizer.run().unwrap();
        assert_eq!(promoted.promoted.len(), 1);

        // Post-promotion performance collapses
        feed_outcomes(&engine, "photo", 0.1, 6);

        let watched = optimizer.run().unwrap();
        assert_eq!(watched.rollback_flagged, vec!["style".to_string()]);
        assert!(store.promotions().unwrap()[0].rollback_flagged);
    }

    #[test]
    fn test_healthy_promotion_is_not_flagged() {
        let (engine, store, optimizer) = setup(OptimizerConfig {
            interval: chrono::Duration::zero(),
            watch_min_samples: 5,
            ..Default::default()
        });

        feed_outcomes(&engine, "plain", 0.2, 10);
        feed_outcomes(&engine, "photo", 0.8, 10);
        optimizer.run().unwrap();

        // Performance holds up after promotion
        feed_outcomes(&engine, "photo", 0.78, 6);

        let watched = optimizer.run().unwrap();
        assert!(watched.rollback_flagged.is_empty());
        assert!(!store.promotions().unwrap()[0].rollback_flagged);
    }

    #[test]
    fn test_watch_waits_for_samples() {
        let (engine, _store, optimizer) = setup(OptimizerConfig {
            interval: chrono::Duration::zero(),
            watch_min_samples: 5,
            ..Default::default()
        });

        feed_outcomes(&engine, "plain", 0.2, 10);
        feed_outcomes(&engine, "photo", 0.8, 10);
        optimizer.run().unwrap();

        // Too few post-promotion samples to judge
        feed_outcomes(&engine, "photo", 0.1, 2);

        let watched = optimizer.run().unwrap();
        assert!(watched.rollback_flagged.is_empty());
    }
}
