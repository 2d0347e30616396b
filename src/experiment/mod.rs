//! A/B experimentation engine
//!
//! Experiments compare post configuration variants across accounts.
//! Variant assignment is a pure function of `(experiment_id, post_id)`,
//! outcome metrics are append-only, and analysis computes a
//! statistically-grounded winner with confidence and lift. The optimizer
//! promotes winners to the default configuration on an interval gate and
//! watches post-promotion performance for regressions.
//!
//! - [`model`] - definitions, variants, outcomes, promotions
//! - [`engine`] - registry, assignment, recording, analysis
//! - [`recommend`] - typed post-configuration recommendation surface
//! - [`optimizer`] - promotion cycle with rollback flagging
//! - [`store`] - append-only persistence for outcomes and promotions

pub mod engine;
pub mod model;
pub mod optimizer;
pub mod recommend;
pub mod store;

pub use engine::{
    assign, AnalysisThresholds, ExperimentAnalysis, ExperimentEngine, ExperimentRegistry,
    VariantStats,
};
pub use model::{
    ExperimentDefinition, ExperimentStatus, OutcomeRecord, PromotionRecord, Variant,
};
pub use optimizer::{Optimizer, OptimizerConfig, OptimizerOutcome};
pub use recommend::{HashtagStrategy, ImageStyle, PostConfig, PostConfigPatch, PostFormat};
pub use store::{ExperimentStore, MemoryExperimentStore, SqliteExperimentStore};

use thiserror::Error;

/// Errors raised by the experiment engine
#[derive(Debug, Error)]
pub enum ExperimentError {
    /// Referenced experiment id is not registered
    #[error("unknown experiment: {0}")]
    UnknownExperiment(String),

    /// Referenced variant id does not belong to the experiment
    #[error("unknown variant '{variant}' in experiment '{experiment}'")]
    UnknownVariant { experiment: String, variant: String },

    /// Definition rejected at load time
    #[error("invalid experiment definition: {0}")]
    InvalidDefinition(String),

    /// Persistence failure
    #[error("experiment store error: {0}")]
    Storage(#[from] anyhow::Error),
}
