//! Per-run composition of the pipeline components
//!
//! Each scheduled invocation is a short-lived process doing one unit of
//! work: a collection run, a publish run, or an optimizer cycle. Every
//! run takes the corresponding named lock first; accounts and queries
//! are processed sequentially, and failures are contained at the
//! per-account / per-query boundary so one failure never aborts the
//! rest of the run. Notifications are best-effort throughout.

use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::experiment::{
    ExperimentEngine, ExperimentRegistry, ExperimentStore, Optimizer, OptimizerOutcome,
    SqliteExperimentStore,
};
use crate::lock::LockManager;
use crate::models::{CollectionReport, SourceQuery};
use crate::notify::{Notifier, NullNotifier, WebhookNotifier};
use crate::publish::{
    DefaultCaptionSource, DirectImageSource, Orchestrator, PlatformClient, PublishError,
};
use crate::source::{ImageFilter, ProviderClient, SourceChain};
use crate::storage::{
    AttemptRepository, ContentRepository, ContentStats, SqliteAttemptRepository,
    SqliteContentRepository,
};

/// Lock names, one per run kind
const LOCK_COLLECT: &str = "collect";
const LOCK_PUBLISH: &str = "publish";
const LOCK_OPTIMIZE: &str = "optimize";

/// Result of a publish run
#[derive(Debug, Default)]
pub struct PublishSummary {
    /// `(account, media_id)` pairs published this run
    pub published: Vec<(String, String)>,

    /// Accounts skipped for lack of backlog
    pub skipped: Vec<String>,

    /// `(account, error)` pairs for failed accounts
    pub failed: Vec<(String, String)>,
}

/// Registry and attempt-log totals for the stats surface
#[derive(Debug, Clone, Copy)]
pub struct PipelineStats {
    pub content: ContentStats,
    pub attempts_total: usize,
    pub attempts_success: usize,
    pub attempts_failed: usize,
}

/// Wires configuration into concrete components and drives the runs
pub struct Pipeline {
    config: Config,
    locks: LockManager,
    content: Arc<dyn ContentRepository>,
    attempts: Arc<dyn AttemptRepository>,
    experiment_store: Arc<dyn ExperimentStore>,
    engine: Arc<ExperimentEngine>,
    notifier: Arc<dyn Notifier>,
}

impl Pipeline {
    /// Build the pipeline from validated configuration
    pub fn from_config(config: Config) -> Result<Self> {
        config
            .validate()
            .map_err(|e| Error::config(e.to_string()))?;

        let locks = LockManager::new(&config.lock.dir)?;
        let content: Arc<dyn ContentRepository> =
            Arc::new(SqliteContentRepository::new(&config.database.path)?);
        let attempts: Arc<dyn AttemptRepository> =
            Arc::new(SqliteAttemptRepository::new(&config.database.path)?);
        let experiment_store: Arc<dyn ExperimentStore> =
            Arc::new(SqliteExperimentStore::new(&config.database.path)?);

        let registry = ExperimentRegistry::from_definitions(config.experiments.clone())?;
        let engine = Arc::new(ExperimentEngine::new(
            registry,
            experiment_store.clone(),
            config.optimizer.analysis_thresholds(),
        ));

        let notifier: Arc<dyn Notifier> = match &config.notify {
            Some(webhook) => Arc::new(WebhookNotifier::new(webhook.clone()).map_err(Error::config)?),
            None => Arc::new(NullNotifier),
        };

        Ok(Self {
            config,
            locks,
            content,
            attempts,
            experiment_store,
            engine,
            notifier,
        })
    }

    /// The experiment engine backing this pipeline
    pub fn engine(&self) -> &Arc<ExperimentEngine> {
        &self.engine
    }

    /// Pull candidates from the provider chain into the registry.
    ///
    /// Holds the `collect` lock for the duration of the run.
    pub async fn run_collection(&self) -> Result<CollectionReport> {
        let _guard = self
            .locks
            .acquire(LOCK_COLLECT, self.config.lock.timeout())?;

        let client = ProviderClient::new(
            &self.config.source.api_key,
            self.config.source.rate_limit_per_sec,
            self.config.source_timeout(),
        )?;
        let chain = SourceChain::new(
            client,
            &self.config.source.primary_host,
            &self.config.source.fallback_hosts,
            Arc::new(ImageFilter),
        );

        let queries: Vec<SourceQuery> = self
            .config
            .source
            .queries
            .iter()
            .map(|q| SourceQuery::parse(q))
            .collect();

        let report = chain.collect(&queries, self.content.as_ref()).await;

        tracing::info!(
            queries = report.queries.len(),
            inserted = report.total_inserted(),
            failed = report.failed_queries(),
            "collection run finished"
        );
        self.notifier
            .send(&format!(
                "collection: {} new items from {} queries ({} failed)",
                report.total_inserted(),
                report.queries.len(),
                report.failed_queries()
            ))
            .await;

        Ok(report)
    }

    /// Publish the next backlog item for each configured account.
    ///
    /// Accounts are processed sequentially; a failing account is
    /// reported and skipped, it never aborts the others. Holds the
    /// `publish` lock for the duration of the run.
    pub async fn run_publish(&self, account_filter: Option<&str>) -> Result<PublishSummary> {
        let _guard = self
            .locks
            .acquire(LOCK_PUBLISH, self.config.lock.timeout())?;

        let client = PlatformClient::new(&self.config.publish.api_base, self.config.publish_timeout())?;
        let orchestrator = Orchestrator::new(
            client,
            self.content.clone(),
            self.attempts.clone(),
            Arc::new(DefaultCaptionSource),
            Arc::new(DirectImageSource),
            self.config.publish_retry(),
        );

        let mut summary = PublishSummary::default();

        for account in &self.config.accounts {
            if account_filter.is_some_and(|f| f != account.name) {
                continue;
            }

            match self.publish_for_account(&orchestrator, account).await {
                Ok(Some(media_id)) => {
                    summary.published.push((account.name.clone(), media_id));
                }
                Ok(None) => {
                    tracing::info!(account = %account.name, "no backlog, skipping");
                    summary.skipped.push(account.name.clone());
                }
                Err(e) => {
                    self.report_publish_failure(&account.name, &e).await;
                    summary.failed.push((account.name.clone(), e.to_string()));
                }
            }
        }

        tracing::info!(
            published = summary.published.len(),
            skipped = summary.skipped.len(),
            failed = summary.failed.len(),
            "publish run finished"
        );
        Ok(summary)
    }

    /// One account's unit of work: next backlog item, recommended
    /// configuration, publish.
    async fn publish_for_account(
        &self,
        orchestrator: &Orchestrator,
        account: &crate::config::AccountConfig,
    ) -> Result<Option<String>> {
        let Some(item) = self.content.next_unposted(account.source_tag.as_deref())? else {
            return Ok(None);
        };

        let post_config = self.engine.recommend(&account.name, &item.content_code)?;
        let receipt = orchestrator.publish(account, &item, &post_config).await?;

        Ok(Some(receipt.media_id))
    }

    /// Classify a publish failure for the account boundary
    async fn report_publish_failure(&self, account: &str, error: &Error) {
        match error {
            Error::Publish(PublishError::Auth(msg)) => {
                tracing::error!(account, error = %msg, "credential invalid, skipping account");
                self.notifier
                    .send(&format!(
                        "auth failed for account '{account}': {msg}; skipped for this run"
                    ))
                    .await;
            }
            Error::Publish(e @ PublishError::Exhausted { .. }) => {
                tracing::error!(account, error = %e, "publish retries exhausted");
                self.notifier
                    .send(&format!(
                        "publish failed for account '{account}': {e}; manual follow-up needed"
                    ))
                    .await;
            }
            e => {
                tracing::error!(account, error = %e, "publish failed");
            }
        }
    }

    /// Run one optimizer cycle.
    ///
    /// Holds the `optimize` lock; the cycle itself is additionally
    /// gated on the configured interval.
    pub async fn run_optimize(&self) -> Result<OptimizerOutcome> {
        let _guard = self
            .locks
            .acquire(LOCK_OPTIMIZE, self.config.lock.timeout())?;

        let optimizer = Optimizer::new(
            self.engine.clone(),
            self.experiment_store.clone(),
            self.config.optimizer.optimizer_config(),
        );
        let outcome = optimizer.run()?;

        for (experiment, variant) in &outcome.promoted {
            self.notifier
                .send(&format!(
                    "experiment '{experiment}': variant '{variant}' promoted to defaults"
                ))
                .await;
        }
        for experiment in &outcome.rollback_flagged {
            self.notifier
                .send(&format!(
                    "experiment '{experiment}': post-promotion regression, flagged for rollback"
                ))
                .await;
        }

        Ok(outcome)
    }

    /// Record an externally-observed metric for a post.
    ///
    /// The variant is re-derived from the deterministic assignment, so
    /// callers only need the experiment and post identifiers.
    pub fn record_outcome(
        &self,
        experiment_id: &str,
        post_id: &str,
        metric_name: &str,
        metric_value: f64,
    ) -> Result<()> {
        let variant = self.engine.assign_variant(experiment_id, post_id)?;
        self.engine
            .record_outcome(experiment_id, &variant.id, post_id, metric_name, metric_value)?;
        Ok(())
    }

    /// Reap stale locks left behind by crashed processes
    pub fn cleanup_locks(&self, stale_after: Duration) -> Result<usize> {
        Ok(self.locks.cleanup(stale_after)?)
    }

    /// Registry and attempt-log totals
    pub fn stats(&self) -> Result<PipelineStats> {
        let content = self.content.stats()?;
        let (attempts_total, attempts_success, attempts_failed) = self.attempts.counts()?;

        Ok(PipelineStats {
            content,
            attempts_total,
            attempts_success,
            attempts_failed,
        })
    }
}
