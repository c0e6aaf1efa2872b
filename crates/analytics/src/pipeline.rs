//! One end-to-end analytics run.
//!
//! Stages run in a fixed order:
//!
//! 1. **Load entities**: the four entity queries run concurrently.
//! 2. **Reconcile**: unresolved product and transaction references are
//!    excluded and tallied.
//! 3. **Sample**: the session sample and the product metrics are read. Every
//!    session-dependent table waits for this barrier.
//! 4. **Aggregate**: each table is computed on the blocking thread pool over
//!    the shared, frozen dataset.
//! 5. **Integrate**: CLV records join spend with engagement.
//!
//! The cancellation token is checked before each stage and raced against the
//! stage's work. A failed or cancelled run returns an error and no report;
//! partial tables are never emitted. Aggregations already handed to the
//! blocking pool are not interrupted: they run to completion in the
//! background and their results are dropped.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use futures::{StreamExt, TryStreamExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use ecomlens_core::{KeyRange, ProductMetric};

use crate::aggregate::{
    self, CategoryRevenue, CoOccurrencePair, CohortRevenue, FunnelSummary, ProductMetricSummary,
    ProductRevenue, SegmentSummary, user_engagement, user_spend,
};
use crate::clv::integrate;
use crate::config::AnalyticsConfig;
use crate::dataset::{Dataset, EntitySnapshot, Reconciler};
use crate::diagnostics::RunDiagnostics;
use crate::error::{AnalyticsError, Stage};
use crate::report::AnalyticsReport;
use crate::sampler::{SessionSample, SessionSampler};
use crate::store::{
    CategoryFilter, EntityStore, ProductFilter, SessionStore, TransactionFilter, UserFilter,
};

/// An analytics run over one entity store and one session store.
pub struct AnalyticsRun<'a, E, S> {
    config: &'a AnalyticsConfig,
    entities: &'a E,
    sessions: &'a S,
    cancel: CancellationToken,
    run_id: Uuid,
}

impl<'a, E, S> AnalyticsRun<'a, E, S>
where
    E: EntityStore,
    S: SessionStore,
{
    #[must_use]
    pub fn new(config: &'a AnalyticsConfig, entities: &'a E, sessions: &'a S) -> Self {
        Self {
            config,
            entities,
            sessions,
            cancel: CancellationToken::new(),
            run_id: Uuid::new_v4(),
        }
    }

    /// Abort the run when `cancel` fires.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub const fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Execute every stage and assemble the report.
    ///
    /// # Errors
    ///
    /// Returns [`AnalyticsError::Config`] for an invalid configuration (before
    /// any store is read), [`AnalyticsError::StoreUnavailable`] if a store
    /// cannot be reached, [`AnalyticsError::Cancelled`] if the token fires,
    /// and the other variants for store or task failures.
    #[instrument(
        skip(self),
        fields(
            run_id = %self.run_id,
            entity_store = self.entities.name(),
            session_store = self.sessions.name(),
        )
    )]
    pub async fn execute(self) -> Result<AnalyticsReport, AnalyticsError> {
        self.config.validate()?;
        let mut diagnostics = RunDiagnostics::new(self.run_id);

        let snapshot = self.stage(Stage::LoadEntities, self.load_entities()).await?;
        info!(
            users = snapshot.users.len(),
            categories = snapshot.categories.len(),
            products = snapshot.products.len(),
            transactions = snapshot.transactions.len(),
            "Loaded entities"
        );

        self.checkpoint(Stage::Reconcile)?;
        let reconciler = Reconciler::new(snapshot, &mut diagnostics);

        let (sample, (metrics, metrics_truncated)) =
            self.stage(Stage::Sample, self.read_sessions()).await?;
        diagnostics.sample = sample.stats();
        diagnostics.metrics_truncated = metrics_truncated;
        let dataset = Arc::new(reconciler.finish(sample.events(), metrics, &mut diagnostics));
        info!(
            sessions = dataset.sessions.len(),
            skipped = diagnostics.skipped_total(),
            "Reconciled dataset"
        );

        let tables = self.stage(Stage::Aggregate, self.aggregate(&dataset)).await?;

        let config = self.config.clone();
        let clv_input = Arc::clone(&dataset);
        let clv_records = self
            .stage(
                Stage::Integrate,
                join(
                    Stage::Integrate,
                    tokio::task::spawn_blocking(move || {
                        let spend = user_spend(&clv_input.transactions);
                        let engagement = user_engagement(&clv_input.sessions);
                        integrate(&clv_input.users, &spend, &engagement, &config)
                    }),
                ),
            )
            .await?;

        diagnostics.finish();
        let report = AnalyticsReport {
            run_id: self.run_id,
            generated_at: Utc::now(),
            revenue_by_category: tables.revenue_by_category,
            top_products: tables.top_products,
            co_occurrence_pairs: tables.co_occurrence_pairs,
            funnel_counts: tables.funnel,
            clv_records,
            user_segments: tables.user_segments,
            cohort_revenue: tables.cohort_revenue,
            product_metrics: tables.product_metrics,
            diagnostics,
        };
        info!(
            categories = report.revenue_by_category.len(),
            pairs = report.co_occurrence_pairs.len(),
            trajectories = report.funnel_counts.trajectories,
            clv_records = report.clv_records.len(),
            "Analytics run complete"
        );
        Ok(report)
    }

    fn checkpoint(&self, stage: Stage) -> Result<(), AnalyticsError> {
        if self.cancel.is_cancelled() {
            info!(%stage, "Run cancelled");
            return Err(AnalyticsError::Cancelled { stage });
        }
        Ok(())
    }

    /// Run one stage, returning [`AnalyticsError::Cancelled`] if the token
    /// fires first.
    ///
    /// Dropping `work` stops its async parts at the next await point.
    /// Closures already passed to `spawn_blocking` cannot be stopped; they
    /// keep running detached and their results are discarded.
    async fn stage<T>(
        &self,
        stage: Stage,
        work: impl Future<Output = Result<T, AnalyticsError>>,
    ) -> Result<T, AnalyticsError> {
        self.checkpoint(stage)?;
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                info!(%stage, "Run cancelled");
                Err(AnalyticsError::Cancelled { stage })
            }
            result = work => result,
        }
    }

    async fn load_entities(&self) -> Result<EntitySnapshot, AnalyticsError> {
        let store = self.entities;
        let err = |target: &'static str| {
            move |e| AnalyticsError::store(Stage::LoadEntities, store.name(), target, e)
        };
        let (users, categories, products, transactions) = tokio::try_join!(
            async { store.users(&UserFilter::default()).await.map_err(err("users")) },
            async {
                store
                    .categories(&CategoryFilter::default())
                    .await
                    .map_err(err("categories"))
            },
            async {
                store
                    .products(&ProductFilter::default())
                    .await
                    .map_err(err("products"))
            },
            async {
                store
                    .transactions(&TransactionFilter::default())
                    .await
                    .map_err(err("transactions"))
            },
        )?;
        Ok(EntitySnapshot {
            users,
            categories,
            products,
            transactions,
        })
    }

    /// Sample sessions and read product metrics concurrently. Both scans are
    /// bounded by `max_scan_records`; the flag reports a cut metric scan.
    async fn read_sessions(
        &self,
    ) -> Result<(SessionSample, (Vec<ProductMetric>, bool)), AnalyticsError> {
        let store = self.sessions;
        let range = &self.config.session_range;
        let sampler = SessionSampler::from_config(self.config);
        let metrics_range = KeyRange::full();
        let max_rows = self.config.max_scan_records;

        tokio::try_join!(
            async {
                sampler
                    .sample(store, range)
                    .await
                    .map_err(|e| {
                        AnalyticsError::store(Stage::Sample, store.name(), range.to_string(), e)
                    })
            },
            async {
                let mut metrics = store
                    .scan_product_metrics(&metrics_range)
                    .take(max_rows.saturating_add(1))
                    .try_collect::<Vec<_>>()
                    .await
                    .map_err(|e| {
                        AnalyticsError::store(
                            Stage::Sample,
                            store.name(),
                            format!("product_metrics {metrics_range}"),
                            e,
                        )
                    })?;
                let truncated = metrics.len() > max_rows;
                if truncated {
                    metrics.truncate(max_rows);
                    warn!(
                        max_scan_records = max_rows,
                        "Product metric scan stopped at max_scan_records; metric table is partial"
                    );
                }
                Ok::<_, AnalyticsError>((metrics, truncated))
            },
        )
    }

    async fn aggregate(&self, dataset: &Arc<Dataset>) -> Result<Tables, AnalyticsError> {
        let top_k = self.config.top_k;
        let window = self.config.funnel_window;

        let (
            revenue_by_category,
            top_products,
            co_occurrence_pairs,
            funnel,
            user_segments,
            cohort_revenue,
            product_metrics,
        ) = tokio::try_join!(
            blocking(dataset, aggregate::revenue_by_category),
            blocking(dataset, move |d| aggregate::top_products(d, top_k)),
            blocking(dataset, aggregate::co_occurrence),
            blocking(dataset, move |d| aggregate::funnel(&d.sessions, window)),
            blocking(dataset, |d| aggregate::user_segments(&user_spend(&d.transactions))),
            blocking(dataset, aggregate::cohort_revenue),
            blocking(dataset, aggregate::product_metric_summary),
        )?;

        Ok(Tables {
            revenue_by_category,
            top_products,
            co_occurrence_pairs,
            funnel,
            user_segments,
            cohort_revenue,
            product_metrics,
        })
    }
}

/// Run `f` over the dataset on the blocking thread pool.
fn blocking<T, F>(
    dataset: &Arc<Dataset>,
    f: F,
) -> impl Future<Output = Result<T, AnalyticsError>> + use<T, F>
where
    F: FnOnce(&Dataset) -> T + Send + 'static,
    T: Send + 'static,
{
    let dataset = Arc::clone(dataset);
    join(
        Stage::Aggregate,
        tokio::task::spawn_blocking(move || f(&dataset)),
    )
}

async fn join<T>(stage: Stage, handle: JoinHandle<T>) -> Result<T, AnalyticsError> {
    handle
        .await
        .map_err(|source| AnalyticsError::Task { stage, source })
}

struct Tables {
    revenue_by_category: Vec<CategoryRevenue>,
    top_products: Vec<ProductRevenue>,
    co_occurrence_pairs: Vec<CoOccurrencePair>,
    funnel: FunnelSummary,
    user_segments: Vec<SegmentSummary>,
    cohort_revenue: Vec<CohortRevenue>,
    product_metrics: Vec<ProductMetricSummary>,
}
