//! The output of one analytics run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::{
    CategoryRevenue, CoOccurrencePair, CohortRevenue, FunnelSummary, ProductMetricSummary,
    ProductRevenue, SegmentSummary,
};
use crate::clv::ClvRecord;
use crate::diagnostics::RunDiagnostics;

/// Every result table of a completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsReport {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub revenue_by_category: Vec<CategoryRevenue>,
    pub top_products: Vec<ProductRevenue>,
    pub co_occurrence_pairs: Vec<CoOccurrencePair>,
    pub funnel_counts: FunnelSummary,
    pub clv_records: Vec<ClvRecord>,
    pub user_segments: Vec<SegmentSummary>,
    pub cohort_revenue: Vec<CohortRevenue>,
    pub product_metrics: Vec<ProductMetricSummary>,
    pub diagnostics: RunDiagnostics,
}

impl AnalyticsReport {
    /// Names of the tables returned by [`tables`](Self::tables).
    pub const TABLES: [&'static str; 9] = [
        "revenue_by_category",
        "top_products",
        "co_occurrence_pairs",
        "funnel_counts",
        "clv_records",
        "user_segments",
        "cohort_revenue",
        "product_metrics",
        "diagnostics",
    ];

    /// Each table as a named JSON value, in [`TABLES`](Self::TABLES) order.
    ///
    /// # Errors
    ///
    /// Returns an error if a table fails to serialize.
    pub fn tables(&self) -> Result<Vec<(&'static str, serde_json::Value)>, serde_json::Error> {
        let values = [
            serde_json::to_value(&self.revenue_by_category)?,
            serde_json::to_value(&self.top_products)?,
            serde_json::to_value(&self.co_occurrence_pairs)?,
            serde_json::to_value(&self.funnel_counts)?,
            serde_json::to_value(&self.clv_records)?,
            serde_json::to_value(&self.user_segments)?,
            serde_json::to_value(&self.cohort_revenue)?,
            serde_json::to_value(&self.product_metrics)?,
            serde_json::to_value(&self.diagnostics)?,
        ];
        Ok(Self::TABLES.into_iter().zip(values).collect())
    }
}
