//! Aggregations over a reconciled [`Dataset`](crate::dataset::Dataset).
//!
//! Every function here is pure and deterministic: it reads the frozen
//! dataset and returns a freshly allocated, fully sorted table. The pipeline
//! runs them concurrently on the blocking thread pool.

pub mod cooccurrence;
pub mod funnel;
pub mod metrics;
pub mod revenue;
pub mod segments;
pub mod user;

pub use cooccurrence::{CoOccurrencePair, co_occurrence};
pub use funnel::{FunnelCount, FunnelSummary, funnel};
pub use metrics::{ProductMetricSummary, product_metric_summary};
pub use revenue::{CategoryRevenue, ProductRevenue, revenue_by_category, top_products};
pub use segments::{CohortRevenue, SegmentSummary, cohort_revenue, user_segments};
pub use user::{UserEngagement, UserSpend, user_engagement, user_spend};

use rust_decimal::Decimal;

/// `total / count` rounded to cents, or zero when `count` is zero.
pub(crate) fn average(total: Decimal, count: u64) -> Decimal {
    if count == 0 {
        return Decimal::ZERO;
    }
    total
        .checked_div(Decimal::from(count))
        .map_or(Decimal::ZERO, |avg| avg.round_dp(2))
}

/// `numerator / denominator` as a float, or zero when `denominator` is zero.
#[allow(clippy::cast_precision_loss)]
pub(crate) fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}
