//! Product view/purchase summary from the daily product metrics.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use ecomlens_core::ProductId;

use super::ratio;
use crate::dataset::Dataset;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductMetricSummary {
    pub product_id: ProductId,
    pub product_name: Option<String>,
    pub views: u64,
    pub purchases: u64,
    /// `purchases / views`, zero for products never viewed.
    pub view_to_purchase_rate: f64,
    /// Days with a metric row.
    pub days: u64,
}

/// Totals per product, most purchases first (ties by product ID).
#[must_use]
pub fn product_metric_summary(dataset: &Dataset) -> Vec<ProductMetricSummary> {
    let names: HashMap<&ProductId, &str> = dataset
        .products
        .iter()
        .map(|p| (&p.id, p.name.as_str()))
        .collect();

    let mut totals: BTreeMap<&ProductId, (u64, u64, u64)> = BTreeMap::new();
    for metric in &dataset.product_metrics {
        let (views, purchases, days) = totals.entry(&metric.product_id).or_default();
        *views = views.saturating_add(metric.views);
        *purchases = purchases.saturating_add(metric.purchases);
        *days += 1;
    }

    let mut rows: Vec<ProductMetricSummary> = totals
        .into_iter()
        .map(|(id, (views, purchases, days))| ProductMetricSummary {
            product_id: id.clone(),
            product_name: names.get(id).map(|n| (*n).to_owned()),
            views,
            purchases,
            view_to_purchase_rate: ratio(purchases, views),
            days,
        })
        .collect();
    // Stable sort keeps the BTreeMap's ID order among ties.
    rows.sort_by(|a, b| b.purchases.cmp(&a.purchases));
    rows
}
