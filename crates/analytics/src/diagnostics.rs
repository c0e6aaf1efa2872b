//! Per-run diagnostics.
//!
//! Records excluded because a reference did not resolve are tallied here
//! rather than dropped silently, and empty inputs are noted so an all-zero
//! report can be told apart from a broken one.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::sampler::SampleStats;

/// A referential gap between the two stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapKind {
    /// Product whose category does not exist.
    ProductUnknownCategory,
    /// Transaction whose user does not exist.
    TransactionUnknownUser,
    /// Transaction whose product does not exist (or was itself excluded).
    TransactionUnknownProduct,
    /// Session event whose user does not exist.
    SessionUnknownUser,
    /// Session event whose product does not exist (or was itself excluded).
    SessionUnknownProduct,
}

impl std::fmt::Display for GapKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ProductUnknownCategory => "product_unknown_category",
            Self::TransactionUnknownUser => "transaction_unknown_user",
            Self::TransactionUnknownProduct => "transaction_unknown_product",
            Self::SessionUnknownUser => "session_unknown_user",
            Self::SessionUnknownProduct => "session_unknown_product",
        };
        f.write_str(name)
    }
}

/// An input collection of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    Users,
    Categories,
    Products,
    Transactions,
    Sessions,
    ProductMetrics,
}

/// Number of valid records per input after reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputCounts {
    pub users: usize,
    pub categories: usize,
    pub products: usize,
    pub transactions: usize,
    pub sessions: usize,
    pub product_metrics: usize,
}

impl InputCounts {
    fn get(&self, kind: InputKind) -> usize {
        match kind {
            InputKind::Users => self.users,
            InputKind::Categories => self.categories,
            InputKind::Products => self.products,
            InputKind::Transactions => self.transactions,
            InputKind::Sessions => self.sessions,
            InputKind::ProductMetrics => self.product_metrics,
        }
    }
}

/// Diagnostics emitted alongside the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunDiagnostics {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Excluded records per gap kind.
    pub skipped: BTreeMap<GapKind, u64>,
    /// Inputs that had no valid records.
    pub empty_inputs: BTreeSet<InputKind>,
    pub inputs: InputCounts,
    pub sample: SampleStats,
    /// Whether the product metric scan stopped at `max_scan_records`.
    #[serde(default)]
    pub metrics_truncated: bool,
}

impl RunDiagnostics {
    #[must_use]
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            finished_at: None,
            skipped: BTreeMap::new(),
            empty_inputs: BTreeSet::new(),
            inputs: InputCounts::default(),
            sample: SampleStats::default(),
            metrics_truncated: false,
        }
    }

    /// Count one excluded record.
    pub fn record_gap(&mut self, kind: GapKind) {
        *self.skipped.entry(kind).or_insert(0) += 1;
    }

    /// Excluded records of one kind.
    #[must_use]
    pub fn skipped(&self, kind: GapKind) -> u64 {
        self.skipped.get(&kind).copied().unwrap_or(0)
    }

    /// Excluded records of every kind.
    #[must_use]
    pub fn skipped_total(&self) -> u64 {
        self.skipped.values().sum()
    }

    /// Set the valid input counts and note which inputs are empty.
    pub fn set_inputs(&mut self, inputs: InputCounts) {
        self.inputs = inputs;
        self.empty_inputs = [
            InputKind::Users,
            InputKind::Categories,
            InputKind::Products,
            InputKind::Transactions,
            InputKind::Sessions,
            InputKind::ProductMetrics,
        ]
        .into_iter()
        .filter(|kind| inputs.get(*kind) == 0)
        .collect();
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }
}
