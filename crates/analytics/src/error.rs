//! Run-level errors.

use thiserror::Error;

use crate::config::ConfigError;
use crate::store::StoreError;

/// Stage of an analytics run, used as error and log context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    LoadEntities,
    Reconcile,
    Sample,
    Aggregate,
    Integrate,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LoadEntities => write!(f, "load_entities"),
            Self::Reconcile => write!(f, "reconcile"),
            Self::Sample => write!(f, "sample"),
            Self::Aggregate => write!(f, "aggregate"),
            Self::Integrate => write!(f, "integrate"),
        }
    }
}

/// Errors that abort an analytics run. No report is produced.
#[derive(Debug, Error)]
pub enum AnalyticsError {
    /// A store could not be reached.
    #[error("{stage}: {store} unavailable while reading {target}: {source}")]
    StoreUnavailable {
        stage: Stage,
        store: String,
        /// The collection or key range being read.
        target: String,
        #[source]
        source: StoreError,
    },

    /// A store was reachable but returned an error or corrupt data.
    #[error("{stage}: {store} failed while reading {target}: {source}")]
    Store {
        stage: Stage,
        store: String,
        target: String,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The run was cancelled before `stage` finished.
    #[error("run cancelled during {stage}")]
    Cancelled { stage: Stage },

    /// A blocking aggregation task panicked or was aborted.
    #[error("{stage}: task failed: {source}")]
    Task {
        stage: Stage,
        #[source]
        source: tokio::task::JoinError,
    },
}

impl AnalyticsError {
    /// Wrap a store error with its context, keeping unavailability distinct.
    pub fn store(
        stage: Stage,
        store: &str,
        target: impl Into<String>,
        source: StoreError,
    ) -> Self {
        let (store, target) = (store.to_owned(), target.into());
        if source.is_unavailable() {
            Self::StoreUnavailable {
                stage,
                store,
                target,
                source,
            }
        } else {
            Self::Store {
                stage,
                store,
                target,
                source,
            }
        }
    }

    /// The stage the run failed in, if any.
    #[must_use]
    pub const fn stage(&self) -> Option<Stage> {
        match self {
            Self::StoreUnavailable { stage, .. }
            | Self::Store { stage, .. }
            | Self::Cancelled { stage }
            | Self::Task { stage, .. } => Some(*stage),
            Self::Config(_) => None,
        }
    }

    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. })
    }

    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}
