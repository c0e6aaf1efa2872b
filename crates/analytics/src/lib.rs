//! ecomlens Analytics - Cross-store e-commerce analytics.
//!
//! Reads transactional entities from a document-style entity store and
//! time-series session events from a wide-column session store, reconciles
//! the two key models, and produces revenue, co-occurrence, funnel and
//! customer lifetime value tables.
//!
//! # Usage
//!
//! ```rust,ignore
//! use ecomlens_analytics::{AnalyticsConfig, AnalyticsRun};
//! use ecomlens_analytics::store::{MemoryEntityStore, MemorySessionStore};
//!
//! let config = AnalyticsConfig::from_env()?;
//! let entities = MemoryEntityStore::load_dir(dir).await?;
//! let sessions = MemorySessionStore::load_dir(dir).await?;
//! let report = AnalyticsRun::new(&config, &entities, &sessions).execute().await?;
//! ```
//!
//! # Modules
//!
//! - [`store`] - Entity and session store clients (`PostgreSQL` and in-memory)
//! - [`sampler`] - Deterministic stratified session sampling
//! - [`dataset`] - Referential reconciliation into a frozen dataset
//! - [`aggregate`] - Revenue, co-occurrence, funnel, segment and cohort tables
//! - [`clv`] - Customer lifetime value integration
//! - [`pipeline`] - Staged, cancellable run orchestration
//! - [`config`] - Run and store configuration

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod aggregate;
pub mod clv;
pub mod config;
pub mod dataset;
pub mod diagnostics;
pub mod error;
pub mod join;
pub mod pipeline;
pub mod report;
pub mod sampler;
pub mod store;

pub use config::{AnalyticsConfig, ClvWeights, ConfigError, StoreConfig};
pub use diagnostics::{GapKind, RunDiagnostics};
pub use error::{AnalyticsError, Stage};
pub use pipeline::AnalyticsRun;
pub use report::AnalyticsReport;
pub use sampler::{SamplingStrategy, SessionSample, SessionSampler};
pub use store::{EntityStore, SessionStore, StoreError};
