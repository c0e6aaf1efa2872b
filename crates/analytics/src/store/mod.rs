//! Store clients for the entity (document) store and the session
//! (wide-column) store.
//!
//! Both stores are read-only from the analytics core's perspective. Each has a
//! `PostgreSQL`-backed implementation ([`PgEntityStore`], [`PgSessionStore`])
//! and an in-memory one ([`MemoryEntityStore`], [`MemorySessionStore`]) used
//! by fixture runs and tests.
//!
//! # Entity store
//!
//! Query by ID set or predicate. Unknown IDs simply produce fewer rows: a
//! partial result is never an error.
//!
//! # Session store
//!
//! Range scans over composite row keys, returned as lazy streams ordered by
//! row key ascending (entity ID, then temporal marker). A prefix scan yields
//! all of one entity's rows contiguously; the sampler depends on that.

pub mod memory;
pub mod postgres;

use std::collections::BTreeSet;
use std::future::Future;

use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use thiserror::Error;

use ecomlens_core::{
    Category, CategoryId, KeyRange, Product, ProductId, ProductMetric, RowKeyError, SessionEvent,
    Transaction, User, UserId,
};

pub use memory::{MemoryEntityStore, MemorySessionStore};
pub use postgres::{PgEntityStore, PgSessionStore, create_pool};

/// Errors that can occur while reading from a store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached (connection refused, timeout, pool closed).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store was reachable but the query failed.
    #[error("query failed: {0}")]
    Query(String),

    /// Data in the store is corrupted or violates a key invariant.
    #[error("data corruption: {0}")]
    Corrupt(String),

    /// A session row was written twice under the same key.
    #[error("row key {0} already exists")]
    DuplicateRowKey(String),

    /// A row key could not be encoded or decoded.
    #[error("row key error: {0}")]
    RowKey(#[from] RowKeyError),

    /// A fixture file could not be read or parsed.
    #[error("fixture error: {0}")]
    Fixture(String),
}

impl StoreError {
    /// Whether this error means the store could not be reached at all.
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => Self::Unavailable(err.to_string()),
            sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::Decode(_)
            | sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::TypeNotFound { .. } => Self::Corrupt(err.to_string()),
            _ => Self::Query(err.to_string()),
        }
    }
}

// =============================================================================
// Filters
// =============================================================================

/// User query predicate. The default matches every user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserFilter {
    pub ids: Option<BTreeSet<UserId>>,
    pub registered_from: Option<DateTime<Utc>>,
    pub registered_to: Option<DateTime<Utc>>,
}

impl UserFilter {
    /// Match users by ID.
    #[must_use]
    pub fn ids(ids: impl IntoIterator<Item = UserId>) -> Self {
        Self {
            ids: Some(ids.into_iter().collect()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn matches(&self, user: &User) -> bool {
        self.ids.as_ref().is_none_or(|ids| ids.contains(&user.id))
            && self.registered_from.is_none_or(|from| user.registered_at >= from)
            && self.registered_to.is_none_or(|to| user.registered_at < to)
    }
}

/// Category query predicate. The default matches every category.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryFilter {
    pub ids: Option<BTreeSet<CategoryId>>,
}

impl CategoryFilter {
    #[must_use]
    pub fn matches(&self, category: &Category) -> bool {
        self.ids.as_ref().is_none_or(|ids| ids.contains(&category.id))
    }
}

/// Product query predicate. The default matches every product.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductFilter {
    pub ids: Option<BTreeSet<ProductId>>,
    pub category_ids: Option<BTreeSet<CategoryId>>,
}

impl ProductFilter {
    /// Match products by ID.
    #[must_use]
    pub fn ids(ids: impl IntoIterator<Item = ProductId>) -> Self {
        Self {
            ids: Some(ids.into_iter().collect()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn matches(&self, product: &Product) -> bool {
        self.ids.as_ref().is_none_or(|ids| ids.contains(&product.id))
            && self
                .category_ids
                .as_ref()
                .is_none_or(|ids| ids.contains(&product.category_id))
    }
}

/// Transaction query predicate. The default matches every transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionFilter {
    pub user_ids: Option<BTreeSet<UserId>>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl TransactionFilter {
    /// Match transactions of the given users.
    #[must_use]
    pub fn users(ids: impl IntoIterator<Item = UserId>) -> Self {
        Self {
            user_ids: Some(ids.into_iter().collect()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn matches(&self, tx: &Transaction) -> bool {
        self.user_ids
            .as_ref()
            .is_none_or(|ids| ids.contains(&tx.user_id))
            && self.from.is_none_or(|from| tx.timestamp >= from)
            && self.to.is_none_or(|to| tx.timestamp < to)
    }
}

// =============================================================================
// Store traits
// =============================================================================

/// Typed read access to users, categories, products and transactions.
///
/// Results are ordered by ID ascending; transactions by timestamp, then ID.
pub trait EntityStore: Send + Sync {
    /// Human-readable store name for logs and error context.
    fn name(&self) -> &str;

    fn users(
        &self,
        filter: &UserFilter,
    ) -> impl Future<Output = Result<Vec<User>, StoreError>> + Send;

    fn categories(
        &self,
        filter: &CategoryFilter,
    ) -> impl Future<Output = Result<Vec<Category>, StoreError>> + Send;

    fn products(
        &self,
        filter: &ProductFilter,
    ) -> impl Future<Output = Result<Vec<Product>, StoreError>> + Send;

    fn transactions(
        &self,
        filter: &TransactionFilter,
    ) -> impl Future<Output = Result<Vec<Transaction>, StoreError>> + Send;
}

/// Ordered range scans over the session store.
pub trait SessionStore: Send + Sync {
    /// Human-readable store name for logs and error context.
    fn name(&self) -> &str;

    /// Stream session events whose row key falls in `range`, in key order.
    fn scan_sessions(&self, range: &KeyRange) -> BoxStream<'_, Result<SessionEvent, StoreError>>;

    /// Stream product metrics whose row key falls in `range`, in key order.
    fn scan_product_metrics(
        &self,
        range: &KeyRange,
    ) -> BoxStream<'_, Result<ProductMetric, StoreError>>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn user(id: &str, day: u32) -> User {
        User {
            id: UserId::parse(id).unwrap(),
            name: None,
            country: None,
            city: None,
            registered_at: Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_default_user_filter_matches_all() {
        assert!(UserFilter::default().matches(&user("u1", 1)));
    }

    #[test]
    fn test_user_filter_by_ids_and_window() {
        let filter = UserFilter {
            ids: Some([UserId::parse("u1").unwrap()].into()),
            registered_from: Some(Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap()),
            registered_to: None,
        };
        assert!(!filter.matches(&user("u1", 1)));
        assert!(filter.matches(&user("u1", 3)));
        assert!(!filter.matches(&user("u2", 3)));
    }

    #[test]
    fn test_sqlx_error_classification() {
        assert!(StoreError::from(sqlx::Error::PoolTimedOut).is_unavailable());
        assert!(!StoreError::from(sqlx::Error::RowNotFound).is_unavailable());
    }
}
