//! `PostgreSQL`-backed stores.
//!
//! # Entity store tables
//!
//! - `users (id, name, country, city, registered_at)`
//! - `categories (id, name, parent_id)`
//! - `products (id, category_id, name, price NUMERIC)`
//! - `transactions (id, user_id, product_id, quantity INT4, unit_price NUMERIC, occurred_at)`
//!
//! # Session store tables
//!
//! - `session_events (row_key TEXT COLLATE "C" PRIMARY KEY, user_id, started_at,
//!   action, product_id, duration_secs, page_count, product_detail_views)`
//! - `product_metrics (row_key TEXT COLLATE "C" PRIMARY KEY, product_id,
//!   metric_date DATE, views INT8, purchases INT8)`
//!
//! Row keys are compared with the `C` collation so that database order is the
//! same byte-wise order the row key codec is designed around. Schema setup is
//! owned by the data loader, not by this crate.
//!
//! Queries are checked at runtime (`sqlx::query_as`) so the crate builds
//! without a live database.

use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use futures::stream::{BoxStream, StreamExt};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{debug, instrument};

use ecomlens_core::{
    Category, CategoryId, KeyRange, MetricKey, Price, Product, ProductId, ProductMetric, RowKey,
    SessionAction, SessionEvent, SessionKey, Transaction, TransactionId, User, UserId,
};

use super::{
    CategoryFilter, EntityStore, ProductFilter, SessionStore, StoreError, TransactionFilter,
    UserFilter,
};

/// Create a `PostgreSQL` connection pool.
///
/// # Errors
///
/// Returns [`StoreError::Unavailable`] if the connection cannot be established
/// within `acquire_timeout`.
pub async fn create_pool(
    database_url: &SecretString,
    max_connections: u32,
    acquire_timeout: Duration,
) -> Result<PgPool, StoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .min_connections(1)
        .acquire_timeout(acquire_timeout)
        .connect(database_url.expose_secret())
        .await?;
    Ok(pool)
}

fn corrupt(what: &str, detail: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt(format!("{what}: {detail}"))
}

fn id_list<T: AsRef<str>>(ids: Option<&std::collections::BTreeSet<T>>) -> Option<Vec<String>> {
    ids.map(|ids| ids.iter().map(|id| id.as_ref().to_owned()).collect())
}

fn price(what: &str, amount: Decimal) -> Result<Price, StoreError> {
    Price::new(amount).map_err(|e| corrupt(what, e))
}

fn count<T, U>(what: &str, value: T) -> Result<U, StoreError>
where
    U: TryFrom<T>,
    T: std::fmt::Display + Copy,
{
    U::try_from(value).map_err(|_| corrupt(what, format!("{value} is out of range")))
}

// =============================================================================
// Internal Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct UserRow {
    id: String,
    name: Option<String>,
    country: Option<String>,
    city: Option<String>,
    registered_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: UserId::parse(&row.id).map_err(|e| corrupt("users.id", e))?,
            name: row.name,
            country: row.country,
            city: row.city,
            registered_at: row.registered_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CategoryRow {
    id: String,
    name: String,
    parent_id: Option<String>,
}

impl TryFrom<CategoryRow> for Category {
    type Error = StoreError;

    fn try_from(row: CategoryRow) -> Result<Self, Self::Error> {
        let parent_id = row
            .parent_id
            .as_deref()
            .map(CategoryId::parse)
            .transpose()
            .map_err(|e| corrupt("categories.parent_id", e))?;
        Ok(Self {
            id: CategoryId::parse(&row.id).map_err(|e| corrupt("categories.id", e))?,
            name: row.name,
            parent_id,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ProductRow {
    id: String,
    category_id: String,
    name: String,
    price: Decimal,
}

impl TryFrom<ProductRow> for Product {
    type Error = StoreError;

    fn try_from(row: ProductRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: ProductId::parse(&row.id).map_err(|e| corrupt("products.id", e))?,
            category_id: CategoryId::parse(&row.category_id)
                .map_err(|e| corrupt("products.category_id", e))?,
            name: row.name,
            price: price("products.price", row.price)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TransactionRow {
    id: String,
    user_id: String,
    product_id: String,
    quantity: i32,
    unit_price: Decimal,
    occurred_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = StoreError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: TransactionId::parse(&row.id).map_err(|e| corrupt("transactions.id", e))?,
            user_id: UserId::parse(&row.user_id).map_err(|e| corrupt("transactions.user_id", e))?,
            product_id: ProductId::parse(&row.product_id)
                .map_err(|e| corrupt("transactions.product_id", e))?,
            quantity: count("transactions.quantity", row.quantity)?,
            unit_price: price("transactions.unit_price", row.unit_price)?,
            timestamp: row.occurred_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    row_key: String,
    user_id: String,
    started_at: DateTime<Utc>,
    action: String,
    product_id: Option<String>,
    duration_secs: i32,
    page_count: i32,
    product_detail_views: i32,
}

impl SessionRow {
    /// Convert to a session event, checking the row key against the columns.
    fn into_event(self) -> Result<SessionEvent, StoreError> {
        let key = SessionKey::decode(&self.row_key)?;
        if key.user_id.as_str() != self.user_id
            || key.started_at.timestamp_millis() != self.started_at.timestamp_millis()
        {
            return Err(corrupt(
                "session_events.row_key",
                format!("{} does not match its columns", self.row_key),
            ));
        }
        let action: SessionAction = self
            .action
            .parse()
            .map_err(|e| corrupt("session_events.action", e))?;
        let product_id = self
            .product_id
            .as_deref()
            .map(ProductId::parse)
            .transpose()
            .map_err(|e| corrupt("session_events.product_id", e))?;
        Ok(SessionEvent {
            user_id: key.user_id,
            started_at: key.started_at,
            action,
            product_id,
            duration_secs: count("session_events.duration_secs", self.duration_secs)?,
            page_count: count("session_events.page_count", self.page_count)?,
            product_detail_views: count(
                "session_events.product_detail_views",
                self.product_detail_views,
            )?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct MetricRow {
    row_key: String,
    product_id: String,
    metric_date: NaiveDate,
    views: i64,
    purchases: i64,
}

impl MetricRow {
    fn into_metric(self) -> Result<ProductMetric, StoreError> {
        let key = MetricKey::decode(&self.row_key)?;
        if key.product_id.as_str() != self.product_id || key.date != self.metric_date {
            return Err(corrupt(
                "product_metrics.row_key",
                format!("{} does not match its columns", self.row_key),
            ));
        }
        Ok(ProductMetric {
            product_id: key.product_id,
            date: key.date,
            views: count("product_metrics.views", self.views)?,
            purchases: count("product_metrics.purchases", self.purchases)?,
        })
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>, StoreError>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

// =============================================================================
// Entity store
// =============================================================================

/// Entity store backed by a `PostgreSQL` database.
#[derive(Debug, Clone)]
pub struct PgEntityStore {
    pool: PgPool,
}

impl PgEntityStore {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to the entity database.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the database cannot be reached.
    pub async fn connect(
        database_url: &SecretString,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, StoreError> {
        Ok(Self::new(
            create_pool(database_url, max_connections, acquire_timeout).await?,
        ))
    }
}

impl EntityStore for PgEntityStore {
    fn name(&self) -> &str {
        "postgres-entity-store"
    }

    #[instrument(skip(self), fields(store = self.name()))]
    async fn users(&self, filter: &UserFilter) -> Result<Vec<User>, StoreError> {
        let rows: Vec<UserRow> = sqlx::query_as(
            r#"
            SELECT id, name, country, city, registered_at
            FROM users
            WHERE ($1::text[] IS NULL OR id = ANY($1))
              AND ($2::timestamptz IS NULL OR registered_at >= $2)
              AND ($3::timestamptz IS NULL OR registered_at < $3)
            ORDER BY id COLLATE "C"
            "#,
        )
        .bind(id_list(filter.ids.as_ref()))
        .bind(filter.registered_from)
        .bind(filter.registered_to)
        .fetch_all(&self.pool)
        .await?;
        debug!(rows = rows.len(), "Fetched users");
        convert_all(rows)
    }

    #[instrument(skip(self), fields(store = self.name()))]
    async fn categories(&self, filter: &CategoryFilter) -> Result<Vec<Category>, StoreError> {
        let rows: Vec<CategoryRow> = sqlx::query_as(
            r#"
            SELECT id, name, parent_id
            FROM categories
            WHERE ($1::text[] IS NULL OR id = ANY($1))
            ORDER BY id COLLATE "C"
            "#,
        )
        .bind(id_list(filter.ids.as_ref()))
        .fetch_all(&self.pool)
        .await?;
        debug!(rows = rows.len(), "Fetched categories");
        convert_all(rows)
    }

    #[instrument(skip(self), fields(store = self.name()))]
    async fn products(&self, filter: &ProductFilter) -> Result<Vec<Product>, StoreError> {
        let rows: Vec<ProductRow> = sqlx::query_as(
            r#"
            SELECT id, category_id, name, price
            FROM products
            WHERE ($1::text[] IS NULL OR id = ANY($1))
              AND ($2::text[] IS NULL OR category_id = ANY($2))
            ORDER BY id COLLATE "C"
            "#,
        )
        .bind(id_list(filter.ids.as_ref()))
        .bind(id_list(filter.category_ids.as_ref()))
        .fetch_all(&self.pool)
        .await?;
        debug!(rows = rows.len(), "Fetched products");
        convert_all(rows)
    }

    #[instrument(skip(self), fields(store = self.name()))]
    async fn transactions(
        &self,
        filter: &TransactionFilter,
    ) -> Result<Vec<Transaction>, StoreError> {
        let rows: Vec<TransactionRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, product_id, quantity, unit_price, occurred_at
            FROM transactions
            WHERE ($1::text[] IS NULL OR user_id = ANY($1))
              AND ($2::timestamptz IS NULL OR occurred_at >= $2)
              AND ($3::timestamptz IS NULL OR occurred_at < $3)
            ORDER BY occurred_at, id COLLATE "C"
            "#,
        )
        .bind(id_list(filter.user_ids.as_ref()))
        .bind(filter.from)
        .bind(filter.to)
        .fetch_all(&self.pool)
        .await?;
        debug!(rows = rows.len(), "Fetched transactions");
        convert_all(rows)
    }
}

// =============================================================================
// Session store
// =============================================================================

/// Session store backed by a `PostgreSQL` database.
#[derive(Debug, Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to the session database.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the database cannot be reached.
    pub async fn connect(
        database_url: &SecretString,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, StoreError> {
        Ok(Self::new(
            create_pool(database_url, max_connections, acquire_timeout).await?,
        ))
    }
}

impl SessionStore for PgSessionStore {
    fn name(&self) -> &str {
        "postgres-session-store"
    }

    fn scan_sessions(&self, range: &KeyRange) -> BoxStream<'_, Result<SessionEvent, StoreError>> {
        debug!(%range, "Scanning session_events");
        sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT row_key, user_id, started_at, action, product_id,
                   duration_secs, page_count, product_detail_views
            FROM session_events
            WHERE row_key COLLATE "C" >= $1
              AND ($2::text IS NULL OR row_key COLLATE "C" < $2)
            ORDER BY row_key COLLATE "C"
            "#,
        )
        .bind(range.start.clone())
        .bind(range.end.clone())
        .fetch(&self.pool)
        .map(|row| row.map_err(StoreError::from).and_then(SessionRow::into_event))
        .boxed()
    }

    fn scan_product_metrics(
        &self,
        range: &KeyRange,
    ) -> BoxStream<'_, Result<ProductMetric, StoreError>> {
        debug!(%range, "Scanning product_metrics");
        sqlx::query_as::<_, MetricRow>(
            r#"
            SELECT row_key, product_id, metric_date, views, purchases
            FROM product_metrics
            WHERE row_key COLLATE "C" >= $1
              AND ($2::text IS NULL OR row_key COLLATE "C" < $2)
            ORDER BY row_key COLLATE "C"
            "#,
        )
        .bind(range.start.clone())
        .bind(range.end.clone())
        .fetch(&self.pool)
        .map(|row| row.map_err(StoreError::from).and_then(MetricRow::into_metric))
        .boxed()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn session_row(row_key: &str, user_id: &str, millis: i64) -> SessionRow {
        SessionRow {
            row_key: row_key.to_owned(),
            user_id: user_id.to_owned(),
            started_at: DateTime::from_timestamp_millis(millis).unwrap(),
            action: "converted".to_owned(),
            product_id: Some("p1".to_owned()),
            duration_secs: 120,
            page_count: 4,
            product_detail_views: 2,
        }
    }

    #[test]
    fn test_session_row_into_event() {
        let event = session_row("u1#0000000001000", "u1", 1000)
            .into_event()
            .unwrap();
        assert_eq!(event.user_id.as_str(), "u1");
        assert_eq!(event.action, SessionAction::Convert);
        assert_eq!(event.duration_secs, 120);
        assert_eq!(event.row_key().unwrap(), "u1#0000000001000");
    }

    #[test]
    fn test_session_row_key_mismatch_is_corrupt() {
        let result = session_row("u1#0000000001000", "u2", 1000).into_event();
        assert!(matches!(result, Err(StoreError::Corrupt(_))));
        let result = session_row("u1#0000000001000", "u1", 2000).into_event();
        assert!(matches!(result, Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn test_negative_counter_is_corrupt() {
        let mut row = session_row("u1#0000000001000", "u1", 1000);
        row.duration_secs = -5;
        assert!(matches!(row.into_event(), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn test_negative_price_is_corrupt() {
        let row = ProductRow {
            id: "p1".to_owned(),
            category_id: "c1".to_owned(),
            name: "Tea".to_owned(),
            price: Decimal::new(-100, 2),
        };
        assert!(matches!(Product::try_from(row), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn test_metric_row_into_metric() {
        let row = MetricRow {
            row_key: "p1#2024-02-03".to_owned(),
            product_id: "p1".to_owned(),
            metric_date: NaiveDate::from_ymd_opt(2024, 2, 3).unwrap(),
            views: 10,
            purchases: 2,
        };
        let metric = row.into_metric().unwrap();
        assert_eq!(metric.views, 10);
        assert_eq!(metric.purchases, 2);
    }
}
