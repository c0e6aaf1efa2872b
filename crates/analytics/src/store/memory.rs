//! In-memory stores.
//!
//! Used for fixture runs (JSON-lines files, one record per line, as written
//! by the data generator) and for tests. The session store keeps rows in a
//! `BTreeMap` keyed by the encoded row key, which reproduces the wide-column
//! store's byte-wise key ordering exactly.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::stream::{self, BoxStream, StreamExt};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use ecomlens_core::{
    Category, KeyRange, Product, ProductMetric, RowKey, SessionEvent, Transaction,
    TransactionRecord, User,
};

use super::{
    CategoryFilter, EntityStore, ProductFilter, SessionStore, StoreError, TransactionFilter,
    UserFilter,
};

/// Fixture file names inside a data directory.
pub const USERS_FILE: &str = "users.json";
pub const CATEGORIES_FILE: &str = "categories.json";
pub const PRODUCTS_FILE: &str = "products.json";
pub const TRANSACTIONS_FILE: &str = "transactions.json";
pub const SESSIONS_FILE: &str = "sessions.json";
pub const PRODUCT_METRICS_FILE: &str = "product_metrics.json";

/// Parse JSON-lines content, skipping blank lines.
///
/// # Errors
///
/// Returns [`StoreError::Fixture`] naming the first line that fails to parse.
pub fn parse_json_lines<T: DeserializeOwned>(
    source: &str,
    content: &str,
) -> Result<Vec<T>, StoreError> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line)
                .map_err(|e| StoreError::Fixture(format!("{source}:{}: {e}", n + 1)))
        })
        .collect()
}

async fn read_json_lines<T: DeserializeOwned>(
    dir: &Path,
    file: &str,
    required: bool,
) -> Result<Vec<T>, StoreError> {
    let path = dir.join(file);
    match tokio::fs::read_to_string(&path).await {
        Ok(content) => {
            let records = parse_json_lines(&path.display().to_string(), &content)?;
            debug!(path = %path.display(), records = records.len(), "Loaded fixture file");
            Ok(records)
        }
        Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(StoreError::Fixture(format!("{}: {e}", path.display()))),
    }
}

/// Flatten transaction records into purchase lines.
fn expand_orders(records: Vec<TransactionRecord>) -> Result<Vec<Transaction>, StoreError> {
    let mut lines = Vec::with_capacity(records.len());
    for record in records {
        let expanded = record
            .into_transactions()
            .map_err(|e| StoreError::Fixture(format!("{TRANSACTIONS_FILE}: {e}")))?;
        lines.extend(expanded);
    }
    Ok(lines)
}

fn offline_error(name: &str) -> StoreError {
    StoreError::Unavailable(format!("{name} is offline"))
}

// =============================================================================
// Entity store
// =============================================================================

/// Entity store held in memory.
#[derive(Debug, Default)]
pub struct MemoryEntityStore {
    users: Vec<User>,
    categories: Vec<Category>,
    products: Vec<Product>,
    transactions: Vec<Transaction>,
    offline: AtomicBool,
}

impl MemoryEntityStore {
    /// Create a store from already-materialized records.
    #[must_use]
    pub fn new(
        mut users: Vec<User>,
        mut categories: Vec<Category>,
        mut products: Vec<Product>,
        mut transactions: Vec<Transaction>,
    ) -> Self {
        users.sort_by(|a, b| a.id.cmp(&b.id));
        categories.sort_by(|a, b| a.id.cmp(&b.id));
        products.sort_by(|a, b| a.id.cmp(&b.id));
        transactions.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        Self {
            users,
            categories,
            products,
            transactions,
            offline: AtomicBool::new(false),
        }
    }

    /// Load `users.json`, `categories.json`, `products.json` and
    /// `transactions.json` from `dir`. Multi-item orders are split into one
    /// transaction per item.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Fixture`] if a file is missing or malformed.
    pub async fn load_dir(dir: &Path) -> Result<Self, StoreError> {
        let records = read_json_lines(dir, TRANSACTIONS_FILE, true).await?;
        let store = Self::new(
            read_json_lines(dir, USERS_FILE, true).await?,
            read_json_lines(dir, CATEGORIES_FILE, true).await?,
            read_json_lines(dir, PRODUCTS_FILE, true).await?,
            expand_orders(records)?,
        );
        info!(
            users = store.users.len(),
            categories = store.categories.len(),
            products = store.products.len(),
            transactions = store.transactions.len(),
            "Loaded entity fixtures"
        );
        Ok(store)
    }

    /// Simulate losing connectivity: every query fails with
    /// [`StoreError::Unavailable`] while offline.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(offline_error(self.name()));
        }
        Ok(())
    }
}

impl EntityStore for MemoryEntityStore {
    fn name(&self) -> &str {
        "memory-entity-store"
    }

    async fn users(&self, filter: &UserFilter) -> Result<Vec<User>, StoreError> {
        self.check_online()?;
        Ok(self.users.iter().filter(|u| filter.matches(u)).cloned().collect())
    }

    async fn categories(&self, filter: &CategoryFilter) -> Result<Vec<Category>, StoreError> {
        self.check_online()?;
        Ok(self
            .categories
            .iter()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect())
    }

    async fn products(&self, filter: &ProductFilter) -> Result<Vec<Product>, StoreError> {
        self.check_online()?;
        Ok(self
            .products
            .iter()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect())
    }

    async fn transactions(
        &self,
        filter: &TransactionFilter,
    ) -> Result<Vec<Transaction>, StoreError> {
        self.check_online()?;
        Ok(self
            .transactions
            .iter()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect())
    }
}

// =============================================================================
// Session store
// =============================================================================

/// Session store held in memory, ordered by encoded row key.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: BTreeMap<String, SessionEvent>,
    metrics: BTreeMap<String, ProductMetric>,
    offline: AtomicBool,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from session events.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateRowKey`] if two events share a key.
    pub fn from_sessions(
        events: impl IntoIterator<Item = SessionEvent>,
    ) -> Result<Self, StoreError> {
        let mut store = Self::new();
        for event in events {
            store.put_session(event)?;
        }
        Ok(store)
    }

    /// Load `sessions.json` and, if present, `product_metrics.json` from `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Fixture`] if `sessions.json` is missing or a file
    /// is malformed, or [`StoreError::DuplicateRowKey`] on a key collision.
    pub async fn load_dir(dir: &Path) -> Result<Self, StoreError> {
        let sessions: Vec<SessionEvent> = read_json_lines(dir, SESSIONS_FILE, true).await?;
        let metrics: Vec<ProductMetric> = read_json_lines(dir, PRODUCT_METRICS_FILE, false).await?;

        let mut store = Self::from_sessions(sessions)?;
        for metric in metrics {
            store.upsert_metric(metric)?;
        }
        info!(
            sessions = store.sessions.len(),
            product_metrics = store.metrics.len(),
            "Loaded session fixtures"
        );
        Ok(store)
    }

    /// Append a session event. Session rows are immutable: writing an
    /// existing key fails.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateRowKey`] if the key already exists, or a
    /// row key error if the timestamp cannot be encoded.
    pub fn put_session(&mut self, event: SessionEvent) -> Result<(), StoreError> {
        let key = event.row_key()?;
        if self.sessions.contains_key(&key) {
            return Err(StoreError::DuplicateRowKey(key));
        }
        self.sessions.insert(key, event);
        Ok(())
    }

    /// Write a product metric, replacing any earlier value for the same
    /// `(product_id, date)`.
    ///
    /// # Errors
    ///
    /// Returns a row key error if the date cannot be encoded.
    pub fn upsert_metric(&mut self, metric: ProductMetric) -> Result<(), StoreError> {
        let key = metric.key().encode()?;
        self.metrics.insert(key, metric);
        Ok(())
    }

    /// Number of stored session rows.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Simulate losing connectivity.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }
}

/// Scan a key-ordered map over a half-open range.
fn scan_map<'a, V: Clone + Send + Sync>(
    map: &'a BTreeMap<String, V>,
    range: &KeyRange,
) -> BoxStream<'a, Result<V, StoreError>> {
    // BTreeMap::range panics on an inverted range.
    if range.end.as_deref().is_some_and(|end| end <= range.start.as_str()) {
        return stream::empty().boxed();
    }
    let end = range
        .end
        .clone()
        .map_or(Bound::Unbounded, Bound::Excluded);
    let rows = map
        .range((Bound::Included(range.start.clone()), end))
        .map(|(_, value)| Ok(value.clone()));
    stream::iter(rows).boxed()
}

impl SessionStore for MemorySessionStore {
    fn name(&self) -> &str {
        "memory-session-store"
    }

    fn scan_sessions(&self, range: &KeyRange) -> BoxStream<'_, Result<SessionEvent, StoreError>> {
        if self.is_offline() {
            return stream::once(async { Err(offline_error("memory-session-store")) }).boxed();
        }
        scan_map(&self.sessions, range)
    }

    fn scan_product_metrics(
        &self,
        range: &KeyRange,
    ) -> BoxStream<'_, Result<ProductMetric, StoreError>> {
        if self.is_offline() {
            return stream::once(async { Err(offline_error("memory-session-store")) }).boxed();
        }
        scan_map(&self.metrics, range)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{DateTime, NaiveDate};
    use futures::TryStreamExt;

    use ecomlens_core::{ProductId, SessionAction, UserId};

    use super::*;

    fn event(user: &str, millis: i64) -> SessionEvent {
        SessionEvent {
            user_id: UserId::parse(user).unwrap(),
            started_at: DateTime::from_timestamp_millis(millis).unwrap(),
            action: SessionAction::Browse,
            product_id: None,
            duration_secs: 60,
            page_count: 1,
            product_detail_views: 0,
        }
    }

    fn store() -> MemorySessionStore {
        MemorySessionStore::from_sessions([
            event("u2", 5),
            event("u1", 30),
            event("u10", 1),
            event("u1", 10),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn test_full_scan_is_key_ordered() {
        let rows: Vec<SessionEvent> = store()
            .scan_sessions(&KeyRange::full())
            .try_collect()
            .await
            .unwrap();
        let keys: Vec<String> = rows.iter().map(|e| e.row_key().unwrap()).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert_eq!(rows.len(), 4);
    }

    #[tokio::test]
    async fn test_prefix_scan_yields_one_entity_in_time_order() {
        let rows: Vec<SessionEvent> = store()
            .scan_sessions(&KeyRange::prefix("u1"))
            .try_collect()
            .await
            .unwrap();
        let millis: Vec<i64> = rows.iter().map(|e| e.started_at.timestamp_millis()).collect();
        assert_eq!(millis, vec![10, 30]);
        assert!(rows.iter().all(|e| e.user_id.as_str() == "u1"));
    }

    #[tokio::test]
    async fn test_inverted_range_is_empty() {
        let rows: Vec<SessionEvent> = store()
            .scan_sessions(&KeyRange::between("z", "a"))
            .try_collect()
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_duplicate_session_key_is_rejected() {
        let mut store = store();
        let result = store.put_session(event("u1", 10));
        assert!(matches!(result, Err(StoreError::DuplicateRowKey(_))));
    }

    #[tokio::test]
    async fn test_metric_upsert_overwrites() {
        let mut store = MemorySessionStore::new();
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let product_id = ProductId::parse("p1").unwrap();
        for views in [3, 9] {
            store
                .upsert_metric(ProductMetric {
                    product_id: product_id.clone(),
                    date,
                    views,
                    purchases: 1,
                })
                .unwrap();
        }
        let rows: Vec<ProductMetric> = store
            .scan_product_metrics(&KeyRange::full())
            .try_collect()
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].views, 9);
    }

    #[tokio::test]
    async fn test_offline_store_fails() {
        let store = store();
        store.set_offline(true);
        let result: Result<Vec<SessionEvent>, _> =
            store.scan_sessions(&KeyRange::full()).try_collect().await;
        assert!(result.unwrap_err().is_unavailable());

        let entities = MemoryEntityStore::default();
        entities.set_offline(true);
        assert!(entities.users(&UserFilter::default()).await.unwrap_err().is_unavailable());
    }

    const USERS: &str = r#"{"user_id": "user_000001", "geo_data": {"city": "Lake Brenda", "state": "OH", "country": "US"}, "registration_date": "2024-02-10T09:15:00.250000", "last_active": "2025-10-30T18:02:11.004512"}
{"user_id": "user_000002", "geo_data": {"city": "Nordhausen", "state": "TH", "country": "DE"}, "registration_date": "2024-06-01T00:00:00", "last_active": "2025-11-01T07:45:00"}
"#;
    const CATEGORIES: &str = r#"{"category_id": "cat_001", "name": "Kitchen", "subcategories": [{"subcategory_id": "cat_001_sub_001", "name": "Cookware", "profit_margin": 0.22}]}
"#;
    const PRODUCTS: &str = r#"{"product_id": "prod_00001", "name": "Cast Iron Pan", "category_id": "cat_001", "subcategory_id": "cat_001_sub_001", "base_price": 34.5, "current_stock": 120, "is_active": true, "price_history": [{"price": 36.0, "date": "2025-01-01T00:00:00"}], "creation_date": "2024-01-15T11:20:33.120000"}
{"product_id": "prod_00002", "name": "Chef Knife", "category_id": "cat_001", "subcategory_id": "cat_001_sub_001", "base_price": 59.99, "current_stock": 40, "is_active": true, "price_history": [], "creation_date": "2024-03-02T08:00:00"}
"#;
    const TRANSACTIONS: &str = r#"{"transaction_id": "txn_0a1b2c3d4e5f", "user_id": "user_000001", "session_id": "sess_9e8d7c6b5a", "timestamp": "2025-11-03T12:39:56.123456", "items": [{"product_id": "prod_00001", "quantity": 2, "unit_price": 34.5, "subtotal": 69.0}, {"product_id": "prod_00002", "quantity": 1, "unit_price": 59.99, "subtotal": 59.99}], "subtotal": 128.99, "discount": 0.0, "total": 128.99, "payment_method": "credit_card", "status": "completed"}
{"transaction_id": "txn_ffeeddccbbaa", "user_id": "user_000002", "session_id": null, "timestamp": "2025-10-21T08:00:00", "items": [{"product_id": "prod_00002", "quantity": 1, "unit_price": 59.99, "subtotal": 59.99}], "subtotal": 59.99, "discount": 6.0, "total": 53.99, "payment_method": "paypal", "status": "shipped"}
"#;

    #[tokio::test]
    async fn test_load_dir_reads_generated_files() {
        let dir = tempfile::tempdir().unwrap();
        for (file, content) in [
            (USERS_FILE, USERS),
            (CATEGORIES_FILE, CATEGORIES),
            (PRODUCTS_FILE, PRODUCTS),
            (TRANSACTIONS_FILE, TRANSACTIONS),
        ] {
            std::fs::write(dir.path().join(file), content).unwrap();
        }

        let store = MemoryEntityStore::load_dir(dir.path()).await.unwrap();
        let users = store.users(&UserFilter::default()).await.unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].country.as_deref(), Some("US"));
        assert_eq!(users[1].city.as_deref(), Some("Nordhausen"));

        let lines = store
            .transactions(&TransactionFilter::default())
            .await
            .unwrap();
        let ids: Vec<&str> = lines.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["txn_ffeeddccbbaa-1", "txn_0a1b2c3d4e5f-1", "txn_0a1b2c3d4e5f-2"]
        );
        let revenue: ecomlens_core::Price = lines.iter().map(Transaction::revenue).sum();
        assert_eq!(revenue, ecomlens_core::Price::from_cents(18_898).unwrap());
    }

    #[test]
    fn test_parse_json_lines_reports_line() {
        let content = "{\"product_id\":\"p1\",\"date\":\"2024-01-01\",\"views\":1,\"purchases\":0}\n\nnot json\n";
        let err = parse_json_lines::<ProductMetric>("metrics", content).unwrap_err();
        assert!(err.to_string().contains("metrics:3"));
    }
}
