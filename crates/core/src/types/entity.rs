//! Entity records read from the two stores.
//!
//! Users, categories, products and transactions come from the entity
//! (document) store and are keyed by ID. Session events and product metrics
//! come from the session (wide-column) store and are keyed by composite
//! [`RowKey`](super::row_key::RowKey)s.
//!
//! Deserialization also accepts the data generator's JSON-lines documents:
//! timestamps without an offset are read as UTC, user location may sit under
//! `geo_data`, session page counts are derived from `page_views`, and a
//! multi-item order is split into one [`Transaction`] per item.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use super::id::{CategoryId, IdError, ProductId, TransactionId, UserId};
use super::price::Price;
use super::row_key::{MetricKey, RowKey, RowKeyError, SessionKey};
use super::status::SessionAction;

/// Parse an RFC 3339 timestamp, or an offset-less ISO 8601 one as UTC.
///
/// # Errors
///
/// Returns the RFC 3339 parse error if neither form matches.
pub fn parse_utc_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .or_else(|e| {
            raw.parse::<NaiveDateTime>()
                .map(|naive| naive.and_utc())
                .map_err(|_| e)
        })
}

fn utc_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_utc_timestamp(&raw).map_err(serde::de::Error::custom)
}

/// A registered user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "UserDocument")]
pub struct User {
    pub id: UserId,
    pub name: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    /// Signup timestamp.
    pub registered_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct UserDocument {
    #[serde(alias = "user_id")]
    id: UserId,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    geo_data: Option<GeoData>,
    #[serde(alias = "registration_date", deserialize_with = "utc_timestamp")]
    registered_at: DateTime<Utc>,
}

#[derive(Default, Deserialize)]
struct GeoData {
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    country: Option<String>,
}

impl From<UserDocument> for User {
    fn from(doc: UserDocument) -> Self {
        let geo = doc.geo_data.unwrap_or_default();
        Self {
            id: doc.id,
            name: doc.name,
            country: doc.country.or(geo.country),
            city: doc.city.or(geo.city),
            registered_at: doc.registered_at,
        }
    }
}

/// A product category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    #[serde(alias = "category_id")]
    pub id: CategoryId,
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<CategoryId>,
}

/// A product in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    #[serde(alias = "product_id")]
    pub id: ProductId,
    pub category_id: CategoryId,
    pub name: String,
    #[serde(alias = "base_price")]
    pub price: Price,
}

/// A purchase of one product by one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(alias = "transaction_id")]
    pub id: TransactionId,
    pub user_id: UserId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Price,
    #[serde(deserialize_with = "utc_timestamp")]
    pub timestamp: DateTime<Utc>,
}

impl Transaction {
    /// Revenue of this transaction: `quantity × unit_price`.
    #[must_use]
    pub fn revenue(&self) -> Price {
        self.unit_price.times(self.quantity)
    }
}

/// One record of a transactions file.
///
/// The generator writes whole orders; other sources write one purchase line
/// per record.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TransactionRecord {
    Line(Transaction),
    Order(Order),
}

/// An order of one or more items.
#[derive(Debug, Clone, Deserialize)]
pub struct Order {
    #[serde(alias = "transaction_id")]
    pub id: TransactionId,
    pub user_id: UserId,
    #[serde(deserialize_with = "utc_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub items: Vec<OrderItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderItem {
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Price,
}

impl TransactionRecord {
    /// Split into purchase lines. Item `n` of an order (counting from 1) is
    /// keyed `{order_id}-{n}`.
    ///
    /// # Errors
    ///
    /// Returns an error if a derived line ID is invalid.
    pub fn into_transactions(self) -> Result<Vec<Transaction>, IdError> {
        match self {
            Self::Line(line) => Ok(vec![line]),
            Self::Order(order) => order
                .items
                .into_iter()
                .enumerate()
                .map(|(i, item)| {
                    Ok(Transaction {
                        id: TransactionId::parse(&format!("{}-{}", order.id, i + 1))?,
                        user_id: order.user_id.clone(),
                        product_id: item.product_id,
                        quantity: item.quantity,
                        unit_price: item.unit_price,
                        timestamp: order.timestamp,
                    })
                })
                .collect(),
        }
    }
}

/// One user session, stored under `user_id#started_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "SessionDocument")]
pub struct SessionEvent {
    pub user_id: UserId,
    pub started_at: DateTime<Utc>,
    pub action: SessionAction,
    pub product_id: Option<ProductId>,
    pub duration_secs: u32,
    pub page_count: u32,
    pub product_detail_views: u32,
}

#[derive(Deserialize)]
struct SessionDocument {
    user_id: UserId,
    #[serde(alias = "start_time", deserialize_with = "utc_timestamp")]
    started_at: DateTime<Utc>,
    #[serde(alias = "conversion_status")]
    action: SessionAction,
    #[serde(default)]
    product_id: Option<ProductId>,
    #[serde(alias = "duration_seconds")]
    duration_secs: u32,
    #[serde(default)]
    page_count: Option<u32>,
    #[serde(default)]
    product_detail_views: Option<u32>,
    #[serde(default)]
    page_views: Vec<PageView>,
}

#[derive(Deserialize)]
struct PageView {
    page_type: String,
}

fn saturating_count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

impl From<SessionDocument> for SessionEvent {
    fn from(doc: SessionDocument) -> Self {
        let detail_views = doc
            .page_views
            .iter()
            .filter(|view| view.page_type == "product_detail")
            .count();
        Self {
            user_id: doc.user_id,
            started_at: doc.started_at,
            action: doc.action,
            product_id: doc.product_id,
            duration_secs: doc.duration_secs,
            page_count: doc
                .page_count
                .unwrap_or_else(|| saturating_count(doc.page_views.len())),
            product_detail_views: doc
                .product_detail_views
                .unwrap_or_else(|| saturating_count(detail_views)),
        }
    }
}

impl SessionEvent {
    /// The composite key this event is stored under.
    #[must_use]
    pub fn key(&self) -> SessionKey {
        SessionKey::new(self.user_id.clone(), self.started_at)
    }

    /// The encoded row key.
    ///
    /// # Errors
    ///
    /// Returns an error if `started_at` cannot be encoded.
    pub fn row_key(&self) -> Result<String, RowKeyError> {
        self.key().encode()
    }
}

/// Daily view/purchase counters for one product, stored under `product_id#date`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductMetric {
    pub product_id: ProductId,
    pub date: NaiveDate,
    pub views: u64,
    pub purchases: u64,
}

impl ProductMetric {
    /// The composite key this metric is stored under.
    #[must_use]
    pub fn key(&self) -> MetricKey {
        MetricKey::new(self.product_id.clone(), self.date)
    }
}
