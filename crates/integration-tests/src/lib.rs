//! Integration tests for ecomlens.
//!
//! Scenario tests run complete analytics passes over in-memory stores, so no
//! database is required.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p ecomlens-integration-tests
//! ```
//!
//! # Test Categories
//!
//! - `scenarios` - Fixed inputs with known result tables
//! - `invariants` - Properties that hold for any input
//! - `failures` - Unavailable stores, cancellation, invalid configuration

#![allow(clippy::missing_panics_doc, clippy::unwrap_used)]

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use rust_decimal::Decimal;

use ecomlens_analytics::store::{MemoryEntityStore, MemorySessionStore};
use ecomlens_analytics::{
    AnalyticsConfig, AnalyticsError, AnalyticsReport, AnalyticsRun, ClvWeights,
};
use ecomlens_core::{
    Category, CategoryId, Price, Product, ProductId, SessionAction, SessionEvent, Transaction,
    TransactionId, User, UserId,
};

/// Both stores of one test world.
#[derive(Debug, Default)]
pub struct World {
    pub users: Vec<User>,
    pub categories: Vec<Category>,
    pub products: Vec<Product>,
    pub transactions: Vec<Transaction>,
    pub sessions: Vec<SessionEvent>,
}

impl World {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn user(mut self, id: &str) -> Self {
        self.users.push(User {
            id: UserId::parse(id).unwrap(),
            name: Some(format!("User {id}")),
            country: None,
            city: None,
            registered_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        });
        self
    }

    #[must_use]
    pub fn category(mut self, id: &str) -> Self {
        self.categories.push(Category {
            id: CategoryId::parse(id).unwrap(),
            name: format!("Category {id}"),
            parent_id: None,
        });
        self
    }

    #[must_use]
    pub fn product(mut self, id: &str, category: &str) -> Self {
        self.products.push(Product {
            id: ProductId::parse(id).unwrap(),
            category_id: CategoryId::parse(category).unwrap(),
            name: format!("Product {id}"),
            price: Price::new(Decimal::from(10)).unwrap(),
        });
        self
    }

    /// Add a transaction at `unit_price` whole currency units.
    #[must_use]
    pub fn purchase(mut self, user: &str, product: &str, quantity: u32, unit_price: i64) -> Self {
        let n = self.transactions.len();
        self.transactions.push(Transaction {
            id: TransactionId::parse(&format!("tx_{n:05}")).unwrap(),
            user_id: UserId::parse(user).unwrap(),
            product_id: ProductId::parse(product).unwrap(),
            quantity,
            unit_price: Price::new(Decimal::from(unit_price)).unwrap(),
            timestamp: minutes(i64::try_from(n).unwrap()),
        });
        self
    }

    #[must_use]
    pub fn session(mut self, user: &str, minute: i64, action: SessionAction) -> Self {
        self.sessions.push(session(user, minute, action));
        self
    }

    /// Build the two in-memory stores.
    #[must_use]
    pub fn stores(self) -> (MemoryEntityStore, MemorySessionStore) {
        (
            MemoryEntityStore::new(self.users, self.categories, self.products, self.transactions),
            MemorySessionStore::from_sessions(self.sessions).unwrap(),
        )
    }

    /// Run a complete analytics pass with `config`.
    ///
    /// # Errors
    ///
    /// Returns the run's error.
    pub async fn run_with(
        self,
        config: &AnalyticsConfig,
    ) -> Result<AnalyticsReport, AnalyticsError> {
        let (entities, sessions) = self.stores();
        AnalyticsRun::new(config, &entities, &sessions).execute().await
    }

    /// Run a complete analytics pass with [`config`].
    pub async fn run(self) -> AnalyticsReport {
        self.run_with(&config()).await.unwrap()
    }
}

/// `minute` minutes after 2024-03-01T00:00:00Z.
#[must_use]
pub fn minutes(minute: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap() + TimeDelta::minutes(minute)
}

#[must_use]
pub fn session(user: &str, minute: i64, action: SessionAction) -> SessionEvent {
    SessionEvent {
        user_id: UserId::parse(user).unwrap(),
        started_at: minutes(minute),
        action,
        product_id: None,
        duration_secs: 60,
        page_count: 2,
        product_detail_views: 1,
    }
}

/// Default test configuration: 30 minute funnel window, equal CLV weights.
#[must_use]
pub fn config() -> AnalyticsConfig {
    AnalyticsConfig::new(TimeDelta::minutes(30), ClvWeights::new(0.5, 0.5))
}
