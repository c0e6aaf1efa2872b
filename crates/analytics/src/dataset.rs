//! Reconciliation of entity and session data into one frozen dataset.
//!
//! Every reference is checked against the entity snapshot. A record whose
//! reference does not resolve is excluded from all aggregates and tallied in
//! [`RunDiagnostics`]:
//!
//! - products with an unknown category
//! - transactions with an unknown user or product (a product excluded above
//!   counts as unknown)
//! - session events with an unknown user or product
//!
//! A record with several broken references is tallied once, under the first
//! check it fails in the order above.

use std::collections::HashSet;

use tracing::{info, warn};

use ecomlens_core::{
    Category, CategoryId, Product, ProductId, ProductMetric, SessionEvent, Transaction, User,
    UserId,
};

use crate::diagnostics::{GapKind, InputCounts, RunDiagnostics};

/// Entities as read from the entity store, before reconciliation.
#[derive(Debug, Clone, Default)]
pub struct EntitySnapshot {
    pub users: Vec<User>,
    pub categories: Vec<Category>,
    pub products: Vec<Product>,
    pub transactions: Vec<Transaction>,
}

/// The reconciled, read-only input of every aggregation.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub users: Vec<User>,
    pub categories: Vec<Category>,
    /// Products whose category exists.
    pub products: Vec<Product>,
    /// Transactions whose user and product exist.
    pub transactions: Vec<Transaction>,
    /// Sampled session events whose user and product (if any) exist.
    pub sessions: Vec<SessionEvent>,
    pub product_metrics: Vec<ProductMetric>,
}

/// Two-step reconciliation: entities first, then the session sample once it
/// has been drawn.
#[derive(Debug)]
pub struct Reconciler {
    dataset: Dataset,
    user_ids: HashSet<UserId>,
    product_ids: HashSet<ProductId>,
}

impl Reconciler {
    /// Check entity references.
    #[must_use]
    pub fn new(snapshot: EntitySnapshot, diagnostics: &mut RunDiagnostics) -> Self {
        let EntitySnapshot {
            users,
            categories,
            products,
            transactions,
        } = snapshot;

        let category_ids: HashSet<CategoryId> = categories.iter().map(|c| c.id.clone()).collect();
        let products: Vec<Product> = products
            .into_iter()
            .filter(|p| {
                let known = category_ids.contains(&p.category_id);
                if !known {
                    diagnostics.record_gap(GapKind::ProductUnknownCategory);
                }
                known
            })
            .collect();

        let user_ids: HashSet<UserId> = users.iter().map(|u| u.id.clone()).collect();
        let product_ids: HashSet<ProductId> = products.iter().map(|p| p.id.clone()).collect();

        let transactions: Vec<Transaction> = transactions
            .into_iter()
            .filter(|t| {
                let gap = if !user_ids.contains(&t.user_id) {
                    Some(GapKind::TransactionUnknownUser)
                } else if !product_ids.contains(&t.product_id) {
                    Some(GapKind::TransactionUnknownProduct)
                } else {
                    None
                };
                gap.inspect(|kind| diagnostics.record_gap(*kind)).is_none()
            })
            .collect();

        Self {
            dataset: Dataset {
                users,
                categories,
                products,
                transactions,
                ..Dataset::default()
            },
            user_ids,
            product_ids,
        }
    }

    /// Check session references and freeze the dataset.
    #[must_use]
    pub fn finish(
        self,
        sessions: &[SessionEvent],
        product_metrics: Vec<ProductMetric>,
        diagnostics: &mut RunDiagnostics,
    ) -> Dataset {
        let Self {
            mut dataset,
            user_ids,
            product_ids,
        } = self;

        dataset.sessions = sessions
            .iter()
            .filter(|s| {
                let gap = if !user_ids.contains(&s.user_id) {
                    Some(GapKind::SessionUnknownUser)
                } else if s
                    .product_id
                    .as_ref()
                    .is_some_and(|p| !product_ids.contains(p))
                {
                    Some(GapKind::SessionUnknownProduct)
                } else {
                    None
                };
                gap.inspect(|kind| diagnostics.record_gap(*kind)).is_none()
            })
            .cloned()
            .collect();
        dataset.product_metrics = product_metrics;

        let counts = InputCounts {
            users: dataset.users.len(),
            categories: dataset.categories.len(),
            products: dataset.products.len(),
            transactions: dataset.transactions.len(),
            sessions: dataset.sessions.len(),
            product_metrics: dataset.product_metrics.len(),
        };
        diagnostics.set_inputs(counts);

        if diagnostics.skipped_total() > 0 {
            warn!(
                skipped = diagnostics.skipped_total(),
                gaps = ?diagnostics.skipped,
                "Excluded records with unresolved references"
            );
        }
        if !diagnostics.empty_inputs.is_empty() {
            info!(empty = ?diagnostics.empty_inputs, "Some inputs are empty");
        }
        dataset
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod fixtures {
    //! Record builders shared by the analytics unit tests.

    use chrono::{DateTime, TimeZone, Utc};
    use rust_decimal::Decimal;

    use ecomlens_core::{
        Category, CategoryId, Price, Product, ProductId, SessionAction, SessionEvent, Transaction,
        TransactionId, User, UserId,
    };

    pub fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap()
    }

    pub fn user(id: &str) -> User {
        User {
            id: UserId::parse(id).unwrap(),
            name: None,
            country: None,
            city: None,
            registered_at: at(1, 0),
        }
    }

    pub fn category(id: &str) -> Category {
        Category {
            id: CategoryId::parse(id).unwrap(),
            name: format!("Category {id}"),
            parent_id: None,
        }
    }

    pub fn product(id: &str, category: &str) -> Product {
        Product {
            id: ProductId::parse(id).unwrap(),
            category_id: CategoryId::parse(category).unwrap(),
            name: format!("Product {id}"),
            price: Price::from_cents(1000).unwrap(),
        }
    }

    pub fn tx(id: &str, user: &str, product: &str, quantity: u32, price: i64) -> Transaction {
        Transaction {
            id: TransactionId::parse(id).unwrap(),
            user_id: UserId::parse(user).unwrap(),
            product_id: ProductId::parse(product).unwrap(),
            quantity,
            unit_price: Price::new(Decimal::from(price)).unwrap(),
            timestamp: at(2, 0),
        }
    }

    pub fn session(user: &str, started_at: DateTime<Utc>, action: SessionAction) -> SessionEvent {
        SessionEvent {
            user_id: UserId::parse(user).unwrap(),
            started_at,
            action,
            product_id: None,
            duration_secs: 120,
            page_count: 3,
            product_detail_views: 1,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use ecomlens_core::SessionAction;
    use uuid::Uuid;

    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_reconcile_excludes_and_tallies_gaps() {
        let mut diagnostics = RunDiagnostics::new(Uuid::nil());
        let snapshot = EntitySnapshot {
            users: vec![user("u1")],
            categories: vec![category("c1")],
            products: vec![product("p1", "c1"), product("p2", "missing")],
            transactions: vec![
                tx("t1", "u1", "p1", 1, 10),
                tx("t2", "ghost", "p1", 1, 10),
                tx("t3", "u1", "p2", 1, 10),
                tx("t4", "u1", "nope", 1, 10),
            ],
        };
        let reconciler = Reconciler::new(snapshot, &mut diagnostics);

        let mut with_product = session("u1", at(3, 0), SessionAction::Browse);
        with_product.product_id = Some(ProductId::parse("p2").unwrap());
        let sessions = vec![
            session("u1", at(3, 1), SessionAction::Convert),
            session("ghost", at(3, 2), SessionAction::Browse),
            with_product,
        ];
        let dataset = reconciler.finish(&sessions, Vec::new(), &mut diagnostics);

        assert_eq!(dataset.products.len(), 1);
        assert_eq!(dataset.transactions.len(), 1);
        assert_eq!(dataset.transactions[0].id.as_str(), "t1");
        assert_eq!(dataset.sessions.len(), 1);

        assert_eq!(diagnostics.skipped(GapKind::ProductUnknownCategory), 1);
        assert_eq!(diagnostics.skipped(GapKind::TransactionUnknownUser), 1);
        assert_eq!(diagnostics.skipped(GapKind::TransactionUnknownProduct), 2);
        assert_eq!(diagnostics.skipped(GapKind::SessionUnknownUser), 1);
        assert_eq!(diagnostics.skipped(GapKind::SessionUnknownProduct), 1);
        assert_eq!(diagnostics.inputs.transactions, 1);
        assert!(diagnostics
            .empty_inputs
            .contains(&crate::diagnostics::InputKind::ProductMetrics));
    }
}
