//! Revenue by category and top products.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use ecomlens_core::{CategoryId, Price, ProductId};

use crate::dataset::Dataset;

/// Revenue of one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRevenue {
    pub category_id: CategoryId,
    pub category_name: String,
    pub revenue: Price,
    /// Units sold.
    pub quantity: u64,
    /// Transactions counted.
    pub line_count: u64,
}

/// Revenue of one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRevenue {
    pub product_id: ProductId,
    pub product_name: String,
    pub revenue: Price,
    pub quantity: u64,
    pub order_count: u64,
}

#[derive(Default)]
struct Totals {
    revenue: Price,
    quantity: u64,
    lines: u64,
}

impl Totals {
    fn add(&mut self, revenue: Price, quantity: u32) {
        self.revenue += revenue;
        self.quantity += u64::from(quantity);
        self.lines += 1;
    }
}

/// Revenue per category, highest first (ties by category ID).
///
/// Categories without sales are omitted.
#[must_use]
pub fn revenue_by_category(dataset: &Dataset) -> Vec<CategoryRevenue> {
    let product_category: HashMap<&ProductId, &CategoryId> = dataset
        .products
        .iter()
        .map(|p| (&p.id, &p.category_id))
        .collect();
    let names: HashMap<&CategoryId, &str> = dataset
        .categories
        .iter()
        .map(|c| (&c.id, c.name.as_str()))
        .collect();

    let mut totals: HashMap<&CategoryId, Totals> = HashMap::new();
    for tx in &dataset.transactions {
        if let Some(category) = product_category.get(&tx.product_id) {
            totals
                .entry(*category)
                .or_default()
                .add(tx.revenue(), tx.quantity);
        }
    }

    let mut rows: Vec<CategoryRevenue> = totals
        .into_iter()
        .map(|(id, t)| CategoryRevenue {
            category_id: id.clone(),
            category_name: names.get(id).copied().unwrap_or_default().to_owned(),
            revenue: t.revenue,
            quantity: t.quantity,
            line_count: t.lines,
        })
        .collect();
    rows.sort_by(|a, b| {
        b.revenue
            .cmp(&a.revenue)
            .then_with(|| a.category_id.cmp(&b.category_id))
    });
    rows
}

/// The `k` products with the most revenue (ties by product ID).
#[must_use]
pub fn top_products(dataset: &Dataset, k: usize) -> Vec<ProductRevenue> {
    let names: HashMap<&ProductId, &str> = dataset
        .products
        .iter()
        .map(|p| (&p.id, p.name.as_str()))
        .collect();

    let mut totals: HashMap<&ProductId, Totals> = HashMap::new();
    for tx in &dataset.transactions {
        totals
            .entry(&tx.product_id)
            .or_default()
            .add(tx.revenue(), tx.quantity);
    }

    let mut rows: Vec<ProductRevenue> = totals
        .into_iter()
        .map(|(id, t)| ProductRevenue {
            product_id: id.clone(),
            product_name: names.get(id).copied().unwrap_or_default().to_owned(),
            revenue: t.revenue,
            quantity: t.quantity,
            order_count: t.lines,
        })
        .collect();
    rows.sort_by(|a, b| {
        b.revenue
            .cmp(&a.revenue)
            .then_with(|| a.product_id.cmp(&b.product_id))
    });
    rows.truncate(k);
    rows
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use crate::dataset::fixtures::*;

    use super::*;

    fn dataset() -> Dataset {
        Dataset {
            users: vec![user("u1"), user("u2")],
            categories: vec![category("x"), category("y")],
            products: vec![product("a", "x"), product("b", "y"), product("c", "y")],
            transactions: vec![
                tx("t1", "u1", "a", 2, 10),
                tx("t2", "u2", "b", 1, 15),
                tx("t3", "u2", "c", 1, 5),
                tx("t4", "u1", "b", 1, 5),
            ],
            ..Dataset::default()
        }
    }

    #[test]
    fn test_revenue_by_category_sums_exactly() {
        let data = dataset();
        let rows = revenue_by_category(&data);
        let total: Price = data.transactions.iter().map(|t| t.revenue()).sum();
        assert_eq!(rows.iter().map(|r| r.revenue).sum::<Price>(), total);

        // x = 20, y = 25
        assert_eq!(rows[0].category_id.as_str(), "y");
        assert_eq!(rows[0].line_count, 3);
        assert_eq!(rows[0].quantity, 3);
        assert_eq!(rows[1].revenue, Price::from_cents(2000).unwrap());
        assert_eq!(rows[1].category_name, "Category x");
    }

    #[test]
    fn test_top_products_ties_and_truncation() {
        let rows = top_products(&dataset(), 2);
        assert_eq!(rows.len(), 2);
        // a = 20, b = 20, c = 5: tie broken by id
        assert_eq!(rows[0].product_id.as_str(), "a");
        assert_eq!(rows[1].product_id.as_str(), "b");
        assert_eq!(rows[1].order_count, 2);
        assert_eq!(rows[0].product_name, "Product a");
    }

    #[test]
    fn test_empty_dataset() {
        assert!(revenue_by_category(&Dataset::default()).is_empty());
        assert!(top_products(&Dataset::default(), 10).is_empty());
    }
}
