//! Product co-occurrence across users' purchase sets.
//!
//! Each user contributes at most one count to a pair, however many times or
//! in whatever quantity they bought either product.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use ecomlens_core::{ProductId, UserId};

use crate::dataset::Dataset;
use crate::join::left_join;

/// Number of users who bought both products of an unordered pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoOccurrencePair {
    /// The smaller product ID of the pair.
    pub product_a: ProductId,
    pub product_b: ProductId,
    pub product_a_name: Option<String>,
    pub product_b_name: Option<String>,
    pub users: u64,
}

/// Every co-purchased pair, most frequent first (ties by `(a, b)`).
#[must_use]
pub fn co_occurrence(dataset: &Dataset) -> Vec<CoOccurrencePair> {
    let mut baskets: HashMap<&UserId, BTreeSet<&ProductId>> = HashMap::new();
    for tx in &dataset.transactions {
        baskets.entry(&tx.user_id).or_default().insert(&tx.product_id);
    }

    let mut counts: HashMap<(&ProductId, &ProductId), u64> = HashMap::new();
    for basket in baskets.values() {
        let items: Vec<&ProductId> = basket.iter().copied().collect();
        for (i, a) in items.iter().enumerate() {
            for b in items.iter().skip(i + 1) {
                // BTreeSet iteration is ascending, so a < b.
                *counts.entry((*a, *b)).or_insert(0) += 1;
            }
        }
    }

    let names: HashMap<ProductId, String> = dataset
        .products
        .iter()
        .map(|p| (p.id.clone(), p.name.clone()))
        .collect();

    let mut rows: Vec<CoOccurrencePair> = left_join(counts, &names, |((a, _), _)| *a)
        .map(|(((a, b), users), a_name)| CoOccurrencePair {
            product_a: a.clone(),
            product_b: b.clone(),
            product_a_name: a_name.cloned(),
            product_b_name: names.get(b).cloned(),
            users,
        })
        .collect();
    rows.sort_by(|x, y| {
        y.users
            .cmp(&x.users)
            .then_with(|| x.product_a.cmp(&y.product_a))
            .then_with(|| x.product_b.cmp(&y.product_b))
    });
    rows
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use crate::dataset::fixtures::*;

    use super::*;

    #[test]
    fn test_pair_counted_once_per_user() {
        let dataset = Dataset {
            products: vec![product("a", "x"), product("b", "x")],
            transactions: vec![
                tx("t1", "u1", "a", 5, 1),
                tx("t2", "u1", "a", 1, 1),
                tx("t3", "u1", "b", 1, 1),
                tx("t4", "u2", "b", 1, 1),
                tx("t5", "u2", "a", 3, 1),
                tx("t6", "u2", "a", 1, 1),
            ],
            ..Dataset::default()
        };
        let rows = co_occurrence(&dataset);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].product_a.as_str(), "a");
        assert_eq!(rows[0].product_b.as_str(), "b");
        assert_eq!(rows[0].users, 2);
        assert_eq!(rows[0].product_a_name.as_deref(), Some("Product a"));
    }

    #[test]
    fn test_no_self_pairs_and_sorted() {
        let dataset = Dataset {
            products: vec![product("a", "x"), product("b", "x")],
            transactions: vec![
                tx("t1", "u1", "a", 1, 1),
                tx("t2", "u1", "c", 1, 1),
                tx("t3", "u1", "b", 1, 1),
                tx("t4", "u2", "b", 1, 1),
                tx("t5", "u2", "c", 1, 1),
                tx("t6", "u3", "a", 1, 1),
            ],
            ..Dataset::default()
        };
        let rows = co_occurrence(&dataset);
        let pairs: Vec<(&str, &str, u64)> = rows
            .iter()
            .map(|r| (r.product_a.as_str(), r.product_b.as_str(), r.users))
            .collect();
        assert_eq!(pairs, vec![("b", "c", 2), ("a", "b", 1), ("a", "c", 1)]);
        // "c" has no product record: name stays empty.
        assert_eq!(rows[0].product_b_name, None);
    }
}
