//! Customer segments by order count, and revenue by signup cohort.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use ecomlens_core::{Price, UserId, UserSegment};

use super::{UserSpend, average, ratio};
use crate::dataset::Dataset;

/// Purchasing customers in one order-count segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentSummary {
    pub segment: UserSegment,
    pub customers: u64,
    pub avg_orders: f64,
    pub avg_spend: Decimal,
    pub total_revenue: Price,
}

/// Orders placed by one signup cohort in one month after signup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CohortRevenue {
    /// Signup month, `YYYY-MM`.
    pub cohort: String,
    /// Calendar months between signup and purchase.
    pub months_since_signup: i32,
    pub customers: u64,
    pub orders: u64,
    pub revenue: Price,
    pub avg_order_value: Decimal,
}

/// Segment summaries, highest revenue first.
#[must_use]
pub fn user_segments(spend: &HashMap<UserId, UserSpend>) -> Vec<SegmentSummary> {
    #[derive(Default)]
    struct Acc {
        customers: u64,
        orders: u64,
        revenue: Price,
    }

    let mut acc: BTreeMap<UserSegment, Acc> = BTreeMap::new();
    for user in spend.values().filter(|s| s.orders > 0) {
        let entry = acc
            .entry(UserSegment::from_order_count(user.orders))
            .or_default();
        entry.customers += 1;
        entry.orders += user.orders;
        entry.revenue += user.revenue;
    }

    let mut rows: Vec<SegmentSummary> = acc
        .into_iter()
        .map(|(segment, a)| SegmentSummary {
            segment,
            customers: a.customers,
            avg_orders: ratio(a.orders, a.customers),
            avg_spend: average(a.revenue.amount(), a.customers),
            total_revenue: a.revenue,
        })
        .collect();
    rows.sort_by(|a, b| {
        b.total_revenue
            .cmp(&a.total_revenue)
            .then_with(|| a.segment.cmp(&b.segment))
    });
    rows
}

fn month_index(at: DateTime<Utc>) -> i32 {
    // month0() is at most 11.
    #[allow(clippy::cast_possible_wrap)]
    let month = at.month0() as i32;
    at.year() * 12 + month
}

/// Revenue per signup cohort and months since signup, in cohort order.
#[must_use]
pub fn cohort_revenue(dataset: &Dataset) -> Vec<CohortRevenue> {
    #[derive(Default)]
    struct Acc<'a> {
        customers: BTreeSet<&'a UserId>,
        orders: u64,
        revenue: Price,
    }

    let signup: HashMap<&UserId, DateTime<Utc>> = dataset
        .users
        .iter()
        .map(|u| (&u.id, u.registered_at))
        .collect();

    let mut acc: BTreeMap<(i32, i32), Acc<'_>> = BTreeMap::new();
    for tx in &dataset.transactions {
        let Some(registered_at) = signup.get(&tx.user_id) else {
            continue;
        };
        let cohort = month_index(*registered_at);
        let offset = month_index(tx.timestamp) - cohort;
        let entry = acc.entry((cohort, offset)).or_default();
        entry.customers.insert(&tx.user_id);
        entry.orders += 1;
        entry.revenue += tx.revenue();
    }

    acc.into_iter()
        .map(|((cohort, offset), a)| CohortRevenue {
            cohort: format!("{:04}-{:02}", cohort.div_euclid(12), cohort.rem_euclid(12) + 1),
            months_since_signup: offset,
            customers: a.customers.len() as u64,
            orders: a.orders,
            revenue: a.revenue,
            avg_order_value: average(a.revenue.amount(), a.orders),
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;

    use crate::aggregate::user_spend;
    use crate::dataset::fixtures::*;

    use super::*;

    #[test]
    fn test_user_segments() {
        let mut transactions = Vec::new();
        for i in 0..7 {
            transactions.push(tx(&format!("h{i}"), "heavy", "p", 1, 10));
        }
        for i in 0..3 {
            transactions.push(tx(&format!("m{i}"), "mid", "p", 1, 10));
        }
        transactions.push(tx("l0", "light", "p", 1, 100));
        transactions.push(tx("l1", "light2", "p", 1, 50));

        let rows = user_segments(&user_spend(&transactions));
        let segments: Vec<UserSegment> = rows.iter().map(|r| r.segment).collect();
        assert_eq!(
            segments,
            vec![UserSegment::Low, UserSegment::High, UserSegment::Medium]
        );
        assert_eq!(rows[0].customers, 2);
        assert_eq!(rows[0].avg_spend, Decimal::from(75));
        assert!((rows[1].avg_orders - 7.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_cohort_revenue() {
        let mut u1 = user("u1");
        u1.registered_at = Utc.with_ymd_and_hms(2023, 12, 15, 0, 0, 0).unwrap();
        let mut late = tx("t2", "u1", "p", 1, 30);
        late.timestamp = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let dataset = Dataset {
            users: vec![u1],
            transactions: vec![tx("t1", "u1", "p", 2, 10), late, tx("t3", "ghost", "p", 1, 1)],
            ..Dataset::default()
        };
        let rows = cohort_revenue(&dataset);
        // t2 lands in February 2024, t1 in March 2024; the ghost order has no cohort.
        let cells: Vec<(&str, i32, u64)> = rows
            .iter()
            .map(|r| (r.cohort.as_str(), r.months_since_signup, r.orders))
            .collect();
        assert_eq!(cells, vec![("2023-12", 2, 1), ("2023-12", 3, 1)]);
        assert_eq!(rows[1].revenue, Price::from_cents(2000).unwrap());
        assert_eq!(rows[1].avg_order_value, Decimal::from(20));
    }
}
