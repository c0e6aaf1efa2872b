//! Properties that hold for every run, checked over a mid-sized generated
//! world.

#![allow(clippy::unwrap_used, clippy::cast_possible_wrap)]

use std::collections::{BTreeSet, HashMap, HashSet};

use ecomlens_analytics::{SamplingStrategy, SessionSampler};
use ecomlens_core::{KeyRange, Price, SessionAction};
use ecomlens_integration_tests::World;

const USERS: u64 = 40;
const PRODUCTS: u64 = 12;
const CATEGORIES: u64 = 4;

/// A deterministic world with uneven activity per user.
fn generated() -> World {
    let mut world = World::new();
    for c in 0..CATEGORIES {
        world = world.category(&format!("cat_{c}"));
    }
    for p in 0..PRODUCTS {
        world = world.product(&format!("prod_{p:02}"), &format!("cat_{}", p % CATEGORIES));
    }
    for u in 0..USERS {
        let user = format!("user_{u:03}");
        world = world.user(&user);
        for i in 0..(u % 7) {
            let product = format!("prod_{:02}", (u * 5 + i * 3) % PRODUCTS);
            let quantity = u32::try_from(1 + i % 3).unwrap();
            world = world.purchase(&user, &product, quantity, 5 + (i as i64));
        }
        for s in 0..(u % 11 + 1) {
            let action = match (u + s) % 5 {
                0 => SessionAction::Convert,
                1 => SessionAction::Abandon,
                _ => SessionAction::Browse,
            };
            world = world.session(&user, (s * 17) as i64, action);
        }
    }
    world
}

#[tokio::test]
async fn test_category_revenue_sums_to_transaction_revenue() {
    let world = generated();
    let expected: Price = world.transactions.iter().map(|t| t.revenue()).sum();

    let report = world.run().await;
    let total: Price = report.revenue_by_category.iter().map(|c| c.revenue).sum();
    assert_eq!(total, expected);

    for pair in report.revenue_by_category.windows(2) {
        assert!(pair[0].revenue >= pair[1].revenue);
    }
}

#[tokio::test]
async fn test_co_occurrence_matches_basket_intersection() {
    let world = generated();
    let mut baskets: HashMap<String, BTreeSet<String>> = HashMap::new();
    for t in &world.transactions {
        baskets
            .entry(t.user_id.to_string())
            .or_default()
            .insert(t.product_id.to_string());
    }

    let report = world.run().await;
    assert!(!report.co_occurrence_pairs.is_empty());
    for pair in &report.co_occurrence_pairs {
        assert!(pair.product_a < pair.product_b);
        let expected = baskets
            .values()
            .filter(|b| b.contains(pair.product_a.as_str()) && b.contains(pair.product_b.as_str()))
            .count() as u64;
        assert_eq!(pair.users, expected, "{} / {}", pair.product_a, pair.product_b);
    }
}

#[tokio::test]
async fn test_every_user_has_exactly_one_clv_record() {
    let report = generated().run().await;

    let ids: HashSet<_> = report.clv_records.iter().map(|r| r.user_id.clone()).collect();
    assert_eq!(report.clv_records.len(), USERS as usize);
    assert_eq!(ids.len(), USERS as usize);

    for record in &report.clv_records {
        assert!((0.0..=1.0).contains(&record.normalized_revenue));
        assert!((0.0..=1.0).contains(&record.normalized_engagement));
        assert!((0.0..=1.0).contains(&record.combined_score));
    }
    for pair in report.clv_records.windows(2) {
        assert!(pair[0].combined_score >= pair[1].combined_score);
    }
}

#[tokio::test]
async fn test_funnel_accounts_for_every_trajectory() {
    let report = generated().run().await;
    let funnel = &report.funnel_counts;

    let sum: u64 = funnel.states.iter().map(|s| s.count).sum();
    assert_eq!(sum, funnel.trajectories);
    assert!(funnel.trajectories > 0);
    assert!(funnel.trajectories <= report.diagnostics.inputs.sessions as u64);
}

#[tokio::test]
async fn test_repeated_runs_produce_identical_tables() {
    let first = generated().run().await;
    let second = generated().run().await;

    assert_ne!(first.run_id, second.run_id);
    let a = first.tables().unwrap();
    let b = second.tables().unwrap();
    for ((name, left), (_, right)) in a.iter().zip(&b) {
        if *name == "diagnostics" {
            continue;
        }
        assert_eq!(left, right, "{name} differs between runs");
    }
}

#[tokio::test]
async fn test_sampler_is_deterministic_and_bounded() {
    let (_, sessions) = generated().stores();
    let total = sessions.session_count();
    let range = KeyRange::full();

    let draw = |seed| SessionSampler::new(50, seed, SamplingStrategy::Uniform, 10_000);
    let a = draw(7).sample(&sessions, &range).await.unwrap();
    let b = draw(7).sample(&sessions, &range).await.unwrap();
    let c = draw(8).sample(&sessions, &range).await.unwrap();

    assert!(total > 50);
    assert_eq!(a.len(), 50);
    assert_eq!(a.events(), b.events());
    assert_ne!(a.events(), c.events());

    let keys: Vec<String> = a.events().iter().map(|e| e.row_key().unwrap()).collect();
    assert!(keys.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn test_sample_draws_from_every_large_stratum() {
    let (_, sessions) = generated().stores();
    let sampler = SessionSampler::new(100, 1, SamplingStrategy::Earliest, 10_000);
    let sample = sampler.sample(&sessions, &KeyRange::full()).await.unwrap();

    let users: BTreeSet<_> = sample.events().iter().map(|e| e.user_id.clone()).collect();
    // Users with 11 sessions hold 11 / 226 of the range, so 100 draws give
    // each of them at least four rows.
    for u in (0..USERS).filter(|u| u % 11 == 10) {
        let id = format!("user_{u:03}");
        assert!(users.iter().any(|x| x.as_str() == id), "{id} not sampled");
    }
    assert_eq!(sample.stats().sampled, 100);
}
