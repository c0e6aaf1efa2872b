//! Customer lifetime value: spend from the entity store joined with
//! engagement from the session sample.
//!
//! Every user gets exactly one record. Users with no transactions or no
//! sampled sessions get zero-valued spend or engagement rather than being
//! dropped. Both components are min-max normalized across the population and
//! blended with the configured [`ClvWeights`](crate::config::ClvWeights).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use tracing::debug;

use ecomlens_core::{ClvSegment, Price, User, UserId};

use crate::aggregate::{UserEngagement, UserSpend, average};
use crate::config::{AnalyticsConfig, EngagementWeights, SegmentThresholds};
use crate::join::left_join;

/// One user's CLV record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClvRecord {
    pub user_id: UserId,
    pub order_count: u64,
    pub total_revenue: Price,
    pub avg_order_value: Decimal,
    pub session_count: u64,
    pub total_duration_secs: u64,
    pub avg_session_secs: f64,
    pub conversions: u64,
    pub engagement_score: f64,
    pub normalized_revenue: f64,
    pub normalized_engagement: f64,
    pub combined_score: f64,
    pub segment: ClvSegment,
    pub first_activity: Option<DateTime<Utc>>,
    pub last_activity: Option<DateTime<Utc>>,
}

/// Engagement points for one user's session activity.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn engagement_score(engagement: &UserEngagement, weights: &EngagementWeights) -> f64 {
    let minutes = engagement.total_duration_secs as f64 / 60.0;
    weights.per_session * engagement.sessions as f64
        + weights.per_minute * minutes
        + weights.per_conversion * engagement.conversions as f64
}

/// Value segment by spend.
#[must_use]
pub fn segment_for(spend: &UserSpend, thresholds: &SegmentThresholds) -> ClvSegment {
    let revenue = spend.revenue.amount();
    if spend.orders == 0 {
        ClvSegment::NoSpend
    } else if revenue >= thresholds.high_value {
        ClvSegment::HighValue
    } else if revenue >= thresholds.medium_value {
        ClvSegment::MediumValue
    } else {
        ClvSegment::LowValue
    }
}

/// Min-max normalization over a population.
///
/// When every value is the same, positive values map to 1 and the rest to 0.
struct MinMax {
    min: f64,
    max: f64,
}

impl MinMax {
    fn over(values: impl IntoIterator<Item = f64>) -> Self {
        values.into_iter().fold(
            Self {
                min: f64::INFINITY,
                max: f64::NEG_INFINITY,
            },
            |acc, v| Self {
                min: acc.min.min(v),
                max: acc.max.max(v),
            },
        )
    }

    fn normalize(&self, value: f64) -> f64 {
        let span = self.max - self.min;
        if span > 0.0 {
            (value - self.min) / span
        } else if value > 0.0 {
            1.0
        } else {
            0.0
        }
    }
}

/// Truncate to millisecond precision, the resolution shared by both stores.
fn to_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(at.timestamp_millis()).unwrap_or(at)
}

fn earliest(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    a.into_iter().chain(b).map(to_millis).min()
}

fn latest(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    a.into_iter().chain(b).map(to_millis).max()
}

/// Build one CLV record per user, highest combined score first (ties by
/// user ID).
#[must_use]
pub fn integrate(
    users: &[User],
    spend: &HashMap<UserId, UserSpend>,
    engagement: &HashMap<UserId, UserEngagement>,
    config: &AnalyticsConfig,
) -> Vec<ClvRecord> {
    let no_spend = UserSpend::default();
    let no_engagement = UserEngagement::default();

    let joined: Vec<(&User, &UserSpend, &UserEngagement)> =
        left_join(left_join(users, spend, |u| &u.id), engagement, |(u, _)| &u.id)
            .map(|((user, s), e)| (user, s.unwrap_or(&no_spend), e.unwrap_or(&no_engagement)))
            .collect();

    let revenue: Vec<f64> = joined
        .iter()
        .map(|(_, s, _)| s.revenue.amount().to_f64().unwrap_or(0.0))
        .collect();
    let scores: Vec<f64> = joined
        .iter()
        .map(|(_, _, e)| engagement_score(e, &config.engagement_weights))
        .collect();
    let revenue_range = MinMax::over(revenue.iter().copied());
    let score_range = MinMax::over(scores.iter().copied());
    let weights = config.clv_weights;

    let mut records: Vec<ClvRecord> = joined
        .into_iter()
        .zip(revenue.into_iter().zip(scores))
        .map(|((user, s, e), (rev, score))| {
            let normalized_revenue = revenue_range.normalize(rev);
            let normalized_engagement = score_range.normalize(score);
            #[allow(clippy::cast_precision_loss)]
            let avg_session_secs = if e.sessions == 0 {
                0.0
            } else {
                e.total_duration_secs as f64 / e.sessions as f64
            };
            ClvRecord {
                user_id: user.id.clone(),
                order_count: s.orders,
                total_revenue: s.revenue,
                avg_order_value: average(s.revenue.amount(), s.orders),
                session_count: e.sessions,
                total_duration_secs: e.total_duration_secs,
                avg_session_secs,
                conversions: e.conversions,
                engagement_score: score,
                normalized_revenue,
                normalized_engagement,
                combined_score: weights.revenue_weight * normalized_revenue
                    + weights.engagement_weight * normalized_engagement,
                segment: segment_for(s, &config.segment_thresholds),
                first_activity: earliest(s.first_purchase, e.first_session),
                last_activity: latest(s.last_purchase, e.last_session),
            }
        })
        .collect();

    records.sort_by(|a, b| {
        b.combined_score
            .total_cmp(&a.combined_score)
            .then_with(|| a.user_id.cmp(&b.user_id))
    });
    debug!(records = records.len(), "Integrated CLV records");
    records
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeDelta;
    use ecomlens_core::SessionAction;

    use crate::aggregate::{user_engagement, user_spend};
    use crate::config::ClvWeights;
    use crate::dataset::fixtures::*;

    use super::*;

    fn config() -> AnalyticsConfig {
        AnalyticsConfig::new(TimeDelta::hours(1), ClvWeights::new(0.6, 0.4))
    }

    #[test]
    fn test_every_user_gets_one_record() {
        let users = vec![user("buyer"), user("browser"), user("idle")];
        let spend = user_spend(&[tx("t1", "buyer", "p", 3, 100)]);
        let engagement = user_engagement(&[session("browser", at(3, 0), SessionAction::Browse)]);
        let records = integrate(&users, &spend, &engagement, &config());

        assert_eq!(records.len(), 3);
        let idle = records.iter().find(|r| r.user_id.as_str() == "idle").unwrap();
        assert_eq!(idle.order_count, 0);
        assert_eq!(idle.session_count, 0);
        assert_eq!(idle.segment, ClvSegment::NoSpend);
        assert!(idle.combined_score.abs() < f64::EPSILON);
        assert_eq!(idle.first_activity, None);

        // buyer: revenue 1.0 normalized; browser: engagement 1.0 normalized.
        assert_eq!(records[0].user_id.as_str(), "buyer");
        assert_eq!(records[0].segment, ClvSegment::MediumValue);
        assert!((records[0].combined_score - 0.6).abs() < 1e-9);
        assert_eq!(records[1].user_id.as_str(), "browser");
        assert!((records[1].combined_score - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_constant_population_normalizes_to_one() {
        let users = vec![user("a"), user("b")];
        let spend = user_spend(&[tx("t1", "a", "p", 1, 10), tx("t2", "b", "p", 1, 10)]);
        let records = integrate(&users, &spend, &HashMap::new(), &config());
        assert!(records.iter().all(|r| (r.normalized_revenue - 1.0).abs() < f64::EPSILON));
        assert!(records.iter().all(|r| r.normalized_engagement.abs() < f64::EPSILON));
        // tie on score: ordered by id
        assert_eq!(records[0].user_id.as_str(), "a");
    }

    #[test]
    fn test_engagement_score_and_activity_span() {
        let users = vec![user("u1")];
        let spend = user_spend(&[tx("t1", "u1", "p", 1, 600)]);
        let engagement = user_engagement(&[
            session("u1", at(1, 5), SessionAction::Convert),
            session("u1", at(9, 0), SessionAction::Browse),
        ]);
        let records = integrate(&users, &spend, &engagement, &config());
        let r = &records[0];
        // 2 sessions + 4 minutes * 0.1 + 1 conversion * 5
        assert!((r.engagement_score - 7.4).abs() < 1e-9);
        assert!((r.avg_session_secs - 120.0).abs() < f64::EPSILON);
        assert_eq!(r.segment, ClvSegment::HighValue);
        assert_eq!(r.first_activity, Some(at(1, 5)));
        assert_eq!(r.last_activity, Some(at(9, 0)));
    }

    #[test]
    fn test_no_users() {
        assert!(integrate(&[], &HashMap::new(), &HashMap::new(), &config()).is_empty());
    }

    #[test]
    fn test_segment_thresholds() {
        let thresholds = SegmentThresholds::default();
        let spend = |cents| UserSpend {
            orders: 1,
            revenue: Price::from_cents(cents).unwrap(),
            ..UserSpend::default()
        };
        assert_eq!(segment_for(&spend(50_000), &thresholds), ClvSegment::HighValue);
        assert_eq!(segment_for(&spend(20_000), &thresholds), ClvSegment::MediumValue);
        assert_eq!(segment_for(&spend(19_999), &thresholds), ClvSegment::LowValue);
        assert_eq!(segment_for(&UserSpend::default(), &thresholds), ClvSegment::NoSpend);
    }
}
