//! Per-user intermediate tables consumed by the CLV integrator.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use ecomlens_core::{Price, SessionAction, SessionEvent, Transaction, UserId};

/// A user's purchase totals, from the full transaction set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserSpend {
    pub orders: u64,
    pub revenue: Price,
    pub first_purchase: Option<DateTime<Utc>>,
    pub last_purchase: Option<DateTime<Utc>>,
}

/// A user's session activity, from the session sample.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserEngagement {
    pub sessions: u64,
    pub total_duration_secs: u64,
    pub conversions: u64,
    pub first_session: Option<DateTime<Utc>>,
    pub last_session: Option<DateTime<Utc>>,
}

fn widen(
    first: &mut Option<DateTime<Utc>>,
    last: &mut Option<DateTime<Utc>>,
    at: DateTime<Utc>,
) {
    *first = Some(first.map_or(at, |f| f.min(at)));
    *last = Some(last.map_or(at, |l| l.max(at)));
}

#[must_use]
pub fn user_spend(transactions: &[Transaction]) -> HashMap<UserId, UserSpend> {
    let mut spend: HashMap<UserId, UserSpend> = HashMap::new();
    for tx in transactions {
        let entry = spend.entry(tx.user_id.clone()).or_default();
        entry.orders += 1;
        entry.revenue += tx.revenue();
        widen(&mut entry.first_purchase, &mut entry.last_purchase, tx.timestamp);
    }
    spend
}

#[must_use]
pub fn user_engagement(sessions: &[SessionEvent]) -> HashMap<UserId, UserEngagement> {
    let mut engagement: HashMap<UserId, UserEngagement> = HashMap::new();
    for session in sessions {
        let entry = engagement.entry(session.user_id.clone()).or_default();
        entry.sessions += 1;
        entry.total_duration_secs += u64::from(session.duration_secs);
        if session.action == SessionAction::Convert {
            entry.conversions += 1;
        }
        widen(&mut entry.first_session, &mut entry.last_session, session.started_at);
    }
    engagement
}
