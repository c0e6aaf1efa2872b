//! Conversion funnel over sampled session events.
//!
//! A user's events, in time order, are cut into trajectories. A trajectory
//! starts at an event and takes in each following event that starts no later
//! than `window` after the trajectory's first event, until an `abandon` or
//! `convert` event closes it. A trajectory closed by a terminal event ends in
//! that state; one cut off by the window or by the end of the user's events
//! ends as `browsed`.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use ecomlens_core::{FunnelState, SessionEvent, UserId};

use super::ratio;

/// Trajectories ending in one state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunnelCount {
    pub state: FunnelState,
    pub count: u64,
}

/// Funnel table: one row per state, in funnel order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunnelSummary {
    pub states: Vec<FunnelCount>,
    pub trajectories: u64,
    /// `converted / trajectories`, zero when there are none.
    pub conversion_rate: f64,
}

impl FunnelSummary {
    /// Count of trajectories ending in `state`.
    #[must_use]
    pub fn count(&self, state: FunnelState) -> u64 {
        self.states
            .iter()
            .find(|row| row.state == state)
            .map_or(0, |row| row.count)
    }
}

#[derive(Default)]
struct Tally {
    browsed: u64,
    abandoned: u64,
    converted: u64,
}

impl Tally {
    fn close(&mut self, state: FunnelState) {
        match state {
            FunnelState::Browsed => self.browsed += 1,
            FunnelState::Abandoned => self.abandoned += 1,
            FunnelState::Converted => self.converted += 1,
        }
    }

    const fn get(&self, state: FunnelState) -> u64 {
        match state {
            FunnelState::Browsed => self.browsed,
            FunnelState::Abandoned => self.abandoned,
            FunnelState::Converted => self.converted,
        }
    }
}

#[must_use]
pub fn funnel(sessions: &[SessionEvent], window: TimeDelta) -> FunnelSummary {
    let mut per_user: BTreeMap<&UserId, Vec<&SessionEvent>> = BTreeMap::new();
    for event in sessions {
        per_user.entry(&event.user_id).or_default().push(event);
    }

    let mut tally = Tally::default();
    for events in per_user.values_mut() {
        events.sort_by_key(|e| e.started_at);

        let mut open: Option<DateTime<Utc>> = None;
        for event in events.iter() {
            if open.is_some_and(|start| event.started_at - start > window) {
                tally.close(FunnelState::Browsed);
                open = None;
            }
            if open.is_none() {
                open = Some(event.started_at);
            }
            if event.action.is_terminal() {
                tally.close(FunnelState::after(event.action));
                open = None;
            }
        }
        if open.is_some() {
            tally.close(FunnelState::Browsed);
        }
    }

    let states: Vec<FunnelCount> = FunnelState::ALL
        .into_iter()
        .map(|state| FunnelCount {
            state,
            count: tally.get(state),
        })
        .collect();
    let trajectories = states.iter().map(|row| row.count).sum();
    FunnelSummary {
        states,
        trajectories,
        conversion_rate: ratio(tally.converted, trajectories),
    }
}

#[cfg(test)]
mod tests {
    use ecomlens_core::SessionAction::{Abandon, Browse, Convert};

    use crate::dataset::fixtures::*;

    use super::*;

    fn hours(h: i64) -> TimeDelta {
        TimeDelta::hours(h)
    }

    #[test]
    fn test_empty_sample_has_all_rows() {
        let summary = funnel(&[], hours(1));
        assert_eq!(summary.states.len(), 3);
        assert_eq!(summary.trajectories, 0);
        assert!(summary.conversion_rate.abs() < f64::EPSILON);
    }

    #[test]
    fn test_terminal_event_closes_trajectory() {
        let sessions = [
            session("u1", at(1, 0), Browse),
            session("u1", at(1, 1), Convert),
            session("u1", at(1, 2), Browse),
            session("u1", at(1, 3), Abandon),
        ];
        let summary = funnel(&sessions, hours(24));
        assert_eq!(summary.trajectories, 2);
        assert_eq!(summary.count(FunnelState::Converted), 1);
        assert_eq!(summary.count(FunnelState::Abandoned), 1);
        assert_eq!(summary.count(FunnelState::Browsed), 0);
        assert!((summary.conversion_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_window_cuts_trajectory() {
        let sessions = [
            session("u1", at(1, 0), Browse),
            session("u1", at(1, 1), Browse),
            // 3h after the trajectory start: new trajectory
            session("u1", at(1, 3), Convert),
        ];
        let summary = funnel(&sessions, hours(2));
        assert_eq!(summary.trajectories, 2);
        assert_eq!(summary.count(FunnelState::Browsed), 1);
        assert_eq!(summary.count(FunnelState::Converted), 1);
    }

    #[test]
    fn test_users_are_separate_and_order_is_by_time() {
        let sessions = [
            session("u2", at(1, 1), Browse),
            session("u1", at(1, 5), Convert),
            session("u1", at(1, 4), Browse),
        ];
        let summary = funnel(&sessions, hours(2));
        assert_eq!(summary.count(FunnelState::Converted), 1);
        assert_eq!(summary.count(FunnelState::Browsed), 1);
        let total: u64 = summary.states.iter().map(|s| s.count).sum();
        assert_eq!(total, summary.trajectories);
    }
}
