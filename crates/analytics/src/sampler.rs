//! Deterministic stratified sampling of the session store.
//!
//! The sampler reads the configured key range once (up to
//! `max_scan_records` rows), groups rows into one stratum per user, and
//! allocates the target sample size across strata in proportion to their
//! size using the largest-remainder method. Rows are then picked inside each
//! stratum, either uniformly at random from a seeded `ChaCha8Rng` or by taking
//! the earliest rows.
//!
//! The same seed, strategy and source range always produce the same sample.

use std::ops::Range;
use std::sync::Arc;

use futures::{StreamExt, TryStreamExt};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use ecomlens_core::{KeyRange, SessionEvent, UserId};

use crate::config::AnalyticsConfig;
use crate::store::{SessionStore, StoreError};

/// How rows are picked inside one user stratum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingStrategy {
    /// A seeded uniform random subset.
    #[default]
    Uniform,
    /// The stratum's earliest rows.
    Earliest,
}

impl std::fmt::Display for SamplingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uniform => write!(f, "uniform"),
            Self::Earliest => write!(f, "earliest"),
        }
    }
}

impl std::str::FromStr for SamplingStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "uniform" => Ok(Self::Uniform),
            "earliest" => Ok(Self::Earliest),
            _ => Err(format!("invalid sampling strategy: {s}")),
        }
    }
}

/// Counters describing how a sample was drawn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleStats {
    /// Rows read from the session store.
    pub scanned: usize,
    /// Whether the scan stopped at `max_scan_records` before the range ended.
    pub truncated: bool,
    /// Distinct users in the scanned rows.
    pub strata: usize,
    /// Rows in the sample.
    pub sampled: usize,
}

/// An immutable, key-ordered sample of session events.
///
/// Cloning is cheap; clones share the same rows.
#[derive(Debug, Clone)]
pub struct SessionSample {
    events: Arc<[SessionEvent]>,
    stats: SampleStats,
}

impl SessionSample {
    /// The sampled events in row key order.
    #[must_use]
    pub fn events(&self) -> &[SessionEvent] {
        &self.events
    }

    /// A shared handle to the sampled events.
    #[must_use]
    pub fn shared(&self) -> Arc<[SessionEvent]> {
        Arc::clone(&self.events)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    #[must_use]
    pub const fn stats(&self) -> SampleStats {
        self.stats
    }
}

/// Draws [`SessionSample`]s from a [`SessionStore`].
#[derive(Debug, Clone)]
pub struct SessionSampler {
    target: usize,
    seed: u64,
    strategy: SamplingStrategy,
    max_scan_records: usize,
}

impl SessionSampler {
    #[must_use]
    pub const fn new(
        target: usize,
        seed: u64,
        strategy: SamplingStrategy,
        max_scan_records: usize,
    ) -> Self {
        Self {
            target,
            seed,
            strategy,
            max_scan_records,
        }
    }

    #[must_use]
    pub const fn from_config(config: &AnalyticsConfig) -> Self {
        Self::new(
            config.sample_size,
            config.sample_seed,
            config.sampling_strategy,
            config.max_scan_records,
        )
    }

    /// Sample session events from `range`.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the scan fails, or
    /// [`StoreError::Corrupt`] if the store returns rows out of key order or
    /// outside the requested range.
    #[instrument(skip(self, store), fields(store = store.name(), target = self.target))]
    pub async fn sample<S: SessionStore + ?Sized>(
        &self,
        store: &S,
        range: &KeyRange,
    ) -> Result<SessionSample, StoreError> {
        let (rows, truncated) = self.scan(store, range).await?;
        let strata = strata(&rows);

        let picked = if rows.len() <= self.target {
            rows
        } else {
            self.pick(rows, &strata)
        };

        let stats = SampleStats {
            scanned: strata.iter().map(|(_, r)| r.len()).sum(),
            truncated,
            strata: strata.len(),
            sampled: picked.len(),
        };
        if truncated {
            warn!(
                max_scan_records = self.max_scan_records,
                %range,
                "Session scan stopped at max_scan_records; sample covers a key prefix of the range"
            );
        }
        info!(
            scanned = stats.scanned,
            strata = stats.strata,
            sampled = stats.sampled,
            strategy = %self.strategy,
            "Sampled session events"
        );

        Ok(SessionSample {
            events: picked.into(),
            stats,
        })
    }

    /// Read up to `max_scan_records` rows, verifying key order.
    async fn scan<S: SessionStore + ?Sized>(
        &self,
        store: &S,
        range: &KeyRange,
    ) -> Result<(Vec<SessionEvent>, bool), StoreError> {
        let limit = self.max_scan_records.saturating_add(1);
        let mut rows: Vec<SessionEvent> = store
            .scan_sessions(range)
            .take(limit)
            .try_collect()
            .await?;

        let truncated = rows.len() > self.max_scan_records;
        rows.truncate(self.max_scan_records);

        let mut previous: Option<String> = None;
        for event in &rows {
            let key = event.row_key()?;
            if !range.contains(&key) {
                return Err(StoreError::Corrupt(format!(
                    "row key {key} is outside scanned range {range}"
                )));
            }
            if let Some(prev) = &previous {
                if *prev >= key {
                    return Err(StoreError::Corrupt(format!(
                        "row key {key} returned after {prev}; scan is not in key order"
                    )));
                }
            }
            previous = Some(key);
        }
        Ok((rows, truncated))
    }

    fn pick(
        &self,
        rows: Vec<SessionEvent>,
        strata: &[(UserId, Range<usize>)],
    ) -> Vec<SessionEvent> {
        let quotas = allocate(strata, rows.len(), self.target);
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut keep = vec![false; rows.len()];

        for ((_, span), quota) in strata.iter().zip(quotas) {
            let Some(stratum) = keep.get_mut(span.clone()) else {
                continue;
            };
            match self.strategy {
                SamplingStrategy::Earliest => {
                    stratum.iter_mut().take(quota).for_each(|kept| *kept = true);
                }
                SamplingStrategy::Uniform => {
                    for i in rand::seq::index::sample(&mut rng, span.len(), quota) {
                        if let Some(kept) = stratum.get_mut(i) {
                            *kept = true;
                        }
                    }
                }
            }
        }

        rows.into_iter()
            .zip(keep)
            .filter_map(|(event, kept)| kept.then_some(event))
            .collect()
    }
}

/// Contiguous runs of rows per user, in key order.
fn strata(rows: &[SessionEvent]) -> Vec<(UserId, Range<usize>)> {
    let mut strata: Vec<(UserId, Range<usize>)> = Vec::new();
    for (i, event) in rows.iter().enumerate() {
        match strata.last_mut() {
            Some((user, span)) if *user == event.user_id => span.end = i + 1,
            _ => strata.push((event.user_id.clone(), i..i + 1)),
        }
    }
    strata
}

/// Largest-remainder allocation of `target` rows over strata of `total` rows.
///
/// Each stratum gets `floor(size * target / total)`; the rows left over go to
/// the strata with the largest remainders, ties broken by user ID ascending.
/// The quotas sum to exactly `min(target, total)` and never exceed a
/// stratum's size.
fn allocate(strata: &[(UserId, Range<usize>)], total: usize, target: usize) -> Vec<usize> {
    if total == 0 {
        return vec![0; strata.len()];
    }
    let target = target.min(total);
    let (total_w, target_w) = (total as u128, target as u128);

    let mut quotas = Vec::with_capacity(strata.len());
    let mut remainders = Vec::with_capacity(strata.len());
    for (i, (user, span)) in strata.iter().enumerate() {
        let scaled = span.len() as u128 * target_w;
        // scaled / total <= span.len(), so the narrowing cannot truncate.
        #[allow(clippy::cast_possible_truncation)]
        quotas.push((scaled / total_w) as usize);
        remainders.push((scaled % total_w, user, i));
    }

    let leftover = target - quotas.iter().sum::<usize>();
    remainders.sort_by(|(ra, ua, _), (rb, ub, _)| rb.cmp(ra).then_with(|| ua.cmp(ub)));
    for &(_, _, i) in remainders.iter().take(leftover) {
        if let Some(quota) = quotas.get_mut(i) {
            *quota += 1;
        }
    }
    quotas
}
