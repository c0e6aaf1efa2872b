//! Composite row keys for the session (wide-column) store.
//!
//! The session store orders rows by a single string key compared byte-wise.
//! Every key is `entity_id#temporal_marker`, and the temporal marker uses a
//! fixed-width encoding so that lexicographic order equals chronological order
//! within one entity:
//!
//! - Session events: `user_00042#1705312800000` (epoch milliseconds, 13 digits, zero-padded)
//! - Product metrics: `prod_00007#2024-01-15` (ISO-8601 calendar date)
//!
//! Because IDs never contain `#`, all keys of one entity form a contiguous
//! run in key order, and [`KeyRange::prefix`] selects exactly that run.

use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

use super::id::{IdError, KEY_SEPARATOR, ProductId, UserId};

/// Width of the zero-padded epoch-millisecond marker.
pub const MILLIS_WIDTH: usize = 13;

/// Largest epoch-millisecond value that fits in the marker.
pub const MAX_MILLIS: i64 = 9_999_999_999_999;

/// The byte immediately after [`KEY_SEPARATOR`], used as an exclusive prefix bound.
const PREFIX_END: char = '$';

/// Errors that can occur when encoding or decoding a row key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowKeyError {
    /// The key has no `#` separator.
    #[error("row key {0:?} has no '#' separator")]
    MissingSeparator(String),
    /// The entity part is not a valid ID.
    #[error("row key entity is invalid: {0}")]
    InvalidEntity(#[from] IdError),
    /// The temporal marker does not parse.
    #[error("row key {key:?} has an invalid temporal marker: {reason}")]
    InvalidMarker {
        /// The offending key.
        key: String,
        /// Why the marker was rejected.
        reason: String,
    },
    /// The timestamp cannot be encoded in the fixed-width marker.
    #[error("timestamp {0} is outside the encodable range")]
    OutOfRange(DateTime<Utc>),
}

/// A composite key that can be encoded into a sortable row key string.
pub trait RowKey: Sized {
    /// Encode into the store's row key string.
    ///
    /// # Errors
    ///
    /// Returns an error if the temporal part cannot be represented in the
    /// fixed-width marker.
    fn encode(&self) -> Result<String, RowKeyError>;

    /// Decode a row key string.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is malformed.
    fn decode(key: &str) -> Result<Self, RowKeyError>;
}

/// Split a key into its entity and marker halves.
fn split_key(key: &str) -> Result<(&str, &str), RowKeyError> {
    key.split_once(KEY_SEPARATOR)
        .ok_or_else(|| RowKeyError::MissingSeparator(key.to_owned()))
}

/// Key of a session event: `(user_id, started_at)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey {
    pub user_id: UserId,
    pub started_at: DateTime<Utc>,
}

impl SessionKey {
    /// Create a session key.
    #[must_use]
    pub const fn new(user_id: UserId, started_at: DateTime<Utc>) -> Self {
        Self {
            user_id,
            started_at,
        }
    }
}

/// Encode a timestamp as the zero-padded epoch-millisecond marker.
///
/// # Errors
///
/// Returns [`RowKeyError::OutOfRange`] for timestamps before the epoch or
/// past the 13-digit limit.
pub fn encode_millis(at: DateTime<Utc>) -> Result<String, RowKeyError> {
    let millis = at.timestamp_millis();
    if !(0..=MAX_MILLIS).contains(&millis) {
        return Err(RowKeyError::OutOfRange(at));
    }
    Ok(format!("{millis:0width$}", width = MILLIS_WIDTH))
}

impl RowKey for SessionKey {
    fn encode(&self) -> Result<String, RowKeyError> {
        Ok(format!(
            "{}{KEY_SEPARATOR}{}",
            self.user_id,
            encode_millis(self.started_at)?
        ))
    }

    fn decode(key: &str) -> Result<Self, RowKeyError> {
        let (entity, marker) = split_key(key)?;
        let invalid = |reason: &str| RowKeyError::InvalidMarker {
            key: key.to_owned(),
            reason: reason.to_owned(),
        };
        if marker.len() != MILLIS_WIDTH || !marker.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid("expected 13 zero-padded digits"));
        }
        let millis: i64 = marker.parse().map_err(|_| invalid("not a number"))?;
        let started_at =
            DateTime::from_timestamp_millis(millis).ok_or_else(|| invalid("out of range"))?;
        Ok(Self {
            user_id: UserId::parse(entity)?,
            started_at,
        })
    }
}

/// Key of a daily product metric: `(product_id, date)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricKey {
    pub product_id: ProductId,
    pub date: NaiveDate,
}

impl MetricKey {
    /// Create a metric key.
    #[must_use]
    pub const fn new(product_id: ProductId, date: NaiveDate) -> Self {
        Self { product_id, date }
    }
}

impl RowKey for MetricKey {
    fn encode(&self) -> Result<String, RowKeyError> {
        use chrono::Datelike;

        let year = self.date.year();
        if !(1..=9999).contains(&year) {
            return Err(RowKeyError::OutOfRange(
                self.date.and_time(chrono::NaiveTime::MIN).and_utc(),
            ));
        }
        Ok(format!(
            "{}{KEY_SEPARATOR}{}",
            self.product_id,
            self.date.format("%Y-%m-%d")
        ))
    }

    fn decode(key: &str) -> Result<Self, RowKeyError> {
        let (entity, marker) = split_key(key)?;
        if marker.len() != 10 {
            return Err(RowKeyError::InvalidMarker {
                key: key.to_owned(),
                reason: "expected YYYY-MM-DD".to_owned(),
            });
        }
        let date =
            NaiveDate::parse_from_str(marker, "%Y-%m-%d").map_err(|e| RowKeyError::InvalidMarker {
                key: key.to_owned(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            product_id: ProductId::parse(entity)?,
            date,
        })
    }
}

/// Half-open row key range `[start, end)`; `end = None` is unbounded.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyRange {
    pub start: String,
    pub end: Option<String>,
}

impl KeyRange {
    /// The whole table.
    #[must_use]
    pub fn full() -> Self {
        Self::default()
    }

    /// An explicit key range across entities.
    #[must_use]
    pub fn between(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: Some(end.into()),
        }
    }

    /// Every row of one entity.
    #[must_use]
    pub fn prefix(entity: &str) -> Self {
        Self {
            start: format!("{entity}{KEY_SEPARATOR}"),
            end: Some(format!("{entity}{PREFIX_END}")),
        }
    }

    /// One user's session rows with `from <= started_at < to`.
    ///
    /// # Errors
    ///
    /// Returns an error if either bound cannot be encoded.
    pub fn entity_window(
        user_id: &UserId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Self, RowKeyError> {
        Ok(Self {
            start: SessionKey::new(user_id.clone(), from).encode()?,
            end: Some(SessionKey::new(user_id.clone(), to).encode()?),
        })
    }

    /// Whether `key` falls in this range.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        key >= self.start.as_str() && self.end.as_deref().is_none_or(|end| key < end)
    }
}

impl std::fmt::Display for KeyRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.end {
            Some(end) => write!(f, "[{:?}, {:?})", self.start, end),
            None => write!(f, "[{:?}, ..)", self.start),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn user(id: &str) -> UserId {
        UserId::parse(id).unwrap()
    }

    fn at(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap()
    }

    #[test]
    fn test_session_key_is_zero_padded() {
        let key = SessionKey::new(user("u1"), at(42)).encode().unwrap();
        assert_eq!(key, "u1#0000000000042");
    }

    #[test]
    fn test_session_key_decode() {
        let key = SessionKey::decode("user_7#1705312800000").unwrap();
        assert_eq!(key.user_id.as_str(), "user_7");
        assert_eq!(key.started_at.timestamp_millis(), 1_705_312_800_000);
    }

    #[test]
    fn test_session_key_rejects_short_marker() {
        assert!(matches!(
            SessionKey::decode("u1#42"),
            Err(RowKeyError::InvalidMarker { .. })
        ));
        assert!(matches!(
            SessionKey::decode("u1"),
            Err(RowKeyError::MissingSeparator(_))
        ));
    }

    #[test]
    fn test_pre_epoch_is_rejected() {
        assert!(matches!(
            SessionKey::new(user("u1"), at(-1)).encode(),
            Err(RowKeyError::OutOfRange(_))
        ));
    }

    #[test]
    fn test_lexicographic_order_is_chronological() {
        let early = SessionKey::new(user("u1"), at(9_000)).encode().unwrap();
        let late = SessionKey::new(user("u1"), at(10_000)).encode().unwrap();
        assert!(early < late);
    }

    #[test]
    fn test_metric_key() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        let key = MetricKey::new(ProductId::parse("p1").unwrap(), date);
        let encoded = key.encode().unwrap();
        assert_eq!(encoded, "p1#2024-01-05");
        assert_eq!(MetricKey::decode(&encoded).unwrap(), key);
    }

    #[test]
    fn test_prefix_range_selects_one_entity() {
        let range = KeyRange::prefix("u1");
        assert!(range.contains("u1#0000000000001"));
        assert!(!range.contains("u10#0000000000001"));
        assert!(!range.contains("u0#0000000000001"));
        assert!(!range.contains("u1$x#0000000000001"));
    }

    #[test]
    fn test_entity_window() {
        let range = KeyRange::entity_window(&user("u1"), at(100), at(200)).unwrap();
        assert!(range.contains("u1#0000000000100"));
        assert!(range.contains("u1#0000000000199"));
        assert!(!range.contains("u1#0000000000200"));
    }

    #[test]
    fn test_full_range_contains_everything() {
        assert!(KeyRange::full().contains(""));
        assert!(KeyRange::full().contains("zzz#1"));
    }
}
