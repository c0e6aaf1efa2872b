//! Analytics configuration loaded from environment variables.
//!
//! Every component receives an explicit [`AnalyticsConfig`] value; nothing in
//! the library reads ambient state after startup, so runs are reproducible and
//! parallel tests cannot interfere with each other.
//!
//! # Environment Variables
//!
//! ## Required
//! - `ECOMLENS_FUNNEL_WINDOW_SECS` - Max seconds between a trajectory's first event and a later one
//! - `ECOMLENS_REVENUE_WEIGHT` - CLV weight of normalized revenue (0.0 to 1.0)
//! - `ECOMLENS_ENGAGEMENT_WEIGHT` - CLV weight of normalized engagement (0.0 to 1.0)
//!
//! ## Optional
//! - `ECOMLENS_SAMPLE_SIZE` - Target session sample size (default: 5000)
//! - `ECOMLENS_SAMPLE_SEED` - Sampler seed (default: 42)
//! - `ECOMLENS_SAMPLING_STRATEGY` - `uniform` or `earliest` (default: uniform)
//! - `ECOMLENS_MAX_SCAN_RECORDS` - Upper bound on session rows read (default: 1000000)
//! - `ECOMLENS_SESSION_RANGE_START` / `ECOMLENS_SESSION_RANGE_END` - Session key range
//!   (default: full table)
//! - `ECOMLENS_TOP_K` - Number of top products (default: 10)
//! - `ECOMLENS_ENGAGEMENT_PER_SESSION` - Engagement points per session (default: 1.0)
//! - `ECOMLENS_ENGAGEMENT_PER_MINUTE` - Engagement points per session minute (default: 0.1)
//! - `ECOMLENS_ENGAGEMENT_PER_CONVERSION` - Engagement points per conversion (default: 5.0)
//! - `ECOMLENS_HIGH_VALUE_THRESHOLD` - Spend for `high_value` (default: 500)
//! - `ECOMLENS_MEDIUM_VALUE_THRESHOLD` - Spend for `medium_value` (default: 200)
//!
//! ## Stores
//! - `ENTITY_DATABASE_URL` - `PostgreSQL` URL of the entity store (fallback: `DATABASE_URL`)
//! - `SESSION_DATABASE_URL` - `PostgreSQL` URL of the session store (fallback: `DATABASE_URL`)
//! - `STORE_MAX_CONNECTIONS` - Pool size per store (default: 10)
//! - `STORE_ACQUIRE_TIMEOUT_SECS` - Pool acquire timeout (default: 10)

use std::str::FromStr;
use std::time::Duration;

use chrono::TimeDelta;
use ecomlens_core::KeyRange;
use rust_decimal::Decimal;
use secrecy::SecretString;
use thiserror::Error;

use crate::sampler::SamplingStrategy;

pub const DEFAULT_SAMPLE_SIZE: usize = 5000;
pub const DEFAULT_SAMPLE_SEED: u64 = 42;
pub const DEFAULT_MAX_SCAN_RECORDS: usize = 1_000_000;
pub const DEFAULT_TOP_K: usize = 10;

/// Tolerance when checking that the CLV weights sum to one.
const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Configuration errors that can occur during loading or validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    /// The loaded values violate a configuration rule.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Weights combining the two normalized CLV components.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClvWeights {
    pub revenue_weight: f64,
    pub engagement_weight: f64,
}

impl ClvWeights {
    #[must_use]
    pub const fn new(revenue_weight: f64, engagement_weight: f64) -> Self {
        Self {
            revenue_weight,
            engagement_weight,
        }
    }
}

/// Points awarded per unit of session activity when scoring engagement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngagementWeights {
    pub per_session: f64,
    pub per_minute: f64,
    pub per_conversion: f64,
}

impl Default for EngagementWeights {
    fn default() -> Self {
        Self {
            per_session: 1.0,
            per_minute: 0.1,
            per_conversion: 5.0,
        }
    }
}

/// Spend thresholds for the CLV value segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentThresholds {
    pub high_value: Decimal,
    pub medium_value: Decimal,
}

impl Default for SegmentThresholds {
    fn default() -> Self {
        Self {
            high_value: Decimal::from(500),
            medium_value: Decimal::from(200),
        }
    }
}

/// Configuration of one analytics run.
#[derive(Debug, Clone)]
pub struct AnalyticsConfig {
    /// Target number of sampled session rows.
    pub sample_size: usize,
    /// Seed for the uniform sampling strategy.
    pub sample_seed: u64,
    /// How rows are picked inside each user stratum.
    pub sampling_strategy: SamplingStrategy,
    /// Upper bound on session rows read by the sampler.
    pub max_scan_records: usize,
    /// Session key range to sample from.
    pub session_range: KeyRange,
    /// Number of rows in the top products table.
    pub top_k: usize,
    /// Time bound grouping session events into one trajectory.
    pub funnel_window: TimeDelta,
    pub clv_weights: ClvWeights,
    pub engagement_weights: EngagementWeights,
    pub segment_thresholds: SegmentThresholds,
}

impl AnalyticsConfig {
    /// Create a configuration with defaults for everything except the two
    /// values that have no sensible default.
    #[must_use]
    pub fn new(funnel_window: TimeDelta, clv_weights: ClvWeights) -> Self {
        Self {
            sample_size: DEFAULT_SAMPLE_SIZE,
            sample_seed: DEFAULT_SAMPLE_SEED,
            sampling_strategy: SamplingStrategy::default(),
            max_scan_records: DEFAULT_MAX_SCAN_RECORDS,
            session_range: KeyRange::full(),
            top_k: DEFAULT_TOP_K,
            funnel_window,
            clv_weights,
            engagement_weights: EngagementWeights::default(),
            segment_thresholds: SegmentThresholds::default(),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, unparsable, or
    /// the resulting configuration fails [`validate`](Self::validate).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Same as [`from_env`](Self::from_env).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let window_secs: i64 = env.required("ECOMLENS_FUNNEL_WINDOW_SECS")?;
        let funnel_window = TimeDelta::try_seconds(window_secs).ok_or_else(|| {
            ConfigError::InvalidEnvVar(
                "ECOMLENS_FUNNEL_WINDOW_SECS".to_string(),
                "out of range".to_string(),
            )
        })?;
        let clv_weights = ClvWeights::new(
            env.required("ECOMLENS_REVENUE_WEIGHT")?,
            env.required("ECOMLENS_ENGAGEMENT_WEIGHT")?,
        );

        let defaults = EngagementWeights::default();
        let engagement_weights = EngagementWeights {
            per_session: env.or("ECOMLENS_ENGAGEMENT_PER_SESSION", defaults.per_session)?,
            per_minute: env.or("ECOMLENS_ENGAGEMENT_PER_MINUTE", defaults.per_minute)?,
            per_conversion: env.or("ECOMLENS_ENGAGEMENT_PER_CONVERSION", defaults.per_conversion)?,
        };
        let thresholds = SegmentThresholds::default();
        let segment_thresholds = SegmentThresholds {
            high_value: env.or("ECOMLENS_HIGH_VALUE_THRESHOLD", thresholds.high_value)?,
            medium_value: env.or("ECOMLENS_MEDIUM_VALUE_THRESHOLD", thresholds.medium_value)?,
        };

        let session_range = KeyRange {
            start: env.get("ECOMLENS_SESSION_RANGE_START").unwrap_or_default(),
            end: env.get("ECOMLENS_SESSION_RANGE_END"),
        };

        let config = Self {
            sample_size: env.or("ECOMLENS_SAMPLE_SIZE", DEFAULT_SAMPLE_SIZE)?,
            sample_seed: env.or("ECOMLENS_SAMPLE_SEED", DEFAULT_SAMPLE_SEED)?,
            sampling_strategy: env.or("ECOMLENS_SAMPLING_STRATEGY", SamplingStrategy::default())?,
            max_scan_records: env.or("ECOMLENS_MAX_SCAN_RECORDS", DEFAULT_MAX_SCAN_RECORDS)?,
            session_range,
            top_k: env.or("ECOMLENS_TOP_K", DEFAULT_TOP_K)?,
            funnel_window,
            clv_weights,
            engagement_weights,
            segment_thresholds,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check every configuration rule.
    ///
    /// Runs before any store is touched so that a bad configuration never
    /// produces a partial report.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first violated rule.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_size == 0 {
            return Err(invalid("sample_size must be greater than 0"));
        }
        if self.max_scan_records < self.sample_size {
            return Err(invalid("max_scan_records must be at least sample_size"));
        }
        if self.top_k == 0 {
            return Err(invalid("top_k must be greater than 0"));
        }
        if self.funnel_window <= TimeDelta::zero() {
            return Err(invalid("funnel_window must be positive"));
        }
        let range = &self.session_range;
        if range
            .end
            .as_deref()
            .is_some_and(|end| end <= range.start.as_str())
        {
            return Err(invalid("session_range end must be after its start"));
        }

        let ClvWeights {
            revenue_weight,
            engagement_weight,
        } = self.clv_weights;
        check_weight("revenue_weight", revenue_weight)?;
        check_weight("engagement_weight", engagement_weight)?;
        if (revenue_weight + engagement_weight - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(invalid(&format!(
                "clv weights must sum to 1.0, got {}",
                revenue_weight + engagement_weight
            )));
        }

        let e = self.engagement_weights;
        check_weight("engagement per_session", e.per_session)?;
        check_weight("engagement per_minute", e.per_minute)?;
        check_weight("engagement per_conversion", e.per_conversion)?;

        let t = self.segment_thresholds;
        if t.medium_value.is_sign_negative() || t.medium_value > t.high_value {
            return Err(invalid(
                "segment thresholds must satisfy 0 <= medium_value <= high_value",
            ));
        }
        Ok(())
    }
}

/// Connection settings for the two `PostgreSQL`-backed stores.
///
/// Implements `Debug` manually to redact the connection URLs.
#[derive(Clone)]
pub struct StoreConfig {
    /// Entity store connection URL (contains password)
    pub entity_database_url: SecretString,
    /// Session store connection URL (contains password)
    pub session_database_url: SecretString,
    /// Pool size per store
    pub max_connections: u32,
    /// How long to wait for a pooled connection before reporting the store unavailable
    pub acquire_timeout: Duration,
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("entity_database_url", &"[REDACTED]")
            .field("session_database_url", &"[REDACTED]")
            .field("max_connections", &self.max_connections)
            .field("acquire_timeout", &self.acquire_timeout)
            .finish()
    }
}

impl StoreConfig {
    /// Load store configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a database URL is missing or a numeric
    /// variable does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load store configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Same as [`from_env`](Self::from_env).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let max_connections: u32 = env.or("STORE_MAX_CONNECTIONS", 10)?;
        if max_connections == 0 {
            return Err(invalid("STORE_MAX_CONNECTIONS must be greater than 0"));
        }
        Ok(Self {
            entity_database_url: env.database_url("ENTITY_DATABASE_URL")?,
            session_database_url: env.database_url("SESSION_DATABASE_URL")?,
            max_connections,
            acquire_timeout: Duration::from_secs(env.or("STORE_ACQUIRE_TIMEOUT_SECS", 10)?),
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn invalid(message: &str) -> ConfigError {
    ConfigError::Invalid(message.to_string())
}

fn check_weight(name: &str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value < 0.0 {
        return Err(invalid(&format!(
            "{name} must be a finite non-negative number, got {value}"
        )));
    }
    Ok(())
}

/// Typed access over a variable lookup function.
struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Get an optional variable, treating blank values as unset.
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    /// Get and parse a required variable.
    fn required<T>(&self, key: &str) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let raw = self
            .get(key)
            .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))?;
        parse(key, &raw)
    }

    /// Get and parse an optional variable, falling back to `default`.
    fn or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(key).map_or(Ok(default), |raw| parse(key, &raw))
    }

    /// Get database URL with fallback to generic `DATABASE_URL`.
    fn database_url(&self, primary_key: &str) -> Result<SecretString, ConfigError> {
        self.get(primary_key)
            .or_else(|| self.get("DATABASE_URL"))
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::MissingEnvVar(primary_key.to_string()))
    }
}

fn parse<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}
