//! Analytics run commands.
//!
//! # Environment Variables
//!
//! See [`ecomlens_analytics::config`] for the full list. Command-line flags
//! are applied on top of the environment before validation.

use std::collections::HashMap;
use std::path::Path;

use ecomlens_analytics::store::{
    EntityStore, MemoryEntityStore, MemorySessionStore, PgEntityStore, PgSessionStore,
    SessionStore,
};
use ecomlens_analytics::{AnalyticsConfig, AnalyticsError, AnalyticsRun, StoreConfig, StoreError};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::output::{OutputError, write_report};
use crate::RunArgs;

/// Errors that can occur while running a command.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("configuration error: {0}")]
    Config(#[from] ecomlens_analytics::ConfigError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("analytics run failed: {0}")]
    Analytics(#[from] AnalyticsError),
    #[error("failed to write output: {0}")]
    Output(#[from] OutputError),
}

/// Run against the `PostgreSQL`-backed stores.
///
/// # Errors
///
/// Returns `CommandError` if configuration is invalid, a store cannot be
/// reached, the run fails, or the output cannot be written.
pub async fn postgres(args: &RunArgs) -> Result<(), CommandError> {
    let config = load_config(args)?;
    let stores = StoreConfig::from_env()?;
    tracing::info!(?stores, "Connecting to stores...");

    let entities = PgEntityStore::connect(
        &stores.entity_database_url,
        stores.max_connections,
        stores.acquire_timeout,
    )
    .await?;
    let sessions = PgSessionStore::connect(
        &stores.session_database_url,
        stores.max_connections,
        stores.acquire_timeout,
    )
    .await?;

    execute(&config, &entities, &sessions, args, cancel_on_interrupt()).await
}

/// Run against JSON-lines fixture files in `data_dir`.
///
/// # Errors
///
/// Same as [`postgres`], with fixture read errors reported as store errors.
pub async fn files(data_dir: &Path, args: &RunArgs) -> Result<(), CommandError> {
    files_with_cancellation(data_dir, args, cancel_on_interrupt()).await
}

async fn files_with_cancellation(
    data_dir: &Path,
    args: &RunArgs,
    cancel: CancellationToken,
) -> Result<(), CommandError> {
    let config = load_config(args)?;
    tracing::info!(data_dir = %data_dir.display(), "Loading fixtures...");
    let entities = MemoryEntityStore::load_dir(data_dir).await?;
    let sessions = MemorySessionStore::load_dir(data_dir).await?;
    execute(&config, &entities, &sessions, args, cancel).await
}

async fn execute<E: EntityStore, S: SessionStore>(
    config: &AnalyticsConfig,
    entities: &E,
    sessions: &S,
    args: &RunArgs,
    cancel: CancellationToken,
) -> Result<(), CommandError> {
    let report = AnalyticsRun::new(config, entities, sessions)
        .with_cancellation(cancel)
        .execute()
        .await?;

    let written = write_report(&report, &args.out_dir).await?;
    tracing::info!(
        run_id = %report.run_id,
        tables = written.len(),
        out_dir = %args.out_dir.display(),
        "Report written"
    );
    Ok(())
}

/// Cancel the run on Ctrl-C.
fn cancel_on_interrupt() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling run");
            trigger.cancel();
        }
    });
    token
}

/// Flag values keyed by the environment variable they override.
fn overrides(args: &RunArgs) -> HashMap<&'static str, String> {
    let mut map = HashMap::new();
    let mut set = |key: &'static str, value: Option<String>| {
        if let Some(value) = value {
            map.insert(key, value);
        }
    };
    set("ECOMLENS_SAMPLE_SIZE", args.sample_size.map(|v| v.to_string()));
    set("ECOMLENS_SAMPLE_SEED", args.seed.map(|v| v.to_string()));
    set("ECOMLENS_SAMPLING_STRATEGY", args.strategy.clone());
    set(
        "ECOMLENS_MAX_SCAN_RECORDS",
        args.max_scan_records.map(|v| v.to_string()),
    );
    set("ECOMLENS_SESSION_RANGE_START", args.range_start.clone());
    set("ECOMLENS_SESSION_RANGE_END", args.range_end.clone());
    set("ECOMLENS_TOP_K", args.top_k.map(|v| v.to_string()));
    set(
        "ECOMLENS_FUNNEL_WINDOW_SECS",
        args.funnel_window_secs.map(|v| v.to_string()),
    );
    set(
        "ECOMLENS_REVENUE_WEIGHT",
        args.revenue_weight.map(|v| v.to_string()),
    );
    set(
        "ECOMLENS_ENGAGEMENT_WEIGHT",
        args.engagement_weight.map(|v| v.to_string()),
    );
    map
}

fn load_config(args: &RunArgs) -> Result<AnalyticsConfig, CommandError> {
    // Load .env file if present (ignore errors if not found)
    let _ = dotenvy::dotenv();
    let overrides = overrides(args);
    let config = AnalyticsConfig::from_lookup(|key| {
        overrides
            .get(key)
            .cloned()
            .or_else(|| std::env::var(key).ok())
    })?;
    tracing::debug!(?config, "Loaded configuration");
    Ok(config)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    const USERS: &str = r#"{"user_id":"user_1","registration_date":"2024-01-05T10:00:00Z"}
{"user_id":"user_2","registration_date":"2024-02-01T00:00:00Z"}
"#;
    const CATEGORIES: &str = r#"{"category_id":"cat_x","name":"Tea"}"#;
    const PRODUCTS: &str = r#"{"product_id":"prod_a","category_id":"cat_x","name":"Sencha","base_price":"10.00"}
{"product_id":"prod_b","category_id":"cat_x","name":"Matcha","base_price":"25.00"}
"#;
    const TRANSACTIONS: &str = r#"{"transaction_id":"t1","user_id":"user_1","product_id":"prod_a","quantity":2,"unit_price":"10.00","timestamp":"2024-03-01T12:00:00Z"}
{"transaction_id":"t2","user_id":"user_1","product_id":"prod_b","quantity":1,"unit_price":"25.00","timestamp":"2024-03-02T12:00:00Z"}
"#;
    const SESSIONS: &str = r#"{"user_id":"user_1","start_time":"2024-03-01T11:50:00Z","conversion_status":"converted","product_id":"prod_a","duration_seconds":600}
{"user_id":"user_2","start_time":"2024-03-03T08:00:00Z","conversion_status":"browsed","duration_seconds":60}
"#;

    fn write_fixtures(dir: &Path) {
        for (name, content) in [
            ("users.json", USERS),
            ("categories.json", CATEGORIES),
            ("products.json", PRODUCTS),
            ("transactions.json", TRANSACTIONS),
            ("sessions.json", SESSIONS),
        ] {
            std::fs::write(dir.join(name), content).unwrap();
        }
    }

    fn args(out_dir: PathBuf) -> RunArgs {
        RunArgs {
            out_dir,
            funnel_window_secs: Some(1800),
            revenue_weight: Some(0.5),
            engagement_weight: Some(0.5),
            ..RunArgs::default()
        }
    }

    #[tokio::test]
    async fn test_files_run_writes_every_table() {
        let dir = tempfile::tempdir().unwrap();
        write_fixtures(dir.path());
        let out = dir.path().join("out");

        files_with_cancellation(dir.path(), &args(out.clone()), CancellationToken::new())
            .await
            .unwrap();

        for table in ecomlens_analytics::AnalyticsReport::TABLES {
            assert!(out.join(format!("{table}.json")).exists(), "{table} missing");
        }
        let revenue: serde_json::Value =
            serde_json::from_slice(&std::fs::read(out.join("revenue_by_category.json")).unwrap())
                .unwrap();
        assert_eq!(revenue[0]["category_id"], "cat_x");
        assert_eq!(revenue[0]["revenue"], "45.00");
    }

    #[tokio::test]
    async fn test_cancelled_run_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        write_fixtures(dir.path());
        let out = dir.path().join("out");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = files_with_cancellation(dir.path(), &args(out.clone()), cancel).await;
        assert!(matches!(
            result,
            Err(CommandError::Analytics(AnalyticsError::Cancelled { .. }))
        ));
        assert!(!out.exists());
    }

    #[test]
    fn test_flags_override_environment() {
        let mut run_args = args(PathBuf::from("out"));
        run_args.sample_size = Some(12);
        run_args.strategy = Some("earliest".to_owned());
        let config = load_config(&run_args).unwrap();
        assert_eq!(config.sample_size, 12);
        assert_eq!(
            config.sampling_strategy,
            ecomlens_analytics::SamplingStrategy::Earliest
        );
    }

    #[test]
    fn test_invalid_flag_is_config_error() {
        let mut run_args = args(PathBuf::from("out"));
        run_args.revenue_weight = Some(0.9);
        assert!(matches!(
            load_config(&run_args),
            Err(CommandError::Config(_))
        ));
    }
}
