//! Report output: one pretty-printed JSON file per table.

use std::path::{Path, PathBuf};

use ecomlens_analytics::AnalyticsReport;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Write every table of `report` to `<dir>/<table>.json`, creating `dir` if
/// needed. Returns the written paths.
///
/// # Errors
///
/// Returns `OutputError` if a table cannot be serialized or written.
pub async fn write_report(
    report: &AnalyticsReport,
    dir: &Path,
) -> Result<Vec<PathBuf>, OutputError> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| OutputError::Io { path, source }
    };

    tokio::fs::create_dir_all(dir).await.map_err(io_err(dir))?;

    let mut written = Vec::new();
    for (name, value) in report.tables()? {
        let path = dir.join(format!("{name}.json"));
        let mut bytes = serde_json::to_vec_pretty(&value)?;
        bytes.push(b'\n');
        tokio::fs::write(&path, bytes).await.map_err(io_err(&path))?;
        tracing::debug!(path = %path.display(), "Wrote table");
        written.push(path);
    }
    Ok(written)
}
