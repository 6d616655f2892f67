use crate::errors::{AppError, AppResult};
use directories::BaseDirs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;

pub const DATA_DIR_ENV: &str = "MODSHELF_DATA_DIR";
const APP_DIR_NAME: &str = "modshelf";
const DB_FILE_NAME: &str = "modshelf.db";
const LOG_FILE_NAME: &str = "modshelf.log";

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    data_dir: PathBuf,
}

impl AppPaths {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// `MODSHELF_DATA_DIR` when set, otherwise the platform's local data dir.
    pub fn resolve() -> AppResult<Self> {
        if let Some(dir) = std::env::var_os(DATA_DIR_ENV).filter(|dir| !dir.is_empty()) {
            return Ok(Self::new(dir));
        }
        let base = BaseDirs::new()
            .ok_or_else(|| AppError::Io("could not resolve the user data directory".to_string()))?;
        Ok(Self::new(base.data_local_dir().join(APP_DIR_NAME)))
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(DB_FILE_NAME)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

/// JSON logs to a daily rolling file under `logs/`. Filter comes from
/// `RUST_LOG`, defaulting to `info`. Only the first call installs anything.
pub fn init_tracing(paths: &AppPaths) -> AppResult<()> {
    let log_dir = paths.log_dir();
    std::fs::create_dir_all(&log_dir)?;
    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_NAME);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    if LOG_GUARD.set(guard).is_err() {
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| AppError::Internal(format!("tracing init failed: {}", error)))
}

#[cfg(test)]
mod tests {
    use super::AppPaths;
    use std::path::Path;

    #[test]
    fn paths_live_under_data_dir() {
        let paths = AppPaths::new("/tmp/modshelf-test");
        assert_eq!(paths.db_path(), Path::new("/tmp/modshelf-test/modshelf.db"));
        assert_eq!(paths.log_dir(), Path::new("/tmp/modshelf-test/logs"));
        assert_eq!(paths.data_dir(), Path::new("/tmp/modshelf-test"));
    }
}
