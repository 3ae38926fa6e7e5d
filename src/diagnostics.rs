//! Diagnostics for the cash kiosk.
//!
//! Provides:
//! - **About info**: version, build timestamp, git SHA, platform
//! - **Logging setup**: console plus daily rolling file, with retention
//!   pruning of old files before the appender starts.

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::DeviceError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum number of log files to retain.
pub const MAX_LOG_FILES: usize = 10;

/// Prefix of the rolling log files (`kiosk.2026-10-16`).
pub const LOG_FILE_PREFIX: &str = "kiosk";

const DEFAULT_FILTER: &str = "info,cash_kiosk_lib=debug,cash_kiosk=debug";

// ---------------------------------------------------------------------------
// About info
// ---------------------------------------------------------------------------

/// Build and platform identity, shown by `cash-kiosk about` and logged at
/// startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AboutInfo {
    pub version: &'static str,
    pub build_timestamp: &'static str,
    pub git_sha: &'static str,
    pub platform: &'static str,
    pub arch: &'static str,
}

pub fn about() -> AboutInfo {
    AboutInfo {
        version: env!("CARGO_PKG_VERSION"),
        build_timestamp: env!("BUILD_TIMESTAMP"),
        git_sha: env!("BUILD_GIT_SHA"),
        platform: std::env::consts::OS,
        arch: std::env::consts::ARCH,
    }
}

impl std::fmt::Display for AboutInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "cash-kiosk v{} ({}, built {}) on {}/{}",
            self.version, self.git_sha, self.build_timestamp, self.platform, self.arch
        )
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Returns the default log directory.
pub fn get_log_dir() -> PathBuf {
    let base = std::env::var("LOCALAPPDATA")
        .or_else(|_| std::env::var("XDG_DATA_HOME"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            #[cfg(target_os = "windows")]
            {
                PathBuf::from(std::env::var("USERPROFILE").unwrap_or_else(|_| ".".into()))
                    .join("AppData")
                    .join("Local")
            }
            #[cfg(not(target_os = "windows"))]
            {
                PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()))
                    .join(".local")
                    .join("share")
            }
        });
    base.join("cash-kiosk").join("logs")
}

/// Prune old log files in `log_dir`, keeping only the most recent
/// `MAX_LOG_FILES`. Returns how many files were removed.
pub fn prune_old_logs(log_dir: &Path) -> usize {
    let Ok(entries) = fs::read_dir(log_dir) else {
        return 0;
    };

    let mut log_files: Vec<(PathBuf, SystemTime)> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_log_file(path))
        .map(|path| {
            let modified = fs::metadata(&path)
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (path, modified)
        })
        .collect();

    // Newest first
    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    let mut removed = 0;
    for (path, _) in log_files.iter().skip(MAX_LOG_FILES) {
        match fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) => warn!("Failed to prune log file {}: {e}", path.display()),
        }
    }
    removed
}

fn is_log_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| name == LOG_FILE_PREFIX || name.starts_with(&format!("{LOG_FILE_PREFIX}.")))
}

/// Install the global subscriber: `RUST_LOG`-driven filter, console layer and
/// a non-ANSI daily rolling file in `log_dir`.
///
/// The returned guard flushes the file writer on drop; keep it alive for the
/// life of the process.
pub fn init_logging(log_dir: &Path) -> Result<WorkerGuard, DeviceError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    fs::create_dir_all(log_dir)
        .map_err(|e| DeviceError::Config(format!("log dir {}: {e}", log_dir.display())))?;
    let pruned = prune_old_logs(log_dir);

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer().with_target(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| DeviceError::Config(format!("logging already initialized: {e}")))?;

    if pruned > 0 {
        tracing::info!(pruned, "Pruned old log files");
    }
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("cash-kiosk-{name}-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_about_serializes_camel_case() {
        let info = about();
        assert_eq!(info.version, env!("CARGO_PKG_VERSION"));
        assert!(!info.git_sha.is_empty());

        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["version"], info.version);
        assert!(value["buildTimestamp"].is_string());
        assert!(value["gitSha"].is_string());
        assert_eq!(value["platform"], std::env::consts::OS);
        assert!(info.to_string().starts_with(&format!("cash-kiosk v{}", info.version)));
    }

    #[test]
    fn test_log_dir_is_stable() {
        let d1 = get_log_dir();
        let d2 = get_log_dir();
        assert_eq!(d1, d2);
        assert!(d1.ends_with("cash-kiosk/logs"));
    }

    #[test]
    fn test_prune_keeps_newest_log_files_only() {
        let dir = scratch_dir("prune");
        for day in 0..(MAX_LOG_FILES + 3) {
            fs::write(dir.join(format!("kiosk.2026-01-{:02}", day + 1)), b"x").unwrap();
        }
        fs::write(dir.join("unrelated.txt"), b"keep").unwrap();

        assert_eq!(prune_old_logs(&dir), 3);
        let remaining: Vec<_> = fs::read_dir(&dir).unwrap().flatten().collect();
        assert_eq!(remaining.len(), MAX_LOG_FILES + 1);
        assert!(dir.join("unrelated.txt").exists());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_prune_missing_dir_is_noop() {
        assert_eq!(prune_old_logs(Path::new("/nonexistent/cash-kiosk/logs")), 0);
    }
}
