//! Path utilities for clipd
//!
//! Handles XDG Base Directory compliance for config, data and runtime
//! directories. History logs live under the data directory, the
//! instance lock under the runtime directory.

use directories::ProjectDirs;
use std::path::{Path, PathBuf};

/// Application identifier for XDG directories
const APP_NAME: &str = "clipd";

/// Extension used for history log files
const HISTORY_EXT: &str = "hist";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", APP_NAME)
}

/// Get the configuration directory
///
/// Location: `$XDG_CONFIG_HOME/clipd` or `~/.config/clipd`
pub fn config_dir() -> PathBuf {
    project_dirs()
        .map(|p| p.config_dir().to_path_buf())
        .unwrap_or_else(|| home_dir().join(".config").join(APP_NAME))
}

/// Get the main configuration file path
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Get the data directory holding history logs
///
/// Location: `$XDG_DATA_HOME/clipd` or `~/.local/share/clipd`
pub fn data_dir() -> PathBuf {
    if let Ok(xdg_data) = std::env::var("XDG_DATA_HOME") {
        if !xdg_data.is_empty() {
            return PathBuf::from(xdg_data).join(APP_NAME);
        }
    }
    project_dirs()
        .map(|p| p.data_local_dir().to_path_buf())
        .unwrap_or_else(|| home_dir().join(".local").join("share").join(APP_NAME))
}

/// Get the history log path for a named selection
///
/// Location: `<data_dir>/<SELECTION>.hist`
pub fn history_file(selection: &str) -> PathBuf {
    data_dir().join(format!("{}.{}", selection, HISTORY_EXT))
}

/// Get the log directory used by daemon file logging
///
/// Location: `<data_dir>/log`
pub fn log_dir() -> PathBuf {
    data_dir().join("log")
}

/// Get the runtime directory
///
/// Location: `$XDG_RUNTIME_DIR/clipd` or `/tmp/clipd-$UID`
pub fn runtime_dir() -> PathBuf {
    if let Ok(xdg_runtime) = std::env::var("XDG_RUNTIME_DIR") {
        if !xdg_runtime.is_empty() {
            return PathBuf::from(xdg_runtime).join(APP_NAME);
        }
    }
    // Fallback to /tmp with UID for security
    // SAFETY: getuid() is always safe to call
    let uid = unsafe { libc::getuid() };
    PathBuf::from(format!("/tmp/{}-{}", APP_NAME, uid))
}

/// Get the daemon lock file path
///
/// A single fixed path serializes "one daemon at a time" and backs
/// the liveness query.
pub fn lock_file() -> PathBuf {
    runtime_dir().join("clipd.lock")
}

/// Ensure a directory exists, creating it if necessary
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_history_file_name() {
        let path = history_file("CLIPBOARD");
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "CLIPBOARD.hist"
        );
        assert!(path.starts_with(data_dir()));
    }

    #[test]
    fn test_data_dir_xdg_override() {
        let original = env::var("XDG_DATA_HOME").ok();

        env::set_var("XDG_DATA_HOME", "/srv/data");
        assert_eq!(data_dir(), PathBuf::from("/srv/data/clipd"));

        match original {
            Some(val) => env::set_var("XDG_DATA_HOME", val),
            None => env::remove_var("XDG_DATA_HOME"),
        }
    }

    #[test]
    fn test_lock_file_in_runtime_dir() {
        let lock = lock_file();
        assert!(lock.starts_with(runtime_dir()));
        assert_eq!(lock.file_name().unwrap().to_str().unwrap(), "clipd.lock");
    }

    #[test]
    fn test_runtime_dir_fallback_has_uid() {
        let original = env::var("XDG_RUNTIME_DIR").ok();

        env::remove_var("XDG_RUNTIME_DIR");
        let path = runtime_dir();
        assert!(path.to_string_lossy().starts_with("/tmp/clipd-"));

        if let Some(val) = original {
            env::set_var("XDG_RUNTIME_DIR", val);
        }
    }

    #[test]
    fn test_config_file_is_toml() {
        let path = config_file();
        assert!(path.to_string_lossy().ends_with("config.toml"));
        assert!(path.starts_with(config_dir()));
    }

    #[test]
    fn test_ensure_dir_creates_nested() {
        let temp = tempfile::TempDir::new().unwrap();
        let dir = temp.path().join("a").join("b");
        ensure_dir(&dir).unwrap();
        assert!(dir.is_dir());
        // Idempotent
        ensure_dir(&dir).unwrap();
    }
}
