// src/logging.rs
//
// tracing setup: stderr always, plus a timestamped file in `log_dir` when set.
// Filter precedence: `--log-level`, then `RUST_LOG`, then `[logging].level`.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_NAME: &str = "rvc2mqtt.log";

/// Create `<dir>/YYYYMMDD-HHMMSS-rvc2mqtt.log` and point the `rvc2mqtt.log`
/// symlink at it (Unix only).
pub fn open_log_file(dir: &Path) -> Result<(File, PathBuf), String> {
    std::fs::create_dir_all(dir).map_err(|e| format!("Failed to create log dir: {}", e))?;

    let filename = chrono::Local::now()
        .format(&format!("%Y%m%d-%H%M%S-{}", LOG_NAME))
        .to_string();
    let log_path = dir.join(&filename);

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(|e| format!("Failed to create log file: {}", e))?;

    #[cfg(unix)]
    {
        let symlink_path = dir.join(LOG_NAME);
        let _ = std::fs::remove_file(&symlink_path);
        if let Err(e) = std::os::unix::fs::symlink(&filename, &symlink_path) {
            eprintln!("Failed to create {} symlink: {}", LOG_NAME, e);
        }
    }

    Ok((file, log_path))
}

/// Pick the filter directive: command line, then environment, then config.
pub fn filter_directive<'a>(cli: Option<&'a str>, env: Option<&'a str>, configured: &'a str) -> &'a str {
    cli.or(env.filter(|d| !d.trim().is_empty())).unwrap_or(configured)
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init(
    cli_level: Option<&str>,
    configured_level: &str,
    log_dir: Option<&Path>,
) -> Result<Option<PathBuf>, String> {
    let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let directive = filter_directive(cli_level, env.as_deref(), configured_level);
    let filter = EnvFilter::try_new(directive)
        .map_err(|e| format!("Invalid log level '{}': {}", directive, e))?;

    let (file_layer, log_path) = match log_dir {
        Some(dir) => {
            let (file, path) = open_log_file(dir)?;
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file));
            (Some(layer), Some(path))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()
        .map_err(|e| format!("Failed to initialize logging: {}", e))?;

    if let Some(path) = &log_path {
        tracing::info!(path = %path.display(), "file logging started");
    }
    Ok(log_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line_level_wins() {
        assert_eq!(filter_directive(Some("debug"), Some("warn"), "info"), "debug");
        assert_eq!(filter_directive(None, Some("rvc2mqtt_lib=trace"), "info"), "rvc2mqtt_lib=trace");
        assert_eq!(filter_directive(None, Some("  "), "info"), "info");
        assert_eq!(filter_directive(None, None, "info"), "info");
        assert!(EnvFilter::try_new(filter_directive(Some("debug"), None, "info")).is_ok());
    }

    #[test]
    fn test_open_log_file_creates_file_and_link() {
        let dir = tempfile::tempdir().unwrap();
        let logs = dir.path().join("logs");
        let (_file, path) = open_log_file(&logs).unwrap();
        assert!(path.exists());
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.ends_with("-rvc2mqtt.log"));
        assert_eq!(name.len(), "YYYYMMDD-HHMMSS-rvc2mqtt.log".len());

        #[cfg(unix)]
        {
            let target = std::fs::read_link(logs.join(LOG_NAME)).unwrap();
            assert_eq!(target, PathBuf::from(&name));
        }
    }
}
