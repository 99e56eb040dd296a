use anyhow::{anyhow, Result};
use std::fs::{self, File};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{LogOutput, LoggingConfig};

/// Build the filter directive string for a base level, e.g.
/// `info,troupe=info,hyper=warn,reqwest=warn`.
pub fn filter_directives(level: &str) -> String {
    format!("{},troupe={},hyper=warn,reqwest=warn", level, level)
}

/// Install the global tracing subscriber described by `config`.
///
/// Fails if a global subscriber is already installed or the log file cannot
/// be created.
pub fn setup_global_logging(config: &LoggingConfig) -> Result<()> {
    let directives = filter_directives(&config.level);

    let file_layer = match config.output {
        LogOutput::File | LogOutput::Both => {
            let log_path = config
                .file_path
                .as_ref()
                .ok_or_else(|| anyhow!("logging.file_path is required for file output"))?;

            // Ensure parent directory exists
            if let Some(parent) = log_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let file = File::create(log_path)?;
            let file_writer = std::sync::Mutex::new(file);

            Some(
                fmt::layer()
                    .with_writer(file_writer)
                    .with_thread_ids(true)
                    .with_line_number(true)
                    .with_file(true)
                    .with_target(true)
                    .with_ansi(false)
                    .with_filter(EnvFilter::builder().parse(&directives)?),
            )
        }
        LogOutput::Stdout => None,
    };

    let stdout_layer = match config.output {
        LogOutput::Stdout | LogOutput::Both => Some(
            fmt::layer()
                .with_writer(std::io::stdout)
                .with_target(true)
                .with_ansi(true)
                .with_filter(EnvFilter::builder().parse(&directives)?),
        ),
        LogOutput::File => None,
    };

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stdout_layer)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directives_parse() {
        let directives = filter_directives("debug");
        assert_eq!(directives, "debug,troupe=debug,hyper=warn,reqwest=warn");
        assert!(EnvFilter::builder().parse(&directives).is_ok());
    }

    #[test]
    fn test_file_output_requires_path() {
        let config = LoggingConfig {
            level: "info".into(),
            output: LogOutput::File,
            file_path: None,
        };
        assert!(setup_global_logging(&config).is_err());
    }

    #[test]
    fn test_file_output_creates_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("troupe.log");
        let config = LoggingConfig {
            level: "info".into(),
            output: LogOutput::File,
            file_path: Some(path.clone()),
        };
        // Another test may already own the global subscriber; the file is
        // created before installation either way.
        let _ = setup_global_logging(&config);
        assert!(path.exists());
    }
}
