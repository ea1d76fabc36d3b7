//! Logging Module
//!
//! Structured logging built on `tracing`. Burn and its compute runtimes are
//! chatty at `info`, so they are held at `warn` unless `RUST_LOG` says
//! otherwise.

use std::time::Instant;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Crates whose info-level output is suppressed by default
const QUIET_TARGETS: [&str; 4] = ["burn", "burn_core", "burn_train", "cubecl"];

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level for this crate
    pub level: LogLevel,
    /// Whether to include target (module path)
    pub include_target: bool,
    /// Whether to include thread IDs
    pub include_thread_ids: bool,
    /// Whether to use ANSI colors
    pub ansi_colors: bool,
    /// Hold framework crates at `warn`
    pub quiet_framework: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            include_target: false,
            include_thread_ids: false,
            ansi_colors: true,
            quiet_framework: true,
        }
    }
}

impl LogConfig {
    /// Create a verbose logging config for debugging
    pub fn verbose() -> Self {
        Self {
            level: LogLevel::Debug,
            include_target: true,
            include_thread_ids: true,
            ansi_colors: true,
            quiet_framework: true,
        }
    }

    /// Filter directives applied when `RUST_LOG` is unset
    pub fn directives(&self) -> String {
        let mut directives = vec![self.level.to_string().to_lowercase()];
        if self.quiet_framework {
            directives.extend(QUIET_TARGETS.iter().map(|target| format!("{target}=warn")));
        }
        directives.join(",")
    }
}

/// Log level enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Parse a level name; unknown names fall back to `Info`
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "TRACE"),
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// Initialize logging with the given configuration
///
/// `RUST_LOG` takes precedence over the configured directives.
pub fn init_logging(config: &LogConfig) -> Result<(), String> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.directives()));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_ansi(config.ansi_colors)
                .with_target(config.include_target)
                .with_thread_ids(config.include_thread_ids)
                .compact(),
        )
        .with(filter)
        .try_init()
        .map_err(|e| format!("Failed to initialize logging: {}", e))
}

/// Epoch timing and ETA reporting for the fit loop
pub struct TrainingLogger {
    epoch: usize,
    total_epochs: usize,
    epoch_start: Instant,
    training_start: Instant,
}

impl TrainingLogger {
    /// Create a new training logger
    pub fn new(total_epochs: usize) -> Self {
        Self {
            epoch: 0,
            total_epochs,
            epoch_start: Instant::now(),
            training_start: Instant::now(),
        }
    }

    /// Log start of an epoch
    pub fn start_epoch(&mut self, epoch: usize) {
        self.epoch = epoch;
        self.epoch_start = Instant::now();

        tracing::debug!("Epoch {}/{} started", epoch + 1, self.total_epochs);
    }

    /// Log end of an epoch with its headline metrics
    pub fn end_epoch(&self, c_loss: f64, p_acc: f64, val_p_acc: f64) {
        let epoch_time = self.epoch_start.elapsed();
        let total_time = self.training_start.elapsed();

        let epochs_remaining = self.total_epochs.saturating_sub(self.epoch + 1);
        let avg_epoch_time = total_time.as_secs_f64() / (self.epoch + 1) as f64;
        let eta_secs = epochs_remaining as f64 * avg_epoch_time;

        tracing::info!(
            "Epoch {}/{} completed in {:.1}s | c_loss: {:.4} | p_acc: {:.2}% | val_p_acc: {:.2}% | ETA: {}",
            self.epoch + 1,
            self.total_epochs,
            epoch_time.as_secs_f64(),
            c_loss,
            p_acc * 100.0,
            val_p_acc * 100.0,
            super::format_duration(eta_secs)
        );
    }

    /// Log training completion
    pub fn log_complete(&self, final_val_acc: f64) {
        let total_time = self.training_start.elapsed();

        tracing::info!(
            "Training complete! {} epochs in {} | final val_p_acc: {:.2}%",
            self.total_epochs,
            super::format_duration(total_time.as_secs_f64()),
            final_val_acc * 100.0
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_parse() {
        assert_eq!(LogLevel::parse("debug"), LogLevel::Debug);
        assert_eq!(LogLevel::parse("INFO"), LogLevel::Info);
        assert_eq!(LogLevel::parse("Warning"), LogLevel::Warn);
        assert_eq!(LogLevel::parse("unknown"), LogLevel::Info);
    }

    #[test]
    fn test_default_directives_silence_framework() {
        let directives = LogConfig::default().directives();
        assert!(directives.starts_with("info"));
        assert!(directives.contains("burn=warn"));
        assert!(directives.contains("cubecl=warn"));
    }

    #[test]
    fn test_parsed_level_leads_directives() {
        let config = LogConfig {
            level: LogLevel::parse("warn"),
            ..LogConfig::default()
        };
        assert!(config.directives().starts_with("warn,"));
    }

    #[test]
    fn test_directives_without_quiet_framework() {
        let config = LogConfig {
            quiet_framework: false,
            ..LogConfig::verbose()
        };
        assert_eq!(config.directives(), "debug");
    }
}
