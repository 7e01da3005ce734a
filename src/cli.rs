use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::retry::RetryConfig;
use crate::types::LogLevel;
use crate::watch::WatcherOptions;

#[derive(Parser, Debug)]
#[command(
    name = "photo-sorter",
    version,
    about = "Watch folders and sort new files into dated destination folders"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Job config file (TOML, or JSON when the extension is .json)
    #[arg(short, long, global = true, env = "PHOTO_SORTER_CONFIG")]
    pub config: Option<String>,

    /// Log level
    #[arg(long, value_enum, default_value = "info", global = true)]
    pub log_level: LogLevel,

    /// Attempts per file operation before giving up until the next scan
    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_attempts: u32,

    /// Exponential backoff base in seconds (delays 1, base, base^2, ...)
    #[arg(long, default_value_t = 5)]
    pub backoff_base: u32,

    /// Files handled concurrently per job
    #[arg(long, default_value_t = 4, value_parser = clap::value_parser!(u16).range(1..))]
    pub concurrency: u16,

    /// Poll interval in milliseconds while waiting for a new file to stop
    /// growing (0 disables)
    #[arg(long, default_value_t = 500)]
    pub settle_ms: u64,

    /// Send readiness and stopping notifications to systemd
    #[arg(long)]
    pub notify_systemd: bool,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Watch every configured job until interrupted (default)
    Run,
    /// Validate the config and list the jobs it defines
    Check,
}

impl Cli {
    pub fn effective_command(&self) -> Command {
        self.command.unwrap_or(Command::Run)
    }

    pub fn config_path(&self) -> PathBuf {
        match &self.config {
            Some(path) => crate::config::expand_tilde(path),
            None => crate::config::default_config_path(),
        }
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            backoff_base: self.backoff_base,
            ..RetryConfig::default()
        }
    }

    pub fn watcher_options(&self) -> WatcherOptions {
        WatcherOptions {
            retry: self.retry_config(),
            concurrency: usize::from(self.concurrency),
            settle: Duration::from_millis(self.settle_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["photo-sorter"]).unwrap();
        assert_eq!(cli.effective_command(), Command::Run);
        assert_eq!(cli.log_level, LogLevel::Info);
        assert!(!cli.notify_systemd);

        let retry = cli.retry_config();
        assert_eq!(retry.max_attempts, 3);
        assert_eq!(retry.backoff_base, 5);

        let options = cli.watcher_options();
        assert_eq!(options.concurrency, 4);
        assert_eq!(options.settle, Duration::from_millis(500));
        assert!(cli.config_path().ends_with("photo-sorter/config.toml"));
    }

    #[test]
    fn test_check_with_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "photo-sorter",
            "check",
            "--config",
            "/etc/sorter.json",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(cli.effective_command(), Command::Check);
        assert_eq!(cli.config_path(), PathBuf::from("/etc/sorter.json"));
        assert_eq!(cli.log_level, LogLevel::Debug);
    }

    #[test]
    fn test_retry_flags() {
        let cli = Cli::try_parse_from([
            "photo-sorter",
            "--max-attempts",
            "5",
            "--backoff-base",
            "2",
            "--settle-ms",
            "0",
        ])
        .unwrap();
        let options = cli.watcher_options();
        assert_eq!(options.retry.max_attempts, 5);
        assert_eq!(options.retry.delay_for_retry(2), Duration::from_secs(4));
        assert!(options.settle.is_zero());
    }

    #[test]
    fn test_zero_attempts_rejected() {
        assert!(Cli::try_parse_from(["photo-sorter", "--max-attempts", "0"]).is_err());
        assert!(Cli::try_parse_from(["photo-sorter", "--concurrency", "0"]).is_err());
        assert!(Cli::try_parse_from(["photo-sorter", "--log-level", "loud"]).is_err());
    }
}
