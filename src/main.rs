//! photo-sorter: watch folders and file new arrivals into a destination tree.
//!
//! Each configured job pairs a watch folder with a destination. New files are
//! discovered by live filesystem events and by a periodic rescan, then copied,
//! moved or hash-synced to a path chosen by the job's strategy. The photo
//! strategy files by capture date read from EXIF or the video container.
//! Transient failures are retried with exponential backoff.

#![warn(clippy::all)]

mod cli;
mod config;
pub mod retry;
mod runner;
mod shutdown;
mod sort;
mod systemd;
mod types;
mod watch;

use std::path::Path;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::Command;
use config::LoadedJobs;

/// Print the validated jobs for `check`.
fn print_jobs(config_path: &Path, loaded: &LoadedJobs) {
    println!("Config: {}", config_path.display());
    println!();
    println!("Jobs ({}):", loaded.jobs.len());
    for job in &loaded.jobs {
        println!("  {}", job.name);
        println!("    watch:      {}", job.watch_root.display());
        println!("    dest:       {}", job.dest_root.display());
        println!("    strategy:   {}", job.strategy.as_str());
        println!("    operation:  {}", job.operation.as_str());
        println!("    interval:   {}s", job.scan_interval.as_secs());
        if job.extensions.is_empty() {
            println!("    file types: (all)");
        } else {
            let types: Vec<&str> = job.extensions.iter().map(String::as_str).collect();
            println!("    file types: {}", types.join(", "));
        }
    }

    if !loaded.skipped.is_empty() {
        println!();
        println!("Skipped ({}):", loaded.skipped.len());
        for error in &loaded.skipped {
            println!("  {}", error);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_filter())),
        )
        .init();

    let config_path = cli.config_path();
    let loaded = config::load_jobs(&config_path)?;
    for error in &loaded.skipped {
        tracing::warn!("Skipping job: {}", error);
    }

    match cli.effective_command() {
        Command::Check => {
            print_jobs(&config_path, &loaded);
            if loaded.jobs.is_empty() {
                anyhow::bail!("No valid jobs in {}", config_path.display());
            }
            Ok(())
        }
        Command::Run => {
            if loaded.jobs.is_empty() {
                anyhow::bail!("No valid jobs in {}", config_path.display());
            }
            let shutdown_token = shutdown::install_signal_handler()?;
            let notifier = systemd::SystemdNotifier::new(cli.notify_systemd);
            runner::run_jobs(
                loaded.jobs,
                cli.watcher_options(),
                shutdown_token,
                notifier,
            )
            .await
        }
    }
}
