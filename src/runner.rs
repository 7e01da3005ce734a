//! Starts one [`Watcher`] per job and keeps them running until shutdown.

use tokio_util::sync::CancellationToken;

use crate::config::Job;
use crate::sort::strategy_for;
use crate::systemd::SystemdNotifier;
use crate::watch::{Watcher, WatcherOptions};

/// Build and start a watcher for every job. A job whose watcher fails to
/// start is logged and left out; the others keep going.
pub(crate) fn start_watchers(
    jobs: Vec<Job>,
    options: &WatcherOptions,
    shutdown: &CancellationToken,
) -> Vec<Watcher> {
    let mut watchers = Vec::with_capacity(jobs.len());
    for job in jobs {
        let strategy = strategy_for(job.strategy, &options.retry);
        let name = job.name.clone();
        let mut watcher = Watcher::new(job, strategy, options.clone(), shutdown.child_token());
        match watcher.start_watching() {
            Ok(()) => {
                let job = watcher.job();
                tracing::debug!(
                    job = %job.name,
                    strategy = job.strategy.as_str(),
                    op = job.operation.as_str(),
                    "Watcher started"
                );
                watchers.push(watcher);
            }
            Err(e) => tracing::error!(job = %name, "Failed to start watching: {}", e),
        }
    }
    watchers
}

/// Stop every watcher and log what each one handled.
pub(crate) async fn stop_watchers(watchers: &mut [Watcher]) {
    for watcher in watchers.iter_mut() {
        watcher.stop_watching().await;
    }
    let processed: usize = watchers.iter().map(|w| w.stats().processed).sum();
    tracing::info!(jobs = watchers.len(), processed, "All watchers stopped");
}

/// Run all jobs until `shutdown` is cancelled.
pub(crate) async fn run_jobs(
    jobs: Vec<Job>,
    options: WatcherOptions,
    shutdown: CancellationToken,
    notifier: SystemdNotifier,
) -> anyhow::Result<()> {
    let configured = jobs.len();
    let mut watchers = start_watchers(jobs, &options, &shutdown);
    if watchers.is_empty() {
        anyhow::bail!("None of the {} configured jobs could be started", configured);
    }

    tracing::info!(
        started = watchers.len(),
        configured,
        "Watching, press Ctrl+C to stop"
    );
    notifier.notify_ready();
    notifier.notify_status(&format!("Watching {} of {} jobs", watchers.len(), configured));

    shutdown.cancelled().await;

    notifier.notify_stopping();
    stop_watchers(&mut watchers).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryConfig;
    use crate::types::{OperationKind, StrategyKind};
    use crate::watch::Lifecycle;
    use std::collections::BTreeSet;
    use std::path::Path;
    use std::time::Duration;

    fn job(name: &str, watch: &Path, dest: &Path) -> Job {
        Job {
            name: name.to_string(),
            watch_root: watch.to_path_buf(),
            dest_root: dest.to_path_buf(),
            extensions: BTreeSet::new(),
            strategy: StrategyKind::Generic,
            operation: OperationKind::Copy,
            scan_interval: Duration::from_secs(60),
        }
    }

    fn options() -> WatcherOptions {
        WatcherOptions {
            retry: RetryConfig::immediate(1),
            concurrency: 1,
            settle: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_bad_job_does_not_stop_others() {
        let watch = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        let jobs = vec![
            job("missing", &watch.path().join("gone"), dest.path()),
            job("good", watch.path(), dest.path()),
        ];
        let shutdown = CancellationToken::new();

        let mut watchers = start_watchers(jobs, &options(), &shutdown);
        assert_eq!(watchers.len(), 1);
        assert_eq!(watchers[0].job().name, "good");
        assert_eq!(watchers[0].lifecycle(), Lifecycle::Running);

        stop_watchers(&mut watchers).await;
        assert_eq!(watchers[0].lifecycle(), Lifecycle::Stopped);
    }

    #[tokio::test]
    async fn test_run_jobs_returns_on_shutdown() {
        let watch = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        std::fs::write(watch.path().join("a.txt"), b"a").unwrap();
        let shutdown = CancellationToken::new();

        let run = tokio::spawn(run_jobs(
            vec![job("docs", watch.path(), dest.path())],
            options(),
            shutdown.clone(),
            SystemdNotifier::new(false),
        ));
        let target = dest.path().join("a.txt");
        for _ in 0..100 {
            if target.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(target.exists());
    }

    #[tokio::test]
    async fn test_run_jobs_fails_when_nothing_starts() {
        let dir = tempfile::tempdir().unwrap();
        let result = run_jobs(
            vec![job("missing", &dir.path().join("gone"), dir.path())],
            options(),
            CancellationToken::new(),
            SystemdNotifier::new(false),
        )
        .await;
        assert!(result.is_err());
    }
}
