//! Destination-path strategies.
//!
//! A job picks its strategy by [`StrategyKind`]; [`strategy_for`] is the only
//! place the kind is mapped to an implementation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::error::SortError;
use super::metadata::{ContainerMetadata, DateInfo, MediaFamily, MetadataExtractor};
use super::operation::{self, OperationOutcome};
use crate::retry::{self, RetryAction, RetryConfig};
use crate::types::{OperationKind, StrategyKind};

/// Computes where a file should land, and applies the job's operation.
pub trait PathStrategy: Send + Sync {
    /// Destination for `src` under `dest_root`, or `None` when this strategy
    /// cannot place the file.
    fn build_destination_path(&self, src: &Path, dest_root: &Path) -> Option<PathBuf>;

    fn execute_operation(
        &self,
        kind: OperationKind,
        src: &Path,
        dest: &Path,
    ) -> Result<OperationOutcome, SortError> {
        operation::execute(kind, src, dest)
    }
}

/// Build the strategy for a job.
pub fn strategy_for(kind: StrategyKind, retry: &RetryConfig) -> Arc<dyn PathStrategy> {
    match kind {
        StrategyKind::Photo => Arc::new(PhotoStrategy::new(retry.clone())),
        StrategyKind::Generic => Arc::new(GenericStrategy),
    }
}

/// Lowercase extension without the leading dot.
pub fn file_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

fn file_name(src: &Path) -> Option<&str> {
    src.file_name().and_then(|n| n.to_str())
}

/// Sorts photos and videos into `YEAR/MM Mon YEAR/` by capture date.
pub struct PhotoStrategy {
    extractor: Box<dyn MetadataExtractor>,
    retry: RetryConfig,
}

impl PhotoStrategy {
    pub fn new(retry: RetryConfig) -> Self {
        Self::with_extractor(Box::new(ContainerMetadata), retry)
    }

    pub fn with_extractor(extractor: Box<dyn MetadataExtractor>, retry: RetryConfig) -> Self {
        Self { extractor, retry }
    }

    /// Resolve the capture date, retrying transient decoder failures.
    ///
    /// Images that still fail fall back to the unknown date. Videos that
    /// still fail have no destination.
    fn resolve_date(&self, src: &Path, family: MediaFamily) -> Option<DateInfo> {
        let result = retry::retry_blocking(
            &self.retry,
            |e: &SortError| {
                if e.is_retryable() {
                    RetryAction::Retry
                } else {
                    RetryAction::Abort
                }
            },
            || match family {
                MediaFamily::Image => self.extractor.extract_image_date(src),
                MediaFamily::Video => self.extractor.extract_video_date(src),
            },
        );

        match (result, family) {
            (Ok(Some(info)), _) => Some(info),
            (Ok(None), _) => {
                tracing::info!(path = %src.display(), "No capture date, filing under Unknown");
                Some(DateInfo::unknown())
            }
            (Err(e), MediaFamily::Image) => {
                tracing::warn!(path = %src.display(), "Giving up on EXIF ({}), filing under Unknown", e);
                Some(DateInfo::unknown())
            }
            (Err(e), MediaFamily::Video) => {
                tracing::error!(path = %src.display(), "Could not read video metadata: {}", e);
                None
            }
        }
    }
}

impl PathStrategy for PhotoStrategy {
    fn build_destination_path(&self, src: &Path, dest_root: &Path) -> Option<PathBuf> {
        let family = file_extension(src).as_deref().and_then(MediaFamily::from_extension)?;
        let filename = file_name(src)?;
        let date = self.resolve_date(src, family)?;
        Some(dated_destination(dest_root, &date, filename))
    }
}

/// `dest_root/YEAR/MM Mon YEAR/YEAR MM DD filename`
pub fn dated_destination(dest_root: &Path, date: &DateInfo, filename: &str) -> PathBuf {
    let folder = format!("{} {} {}", date.month_num, date.month_name, date.year);
    let name = format!("{} {} {} {}", date.year, date.month_num, date.day, filename);
    dest_root.join(&date.year).join(folder).join(name)
}

/// Flat pass-through: `dest_root/filename`.
#[derive(Debug, Default, Clone, Copy)]
pub struct GenericStrategy;

impl PathStrategy for GenericStrategy {
    fn build_destination_path(&self, src: &Path, dest_root: &Path) -> Option<PathBuf> {
        match src.file_name() {
            Some(name) => Some(dest_root.join(name)),
            None => Some(dest_root.to_path_buf()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sort::metadata::tests::{jpeg_with_datetime_original, mp4_with_creation};
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Extractor that fails a fixed number of times before answering.
    struct FlakyExtractor {
        failures: u32,
        calls: Arc<AtomicU32>,
        answer: Option<DateInfo>,
    }

    impl FlakyExtractor {
        fn attempt(&self, path: &Path) -> Result<Option<DateInfo>, SortError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(SortError::metadata(path, "decoder hiccup"))
            } else {
                Ok(self.answer.clone())
            }
        }
    }

    impl MetadataExtractor for FlakyExtractor {
        fn extract_image_date(&self, path: &Path) -> Result<Option<DateInfo>, SortError> {
            self.attempt(path)
        }

        fn extract_video_date(&self, path: &Path) -> Result<Option<DateInfo>, SortError> {
            self.attempt(path)
        }
    }

    fn flaky(failures: u32, answer: Option<DateInfo>) -> (PhotoStrategy, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let extractor = FlakyExtractor {
            failures,
            calls: calls.clone(),
            answer,
        };
        (
            PhotoStrategy::with_extractor(Box::new(extractor), RetryConfig::immediate(3)),
            calls,
        )
    }

    fn march_15() -> DateInfo {
        DateInfo::from_date(NaiveDate::from_ymd_opt(2024, 3, 15).unwrap())
    }

    #[test]
    fn test_photo_path_from_exif() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("IMG_01.jpg");
        std::fs::write(&src, jpeg_with_datetime_original("2024:03:15 10:00:00")).unwrap();

        let strategy = PhotoStrategy::new(RetryConfig::immediate(3));
        let dest = strategy.build_destination_path(&src, Path::new("/dest"));
        assert_eq!(
            dest,
            Some(PathBuf::from("/dest/2024/03 Mar 2024/2024 03 15 IMG_01.jpg"))
        );
    }

    #[test]
    fn test_photo_without_exif_goes_to_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("IMG_01.jpg");
        std::fs::write(&src, [0xFF, 0xD8, 0xFF, 0xD9]).unwrap();

        let strategy = PhotoStrategy::new(RetryConfig::immediate(3));
        let dest = strategy.build_destination_path(&src, Path::new("/dest"));
        assert_eq!(
            dest,
            Some(PathBuf::from(
                "/dest/Unknown/00 Unknown Unknown/Unknown 00 00 IMG_01.jpg"
            ))
        );
    }

    #[test]
    fn test_photo_extension_is_case_insensitive() {
        let (strategy, _) = flaky(0, Some(march_15()));
        let dest = strategy.build_destination_path(Path::new("/in/IMG_02.JPEG"), Path::new("/dest"));
        assert_eq!(
            dest,
            Some(PathBuf::from("/dest/2024/03 Mar 2024/2024 03 15 IMG_02.JPEG"))
        );
    }

    #[test]
    fn test_photo_rejects_unsupported_extension() {
        let (strategy, calls) = flaky(0, Some(march_15()));
        assert_eq!(
            strategy.build_destination_path(Path::new("/in/notes.txt"), Path::new("/dest")),
            None
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_photo_retries_transient_failures() {
        let (strategy, calls) = flaky(2, Some(march_15()));
        let dest = strategy.build_destination_path(Path::new("/in/a.png"), Path::new("/dest"));
        assert_eq!(
            dest,
            Some(PathBuf::from("/dest/2024/03 Mar 2024/2024 03 15 a.png"))
        );
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_image_failure_falls_back_to_unknown() {
        let (strategy, calls) = flaky(10, Some(march_15()));
        let dest = strategy.build_destination_path(Path::new("/in/a.jpg"), Path::new("/dest"));
        assert_eq!(
            dest,
            Some(PathBuf::from(
                "/dest/Unknown/00 Unknown Unknown/Unknown 00 00 a.jpg"
            ))
        );
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_video_failure_has_no_destination() {
        let (strategy, calls) = flaky(10, Some(march_15()));
        assert_eq!(
            strategy.build_destination_path(Path::new("/in/clip.mp4"), Path::new("/dest")),
            None
        );
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_video_path_from_mvhd() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("clip.mp4");
        std::fs::write(&src, mp4_with_creation(1_688_472_000)).unwrap();

        let strategy = PhotoStrategy::new(RetryConfig::immediate(3));
        assert_eq!(
            strategy.build_destination_path(&src, Path::new("/dest")),
            Some(PathBuf::from("/dest/2023/07 Jul 2023/2023 07 04 clip.mp4"))
        );
    }

    #[test]
    fn test_generic_passthrough() {
        let dest = GenericStrategy.build_destination_path(Path::new("notes.txt"), Path::new("/dest"));
        assert_eq!(dest, Some(PathBuf::from("/dest/notes.txt")));

        let nested =
            GenericStrategy.build_destination_path(Path::new("/in/a/b/report.pdf"), Path::new("/dest"));
        assert_eq!(nested, Some(PathBuf::from("/dest/report.pdf")));
    }

    #[test]
    fn test_strategy_for_kind() {
        let retry = RetryConfig::immediate(1);
        let generic = strategy_for(StrategyKind::Generic, &retry);
        assert_eq!(
            generic.build_destination_path(Path::new("x.bin"), Path::new("/d")),
            Some(PathBuf::from("/d/x.bin"))
        );
        let photo = strategy_for(StrategyKind::Photo, &retry);
        assert_eq!(
            photo.build_destination_path(Path::new("x.bin"), Path::new("/d")),
            None
        );
    }

    #[test]
    fn test_file_extension() {
        assert_eq!(file_extension(Path::new("/a/B.JpG")), Some("jpg".to_string()));
        assert_eq!(file_extension(Path::new("/a/README")), None);
    }
}
