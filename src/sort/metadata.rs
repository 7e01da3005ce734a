//! Capture-date extraction for photos and videos.
//!
//! Images are read through their EXIF `DateTimeOriginal` tag. MP4/QuickTime
//! videos carry a creation time in the `moov/mvhd` box. AVI has no reliable
//! container date and always reports none.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};

use super::error::SortError;

/// Seconds between the QuickTime epoch (1904-01-01) and the Unix epoch.
const SECONDS_FROM_1904_TO_1970: u64 = 2_082_844_800;

/// Date components used to build destination folders and filenames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateInfo {
    pub year: String,
    pub month_num: String,
    pub month_name: String,
    pub day: String,
}

impl DateInfo {
    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year().to_string(),
            month_num: format!("{:02}", date.month()),
            month_name: date.format("%b").to_string(),
            day: format!("{:02}", date.day()),
        }
    }

    /// Sentinel for files without a usable capture date.
    pub fn unknown() -> Self {
        Self {
            year: "Unknown".to_string(),
            month_num: "00".to_string(),
            month_name: "Unknown".to_string(),
            day: "00".to_string(),
        }
    }

    #[cfg(test)]
    pub fn is_unknown(&self) -> bool {
        self.year == "Unknown"
    }
}

/// Which decoder a file extension belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaFamily {
    Image,
    Video,
}

impl MediaFamily {
    /// Map a lowercase extension (no leading dot) to its family.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "jpg" | "jpeg" | "png" => Some(Self::Image),
            "mp4" | "mov" | "avi" => Some(Self::Video),
            _ => None,
        }
    }
}

/// Source of capture dates. `Ok(None)` means the file was readable but has no
/// date; `Err` means the read itself failed and may succeed later.
pub trait MetadataExtractor: Send + Sync {
    fn extract_image_date(&self, path: &Path) -> Result<Option<DateInfo>, SortError>;

    fn extract_video_date(&self, path: &Path) -> Result<Option<DateInfo>, SortError>;
}

/// Decodes EXIF and MP4/QuickTime metadata straight from the file.
#[derive(Debug, Default, Clone, Copy)]
pub struct ContainerMetadata;

impl MetadataExtractor for ContainerMetadata {
    fn extract_image_date(&self, path: &Path) -> Result<Option<DateInfo>, SortError> {
        Ok(get_photo_exif(path)?
            .as_deref()
            .and_then(parse_exif_datetime)
            .map(DateInfo::from_date))
    }

    fn extract_video_date(&self, path: &Path) -> Result<Option<DateInfo>, SortError> {
        let is_avi = path
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("avi"));
        if is_avi {
            return Ok(None);
        }

        let file = File::open(path).map_err(|e| SortError::metadata(path, e))?;
        let mut reader = BufReader::new(file);
        let creation = read_mvhd_creation(&mut reader).map_err(|e| SortError::metadata(path, e))?;

        Ok(creation
            .and_then(quicktime_to_date)
            .map(DateInfo::from_date))
    }
}

/// Read the `DateTimeOriginal` EXIF tag from an image file.
///
/// Returns `Ok(Some(value))` if the tag is present, `Ok(None)` if the file
/// has no EXIF data or the tag is missing, and `Err` only on I/O failure.
fn get_photo_exif(path: &Path) -> Result<Option<String>, SortError> {
    let file = File::open(path).map_err(|e| SortError::metadata(path, e))?;
    let mut bufreader = BufReader::new(&file);
    let exif_reader = exif::Reader::new();

    match exif_reader.read_from_container(&mut bufreader) {
        Ok(exif_data) => {
            let value = exif_data
                .get_field(exif::Tag::DateTimeOriginal, exif::In::PRIMARY)
                .and_then(|field| match &field.value {
                    exif::Value::Ascii(parts) => parts.first(),
                    _ => None,
                })
                .map(|raw| String::from_utf8_lossy(raw).into_owned());
            Ok(value)
        }
        Err(exif::Error::Io(e)) => Err(SortError::metadata(path, e)),
        Err(e) => {
            tracing::debug!("No EXIF data in {}: {}", path.display(), e);
            Ok(None)
        }
    }
}

/// Parse an EXIF datetime such as `"2024:03:15 10:00:00"`.
fn parse_exif_datetime(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    NaiveDateTime::parse_from_str(trimmed, "%Y:%m:%d %H:%M:%S")
        .map(|dt| dt.date())
        .ok()
}

fn quicktime_to_date(seconds_since_1904: u64) -> Option<NaiveDate> {
    if seconds_since_1904 == 0 {
        return None;
    }
    let unix = seconds_since_1904.checked_sub(SECONDS_FROM_1904_TO_1970)?;
    let unix = i64::try_from(unix).ok()?;
    DateTime::from_timestamp(unix, 0).map(|dt| dt.date_naive())
}

struct BoxHeader {
    kind: [u8; 4],
    /// Offset of the first byte after the header.
    body_start: u64,
    /// Offset one past the last byte of the box, `None` when it runs to EOF.
    end: Option<u64>,
}

fn read_u32<R: Read>(reader: &mut R) -> std::io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

fn read_u64<R: Read>(reader: &mut R) -> std::io::Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_be_bytes(buf))
}

/// Read the next box header at the current position. `Ok(None)` on clean EOF.
fn next_box<R: Read + Seek>(reader: &mut R) -> std::io::Result<Option<BoxHeader>> {
    let start = reader.stream_position()?;
    let mut size_buf = [0u8; 4];
    match reader.read_exact(&mut size_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let size = u32::from_be_bytes(size_buf) as u64;
    let mut kind = [0u8; 4];
    reader.read_exact(&mut kind)?;

    let invalid = || {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("box {} has invalid size", String::from_utf8_lossy(&kind)),
        )
    };
    let (end, body_start) = match size {
        0 => (None, start.checked_add(8).ok_or_else(invalid)?),
        1 => {
            let large = read_u64(reader)?;
            (
                Some(start.checked_add(large).ok_or_else(invalid)?),
                start.checked_add(16).ok_or_else(invalid)?,
            )
        }
        n => (
            Some(start.checked_add(n).ok_or_else(invalid)?),
            start.checked_add(8).ok_or_else(invalid)?,
        ),
    };

    if end.is_some_and(|e| e < body_start) {
        return Err(invalid());
    }

    Ok(Some(BoxHeader {
        kind,
        body_start,
        end,
    }))
}

/// Find `moov/mvhd` and return its creation time (seconds since 1904).
///
/// A file without a `moov` box is an error: cameras commonly write it last,
/// so a missing box usually means the file is still being written.
fn read_mvhd_creation<R: Read + Seek>(reader: &mut R) -> std::io::Result<Option<u64>> {
    while let Some(header) = next_box(reader)? {
        if &header.kind == b"moov" {
            reader.seek(SeekFrom::Start(header.body_start))?;
            loop {
                if header
                    .end
                    .is_some_and(|end| reader.stream_position().is_ok_and(|p| p >= end))
                {
                    return Ok(None);
                }
                let Some(child) = next_box(reader)? else {
                    return Ok(None);
                };
                if &child.kind == b"mvhd" {
                    let version = {
                        let mut vf = [0u8; 4];
                        reader.read_exact(&mut vf)?;
                        vf[0]
                    };
                    let creation = if version == 1 {
                        read_u64(reader)?
                    } else {
                        read_u32(reader)? as u64
                    };
                    return Ok(Some(creation));
                }
                match child.end {
                    Some(end) => {
                        reader.seek(SeekFrom::Start(end))?;
                    }
                    None => return Ok(None),
                }
            }
        }

        match header.end {
            Some(end) => {
                reader.seek(SeekFrom::Start(end))?;
            }
            None => break,
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        "no moov box found",
    ))
}
