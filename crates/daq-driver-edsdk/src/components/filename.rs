//! Image file names
//!
//! The camera saves files as `<KIND>_<NNNN>.<EXT>` (e.g. `IMG_0042.JPG`,
//! `CAM1-9999.CR2`). Finalized images are renamed to
//! `{instrument}_{yyyyMMdd_hhmmss}_{kind}_{logical}.{ext}`.

use super::rollover::DEVICE_NUMBER_MODULUS;
use chrono::{DateTime, Utc};
use std::path::Path;
use thiserror::Error;

/// Fields recovered from a camera-assigned file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedImageName {
    /// Group label, e.g. `IMG` or `CAM1`.
    pub image_kind: String,
    /// Device frame counter.
    pub device_image_number: i64,
    /// Extension without the dot; may be empty.
    pub extension: String,
}

/// Why a file name could not be parsed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FilenameError {
    /// Path has no file name component.
    #[error("path has no file name")]
    MissingFileName,
    /// Fewer than two `_`/`-`/space separated parts.
    #[error("file name '{0}' has too few parts")]
    TooFewParts(String),
    /// Last part is not an integer.
    #[error("'{0}' is not an image number")]
    InvalidNumber(String),
    /// Number outside `1..=9999`.
    #[error("image number {0} is outside the device range")]
    OutOfRange(i64),
}

/// Split a downloaded file path into kind, device number and extension.
pub fn parse_image_path(path: &Path) -> Result<ParsedImageName, FilenameError> {
    let extension = path
        .extension()
        .map(|ext| ext.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .ok_or(FilenameError::MissingFileName)?;

    let parts: Vec<&str> = stem.split(['_', '-', ' ']).collect();
    let [.., kind, number] = parts.as_slice() else {
        return Err(FilenameError::TooFewParts(stem.clone()));
    };

    let device_image_number: i64 = number
        .trim()
        .parse()
        .map_err(|_| FilenameError::InvalidNumber((*number).to_string()))?;
    if !(1..=DEVICE_NUMBER_MODULUS).contains(&device_image_number) {
        return Err(FilenameError::OutOfRange(device_image_number));
    }

    Ok(ParsedImageName {
        image_kind: (*kind).to_string(),
        device_image_number,
        extension,
    })
}

/// Format a UTC capture time (Unix seconds) as `yyyyMMdd_hhmmss`, truncated to
/// seconds. Hours are on the 12-hour clock with no AM/PM marker, so 13:05:09
/// and 01:05:09 format alike.
pub fn format_capture_time(utc_time: f64) -> String {
    let seconds = utc_time.floor() as i64;
    DateTime::<Utc>::from_timestamp(seconds, 0)
        .unwrap_or_default()
        .format("%Y%m%d_%I%M%S")
        .to_string()
}

/// Name a finalized image.
pub fn destination_file_name(
    instrument_id: &str,
    utc_time: f64,
    image_kind: &str,
    logical_image_number: i64,
    extension: &str,
) -> String {
    let base = format!(
        "{}_{}_{}_{}",
        instrument_id,
        format_capture_time(utc_time),
        image_kind,
        logical_image_number
    );
    if extension.is_empty() {
        base
    } else {
        format!("{base}.{extension}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_parse_standard_name() {
        let parsed = parse_image_path(&PathBuf::from("/tmp/out/IMG_0042.JPG")).unwrap();
        assert_eq!(parsed.image_kind, "IMG");
        assert_eq!(parsed.device_image_number, 42);
        assert_eq!(parsed.extension, "JPG");
    }

    #[test]
    fn test_parse_uses_last_two_parts() {
        let parsed = parse_image_path(&PathBuf::from("my photo CAM1-9999.CR2")).unwrap();
        assert_eq!(parsed.image_kind, "CAM1");
        assert_eq!(parsed.device_image_number, 9999);
        assert_eq!(parsed.extension, "CR2");
    }

    #[test]
    fn test_parse_failures() {
        assert_eq!(
            parse_image_path(&PathBuf::from("IMG0042.JPG")),
            Err(FilenameError::TooFewParts("IMG0042".into()))
        );
        assert_eq!(
            parse_image_path(&PathBuf::from("IMG_abcd.JPG")),
            Err(FilenameError::InvalidNumber("abcd".into()))
        );
        assert_eq!(
            parse_image_path(&PathBuf::from("IMG_0000.JPG")),
            Err(FilenameError::OutOfRange(0))
        );
    }

    #[test]
    fn test_destination_name() {
        // 2016-03-01 13:05:09 UTC
        let name = destination_file_name("inst7", 1_456_837_509.75, "IMG", 10_001, "JPG");
        assert_eq!(name, "inst7_20160301_010509_IMG_10001.JPG");
        assert_eq!(
            destination_file_name("inst7", 0.0, "IMG", 3, ""),
            "inst7_19700101_120000_IMG_3"
        );
        // Afternoon and morning share a stamp.
        assert_eq!(
            format_capture_time(1_456_837_509.0),
            format_capture_time(1_456_837_509.0 - 12.0 * 3600.0)
        );
    }
}
