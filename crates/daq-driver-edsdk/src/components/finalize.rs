//! Image finalization
//!
//! Renames a matched image into the output directory under its logical name
//! and hands the result downstream.

use super::filename::destination_file_name;
use super::sequencing::ReceivedImage;
use daq_core::AppResult;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// A finalized image, as handed to the downstream data handler.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapturedImage {
    /// UTC capture time (Unix seconds).
    pub utc_time: f64,
    /// Monotonic capture time (seconds).
    pub sys_time: f64,
    /// Renamed file name (no directory).
    pub file_name: String,
    /// Full path of the renamed file.
    #[serde(skip)]
    pub path: PathBuf,
    /// Camera frame counter.
    pub device_image_number: i64,
    /// Unwrapped sequence number.
    pub logical_image_number: i64,
}

/// Downstream collaborator receiving finalized images and diagnostics.
pub trait ImageSink: Send + Sync {
    /// Called exactly once per logical image.
    fn emit_image(&self, image: &CapturedImage);

    /// Human-readable status or problem text.
    fn report_diagnostic(&self, message: &str);
}

/// Moves received images to their final names.
#[derive(Debug, Clone)]
pub struct ImageFinalizer {
    instrument_id: String,
}

impl ImageFinalizer {
    /// Finalizer naming files after `instrument_id`.
    pub fn new(instrument_id: impl Into<String>) -> Self {
        Self {
            instrument_id: instrument_id.into(),
        }
    }

    /// Rename `image` into `output_dir`, replacing any file with the same name.
    pub fn finalize(&self, image: &ReceivedImage, output_dir: &Path) -> AppResult<CapturedImage> {
        let file_name = destination_file_name(
            &self.instrument_id,
            image.trigger.utc_time,
            &image.image_kind,
            image.logical_image_number,
            &image.extension,
        );
        let destination = output_dir.join(&file_name);

        if destination.exists() {
            fs::remove_file(&destination)?;
        }
        move_file(&image.source_path, &destination)?;

        tracing::debug!(
            logical = image.logical_image_number,
            device_number = image.device_image_number,
            "Finalized {}",
            file_name
        );

        Ok(CapturedImage {
            utc_time: image.trigger.utc_time,
            sys_time: image.trigger.sys_time,
            file_name,
            path: destination,
            device_image_number: image.device_image_number,
            logical_image_number: image.logical_image_number,
        })
    }
}

/// `rename`, falling back to copy + remove across filesystems.
fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            if !from.exists() {
                return Err(rename_err);
            }
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
    }
}
