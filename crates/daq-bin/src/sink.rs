//! CSV data log for finalized images.

use anyhow::{Context, Result};
use daq_driver_edsdk::{CapturedImage, ImageSink};
use parking_lot::Mutex;
use serde::Serialize;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// One data-log row per finalized image.
#[derive(Debug, Serialize)]
struct DataRow<'a> {
    utc_time: f64,
    sys_time: f64,
    file_name: &'a str,
    device_image_number: i64,
}

/// Appends every emitted image to `<sensor_id>_<yyyyMMdd_HHmmss>.csv`.
pub struct CsvImageSink {
    path: PathBuf,
    writer: Mutex<csv::Writer<File>>,
}

impl CsvImageSink {
    /// Create the data log inside `dir`, creating the directory if needed.
    pub fn create(dir: &Path, sensor_id: &str) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("creating output directory {}", dir.display()))?;
        let file_name = format!(
            "{}_{}.csv",
            sensor_id,
            chrono::Utc::now().format("%Y%m%d_%H%M%S")
        );
        let path = dir.join(file_name);
        let writer = csv::Writer::from_path(&path)
            .with_context(|| format!("creating data log {}", path.display()))?;
        info!("CSV data log will be written to '{}'.", path.display());
        Ok(Self {
            path,
            writer: Mutex::new(writer),
        })
    }

    /// Location of the data log.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush buffered rows to disk.
    pub fn flush(&self) -> Result<()> {
        self.writer.lock().flush().context("flushing data log")
    }
}

impl ImageSink for CsvImageSink {
    fn emit_image(&self, image: &CapturedImage) {
        let row = DataRow {
            utc_time: image.utc_time,
            sys_time: image.sys_time,
            file_name: &image.file_name,
            device_image_number: image.device_image_number,
        };
        let mut writer = self.writer.lock();
        if let Err(e) = writer.serialize(&row).and_then(|()| writer.flush().map_err(Into::into)) {
            warn!("Could not write data row for {}: {}", image.file_name, e);
        }
    }

    fn report_diagnostic(&self, message: &str) {
        info!(target: "diagnostic", "{}", message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_are_appended_with_header() {
        let dir = tempfile::tempdir().unwrap();
        let sink = CsvImageSink::create(&dir.path().join("out"), "cam").unwrap();
        assert!(sink
            .path()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("cam_"));

        for n in 1..=2 {
            sink.emit_image(&CapturedImage {
                utc_time: 100.0 + n as f64,
                sys_time: n as f64,
                file_name: format!("inst_IMG_{}.JPG", n),
                path: dir.path().join(format!("inst_IMG_{}.JPG", n)),
                device_image_number: n,
                logical_image_number: n,
            });
        }
        sink.flush().unwrap();

        let contents = fs::read_to_string(sink.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(
            lines,
            vec![
                "utc_time,sys_time,file_name,device_image_number",
                "101.0,1.0,inst_IMG_1.JPG,1",
                "102.0,2.0,inst_IMG_2.JPG,2",
            ]
        );
    }
}
