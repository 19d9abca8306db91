//! Append-only alert log
//!
//! One [`AlertRecord`] is written per non-clear detection of a non-clear
//! frame. Numeric fields are rounded when the record is built so every sink
//! stores identical values.

use crate::error::{Result, TrackGuardError};
use crate::types::{AssessedDetection, Decision, GeoPoint};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub elapsed_s: f64,
    pub frame_number: u64,
    pub class_label: String,
    pub confidence: f32,
    pub distance_m: f32,
    pub ttc_s: f32,
    pub decision: Decision,
    pub risk_score: f32,
    pub lat: f64,
    pub lon: f64,
    pub crop_ref: Option<String>,
}

impl AlertRecord {
    pub fn new(
        elapsed_s: f64,
        frame_number: u64,
        detection: &AssessedDetection,
        location: GeoPoint,
        crop_ref: Option<String>,
    ) -> Self {
        let assessment = &detection.assessment;
        Self {
            elapsed_s: round_f64(elapsed_s, 2),
            frame_number,
            class_label: detection.class_label.clone(),
            confidence: round_f32(detection.confidence, 2),
            distance_m: round_f32(assessment.distance_m, 1),
            ttc_s: round_f32(assessment.ttc_s, 1),
            decision: assessment.decision,
            risk_score: round_f32(assessment.risk_score, 1),
            lat: location.lat,
            lon: location.lon,
            crop_ref,
        }
    }
}

fn round_f64(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

fn round_f32(value: f32, decimals: i32) -> f32 {
    round_f64(value as f64, decimals) as f32
}

/// Builds crop file references `{dir}/{frame}_{label}_{seq:06}.jpg`
#[derive(Debug, Clone)]
pub struct CropNamer {
    dir: PathBuf,
    seq: u64,
}

impl CropNamer {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into(), seq: 0 }
    }

    pub fn next(&mut self, frame_number: u64, class_label: &str) -> String {
        self.seq += 1;
        let label = class_label.replace(' ', "_");
        self.dir
            .join(format!("{}_{}_{:06}.jpg", frame_number, label, self.seq))
            .to_string_lossy()
            .into_owned()
    }
}

/// Destination for alert records
pub trait AlertSink: Send {
    fn append(&mut self, record: &AlertRecord) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// In-memory log; clones share the same records
#[derive(Debug, Clone, Default)]
pub struct MemoryAlertLog {
    records: Arc<Mutex<Vec<AlertRecord>>>,
}

impl MemoryAlertLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything appended so far
    pub fn records(&self) -> Vec<AlertRecord> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AlertSink for MemoryAlertLog {
    fn append(&mut self, record: &AlertRecord) -> Result<()> {
        self.records
            .lock()
            .map_err(|_| TrackGuardError::alert_log("alert log mutex poisoned"))?
            .push(record.clone());
        Ok(())
    }
}

/// One JSON object per line
pub struct JsonLinesAlertLog {
    path: PathBuf,
    writer: BufWriter<File>,
    written: u64,
}

impl JsonLinesAlertLog {
    /// Create or truncate the log file
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)
            .map_err(|e| TrackGuardError::alert_log(format!("cannot create {}: {}", path.display(), e)))?;
        log::info!("Writing alerts to {}", path.display());
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

impl AlertSink for JsonLinesAlertLog {
    fn append(&mut self, record: &AlertRecord) -> Result<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        log::debug!("Flushed {} alert(s) to {}", self.written, self.path.display());
        Ok(())
    }
}
