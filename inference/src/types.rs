//! Type definitions for the hazard decision pipeline

use hazardtrack::{Bbox, Confirmed, Observation};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric class reported by a detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetClass {
    Class(u32),
}

impl TargetClass {
    /// COCO class names (80 classes)
    const COCO_CLASSES: &'static [&'static str] = &[
        "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck",
        "boat", "traffic light", "fire hydrant", "stop sign", "parking meter", "bench",
        "bird", "cat", "dog", "horse", "sheep", "cow", "elephant", "bear", "zebra",
        "giraffe", "backpack", "umbrella", "handbag", "tie", "suitcase", "frisbee", "skis",
        "snowboard", "sports ball", "kite", "baseball bat", "baseball glove", "skateboard",
        "surfboard", "tennis racket", "bottle", "wine glass", "cup", "fork", "knife",
        "spoon", "bowl", "banana", "apple", "sandwich", "orange", "broccoli", "carrot",
        "hot dog", "pizza", "donut", "cake", "chair", "couch", "potted plant", "bed",
        "dining table", "toilet", "tv", "laptop", "mouse", "remote", "keyboard",
        "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator", "book",
        "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
    ];

    /// Lower-case COCO name, or `class_N` outside the table
    pub fn name(&self) -> String {
        match self {
            Self::Class(id) => Self::COCO_CLASSES
                .get(*id as usize)
                .map(|name| name.to_string())
                .unwrap_or_else(|| format!("class_{}", id)),
        }
    }
}

/// Detection as returned by a detector, box in detector-input pixels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    pub class: TargetClass,
    pub confidence: f32,
    pub bbox: Bbox<f32>,
}

impl RawDetection {
    pub fn new(class: TargetClass, confidence: f32, bbox: Bbox<f32>) -> Self {
        Self {
            class,
            confidence,
            bbox,
        }
    }

    /// Rescale into original frame pixels and attach a label
    pub fn into_frame_space(self, input_size: (u32, u32), frame: FrameShape, label: String) -> Detection {
        let scale_x = frame.width as f32 / input_size.0.max(1) as f32;
        let scale_y = frame.height as f32 / input_size.1.max(1) as f32;
        Detection {
            bbox: self.bbox.scaled(scale_x, scale_y),
            class_label: label,
            confidence: self.confidence,
        }
    }
}

/// Per-frame detection in original frame pixels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: Bbox<f32>,
    pub class_label: String,
    pub confidence: f32,
}

impl Detection {
    pub fn new<S: Into<String>>(bbox: Bbox<f32>, class_label: S, confidence: f32) -> Self {
        Self {
            bbox,
            class_label: class_label.into(),
            confidence,
        }
    }
}

/// A detection that passed every filter gate. Only `DetectionFilter` builds these.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilteredDetection {
    pub bbox: Bbox<f32>,
    pub class_label: String,
    pub confidence: f32,
}

impl FilteredDetection {
    pub(crate) fn accept(detection: Detection) -> Self {
        Self {
            bbox: detection.bbox,
            class_label: detection.class_label,
            confidence: detection.confidence,
        }
    }
}

impl Observation for FilteredDetection {
    fn class_label(&self) -> &str {
        &self.class_label
    }

    fn bbox(&self) -> &Bbox<f32> {
        &self.bbox
    }
}

/// Filtered detection whose track reached the persistence threshold
pub type ConfirmedDetection = Confirmed<FilteredDetection>;

/// Braking decision, ordered by severity
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    #[default]
    Clear,
    Caution,
    SlowDown,
    BrakeEmergency,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clear => "CLEAR",
            Self::Caution => "CAUTION",
            Self::SlowDown => "SLOW_DOWN",
            Self::BrakeEmergency => "BRAKE_EMERGENCY",
        }
    }

    pub fn all() -> [Self; 4] {
        [Self::Clear, Self::Caution, Self::SlowDown, Self::BrakeEmergency]
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert severity attached to non-clear frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertLevel {
    Warning,
    Critical,
}

impl AlertLevel {
    pub fn for_decision(decision: Decision) -> Option<Self> {
        match decision {
            Decision::Clear => None,
            Decision::Caution | Decision::SlowDown => Some(Self::Warning),
            Decision::BrakeEmergency => Some(Self::Critical),
        }
    }
}

/// Risk estimate for one confirmed detection in one frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub distance_m: f32,
    pub ttc_s: f32,
    pub risk_score: f32,
    pub decision: Decision,
}

/// Confirmed detection joined with its assessment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssessedDetection {
    pub bbox: Bbox<f32>,
    pub class_label: String,
    pub confidence: f32,
    pub observation_count: u32,
    #[serde(flatten)]
    pub assessment: RiskAssessment,
}

impl AssessedDetection {
    pub fn new(confirmed: ConfirmedDetection, assessment: RiskAssessment) -> Self {
        Self {
            bbox: confirmed.item.bbox,
            class_label: confirmed.item.class_label,
            confidence: confirmed.item.confidence,
            observation_count: confirmed.observation_count,
            assessment,
        }
    }
}

/// Latitude/longitude pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// Frame dimensions in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameShape {
    pub width: u32,
    pub height: u32,
}

impl FrameShape {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Pixel format of frame payloads
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ImageFormat {
    RGB,
    BGR,
    RGBA,
    BGRA,
    Grayscale,
}

/// Decoded pixel data handed to the detector untouched
#[derive(Debug, Clone)]
pub struct ImageData {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
}

impl ImageData {
    pub fn new(data: Vec<u8>, width: u32, height: u32, format: ImageFormat) -> Self {
        Self {
            data,
            width,
            height,
            format,
        }
    }

    /// Shape-only image with no pixel payload, for detectors that ignore pixels
    pub fn placeholder(width: u32, height: u32) -> Self {
        Self::new(Vec::new(), width, height, ImageFormat::RGB)
    }

    pub fn channels(&self) -> u32 {
        match self.format {
            ImageFormat::RGB | ImageFormat::BGR => 3,
            ImageFormat::RGBA | ImageFormat::BGRA => 4,
            ImageFormat::Grayscale => 1,
        }
    }

    pub fn shape(&self) -> FrameShape {
        FrameShape::new(self.width, self.height)
    }

    /// Payload length implied by dimensions and format, `None` on overflow
    pub fn expected_len(&self) -> Option<usize> {
        (self.width as usize)
            .checked_mul(self.height as usize)?
            .checked_mul(self.channels() as usize)
    }

    /// Payload length matches dimensions (placeholders are valid too)
    pub fn validate(&self) -> bool {
        self.data.is_empty() || Some(self.data.len()) == self.expected_len()
    }
}

/// One frame from a frame source
#[derive(Debug, Clone)]
pub struct Frame {
    /// Strictly increasing per source
    pub frame_number: u64,
    pub timestamp_s: f64,
    pub image: ImageData,
}

impl Frame {
    pub fn new(frame_number: u64, timestamp_s: f64, image: ImageData) -> Self {
        Self {
            frame_number,
            timestamp_s,
            image,
        }
    }

    pub fn shape(&self) -> FrameShape {
        self.image.shape()
    }
}

/// Everything the pipeline decided about one processed frame
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameResult {
    pub frame_number: u64,
    pub timestamp_s: f64,
    pub detections: Vec<AssessedDetection>,
    pub overall_risk_score: f32,
    pub overall_decision: Decision,
    pub speed_kmph: f32,
    pub location: GeoPoint,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_level: Option<AlertLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_percent: Option<f32>,
}

impl FrameResult {
    pub fn is_alert(&self) -> bool {
        self.overall_decision != Decision::Clear
    }
}
