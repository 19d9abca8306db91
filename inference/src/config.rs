//! Pipeline configuration
//!
//! One immutable [`PipelineConfig`] is built (or loaded from JSON) before a
//! pipeline is constructed. Every section falls back to field defaults, so a
//! config file only needs the values it overrides.

use crate::error::{Result, TrackGuardError};
use hazardtrack::PersistenceParams;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

/// Detection filter gates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub min_confidence: f32,
    pub min_bbox_height_px: f32,
    pub min_bbox_area_px: f32,
    /// Accepted range for the box center x as a fraction of frame width
    pub roi_x_range: (f32, f32),
    /// Box bottom edge must be at or below this fraction of frame height
    pub roi_min_bottom_ratio: f32,
    /// Only these labels are eligible. Empty means every label not ignored.
    pub whitelist: BTreeSet<String>,
    pub ignored: BTreeSet<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.40,
            min_bbox_height_px: 30.0,
            min_bbox_area_px: 1500.0,
            roi_x_range: (0.20, 0.80),
            roi_min_bottom_ratio: 0.40,
            whitelist: default_class_weights().into_keys().collect(),
            ignored: [
                "traffic light",
                "toothbrush",
                "surfboard",
                "snowboard",
                "boat",
                "banana",
                "bottle",
                "chair",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

/// Camera calibration and vehicle dynamics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KinematicsConfig {
    /// Pixel-height × meters constant for range estimation
    pub calibration_constant: f32,
    pub min_distance_m: f32,
    pub max_distance_m: f32,
    pub reaction_time_s: f32,
    pub deceleration_mps2: f32,
}

impl Default for KinematicsConfig {
    fn default() -> Self {
        Self {
            calibration_constant: 4200.0,
            min_distance_m: 2.0,
            max_distance_m: 300.0,
            reaction_time_s: 1.0,
            deceleration_mps2: 1.2,
        }
    }
}

/// Decision thresholds, evaluated top-down from most severe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    /// BRAKE_EMERGENCY when distance <= ratio × stopping distance
    pub emergency_stop_ratio: f32,
    /// BRAKE_EMERGENCY when TTC <= this
    pub emergency_ttc_s: f32,
    /// SLOW_DOWN when distance <= ratio × stopping distance
    pub slow_down_stop_ratio: f32,
    /// CAUTION when distance <= this
    pub warning_distance_m: f32,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            emergency_stop_ratio: 0.8,
            emergency_ttc_s: 5.0,
            slow_down_stop_ratio: 1.5,
            warning_distance_m: 150.0,
        }
    }
}

/// Risk score weighting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub class_weights: BTreeMap<String, f32>,
    /// Weight for labels missing from `class_weights`
    pub default_class_weight: f32,
    /// Range at which the distance factor reaches zero
    pub distance_horizon_m: f32,
    /// Speed at which the speed factor saturates
    pub max_speed_kmph: f32,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            class_weights: default_class_weights(),
            default_class_weight: 1.0,
            distance_horizon_m: 500.0,
            max_speed_kmph: 200.0,
        }
    }
}

impl RiskConfig {
    pub fn weight_for(&self, class_label: &str) -> f32 {
        self.class_weights
            .get(class_label)
            .copied()
            .unwrap_or(self.default_class_weight)
    }
}

/// Frame stride and detector batching
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchingConfig {
    /// Run detection on frames whose number is a multiple of this
    pub frame_skip: u64,
    /// Frames per detector call
    pub batch_size: usize,
    /// A batch not answered this long after submission counts as failed
    pub detector_timeout_ms: u64,
}

impl BatchingConfig {
    pub fn detector_timeout(&self) -> Duration {
        Duration::from_millis(self.detector_timeout_ms)
    }
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            frame_skip: 2,
            batch_size: 6,
            detector_timeout_ms: 5000,
        }
    }
}

/// Subscriber fan-out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FanoutConfig {
    /// Queue depth for channel subscribers created through the registry
    pub subscriber_queue_depth: usize,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            subscriber_queue_depth: 64,
        }
    }
}

/// Alert log behaviour
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Directory used to build crop references; `None` leaves them null
    pub crop_dir: Option<String>,
}

/// Complete, immutable pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub filter: FilterConfig,
    pub kinematics: KinematicsConfig,
    pub decision: DecisionConfig,
    pub risk: RiskConfig,
    pub tracking: PersistenceParams,
    pub batching: BatchingConfig,
    pub fanout: FanoutConfig,
    pub alerts: AlertConfig,
    /// Measured or simulated vehicle speed
    pub speed_kmph: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            filter: FilterConfig::default(),
            kinematics: KinematicsConfig::default(),
            decision: DecisionConfig::default(),
            risk: RiskConfig::default(),
            tracking: PersistenceParams::default(),
            batching: BatchingConfig::default(),
            fanout: FanoutConfig::default(),
            alerts: AlertConfig::default(),
            speed_kmph: 80.0,
        }
    }
}

impl PipelineConfig {
    /// Load and validate a JSON config file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_json(&contents)?;
        log::info!("Configuration loaded from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let filter = &self.filter;
        let (roi_min, roi_max) = filter.roi_x_range;
        if !(0.0..=1.0).contains(&roi_min) || !(0.0..=1.0).contains(&roi_max) || roi_min > roi_max {
            return Err(TrackGuardError::config(format!(
                "roi_x_range must be an ordered pair within [0, 1], got ({}, {})",
                roi_min, roi_max
            )));
        }
        if !(0.0..=1.0).contains(&filter.roi_min_bottom_ratio) {
            return Err(TrackGuardError::config("roi_min_bottom_ratio must be within [0, 1]"));
        }
        if !(0.0..=1.0).contains(&filter.min_confidence) {
            return Err(TrackGuardError::config("min_confidence must be within [0, 1]"));
        }

        let kin = &self.kinematics;
        if kin.calibration_constant <= 0.0 {
            return Err(TrackGuardError::config("calibration_constant must be positive"));
        }
        if kin.min_distance_m < 0.0 || kin.min_distance_m > kin.max_distance_m {
            return Err(TrackGuardError::config(format!(
                "distance caps must satisfy 0 <= min <= max, got [{}, {}]",
                kin.min_distance_m, kin.max_distance_m
            )));
        }
        if kin.deceleration_mps2 <= 0.0 {
            return Err(TrackGuardError::config("deceleration_mps2 must be positive"));
        }
        if kin.reaction_time_s < 0.0 {
            return Err(TrackGuardError::config("reaction_time_s must not be negative"));
        }

        if self.risk.distance_horizon_m <= 0.0 || self.risk.max_speed_kmph <= 0.0 {
            return Err(TrackGuardError::config(
                "distance_horizon_m and max_speed_kmph must be positive",
            ));
        }

        if self.tracking.grid_cell_px <= 0.0 {
            return Err(TrackGuardError::config("grid_cell_px must be positive"));
        }
        if self.tracking.persistence_threshold == 0 {
            return Err(TrackGuardError::config("persistence_threshold must be at least 1"));
        }

        if self.batching.frame_skip == 0 {
            return Err(TrackGuardError::config("frame_skip must be at least 1"));
        }
        if self.batching.batch_size == 0 {
            return Err(TrackGuardError::config("batch_size must be at least 1"));
        }
        if self.batching.detector_timeout_ms == 0 {
            return Err(TrackGuardError::config("detector_timeout_ms must be at least 1"));
        }
        if self.fanout.subscriber_queue_depth == 0 {
            return Err(TrackGuardError::config("subscriber_queue_depth must be at least 1"));
        }

        if self.speed_kmph < 0.0 || !self.speed_kmph.is_finite() {
            return Err(TrackGuardError::config("speed_kmph must be a finite, non-negative value"));
        }

        Ok(())
    }
}

fn default_class_weights() -> BTreeMap<String, f32> {
    [
        ("person", 1.0),
        ("car", 0.9),
        ("truck", 1.1),
        ("motorcycle", 0.95),
        ("bicycle", 0.95),
        ("cow", 1.2),
        ("buffalo", 1.2),
        ("dog", 1.1),
        ("sheep", 1.15),
        ("goat", 1.15),
        ("elephant", 1.3),
        ("train", 2.0),
        ("animal", 1.3),
    ]
    .into_iter()
    .map(|(label, weight)| (label.to_string(), weight))
    .collect()
}
