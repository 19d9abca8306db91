//! Class, confidence, size and region-of-interest gating for raw detections

use crate::config::FilterConfig;
use crate::types::{Detection, FilteredDetection, FrameShape};

/// Why a detection was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    IgnoredClass,
    NotWhitelisted,
    LowConfidence,
    TooSmall,
    OutsideCorridor,
    TooHigh,
}

/// Stateless detection filter
pub struct DetectionFilter {
    config: FilterConfig,
}

impl DetectionFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Keep the detections that pass every gate, preserving input order
    pub fn filter(&self, detections: &[Detection], frame: FrameShape) -> Vec<FilteredDetection> {
        let mut kept = Vec::with_capacity(detections.len());
        for detection in detections {
            match self.check(detection, frame) {
                Ok(()) => kept.push(FilteredDetection::accept(detection.clone())),
                Err(reason) => log::trace!(
                    "Rejected {} ({:.2}) at {}: {:?}",
                    detection.class_label,
                    detection.confidence,
                    detection.bbox,
                    reason
                ),
            }
        }
        kept
    }

    /// Run every gate against one detection
    pub fn check(&self, detection: &Detection, frame: FrameShape) -> Result<(), Rejection> {
        let cfg = &self.config;
        let label = detection.class_label.as_str();

        if cfg.ignored.contains(label) {
            return Err(Rejection::IgnoredClass);
        }
        if !cfg.whitelist.is_empty() && !cfg.whitelist.contains(label) {
            return Err(Rejection::NotWhitelisted);
        }
        if detection.confidence < cfg.min_confidence {
            return Err(Rejection::LowConfidence);
        }

        let bbox = &detection.bbox;
        if bbox.height() < cfg.min_bbox_height_px || bbox.area() < cfg.min_bbox_area_px {
            return Err(Rejection::TooSmall);
        }

        // Degenerate frame shapes reject everything rather than divide by zero
        if frame.width == 0 || frame.height == 0 {
            return Err(Rejection::OutsideCorridor);
        }
        let x_frac = bbox.center_x() / frame.width as f32;
        let (roi_min, roi_max) = cfg.roi_x_range;
        if x_frac < roi_min || x_frac > roi_max {
            return Err(Rejection::OutsideCorridor);
        }
        if bbox.bottom() / (frame.height as f32) < cfg.roi_min_bottom_ratio {
            return Err(Rejection::TooHigh);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hazardtrack::Bbox;

    const FRAME: FrameShape = FrameShape {
        width: 1280,
        height: 720,
    };

    fn filter() -> DetectionFilter {
        DetectionFilter::new(FilterConfig::default())
    }

    // 60x80 box centered horizontally, bottom edge at 600/720
    fn cow(confidence: f32) -> Detection {
        Detection::new(Bbox::new(610.0, 520.0, 670.0, 600.0), "cow", confidence)
    }

    #[test]
    fn test_accepts_centered_hazard() {
        let kept = filter().filter(&[cow(0.9)], FRAME);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].class_label, "cow");
    }

    #[test]
    fn test_unlisted_class_rejected_at_any_confidence() {
        let mut det = cow(1.0);
        det.class_label = "giraffe".to_string();
        assert_eq!(filter().check(&det, FRAME), Err(Rejection::NotWhitelisted));
    }

    #[test]
    fn test_ignored_class_rejected() {
        let mut det = cow(0.99);
        det.class_label = "boat".to_string();
        assert_eq!(filter().check(&det, FRAME), Err(Rejection::IgnoredClass));
    }

    #[test]
    fn test_confidence_gate() {
        assert_eq!(filter().check(&cow(0.39), FRAME), Err(Rejection::LowConfidence));
        assert!(filter().check(&cow(0.40), FRAME).is_ok());
    }

    #[test]
    fn test_size_gates() {
        // 40 wide x 25 tall: below min height
        let short = Detection::new(Bbox::new(620.0, 575.0, 660.0, 600.0), "cow", 0.9);
        assert_eq!(filter().check(&short, FRAME), Err(Rejection::TooSmall));
        // 20 wide x 40 tall: 800 px² is below min area
        let thin = Detection::new(Bbox::new(630.0, 560.0, 650.0, 600.0), "cow", 0.9);
        assert_eq!(filter().check(&thin, FRAME), Err(Rejection::TooSmall));
    }

    #[test]
    fn test_corridor_gate() {
        let left = Detection::new(Bbox::new(50.0, 520.0, 110.0, 600.0), "cow", 0.9);
        assert_eq!(filter().check(&left, FRAME), Err(Rejection::OutsideCorridor));
        let right = Detection::new(Bbox::new(1100.0, 520.0, 1160.0, 600.0), "cow", 0.9);
        assert_eq!(filter().check(&right, FRAME), Err(Rejection::OutsideCorridor));
    }

    #[test]
    fn test_high_in_frame_rejected() {
        // Bottom edge at 200/720 is above the 0.40 line
        let sky = Detection::new(Bbox::new(610.0, 120.0, 670.0, 200.0), "cow", 0.9);
        assert_eq!(filter().check(&sky, FRAME), Err(Rejection::TooHigh));
    }

    #[test]
    fn test_empty_whitelist_accepts_unignored_labels() {
        let mut config = FilterConfig::default();
        config.whitelist.clear();
        let filter = DetectionFilter::new(config);
        let mut det = cow(0.9);
        det.class_label = "giraffe".to_string();
        assert!(filter.check(&det, FRAME).is_ok());
        det.class_label = "chair".to_string();
        assert_eq!(filter.check(&det, FRAME), Err(Rejection::IgnoredClass));
    }

    #[test]
    fn test_preserves_order() {
        let mut dog = cow(0.8);
        dog.class_label = "dog".to_string();
        let kept = filter().filter(&[cow(0.9), cow(0.1), dog], FRAME);
        let labels: Vec<_> = kept.iter().map(|d| d.class_label.as_str()).collect();
        assert_eq!(labels, ["cow", "dog"]);
    }
}
