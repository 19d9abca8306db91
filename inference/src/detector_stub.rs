//! Stand-in detectors
//!
//! `MockDetector` emits seeded random boxes for demos and load tests.
//! `ScriptedDetector` replays a fixed script and can be told to fail, stall
//! or panic on chosen batches, which makes pipeline behaviour reproducible
//! in tests.

use crate::detector_trait::Detector;
use crate::error::{Result, TrackGuardError};
use crate::types::{ImageData, RawDetection, TargetClass};
use hazardtrack::Bbox;
use rand::prelude::*;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

/// COCO ids of person, bicycle, car, truck, cow
const MOCK_CLASSES: [u32; 5] = [0, 1, 2, 7, 19];

/// Random detector: 0 to 3 boxes per image plus any pinned detections
pub struct MockDetector {
    rng: StdRng,
    input_size: (u32, u32),
    pinned: Vec<RawDetection>,
    latency: Option<Duration>,
}

impl MockDetector {
    pub fn new(seed: u64) -> Self {
        log::info!("Creating mock detector (seed {})", seed);
        Self {
            rng: StdRng::seed_from_u64(seed),
            input_size: (640, 640),
            pinned: Vec::new(),
            latency: None,
        }
    }

    /// Zero sizes are raised to 1 px
    pub fn with_input_size(mut self, width: u32, height: u32) -> Self {
        self.input_size = (width.max(1), height.max(1));
        self
    }

    /// Emit this detection in every image, so it survives temporal confirmation
    pub fn with_pinned(mut self, detection: RawDetection) -> Self {
        self.pinned.push(detection);
        self
    }

    /// Sleep this long per batch to imitate model compute
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn random_detections(&mut self) -> Vec<RawDetection> {
        let (w, h) = (self.input_size.0 as f32, self.input_size.1 as f32);
        let count = self.rng.gen_range(0..=3);
        let mut detections = Vec::with_capacity(count + self.pinned.len());

        for _ in 0..count {
            let box_w = self.rng.gen_range(0.08_f32..0.25) * w;
            let box_h = self.rng.gen_range(0.08_f32..0.25) * h;
            let x1 = self.rng.gen_range(0.0_f32..(w - box_w));
            let y1 = self.rng.gen_range(0.0_f32..(h - box_h));
            let class = MOCK_CLASSES[self.rng.gen_range(0..MOCK_CLASSES.len())];
            detections.push(RawDetection::new(
                TargetClass::Class(class),
                self.rng.gen_range(0.5_f32..0.95),
                Bbox::new(x1, y1, x1 + box_w, y1 + box_h),
            ));
        }
        detections.extend(self.pinned.iter().cloned());
        detections
    }
}

impl Detector for MockDetector {
    fn detect_batch(&mut self, images: &[ImageData]) -> Result<Vec<Vec<RawDetection>>> {
        if let Some(latency) = self.latency {
            std::thread::sleep(latency);
        }
        Ok(images.iter().map(|_| self.random_detections()).collect())
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn input_size(&self) -> (u32, u32) {
        self.input_size
    }
}

/// Replays per-image detections in call order
pub struct ScriptedDetector {
    script: VecDeque<Vec<RawDetection>>,
    repeat_last: bool,
    failing_batches: HashSet<usize>,
    stalled_batches: HashMap<usize, Duration>,
    panicking_batches: HashSet<usize>,
    input_size: (u32, u32),
    calls: usize,
}

impl ScriptedDetector {
    /// One entry per image the detector will see; images past the end get
    /// no detections
    pub fn new(script: Vec<Vec<RawDetection>>) -> Self {
        Self {
            script: script.into(),
            repeat_last: false,
            failing_batches: HashSet::new(),
            stalled_batches: HashMap::new(),
            panicking_batches: HashSet::new(),
            input_size: (640, 640),
            calls: 0,
        }
    }

    /// Keep returning the final script entry once the script runs out
    pub fn repeating(detections: Vec<RawDetection>) -> Self {
        let mut detector = Self::new(vec![detections]);
        detector.repeat_last = true;
        detector
    }

    pub fn with_input_size(mut self, width: u32, height: u32) -> Self {
        self.input_size = (width.max(1), height.max(1));
        self
    }

    /// Fail the batch call with this 0-based index. Script entries for a
    /// failed batch are not consumed.
    pub fn fail_batch(mut self, batch_index: usize) -> Self {
        self.failing_batches.insert(batch_index);
        self
    }

    /// Sleep for `delay` before answering the batch with this index
    pub fn stall_batch(mut self, batch_index: usize, delay: Duration) -> Self {
        self.stalled_batches.insert(batch_index, delay);
        self
    }

    /// Panic inside the batch call with this index
    pub fn panic_batch(mut self, batch_index: usize) -> Self {
        self.panicking_batches.insert(batch_index);
        self
    }

    /// Number of `detect_batch` calls so far
    pub fn calls(&self) -> usize {
        self.calls
    }

    fn next_entry(&mut self) -> Vec<RawDetection> {
        if self.repeat_last && self.script.len() == 1 {
            return self.script.front().cloned().unwrap_or_default();
        }
        self.script.pop_front().unwrap_or_default()
    }
}

impl Detector for ScriptedDetector {
    fn detect_batch(&mut self, images: &[ImageData]) -> Result<Vec<Vec<RawDetection>>> {
        let call = self.calls;
        self.calls += 1;
        if let Some(delay) = self.stalled_batches.get(&call) {
            std::thread::sleep(*delay);
        }
        if self.panicking_batches.contains(&call) {
            panic!("scripted panic on batch {}", call);
        }
        if self.failing_batches.contains(&call) {
            return Err(TrackGuardError::detector(format!(
                "scripted failure on batch {}",
                call
            )));
        }
        Ok(images.iter().map(|_| self.next_entry()).collect())
    }

    fn name(&self) -> &str {
        "scripted"
    }

    fn input_size(&self) -> (u32, u32) {
        self.input_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn images(n: usize) -> Vec<ImageData> {
        (0..n).map(|_| ImageData::placeholder(1280, 720)).collect()
    }

    #[test]
    fn test_mock_is_deterministic_per_seed() {
        let mut a = MockDetector::new(42);
        let mut b = MockDetector::new(42);
        assert_eq!(a.detect_batch(&images(8)).unwrap(), b.detect_batch(&images(8)).unwrap());
    }

    #[test]
    fn test_mock_boxes_stay_in_input_space() {
        let mut detector = MockDetector::new(3);
        for per_image in detector.detect_batch(&images(50)).unwrap() {
            assert!(per_image.len() <= 3);
            for det in per_image {
                assert!(det.bbox.is_valid());
                assert!(det.bbox.xmax <= 640.0 && det.bbox.ymax <= 640.0);
                assert!((0.5..0.95).contains(&det.confidence));
            }
        }
    }

    #[test]
    fn test_mock_zero_input_size_is_clamped() {
        let mut detector = MockDetector::new(9).with_input_size(0, 0);
        assert_eq!(detector.input_size(), (1, 1));
        for per_image in detector.detect_batch(&images(20)).unwrap() {
            for det in per_image {
                assert!(det.bbox.xmax <= 1.0 && det.bbox.ymax <= 1.0);
            }
        }
    }

    #[test]
    fn test_mock_pinned_always_present() {
        let pinned = RawDetection::new(TargetClass::Class(19), 0.9, Bbox::new(300.0, 400.0, 340.0, 460.0));
        let mut detector = MockDetector::new(1).with_pinned(pinned.clone());
        for per_image in detector.detect_batch(&images(10)).unwrap() {
            assert!(per_image.contains(&pinned));
        }
    }

    #[test]
    fn test_scripted_replays_in_order() {
        let cow = RawDetection::new(TargetClass::Class(19), 0.9, Bbox::new(0.0, 0.0, 10.0, 10.0));
        let mut detector = ScriptedDetector::new(vec![vec![cow.clone()], vec![], vec![cow.clone(), cow.clone()]]);
        let out = detector.detect_batch(&images(2)).unwrap();
        assert_eq!(out, vec![vec![cow.clone()], vec![]]);
        let out = detector.detect_batch(&images(2)).unwrap();
        assert_eq!(out, vec![vec![cow.clone(), cow], vec![]]);
        assert_eq!(detector.calls(), 2);
    }

    #[test]
    fn test_scripted_failure_does_not_consume_script() {
        let cow = RawDetection::new(TargetClass::Class(19), 0.9, Bbox::new(0.0, 0.0, 10.0, 10.0));
        let mut detector = ScriptedDetector::new(vec![vec![cow.clone()]]).fail_batch(0);
        assert!(matches!(
            detector.detect_batch(&images(1)),
            Err(TrackGuardError::Detector(_))
        ));
        assert_eq!(detector.detect_batch(&images(1)).unwrap(), vec![vec![cow]]);
    }

    #[test]
    fn test_repeating_script() {
        let cow = RawDetection::new(TargetClass::Class(19), 0.9, Bbox::new(0.0, 0.0, 10.0, 10.0));
        let mut detector = ScriptedDetector::repeating(vec![cow.clone()]);
        let out = detector.detect_batch(&images(4)).unwrap();
        assert!(out.iter().all(|per_image| per_image == &vec![cow.clone()]));
    }
}
