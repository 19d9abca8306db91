/// Interface to the external object detector
///
/// The pipeline treats detection as a black box: a batch of images goes in,
/// one ordered list of raw detections per image comes out. Any model backend
/// (or a mock) can drive the pipeline as long as it implements this trait.
use crate::error::Result;
use crate::types::{ImageData, RawDetection, TargetClass};

/// Common interface for object detectors
pub trait Detector: Send {
    /// Detect objects in a batch of images.
    ///
    /// Must return exactly one result list per input image, in input order.
    /// Boxes are in detector-input pixel space (see [`Detector::input_size`]).
    fn detect_batch(&mut self, images: &[ImageData]) -> Result<Vec<Vec<RawDetection>>>;

    /// Get the detector name (for logging/debugging)
    fn name(&self) -> &str;

    /// Resolution the detector reports boxes in
    fn input_size(&self) -> (u32, u32);

    /// Label for a numeric class id
    fn class_name(&self, class: TargetClass) -> String {
        class.name()
    }
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn detect_batch(&mut self, images: &[ImageData]) -> Result<Vec<Vec<RawDetection>>> {
        (**self).detect_batch(images)
    }

    fn name(&self) -> &str {
        (**self).name()
    }

    fn input_size(&self) -> (u32, u32) {
        (**self).input_size()
    }

    fn class_name(&self, class: TargetClass) -> String {
        (**self).class_name(class)
    }
}
