//! Frame sources
//!
//! Decoding is out of scope for this crate, so sources hand over frames that
//! are already decoded. A source must yield strictly increasing frame numbers
//! and report end of stream as `Ok(None)`, never as an error.

use crate::error::{Result, TrackGuardError};
use crate::types::{Frame, ImageData};

/// Stream metadata known after opening
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceInfo {
    /// Total frame count, when the source knows it
    pub total_frames: Option<u64>,
    pub fps: f64,
}

pub trait FrameSource: Send {
    /// Prepare the stream. Errors here are fatal for the run.
    fn open(&mut self) -> Result<SourceInfo>;

    /// Next frame, or `None` at end of stream
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Release any underlying resource. Called once when the run ends.
    fn close(&mut self) {}
}

/// Replays frames held in memory
pub struct VecFrameSource {
    frames: std::vec::IntoIter<Frame>,
    total: u64,
    fps: f64,
    fail_open: Option<String>,
    fail_at: Option<u64>,
}

impl VecFrameSource {
    pub fn new(frames: Vec<Frame>, fps: f64) -> Self {
        Self {
            total: frames.len() as u64,
            frames: frames.into_iter(),
            fps,
            fail_open: None,
            fail_at: None,
        }
    }

    /// Make `open` fail with this message
    pub fn failing_open<S: Into<String>>(mut self, message: S) -> Self {
        self.fail_open = Some(message.into());
        self
    }

    /// Fail with a read error instead of yielding this frame number
    pub fn failing_at(mut self, frame_number: u64) -> Self {
        self.fail_at = Some(frame_number);
        self
    }
}

impl FrameSource for VecFrameSource {
    fn open(&mut self) -> Result<SourceInfo> {
        if let Some(message) = &self.fail_open {
            return Err(TrackGuardError::frame_source(message.clone()));
        }
        Ok(SourceInfo {
            total_frames: Some(self.total),
            fps: self.fps,
        })
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        match self.frames.next() {
            Some(frame) if Some(frame.frame_number) == self.fail_at => Err(TrackGuardError::frame_source(
                format!("read error at frame {}", frame.frame_number),
            )),
            other => Ok(other),
        }
    }
}

/// Generates placeholder frames numbered from 1 at a fixed rate
pub struct SyntheticFrameSource {
    width: u32,
    height: u32,
    fps: f64,
    total: Option<u64>,
    next_number: u64,
}

impl SyntheticFrameSource {
    pub fn new(width: u32, height: u32, fps: f64) -> Self {
        Self {
            width,
            height,
            fps,
            total: None,
            next_number: 1,
        }
    }

    /// Stop after this many frames; unbounded otherwise
    pub fn with_total(mut self, total: u64) -> Self {
        self.total = Some(total);
        self
    }
}

impl FrameSource for SyntheticFrameSource {
    fn open(&mut self) -> Result<SourceInfo> {
        if self.width == 0 || self.height == 0 || self.fps <= 0.0 {
            return Err(TrackGuardError::frame_source(format!(
                "invalid synthetic stream {}x{} @ {} fps",
                self.width, self.height, self.fps
            )));
        }
        self.next_number = 1;
        Ok(SourceInfo {
            total_frames: self.total,
            fps: self.fps,
        })
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if let Some(total) = self.total {
            if self.next_number > total {
                return Ok(None);
            }
        }
        let number = self.next_number;
        self.next_number += 1;
        let timestamp_s = (number - 1) as f64 / self.fps;
        Ok(Some(Frame::new(
            number,
            timestamp_s,
            ImageData::placeholder(self.width, self.height),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_numbers_and_timestamps() {
        let mut source = SyntheticFrameSource::new(1280, 720, 25.0).with_total(3);
        let info = source.open().unwrap();
        assert_eq!(info.total_frames, Some(3));

        let mut numbers = Vec::new();
        while let Some(frame) = source.next_frame().unwrap() {
            assert_eq!(frame.shape().width, 1280);
            numbers.push((frame.frame_number, frame.timestamp_s));
        }
        assert_eq!(numbers, vec![(1, 0.0), (2, 0.04), (3, 0.08)]);
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_synthetic_rejects_bad_shape() {
        let mut source = SyntheticFrameSource::new(0, 720, 25.0);
        assert!(matches!(source.open(), Err(TrackGuardError::FrameSource(_))));
    }

    #[test]
    fn test_vec_source_failures() {
        let frames = (1..=3)
            .map(|n| Frame::new(n, n as f64, ImageData::placeholder(10, 10)))
            .collect::<Vec<_>>();

        let mut broken = VecFrameSource::new(frames.clone(), 30.0).failing_open("no such file");
        assert!(broken.open().is_err());

        let mut source = VecFrameSource::new(frames, 30.0).failing_at(2);
        source.open().unwrap();
        assert!(source.next_frame().unwrap().is_some());
        assert!(source.next_frame().is_err());
    }
}
