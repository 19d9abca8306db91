//! Temporal confirmation of per-frame detections
//!
//! Detections are bucketed by class and by the grid cell containing their box
//! center. A bucket must be observed `persistence_threshold` times before its
//! detections are reported as confirmed, and a bucket that has not been seen
//! for more than `forget_window` frames is swept away.

use crate::bbox::Bbox;
use anyhow::bail;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Anything the store can accumulate: a class label plus a pixel-space box
pub trait Observation {
    fn class_label(&self) -> &str;
    fn bbox(&self) -> &Bbox<f32>;
}

/// Spatio-temporal identity of a track: class plus quantized box center
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackKey {
    pub class_label: String,
    pub cell_x: i32,
    pub cell_y: i32,
}

impl TrackKey {
    /// Quantize the box center onto a grid of `cell_px` pixel cells
    pub fn quantize(class_label: &str, bbox: &Bbox<f32>, cell_px: f32) -> Self {
        let (cx, cy) = bbox.center();
        Self {
            class_label: class_label.to_string(),
            cell_x: (cx / cell_px).floor() as i32,
            cell_y: (cy / cell_px).floor() as i32,
        }
    }
}

/// Accumulated observations for one key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrackState {
    pub observation_count: u32,
    pub last_seen_frame: u64,
}

/// Store tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceParams {
    /// Grid cell size used to quantize box centers (pixels)
    pub grid_cell_px: f32,
    /// Observations required before a detection is confirmed
    pub persistence_threshold: u32,
    /// Frames of absence after which a track is evicted
    pub forget_window: u64,
}

impl Default for PersistenceParams {
    fn default() -> Self {
        Self {
            grid_cell_px: 20.0,
            persistence_threshold: 3,
            forget_window: 12,
        }
    }
}

/// An observation whose track has reached the persistence threshold
#[derive(Debug, Clone, PartialEq)]
pub struct Confirmed<T> {
    pub item: T,
    pub key: TrackKey,
    pub observation_count: u32,
}

/// Owns every track. Callers must feed frames in non-decreasing order.
#[derive(Debug, Clone)]
pub struct TrackPersistenceStore {
    params: PersistenceParams,
    tracks: HashMap<TrackKey, TrackState>,
    current_frame: Option<u64>,
    n_evicted: u64,
}

impl TrackPersistenceStore {
    pub fn new(params: PersistenceParams) -> Self {
        Self {
            params,
            tracks: HashMap::new(),
            current_frame: None,
            n_evicted: 0,
        }
    }

    pub fn params(&self) -> &PersistenceParams {
        &self.params
    }

    /// Accumulate one frame of observations and return the confirmed ones.
    ///
    /// Stale tracks are swept before the frame is accumulated, so a key that
    /// reappears after the forget window starts counting from zero again.
    /// Two observations in the same frame that share a key both increment it.
    pub fn observe<T: Observation>(
        &mut self,
        frame_number: u64,
        observations: Vec<T>,
    ) -> anyhow::Result<Vec<Confirmed<T>>> {
        if let Some(current) = self.current_frame {
            if frame_number < current {
                bail!(
                    "frame {} observed after frame {}; frames must not go backwards",
                    frame_number,
                    current
                );
            }
        }
        self.current_frame = Some(frame_number);
        self.sweep(frame_number);

        let mut confirmed = Vec::new();
        for item in observations {
            let key = TrackKey::quantize(item.class_label(), item.bbox(), self.params.grid_cell_px);
            let state = self.tracks.entry(key.clone()).or_default();
            state.observation_count = state.observation_count.saturating_add(1);
            state.last_seen_frame = frame_number;

            if state.observation_count >= self.params.persistence_threshold {
                confirmed.push(Confirmed {
                    observation_count: state.observation_count,
                    item,
                    key,
                });
            }
        }

        Ok(confirmed)
    }

    /// Remove every track with `frame_number - last_seen_frame > forget_window`.
    /// Returns how many were removed.
    pub fn sweep(&mut self, frame_number: u64) -> usize {
        let forget_window = self.params.forget_window;
        let before = self.tracks.len();
        self.tracks
            .retain(|_, state| frame_number.saturating_sub(state.last_seen_frame) <= forget_window);
        let evicted = before - self.tracks.len();

        if evicted > 0 {
            self.n_evicted += evicted as u64;
            log::debug!(
                "Frame {}: evicted {} stale track(s), {} remain",
                frame_number,
                evicted,
                self.tracks.len()
            );
        }
        evicted
    }

    pub fn get(&self, key: &TrackKey) -> Option<&TrackState> {
        self.tracks.get(key)
    }

    pub fn contains(&self, key: &TrackKey) -> bool {
        self.tracks.contains_key(key)
    }

    pub fn tracks(&self) -> impl Iterator<Item = (&TrackKey, &TrackState)> {
        self.tracks.iter()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Last frame passed to `observe`
    pub fn current_frame(&self) -> Option<u64> {
        self.current_frame
    }

    /// Total tracks evicted over the store's lifetime
    pub fn total_evicted(&self) -> u64 {
        self.n_evicted
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
        self.current_frame = None;
    }
}
