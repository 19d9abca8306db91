//! Pure Rust kinematics and temporal persistence for hazard detections
//!
//! - [`bbox`]: pixel-space bounding boxes
//! - [`kinematics`]: range, stopping distance and time-to-collision
//! - [`persistence`]: grid-keyed track store that confirms detections seen
//!   over several frames and forgets tracks that stop being seen
//!
//! ```rust
//! use hazardtrack::{Bbox, Observation, PersistenceParams, TrackPersistenceStore};
//!
//! struct Hit(Bbox<f32>);
//! impl Observation for Hit {
//!     fn class_label(&self) -> &str { "cow" }
//!     fn bbox(&self) -> &Bbox<f32> { &self.0 }
//! }
//!
//! let mut store = TrackPersistenceStore::new(PersistenceParams::default());
//! for frame in 1..=3 {
//!     let confirmed = store.observe(frame, vec![Hit(Bbox::new(90.0, 300.0, 130.0, 360.0))])?;
//!     assert_eq!(confirmed.len(), if frame == 3 { 1 } else { 0 });
//! }
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod bbox;
pub mod kinematics;
pub mod persistence;

pub use bbox::Bbox;
pub use kinematics::{estimate_distance, kmph_to_mps, stopping_distance, time_to_collision};
pub use persistence::{
    Confirmed, Observation, PersistenceParams, TrackKey, TrackPersistenceStore, TrackState,
};
