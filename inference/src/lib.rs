//! TrackGuard hazard decision pipeline
//!
//! Turns per-frame object detections from an external detector into a
//! stabilized stream of hazard alerts and braking decisions for a moving
//! vehicle, and fans the per-frame results out to live subscribers.
//!
//! Frames flow through:
//! detector (batched) -> [`filter`] -> track persistence -> [`risk`] -> [`fanout`]
//!
//! ```no_run
//! use std::sync::Arc;
//! use trackguard::{
//!     CancelToken, FramePipeline, MemoryAlertLog, MockDetector, PipelineConfig,
//!     SubscriberRegistry, SyntheticFrameSource,
//! };
//!
//! let registry = Arc::new(SubscriberRegistry::new(64));
//! let (_id, rx) = registry.subscribe_channel();
//! let mut pipeline = FramePipeline::new(
//!     PipelineConfig::default(),
//!     Box::new(MockDetector::new(7)),
//!     registry,
//!     Box::new(MemoryAlertLog::new()),
//! )?;
//! let mut source = SyntheticFrameSource::new(1280, 720, 30.0).with_total(300);
//! let report = pipeline.run(&mut source, &CancelToken::new())?;
//! println!("{} frames processed", report.summary.frames_processed);
//! # drop(rx);
//! # Ok::<(), trackguard::TrackGuardError>(())
//! ```

pub mod alert_log;
pub mod batch_executor;
pub mod config;
pub mod detector_stub;
pub mod detector_trait;
pub mod error;
pub mod fanout;
pub mod filter;
pub mod frame_source;
pub mod geolocation;
pub mod orchestrator;
pub mod risk;
pub mod types;

pub use hazardtrack::Bbox;

pub use alert_log::{AlertRecord, AlertSink, JsonLinesAlertLog, MemoryAlertLog};
pub use config::PipelineConfig;
pub use detector_stub::{MockDetector, ScriptedDetector};
pub use detector_trait::Detector;
pub use error::{Result, TrackGuardError};
pub use fanout::{
    AsyncSubscriber, ChannelSubscriber, PublishReport, RunStatus, Subscriber, SubscriberMessage,
    SubscriberRegistry,
};
pub use filter::DetectionFilter;
pub use frame_source::{FrameSource, SourceInfo, SyntheticFrameSource, VecFrameSource};
pub use geolocation::{Geolocator, RouteGeolocator};
pub use orchestrator::{CancelToken, FramePipeline, PipelineHandle, PipelineState, RunReport, RunSummary};
pub use risk::RiskEngine;
pub use types::{
    AlertLevel, AssessedDetection, Decision, Detection, FilteredDetection, Frame, FrameResult,
    FrameShape, GeoPoint, ImageData, ImageFormat, RawDetection, RiskAssessment, TargetClass,
};

/// Get library version information
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
