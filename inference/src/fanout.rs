//! Result fan-out to live subscribers and the alert log
//!
//! Subscribers are fed through non-blocking sends. A subscriber whose queue
//! is full or whose receiver is gone is removed on that attempt, so one slow
//! consumer can never stall the pipeline or starve the others.

use crate::alert_log::{AlertRecord, AlertSink, CropNamer};
use crate::error::Result;
use crate::types::{Decision, FrameResult};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Lifecycle of a run as seen by subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Processing,
    Completed,
    Error,
    Cancelled,
}

/// Everything pushed to subscribers, discriminated by `"type"`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SubscriberMessage {
    FrameResult(FrameResult),
    Status {
        status: RunStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Recoverable problem, e.g. a failed detector batch
    Diagnostic {
        message: String,
        frame_numbers: Vec<u64>,
    },
}

impl SubscriberMessage {
    pub fn status(status: RunStatus, message: Option<String>) -> Self {
        Self::Status { status, message }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("subscriber queue is full")]
    Full,
    #[error("subscriber disconnected")]
    Disconnected,
}

/// A live consumer of pipeline messages
pub trait Subscriber: Send {
    /// Must not block
    fn try_deliver(&mut self, message: &Arc<SubscriberMessage>) -> std::result::Result<(), DeliveryError>;
}

/// Subscriber backed by a bounded crossbeam channel, for threaded consumers
pub struct ChannelSubscriber {
    tx: crossbeam::channel::Sender<Arc<SubscriberMessage>>,
}

impl ChannelSubscriber {
    pub fn bounded(depth: usize) -> (Self, crossbeam::channel::Receiver<Arc<SubscriberMessage>>) {
        let (tx, rx) = crossbeam::channel::bounded(depth);
        (Self { tx }, rx)
    }
}

impl Subscriber for ChannelSubscriber {
    fn try_deliver(&mut self, message: &Arc<SubscriberMessage>) -> std::result::Result<(), DeliveryError> {
        use crossbeam::channel::TrySendError;
        self.tx.try_send(Arc::clone(message)).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Disconnected(_) => DeliveryError::Disconnected,
        })
    }
}

/// Subscriber backed by a tokio mpsc channel, for async consumers such as a
/// websocket task
pub struct AsyncSubscriber {
    tx: tokio::sync::mpsc::Sender<Arc<SubscriberMessage>>,
}

impl AsyncSubscriber {
    pub fn bounded(depth: usize) -> (Self, tokio::sync::mpsc::Receiver<Arc<SubscriberMessage>>) {
        let (tx, rx) = tokio::sync::mpsc::channel(depth);
        (Self { tx }, rx)
    }
}

impl Subscriber for AsyncSubscriber {
    fn try_deliver(&mut self, message: &Arc<SubscriberMessage>) -> std::result::Result<(), DeliveryError> {
        use tokio::sync::mpsc::error::TrySendError;
        self.tx.try_send(Arc::clone(message)).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Closed(_) => DeliveryError::Disconnected,
        })
    }
}

pub type SubscriberId = u64;

/// Outcome of one publish call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub pruned: usize,
}

/// Concurrent-safe set of subscribers with prune-on-failure
pub struct SubscriberRegistry {
    subscribers: Mutex<HashMap<SubscriberId, Box<dyn Subscriber>>>,
    next_id: AtomicU64,
    default_depth: usize,
}

impl SubscriberRegistry {
    /// `default_depth` sizes the queues made by the `subscribe_*` helpers
    pub fn new(default_depth: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            default_depth: default_depth.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SubscriberId, Box<dyn Subscriber>>> {
        // A panic inside try_deliver leaves the map itself consistent
        self.subscribers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn register(&self, subscriber: Box<dyn Subscriber>) -> SubscriberId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut subscribers = self.lock();
        subscribers.insert(id, subscriber);
        log::debug!("Subscriber {} registered ({} active)", id, subscribers.len());
        id
    }

    /// Register a crossbeam channel subscriber with the default depth
    pub fn subscribe_channel(&self) -> (SubscriberId, crossbeam::channel::Receiver<Arc<SubscriberMessage>>) {
        let (subscriber, rx) = ChannelSubscriber::bounded(self.default_depth);
        (self.register(Box::new(subscriber)), rx)
    }

    /// Register a tokio channel subscriber with the default depth
    pub fn subscribe_async(&self) -> (SubscriberId, tokio::sync::mpsc::Receiver<Arc<SubscriberMessage>>) {
        let (subscriber, rx) = AsyncSubscriber::bounded(self.default_depth);
        (self.register(Box::new(subscriber)), rx)
    }

    /// Returns whether the id was registered
    pub fn unregister(&self, id: SubscriberId) -> bool {
        let removed = self.lock().remove(&id).is_some();
        if removed {
            log::debug!("Subscriber {} unregistered", id);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver to every subscriber, pruning the ones that fail
    pub fn publish(&self, message: SubscriberMessage) -> PublishReport {
        let message = Arc::new(message);
        let mut report = PublishReport::default();
        let mut subscribers = self.lock();

        subscribers.retain(|id, subscriber| match subscriber.try_deliver(&message) {
            Ok(()) => {
                report.delivered += 1;
                true
            }
            Err(e) => {
                log::warn!("Pruning subscriber {}: {}", id, e);
                report.pruned += 1;
                false
            }
        });
        report
    }
}

/// What a frame publication produced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FramePublication {
    pub subscribers: PublishReport,
    pub alerts_written: usize,
}

/// Publishes frame results to the registry and qualifying alerts to the log
pub struct ResultPublisher {
    registry: Arc<SubscriberRegistry>,
    sink: Box<dyn AlertSink>,
    crops: Option<CropNamer>,
}

impl ResultPublisher {
    pub fn new(registry: Arc<SubscriberRegistry>, sink: Box<dyn AlertSink>, crop_dir: Option<&str>) -> Self {
        Self {
            registry,
            sink,
            crops: crop_dir.map(CropNamer::new),
        }
    }

    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    /// Append alert records, then fan the result out. Only alert log write
    /// failures are returned; subscriber failures are absorbed by pruning.
    pub fn publish(&mut self, result: FrameResult, elapsed_s: f64) -> Result<FramePublication> {
        let mut alerts_written = 0;
        if result.overall_decision != Decision::Clear {
            for detection in &result.detections {
                if detection.assessment.decision == Decision::Clear {
                    continue;
                }
                let crop_ref = self
                    .crops
                    .as_mut()
                    .map(|namer| namer.next(result.frame_number, &detection.class_label));
                let record = AlertRecord::new(elapsed_s, result.frame_number, detection, result.location, crop_ref);
                self.sink.append(&record)?;
                alerts_written += 1;
            }
        }

        let subscribers = self.registry.publish(SubscriberMessage::FrameResult(result));
        Ok(FramePublication {
            subscribers,
            alerts_written,
        })
    }

    pub fn publish_status(&self, status: RunStatus, message: Option<String>) -> PublishReport {
        self.registry.publish(SubscriberMessage::status(status, message))
    }

    pub fn publish_diagnostic(&self, message: String, frame_numbers: Vec<u64>) -> PublishReport {
        self.registry.publish(SubscriberMessage::Diagnostic { message, frame_numbers })
    }

    pub fn flush(&mut self) -> Result<()> {
        self.sink.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert_log::MemoryAlertLog;
    use crate::types::{AlertLevel, AssessedDetection, GeoPoint, RiskAssessment};
    use hazardtrack::Bbox;

    fn detection(decision: Decision) -> AssessedDetection {
        AssessedDetection {
            bbox: Bbox::new(600.0, 540.0, 680.0, 600.0),
            class_label: "dog".to_string(),
            confidence: 0.8,
            observation_count: 3,
            assessment: RiskAssessment {
                distance_m: 70.0,
                ttc_s: 3.2,
                risk_score: 60.0,
                decision,
            },
        }
    }

    fn result(frame_number: u64, decisions: &[Decision]) -> FrameResult {
        let overall_decision = decisions.iter().copied().max().unwrap_or_default();
        FrameResult {
            frame_number,
            timestamp_s: frame_number as f64 / 30.0,
            detections: decisions.iter().map(|d| detection(*d)).collect(),
            overall_risk_score: if decisions.is_empty() { 0.0 } else { 60.0 },
            overall_decision,
            speed_kmph: 80.0,
            location: GeoPoint::new(22.5726, 88.3639),
            alert_level: AlertLevel::for_decision(overall_decision),
            progress_percent: None,
        }
    }

    fn frame_numbers(rx: &crossbeam::channel::Receiver<Arc<SubscriberMessage>>) -> Vec<u64> {
        rx.try_iter()
            .filter_map(|msg| match &*msg {
                SubscriberMessage::FrameResult(r) => Some(r.frame_number),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_every_subscriber_gets_every_result_in_order() {
        let registry = SubscriberRegistry::new(16);
        let receivers: Vec<_> = (0..3).map(|_| registry.subscribe_channel().1).collect();

        for frame in [2, 4, 6, 8] {
            let report = registry.publish(SubscriberMessage::FrameResult(result(frame, &[])));
            assert_eq!(report, PublishReport { delivered: 3, pruned: 0 });
        }
        for rx in &receivers {
            assert_eq!(frame_numbers(rx), vec![2, 4, 6, 8]);
        }
    }

    #[test]
    fn test_disconnected_subscriber_is_pruned() {
        let registry = SubscriberRegistry::new(16);
        let (_, keep) = registry.subscribe_channel();
        let (_, gone) = registry.subscribe_channel();
        drop(gone);

        let report = registry.publish(SubscriberMessage::FrameResult(result(2, &[])));
        assert_eq!(report, PublishReport { delivered: 1, pruned: 1 });
        assert_eq!(registry.len(), 1);
        assert_eq!(frame_numbers(&keep), vec![2]);
    }

    #[test]
    fn test_full_subscriber_is_pruned_without_blocking() {
        let registry = SubscriberRegistry::new(16);
        let (slow, _slow_rx) = ChannelSubscriber::bounded(1);
        registry.register(Box::new(slow));
        let (_, fast_rx) = registry.subscribe_channel();

        registry.publish(SubscriberMessage::FrameResult(result(2, &[])));
        let report = registry.publish(SubscriberMessage::FrameResult(result(4, &[])));
        assert_eq!(report, PublishReport { delivered: 1, pruned: 1 });
        assert_eq!(frame_numbers(&fast_rx), vec![2, 4]);
    }

    #[test]
    fn test_unregister() {
        let registry = SubscriberRegistry::new(4);
        let (id, _rx) = registry.subscribe_channel();
        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));
        assert!(registry.is_empty());
        assert_eq!(registry.publish(SubscriberMessage::status(RunStatus::Completed, None)), PublishReport::default());
    }

    #[test]
    fn test_register_concurrently_with_publish() {
        let registry = Arc::new(SubscriberRegistry::new(1024));
        let publisher = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                for frame in 0..200 {
                    registry.publish(SubscriberMessage::FrameResult(result(frame, &[])));
                }
            })
        };
        let receivers: Vec<_> = (0..20).map(|_| registry.subscribe_channel().1).collect();
        publisher.join().unwrap();

        assert_eq!(registry.len(), 20);
        for rx in &receivers {
            let frames = frame_numbers(rx);
            assert!(frames.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[tokio::test]
    async fn test_async_subscriber_receives_messages() {
        let registry = SubscriberRegistry::new(8);
        let (_, mut rx) = registry.subscribe_async();

        registry.publish(SubscriberMessage::status(RunStatus::Processing, None));
        registry.publish(SubscriberMessage::FrameResult(result(2, &[])));

        let first = rx.recv().await.unwrap();
        assert_eq!(*first, SubscriberMessage::status(RunStatus::Processing, None));
        let second = rx.recv().await.unwrap();
        assert!(matches!(&*second, SubscriberMessage::FrameResult(r) if r.frame_number == 2));
    }

    #[test]
    fn test_wire_format() {
        let json: serde_json::Value =
            serde_json::from_str(&SubscriberMessage::FrameResult(result(4, &[Decision::Caution])).to_json().unwrap())
                .unwrap();
        assert_eq!(json["type"], "frame_result");
        assert_eq!(json["frame_number"], 4);
        assert_eq!(json["overall_decision"], "CAUTION");
        assert_eq!(json["alert_level"], "WARNING");
        assert_eq!(json["detections"][0]["decision"], "CAUTION");
        assert!(json.get("progress_percent").is_none());

        let status = SubscriberMessage::status(RunStatus::Error, Some("open failed".into()));
        let json: serde_json::Value = serde_json::from_str(&status.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "status");
        assert_eq!(json["status"], "error");
        assert_eq!(json["message"], "open failed");
    }

    #[test]
    fn test_publisher_writes_only_non_clear_detections() {
        let log = MemoryAlertLog::new();
        let registry = Arc::new(SubscriberRegistry::new(8));
        let (_, rx) = registry.subscribe_channel();
        let mut publisher = ResultPublisher::new(Arc::clone(&registry), Box::new(log.clone()), Some("snaps"));

        let clear = publisher.publish(result(2, &[Decision::Clear]), 0.1).unwrap();
        assert_eq!(clear.alerts_written, 0);

        let mixed = publisher
            .publish(result(4, &[Decision::Clear, Decision::SlowDown, Decision::BrakeEmergency]), 0.2)
            .unwrap();
        assert_eq!(mixed.alerts_written, 2);
        assert_eq!(mixed.subscribers.delivered, 1);

        let records = log.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].decision, Decision::SlowDown);
        assert_eq!(records[1].decision, Decision::BrakeEmergency);
        assert_eq!(records[0].crop_ref.as_deref(), Some("snaps/4_dog_000001.jpg"));
        assert_eq!(frame_numbers(&rx), vec![2, 4]);
    }
}
