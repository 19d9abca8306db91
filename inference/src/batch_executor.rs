/// Batch executor that runs detector calls on a dedicated worker thread.
///
/// The caller submits one batch at a time and collects its outcome later, so
/// the next batch of frames can be read while the detector is busy. Outcomes
/// come back in submission order, already rescaled to frame pixels.
///
/// A detector that panics or does not answer within the configured timeout
/// produces a failed outcome for that batch; the worker keeps running.
use crate::detector_trait::Detector;
use crate::error::{Result, TrackGuardError};
use crate::types::{Detection, ImageData};
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::{Duration, Instant};

/// One detector call's worth of images
struct BatchJob {
    batch_id: u64,
    images: Vec<ImageData>,
}

/// Result of one detector call
#[derive(Debug)]
pub struct BatchOutcome {
    pub batch_id: u64,
    /// One detection list per submitted image, in submission order
    pub result: Result<Vec<Vec<Detection>>>,
    pub duration: Duration,
}

#[derive(Debug, Clone, Copy)]
struct PendingBatch {
    batch_id: u64,
    submitted_at: Instant,
}

/// Owns the detector for the lifetime of a run
pub struct BatchExecutor {
    job_tx: Option<Sender<BatchJob>>,
    outcome_rx: Receiver<BatchOutcome>,
    thread: Option<thread::JoinHandle<Box<dyn Detector>>>,
    in_flight: Option<PendingBatch>,
    /// Timed-out batches whose outcomes have not come back yet
    abandoned: Vec<u64>,
    /// Outcome for a batch the worker could not accept
    rejected: Option<BatchOutcome>,
    timeout: Option<Duration>,
    detector_name: String,
}

impl BatchExecutor {
    /// Move the detector onto a worker thread
    pub fn spawn(detector: Box<dyn Detector>) -> Result<Self> {
        let detector_name = detector.name().to_string();
        // Capacity 1 each way: at most one batch in flight
        let (job_tx, job_rx) = bounded::<BatchJob>(1);
        let (outcome_tx, outcome_rx) = bounded::<BatchOutcome>(1);

        let thread = thread::Builder::new()
            .name(format!("detector-{}", detector_name))
            .spawn(move || Self::worker_loop(detector, job_rx, outcome_tx))?;

        log::info!("Batch executor started for detector '{}'", detector_name);

        Ok(Self {
            job_tx: Some(job_tx),
            outcome_rx,
            thread: Some(thread),
            in_flight: None,
            abandoned: Vec::new(),
            rejected: None,
            timeout: None,
            detector_name,
        })
    }

    /// Give up on a batch that has not answered this long after submission
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn worker_loop(
        mut detector: Box<dyn Detector>,
        job_rx: Receiver<BatchJob>,
        outcome_tx: Sender<BatchOutcome>,
    ) -> Box<dyn Detector> {
        let detector_name = detector.name().to_string();
        while let Ok(job) = job_rx.recv() {
            let start = Instant::now();
            let batch_size = job.images.len();
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                Self::execute_batch(detector.as_mut(), &job.images)
            }))
            .unwrap_or_else(|payload| {
                Err(TrackGuardError::detector(format!(
                    "{} panicked: {}",
                    detector_name,
                    panic_message(payload.as_ref())
                )))
            });
            let duration = start.elapsed();

            match &result {
                Ok(_) => log::debug!(
                    "Batch {}: {} image(s) in {:.1}ms",
                    job.batch_id,
                    batch_size,
                    duration.as_secs_f32() * 1000.0
                ),
                Err(e) => log::warn!("Batch {} failed after {:.1}ms: {}", job.batch_id, duration.as_secs_f32() * 1000.0, e),
            }

            let outcome = BatchOutcome {
                batch_id: job.batch_id,
                result,
                duration,
            };
            if outcome_tx.send(outcome).is_err() {
                break;
            }
        }
        detector
    }

    /// Run the detector and map raw output into frame space
    fn execute_batch(detector: &mut dyn Detector, images: &[ImageData]) -> Result<Vec<Vec<Detection>>> {
        let raw = detector.detect_batch(images)?;
        if raw.len() != images.len() {
            return Err(TrackGuardError::detector(format!(
                "{} returned {} result(s) for {} image(s)",
                detector.name(),
                raw.len(),
                images.len()
            )));
        }

        let input_size = detector.input_size();
        Ok(raw
            .into_iter()
            .zip(images)
            .map(|(per_image, image)| {
                per_image
                    .into_iter()
                    .map(|det| {
                        let label = detector.class_name(det.class);
                        det.into_frame_space(input_size, image.shape(), label)
                    })
                    .collect()
            })
            .collect())
    }

    /// Hand a batch to the worker. Fails if a batch is already in flight.
    ///
    /// While the worker is still stuck on timed-out batches the new batch is
    /// not queued; `wait` reports it as a failed detector call.
    pub fn submit(&mut self, batch_id: u64, images: Vec<ImageData>) -> Result<()> {
        if let Some(pending) = self.in_flight {
            return Err(TrackGuardError::other(format!(
                "batch {} submitted while batch {} is still in flight",
                batch_id, pending.batch_id
            )));
        }
        let job_tx = self
            .job_tx
            .as_ref()
            .ok_or_else(|| TrackGuardError::other("batch executor is shut down"))?;
        match job_tx.try_send(BatchJob { batch_id, images }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                log::warn!(
                    "Detector '{}' still busy with abandoned batch(es) {:?}, rejecting batch {}",
                    self.detector_name,
                    self.abandoned,
                    batch_id
                );
                self.rejected = Some(BatchOutcome {
                    batch_id,
                    result: Err(TrackGuardError::detector(format!(
                        "{} is still busy with timed-out batch(es) {:?}",
                        self.detector_name, self.abandoned
                    ))),
                    duration: Duration::ZERO,
                });
            }
            Err(TrySendError::Disconnected(_)) => {
                return Err(TrackGuardError::other(format!("detector worker '{}' exited", self.detector_name)))
            }
        }
        self.in_flight = Some(PendingBatch {
            batch_id,
            submitted_at: Instant::now(),
        });
        Ok(())
    }

    /// Block until the in-flight batch finishes or times out. `None` if
    /// nothing is in flight.
    pub fn wait(&mut self) -> Result<Option<BatchOutcome>> {
        let pending = match self.in_flight {
            Some(pending) => pending,
            None => return Ok(None),
        };
        if let Some(outcome) = self.rejected.take() {
            self.in_flight = None;
            return Ok(Some(outcome));
        }

        loop {
            let received = match self.timeout {
                Some(timeout) => self
                    .outcome_rx
                    .recv_timeout(timeout.saturating_sub(pending.submitted_at.elapsed())),
                None => self.outcome_rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };

            match received {
                Ok(outcome) if outcome.batch_id == pending.batch_id => {
                    self.in_flight = None;
                    return Ok(Some(outcome));
                }
                Ok(late) => {
                    log::debug!("Dropping late outcome of abandoned batch {}", late.batch_id);
                    self.abandoned.retain(|id| *id != late.batch_id);
                }
                Err(RecvTimeoutError::Timeout) => {
                    let waited = pending.submitted_at.elapsed();
                    log::warn!(
                        "Detector '{}' did not answer batch {} within {:.0}ms",
                        self.detector_name,
                        pending.batch_id,
                        waited.as_secs_f32() * 1000.0
                    );
                    self.in_flight = None;
                    self.abandoned.push(pending.batch_id);
                    return Ok(Some(BatchOutcome {
                        batch_id: pending.batch_id,
                        result: Err(TrackGuardError::detector(format!(
                            "{} timed out after {:.0}ms",
                            self.detector_name,
                            waited.as_secs_f32() * 1000.0
                        ))),
                        duration: waited,
                    }));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(TrackGuardError::other(format!("detector worker '{}' exited", self.detector_name)))
                }
            }
        }
    }

    pub fn in_flight(&self) -> Option<u64> {
        self.in_flight.map(|pending| pending.batch_id)
    }

    /// Batches that timed out and are still occupying the worker
    pub fn abandoned(&self) -> &[u64] {
        &self.abandoned
    }

    pub fn detector_name(&self) -> &str {
        &self.detector_name
    }

    /// Stop the worker and take the detector back. An in-flight batch is
    /// awaited and its outcome discarded. A worker still stuck on timed-out
    /// batches after one more timeout window is detached and the detector
    /// is lost.
    pub fn shutdown(mut self) -> Result<Box<dyn Detector>> {
        if let Some(batch_id) = self.in_flight() {
            log::debug!("Discarding in-flight batch {} on shutdown", batch_id);
            let _ = self.wait();
        }
        self.drain_abandoned();
        if !self.abandoned.is_empty() {
            self.detach();
            return Err(TrackGuardError::detector(format!(
                "{} still busy with batch(es) {:?} at shutdown",
                self.detector_name, self.abandoned
            )));
        }
        self.stop()
            .ok_or_else(|| TrackGuardError::other(format!("detector worker '{}' panicked", self.detector_name)))
    }

    /// Collect late outcomes, allowing one timeout window per batch
    fn drain_abandoned(&mut self) {
        let window = self.timeout.unwrap_or(Duration::ZERO);
        while !self.abandoned.is_empty() {
            match self.outcome_rx.recv_timeout(window) {
                Ok(late) => self.abandoned.retain(|id| *id != late.batch_id),
                Err(_) => break,
            }
        }
    }

    fn stop(&mut self) -> Option<Box<dyn Detector>> {
        self.job_tx.take();
        let handle = self.thread.take()?;
        let detector = handle.join().ok();
        log::debug!("Batch executor for '{}' stopped", self.detector_name);
        detector
    }

    /// Let a stuck worker finish on its own; joining would block on it
    fn detach(&mut self) {
        self.job_tx.take();
        if self.thread.take().is_some() {
            log::warn!("Detached stuck worker for detector '{}'", self.detector_name);
        }
    }
}

impl Drop for BatchExecutor {
    fn drop(&mut self) {
        if self.thread.is_none() {
            return;
        }
        // Drain a pending outcome so the worker is not stuck on send
        if self.in_flight.is_some() {
            let _ = self.wait();
        }
        self.drain_abandoned();
        if self.abandoned.is_empty() {
            self.stop();
        } else {
            self.detach();
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector_stub::ScriptedDetector;
    use crate::types::{RawDetection, TargetClass};
    use hazardtrack::Bbox;

    struct ShortDetector;

    impl Detector for ShortDetector {
        fn detect_batch(&mut self, _images: &[ImageData]) -> Result<Vec<Vec<RawDetection>>> {
            Ok(Vec::new())
        }
        fn name(&self) -> &str {
            "short"
        }
        fn input_size(&self) -> (u32, u32) {
            (640, 640)
        }
    }

    fn frames(n: usize) -> Vec<ImageData> {
        (0..n).map(|_| ImageData::placeholder(1280, 720)).collect()
    }

    #[test]
    fn test_outcome_rescaled_and_labelled() {
        let raw = RawDetection::new(TargetClass::Class(19), 0.8, Bbox::new(64.0, 320.0, 128.0, 384.0));
        let detector = ScriptedDetector::new(vec![vec![raw], vec![]]);
        let mut executor = BatchExecutor::spawn(Box::new(detector)).unwrap();

        executor.submit(7, frames(2)).unwrap();
        assert_eq!(executor.in_flight(), Some(7));
        let outcome = executor.wait().unwrap().unwrap();
        assert_eq!(outcome.batch_id, 7);
        let per_frame = outcome.result.unwrap();
        assert_eq!(per_frame.len(), 2);
        assert_eq!(per_frame[0][0].class_label, "cow");
        assert_eq!(per_frame[0][0].bbox, Bbox::new(128.0, 360.0, 256.0, 432.0));
        assert!(per_frame[1].is_empty());
        assert_eq!(executor.in_flight(), None);
    }

    #[test]
    fn test_one_batch_in_flight() {
        let mut executor = BatchExecutor::spawn(Box::new(ScriptedDetector::new(vec![]))).unwrap();
        executor.submit(0, frames(1)).unwrap();
        assert!(executor.submit(1, frames(1)).is_err());
        assert!(executor.wait().unwrap().is_some());
        assert!(executor.wait().unwrap().is_none());
        executor.submit(1, frames(1)).unwrap();
        executor.wait().unwrap();
    }

    #[test]
    fn test_detector_failure_is_reported_not_fatal() {
        let detector = ScriptedDetector::new(vec![]).fail_batch(0);
        let mut executor = BatchExecutor::spawn(Box::new(detector)).unwrap();
        executor.submit(0, frames(3)).unwrap();
        let outcome = executor.wait().unwrap().unwrap();
        assert!(matches!(outcome.result, Err(TrackGuardError::Detector(_))));

        executor.submit(1, frames(3)).unwrap();
        assert!(executor.wait().unwrap().unwrap().result.is_ok());
    }

    #[test]
    fn test_detector_panic_is_reported_not_fatal() {
        let detector = ScriptedDetector::new(vec![]).panic_batch(0);
        let mut executor = BatchExecutor::spawn(Box::new(detector)).unwrap();
        executor.submit(0, frames(2)).unwrap();
        match executor.wait().unwrap().unwrap().result {
            Err(TrackGuardError::Detector(msg)) => assert!(msg.contains("scripted panic on batch 0")),
            other => panic!("expected a detector error, got {:?}", other),
        }

        executor.submit(1, frames(2)).unwrap();
        assert!(executor.wait().unwrap().unwrap().result.is_ok());
        assert_eq!(executor.shutdown().unwrap().name(), "scripted");
    }

    #[test]
    fn test_stalled_batch_times_out_and_late_outcome_is_dropped() {
        let detector = ScriptedDetector::new(vec![]).stall_batch(0, Duration::from_millis(300));
        let mut executor = BatchExecutor::spawn(Box::new(detector))
            .unwrap()
            .with_timeout(Duration::from_millis(200));

        executor.submit(0, frames(1)).unwrap();
        let outcome = executor.wait().unwrap().unwrap();
        assert_eq!(outcome.batch_id, 0);
        assert!(matches!(outcome.result, Err(TrackGuardError::Detector(_))));
        assert_eq!(executor.in_flight(), None);
        assert_eq!(executor.abandoned(), &[0]);

        // Batch 1 queues behind the stalled call and is answered once it ends
        executor.submit(1, frames(1)).unwrap();
        let outcome = executor.wait().unwrap().unwrap();
        assert_eq!(outcome.batch_id, 1);
        assert!(outcome.result.is_ok());
        assert!(executor.abandoned().is_empty());
        assert_eq!(executor.shutdown().unwrap().name(), "scripted");
    }

    #[test]
    fn test_busy_worker_rejects_batch_and_stuck_detector_is_detached() {
        let detector = ScriptedDetector::new(vec![]).stall_batch(0, Duration::from_secs(2));
        let mut executor = BatchExecutor::spawn(Box::new(detector))
            .unwrap()
            .with_timeout(Duration::from_millis(50));

        executor.submit(0, frames(1)).unwrap();
        assert!(executor.wait().unwrap().unwrap().result.is_err());
        // Batch 1 takes the only queue slot and times out too
        executor.submit(1, frames(1)).unwrap();
        assert!(executor.wait().unwrap().unwrap().result.is_err());
        assert_eq!(executor.abandoned(), &[0, 1]);
        // No room left: batch 2 fails without waiting
        executor.submit(2, frames(1)).unwrap();
        let outcome = executor.wait().unwrap().unwrap();
        assert_eq!(outcome.batch_id, 2);
        assert!(matches!(outcome.result, Err(TrackGuardError::Detector(_))));
        assert_eq!(outcome.duration, Duration::ZERO);

        let start = Instant::now();
        assert!(matches!(executor.shutdown(), Err(TrackGuardError::Detector(_))));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_length_mismatch_is_detector_error() {
        let mut executor = BatchExecutor::spawn(Box::new(ShortDetector)).unwrap();
        executor.submit(0, frames(2)).unwrap();
        let outcome = executor.wait().unwrap().unwrap();
        assert!(matches!(outcome.result, Err(TrackGuardError::Detector(_))));
    }

    #[test]
    fn test_shutdown_returns_detector() {
        let mut executor = BatchExecutor::spawn(Box::new(ScriptedDetector::new(vec![]))).unwrap();
        executor.submit(0, frames(1)).unwrap();
        let detector = executor.shutdown().unwrap();
        assert_eq!(detector.name(), "scripted");
    }
}
