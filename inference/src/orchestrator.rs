/// Frame pipeline orchestrator
///
/// Drives one run end to end:
/// 1. Ingest: read frames in order and apply the frame-skip stride
/// 2. Detect: batch frames onto the detector worker (one batch in flight)
/// 3. Decide: Filter -> Persistence -> Risk for each frame, in frame order
/// 4. Publish: fan the frame result out and append alerts
///
/// The next batch is read from the source while the current one is on the
/// detector; it is only submitted after the current batch has been fully
/// post-processed, so the track store always sees frames in order.
use crate::alert_log::AlertSink;
use crate::batch_executor::{BatchExecutor, BatchOutcome};
use crate::config::PipelineConfig;
use crate::detector_trait::Detector;
use crate::error::{Result, TrackGuardError};
use crate::fanout::{ResultPublisher, RunStatus, SubscriberRegistry};
use crate::filter::DetectionFilter;
use crate::frame_source::FrameSource;
use crate::geolocation::{Geolocator, RouteGeolocator};
use crate::risk::RiskEngine;
use crate::types::{AlertLevel, Decision, Detection, Frame, FrameResult, FrameShape};
use hazardtrack::TrackPersistenceStore;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

const STATS_INTERVAL: u64 = 100;

/// Run state machine:
/// `Idle -> Ingesting -> (Batching <-> Detecting) -> Draining -> Done`,
/// with `Failed` and `Cancelled` reachable from any non-terminal state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineState {
    Idle,
    Ingesting,
    Batching,
    Detecting,
    Draining,
    Done,
    Failed,
    Cancelled,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }
}

/// Cooperative cancellation flag, checked between frames
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Counters for one run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub frames_read: u64,
    /// Dropped by the frame-skip stride
    pub frames_skipped: u64,
    pub frames_processed: u64,
    /// Lost to failed detector batches
    pub frames_failed: u64,
    /// In flight or still batching when the run was cancelled
    pub frames_discarded: u64,
    pub batches_submitted: u64,
    pub batches_failed: u64,
    pub alerts_written: u64,
    pub subscribers_pruned: u64,
    /// Processed frames per overall decision
    pub decision_counts: BTreeMap<Decision, u64>,
    pub peak_risk_score: f32,
    pub active_tracks: usize,
    pub final_state: PipelineState,
    pub wall_time_s: f64,
}

impl Default for RunSummary {
    fn default() -> Self {
        Self {
            frames_read: 0,
            frames_skipped: 0,
            frames_processed: 0,
            frames_failed: 0,
            frames_discarded: 0,
            batches_submitted: 0,
            batches_failed: 0,
            alerts_written: 0,
            subscribers_pruned: 0,
            decision_counts: Decision::all().into_iter().map(|d| (d, 0)).collect(),
            peak_risk_score: 0.0,
            active_tracks: 0,
            final_state: PipelineState::Idle,
            wall_time_s: 0.0,
        }
    }
}

/// Outcome of a run that did not fail
#[derive(Debug, Clone)]
pub struct RunReport {
    pub summary: RunSummary,
    /// Every frame result in frame order (empty when retention is off)
    pub results: Vec<FrameResult>,
}

/// What the orchestrator remembers about a frame once its pixels are gone
#[derive(Debug, Clone, Copy)]
struct FrameMeta {
    frame_number: u64,
    timestamp_s: f64,
    shape: FrameShape,
}

impl From<&Frame> for FrameMeta {
    fn from(frame: &Frame) -> Self {
        Self {
            frame_number: frame.frame_number,
            timestamp_s: frame.timestamp_s,
            shape: frame.shape(),
        }
    }
}

enum LoopEnd {
    Exhausted,
    Cancelled,
}

struct RunContext {
    start: Instant,
    total_frames: Option<u64>,
    next_batch_id: u64,
    in_flight: Option<Vec<FrameMeta>>,
    summary: RunSummary,
    results: Vec<FrameResult>,
}

impl RunContext {
    fn new() -> Self {
        Self {
            start: Instant::now(),
            total_frames: None,
            next_batch_id: 0,
            in_flight: None,
            summary: RunSummary::default(),
            results: Vec::new(),
        }
    }
}

/// Detection-to-decision pipeline
pub struct FramePipeline {
    config: PipelineConfig,
    filter: DetectionFilter,
    store: TrackPersistenceStore,
    risk: RiskEngine,
    geolocator: Box<dyn Geolocator>,
    publisher: ResultPublisher,
    detector: Option<Box<dyn Detector>>,
    state: PipelineState,
    retain_results: bool,
    last_summary: Option<RunSummary>,
}

impl FramePipeline {
    /// Validates the configuration; it is immutable afterwards
    pub fn new(
        config: PipelineConfig,
        detector: Box<dyn Detector>,
        registry: Arc<SubscriberRegistry>,
        alert_sink: Box<dyn AlertSink>,
    ) -> Result<Self> {
        config.validate()?;

        let filter = DetectionFilter::new(config.filter.clone());
        let store = TrackPersistenceStore::new(config.tracking.clone());
        let risk = RiskEngine::new(
            config.kinematics.clone(),
            config.decision.clone(),
            config.risk.clone(),
        );
        let publisher = ResultPublisher::new(registry, alert_sink, config.alerts.crop_dir.as_deref());

        Ok(Self {
            config,
            filter,
            store,
            risk,
            geolocator: Box::new(RouteGeolocator::default()),
            publisher,
            detector: Some(detector),
            state: PipelineState::Idle,
            retain_results: true,
            last_summary: None,
        })
    }

    pub fn with_geolocator<G: Geolocator + 'static>(mut self, geolocator: G) -> Self {
        self.geolocator = Box::new(geolocator);
        self
    }

    /// Keep frame results in the [`RunReport`]. On by default.
    pub fn retain_results(mut self, retain: bool) -> Self {
        self.retain_results = retain;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        self.publisher.registry()
    }

    pub fn store(&self) -> &TrackPersistenceStore {
        &self.store
    }

    /// Summary of the most recent run, including failed ones
    pub fn last_summary(&self) -> Option<&RunSummary> {
        self.last_summary.as_ref()
    }

    /// Run the source to exhaustion, failure or cancellation.
    ///
    /// Fatal errors (source open/read, alert log, lost detector worker)
    /// leave the pipeline in `Failed` and are returned. Detector failures
    /// only skip the affected frames.
    pub fn run(&mut self, source: &mut dyn FrameSource, cancel: &CancelToken) -> Result<RunReport> {
        self.store.clear();
        self.state = PipelineState::Idle;
        let mut ctx = RunContext::new();

        log::info!(
            "Pipeline starting: batch size {}, frame skip {}, speed {:.0} km/h",
            self.config.batching.batch_size,
            self.config.batching.frame_skip,
            self.config.speed_kmph
        );
        self.publisher.publish_status(RunStatus::Processing, None);
        self.transition(PipelineState::Ingesting);

        let info = match source.open() {
            Ok(info) => info,
            Err(e) => {
                source.close();
                return Err(self.fail(&mut ctx, e));
            }
        };
        ctx.total_frames = info.total_frames;
        log::info!(
            "Frame source opened: {} frames @ {:.1} fps",
            info.total_frames.map_or_else(|| "unknown".to_string(), |n| n.to_string()),
            info.fps
        );

        let detector = match self.detector.take() {
            Some(detector) => detector,
            None => {
                source.close();
                let err = TrackGuardError::other("detector was lost by an earlier run");
                return Err(self.fail(&mut ctx, err));
            }
        };
        let mut executor = match BatchExecutor::spawn(detector) {
            Ok(executor) => executor.with_timeout(self.config.batching.detector_timeout()),
            Err(e) => {
                source.close();
                return Err(self.fail(&mut ctx, e));
            }
        };

        let end = self.drive(&mut ctx, &mut executor, source, cancel);

        // Whatever happened, release the detector and the source first
        if let Some(metas) = ctx.in_flight.take() {
            ctx.summary.frames_discarded += metas.len() as u64;
        }
        match executor.shutdown() {
            Ok(detector) => self.detector = Some(detector),
            Err(e) => log::error!("Detector could not be recovered: {}", e),
        }
        source.close();

        match end {
            Ok(LoopEnd::Exhausted) => {
                self.transition(PipelineState::Draining);
                if let Err(e) = self.publisher.flush() {
                    return Err(self.fail(&mut ctx, e));
                }
                self.publisher.publish_status(RunStatus::Completed, None);
                self.finish(&mut ctx, PipelineState::Done);
            }
            Ok(LoopEnd::Cancelled) => {
                log::info!("Pipeline cancelled after {} frame(s)", ctx.summary.frames_read);
                if let Err(e) = self.publisher.flush() {
                    log::warn!("Alert log flush failed during cancellation: {}", e);
                }
                self.publisher
                    .publish_status(RunStatus::Cancelled, Some("run cancelled before end of stream".to_string()));
                self.finish(&mut ctx, PipelineState::Cancelled);
            }
            Err(e) => return Err(self.fail(&mut ctx, e)),
        }

        Ok(RunReport {
            summary: ctx.summary,
            results: ctx.results,
        })
    }

    /// Move the pipeline onto its own thread
    pub fn spawn(mut self, mut source: Box<dyn FrameSource>) -> Result<PipelineHandle> {
        let cancel = CancelToken::new();
        let token = cancel.clone();
        let thread = thread::Builder::new()
            .name("trackguard-pipeline".to_string())
            .spawn(move || {
                let report = self.run(source.as_mut(), &token);
                (self, report)
            })?;
        Ok(PipelineHandle {
            cancel,
            thread,
        })
    }

    fn drive(
        &mut self,
        ctx: &mut RunContext,
        executor: &mut BatchExecutor,
        source: &mut dyn FrameSource,
        cancel: &CancelToken,
    ) -> Result<LoopEnd> {
        let batch_size = self.config.batching.batch_size;
        let frame_skip = self.config.batching.frame_skip;
        let mut batch: Vec<Frame> = Vec::with_capacity(batch_size);

        loop {
            if cancel.is_cancelled() {
                ctx.summary.frames_discarded += batch.len() as u64;
                return Ok(LoopEnd::Cancelled);
            }

            let frame = match source.next_frame()? {
                Some(frame) => frame,
                None => break,
            };
            ctx.summary.frames_read += 1;

            if frame.frame_number % frame_skip != 0 {
                ctx.summary.frames_skipped += 1;
                continue;
            }
            if !frame.image.validate() {
                self.reject_malformed(ctx, &frame);
                continue;
            }

            batch.push(frame);
            if batch.len() >= batch_size {
                self.complete_in_flight(ctx, executor)?;
                let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
                self.submit(ctx, executor, full)?;
                self.transition(PipelineState::Ingesting);
            }
        }

        // End of stream: finish the in-flight batch, then flush the partial one
        self.complete_in_flight(ctx, executor)?;
        if !batch.is_empty() {
            self.submit(ctx, executor, batch)?;
            self.complete_in_flight(ctx, executor)?;
        }
        Ok(LoopEnd::Exhausted)
    }

    fn submit(&mut self, ctx: &mut RunContext, executor: &mut BatchExecutor, frames: Vec<Frame>) -> Result<()> {
        self.transition(PipelineState::Batching);
        let metas: Vec<FrameMeta> = frames.iter().map(FrameMeta::from).collect();
        let images = frames.into_iter().map(|frame| frame.image).collect();

        let batch_id = ctx.next_batch_id;
        ctx.next_batch_id += 1;
        executor.submit(batch_id, images)?;
        ctx.in_flight = Some(metas);
        ctx.summary.batches_submitted += 1;
        Ok(())
    }

    /// Wait for the in-flight batch and post-process its frames in order
    fn complete_in_flight(&mut self, ctx: &mut RunContext, executor: &mut BatchExecutor) -> Result<()> {
        let metas = match ctx.in_flight.take() {
            Some(metas) => metas,
            None => return Ok(()),
        };
        self.transition(PipelineState::Detecting);
        let outcome = executor
            .wait()?
            .ok_or_else(|| TrackGuardError::other("batch executor lost the in-flight batch"))?;

        let BatchOutcome { batch_id, result, .. } = outcome;
        match result {
            Ok(per_frame) => {
                for (meta, detections) in metas.into_iter().zip(per_frame) {
                    self.process_frame(ctx, meta, detections)?;
                }
            }
            Err(e) => {
                let frame_numbers: Vec<u64> = metas.iter().map(|m| m.frame_number).collect();
                log::warn!(
                    "Batch {} failed, skipping frames {:?}: {}",
                    batch_id,
                    frame_numbers,
                    e
                );
                ctx.summary.batches_failed += 1;
                ctx.summary.frames_failed += frame_numbers.len() as u64;
                let report = self
                    .publisher
                    .publish_diagnostic(format!("detector batch {} failed: {}", batch_id, e), frame_numbers);
                ctx.summary.subscribers_pruned += report.pruned as u64;
            }
        }
        Ok(())
    }

    /// Keep a frame whose payload does not fit its dimensions away from the detector
    fn reject_malformed(&mut self, ctx: &mut RunContext, frame: &Frame) {
        let image = &frame.image;
        let message = format!(
            "frame {} dropped: {} payload byte(s) for {}x{} {:?}",
            frame.frame_number,
            image.data.len(),
            image.width,
            image.height,
            image.format
        );
        log::warn!("{}", message);
        ctx.summary.frames_failed += 1;
        let report = self.publisher.publish_diagnostic(message, vec![frame.frame_number]);
        ctx.summary.subscribers_pruned += report.pruned as u64;
    }

    /// Filter -> Persistence -> Risk -> publish for one frame
    fn process_frame(&mut self, ctx: &mut RunContext, meta: FrameMeta, detections: Vec<Detection>) -> Result<()> {
        let filtered = self.filter.filter(&detections, meta.shape);
        let confirmed = self.store.observe(meta.frame_number, filtered)?;
        let speed_kmph = self.config.speed_kmph;
        let assessment = self.risk.assess_frame(confirmed, speed_kmph);

        let progress_percent = ctx.total_frames.map(|total| {
            if total == 0 {
                100.0
            } else {
                (meta.frame_number as f32 / total as f32 * 100.0).min(100.0)
            }
        });
        let result = FrameResult {
            frame_number: meta.frame_number,
            timestamp_s: meta.timestamp_s,
            alert_level: AlertLevel::for_decision(assessment.overall_decision),
            overall_risk_score: assessment.overall_risk_score,
            overall_decision: assessment.overall_decision,
            detections: assessment.detections,
            speed_kmph,
            location: self.geolocator.locate(meta.frame_number),
            progress_percent,
        };

        let summary = &mut ctx.summary;
        summary.frames_processed += 1;
        *summary.decision_counts.entry(result.overall_decision).or_insert(0) += 1;
        summary.peak_risk_score = summary.peak_risk_score.max(result.overall_risk_score);
        if result.is_alert() {
            log::debug!(
                "Frame {}: {} (risk {:.1}, {} detection(s))",
                result.frame_number,
                result.overall_decision,
                result.overall_risk_score,
                result.detections.len()
            );
        }

        let elapsed_s = ctx.start.elapsed().as_secs_f64();
        if self.retain_results {
            ctx.results.push(result.clone());
        }
        let publication = self.publisher.publish(result, elapsed_s)?;
        summary.alerts_written += publication.alerts_written as u64;
        summary.subscribers_pruned += publication.subscribers.pruned as u64;

        if summary.frames_processed % STATS_INTERVAL == 0 {
            log::info!(
                "Pipeline stats: {} read, {} processed, {} failed, {} active tracks, {} alerts",
                summary.frames_read,
                summary.frames_processed,
                summary.frames_failed,
                self.store.len(),
                summary.alerts_written
            );
        }
        Ok(())
    }

    fn transition(&mut self, next: PipelineState) {
        if self.state != next {
            log::trace!("Pipeline state {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    fn fail(&mut self, ctx: &mut RunContext, err: TrackGuardError) -> TrackGuardError {
        log::error!("Pipeline failed: {}", err);
        if let Err(flush_err) = self.publisher.flush() {
            log::warn!("Alert log flush failed: {}", flush_err);
        }
        self.publisher.publish_status(RunStatus::Error, Some(err.to_string()));
        self.finish(ctx, PipelineState::Failed);
        err
    }

    fn finish(&mut self, ctx: &mut RunContext, state: PipelineState) {
        self.state = state;
        let summary = &mut ctx.summary;
        summary.final_state = state;
        summary.active_tracks = self.store.len();
        summary.wall_time_s = ctx.start.elapsed().as_secs_f64();

        log::info!(
            "Pipeline {:?}: {} read, {} skipped, {} processed, {} failed, {}/{} batches failed, {} alerts, peak risk {:.1}, {:.2}s",
            state,
            summary.frames_read,
            summary.frames_skipped,
            summary.frames_processed,
            summary.frames_failed,
            summary.batches_failed,
            summary.batches_submitted,
            summary.alerts_written,
            summary.peak_risk_score,
            summary.wall_time_s
        );
        self.last_summary = Some(summary.clone());
    }
}

/// A pipeline running on a background thread
pub struct PipelineHandle {
    cancel: CancelToken,
    thread: thread::JoinHandle<(FramePipeline, Result<RunReport>)>,
}

impl PipelineHandle {
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the run and get the pipeline back along with its outcome
    pub fn join(self) -> Result<(FramePipeline, Result<RunReport>)> {
        self.thread
            .join()
            .map_err(|_| TrackGuardError::other("pipeline thread panicked"))
    }
}
