/// Hazard pipeline demo with a mock detector
///
/// Runs a synthetic 1280x720 stream through the full pipeline, prints every
/// subscriber message as JSON on stdout, and mirrors the stream to an async
/// (tokio) subscriber that tallies decisions.
///
/// Usage:
///   cargo run --example mock_run [--config cfg.json] [--frames N] [--speed KMPH] [--alerts alerts.jsonl]
///
/// Examples:
///   cargo run --release --example mock_run -- --frames 600
///   RUST_LOG=debug cargo run --example mock_run -- --speed 40 --alerts /tmp/alerts.jsonl
use std::collections::BTreeMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use trackguard::{
    AlertSink, Bbox, JsonLinesAlertLog, MemoryAlertLog, MockDetector, PipelineConfig,
    RawDetection, SubscriberMessage, SubscriberRegistry, SyntheticFrameSource, TargetClass,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("TrackGuard {}", trackguard::version());

    let args: Vec<String> = env::args().collect();
    let mut config_path: Option<String> = None;
    let mut frames: u64 = 300;
    let mut speed: Option<f32> = None;
    let mut alerts_path: Option<String> = None;

    let mut arg_idx = 1;
    while arg_idx < args.len() {
        let value = args.get(arg_idx + 1).cloned();
        match (args[arg_idx].as_str(), value) {
            ("--config", Some(v)) => config_path = Some(v),
            ("--frames", Some(v)) => frames = v.parse()?,
            ("--speed", Some(v)) => speed = Some(v.parse()?),
            ("--alerts", Some(v)) => alerts_path = Some(v),
            (flag, _) => {
                eprintln!("Unknown or incomplete argument: {}", flag);
                return Ok(());
            }
        }
        arg_idx += 2;
    }

    let mut config = match &config_path {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(speed) = speed {
        config.speed_kmph = speed;
        config.validate()?;
    }

    let registry = Arc::new(SubscriberRegistry::new(config.fanout.subscriber_queue_depth));
    let (_, json_rx) = registry.subscribe_channel();
    let (_, mut async_rx) = registry.subscribe_async();

    let sink: Box<dyn AlertSink> = match &alerts_path {
        Some(path) => Box::new(JsonLinesAlertLog::create(path)?),
        None => Box::new(MemoryAlertLog::new()),
    };

    // A cow standing in the lane keeps the decision path busy
    let detector = MockDetector::new(42)
        .with_latency(Duration::from_millis(15))
        .with_pinned(RawDetection::new(
            TargetClass::Class(19),
            0.88,
            Bbox::new(300.0, 470.0, 340.0, 530.0),
        ));

    let pipeline = trackguard::FramePipeline::new(config, Box::new(detector), Arc::clone(&registry), sink)?;
    let source = SyntheticFrameSource::new(1280, 720, 30.0).with_total(frames);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()?;
    let tally = runtime.spawn(async move {
        let mut decisions: BTreeMap<String, u64> = BTreeMap::new();
        while let Some(message) = async_rx.recv().await {
            if let SubscriberMessage::FrameResult(result) = &*message {
                *decisions.entry(result.overall_decision.to_string()).or_insert(0) += 1;
            }
        }
        decisions
    });

    let handle = pipeline.spawn(Box::new(source))?;
    let printer = std::thread::spawn(move || {
        for message in json_rx.iter() {
            match message.to_json() {
                Ok(line) => println!("{}", line),
                Err(e) => eprintln!("Failed to serialize message: {}", e),
            }
        }
    });

    let (pipeline, outcome) = handle.join()?;
    let report = outcome?;
    // Dropping the pipeline drops the registry's senders and ends both consumers
    drop(pipeline);
    drop(registry);
    printer.join().ok();
    let decisions = runtime.block_on(tally)?;

    eprintln!("\nRun summary:");
    eprintln!("{}", serde_json::to_string_pretty(&report.summary)?);
    eprintln!("Decisions seen by async subscriber: {:?}", decisions);
    Ok(())
}
