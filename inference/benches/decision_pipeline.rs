use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use hazardtrack::TrackPersistenceStore;
use rand::prelude::*;
use trackguard::{Bbox, Detection, DetectionFilter, FrameShape, PipelineConfig, RiskEngine};

const FRAME: FrameShape = FrameShape {
    width: 1280,
    height: 720,
};

/// Frames of detections where some objects persist and the rest is noise
fn generate_frames(frames: usize, per_frame: usize) -> Vec<Vec<Detection>> {
    let labels = ["person", "cow", "dog", "car", "truck", "chair"];
    let mut rng = StdRng::seed_from_u64(11);
    let anchors: Vec<(f32, f32)> = (0..per_frame / 2)
        .map(|_| (rng.gen_range(300.0..900.0), rng.gen_range(350.0..650.0)))
        .collect();

    (0..frames)
        .map(|_| {
            let mut detections: Vec<Detection> = anchors
                .iter()
                .enumerate()
                .map(|(i, &(x, y))| {
                    let jitter = rng.gen_range(-3.0..3.0);
                    Detection::new(
                        Bbox::new(x + jitter, y, x + 60.0 + jitter, y + 70.0),
                        labels[i % labels.len()],
                        rng.gen_range(0.3..0.95),
                    )
                })
                .collect();
            while detections.len() < per_frame {
                let x = rng.gen_range(0.0..1200.0);
                let y = rng.gen_range(0.0..650.0);
                detections.push(Detection::new(
                    Bbox::new(x, y, x + rng.gen_range(10.0..80.0), y + rng.gen_range(10.0..70.0)),
                    labels[rng.gen_range(0..labels.len())],
                    rng.gen_range(0.1..0.95),
                ));
            }
            detections
        })
        .collect()
}

fn bench_decision_path(c: &mut Criterion) {
    let config = PipelineConfig::default();
    let filter = DetectionFilter::new(config.filter.clone());
    let engine = RiskEngine::new(
        config.kinematics.clone(),
        config.decision.clone(),
        config.risk.clone(),
    );

    let mut group = c.benchmark_group("filter_persist_assess");
    for &per_frame in [4usize, 16, 64].iter() {
        let frames = generate_frames(120, per_frame);
        group.throughput(Throughput::Elements(frames.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(per_frame), &frames, |b, frames| {
            b.iter(|| {
                let mut store = TrackPersistenceStore::new(config.tracking.clone());
                for (idx, detections) in frames.iter().enumerate() {
                    let filtered = filter.filter(detections, FRAME);
                    let confirmed = store.observe((idx as u64 + 1) * 2, filtered).unwrap();
                    black_box(engine.assess_frame(confirmed, config.speed_kmph));
                }
            })
        });
    }
    group.finish();
}

fn bench_single_assessment(c: &mut Criterion) {
    let config = PipelineConfig::default();
    let engine = RiskEngine::new(config.kinematics, config.decision, config.risk);

    c.bench_function("risk_score_and_decision", |b| {
        b.iter(|| {
            let score = engine.risk_score(black_box(70.0), 0.9, 80.0, "cow");
            let decision = engine.decide(black_box(70.0), 3.15, 80.0);
            black_box((score, decision))
        })
    });
}

criterion_group!(benches, bench_decision_path, bench_single_assessment);
criterion_main!(benches);
