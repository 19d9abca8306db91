use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use hazardtrack::{Bbox, Observation, PersistenceParams, TrackPersistenceStore};
use rand::prelude::*;

#[derive(Clone)]
struct Hit {
    label: &'static str,
    bbox: Bbox<f32>,
}

impl Observation for Hit {
    fn class_label(&self) -> &str {
        self.label
    }
    fn bbox(&self) -> &Bbox<f32> {
        &self.bbox
    }
}

fn generate_frames(frames: usize, per_frame: usize) -> Vec<Vec<Hit>> {
    let labels = ["person", "cow", "dog", "car"];
    let mut rng = StdRng::seed_from_u64(7);
    (0..frames)
        .map(|_| {
            (0..per_frame)
                .map(|_| {
                    let x = rng.gen_range(0.0..1800.0);
                    let y = rng.gen_range(400.0..1000.0);
                    Hit {
                        label: labels[rng.gen_range(0..labels.len())],
                        bbox: Bbox::new(x, y, x + 60.0, y + 80.0),
                    }
                })
                .collect()
        })
        .collect()
}

fn bench_observe(c: &mut Criterion) {
    let mut group = c.benchmark_group("persistence_observe");

    for &per_frame in [5usize, 20, 80].iter() {
        let frames = generate_frames(200, per_frame);
        group.bench_with_input(BenchmarkId::from_parameter(per_frame), &frames, |b, frames| {
            b.iter(|| {
                let mut store = TrackPersistenceStore::new(PersistenceParams::default());
                for (idx, hits) in frames.iter().enumerate() {
                    let confirmed = store.observe(idx as u64 * 2, hits.clone()).unwrap();
                    black_box(confirmed);
                }
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_observe);
criterion_main!(benches);
