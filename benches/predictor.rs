use std::sync::Arc;
use std::thread;

use boostpool::{Booster, DMatrix, FloatSliceVector, Predictor, PredictorOptions};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::prelude::*;

const FEATURES: usize = 10;

fn train_model(dir: &tempfile::TempDir) -> std::path::PathBuf {
    let mut rng = StdRng::seed_from_u64(7);
    let rows = 2000;
    let data: Vec<f32> = (0..rows * FEATURES).map(|_| rng.gen::<f32>() * 10.0).collect();
    let labels: Vec<f32> = data
        .chunks(FEATURES)
        .map(|row| row.iter().sum::<f32>() + rng.gen::<f32>() * 0.1)
        .collect();

    let mut matrix = DMatrix::from_dense(&data, rows, FEATURES, f32::NAN).unwrap();
    matrix.set_float_info("label", &labels).unwrap();
    let mut booster = Booster::create(&[&matrix]).unwrap();
    booster.set_param("max_depth", "6").unwrap();
    booster.set_param("eta", "0.1").unwrap();
    for iter in 0..100 {
        booster.update_one_iter(iter, &matrix).unwrap();
    }

    let path = dir.path().join("bench.json");
    booster.save_model(&path).unwrap();
    path
}

fn bench_single_worker(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let path = train_model(&dir);
    let predictor = Predictor::new(&path, 1, PredictorOptions::default()).unwrap();
    let row: Vec<f32> = (0..FEATURES).map(|i| i as f32).collect();

    c.bench_function("predict/single_worker", |b| {
        b.iter(|| predictor.predict(black_box(FloatSliceVector(row.clone()))).unwrap())
    });
}

fn bench_parallel_callers(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let path = train_model(&dir);
    let workers = boostpool::common::config::default_workers();
    let predictor = Arc::new(Predictor::new(&path, workers, PredictorOptions::default()).unwrap());

    let mut group = c.benchmark_group("predict/parallel");
    group.sample_size(20);
    for callers in [1usize, 4, 16] {
        let per_caller = 64;
        group.throughput(Throughput::Elements((callers * per_caller) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(callers), &callers, |b, &callers| {
            b.iter(|| {
                let handles: Vec<_> = (0..callers)
                    .map(|caller| {
                        let predictor = predictor.clone();
                        thread::spawn(move || {
                            for i in 0..per_caller {
                                let row: Vec<f32> =
                                    (0..FEATURES).map(|f| (caller + i + f) as f32).collect();
                                predictor.predict(row).unwrap();
                            }
                        })
                    })
                    .collect();
                for handle in handles {
                    handle.join().unwrap();
                }
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_single_worker, bench_parallel_callers);
criterion_main!(benches);
