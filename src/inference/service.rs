//! The predictor: a fixed pool of workers behind one synchronous entry point.
//!
//! Requests travel over a shared unbounded queue; whichever worker is idle
//! takes the next one. Each worker owns its model outright, so evaluation needs
//! no locking. Shutdown closes the queue, cancels whatever is still waiting in
//! it, and lets in-flight evaluations run to completion.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};

use super::context::{Context, Wait};
use super::domain::{Counters, Lifecycle, PredictorStats, Request};
use super::model::{BoosterLoader, ModelLoader};
use super::workers::Worker;
use crate::common::config::{PredictorConfig, PredictorOptions};
use crate::common::error::{BoostError, BoostResult};
use crate::data::FeatureVector;

/// Concurrent prediction dispatcher.
///
/// `Predictor` is `Send + Sync`; share it by reference or behind an `Arc`.
pub struct Predictor {
    ingress: RwLock<Option<Sender<Request>>>,
    shutdown: Arc<AtomicBool>,
    lifecycle: Mutex<Lifecycle>,
    // Never carries a message; disconnects when the last worker has released its model.
    drained: Receiver<()>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<Counters>,
    num_workers: usize,
    model_path: PathBuf,
}

impl Predictor {
    /// Load `num_workers` boosters from `model_path` and start serving.
    pub fn new(
        model_path: impl AsRef<Path>,
        num_workers: usize,
        options: PredictorOptions,
    ) -> BoostResult<Self> {
        Self::with_loader(BoosterLoader, model_path, num_workers, options)
    }

    /// Start a booster pool from a validated configuration snapshot.
    pub fn from_config(cfg: &PredictorConfig) -> BoostResult<Self> {
        cfg.validate()?;
        Self::new(&cfg.model_path, cfg.workers, cfg.options.clone())
    }

    /// Start a pool whose models come from `loader`.
    ///
    /// Every model is loaded before any worker starts. If one load fails, the
    /// models loaded so far are dropped and the error names the failing worker.
    pub fn with_loader<L: ModelLoader>(
        loader: L,
        model_path: impl AsRef<Path>,
        num_workers: usize,
        options: PredictorOptions,
    ) -> BoostResult<Self> {
        if num_workers == 0 {
            return Err(BoostError::config("num_workers must be at least 1"));
        }
        let model_path = model_path.as_ref().to_path_buf();

        let mut models = Vec::with_capacity(num_workers);
        for worker in 0..num_workers {
            let model = loader
                .load(&model_path, &options.params)
                .map_err(|source| BoostError::ModelLoad {
                    path: model_path.clone(),
                    worker,
                    source: Box::new(source),
                })?;
            models.push(model);
        }

        let (tx, rx) = crossbeam_channel::unbounded::<Request>();
        let (done_tx, drained) = crossbeam_channel::bounded::<()>(0);
        let shutdown = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(Counters::default());

        let mut handles = Vec::with_capacity(num_workers);
        for (id, model) in models.into_iter().enumerate() {
            let worker = Worker::new(
                id,
                model,
                options.missing,
                options.predict,
                shutdown.clone(),
                counters.clone(),
            );
            match worker.spawn(rx.clone(), done_tx.clone()) {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    shutdown.store(true, Ordering::Release);
                    drop(tx);
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(err.into());
                }
            }
        }

        info!(
            workers = num_workers,
            model = %model_path.display(),
            "predictor started"
        );

        Ok(Self {
            ingress: RwLock::new(Some(tx)),
            shutdown,
            lifecycle: Mutex::new(Lifecycle::Ready),
            drained,
            handles: Mutex::new(handles),
            counters,
            num_workers,
            model_path,
        })
    }

    /// Predict and block until a worker answers.
    pub fn predict<V: FeatureVector>(&self, input: V) -> BoostResult<Vec<f32>> {
        self.predict_with(&Context::background(), input)
    }

    /// Predict, giving up waiting when `ctx` ends.
    ///
    /// Giving up does not abort an evaluation a worker already started; a
    /// request that has not started yet is skipped by the worker.
    pub fn predict_with<V: FeatureVector>(&self, ctx: &Context, input: V) -> BoostResult<Vec<f32>> {
        if let Some(err) = ctx.err() {
            return Err(err);
        }

        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        {
            let ingress = self.ingress.read();
            let sent = match ingress.as_ref() {
                Some(tx) => tx
                    .send(Request::new(Box::new(input), ctx.clone(), reply_tx))
                    .is_ok(),
                None => false,
            };
            if !sent {
                Counters::bump(&self.counters.rejected);
                return Err(BoostError::Unavailable);
            }
            Counters::bump(&self.counters.accepted);
        }

        match ctx.wait(&reply_rx) {
            Wait::Ready(response) => response,
            Wait::Disconnected => Err(BoostError::Internal(
                "worker dropped a request without answering".into(),
            )),
            Wait::Interrupted(err) => Err(err),
        }
    }

    /// Stop accepting work and wait, bounded by `ctx`, for every worker to finish.
    ///
    /// When `ctx` ends first the error is returned while workers keep draining
    /// in the background. Calling `close` again never releases anything twice;
    /// it returns `Ok` once draining has finished.
    pub fn close(&self, ctx: &Context) -> BoostResult<()> {
        {
            let mut state = self.lifecycle.lock();
            match *state {
                Lifecycle::Closed => return Ok(()),
                Lifecycle::Ready => {
                    *state = Lifecycle::Closing;
                    self.begin_shutdown();
                    info!(model = %self.model_path.display(), "predictor closing");
                }
                Lifecycle::Closing => {}
            }
        }

        match ctx.wait(&self.drained) {
            Wait::Ready(()) | Wait::Disconnected => {
                self.finish();
                Ok(())
            }
            Wait::Interrupted(err) => {
                warn!(error = %err, "predictor close interrupted, workers still draining");
                Err(err)
            }
        }
    }

    /// Current lifecycle state. Reports `Closed` as soon as draining has finished,
    /// even if no `close` call has observed it yet.
    pub fn state(&self) -> Lifecycle {
        let state = *self.lifecycle.lock();
        if state == Lifecycle::Closing
            && matches!(self.drained.try_recv(), Err(TryRecvError::Disconnected))
        {
            self.finish();
            return Lifecycle::Closed;
        }
        state
    }

    /// Snapshot of the request counters.
    pub fn stats(&self) -> PredictorStats {
        self.counters.snapshot(self.num_workers)
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    fn begin_shutdown(&self) {
        let sender = self.ingress.write().take();
        self.shutdown.store(true, Ordering::Release);
        drop(sender);
    }

    fn finish(&self) {
        let mut state = self.lifecycle.lock();
        if *state == Lifecycle::Closed {
            return;
        }
        for handle in self.handles.lock().drain(..) {
            if handle.join().is_err() {
                warn!("worker thread panicked");
            }
        }
        *state = Lifecycle::Closed;

        let stats = self.counters.snapshot(self.num_workers);
        info!(
            accepted = stats.accepted,
            completed = stats.completed,
            failed = stats.failed,
            cancelled = stats.cancelled,
            rejected = stats.rejected,
            "predictor closed"
        );
    }
}

impl Drop for Predictor {
    fn drop(&mut self) {
        if *self.lifecycle.get_mut() == Lifecycle::Ready {
            self.begin_shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use super::*;
    use crate::data::{DMatrix, FloatSliceVector};
    use crate::inference::model::{FnLoader, Model, ModelParams};
    use crate::training::PredictOptions;

    /// Test model that can be slowed down and counts its releases.
    struct Probe {
        delay: Duration,
        released: Arc<AtomicUsize>,
    }

    impl Model for Probe {
        fn predict(&mut self, m: &DMatrix, _: &PredictOptions) -> BoostResult<Vec<f32>> {
            std::thread::sleep(self.delay);
            Ok((0..m.num_row()).map(|r| m.row(r).iter().sum()).collect())
        }
    }

    impl Drop for Probe {
        fn drop(&mut self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn probe_pool(workers: usize, delay: Duration) -> (Predictor, Arc<AtomicUsize>) {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        let loader = FnLoader(move |_: &Path, _: &ModelParams| -> BoostResult<Probe> {
            Ok(Probe {
                delay,
                released: counter.clone(),
            })
        });
        let predictor =
            Predictor::with_loader(loader, "probe", workers, PredictorOptions::default()).unwrap();
        (predictor, released)
    }

    #[test]
    fn rejects_zero_workers() {
        let loader = FnLoader(|_: &Path, _: &ModelParams| -> BoostResult<Probe> {
            unreachable!("no model should be loaded")
        });
        let err = Predictor::with_loader(loader, "probe", 0, PredictorOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, BoostError::InvalidConfig(_)));
    }

    #[test]
    fn failed_load_releases_earlier_models() {
        let released = Arc::new(AtomicUsize::new(0));
        let loaded = Arc::new(AtomicUsize::new(0));
        let (r, l) = (released.clone(), loaded.clone());
        let loader = FnLoader(move |_: &Path, _: &ModelParams| -> BoostResult<Probe> {
            if l.fetch_add(1, Ordering::SeqCst) == 2 {
                return Err(BoostError::invalid("corrupt model"));
            }
            Ok(Probe {
                delay: Duration::ZERO,
                released: r.clone(),
            })
        });

        let err = Predictor::with_loader(loader, "probe", 4, PredictorOptions::default())
            .err()
            .unwrap();
        match err {
            BoostError::ModelLoad { worker, .. } => assert_eq!(worker, 2),
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(released.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn predicts_and_closes() {
        let (p, released) = probe_pool(2, Duration::ZERO);
        assert_eq!(p.state(), Lifecycle::Ready);
        assert_eq!(p.predict(FloatSliceVector(vec![1.0, 2.0, 3.0])).unwrap(), vec![6.0]);

        p.close(&Context::background()).unwrap();
        assert_eq!(p.state(), Lifecycle::Closed);
        assert_eq!(released.load(Ordering::SeqCst), 2);

        let err = p.predict(vec![1.0f32]).unwrap_err();
        assert!(err.is_unavailable());
        assert_eq!(p.stats().rejected, 1);
    }

    #[test]
    fn close_is_idempotent() {
        let (p, released) = probe_pool(3, Duration::ZERO);
        p.close(&Context::background()).unwrap();
        p.close(&Context::background()).unwrap();
        drop(p);
        assert_eq!(released.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn close_times_out_but_drains_in_background() {
        let (p, released) = probe_pool(1, Duration::from_millis(300));
        let p = Arc::new(p);

        let caller = {
            let p = p.clone();
            std::thread::spawn(move || p.predict(vec![1.0f32]))
        };
        // Let the worker pick the request up.
        std::thread::sleep(Duration::from_millis(50));

        let err = p.close(&Context::with_timeout(Duration::from_millis(10))).unwrap_err();
        assert!(matches!(err, BoostError::DeadlineExceeded));
        assert_eq!(p.state(), Lifecycle::Closing);
        assert!(p.predict(vec![1.0f32]).unwrap_err().is_unavailable());

        // The in-flight request still completes.
        assert_eq!(caller.join().unwrap().unwrap(), vec![1.0]);
        p.close(&Context::with_timeout(Duration::from_secs(5))).unwrap();
        assert_eq!(p.state(), Lifecycle::Closed);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn queued_requests_are_cancelled_on_close() {
        let (p, _) = probe_pool(1, Duration::from_millis(200));
        let p = Arc::new(p);

        let callers: Vec<_> = (0..3)
            .map(|i| {
                let p = p.clone();
                std::thread::spawn(move || p.predict(vec![i as f32]))
            })
            .collect();
        std::thread::sleep(Duration::from_millis(50));
        p.close(&Context::background()).unwrap();

        let results: Vec<_> = callers.into_iter().map(|c| c.join().unwrap()).collect();
        let ok = results.iter().filter(|r| r.is_ok()).count();
        let cancelled = results
            .iter()
            .filter(|r| matches!(r, Err(BoostError::Cancelled)))
            .count();
        assert_eq!(ok, 1);
        assert_eq!(cancelled, 2);
        assert_eq!(p.stats().cancelled, 2);
    }

    #[test]
    fn caller_can_stop_waiting() {
        let (p, _) = probe_pool(1, Duration::from_millis(200));
        let err = p
            .predict_with(&Context::with_timeout(Duration::from_millis(20)), vec![1.0f32])
            .unwrap_err();
        assert!(matches!(err, BoostError::DeadlineExceeded));

        // The worker is still usable afterwards.
        assert_eq!(p.predict(vec![2.0f32]).unwrap(), vec![2.0]);
    }

    #[test]
    fn expired_context_is_not_enqueued() {
        let (p, _) = probe_pool(1, Duration::ZERO);
        let (ctx, handle) = Context::with_cancel();
        handle.cancel();
        assert!(matches!(p.predict_with(&ctx, vec![1.0f32]), Err(BoostError::Cancelled)));
        assert_eq!(p.stats().accepted, 0);
    }

    #[test]
    fn panicking_input_does_not_shrink_the_pool() {
        struct Unconvertible;
        impl FeatureVector for Unconvertible {
            fn to_matrix(&self, _: f32) -> BoostResult<DMatrix> {
                panic!("cannot vectorise");
            }
        }

        let (p, _) = probe_pool(1, Duration::ZERO);
        assert!(matches!(p.predict(Unconvertible), Err(BoostError::Evaluation(_))));
        assert_eq!(p.predict(vec![4.0f32, 5.0]).unwrap(), vec![9.0]);
        assert_eq!(p.state(), Lifecycle::Ready);
        assert_eq!(p.stats().rejected, 0);
    }

    #[test]
    fn drop_releases_models() {
        let (p, released) = probe_pool(2, Duration::ZERO);
        p.predict(vec![1.0f32]).unwrap();
        drop(p);
        for _ in 0..100 {
            if released.load(Ordering::SeqCst) == 2 {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("models were not released after drop");
    }
}
