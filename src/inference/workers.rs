//! Worker threads, each owning one model for its whole life.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use tracing::debug;

use super::domain::{Counters, Request, Response};
use super::model::Model;
use crate::common::error::BoostError;
use crate::data::FeatureVector;
use crate::training::PredictOptions;

pub(crate) struct Worker<M: Model> {
    id: usize,
    model: M,
    missing: f32,
    options: PredictOptions,
    shutdown: Arc<AtomicBool>,
    counters: Arc<Counters>,
}

impl<M: Model> Worker<M> {
    pub(crate) fn new(
        id: usize,
        model: M,
        missing: f32,
        options: PredictOptions,
        shutdown: Arc<AtomicBool>,
        counters: Arc<Counters>,
    ) -> Self {
        Self {
            id,
            model,
            missing,
            options,
            shutdown,
            counters,
        }
    }

    /// Start the worker on its own thread. `done` is dropped once the model is released.
    pub(crate) fn spawn(self, rx: Receiver<Request>, done: Sender<()>) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(format!("boostpool-worker-{}", self.id))
            .spawn(move || {
                let _done = done;
                self.run(rx);
            })
    }

    /// Serve requests until the queue is closed and empty.
    ///
    /// Once shutdown is flagged, queued requests are answered with `Cancelled`
    /// instead of being evaluated.
    pub(crate) fn run(mut self, rx: Receiver<Request>) {
        debug!(worker = self.id, "worker started");
        let mut served = 0u64;

        for request in rx.iter() {
            if self.shutdown.load(Ordering::Acquire) {
                Counters::bump(&self.counters.cancelled);
                request.respond(Err(BoostError::Cancelled));
                continue;
            }
            if let Some(err) = request.ctx.err() {
                Counters::bump(&self.counters.cancelled);
                request.respond(Err(err));
                continue;
            }

            let response = self.process(request.input.as_ref());
            match &response {
                Ok(_) => Counters::bump(&self.counters.completed),
                Err(_) => Counters::bump(&self.counters.failed),
            }
            served += 1;
            request.respond(response);
        }

        debug!(worker = self.id, served, "worker stopped");
    }

    /// Convert and evaluate one input. A panic in either step fails only this request.
    fn process(&mut self, input: &dyn FeatureVector) -> Response {
        let missing = self.missing;
        let model = &mut self.model;
        let options = &self.options;
        let evaluate = || -> Response {
            let matrix = input.to_matrix(missing)?;
            model.predict(&matrix, options)
        };
        match panic::catch_unwind(AssertUnwindSafe(evaluate)) {
            Ok(result) => result,
            Err(_) => {
                debug!(worker = self.id, "prediction panicked");
                Err(BoostError::Evaluation("prediction panicked".into()))
            }
        }
    }
}
