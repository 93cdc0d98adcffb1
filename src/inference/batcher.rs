//! Batching prediction service.
//!
//! A single background thread drains the shared request queue, groups up to `batch_size`
//! requests, evaluates them with one `predict_batch` call and answers every requester with
//! the row at its position in the batch. With a timeout configured, a partial batch is
//! evaluated once the oldest waiting request has been queued for longer than the timeout.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tch::Tensor;

use crate::inference::channel::{
    open_channels, InferenceChannel, InferenceRequest, InferenceResponse, ServiceEndpoints,
};
use crate::neural::{Prediction, Predictor};
use crate::{EngineError, Result};

/// Counters shared with the service thread.
#[derive(Debug, Default)]
pub struct ServiceStats {
    batches: AtomicU64,
    requests: AtomicU64,
    timed_out_batches: AtomicU64,
    failed_batches: AtomicU64,
}

impl ServiceStats {
    pub fn batches(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }

    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn timed_out_batches(&self) -> u64 {
        self.timed_out_batches.load(Ordering::Relaxed)
    }

    pub fn failed_batches(&self) -> u64 {
        self.failed_batches.load(Ordering::Relaxed)
    }
}

pub struct PredictionService {
    channels: Vec<InferenceChannel>,
    endpoints: Option<ServiceEndpoints>,
    predictor: Arc<dyn Predictor>,
    batch_size: usize,
    timeout: Option<Duration>,
    stats: Arc<ServiceStats>,
    handle: Option<JoinHandle<()>>,
}

impl PredictionService {
    /// Creates a stopped service with `num_channels` channels. `timeout` enables degraded
    /// (smaller) batches instead of waiting indefinitely for a full one.
    pub fn new(
        predictor: Arc<dyn Predictor>,
        num_channels: usize,
        batch_size: usize,
        timeout: Option<Duration>,
    ) -> Self {
        let (channels, endpoints) = open_channels(num_channels);
        Self {
            channels,
            endpoints: Some(endpoints),
            predictor,
            batch_size: batch_size.max(1),
            timeout,
            stats: Arc::new(ServiceStats::default()),
            handle: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Spawns the service thread. Calling it on a running service is a no-op.
    pub fn start(&mut self) -> Result<()> {
        let Some(endpoints) = self.endpoints.take() else {
            return Ok(());
        };

        let batcher = Batcher {
            predictor: Arc::clone(&self.predictor),
            responders: endpoints.responders,
            batch_size: self.batch_size,
            timeout: self.timeout,
            stats: Arc::clone(&self.stats),
        };
        let requests = endpoints.requests;

        let handle = thread::Builder::new()
            .name("prediction-service".to_string())
            .spawn(move || batcher.run(requests))?;
        self.handle = Some(handle);
        Ok(())
    }

    pub fn channels(&self) -> &[InferenceChannel] {
        &self.channels
    }

    pub fn stats(&self) -> &ServiceStats {
        &self.stats
    }
}

impl Drop for PredictionService {
    fn drop(&mut self) {
        // Dropping every request sender ends the service loop.
        self.channels.clear();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("prediction service thread panicked");
            }
        }
    }
}

struct Batcher {
    predictor: Arc<dyn Predictor>,
    responders: Vec<SyncSender<InferenceResponse>>,
    batch_size: usize,
    timeout: Option<Duration>,
    stats: Arc<ServiceStats>,
}

impl Batcher {
    fn run(self, requests: Receiver<InferenceRequest>) {
        log::debug!(
            "prediction service started (batch size {}, timeout {:?})",
            self.batch_size,
            self.timeout
        );
        while let Some(batch) = self.collect_batch(&requests) {
            self.dispatch(batch);
        }
        log::debug!("prediction service stopped");
    }

    /// Blocks for the first request, then fills the batch. Returns `None` once every
    /// channel is gone and the queue is empty.
    fn collect_batch(&self, requests: &Receiver<InferenceRequest>) -> Option<Vec<InferenceRequest>> {
        let first = requests.recv().ok()?;
        let started = Instant::now();
        let mut batch = Vec::with_capacity(self.batch_size);
        batch.push(first);

        while batch.len() < self.batch_size {
            let next = match self.timeout {
                Some(timeout) => {
                    match requests.recv_timeout(timeout.saturating_sub(started.elapsed())) {
                        Ok(request) => request,
                        Err(RecvTimeoutError::Timeout) => {
                            log::debug!(
                                "batch timed out with {}/{} requests",
                                batch.len(),
                                self.batch_size
                            );
                            self.stats.timed_out_batches.fetch_add(1, Ordering::Relaxed);
                            break;
                        }
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                None => match requests.recv() {
                    Ok(request) => request,
                    Err(_) => break,
                },
            };
            batch.push(next);
        }

        Some(batch)
    }

    fn dispatch(&self, batch: Vec<InferenceRequest>) {
        let (ids, planes): (Vec<usize>, Vec<Tensor>) = batch
            .into_iter()
            .map(|request| (request.channel_id, request.planes))
            .unzip();

        log::trace!("evaluating batch of {} requests", ids.len());
        self.stats.batches.fetch_add(1, Ordering::Relaxed);
        self.stats.requests.fetch_add(ids.len() as u64, Ordering::Relaxed);

        match self.evaluate(&planes) {
            Ok(predictions) => {
                for (id, prediction) in ids.into_iter().zip(predictions) {
                    self.respond(id, Ok(prediction));
                }
            }
            Err(err) => {
                log::error!("batch prediction failed: {}", err);
                self.stats.failed_batches.fetch_add(1, Ordering::Relaxed);
                let message = err.to_string();
                for id in ids {
                    self.respond(id, Err(message.clone()));
                }
            }
        }
    }

    fn evaluate(&self, planes: &[Tensor]) -> Result<Vec<Prediction>> {
        let batch = Tensor::f_stack(planes, 0)?;
        let predictions = self.predictor.predict_batch(&batch)?;
        if predictions.len() != planes.len() {
            return Err(EngineError::Prediction(format!(
                "predictor returned {} rows for a batch of {}",
                predictions.len(),
                planes.len()
            )));
        }
        Ok(predictions)
    }

    fn respond(&self, id: usize, response: InferenceResponse) {
        match self.responders.get(id) {
            Some(responder) => {
                if responder.send(response).is_err() {
                    log::warn!("channel {} closed before its prediction was delivered", id);
                }
            }
            None => log::error!("request from unknown channel {}", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neural::UniformPredictor;
    use assert_matches::assert_matches;
    use std::sync::Mutex;

    /// Echoes the first input feature as the value and records batch sizes.
    #[derive(Default)]
    struct EchoPredictor {
        batch_sizes: Mutex<Vec<usize>>,
    }

    impl Predictor for EchoPredictor {
        fn predict_single(&self, planes: &Tensor) -> Result<Prediction> {
            let value = planes.flatten(0, -1).double_value(&[0]) as f32;
            Ok(Prediction {
                value,
                policy: vec![1.0],
            })
        }

        fn predict_batch(&self, batch: &Tensor) -> Result<Vec<Prediction>> {
            let rows = batch.size()[0];
            self.batch_sizes.lock().unwrap().push(rows as usize);
            (0..rows).map(|i| self.predict_single(&batch.get(i))).collect()
        }
    }

    struct FailingPredictor;

    impl Predictor for FailingPredictor {
        fn predict_single(&self, _planes: &Tensor) -> Result<Prediction> {
            Err(EngineError::Prediction("network offline".to_string()))
        }
    }

    fn planes(fill: f64) -> Tensor {
        Tensor::full([2, 2], fill, tch::kind::FLOAT_CPU)
    }

    #[test]
    fn test_lazy_start() {
        let mut service = PredictionService::new(Arc::new(UniformPredictor::new(0.0, 4)), 1, 1, None);
        assert!(!service.is_running());
        service.start().unwrap();
        assert!(service.is_running());
        service.start().unwrap();
        assert!(service.is_running());
    }

    #[test]
    fn test_single_request_round_trip() {
        let mut service = PredictionService::new(Arc::new(UniformPredictor::new(0.5, 4)), 1, 1, None);
        service.start().unwrap();

        let prediction = service.channels()[0].predict(planes(0.0)).unwrap();
        assert_eq!(prediction.value, 0.5);
        assert_eq!(prediction.policy, vec![0.25; 4]);
        assert_eq!(service.stats().batches(), 1);
        assert_eq!(service.stats().requests(), 1);
    }

    #[test]
    fn test_full_batches_route_rows_to_requesters() {
        let predictor = Arc::new(EchoPredictor::default());
        let mut service = PredictionService::new(predictor.clone(), 4, 4, None);
        service.start().unwrap();

        thread::scope(|s| {
            for channel in service.channels() {
                s.spawn(move || {
                    let id = channel.id();
                    let prediction = channel.predict(planes(id as f64)).unwrap();
                    assert_eq!(prediction.value, id as f32);
                });
            }
        });

        assert_eq!(*predictor.batch_sizes.lock().unwrap(), vec![4]);
        assert_eq!(service.stats().requests(), 4);
    }

    #[test]
    fn test_batches_split_by_batch_size() {
        let predictor = Arc::new(EchoPredictor::default());
        let mut service = PredictionService::new(predictor.clone(), 4, 2, None);
        service.start().unwrap();

        thread::scope(|s| {
            for channel in service.channels() {
                s.spawn(move || channel.predict(planes(1.0)).unwrap());
            }
        });

        assert_eq!(*predictor.batch_sizes.lock().unwrap(), vec![2, 2]);
    }

    #[test]
    fn test_timeout_runs_partial_batch() {
        let predictor = Arc::new(EchoPredictor::default());
        let mut service =
            PredictionService::new(predictor.clone(), 2, 2, Some(Duration::from_millis(20)));
        service.start().unwrap();

        let prediction = service.channels()[1].predict(planes(3.0)).unwrap();
        assert_eq!(prediction.value, 3.0);
        assert_eq!(*predictor.batch_sizes.lock().unwrap(), vec![1]);
        assert_eq!(service.stats().timed_out_batches(), 1);
    }

    #[test]
    fn test_failure_reaches_every_requester() {
        let mut service = PredictionService::new(Arc::new(FailingPredictor), 2, 2, None);
        service.start().unwrap();

        thread::scope(|s| {
            for channel in service.channels() {
                s.spawn(move || {
                    let result = channel.predict(planes(0.0));
                    assert_matches!(result, Err(EngineError::Prediction(msg)) if msg.contains("network offline"));
                });
            }
        });

        assert_eq!(service.stats().failed_batches(), 1);
    }

    #[test]
    fn test_drop_stops_service_thread() {
        let mut service = PredictionService::new(Arc::new(UniformPredictor::new(0.0, 1)), 2, 1, None);
        service.start().unwrap();
        service.channels()[0].predict(planes(0.0)).unwrap();
        drop(service);
    }
}
