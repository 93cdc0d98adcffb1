use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Mutex, PoisonError};

use tch::Tensor;

use crate::neural::Prediction;
use crate::{EngineError, Result};

pub(crate) struct InferenceRequest {
    pub channel_id: usize,
    pub planes: Tensor,
}

/// Prediction failures travel back as text so every requester of a failed batch gets its own copy.
pub(crate) type InferenceResponse = std::result::Result<Prediction, String>;

/// One worker's conduit to the prediction service. At most one request is in flight per channel.
pub struct InferenceChannel {
    id: usize,
    requests: SyncSender<InferenceRequest>,
    responses: Mutex<Receiver<InferenceResponse>>,
}

impl InferenceChannel {
    pub fn id(&self) -> usize {
        self.id
    }

    /// Submits `planes` and blocks until the batched result for this request arrives.
    pub fn predict(&self, planes: Tensor) -> Result<Prediction> {
        // Receiver stays locked for the whole round trip: the response slot belongs to this request.
        let responses = self.responses.lock().unwrap_or_else(PoisonError::into_inner);

        self.requests
            .send(InferenceRequest {
                channel_id: self.id,
                planes,
            })
            .map_err(|_| {
                EngineError::InferenceUnavailable(format!(
                    "channel {} cannot reach the prediction service",
                    self.id
                ))
            })?;

        match responses.recv() {
            Ok(Ok(prediction)) => Ok(prediction),
            Ok(Err(message)) => Err(EngineError::Prediction(message)),
            Err(_) => Err(EngineError::InferenceUnavailable(format!(
                "prediction service stopped before answering channel {}",
                self.id
            ))),
        }
    }
}

/// Channel endpoints held by the prediction service.
pub(crate) struct ServiceEndpoints {
    pub requests: Receiver<InferenceRequest>,
    pub responders: Vec<SyncSender<InferenceResponse>>,
}

/// Opens `count` channels sharing one bounded request queue.
pub(crate) fn open_channels(count: usize) -> (Vec<InferenceChannel>, ServiceEndpoints) {
    let (request_tx, request_rx) = mpsc::sync_channel(count.max(1));
    let mut channels = Vec::with_capacity(count);
    let mut responders = Vec::with_capacity(count);

    for id in 0..count {
        let (response_tx, response_rx) = mpsc::sync_channel(1);
        channels.push(InferenceChannel {
            id,
            requests: request_tx.clone(),
            responses: Mutex::new(response_rx),
        });
        responders.push(response_tx);
    }

    (
        channels,
        ServiceEndpoints {
            requests: request_rx,
            responders,
        },
    )
}
