//! Request/response plumbing between playout workers and the network.
//!
//! Every worker owns one [`InferenceChannel`]. Requests from all channels land in a single
//! queue drained by the [`PredictionService`] thread, which evaluates them in batches and
//! routes each output row back to the channel that asked for it.

pub mod batcher;
pub mod channel;

pub use batcher::{PredictionService, ServiceStats};
pub use channel::InferenceChannel;
