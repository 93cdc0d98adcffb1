//! Network evaluation contract used by the search and the prediction service.
//!
//! The search only needs a scalar value from the side-to-move perspective and a flat policy
//! vector. Network architecture and weights live behind [`Predictor`].

use tch::Tensor;

use crate::game::chess_state::POLICY_LEN;
use crate::game::GameState;
use crate::Result;

/// Output of one network evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    /// Evaluation in [-1, 1] from the perspective of the side to move.
    pub value: f32,
    /// Probabilities over the full move encoding (not just legal moves).
    pub policy: Vec<f32>,
}

pub trait Predictor: Send + Sync {
    /// Evaluate one position encoded as `[channels, height, width]`.
    fn predict_single(&self, planes: &Tensor) -> Result<Prediction>;

    /// Evaluate a stacked batch `[batch, channels, height, width]`, one output row per input row.
    /// Default implementation calls `predict_single` in a loop.
    fn predict_batch(&self, batch: &Tensor) -> Result<Vec<Prediction>> {
        let rows = batch.size().first().copied().unwrap_or(0);
        (0..rows).map(|i| self.predict_single(&batch.get(i))).collect()
    }
}

/// Predictor returning a constant value and a flat policy for every position.
/// Useful for exercising the search without a trained model.
#[derive(Debug, Clone)]
pub struct UniformPredictor {
    value: f32,
    policy_len: usize,
}

impl UniformPredictor {
    pub fn new(value: f32, policy_len: usize) -> Self {
        Self { value, policy_len }
    }

    pub fn for_chess() -> Self {
        Self::new(0.0, POLICY_LEN)
    }
}

impl Predictor for UniformPredictor {
    fn predict_single(&self, _planes: &Tensor) -> Result<Prediction> {
        let p = 1.0 / self.policy_len.max(1) as f32;
        Ok(Prediction {
            value: self.value,
            policy: vec![p; self.policy_len],
        })
    }
}

/// Extracts the priors of `legal_moves` from a full policy vector and renormalises them.
/// Falls back to a uniform distribution when the network assigns no mass to any legal move.
pub fn legal_move_probabilities<G: GameState>(
    state: &G,
    legal_moves: &[G::Move],
    policy: &[f32],
) -> Vec<f32> {
    let mut probs: Vec<f32> = legal_moves
        .iter()
        .map(|mv| {
            policy
                .get(state.policy_index(mv))
                .copied()
                .filter(|p| p.is_finite() && *p > 0.0)
                .unwrap_or(0.0)
        })
        .collect();

    let sum: f32 = probs.iter().sum();
    if sum > f32::EPSILON {
        for p in &mut probs {
            *p /= sum;
        }
    } else if !probs.is_empty() {
        let uniform = 1.0 / probs.len() as f32;
        probs.iter_mut().for_each(|p| *p = uniform);
    }
    probs
}
