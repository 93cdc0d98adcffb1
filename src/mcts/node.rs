//! Search tree vertex.
//!
//! A node stores the network evaluation of one position together with per-edge statistics
//! (priors, visit counts, accumulated values, expanded children). Immutable data lives on the
//! node itself; every mutable statistic sits behind a single per-node mutex so that concurrent
//! playouts can share nodes through the transposition table.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rand::Rng;
use rand_distr::{Distribution, Gamma};

use crate::{EngineError, Result};

#[derive(Debug)]
struct EdgeStats<M> {
    prior: Vec<f32>,
    visits: Vec<u32>,
    /// Accumulated value per edge; `q = total_value / visits`.
    total_value: Vec<f32>,
    q: Vec<f32>,
    n_sum: u32,
    children: Vec<Option<Arc<Node<M>>>>,
}

#[derive(Debug)]
pub struct Node<M> {
    value: f32,
    legal_moves: Vec<M>,
    is_terminal: bool,
    forced_win_child: Option<usize>,
    stats: Mutex<EdgeStats<M>>,
}

impl<M> Node<M> {
    /// Creates an expandable node. `prior` must be index-aligned with `legal_moves`.
    pub fn new(
        value: f32,
        prior: Vec<f32>,
        legal_moves: Vec<M>,
        forced_win_child: Option<usize>,
    ) -> Result<Self> {
        if prior.len() != legal_moves.len() {
            return Err(EngineError::PolicyLengthMismatch {
                legal: legal_moves.len(),
                policy: prior.len(),
            });
        }
        if let Some(idx) = forced_win_child {
            if idx >= legal_moves.len() {
                return Err(EngineError::TreeCorruption(format!(
                    "forced win child {} out of range for {} moves",
                    idx,
                    legal_moves.len()
                )));
            }
        }

        let edges = legal_moves.len();
        Ok(Self {
            value,
            legal_moves,
            is_terminal: false,
            forced_win_child,
            stats: Mutex::new(EdgeStats {
                prior,
                visits: vec![0; edges],
                total_value: vec![0.0; edges],
                q: vec![0.0; edges],
                n_sum: 0,
                children: (0..edges).map(|_| None).collect(),
            }),
        })
    }

    /// Creates a leaf for a finished game (checkmate or draw). It has no edges.
    pub fn terminal(value: f32) -> Self {
        Self {
            value,
            legal_moves: Vec::new(),
            is_terminal: true,
            forced_win_child: None,
            stats: Mutex::new(EdgeStats {
                prior: Vec::new(),
                visits: Vec::new(),
                total_value: Vec::new(),
                q: Vec::new(),
                n_sum: 0,
                children: Vec::new(),
            }),
        }
    }

    fn stats(&self) -> MutexGuard<'_, EdgeStats<M>> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn value(&self) -> f32 {
        self.value
    }

    pub fn legal_moves(&self) -> &[M] {
        &self.legal_moves
    }

    pub fn num_edges(&self) -> usize {
        self.legal_moves.len()
    }

    pub fn is_terminal(&self) -> bool {
        self.is_terminal
    }

    pub fn forced_win_child(&self) -> Option<usize> {
        self.forced_win_child
    }

    pub fn total_visits(&self) -> u32 {
        self.stats().n_sum
    }

    pub fn visits(&self) -> Vec<u32> {
        self.stats().visits.clone()
    }

    pub fn q_values(&self) -> Vec<f32> {
        self.stats().q.clone()
    }

    pub fn q_value(&self, index: usize) -> Option<f32> {
        self.stats().q.get(index).copied()
    }

    pub fn prior(&self) -> Vec<f32> {
        self.stats().prior.clone()
    }

    pub fn child(&self, index: usize) -> Option<Arc<Node<M>>> {
        self.stats().children.get(index).cloned().flatten()
    }

    pub fn expanded_children(&self) -> Vec<(usize, Arc<Node<M>>)> {
        self.stats()
            .children
            .iter()
            .enumerate()
            .filter_map(|(i, child)| child.as_ref().map(|c| (i, Arc::clone(c))))
            .collect()
    }

    /// Number of distinct nodes reachable through expanded edges.
    pub fn expanded_subtree_size(&self) -> usize {
        let mut seen: HashSet<*const Node<M>> = HashSet::new();
        let mut stack: Vec<Arc<Node<M>>> = self
            .expanded_children()
            .into_iter()
            .map(|(_, child)| child)
            .collect();
        while let Some(node) = stack.pop() {
            if seen.insert(Arc::as_ptr(&node)) {
                stack.extend(node.expanded_children().into_iter().map(|(_, child)| child));
            }
        }
        seen.len()
    }

    /// Attaches `child` to edge `index`. An already expanded edge keeps its node.
    pub fn attach_child(&self, index: usize, child: Arc<Node<M>>) -> Result<Arc<Node<M>>> {
        let mut stats = self.stats();
        let slot = stats.children.get_mut(index).ok_or_else(|| {
            EngineError::TreeCorruption(format!("no edge {} to attach a child to", index))
        })?;
        Ok(Arc::clone(slot.get_or_insert(child)))
    }

    /// PUCT score per edge: `q + cpuct * prior * sqrt(n_sum) / (1 + n)`.
    pub fn puct_scores(&self, cpuct: f32) -> Vec<f32> {
        let stats = self.stats();
        let sqrt_sum = (stats.n_sum as f32).sqrt();
        stats
            .q
            .iter()
            .zip(&stats.prior)
            .zip(&stats.visits)
            .map(|((q, p), n)| q + cpuct * p * sqrt_sum / (1.0 + *n as f32))
            .collect()
    }

    /// Index of the edge to descend. A known winning move is always taken, otherwise the
    /// highest PUCT score wins with ties going to the lowest index.
    pub fn select_child(&self, cpuct: f32) -> Result<usize> {
        if self.is_terminal {
            return Err(EngineError::TreeCorruption(
                "selection requested on a terminal node".to_string(),
            ));
        }
        if let Some(idx) = self.forced_win_child {
            return Ok(idx);
        }
        argmax(&self.puct_scores(cpuct)).ok_or_else(|| {
            EngineError::TreeCorruption("selection on a node without edges".to_string())
        })
    }

    /// Counts `loss` pending visits on edge `index`, each worth a loss of one.
    pub fn apply_virtual_loss(&self, index: usize, loss: u32) {
        let mut stats = self.stats();
        stats.n_sum += loss;
        stats.visits[index] += loss;
        stats.total_value[index] -= loss as f32;
        stats.q[index] = stats.total_value[index] / stats.visits[index] as f32;
    }

    /// Removes the virtual loss placed by the paired [`Node::apply_virtual_loss`] call and
    /// records one real visit of `value`.
    pub fn revert_virtual_loss_and_backpropagate(&self, index: usize, loss: u32, value: f32) {
        let mut stats = self.stats();
        stats.n_sum = stats.n_sum + 1 - loss;
        stats.visits[index] = stats.visits[index] + 1 - loss;
        stats.total_value[index] += loss as f32 + value;
        stats.q[index] = stats.total_value[index] / stats.visits[index] as f32;
    }

    /// Undoes [`Node::apply_virtual_loss`] for a playout that failed, without recording a visit.
    pub fn cancel_virtual_loss(&self, index: usize, loss: u32) {
        let mut stats = self.stats();
        stats.n_sum -= loss;
        stats.visits[index] -= loss;
        stats.total_value[index] += loss as f32;
        stats.q[index] = if stats.visits[index] > 0 {
            stats.total_value[index] / stats.visits[index] as f32
        } else {
            0.0
        };
    }

    /// Move distribution derived from the search statistics.
    ///
    /// With `q_value_weight == 0` this is the visit share of every edge. A positive weight
    /// blends in the action values mapped from [-1, 1] to [0, 1]. Before any visit the prior
    /// is returned.
    pub fn mcts_policy(&self, q_value_weight: f32) -> Vec<f32> {
        let stats = self.stats();
        if stats.n_sum == 0 {
            return stats.prior.clone();
        }

        let n_sum = stats.n_sum as f32;
        let mut policy: Vec<f32> = stats
            .visits
            .iter()
            .map(|&n| n as f32 / n_sum)
            .collect();

        if q_value_weight > 0.0 {
            for (p, (q, n)) in policy.iter_mut().zip(stats.q.iter().zip(&stats.visits)) {
                let q_share = if *n > 0 { (q + 1.0) / 2.0 } else { 0.0 };
                *p = *p * (1.0 - q_value_weight) + q_share * q_value_weight;
            }
            normalize(&mut policy);
        }
        policy
    }

    /// Mixes Dirichlet(alpha) noise into the priors: `(1 - epsilon) * p + epsilon * noise`.
    pub fn apply_dirichlet_noise<R: Rng + ?Sized>(&self, epsilon: f32, alpha: f32, rng: &mut R) {
        let mut stats = self.stats();
        if stats.prior.is_empty() || epsilon <= 0.0 {
            return;
        }
        let noise = sample_dirichlet(alpha, stats.prior.len(), rng);
        for (p, eta) in stats.prior.iter_mut().zip(noise) {
            *p = (1.0 - epsilon) * *p + epsilon * eta;
        }
    }
}

/// Index of the largest finite entry, first one on ties.
pub(crate) fn argmax(values: &[f32]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| !v.is_nan())
        .fold(None, |best: Option<(usize, f32)>, (i, &v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

pub(crate) fn normalize(values: &mut [f32]) {
    let sum: f32 = values.iter().sum();
    if sum > 0.0 {
        values.iter_mut().for_each(|v| *v /= sum);
    } else if !values.is_empty() {
        let uniform = 1.0 / values.len() as f32;
        values.iter_mut().for_each(|v| *v = uniform);
    }
}

/// Draws one Dirichlet(alpha, ..., alpha) vector by normalising Gamma(alpha, 1) samples.
fn sample_dirichlet<R: Rng + ?Sized>(alpha: f32, len: usize, rng: &mut R) -> Vec<f32> {
    let mut noise: Vec<f32> = match Gamma::new(alpha.max(f32::EPSILON), 1.0) {
        Ok(gamma) => (0..len).map(|_| gamma.sample(rng)).collect(),
        Err(_) => vec![1.0; len],
    };
    normalize(&mut noise);
    noise
}
