//! Move choice from a search distribution.

use rand::Rng;

use crate::mcts::node::{argmax, normalize};

/// Temperatures at or below this pick the most visited move deterministically.
pub const GREEDY_TEMPERATURE: f32 = 0.01;

/// Sharpens (`temperature < 1`) or flattens the distribution: `p^(1/T)`, renormalised.
pub fn apply_temperature(policy: &[f32], temperature: f32) -> Vec<f32> {
    let exponent = 1.0 / temperature;
    let mut scaled: Vec<f32> = policy.iter().map(|p| p.max(0.0).powf(exponent)).collect();
    normalize(&mut scaled);
    scaled
}

/// Zeroes the least likely moves whose combined mass stays below `quantile`, then renormalises.
pub fn clip_low_probabilities(policy: &[f32], quantile: f32) -> Vec<f32> {
    let mut clipped = policy.to_vec();
    if quantile <= 0.0 {
        return clipped;
    }

    let mut order: Vec<usize> = (0..policy.len()).collect();
    order.sort_by(|&a, &b| policy[a].total_cmp(&policy[b]));

    let mut cumulative = 0.0;
    for idx in order {
        cumulative += policy[idx];
        if cumulative >= quantile {
            break;
        }
        clipped[idx] = 0.0;
    }
    normalize(&mut clipped);
    clipped
}

/// Draws an index proportionally to `policy`.
pub fn sample_index<R: Rng + ?Sized>(policy: &[f32], rng: &mut R) -> Option<usize> {
    let total: f32 = policy.iter().filter(|p| **p > 0.0).sum();
    if total <= 0.0 {
        return argmax(policy);
    }

    let mut threshold = rng.random::<f32>() * total;
    let mut last_positive = None;
    for (i, &p) in policy.iter().enumerate() {
        if p <= 0.0 {
            continue;
        }
        last_positive = Some(i);
        if threshold < p {
            return Some(i);
        }
        threshold -= p;
    }
    last_positive
}

/// Picks a move index and returns it with the probability it was chosen under.
pub fn choose_move<R: Rng + ?Sized>(
    policy: &[f32],
    temperature: f32,
    clip_quantile: f32,
    rng: &mut R,
) -> Option<(usize, f32)> {
    if temperature <= GREEDY_TEMPERATURE {
        return argmax(policy).map(|idx| (idx, policy[idx]));
    }

    let scaled = clip_low_probabilities(&apply_temperature(policy, temperature), clip_quantile);
    sample_index(&scaled, rng).map(|idx| (idx, scaled[idx]))
}
