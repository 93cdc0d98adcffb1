//! Engine `info` lines reported during and after a search.

use std::fmt;

/// One progress report, rendered as
/// `info score cp <cp> depth <d> nodes <n> time <ms> nps <nps> pv <moves>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchInfo {
    pub score_cp: i32,
    pub depth: usize,
    pub nodes: u64,
    pub time_ms: u64,
    pub nps: u64,
    pub pv: Vec<String>,
}

impl SearchInfo {
    pub fn new(value: f32, depth: usize, nodes: u64, time_ms: u64, pv: Vec<String>) -> Self {
        let seconds = (time_ms as f64 / 1000.0).max(1.0);
        Self {
            score_cp: value_to_centipawn(value),
            depth,
            nodes,
            time_ms,
            nps: (nodes as f64 / seconds) as u64,
            pv,
        }
    }
}

impl fmt::Display for SearchInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "info score cp {} depth {} nodes {} time {} nps {} pv",
            self.score_cp, self.depth, self.nodes, self.time_ms, self.nps
        )?;
        for mv in &self.pv {
            write!(f, " {}", mv)?;
        }
        Ok(())
    }
}

/// Maps a value in [-1, 1] to centipawns. Certain outcomes saturate at +/-9999.
pub fn value_to_centipawn(value: f32) -> i32 {
    let magnitude = value.abs();
    if magnitude >= 1.0 {
        return 9999 * value.signum() as i32;
    }
    let cp = -(value.signum() as f64) * (1.0 - magnitude as f64).ln() / 1.2f64.ln() * 100.0;
    cp as i32
}
