/// Outcome of [`MctsAgent::evaluate`](crate::mcts::MctsAgent::evaluate).
#[derive(Debug, Clone)]
pub struct Evaluation<M> {
    /// Root action value of the best move, side-to-move perspective
    pub value: f32,
    pub legal_moves: Vec<M>,
    /// Search distribution, index-aligned with `legal_moves`
    pub policy: Vec<f32>,
    /// Deepest playout of this call
    pub depth: usize,
    /// Playouts added to the root during this call
    pub nodes: u64,
}

/// Outcome of [`MctsAgent::select_move`](crate::mcts::MctsAgent::select_move).
#[derive(Debug, Clone)]
pub struct MoveSelection<M> {
    pub value: f32,
    pub mv: M,
    /// Probability the move was chosen with
    pub confidence: f32,
    pub child_index: usize,
}
