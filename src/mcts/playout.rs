//! One playout: select down the tree, expand a single edge, back the value up.

use std::sync::Arc;

use crate::game::GameState;
use crate::inference::InferenceChannel;
use crate::mcts::hyperparameters::AgentConfig;
use crate::mcts::node::Node;
use crate::mcts::transposition::TranspositionTable;
use crate::neural::{legal_move_probabilities, Prediction};
use crate::{EngineError, Result};

#[derive(Debug, Clone)]
pub struct PlayoutResult<M> {
    /// Value of the root position from its side to move
    pub value: f32,
    pub depth: usize,
    pub moves: Vec<M>,
}

/// Value of a finished game from the side to move: a mated side scores -1, a draw 0.
pub fn terminal_value<G: GameState>(state: &G) -> Option<f32> {
    if state.is_won() {
        Some(-1.0)
    } else if state.is_draw() {
        Some(0.0)
    } else {
        None
    }
}

/// Index of a move that mates immediately.
pub fn find_mate_in_one<G: GameState>(state: &G, legal_moves: &[G::Move]) -> Option<usize> {
    legal_moves.iter().position(|mv| {
        let mut next = state.clone();
        next.apply_move(mv);
        next.is_won()
    })
}

/// Builds an expandable node for a non-terminal `state` from a network prediction.
pub fn expand_position<G: GameState>(
    state: &G,
    prediction: &Prediction,
    check_mate_in_one: bool,
) -> Result<Node<G::Move>> {
    let legal_moves = state.legal_moves();
    if legal_moves.is_empty() {
        return Err(EngineError::NoLegalMoves {
            fen: state.board_fen(),
        });
    }

    let prior = legal_move_probabilities(state, &legal_moves, &prediction.policy);
    let forced_win = if check_mate_in_one {
        find_mate_in_one(state, &legal_moves)
    } else {
        None
    };
    let value = if forced_win.is_some() { 1.0 } else { prediction.value };

    Node::new(value, prior, legal_moves, forced_win)
}

/// Runs playouts for one inference channel.
///
/// Every playout sends exactly one request through the channel, including when it ends on a
/// transposition hit or a terminal node, so each wave feeds the batcher a fixed number of
/// requests.
pub struct PlayoutWorker<'a, G: GameState> {
    channel: &'a InferenceChannel,
    table: &'a TranspositionTable<G::Move>,
    cpuct: f32,
    virtual_loss: u32,
    check_mate_in_one: bool,
}

impl<'a, G: GameState> PlayoutWorker<'a, G> {
    pub fn new(
        channel: &'a InferenceChannel,
        table: &'a TranspositionTable<G::Move>,
        config: &AgentConfig,
        cpuct: f32,
    ) -> Self {
        Self {
            channel,
            table,
            cpuct,
            virtual_loss: config.virtual_loss,
            check_mate_in_one: config.check_mate_in_one,
        }
    }

    pub fn run(&self, root: &Node<G::Move>, state: &G) -> Result<PlayoutResult<G::Move>> {
        let mut state = state.clone();
        let mut moves = Vec::new();
        let (value, depth) = self.descend(root, &mut state, 1, &mut moves)?;
        Ok(PlayoutResult {
            value,
            depth,
            moves,
        })
    }

    /// Returns the value of `parent` from its side to move and the depth reached.
    fn descend(
        &self,
        parent: &Node<G::Move>,
        state: &mut G,
        depth: usize,
        moves: &mut Vec<G::Move>,
    ) -> Result<(f32, usize)> {
        let index = parent.select_child(self.cpuct)?;
        let mv = parent.legal_moves().get(index).cloned().ok_or_else(|| {
            EngineError::TreeCorruption(format!("selected edge {} has no move", index))
        })?;

        parent.apply_virtual_loss(index, self.virtual_loss);
        state.apply_move(&mv);
        moves.push(mv);

        match self.evaluate_edge(parent, index, state, depth, moves) {
            Ok((value, reached)) => {
                parent.revert_virtual_loss_and_backpropagate(index, self.virtual_loss, -value);
                Ok((-value, reached))
            }
            Err(err) => {
                parent.cancel_virtual_loss(index, self.virtual_loss);
                Err(err)
            }
        }
    }

    /// Value of the position behind edge `index`, from the perspective of its side to move.
    fn evaluate_edge(
        &self,
        parent: &Node<G::Move>,
        index: usize,
        state: &mut G,
        depth: usize,
        moves: &mut Vec<G::Move>,
    ) -> Result<(f32, usize)> {
        match parent.child(index) {
            Some(child) if child.is_terminal() => {
                self.channel.predict(state.state_planes())?;
                Ok((child.value(), depth))
            }
            Some(child) => self.descend(&child, state, depth + 1, moves),
            None => {
                let key = state.board_fen();
                if let Some(known) = self.table.get(&key) {
                    let child = parent.attach_child(index, known)?;
                    self.channel.predict(state.state_planes())?;
                    return Ok((child.value(), depth));
                }

                let prediction = self.channel.predict(state.state_planes())?;
                let node = match terminal_value(state) {
                    Some(value) => Node::terminal(value),
                    None => expand_position(state, &prediction, self.check_mate_in_one)?,
                };
                let node = Arc::new(node);
                self.table.insert(key, Arc::clone(&node));
                let child = parent.attach_child(index, node)?;
                Ok((child.value(), depth))
            }
        }
    }
}
