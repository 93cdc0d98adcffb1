//! Game-state contract consumed by the search.
//!
//! The search never inspects board internals: it only enumerates moves, applies them to a
//! thread-local copy, asks for terminal status and a canonical key, and hands the encoded
//! input planes to the network.

use std::fmt::{Debug, Display};
use tch::Tensor;

pub trait GameState: Clone + Send + Sync {
    /// A move token; `Display` must produce the protocol notation used in `pv` lines.
    type Move: Clone + Debug + Display + PartialEq + Send + Sync;

    /// Legal moves in a stable order. Node statistics are index-aligned with this list.
    fn legal_moves(&self) -> Vec<Self::Move>;

    fn apply_move(&mut self, mv: &Self::Move);

    /// The player who made the last move has won (the side to move is mated).
    fn is_won(&self) -> bool;

    /// The position is drawn and the draw is assumed to be claimed.
    fn is_draw(&self) -> bool;

    /// Canonical position key, already normalised for the side to move.
    ///
    /// Equal keys must mean equal network input and equal terminal status. No sequence of
    /// moves may lead from a key back to itself, so the search graph stays acyclic.
    fn board_fen(&self) -> String;

    /// Network input planes for this position, shaped `[channels, height, width]`.
    fn state_planes(&self) -> Tensor;

    fn is_white_to_move(&self) -> bool;

    /// Variants with drop moves need deeper sampling when any pocket holds a piece.
    fn are_pockets_empty(&self) -> bool;

    /// Index of `mv` inside the network's flat policy vector.
    fn policy_index(&self, mv: &Self::Move) -> usize;
}
