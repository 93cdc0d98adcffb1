//! Standard-chess [`GameState`] backed by the `chess` crate.

use std::str::FromStr;

use chess::{BitBoard, Board, BoardStatus, ChessMove, Color, MoveGen, Piece};
use tch::Tensor;

use crate::game::game_state::GameState;
use crate::neural::tensor_conversion::convert_board_to_tensor;
use crate::{EngineError, Result};

/// Policy vector layout: `promotion_plane * 4096 + from * 64 + to`, where plane 0 holds plain
/// moves and queen promotions and planes 1..4 hold knight, bishop and rook under-promotions.
/// Squares are mirrored vertically when black is to move.
pub const POLICY_LEN: usize = 4 * 64 * 64;

const FIFTY_MOVE_PLIES: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChessState {
    board: Board,
    halfmove_clock: u32,
}

impl Default for ChessState {
    fn default() -> Self {
        Self {
            board: Board::default(),
            halfmove_clock: 0,
        }
    }
}

impl ChessState {
    pub fn from_fen(fen: &str) -> Result<Self> {
        let board = Board::from_str(fen)
            .map_err(|e| EngineError::InvalidPosition(format!("{}: {:?}", fen, e)))?;
        let halfmove_clock = fen
            .split_whitespace()
            .nth(4)
            .and_then(|field| field.parse().ok())
            .unwrap_or(0);
        Ok(Self {
            board,
            halfmove_clock,
        })
    }

    /// Parses a move in coordinate notation (`e2e4`, `e7e8q`) against the current position.
    pub fn parse_move(&self, uci: &str) -> Result<ChessMove> {
        let wanted = uci.trim().to_ascii_lowercase();
        MoveGen::new_legal(&self.board)
            .find(|mv| mv.to_string() == wanted)
            .ok_or_else(|| EngineError::InvalidPosition(format!("illegal move {}", uci)))
    }

    fn insufficient_material(&self) -> bool {
        let pieces = self.board.combined().popcnt();
        if pieces == 2 {
            return true;
        }
        let minors = *self.board.pieces(Piece::Knight) | *self.board.pieces(Piece::Bishop);
        pieces == 3 && minors != BitBoard::new(0)
    }
}

impl GameState for ChessState {
    type Move = ChessMove;

    fn legal_moves(&self) -> Vec<ChessMove> {
        MoveGen::new_legal(&self.board).collect()
    }

    fn apply_move(&mut self, mv: &ChessMove) {
        let is_pawn_move = self.board.piece_on(mv.get_source()) == Some(Piece::Pawn);
        let is_capture = self.board.piece_on(mv.get_dest()).is_some();
        self.board = self.board.make_move_new(*mv);
        if is_pawn_move || is_capture {
            self.halfmove_clock = 0;
        } else {
            self.halfmove_clock += 1;
        }
    }

    fn is_won(&self) -> bool {
        self.board.status() == BoardStatus::Checkmate
    }

    fn is_draw(&self) -> bool {
        self.board.status() == BoardStatus::Stalemate
            || self.halfmove_clock >= FIFTY_MOVE_PLIES
            || self.insufficient_material()
    }

    fn board_fen(&self) -> String {
        // Placement, side to move, castling, en passant and the halfmove clock. The clock
        // changes the input planes and the draw status, and it rules out repeated keys.
        let mut fields: Vec<String> = self
            .board
            .to_string()
            .split_whitespace()
            .take(4)
            .map(str::to_string)
            .collect();
        fields.push(self.halfmove_clock.to_string());
        fields.join(" ")
    }

    fn state_planes(&self) -> Tensor {
        convert_board_to_tensor(&self.board, self.halfmove_clock)
    }

    fn is_white_to_move(&self) -> bool {
        self.board.side_to_move() == Color::White
    }

    fn are_pockets_empty(&self) -> bool {
        true
    }

    fn policy_index(&self, mv: &ChessMove) -> usize {
        let mirror = |index: usize| {
            if self.is_white_to_move() {
                index
            } else {
                index ^ 56
            }
        };
        let from = mirror(mv.get_source().to_index());
        let to = mirror(mv.get_dest().to_index());
        let plane = match mv.get_promotion() {
            Some(Piece::Knight) => 1,
            Some(Piece::Bishop) => 2,
            Some(Piece::Rook) => 3,
            _ => 0,
        };
        plane * 64 * 64 + from * 64 + to
    }
}
