use chess::{Board, Color, ALL_SQUARES};
use tch::Tensor;

/// Plane layout:
///   0..6   white pawn, knight, bishop, rook, queen, king
///   6..12  black pieces in the same order
///   12     colour (ones when white is to move)
///   13..17 castling rights: white king side, white queen side, black king side, black queen side
///   17     en-passant capturable pawn
///   18     no-progress counter, normalised by the fifty-move limit
pub const CHANNELS: usize = 19;
pub const BOARD_SIZE: usize = 8;

const PLANE: usize = BOARD_SIZE * BOARD_SIZE;
const COLOR_CHANNEL: usize = 12;
const CASTLING_CHANNEL: usize = 13;
const EP_CHANNEL: usize = 17;
const NO_PROGRESS_CHANNEL: usize = 18;
const NO_PROGRESS_LIMIT: f32 = 100.0;

fn fill_plane(features: &mut [f32], channel: usize, value: f32) {
    features[channel * PLANE..(channel + 1) * PLANE].fill(value);
}

pub fn convert_board_to_tensor(board: &Board, halfmove_clock: u32) -> Tensor {
    let mut features = vec![0.0f32; CHANNELS * PLANE];

    for square in ALL_SQUARES {
        if let (Some(piece), Some(color)) = (board.piece_on(square), board.color_on(square)) {
            let offset = if color == Color::White { 0 } else { 6 };
            let channel = offset + piece.to_index();
            let row = square.get_rank().to_index();
            let col = square.get_file().to_index();
            features[channel * PLANE + row * BOARD_SIZE + col] = 1.0;
        }
    }

    if board.side_to_move() == Color::White {
        fill_plane(&mut features, COLOR_CHANNEL, 1.0);
    }

    let rights = [
        board.castle_rights(Color::White).has_kingside(),
        board.castle_rights(Color::White).has_queenside(),
        board.castle_rights(Color::Black).has_kingside(),
        board.castle_rights(Color::Black).has_queenside(),
    ];
    for (i, has_right) in rights.into_iter().enumerate() {
        if has_right {
            fill_plane(&mut features, CASTLING_CHANNEL + i, 1.0);
        }
    }

    if let Some(square) = board.en_passant() {
        let row = square.get_rank().to_index();
        let col = square.get_file().to_index();
        features[EP_CHANNEL * PLANE + row * BOARD_SIZE + col] = 1.0;
    }

    let no_progress = (halfmove_clock as f32 / NO_PROGRESS_LIMIT).clamp(0.0, 1.0);
    fill_plane(&mut features, NO_PROGRESS_CHANNEL, no_progress);

    Tensor::from_slice(&features).view([CHANNELS as i64, BOARD_SIZE as i64, BOARD_SIZE as i64])
}
