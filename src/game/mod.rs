pub mod chess_state;
pub mod game_state;

pub use chess_state::ChessState;
pub use game_state::GameState;
