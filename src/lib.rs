//! # Neural MCTS
//!
//! A parallel Monte Carlo Tree Search engine for chess and its variants, guided by a
//! policy/value network that is queried through a batching inference service.
//!
//! ## Features
//!
//! - **Search**: PUCT selection, virtual loss, transposition reuse across moves
//! - **Inference**: per-worker request/response channels feeding a single batcher thread
//! - **Game adapters**: a `GameState` trait and a standard-chess implementation
//! - **Networks**: a `Predictor` trait with TorchScript and uniform implementations
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use neural_mcts::{AgentConfig, ChessState, MctsAgent, UniformPredictor};
//!
//! let predictor = Arc::new(UniformPredictor::for_chess());
//! let mut agent = MctsAgent::new(predictor, AgentConfig::default())?;
//! let selection = agent.select_move(&ChessState::default())?;
//! println!("bestmove {}", selection.mv);
//! # Ok::<(), neural_mcts::EngineError>(())
//! ```

// ============================================================================
// PUBLIC API MODULES
// ============================================================================

/// Game-state abstraction and the chess adapter
pub mod game;

/// Per-worker inference channels and the batching prediction service
pub mod inference;

/// Monte Carlo Tree Search: nodes, playouts and the search agent
pub mod mcts;

/// Network predictors and input-plane conversion
pub mod neural;

/// Logger bootstrap
pub mod logging;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

pub use game::{ChessState, GameState};
pub use inference::{InferenceChannel, PredictionService};
pub use mcts::{
    AgentConfig, Evaluation, MctsAgent, MoveSelection, Node, SearchInfo, SearchPhase,
    TranspositionTable,
};
pub use neural::{Prediction, Predictor, TorchScriptPredictor, UniformPredictor};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Main error type for the engine
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("no legal moves available for position {fen}")]
    NoLegalMoves { fen: String },

    #[error("search tree corrupted: {0}")]
    TreeCorruption(String),

    #[error("policy has {policy} entries but {legal} legal moves were generated")]
    PolicyLengthMismatch { legal: usize, policy: usize },

    #[error("inference channel unavailable: {0}")]
    InferenceUnavailable(String),

    #[error("prediction failed: {0}")]
    Prediction(String),

    #[error("invalid position: {0}")]
    InvalidPosition(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("torch error: {0}")]
    Torch(#[from] tch::TchError),

    #[error("thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, EngineError>;

// ============================================================================
// LIBRARY VERSION INFO
// ============================================================================

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Library description
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
