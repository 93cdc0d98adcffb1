pub mod algorithm;
pub mod hyperparameters;
pub mod info;
pub mod mcts_result;
pub mod node;
pub mod playout;
pub mod policy;
pub mod transposition;

pub use algorithm::{InfoSink, MctsAgent, SearchPhase};
pub use hyperparameters::AgentConfig;
pub use info::{value_to_centipawn, SearchInfo};
pub use mcts_result::{Evaluation, MoveSelection};
pub use node::Node;
pub use playout::{PlayoutResult, PlayoutWorker};
pub use transposition::TranspositionTable;
