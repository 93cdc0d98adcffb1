pub mod predictor;
pub mod tensor_conversion;
pub mod torchscript;

pub use predictor::{legal_move_probabilities, Prediction, Predictor, UniformPredictor};
pub use torchscript::TorchScriptPredictor;
