use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tch::Device;

use neural_mcts::logging::setup_logging;
use neural_mcts::{
    AgentConfig, ChessState, GameState, MctsAgent, Predictor, TorchScriptPredictor,
    UniformPredictor,
};

#[derive(Parser, Debug)]
#[command(name = "neural_mcts", version, about = "Parallel neural MCTS chess engine")]
struct Cli {
    /// Position to search (FEN); defaults to the standard start position
    #[arg(long)]
    fen: Option<String>,

    /// TorchScript model returning (value, policy); a uniform predictor is used when omitted
    #[arg(long)]
    model: Option<PathBuf>,

    /// JSON file with agent settings; command-line flags override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Concurrent playouts per wave
    #[arg(long)]
    threads: Option<usize>,

    /// Network batch size; must divide --threads
    #[arg(long)]
    batch_size: Option<usize>,

    /// Playout budget per search
    #[arg(long)]
    playouts: Option<u32>,

    /// Search time per move in milliseconds
    #[arg(long)]
    movetime: Option<u64>,

    /// Number of moves to play from the position
    #[arg(long, default_value_t = 1)]
    moves: usize,

    /// Log level spec (overridden by RUST_LOG)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Also write rotated log files into this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

impl Cli {
    fn agent_config(&self) -> neural_mcts::Result<AgentConfig> {
        let mut config = match &self.config {
            Some(path) => AgentConfig::from_json_file(path)?,
            None => AgentConfig::default(),
        };
        if let Some(threads) = self.threads {
            config.threads = threads;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(playouts) = self.playouts {
            config.playouts_empty_pockets = playouts;
            config.playouts_filled_pockets = playouts;
        }
        if let Some(movetime) = self.movetime {
            config.min_movetime_ms = movetime;
        }
        config.validate()?;
        Ok(config)
    }

    fn predictor(&self) -> neural_mcts::Result<Arc<dyn Predictor>> {
        match &self.model {
            Some(path) => Ok(Arc::new(TorchScriptPredictor::load(
                path,
                Device::cuda_if_available(),
            )?)),
            None => {
                log::warn!("No model given, searching with a uniform predictor");
                Ok(Arc::new(UniformPredictor::for_chess()))
            }
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let _logger = setup_logging(&cli.log_level, cli.log_dir.as_deref())?;

    let config = cli.agent_config()?;
    log::info!("{} v{}: {}", neural_mcts::NAME, neural_mcts::VERSION, config.to_config_string());

    let mut state = match &cli.fen {
        Some(fen) => ChessState::from_fen(fen)?,
        None => ChessState::default(),
    };
    let mut agent = MctsAgent::new(cli.predictor()?, config)?;

    for _ in 0..cli.moves {
        if state.is_won() || state.is_draw() || state.legal_moves().is_empty() {
            log::info!("Game over at {}", state.board_fen());
            break;
        }
        let selection = agent.select_move(&state)?;
        println!("bestmove {}", selection.mv);
        state.apply_move(&selection.mv);
    }

    Ok(())
}
