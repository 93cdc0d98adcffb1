//! End-to-end searches with stub predictors.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use assert_matches::assert_matches;
use neural_mcts::game::chess_state::POLICY_LEN;
use neural_mcts::{
    AgentConfig, ChessState, EngineError, GameState, MctsAgent, Node, Prediction, Predictor,
    Result, SearchInfo, UniformPredictor,
};
use tch::Tensor;

/// Uniform predictor that counts evaluated positions.
#[derive(Default)]
struct CountingPredictor {
    calls: AtomicUsize,
}

impl CountingPredictor {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Predictor for CountingPredictor {
    fn predict_single(&self, planes: &Tensor) -> Result<Prediction> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        UniformPredictor::for_chess().predict_single(planes)
    }
}

/// Puts all prior mass on a single policy index.
struct OneHotPredictor {
    index: usize,
}

impl Predictor for OneHotPredictor {
    fn predict_single(&self, _planes: &Tensor) -> Result<Prediction> {
        let mut policy = vec![0.0; POLICY_LEN];
        policy[self.index] = 1.0;
        Ok(Prediction { value: 0.0, policy })
    }
}

fn config(threads: usize, batch_size: usize, playouts: u32) -> AgentConfig {
    AgentConfig {
        threads,
        batch_size,
        playouts_empty_pockets: playouts,
        playouts_filled_pockets: playouts,
        min_movetime_ms: 60_000,
        verbose: false,
        seed: Some(2024),
        ..AgentConfig::default()
    }
}

fn assert_visit_sums(node: &Node<chess::ChessMove>, depth: usize) {
    let visits = node.visits();
    assert_eq!(visits.iter().sum::<u32>(), node.total_visits());
    if depth > 0 {
        for (_, child) in node.expanded_children() {
            assert_visit_sums(&child, depth - 1);
        }
    }
}

#[test]
fn test_start_position_four_playouts() {
    let mut agent = MctsAgent::new(Arc::new(UniformPredictor::for_chess()), config(1, 1, 4)).unwrap();
    let state = ChessState::default();

    let evaluation = agent.evaluate(&state).unwrap();
    let root = agent.root().unwrap();
    assert_eq!(root.total_visits(), 4);
    assert_eq!(evaluation.nodes, 4);
    assert_eq!(evaluation.policy.len(), 20);

    let selection = agent.select_move(&state).unwrap();
    assert!(state.legal_moves().contains(&selection.mv));
    assert!(selection.confidence > 0.0);
}

#[test]
fn test_single_legal_move_fast_path() {
    // d5d6 is the only legal move and the resulting position is still in play.
    let state = ChessState::from_fen("7k/8/8/3P4/8/1q6/8/K7 w - - 0 1").unwrap();
    assert_eq!(state.legal_moves().len(), 1);

    let predictor = Arc::new(CountingPredictor::default());
    let mut agent = MctsAgent::new(predictor.clone(), config(1, 1, 4)).unwrap();
    let evaluation = agent.evaluate(&state).unwrap();

    assert_eq!(evaluation.policy, vec![1.0]);
    assert_eq!(evaluation.depth, 1);
    assert_eq!(evaluation.nodes, 0);
    assert_eq!(predictor.calls(), 1);
    assert_eq!(agent.service_stats().requests(), 0);
}

#[test]
fn test_single_legal_move_into_draw_skips_network() {
    // Kxb2 is forced and leaves bare kings.
    let state = ChessState::from_fen("k7/8/8/8/8/8/1q6/K7 w - - 0 1").unwrap();
    assert_eq!(state.legal_moves().len(), 1);

    let predictor = Arc::new(CountingPredictor::default());
    let mut agent = MctsAgent::new(predictor.clone(), config(1, 1, 4)).unwrap();
    let selection = agent.select_move(&state).unwrap();

    assert_eq!(selection.mv.to_string(), "a1b2");
    assert_eq!(selection.confidence, 1.0);
    assert_eq!(predictor.calls(), 0);
    let child = agent.root().unwrap().child(0).unwrap();
    assert!(child.is_terminal());
    assert_eq!(child.value(), 0.0);
}

#[test]
fn test_mate_in_one_is_forced() {
    let state = ChessState::from_fen("6k1/5ppp/8/8/8/8/8/R5K1 w - - 0 1").unwrap();
    let decoy = state.parse_move("g1f1").unwrap();
    let predictor = Arc::new(OneHotPredictor {
        index: state.policy_index(&decoy),
    });

    let mut agent = MctsAgent::new(
        predictor,
        AgentConfig {
            check_mate_in_one: true,
            ..config(1, 1, 8)
        },
    )
    .unwrap();
    let selection = agent.select_move(&state).unwrap();

    let root = agent.root().unwrap();
    let forced = root.forced_win_child().unwrap();
    assert_eq!(root.legal_moves()[forced].to_string(), "a1a8");
    assert_eq!(selection.child_index, forced);
    assert_eq!(selection.mv.to_string(), "a1a8");
    assert_eq!(selection.value, 1.0);
    assert_eq!(root.visits()[forced], root.total_visits());
}

#[test]
fn test_without_mate_check_priors_drive_search() {
    let state = ChessState::from_fen("6k1/5ppp/8/8/8/8/8/R5K1 w - - 0 1").unwrap();
    let decoy = state.parse_move("g1f1").unwrap();
    let predictor = Arc::new(OneHotPredictor {
        index: state.policy_index(&decoy),
    });

    let mut agent = MctsAgent::new(predictor, config(1, 1, 8)).unwrap();
    agent.evaluate(&state).unwrap();
    assert_eq!(agent.root().unwrap().forced_win_child(), None);
}

#[test]
fn test_repeated_evaluation_reuses_tree() {
    let mut agent = MctsAgent::new(Arc::new(UniformPredictor::for_chess()), config(2, 2, 8)).unwrap();
    let state = ChessState::default();

    agent.evaluate(&state).unwrap();
    let first_root = Arc::clone(agent.root().unwrap());
    let first_visits = first_root.total_visits();

    let second = agent.evaluate(&state).unwrap();
    let second_root = agent.root().unwrap();
    assert!(Arc::ptr_eq(&first_root, second_root));
    assert!(second_root.total_visits() >= first_visits);
    assert_eq!(second_root.total_visits(), first_visits + second.nodes as u32);
}

#[test]
fn test_visit_counts_add_up_after_parallel_search() {
    let mut agent = MctsAgent::new(Arc::new(UniformPredictor::for_chess()), config(4, 2, 32)).unwrap();
    let evaluation = agent.evaluate(&ChessState::default()).unwrap();

    assert_eq!(evaluation.nodes, 32);
    assert_eq!(agent.service_stats().requests(), 32);
    assert_eq!(agent.service_stats().batches(), 16);
    assert_visit_sums(agent.root().unwrap(), 3);
}

#[test]
fn test_no_legal_moves_is_an_error() {
    let mated = ChessState::from_fen("R5k1/5ppp/8/8/8/8/8/6K1 b - - 1 1").unwrap();
    let mut agent = MctsAgent::new(Arc::new(UniformPredictor::for_chess()), config(1, 1, 4)).unwrap();
    assert_matches!(agent.evaluate(&mated), Err(EngineError::NoLegalMoves { .. }));
}

#[test]
fn test_invalid_thread_batch_combination() {
    let result = MctsAgent::<ChessState>::new(
        Arc::new(UniformPredictor::for_chess()),
        config(6, 4, 4),
    );
    assert_matches!(result, Err(EngineError::Config(_)));
}

#[test]
fn test_info_sink_receives_final_line() {
    let lines = Arc::new(Mutex::new(Vec::new()));
    let sink_lines = Arc::clone(&lines);

    let mut agent = MctsAgent::new(Arc::new(UniformPredictor::for_chess()), config(1, 1, 4)).unwrap();
    agent.set_info_sink(Box::new(move |info: &SearchInfo| {
        sink_lines.lock().unwrap().push(info.to_string());
    }));
    agent.evaluate(&ChessState::default()).unwrap();

    let lines = lines.lock().unwrap();
    let last = lines.last().unwrap();
    assert!(last.starts_with("info score cp "));
    assert!(last.contains(" nodes 4 "));
    assert!(last.contains(" pv "));
}

#[test]
fn test_play_several_moves_with_reuse() {
    let mut agent = MctsAgent::new(Arc::new(UniformPredictor::for_chess()), config(2, 2, 16)).unwrap();
    let mut state = ChessState::default();

    for _ in 0..3 {
        let selection = agent.select_move(&state).unwrap();
        assert!(state.legal_moves().contains(&selection.mv));
        state.apply_move(&selection.mv);
        for key in agent.reusable_positions() {
            assert_ne!(key, state.board_fen());
        }
        // Opponent answers with its first legal move.
        let reply = state.legal_moves()[0];
        state.apply_move(&reply);
    }
}

#[test]
fn test_evaluate_after_draw_leaf_was_searched() {
    let mut agent = MctsAgent::new(
        Arc::new(UniformPredictor::for_chess()),
        AgentConfig {
            dirichlet_epsilon: 0.0,
            ..config(2, 2, 64)
        },
    )
    .unwrap();
    let state = ChessState::from_fen("7k/8/8/8/8/8/1r6/K1N5 w - - 0 1").unwrap();
    agent.evaluate(&state).unwrap();

    let mut after = state;
    after.apply_move(&state.parse_move("a1b2").unwrap());
    assert!(after.is_draw());
    let evaluation = agent.evaluate(&after).unwrap();
    assert_eq!(evaluation.legal_moves.len(), 3);
    assert_eq!(agent.root().unwrap().num_edges(), 3);
}

#[test]
fn test_search_graph_is_freed_with_agent() {
    let mut agent = MctsAgent::new(Arc::new(UniformPredictor::for_chess()), config(2, 2, 128)).unwrap();
    // Rook and king shuffles repeat placements quickly.
    let state = ChessState::from_fen("k7/8/8/8/8/8/8/K6R w - - 0 1").unwrap();
    agent.select_move(&state).unwrap();

    let root: Weak<Node<chess::ChessMove>> = Arc::downgrade(agent.root().unwrap());
    let child = Arc::downgrade(&agent.root().unwrap().expanded_children()[0].1);
    assert!(root.upgrade().is_some());

    drop(agent);
    assert!(root.upgrade().is_none());
    assert!(child.upgrade().is_none());
}
