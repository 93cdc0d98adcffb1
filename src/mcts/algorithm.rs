//! Parallel search driver.
//!
//! [`MctsAgent`] owns the root of the current search, the transposition table and the map of
//! nodes kept for reuse after a move has been played. Each search runs waves of `threads`
//! concurrent playouts on a rayon pool; every playout holds one inference channel of the
//! batching [`PredictionService`]. Between waves the agent checks the depth, playout and
//! move-time budgets, so a search can overrun the move time by up to one wave.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::game::GameState;
use crate::inference::{PredictionService, ServiceStats};
use crate::mcts::hyperparameters::AgentConfig;
use crate::mcts::info::SearchInfo;
use crate::mcts::mcts_result::{Evaluation, MoveSelection};
use crate::mcts::node::{argmax, Node};
use crate::mcts::playout::{expand_position, terminal_value, PlayoutResult, PlayoutWorker};
use crate::mcts::policy::choose_move;
use crate::mcts::transposition::TranspositionTable;
use crate::neural::Predictor;
use crate::{EngineError, Result};

/// Minimum interval between progress lines during a search.
const INFO_INTERVAL: Duration = Duration::from_millis(500);

/// Upper bound on reported principal variations.
const MAX_PV_PLIES: usize = 64;

/// Receives every info line instead of stdout.
pub type InfoSink = Box<dyn FnMut(&SearchInfo) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchPhase {
    Idle,
    Seeding,
    Searching,
    Extracting,
}

pub struct MctsAgent<G: GameState> {
    config: AgentConfig,
    predictor: Arc<dyn Predictor>,
    service: PredictionService,
    pool: ThreadPool,
    table: TranspositionTable<G::Move>,
    /// Nodes that may become the next root, keyed by position
    reuse: HashMap<String, Arc<Node<G::Move>>>,
    root: Option<Arc<Node<G::Move>>>,
    movetime: Duration,
    phase: SearchPhase,
    info_sink: Option<InfoSink>,
    rng: StdRng,
}

impl<G: GameState> std::fmt::Debug for MctsAgent<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MctsAgent")
            .field("movetime", &self.movetime)
            .finish_non_exhaustive()
    }
}

impl<G: GameState> MctsAgent<G> {
    pub fn new(predictor: Arc<dyn Predictor>, config: AgentConfig) -> Result<Self> {
        config.validate()?;
        log::debug!("Creating MCTS agent: {}", config.to_config_string());

        let service = PredictionService::new(
            Arc::clone(&predictor),
            config.threads,
            config.batch_size,
            config.batch_timeout(),
        );
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .thread_name(|i| format!("mcts-playout-{}", i))
            .build()?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Ok(Self {
            movetime: config.movetime(),
            config,
            predictor,
            service,
            pool,
            table: TranspositionTable::new(),
            reuse: HashMap::new(),
            root: None,
            phase: SearchPhase::Idle,
            info_sink: None,
            rng,
        })
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn phase(&self) -> SearchPhase {
        self.phase
    }

    /// Root of the most recent search.
    pub fn root(&self) -> Option<&Arc<Node<G::Move>>> {
        self.root.as_ref()
    }

    pub fn service_stats(&self) -> &ServiceStats {
        self.service.stats()
    }

    /// Positions whose subtree will be reused if the game reaches them.
    pub fn reusable_positions(&self) -> Vec<String> {
        self.reuse.keys().cloned().collect()
    }

    pub fn set_move_time_budget(&mut self, millis: u64) {
        self.movetime = Duration::from_millis(millis);
    }

    pub fn move_time_budget(&self) -> Duration {
        self.movetime
    }

    pub fn set_info_sink(&mut self, sink: InfoSink) {
        self.info_sink = Some(sink);
    }

    /// Searches `state` and returns the move distribution at the root.
    pub fn evaluate(&mut self, state: &G) -> Result<Evaluation<G::Move>> {
        let outcome = self.run_evaluation(state);
        self.phase = SearchPhase::Idle;
        outcome
    }

    /// Searches `state`, picks a move and keeps the subtrees reachable after the opponent's
    /// reply for the next search.
    pub fn select_move(&mut self, state: &G) -> Result<MoveSelection<G::Move>> {
        let evaluation = self.evaluate(state)?;
        let root = self
            .root
            .clone()
            .ok_or_else(|| EngineError::TreeCorruption("search finished without a root".to_string()))?;

        let (child_index, confidence) = choose_move(
            &evaluation.policy,
            self.config.temperature,
            self.config.clip_quantile,
            &mut self.rng,
        )
        .ok_or_else(|| EngineError::TreeCorruption("empty move distribution".to_string()))?;
        let mv = evaluation.legal_moves.get(child_index).cloned().ok_or_else(|| {
            EngineError::TreeCorruption(format!("chosen index {} has no move", child_index))
        })?;
        let value = root.q_value(child_index).unwrap_or(0.0);

        let mut next = state.clone();
        next.apply_move(&mv);
        self.reuse = match root.child(child_index) {
            Some(child) => reachable_after_reply(&child, &next),
            None => HashMap::new(),
        };
        log::debug!(
            "Selected {} (confidence {:.3}); keeping {} subtrees",
            mv,
            confidence,
            self.reuse.len()
        );

        Ok(MoveSelection {
            value,
            mv,
            confidence,
            child_index,
        })
    }

    /// Best line from the current root, following the final move distribution.
    pub fn principal_variation(&self) -> Vec<G::Move> {
        let mut line = Vec::new();
        let mut node = self.root.clone();
        while let Some(current) = node {
            if current.is_terminal() || line.len() >= MAX_PV_PLIES {
                break;
            }
            let Some(index) = argmax(&current.mcts_policy(self.config.q_value_weight)) else {
                break;
            };
            line.push(current.legal_moves()[index].clone());
            node = current.child(index);
        }
        line
    }

    fn run_evaluation(&mut self, state: &G) -> Result<Evaluation<G::Move>> {
        let started = Instant::now();
        self.phase = SearchPhase::Seeding;
        self.service.start()?;

        let legal_moves = state.legal_moves();
        if legal_moves.is_empty() {
            return Err(EngineError::NoLegalMoves {
                fen: state.board_fen(),
            });
        }

        let num_legal = legal_moves.len();
        let key = state.board_fen();
        let reused = match self.reuse.get(&key) {
            Some(node) if node.is_terminal() || node.num_edges() != num_legal => {
                log::debug!(
                    "Discarding stored node with {} edges for a position with {} legal moves",
                    node.num_edges(),
                    num_legal
                );
                None
            }
            found => found.cloned(),
        };
        let visits_before = match &reused {
            Some(node) => {
                log::debug!(
                    "Reusing search tree with {} expanded nodes",
                    node.expanded_subtree_size()
                );
                node.total_visits()
            }
            None => {
                log::debug!("Position not in the reuse map, starting a new tree");
                0
            }
        };

        let (root, max_depth) = if num_legal == 1 {
            let root = match reused {
                Some(node) => node,
                None => self.expand_single_move_root(state, legal_moves)?,
            };
            (root, 1)
        } else {
            let root = match reused {
                Some(node) => node,
                None => self.expand_root(state)?,
            };
            self.phase = SearchPhase::Searching;
            let depth = self.run_search(state, &root, started)?;
            log::debug!(
                "Move overhead is {}ms",
                started.elapsed().as_millis() as i64 - self.movetime.as_millis() as i64
            );
            (root, depth)
        };
        self.root = Some(Arc::clone(&root));

        self.phase = SearchPhase::Extracting;
        let policy = root.mcts_policy(self.config.q_value_weight);
        if policy.len() != num_legal || root.num_edges() != num_legal {
            return Err(EngineError::PolicyLengthMismatch {
                legal: num_legal,
                policy: policy.len(),
            });
        }
        let best = argmax(&policy)
            .ok_or_else(|| EngineError::TreeCorruption("root has no edges".to_string()))?;
        let value = root.q_value(best).unwrap_or(0.0);

        self.reuse.insert(key, Arc::clone(&root));

        let nodes = u64::from(root.total_visits().saturating_sub(visits_before));
        let elapsed = started.elapsed().as_millis() as u64;
        let pv = self.principal_variation().iter().map(ToString::to_string).collect();
        self.emit(SearchInfo::new(value, max_depth, nodes, elapsed, pv));

        Ok(Evaluation {
            value,
            legal_moves: root.legal_moves().to_vec(),
            policy,
            depth: max_depth,
            nodes,
        })
    }

    fn expand_root(&self, state: &G) -> Result<Arc<Node<G::Move>>> {
        let prediction = self.predictor.predict_single(&state.state_planes())?;
        let root = expand_position(state, &prediction, self.config.check_mate_in_one)?;
        Ok(Arc::new(root))
    }

    /// Root for a position with one legal move: the network is skipped at the root and only
    /// asked about the child when the child is not a finished game.
    fn expand_single_move_root(
        &self,
        state: &G,
        legal_moves: Vec<G::Move>,
    ) -> Result<Arc<Node<G::Move>>> {
        let mut child_state = state.clone();
        child_state.apply_move(&legal_moves[0]);

        let child = match terminal_value(&child_state) {
            Some(value) => Node::terminal(value),
            None => {
                let prediction = self.predictor.predict_single(&child_state.state_planes())?;
                expand_position(&child_state, &prediction, self.config.check_mate_in_one)?
            }
        };

        let root = Arc::new(Node::new(0.0, vec![1.0], legal_moves, None)?);
        root.attach_child(0, Arc::new(child))?;
        Ok(root)
    }

    /// Runs waves of playouts until a budget is exhausted and returns the deepest playout.
    fn run_search(&mut self, state: &G, root: &Arc<Node<G::Move>>, started: Instant) -> Result<usize> {
        self.table.clear();
        root.apply_dirichlet_noise(
            self.config.dirichlet_epsilon,
            self.config.dirichlet_alpha,
            &mut self.rng,
        );

        let budget = self.config.playout_budget(state.are_pockets_empty());
        let mut max_depth = 1;
        let mut playouts = 0u32;
        let mut wave = 0u32;
        let mut last_info = Instant::now();

        while max_depth < self.config.max_search_depth
            && playouts < budget
            && started.elapsed() < self.movetime
        {
            wave += 1;
            let cpuct = self.config.annealed_cpuct(wave);
            let results = self.run_wave(state, root, cpuct)?;
            playouts += results.len() as u32;

            if let Some(deepest) = results.iter().map(|r| r.depth).max() {
                max_depth = max_depth.max(deepest);
            }
            log::trace!(
                "wave {} done: cpuct {:.3}, {} playouts, depth {}",
                wave,
                cpuct,
                playouts,
                max_depth
            );

            if last_info.elapsed() > INFO_INTERVAL {
                if let Some(last) = results.last() {
                    let info = SearchInfo::new(
                        last.value,
                        last.depth,
                        u64::from(root.total_visits()),
                        started.elapsed().as_millis() as u64,
                        last.moves.iter().map(ToString::to_string).collect(),
                    );
                    self.emit(info);
                }
                last_info = Instant::now();
            }
        }

        log::debug!(
            "Transposition table: {} positions, {} hits, {} misses",
            self.table.len(),
            self.table.hits(),
            self.table.misses()
        );
        // Transpositions found during this search stay reusable for the next one.
        self.reuse = self
            .table
            .drain()
            .into_iter()
            .filter(|(_, node)| !node.is_terminal())
            .collect();
        Ok(max_depth)
    }

    fn run_wave(
        &self,
        state: &G,
        root: &Node<G::Move>,
        cpuct: f32,
    ) -> Result<Vec<PlayoutResult<G::Move>>> {
        let channels = self.service.channels();
        let table = &self.table;
        let config = &self.config;
        let mut outcomes: Vec<Option<Result<PlayoutResult<G::Move>>>> =
            channels.iter().map(|_| None).collect();

        self.pool.scope(|scope| {
            for (channel, outcome) in channels.iter().zip(outcomes.iter_mut()) {
                let worker = PlayoutWorker::new(channel, table, config, cpuct);
                scope.spawn(move |_| {
                    *outcome = Some(worker.run(root, state));
                });
            }
        });

        outcomes
            .into_iter()
            .map(|outcome| {
                outcome.unwrap_or_else(|| {
                    Err(EngineError::TreeCorruption("playout did not complete".to_string()))
                })
            })
            .collect()
    }

    fn emit(&mut self, info: SearchInfo) {
        log::debug!("{}", info);
        match self.info_sink.as_mut() {
            Some(sink) => sink(&info),
            None if self.config.verbose => println!("{}", info),
            None => {}
        }
    }
}

/// Expandable grandchildren of the played move, keyed by the position after each reply.
fn reachable_after_reply<G: GameState>(
    child: &Node<G::Move>,
    after_move: &G,
) -> HashMap<String, Arc<Node<G::Move>>> {
    child
        .expanded_children()
        .into_iter()
        .filter(|(_, grandchild)| !grandchild.is_terminal())
        .filter_map(|(index, grandchild)| {
            let reply = child.legal_moves().get(index)?;
            let mut position = after_move.clone();
            position.apply_move(reply);
            Some((position.board_fen(), grandchild))
        })
        .collect()
}
