//! Move selection against a live claim tree.

use super::{Claim, ClaimTree, Game, GameStatus, Move, Position, Role, TraceError, TraceOracle};
use std::sync::Arc;
use thiserror::Error;

/// Errors produced while selecting or constructing a move.
#[derive(Debug, Error)]
pub enum SolverError {
    /// No open leaf remains for this role; the counterparty has not moved
    /// yet, or the game is settled. Poll again later.
    #[error("no legal move available; waiting on the counterparty")]
    NoLegalMove,
    /// The game has already reached a terminal status.
    #[error("game already resolved")]
    GameResolved,
    /// The local trace source could not answer.
    #[error(transparent)]
    Trace(#[from] TraceError),
    /// The external proving service is unreachable or busy. Retryable up to
    /// the on-chain prove deadline.
    #[error("prover unavailable: {0}")]
    ProverUnavailable(String),
    /// The terminal proof commits to a different state than the local view
    /// of the disputed unit requires.
    #[error("terminal proof commits to {got} but the disputed unit requires {want}")]
    ProofMismatch { want: Claim, got: Claim },
    /// Terminal proof construction failed for a non-retryable reason.
    #[error("terminal proof construction failed: {0}")]
    ProofConstruction(String),
    /// A claim index was out of bounds for the game's claim tree.
    #[error("claim index {0} out of bounds")]
    InvalidClaim(usize),
}

impl SolverError {
    /// Whether retrying the same move computation can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ProverUnavailable(_))
    }
}

/// The [TerminalVerifier] trait adjudicates the final, unit-width
/// disagreement of a game. Implementations build either a deterministic
/// single-step replay move or a succinct-proof move; the solver is agnostic
/// to which is wired in.
///
/// Calls may block for a long time (external proving runs for minutes);
/// callers are expected to run them off the polling path.
pub trait TerminalVerifier {
    /// Builds the terminal move countering the leaf claim at `claim_index`.
    fn build_terminal_move(&self, game: &Game, claim_index: usize) -> Result<Move, SolverError>;
}

/// The [MoveEngine] decides the next legal move for a role in a game: an
/// attack or defense during bisection, or a terminal move once the
/// disagreement spans a single trace unit.
pub struct MoveEngine {
    oracle: Arc<dyn TraceOracle + Send + Sync>,
    verifier: Arc<dyn TerminalVerifier + Send + Sync>,
}

impl MoveEngine {
    /// Creates a new move engine over the local trace source and the
    /// terminal verification strategy selected for the game variant.
    pub fn new(
        oracle: Arc<dyn TraceOracle + Send + Sync>,
        verifier: Arc<dyn TerminalVerifier + Send + Sync>,
    ) -> Self {
        Self { oracle, verifier }
    }

    /// Computes the next move for `role` in `game`.
    ///
    /// The engine responds to the deepest claim the counterparty posted that
    /// this role has not yet countered. During bisection it counters with
    /// the commitment the local trace reports at the counter-position's
    /// trace index; once the disagreement is a single unit wide it escalates
    /// to the terminal verifier instead, even if the counterparty has not
    /// made an explicit claim at that unit.
    pub fn next_move(&self, game: &Game, role: Role) -> Result<Move, SolverError> {
        if game.status() != GameStatus::InProgress {
            return Err(SolverError::GameResolved);
        }

        let (claim_index, leaf) = game
            .claims
            .uncontested_leaf(game.address_of(role))
            .ok_or(SolverError::NoLegalMove)?;

        if game.claims.is_bisection_complete(leaf.position) {
            tracing::debug!(
                target: "fault-solver",
                game = %game.address,
                claim_index,
                "single-unit disagreement reached, building terminal move"
            );
            return self.verifier.build_terminal_move(game, claim_index);
        }

        let ours = self.oracle.commitment_at(game.trace_index_of(leaf.position))?;
        let is_attack = ours != leaf.claim;

        if !is_attack && leaf.parent_index == ClaimTree::ROOT_PARENT {
            // We agree with the root claim; there is nothing to dispute in
            // this game.
            tracing::warn!(
                target: "fault-solver",
                game = %game.address,
                "root claim matches the local trace, not responding"
            );
            return Err(SolverError::NoLegalMove);
        }

        let move_position = leaf.position.make_move(is_attack);
        let counter = self
            .oracle
            .commitment_at(game.trace_index_of(move_position))?;

        tracing::debug!(
            target: "fault-solver",
            game = %game.address,
            parent = claim_index,
            position = move_position,
            attack = is_attack,
            "bisection move selected"
        );

        Ok(if is_attack {
            Move::Attack {
                parent_index: claim_index,
                claim: counter,
            }
        } else {
            Move::Defend {
                parent_index: claim_index,
                claim: counter,
            }
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fault::{ClaimData, Clock, ClockConfig, ClockMonitor};
    use ethers::types::{Address, Bytes, H256};
    use std::sync::Mutex;

    const MAX_DEPTH: u64 = 10;

    fn defender() -> Address {
        Address::from_low_u64_be(0xaa)
    }

    fn challenger() -> Address {
        Address::from_low_u64_be(0xbb)
    }

    /// A trace table backing an oracle: `units[i]` is the commitment after
    /// executing unit `i`.
    struct TableOracle {
        units: Vec<Claim>,
    }

    impl TraceOracle for TableOracle {
        fn commitment_at(&self, trace_index: u64) -> Result<Claim, TraceError> {
            self.units
                .get(trace_index as usize)
                .copied()
                .ok_or(TraceError::Unavailable(trace_index))
        }

        fn output_root(&self, _batch_index: u64) -> Result<Claim, TraceError> {
            Ok(*self.units.last().unwrap())
        }
    }

    /// A verifier that records the escalation and emits a placeholder step.
    #[derive(Default)]
    struct RecordingVerifier {
        calls: Mutex<Vec<usize>>,
    }

    impl TerminalVerifier for RecordingVerifier {
        fn build_terminal_move(&self, _game: &Game, claim_index: usize) -> Result<Move, SolverError> {
            self.calls.lock().unwrap().push(claim_index);
            Ok(Move::Step {
                claim_index,
                state_data: Bytes::new(),
                proof: Bytes::new(),
                post_state: H256::zero(),
            })
        }
    }

    /// A verifier faithful to the chain's adjudication: the replay/prover
    /// always reports the true trace, and the move only verifies when the
    /// party's own view matches it at the disputed unit.
    struct TruthVerifier {
        truth: Vec<Claim>,
        view: Vec<Claim>,
    }

    impl TerminalVerifier for TruthVerifier {
        fn build_terminal_move(&self, game: &Game, claim_index: usize) -> Result<Move, SolverError> {
            let leaf = game
                .claims
                .get(claim_index)
                .ok_or(SolverError::InvalidClaim(claim_index))?;
            let index = game.trace_index_of(leaf.position) as usize;
            let disputed = if self.view[index] == leaf.claim {
                index + 1
            } else {
                index
            };
            let post = self.truth[disputed];
            let want = self.view[disputed];
            if post != want {
                return Err(SolverError::ProofMismatch { want, got: post });
            }
            Ok(Move::Step {
                claim_index,
                state_data: Bytes::from(vec![disputed as u8]),
                proof: Bytes::new(),
                post_state: post,
            })
        }
    }

    fn commitment(tag: u64, index: u64) -> Claim {
        H256::from_low_u64_be(tag << 32 | index + 1)
    }

    /// An honest trace of `len` units.
    fn honest_trace(len: u64) -> Vec<Claim> {
        (0..len).map(|i| commitment(1, i)).collect()
    }

    /// A trace diverging from the honest one at every unit from `from` on.
    fn corrupt_trace(len: u64, from: u64) -> Vec<Claim> {
        (0..len)
            .map(|i| {
                if i < from {
                    commitment(1, i)
                } else {
                    commitment(2, i)
                }
            })
            .collect()
    }

    fn new_game(root_claim: Claim, max_depth: u64) -> Game {
        let root = ClaimData {
            parent_index: ClaimTree::ROOT_PARENT,
            claimant: challenger(),
            bond: Default::default(),
            countered: false,
            claim: root_claim,
            position: 1,
            clock: Clock {
                duration: 0,
                timestamp: 1_000,
            },
        };
        Game::new(
            Address::from_low_u64_be(0x60),
            7,
            0,
            root,
            max_depth,
            defender(),
            challenger(),
            1_000,
        )
    }

    fn engine(units: Vec<Claim>, verifier: Arc<dyn TerminalVerifier + Send + Sync>) -> MoveEngine {
        MoveEngine::new(Arc::new(TableOracle { units }), verifier)
    }

    /// Applies an attack/defend move to the mirror the way the tracker would
    /// after observing it on chain.
    fn apply(game: &mut Game, mv: &Move, claimant: Address, timestamp: u64) {
        let (parent_index, claim, is_attack) = match mv {
            Move::Attack {
                parent_index,
                claim,
            } => (*parent_index, *claim, true),
            Move::Defend {
                parent_index,
                claim,
            } => (*parent_index, *claim, false),
            other => panic!("not a bisection move: {other:?}"),
        };
        let position = game
            .claims
            .get(parent_index)
            .unwrap()
            .position
            .make_move(is_attack);
        game.record_move(claimant, timestamp);
        game.claims
            .insert(ClaimData {
                parent_index,
                claimant,
                bond: Default::default(),
                countered: false,
                claim,
                position,
                clock: Clock {
                    duration: 0,
                    timestamp,
                },
            })
            .unwrap();
    }

    #[test]
    fn attacks_a_root_it_disagrees_with() {
        let truth = honest_trace(1 << MAX_DEPTH);
        let game = new_game(H256::random(), MAX_DEPTH);
        let engine = engine(truth.clone(), Arc::new(RecordingVerifier::default()));

        let mv = engine.next_move(&game, Role::Defender).unwrap();
        assert_eq!(
            mv,
            Move::Attack {
                parent_index: 0,
                claim: truth[2u128.trace_index(MAX_DEPTH) as usize],
            }
        );
    }

    #[test]
    fn agreeing_with_the_root_means_no_move() {
        let truth = honest_trace(1 << MAX_DEPTH);
        let game = new_game(*truth.last().unwrap(), MAX_DEPTH);
        let engine = engine(truth, Arc::new(RecordingVerifier::default()));

        assert!(matches!(
            engine.next_move(&game, Role::Defender),
            Err(SolverError::NoLegalMove)
        ));
    }

    #[test]
    fn no_move_while_waiting_on_the_counterparty() {
        let truth = honest_trace(1 << MAX_DEPTH);
        let game = new_game(H256::random(), MAX_DEPTH);
        let engine = engine(truth, Arc::new(RecordingVerifier::default()));

        // The root is the challenger's own claim; nothing to respond to.
        assert!(matches!(
            engine.next_move(&game, Role::Challenger),
            Err(SolverError::NoLegalMove)
        ));
    }

    #[test]
    fn resolved_games_are_rejected() {
        let truth = honest_trace(1 << MAX_DEPTH);
        let mut game = new_game(H256::random(), MAX_DEPTH);
        game.set_status(GameStatus::DefenderWins);
        let engine = engine(truth, Arc::new(RecordingVerifier::default()));

        assert!(matches!(
            engine.next_move(&game, Role::Defender),
            Err(SolverError::GameResolved)
        ));
    }

    /// N = 1000 disputable units padded to a depth-10 tree: the range must
    /// narrow to a single unit in exactly ceil(log2(1000)) = 10 exchanges,
    /// and the escalated unit must be the first divergent one.
    #[test]
    fn bisection_converges_in_log2_rounds() {
        let divergence = 617u64;
        let truth = honest_trace(1 << MAX_DEPTH);
        let corrupt = corrupt_trace(1 << MAX_DEPTH, divergence);

        let recorder = Arc::new(RecordingVerifier::default());
        let defender_engine = engine(truth.clone(), recorder.clone());
        let challenger_engine = engine(corrupt.clone(), recorder.clone());

        let mut game = new_game(*corrupt.last().unwrap(), MAX_DEPTH);
        let mut moves = 0u64;
        let mut role = Role::Defender;
        let terminal = loop {
            let engine = match role {
                Role::Defender => &defender_engine,
                Role::Challenger => &challenger_engine,
            };
            match engine.next_move(&game, role).unwrap() {
                mv @ (Move::Attack { .. } | Move::Defend { .. }) => {
                    let claimant = game.address_of(role);
                    apply(&mut game, &mv, claimant, 1_000 + moves);
                    moves += 1;
                }
                Move::Step { claim_index, .. } => break (role, claim_index),
                other => panic!("unexpected move: {other:?}"),
            }
            role = role.opponent();
        };

        assert_eq!(moves, 10);

        // Reconstruct the disputed unit the way the verifiers do and check
        // the search landed on the divergence point.
        let (escalator, claim_index) = terminal;
        let leaf = game.claims.get(claim_index).unwrap();
        assert_eq!(leaf.position.depth(), MAX_DEPTH);
        let index = game.trace_index_of(leaf.position);
        let view = match escalator {
            Role::Defender => &truth,
            Role::Challenger => &corrupt,
        };
        let disputed = if view[index as usize] == leaf.claim {
            index + 1
        } else {
            index
        };
        assert_eq!(disputed, divergence);
    }

    /// A two-block range where the challenger's final commitment is wrong:
    /// the honest defender posts the agreed midpoint, the challenger is
    /// forced into a terminal proof it structurally cannot produce, and the
    /// game falls to the defender on the challenger's clock.
    #[test]
    fn two_block_dispute_resolves_for_the_defender() {
        let depth = 1u64;
        let truth = honest_trace(1 << depth);
        let corrupt = corrupt_trace(1 << depth, 1);

        let defender_engine = engine(
            truth.clone(),
            Arc::new(TruthVerifier {
                truth: truth.clone(),
                view: truth.clone(),
            }),
        );
        let challenger_engine = engine(
            corrupt.clone(),
            Arc::new(TruthVerifier {
                truth: truth.clone(),
                view: corrupt.clone(),
            }),
        );

        let mut game = new_game(corrupt[1], depth);

        // Defender counters the root with the midpoint commitment both
        // sides agree on.
        let mv = defender_engine.next_move(&game, Role::Defender).unwrap();
        assert_eq!(
            mv,
            Move::Attack {
                parent_index: 0,
                claim: truth[0],
            }
        );
        apply(&mut game, &mv, defender(), 1_010);

        // The challenger agrees with the midpoint, so its only response is
        // a terminal proof of the second block, which the honest replay
        // refuses to back.
        let err = challenger_engine
            .next_move(&game, Role::Challenger)
            .unwrap_err();
        assert!(matches!(err, SolverError::ProofMismatch { .. }));

        // The honest defender could produce the proof for the same unit.
        let leaf_index = game.claims.len() - 1;
        let mv = TruthVerifier {
            truth: truth.clone(),
            view: truth.clone(),
        }
        .build_terminal_move(&game, leaf_index)
        .unwrap();
        assert!(matches!(mv, Move::Step { post_state, .. } if post_state == truth[1]));

        // With the challenger unable to respond, its chess clock drains
        // through the prove window and the defender takes the game.
        let monitor = ClockMonitor::new(ClockConfig::default());
        let expiry = 1_010 + ClockConfig::default().prove_timeout.as_secs() + 1;
        let verdict = monitor.tick(&game, expiry);
        assert!(verdict.can_resolve);
        assert_eq!(verdict.winner, Some(Role::Defender));
    }
}
