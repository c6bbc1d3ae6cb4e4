//! Terminal verification strategies. Both resolve the same thing, a
//! single-unit disagreement at the bottom of the claim tree, and both hide
//! behind the solvers' `TerminalVerifier` trait so the move engine never
//! knows which game variant it is playing.

use ethers::types::{Bytes, H256};
use fault_agent_solvers::fault::{
    Game, Move, SolverError, TerminalVerifier, TraceError, TraceOracle,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use thiserror::Error;

/// A single-step replay proof, in the JSON shape the replay binary writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepProof {
    /// The step the proof replays.
    pub step: u64,
    /// The pre-state commitment of the step.
    pub pre: H256,
    /// The post-state commitment after executing the step.
    pub post: H256,
    /// The encoded pre-state, preimage of `pre`.
    #[serde(rename = "state-data")]
    pub state_data: Bytes,
    /// The memory-access proof for the step.
    #[serde(rename = "proof-data")]
    pub proof_data: Bytes,
}

/// Errors from the local replay runner.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// The local node no longer holds the state needed to replay the step.
    #[error("trace pruned at step {0}")]
    TracePruned(u64),
    /// The replay run itself failed.
    #[error("replay failed: {0}")]
    Failed(String),
}

/// The local replay seam: produces the proof for one deterministic VM step.
/// Blocking by design; the engine runs it off the polling path.
pub trait StepProvider: Send + Sync {
    /// Replays up to `step` and proves the `step -> step + 1` transition.
    fn proof_at(&self, step: u64) -> Result<StepProof, ReplayError>;
}

/// Runs the VM replay binary, one subprocess per proof request. The binary
/// replays from the initial state snapshot to the requested step and writes
/// the proof file into the work directory.
pub struct ReplayExecutor {
    binary: PathBuf,
    state_path: PathBuf,
    work_dir: PathBuf,
}

impl ReplayExecutor {
    /// Creates an executor over a replay binary and an initial VM state.
    pub fn new(binary: PathBuf, state_path: PathBuf, work_dir: PathBuf) -> Self {
        Self {
            binary,
            state_path,
            work_dir,
        }
    }
}

impl StepProvider for ReplayExecutor {
    fn proof_at(&self, step: u64) -> Result<StepProof, ReplayError> {
        let proof_dir = self.work_dir.join("proofs");
        std::fs::create_dir_all(&proof_dir)
            .map_err(|e| ReplayError::Failed(format!("creating proof dir: {e}")))?;

        let output = Command::new(&self.binary)
            .arg("run")
            .arg("--input")
            .arg(&self.state_path)
            .arg("--proof-at")
            .arg(format!("={step}"))
            .arg("--stop-at")
            .arg(format!("={}", step + 1))
            .arg("--proof-fmt")
            .arg(proof_dir.join("%d.json"))
            .output()
            .map_err(|e| ReplayError::Failed(format!("spawning replay binary: {e}")))?;
        if !output.status.success() {
            return Err(ReplayError::Failed(
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ));
        }

        let proof_path = proof_dir.join(format!("{step}.json"));
        let raw = std::fs::read(&proof_path).map_err(|_| ReplayError::TracePruned(step))?;
        serde_json::from_slice(&raw)
            .map_err(|e| ReplayError::Failed(format!("decoding proof file: {e}")))
    }
}

/// The [StepVerifier] builds [Move::Step] terminal moves from the local
/// replay. Before emitting a move it checks the replayed transition against
/// the local trace: a proof that lands on a different commitment than the
/// disputed unit requires is rejected, never submitted.
pub struct StepVerifier {
    provider: Arc<dyn StepProvider>,
    oracle: Arc<dyn TraceOracle + Send + Sync>,
}

impl StepVerifier {
    /// Creates a verifier over a replay provider and the local trace.
    pub fn new(
        provider: Arc<dyn StepProvider>,
        oracle: Arc<dyn TraceOracle + Send + Sync>,
    ) -> Self {
        Self { provider, oracle }
    }
}

impl TerminalVerifier for StepVerifier {
    fn build_terminal_move(&self, game: &Game, claim_index: usize) -> Result<Move, SolverError> {
        let disputed = disputed_unit(self.oracle.as_ref(), game, claim_index)?;
        let proof = self.provider.proof_at(disputed).map_err(|e| match e {
            ReplayError::TracePruned(step) => SolverError::Trace(TraceError::Unavailable(step)),
            ReplayError::Failed(msg) => SolverError::ProofConstruction(msg),
        })?;

        // The replayed step must land exactly on the commitment the local
        // trace holds for the disputed unit, and chain from the unit before
        // it.
        let want = self.oracle.commitment_at(disputed)?;
        if proof.post != want {
            return Err(SolverError::ProofMismatch {
                want,
                got: proof.post,
            });
        }
        if disputed > game.trace_offset {
            let pre_want = self.oracle.commitment_at(disputed - 1)?;
            if proof.pre != pre_want {
                return Err(SolverError::ProofMismatch {
                    want: pre_want,
                    got: proof.pre,
                });
            }
        }

        Ok(Move::Step {
            claim_index,
            state_data: proof.state_data,
            proof: proof.proof_data,
            post_state: proof.post,
        })
    }
}

/// Errors from the external proving service.
#[derive(Debug, Error)]
pub enum ProverError {
    /// The service is unreachable or busy; retry up to the prove deadline.
    #[error("proving service unavailable: {0}")]
    Unavailable(String),
    /// The service rejected the request.
    #[error("proving service rejected the request: {0}")]
    Rejected(String),
}

/// A completed proof for one block, as returned by the proving service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofBundle {
    /// The block the proof covers.
    pub block_number: u64,
    /// The state commitment the proof's public values commit to.
    pub commitment: H256,
    /// The raw proof bytes for the on-chain verifier.
    pub proof_bytes: Bytes,
    /// The ABI-encoded public values.
    pub public_values: Bytes,
}

/// The external prover seam. Requests block for the full proving run, which
/// can take minutes.
pub trait Prover: Send + Sync {
    /// Requests a succinct proof for one block.
    fn request_proof(&self, block_number: u64) -> Result<ProofBundle, ProverError>;
}

/// Blocking JSON client for the external proving service.
pub struct HttpProver {
    endpoint: String,
    timeout: std::time::Duration,
}

impl HttpProver {
    /// Creates a client for the given proving service endpoint.
    pub fn new(endpoint: String) -> Self {
        Self {
            endpoint,
            timeout: std::time::Duration::from_secs(900),
        }
    }
}

impl Prover for HttpProver {
    fn request_proof(&self, block_number: u64) -> Result<ProofBundle, ProverError> {
        // Built per request so the blocking client never touches the async
        // runtime; callers are already on a worker thread.
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| ProverError::Unavailable(e.to_string()))?;

        let response = client
            .post(&self.endpoint)
            .json(&serde_json::json!({ "blockNumber": block_number }))
            .send()
            .map_err(|e| ProverError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(ProverError::Unavailable(format!("status {status}")));
        }
        if !status.is_success() {
            return Err(ProverError::Rejected(format!("status {status}")));
        }
        response
            .json::<ProofBundle>()
            .map_err(|e| ProverError::Rejected(format!("decoding proof response: {e}")))
    }
}

/// The [ZkVerifier] builds [Move::ZkProof] terminal moves through the
/// external proving service. The proof's public values must commit to the
/// exact disputed unit's commitment before the move is emitted; a valid
/// proof of the wrong claim is not a win.
pub struct ZkVerifier {
    prover: Arc<dyn Prover>,
    oracle: Arc<dyn TraceOracle + Send + Sync>,
}

impl ZkVerifier {
    /// Creates a verifier over a proving service client and the local trace.
    pub fn new(prover: Arc<dyn Prover>, oracle: Arc<dyn TraceOracle + Send + Sync>) -> Self {
        Self { prover, oracle }
    }
}

impl TerminalVerifier for ZkVerifier {
    fn build_terminal_move(&self, game: &Game, claim_index: usize) -> Result<Move, SolverError> {
        let disputed = disputed_unit(self.oracle.as_ref(), game, claim_index)?;
        let bundle = self.prover.request_proof(disputed).map_err(|e| match e {
            ProverError::Unavailable(msg) => SolverError::ProverUnavailable(msg),
            ProverError::Rejected(msg) => SolverError::ProofConstruction(msg),
        })?;

        if bundle.block_number != disputed {
            return Err(SolverError::ProofConstruction(format!(
                "proof targets block {} instead of {disputed}",
                bundle.block_number
            )));
        }
        let want = self.oracle.commitment_at(disputed)?;
        if bundle.commitment != want {
            return Err(SolverError::ProofMismatch {
                want,
                got: bundle.commitment,
            });
        }

        Ok(Move::ZkProof {
            proof_bytes: bundle.proof_bytes,
            public_values: bundle.public_values,
        })
    }
}

/// Identifies the single trace unit behind a leaf disagreement: the leaf's
/// own unit when the local trace disagrees with the claim, or the unit right
/// after it when the local trace agrees (the disagreement is then the
/// opponent's implied next state).
fn disputed_unit(
    oracle: &dyn TraceOracle,
    game: &Game,
    claim_index: usize,
) -> Result<u64, SolverError> {
    let leaf = game
        .claims
        .get(claim_index)
        .ok_or(SolverError::InvalidClaim(claim_index))?;
    let index = game.trace_index_of(leaf.position);
    let ours = oracle.commitment_at(index)?;
    Ok(if ours == leaf.claim { index + 1 } else { index })
}

#[cfg(test)]
mod test {
    use super::*;
    use ethers::types::Address;
    use fault_agent_solvers::fault::{Claim, ClaimData, ClaimTree, Clock};

    const MAX_DEPTH: u64 = 1;

    fn commitment(tag: u64, index: u64) -> Claim {
        H256::from_low_u64_be((tag << 32) | (index + 1))
    }

    fn truth() -> Vec<Claim> {
        vec![commitment(1, 0), commitment(1, 1)]
    }

    fn corrupt() -> Vec<Claim> {
        vec![commitment(1, 0), commitment(2, 1)]
    }

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

    /// A replay provider faithful to the true trace.
    struct TrueReplay {
        units: Vec<Claim>,
    }

    impl StepProvider for TrueReplay {
        fn proof_at(&self, step: u64) -> Result<StepProof, ReplayError> {
            let post = *self
                .units
                .get(step as usize)
                .ok_or(ReplayError::TracePruned(step))?;
            let pre = if step == 0 {
                H256::zero()
            } else {
                self.units[step as usize - 1]
            };
            Ok(StepProof {
                step,
                pre,
                post,
                state_data: Bytes::from(pre.as_bytes().to_vec()),
                proof_data: Bytes::from(vec![0xab]),
            })
        }
    }

    struct PrunedReplay;

    impl StepProvider for PrunedReplay {
        fn proof_at(&self, step: u64) -> Result<StepProof, ReplayError> {
            Err(ReplayError::TracePruned(step))
        }
    }

    /// A prover faithful to the true trace.
    struct TrueProver {
        units: Vec<Claim>,
    }

    impl Prover for TrueProver {
        fn request_proof(&self, block_number: u64) -> Result<ProofBundle, ProverError> {
            let commitment = *self
                .units
                .get(block_number as usize)
                .ok_or_else(|| ProverError::Rejected("block out of range".into()))?;
            Ok(ProofBundle {
                block_number,
                commitment,
                proof_bytes: Bytes::from(vec![0xcd; 4]),
                public_values: Bytes::from(commitment.as_bytes().to_vec()),
            })
        }
    }

    struct BusyProver;

    impl Prover for BusyProver {
        fn request_proof(&self, _block_number: u64) -> Result<ProofBundle, ProverError> {
            Err(ProverError::Unavailable("proving queue full".into()))
        }
    }

    /// A two-unit game where the challenger's root is wrong at unit 1 and
    /// the defender has countered with the agreed unit-0 commitment.
    fn fixture() -> Game {
        let defender = Address::from_low_u64_be(0xaa);
        let challenger = Address::from_low_u64_be(0xbb);
        let root = ClaimData {
            parent_index: ClaimTree::ROOT_PARENT,
            claimant: challenger,
            bond: Default::default(),
            countered: false,
            claim: corrupt()[1],
            position: 1,
            clock: Clock {
                duration: 0,
                timestamp: 1_000,
            },
        };
        let mut game = Game::new(
            Address::from_low_u64_be(0x60),
            0,
            0,
            root,
            MAX_DEPTH,
            defender,
            challenger,
            1_000,
        );
        game.claims
            .insert(ClaimData {
                parent_index: 0,
                claimant: defender,
                bond: Default::default(),
                countered: false,
                claim: truth()[0],
                position: 2,
                clock: Clock {
                    duration: 0,
                    timestamp: 1_010,
                },
            })
            .unwrap();
        game
    }

    #[test]
    fn honest_step_proof_verifies() {
        // Defender's view of the root disagreement: disputed unit is 1.
        let verifier = StepVerifier::new(
            Arc::new(TrueReplay { units: truth() }),
            Arc::new(TableOracle { units: truth() }),
        );
        let mv = verifier.build_terminal_move(&fixture(), 0).unwrap();
        match mv {
            Move::Step {
                claim_index,
                post_state,
                ..
            } => {
                assert_eq!(claim_index, 0);
                assert_eq!(post_state, truth()[1]);
            }
            other => panic!("unexpected move: {other:?}"),
        }
    }

    #[test]
    fn dishonest_view_cannot_build_a_step_proof() {
        // Challenger agrees with the defender's leaf, so the disputed unit
        // is 1, where its own view contradicts the honest replay.
        let verifier = StepVerifier::new(
            Arc::new(TrueReplay { units: truth() }),
            Arc::new(TableOracle { units: corrupt() }),
        );
        let err = verifier.build_terminal_move(&fixture(), 1).unwrap_err();
        assert!(matches!(err, SolverError::ProofMismatch { want, got }
            if want == corrupt()[1] && got == truth()[1]));
    }

    #[test]
    fn pruned_trace_is_fatal_for_the_game() {
        let verifier = StepVerifier::new(
            Arc::new(PrunedReplay),
            Arc::new(TableOracle { units: truth() }),
        );
        let err = verifier.build_terminal_move(&fixture(), 0).unwrap_err();
        assert!(matches!(
            err,
            SolverError::Trace(TraceError::Unavailable(1))
        ));
        assert!(!err.is_retryable());
    }

    #[test]
    fn honest_zk_proof_verifies() {
        let verifier = ZkVerifier::new(
            Arc::new(TrueProver { units: truth() }),
            Arc::new(TableOracle { units: truth() }),
        );
        let mv = verifier.build_terminal_move(&fixture(), 0).unwrap();
        assert!(matches!(mv, Move::ZkProof { .. }));
    }

    #[test]
    fn zk_proof_for_a_different_claim_is_rejected() {
        let verifier = ZkVerifier::new(
            Arc::new(TrueProver { units: truth() }),
            Arc::new(TableOracle { units: corrupt() }),
        );
        let err = verifier.build_terminal_move(&fixture(), 1).unwrap_err();
        assert!(matches!(err, SolverError::ProofMismatch { .. }));
    }

    #[test]
    fn busy_prover_is_retryable() {
        let verifier = ZkVerifier::new(
            Arc::new(BusyProver),
            Arc::new(TableOracle { units: truth() }),
        );
        let err = verifier.build_terminal_move(&fixture(), 0).unwrap_err();
        assert!(matches!(err, SolverError::ProverUnavailable(_)));
        assert!(err.is_retryable());
    }
}
