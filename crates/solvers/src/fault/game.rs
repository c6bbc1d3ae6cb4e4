//! The game mirror and the trace oracle seam.

use super::{Claim, ClaimData, ClaimTree, GameStatus, Position, Role};
use ethers::types::Address;
use thiserror::Error;

/// Errors surfaced by a [TraceOracle].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TraceError {
    /// The local node holds no commitment for the requested index.
    #[error("trace unavailable at index {0}")]
    Unavailable(u64),
}

/// The [TraceOracle] trait is the local source of truth for "what commitment
/// should exist at index X", backed by re-executing the rollup or VM locally.
/// From the solver's point of view it is a pure function.
pub trait TraceOracle {
    /// Returns the commitment for one disputable unit of the trace.
    fn commitment_at(&self, trace_index: u64) -> Result<Claim, TraceError>;

    /// Returns the root commitment for a whole submitted output.
    fn output_root(&self, batch_index: u64) -> Result<Claim, TraceError>;
}

/// The [Game] struct is the local mirror of one on-chain dispute game: the
/// claim tree, the participants, and the chess-clock bookkeeping. The chain
/// remains the source of truth; the mirror is discarded once the game is
/// observed final.
#[derive(Debug, Clone)]
pub struct Game {
    /// The address of the dispute game contract.
    pub address: Address,
    /// The index of the disputed output.
    pub batch_index: u64,
    /// The absolute trace index of the first unit in the disputed range.
    pub trace_offset: u64,
    /// The claim tree mirroring the on-chain claim DAG.
    pub claims: ClaimTree,
    /// The address defending the disputed output.
    pub defender: Address,
    /// The address disputing the output (the game's creator).
    pub challenger: Address,
    /// The UNIX timestamp of the game's creation.
    pub created_at: u64,
    /// The UNIX timestamp of the last observed claim.
    pub last_move_at: u64,
    status: GameStatus,
    defender_elapsed: u64,
    challenger_elapsed: u64,
}

impl Game {
    /// Creates a new game mirror from its root claim.
    pub fn new(
        address: Address,
        batch_index: u64,
        trace_offset: u64,
        root: ClaimData,
        max_depth: u64,
        defender: Address,
        challenger: Address,
        created_at: u64,
    ) -> Self {
        Self {
            address,
            batch_index,
            trace_offset,
            claims: ClaimTree::new(root, max_depth),
            defender,
            challenger,
            created_at,
            last_move_at: created_at,
            status: GameStatus::InProgress,
            defender_elapsed: 0,
            challenger_elapsed: 0,
        }
    }

    /// Returns the current status of the game.
    pub fn status(&self) -> GameStatus {
        self.status
    }

    /// Transitions the game's status. The status is monotonic: once the game
    /// left `InProgress` the transition is refused. Returns whether the
    /// status changed.
    pub fn set_status(&mut self, status: GameStatus) -> bool {
        if self.status != GameStatus::InProgress || status == self.status {
            return false;
        }
        self.status = status;
        true
    }

    /// Returns the address playing the given role in this game.
    pub fn address_of(&self, role: Role) -> Address {
        match role {
            Role::Defender => self.defender,
            Role::Challenger => self.challenger,
        }
    }

    /// Returns the role a claimant address plays. Any address other than the
    /// challenger is treated as defending the output.
    pub fn side_of(&self, claimant: Address) -> Role {
        if claimant == self.challenger {
            Role::Challenger
        } else {
            Role::Defender
        }
    }

    /// Returns the side currently on the clock: the opponent of whoever
    /// posted the deepest uncountered claim. `None` once every claim has
    /// been answered.
    pub fn turn(&self) -> Option<Role> {
        self.claims
            .frontier()
            .map(|(_, claim)| self.side_of(claim.claimant).opponent())
    }

    /// Returns the total thinking time a side has consumed, in seconds.
    pub fn elapsed(&self, role: Role) -> u64 {
        match role {
            Role::Defender => self.defender_elapsed,
            Role::Challenger => self.challenger_elapsed,
        }
    }

    /// Charges the wall-clock time since the previous move to the side that
    /// just posted a claim. Call before inserting the claim into the tree.
    pub fn record_move(&mut self, claimant: Address, timestamp: u64) {
        let thought = timestamp.saturating_sub(self.last_move_at);
        match self.side_of(claimant) {
            Role::Defender => self.defender_elapsed += thought,
            Role::Challenger => self.challenger_elapsed += thought,
        }
        self.last_move_at = self.last_move_at.max(timestamp);
    }

    /// Returns true once any claim has reached the maximum depth: the
    /// remaining disagreement spans a single trace unit.
    pub fn bisection_complete(&self) -> bool {
        self.claims
            .claims()
            .iter()
            .any(|c| c.position.depth() >= self.claims.max_depth())
    }

    /// Returns the absolute trace index a position in this game commits to.
    pub fn trace_index_of(&self, position: u128) -> u64 {
        self.trace_offset + position.trace_index(self.claims.max_depth())
    }
}
