//! The types module contains all of the types relevant to the fault dispute game.

use ethers::types::{Address, Bytes, H256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The [Claim] type represents a commitment to the disputed trace at a given
/// trace index, made by a participant in a dispute game.
pub type Claim = H256;

/// The [Clock] struct tracks the duration a claim's poster had consumed on
/// their chess clock and the timestamp at which the claim landed on chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clock {
    /// The duration consumed on the poster's chess clock, in seconds.
    pub duration: u64,
    /// The UNIX timestamp at which the claim was posted.
    pub timestamp: u64,
}

/// The [ClaimData] struct represents a [Claim] as well as the data associated
/// with it in the game's claim DAG.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimData {
    /// The index of the claim this one counters in the DAG array.
    pub parent_index: usize,
    /// The address that posted the claim.
    pub claimant: Address,
    /// The bond attached to the claim.
    pub bond: U256,
    /// Whether or not the claim has been countered.
    pub countered: bool,
    /// The commitment made at the trace index of `position`.
    pub claim: Claim,
    /// The position of the claim within the game tree.
    pub position: u128,
    /// The chess clock snapshot taken when the claim was posted.
    pub clock: Clock,
}

/// The terminal status of a dispute game, as encoded by the on-chain arbiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum GameStatus {
    /// The game is still being played.
    InProgress = 0,
    /// The challenger won: the disputed claim was shown to be incorrect.
    ChallengerWins = 1,
    /// The defender won: the disputed claim held up.
    DefenderWins = 2,
}

impl TryFrom<u8> for GameStatus {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::InProgress),
            1 => Ok(Self::ChallengerWins),
            2 => Ok(Self::DefenderWins),
            other => Err(other),
        }
    }
}

impl fmt::Display for GameStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InProgress => write!(f, "in progress"),
            Self::ChallengerWins => write!(f, "challenger wins"),
            Self::DefenderWins => write!(f, "defender wins"),
        }
    }
}

/// The role a party plays in a dispute game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// The proposer defending the disputed output.
    Defender,
    /// The party disputing the output.
    Challenger,
}

impl Role {
    /// Returns the opposing role.
    pub fn opponent(&self) -> Self {
        match self {
            Self::Defender => Self::Challenger,
            Self::Challenger => Self::Defender,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Defender => write!(f, "defender"),
            Self::Challenger => write!(f, "challenger"),
        }
    }
}

/// A [Move] is an action to be submitted against the on-chain game in
/// response to a claim made by the counterparty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Move {
    /// Counter the parent claim, disputing the first half of its span.
    Attack {
        /// The index of the countered claim in the DAG array.
        parent_index: usize,
        /// Our commitment at the attack position's trace index.
        claim: Claim,
    },
    /// Counter the parent claim, agreeing with it and disputing the half
    /// after it.
    Defend {
        /// The index of the countered claim in the DAG array.
        parent_index: usize,
        /// Our commitment at the defense position's trace index.
        claim: Claim,
    },
    /// Resolve a single-unit disagreement by replaying one deterministic
    /// step with a memory-access proof.
    Step {
        /// The index of the leaf claim being countered.
        claim_index: usize,
        /// The encoded pre-state of the disputed step.
        state_data: Bytes,
        /// The memory-access proof against the pre-state commitment.
        proof: Bytes,
        /// The post-state commitment the step produces.
        post_state: Claim,
    },
    /// Resolve a single-block disagreement with a succinct proof from the
    /// external proving service.
    ZkProof {
        /// The raw proof bytes for the on-chain verifier.
        proof_bytes: Bytes,
        /// The ABI-encoded public values the proof commits to.
        public_values: Bytes,
    },
}
