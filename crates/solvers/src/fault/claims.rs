//! The claim tree: a local, append-only mirror of one game's claim DAG.

use super::{ClaimData, Position};
use ethers::types::Address;
use std::collections::HashMap;
use thiserror::Error;

/// Errors rejecting an insertion into the [ClaimTree].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClaimTreeError {
    /// A claim already exists at the position.
    #[error("claim already exists at position {0}")]
    DuplicateClaim(u128),
    /// The claim counters a parent that is not in the tree.
    #[error("claim at position {position} counters unknown parent index {parent_index}")]
    OrphanClaim { position: u128, parent_index: usize },
    /// The claim sits below the maximum depth of the game.
    #[error("position {position} exceeds the maximum game depth {max_depth}")]
    TooDeep { position: u128, max_depth: u64 },
}

/// The [ClaimTree] mirrors the claim DAG of one on-chain dispute game. Claims
/// are insertion-ordered as on chain and additionally indexed by position.
/// The mirror is append-only: claim data is never mutated after insertion,
/// with the single exception of the `countered` flag, which flips the moment
/// a counter-claim is inserted under a parent.
#[derive(Debug, Clone)]
pub struct ClaimTree {
    claims: Vec<ClaimData>,
    by_position: HashMap<u128, usize>,
    max_depth: u64,
}

impl ClaimTree {
    /// The sentinel parent index carried by the root claim.
    pub const ROOT_PARENT: usize = usize::MAX;

    /// Creates a new claim tree from the game's root claim. The root always
    /// occupies index 0 at position 1.
    pub fn new(root: ClaimData, max_depth: u64) -> Self {
        let mut by_position = HashMap::new();
        by_position.insert(root.position, 0);
        Self {
            claims: vec![root],
            by_position,
            max_depth,
        }
    }

    /// Returns the maximum depth of the game tree.
    pub fn max_depth(&self) -> u64 {
        self.max_depth
    }

    /// Returns the number of claims in the tree, root included. Never zero:
    /// a tree exists only once its root claim does.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.claims.len()
    }

    /// Fetches the claim at the given DAG index.
    pub fn get(&self, index: usize) -> Option<&ClaimData> {
        self.claims.get(index)
    }

    /// Fetches the claim at the given tree position.
    pub fn at_position(&self, position: u128) -> Option<&ClaimData> {
        self.by_position.get(&position).map(|i| &self.claims[*i])
    }

    /// Returns all claims in insertion order.
    pub fn claims(&self) -> &[ClaimData] {
        &self.claims
    }

    /// Inserts a claim observed on chain, marking its parent countered.
    /// Returns the claim's DAG index.
    pub fn insert(&mut self, claim: ClaimData) -> Result<usize, ClaimTreeError> {
        if self.by_position.contains_key(&claim.position) {
            return Err(ClaimTreeError::DuplicateClaim(claim.position));
        }
        if claim.position.depth() > self.max_depth {
            return Err(ClaimTreeError::TooDeep {
                position: claim.position,
                max_depth: self.max_depth,
            });
        }
        let Some(parent) = self.claims.get_mut(claim.parent_index) else {
            return Err(ClaimTreeError::OrphanClaim {
                position: claim.position,
                parent_index: claim.parent_index,
            });
        };
        parent.countered = true;

        let index = self.claims.len();
        self.by_position.insert(claim.position, index);
        self.claims.push(claim);
        Ok(index)
    }

    /// Returns the deepest claim that has not yet been countered, whichever
    /// side posted it. Ties break toward the latest insertion.
    pub fn frontier(&self) -> Option<(usize, &ClaimData)> {
        self.claims
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.countered)
            .max_by_key(|(i, c)| (c.position.depth(), *i))
    }

    /// Returns the deepest uncountered claim the given party could still
    /// respond to: an unanswered claim posted by an opponent. Returns `None`
    /// when no open leaf remains for the party, either because the game is
    /// settled or because it is the counterparty's turn.
    pub fn uncontested_leaf(&self, for_party: Address) -> Option<(usize, &ClaimData)> {
        self.claims
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.countered && c.claimant != for_party)
            .max_by_key(|(i, c)| (c.position.depth(), *i))
    }

    /// Returns true once a claim at the given position spans a single trace
    /// unit: the bisection phase is over and the only legal response is
    /// terminal verification.
    pub fn is_bisection_complete(&self, position: u128) -> bool {
        position.depth() >= self.max_depth
    }
}
