//! The chain boundary: the narrow [L1Adapter] interface the engine consumes,
//! and its ethers-backed implementation. All ABI concerns live here; the
//! solvers never see a contract call.

use crate::{
    bindings::{DisputeGameFactory, FaultDisputeGame, OutputOracle, ZkDisputeGame},
    DriverConfig,
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use ethers::types::{transaction::eip2718::TypedTransaction, Address, H256, U256};
use fault_agent_solvers::fault::{Claim, ClaimData, ClaimTree, Clock, GameStatus, Move};
use std::sync::Arc;

/// A handle to one dispute game discovered through the factory: the fields
/// needed to seed a local mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameHandle {
    /// The address of the dispute game proxy.
    pub address: Address,
    /// The index of the disputed output.
    pub batch_index: u64,
    /// The absolute trace index of the first unit in the disputed range.
    pub trace_offset: u64,
    /// The root claim the game was created with.
    pub root_claim: Claim,
    /// The address defending the disputed output.
    pub defender: Address,
    /// The address that created the game.
    pub challenger: Address,
    /// The UNIX timestamp of the game's creation.
    pub created_at: u64,
    /// The maximum depth of the game's claim tree.
    pub max_depth: u64,
}

/// The [L1Adapter] trait is the engine's only view of the chain. Reads go
/// straight to the RPC; writes are enqueued to the transaction dispatcher,
/// which serializes signing and nonce use.
#[async_trait]
pub trait L1Adapter: Send + Sync {
    /// Creates a new dispute game for the given output.
    async fn create_game(&self, batch_index: u64, claimed_root: Claim) -> Result<()>;
    /// Returns handles for every game the factory reports in progress.
    async fn active_games(&self) -> Result<Vec<GameHandle>>;
    /// Returns the number of claims in a game's DAG.
    async fn claim_count(&self, game: Address) -> Result<usize>;
    /// Returns the claim at the given DAG index.
    async fn claim_at(&self, game: Address, index: usize) -> Result<ClaimData>;
    /// Returns the game's status.
    async fn game_status(&self, game: Address) -> Result<GameStatus>;
    /// Returns whether the game is currently resolvable.
    async fn can_resolve(&self, game: Address) -> Result<bool>;
    /// Returns the number of outputs the oracle has accepted.
    async fn output_count(&self) -> Result<u64>;
    /// Returns the root commitment proposed for an output.
    async fn output_root(&self, batch_index: u64) -> Result<Claim>;
    /// Returns whether an output already has a dispute open against it.
    async fn has_active_dispute(&self, batch_index: u64) -> Result<bool>;
    /// Submits a move against a game.
    async fn submit_move(&self, game: Address, mv: Move) -> Result<()>;
    /// Resolves a finished game.
    async fn resolve(&self, game: Address) -> Result<()>;
}

/// The ethers-backed [L1Adapter], built on the contract bindings and the
/// driver's signing provider.
pub struct EthAdapter {
    config: Arc<DriverConfig>,
}

impl EthAdapter {
    /// Creates a new adapter over the driver's provider and addresses.
    pub fn new(config: Arc<DriverConfig>) -> Self {
        Self { config }
    }

    fn factory(&self) -> DisputeGameFactory<crate::SignerMiddlewareWs> {
        DisputeGameFactory::new(
            self.config.dispute_game_factory,
            Arc::clone(&self.config.l1_provider),
        )
    }

    fn oracle(&self) -> OutputOracle<crate::SignerMiddlewareWs> {
        OutputOracle::new(
            self.config.output_oracle,
            Arc::clone(&self.config.l1_provider),
        )
    }

    fn game(&self, address: Address) -> FaultDisputeGame<crate::SignerMiddlewareWs> {
        FaultDisputeGame::new(address, Arc::clone(&self.config.l1_provider))
    }

    async fn enqueue(&self, tx: TypedTransaction) -> Result<()> {
        self.config
            .tx_sender
            .send(tx)
            .await
            .map_err(|err| anyhow!("transaction queue closed: {err}"))
    }
}

#[async_trait]
impl L1Adapter for EthAdapter {
    async fn create_game(&self, batch_index: u64, claimed_root: Claim) -> Result<()> {
        let call = self
            .factory()
            .create_game(U256::from(batch_index), claimed_root.0)
            .value(self.config.bond);
        self.enqueue(call.tx).await
    }

    async fn active_games(&self) -> Result<Vec<GameHandle>> {
        let factory = self.factory();
        let count = factory.game_count().call().await?.as_u64();

        let mut handles = Vec::new();
        for index in 0..count {
            let address = factory.game_at_index(U256::from(index)).call().await?;
            let game = self.game(address);
            if game.status().call().await? != GameStatus::InProgress as u8 {
                continue;
            }
            handles.push(GameHandle {
                address,
                batch_index: game.batch_index().call().await?.as_u64(),
                trace_offset: game.starting_block().call().await?.as_u64(),
                root_claim: H256::from(game.root_claim().call().await?),
                defender: game.proposer().call().await?,
                challenger: game.game_creator().call().await?,
                created_at: game.created_at().call().await?,
                max_depth: game.max_game_depth().call().await?.as_u64(),
            });
        }
        Ok(handles)
    }

    async fn claim_count(&self, game: Address) -> Result<usize> {
        Ok(self.game(game).claim_data_len().call().await?.as_usize())
    }

    async fn claim_at(&self, game: Address, index: usize) -> Result<ClaimData> {
        let (parent_index, countered, claimant, bond, claim, position, clock) =
            self.game(game).claim_data(U256::from(index)).call().await?;
        Ok(ClaimData {
            parent_index: if parent_index == u32::MAX {
                ClaimTree::ROOT_PARENT
            } else {
                parent_index as usize
            },
            claimant,
            bond: U256::from(bond),
            countered,
            claim: H256::from(claim),
            position,
            // The contract packs the clock as `duration << 64 | timestamp`.
            clock: Clock {
                duration: (clock >> 64) as u64,
                timestamp: clock as u64,
            },
        })
    }

    async fn game_status(&self, game: Address) -> Result<GameStatus> {
        let raw = self.game(game).status().call().await?;
        GameStatus::try_from(raw).map_err(|value| anyhow!("invalid game status: {value}"))
    }

    async fn can_resolve(&self, game: Address) -> Result<bool> {
        Ok(self.game(game).can_resolve().call().await?)
    }

    async fn output_count(&self) -> Result<u64> {
        Ok(self.oracle().next_batch_index().call().await?.as_u64())
    }

    async fn output_root(&self, batch_index: u64) -> Result<Claim> {
        let raw = self
            .oracle()
            .get_output_root(U256::from(batch_index))
            .call()
            .await?;
        Ok(H256::from(raw))
    }

    async fn has_active_dispute(&self, batch_index: u64) -> Result<bool> {
        Ok(self
            .factory()
            .has_active_dispute(U256::from(batch_index))
            .call()
            .await?)
    }

    async fn submit_move(&self, game: Address, mv: Move) -> Result<()> {
        let tx = match mv {
            Move::Attack {
                parent_index,
                claim,
            } => self
                .game(game)
                .attack(U256::from(parent_index), claim.0)
                .value(self.config.bond)
                .tx,
            Move::Defend {
                parent_index,
                claim,
            } => self
                .game(game)
                .defend(U256::from(parent_index), claim.0)
                .value(self.config.bond)
                .tx,
            Move::Step {
                claim_index,
                state_data,
                proof,
                post_state,
            } => self
                .game(game)
                .step(U256::from(claim_index), state_data, proof, post_state.0)
                .tx,
            Move::ZkProof {
                proof_bytes,
                public_values,
            } => ZkDisputeGame::new(game, Arc::clone(&self.config.l1_provider))
                .prove_block(proof_bytes, public_values)
                .tx,
        };
        self.enqueue(tx).await
    }

    async fn resolve(&self, game: Address) -> Result<()> {
        let call = self.game(game).resolve();
        self.enqueue(call.tx).await
    }
}
