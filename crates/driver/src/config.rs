//! The `config` module contains the [DriverConfig].

use crate::SignerMiddlewareWs;
use ethers::{
    providers::{Http, Provider},
    types::{transaction::eip2718::TypedTransaction, Address, U256},
};
use fault_agent_solvers::fault::{ClockConfig, Role};
use std::{sync::Arc, time::Duration};
use tokio::sync::{mpsc, Mutex};

/// The [DriverConfig] struct contains the configuration shared by the engine
/// loops and the transaction dispatcher.
pub struct DriverConfig {
    /// The provider used to index chain state and send transactions on L1.
    pub l1_provider: Arc<SignerMiddlewareWs>,
    /// The provider for the trusted rollup node endpoint. This RPC should be
    /// 100% trusted - the agent uses it as the source of truth for the
    /// canonical trace.
    pub node_provider: Arc<Provider<Http>>,
    /// The address of the dispute game factory contract.
    pub dispute_game_factory: Address,
    /// The address of the output oracle contract.
    pub output_oracle: Address,
    /// The address the signing key controls.
    pub sender: Address,
    /// The role this agent plays in tracked games.
    pub role: Role,
    /// The bond attached to created games and bisection moves.
    pub bond: U256,
    /// The interval between polling cycles.
    pub poll_interval: Duration,
    /// The chess-clock budgets mirrored from the dispute contracts.
    pub clock: ClockConfig,
    /// The maximum number of games processed concurrently.
    pub max_concurrent_games: usize,
    /// The number of attempts for retryable terminal-proof failures, sized
    /// against the on-chain prove deadline.
    pub prover_retries: usize,
    /// The sending handle of the MPSC channel used to send transactions.
    pub tx_sender: mpsc::Sender<TypedTransaction>,
    /// The receiving handle of the MPSC channel used to send transactions.
    pub tx_receiver: Mutex<mpsc::Receiver<TypedTransaction>>,
}

impl DriverConfig {
    /// Creates a new [DriverConfig] with the given providers and contract
    /// addresses; the tuning knobs start at their defaults.
    pub fn new(
        l1_provider: Arc<SignerMiddlewareWs>,
        node_provider: Arc<Provider<Http>>,
        dispute_game_factory: Address,
        output_oracle: Address,
        role: Role,
    ) -> Self {
        // Create a new MPSC channel for sending transactions from the loops.
        let (tx_sender, tx_receiver) = mpsc::channel(128);
        let sender = l1_provider.address();

        Self {
            l1_provider,
            node_provider,
            dispute_game_factory,
            output_oracle,
            sender,
            role,
            bond: U256::from(100_000_000_000_000_000u64),
            poll_interval: Duration::from_secs(5),
            clock: ClockConfig::default(),
            max_concurrent_games: 16,
            prover_retries: 5,
            tx_sender,
            tx_receiver: Mutex::new(tx_receiver),
        }
    }
}
