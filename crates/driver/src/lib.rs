#![doc = include_str!("../README.md")]

use anyhow::Result;
use async_trait::async_trait;
use ethers::{
    prelude::{k256::ecdsa::SigningKey, SignerMiddleware},
    providers::{Provider, Ws},
    signers::Wallet,
    types::Address,
};
use fault_agent_solvers::fault::{
    ClockMonitor, GameStatus, MoveEngine, Role, SolverError, TerminalVerifier, TraceOracle,
};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::{sync::Semaphore, task::JoinHandle};
use tokio_retry::{strategy::ExponentialBackoff, RetryIf};

/// Contains the smart contract bindings used by the driver.
mod bindings;

pub mod adapter;
pub mod config;
pub mod dispatch;
pub mod trace;
pub mod tracker;
pub mod verifier;

pub use adapter::{EthAdapter, GameHandle, L1Adapter};
pub use config::DriverConfig;
pub use dispatch::TxDispatcher;
pub use trace::TraceLog;
pub use tracker::{GameActor, GameEvent, GameTracker, TrackedGame, TrackerState};
pub use verifier::{
    HttpProver, ProofBundle, Prover, ProverError, ReplayError, ReplayExecutor, StepProof,
    StepProvider, StepVerifier, ZkVerifier,
};

/// The provider type used to index chain state and send signed transactions.
pub type SignerMiddlewareWs = SignerMiddleware<Provider<Ws>, Wallet<SigningKey>>;

/// The [Driver] trait defines the interface for the long-running loops the
/// [Engine] spawns.
#[async_trait]
pub trait Driver {
    /// Starts the [Driver] loop.
    async fn start_loop(self) -> Result<()>;
}

/// The [Engine] owns everything one role needs to play its dispute games:
/// the game tracker and its per-game actors, the polling loop, and the
/// transaction dispatch actor. Nothing is process-global; two engines with
/// two configs can share a process.
pub struct Engine {
    config: Arc<DriverConfig>,
    adapter: Arc<dyn L1Adapter>,
    oracle: Arc<dyn TraceOracle + Send + Sync>,
    verifier: Arc<dyn TerminalVerifier + Send + Sync>,
    tasks: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Creates a new engine over the narrow external interfaces.
    pub fn new(
        config: Arc<DriverConfig>,
        adapter: Arc<dyn L1Adapter>,
        oracle: Arc<dyn TraceOracle + Send + Sync>,
        verifier: Arc<dyn TerminalVerifier + Send + Sync>,
    ) -> Self {
        Self {
            config,
            adapter,
            oracle,
            verifier,
            tasks: Vec::new(),
        }
    }

    /// Spawns the engine's loops: the transaction dispatcher and the game
    /// loop for the configured role.
    pub fn start(&mut self) {
        let dispatcher = TxDispatcher::new(Arc::clone(&self.config));
        self.tasks.push(tokio::spawn(async move {
            if let Err(e) = dispatcher.start_loop().await {
                tracing::error!(target: "fault-engine", "Transaction dispatcher exited: {}", e);
            }
        }));

        let game_loop = GameLoop {
            config: Arc::clone(&self.config),
            adapter: Arc::clone(&self.adapter),
            oracle: Arc::clone(&self.oracle),
            solver: Arc::new(MoveEngine::new(
                Arc::clone(&self.oracle),
                Arc::clone(&self.verifier),
            )),
            tracker: GameTracker::new(
                Arc::clone(&self.adapter),
                ClockMonitor::new(self.config.clock),
                self.config.sender,
            ),
        };
        self.tasks.push(tokio::spawn(async move {
            if let Err(e) = game_loop.start_loop().await {
                tracing::error!(target: "fault-engine", "Game loop exited: {}", e);
            }
        }));
    }

    /// Stops the engine's loops. In-flight proof work is dropped; nothing is
    /// persisted because a restart resynchronizes from the chain.
    pub async fn stop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
            let _ = task.await;
        }
    }
}

/// The per-role polling loop: sweeps outputs (challenger only), refreshes
/// the mirrors, and fans per-game work out to bounded workers.
struct GameLoop {
    config: Arc<DriverConfig>,
    adapter: Arc<dyn L1Adapter>,
    oracle: Arc<dyn TraceOracle + Send + Sync>,
    solver: Arc<MoveEngine>,
    tracker: GameTracker,
}

#[async_trait]
impl Driver for GameLoop {
    async fn start_loop(mut self) -> Result<()> {
        tracing::info!(target: "game-loop", "Starting game loop as {}...", self.config.role);
        let workers = Arc::new(Semaphore::new(self.config.max_concurrent_games));
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let now = unix_now();

            if self.config.role == Role::Challenger {
                match self.tracker.sweep_outputs(self.oracle.as_ref()).await {
                    Ok(0) => {}
                    Ok(created) => {
                        tracing::info!(target: "game-loop", created, "Challenged diverging outputs");
                    }
                    Err(e) => {
                        tracing::warn!(target: "game-loop", "Error sweeping outputs: {}", e);
                    }
                }
            }

            let events = match self.tracker.poll(now).await {
                Ok(events) => events,
                Err(e) => {
                    tracing::error!(target: "game-loop", "Error polling games: {}", e);
                    continue;
                }
            };
            for event in &events {
                tracing::debug!(target: "game-loop", ?event, "Game event");
            }

            for (address, actor) in self.tracker.actors() {
                let Ok(permit) = Arc::clone(&workers).acquire_owned().await else {
                    break;
                };
                let config = Arc::clone(&self.config);
                let adapter = Arc::clone(&self.adapter);
                let solver = Arc::clone(&self.solver);
                tokio::spawn(async move {
                    let _permit = permit;
                    process_game(config, adapter, solver, address, actor, now).await;
                });
            }
        }
    }
}

/// Plays one cycle for one game: resolve it if the chain allows, otherwise
/// compute and submit the next move. Proof construction can run for minutes,
/// so it happens on a snapshot of the mirror off the async workers; if the
/// game resolves meanwhile the finished move is discarded, not submitted.
async fn process_game(
    config: Arc<DriverConfig>,
    adapter: Arc<dyn L1Adapter>,
    solver: Arc<MoveEngine>,
    address: Address,
    actor: GameActor,
    now: u64,
) {
    let snapshot = {
        let mut tracked = actor.lock().await;
        if tracked.state == TrackerState::Terminal || tracked.in_flight {
            return;
        }

        match adapter.can_resolve(address).await {
            Ok(true) => {
                tracing::info!(target: "fault-engine", game = %address, "Resolving game");
                if let Err(e) = adapter.resolve(address).await {
                    tracing::error!(target: "fault-engine", game = %address, "Error resolving game: {}", e);
                }
                return;
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(target: "fault-engine", game = %address, "Error checking resolvability: {}", e);
            }
        }

        if tracked.move_disabled || tracked.game.status() != GameStatus::InProgress {
            return;
        }
        // Only play games where our key holds this role's seat; other games
        // are tracked and resolved but never moved in.
        if tracked.game.address_of(config.role) != config.sender {
            return;
        }
        tracked.in_flight = true;
        tracked.game.clone()
    };

    let role = config.role;
    let backoff = ExponentialBackoff::from_millis(2)
        .factor(1000)
        .max_delay(Duration::from_secs(120))
        .take(config.prover_retries);
    let result = RetryIf::spawn(
        backoff,
        || {
            let solver = Arc::clone(&solver);
            let snapshot = snapshot.clone();
            async move {
                tokio::task::spawn_blocking(move || solver.next_move(&snapshot, role))
                    .await
                    .unwrap_or_else(|e| Err(SolverError::ProofConstruction(e.to_string())))
            }
        },
        |e: &SolverError| e.is_retryable(),
    )
    .await;

    let mut tracked = actor.lock().await;
    tracked.in_flight = false;
    match result {
        Ok(mv) => {
            if tracked.game.status() != GameStatus::InProgress
                || tracked.state == TrackerState::Terminal
            {
                tracing::debug!(target: "fault-engine", game = %address, "Game settled while computing, discarding move");
                return;
            }
            let fingerprint = (tracked.game.claims.len(), mv.clone());
            if tracked.last_submitted.as_ref() == Some(&fingerprint) {
                // Already queued for this claim set; the chain has not
                // caught up yet.
                return;
            }
            match adapter.submit_move(address, mv).await {
                Ok(()) => {
                    tracing::info!(target: "fault-engine", game = %address, "Move submitted");
                    tracked.last_submitted = Some(fingerprint);
                }
                Err(e) => {
                    tracing::error!(target: "fault-engine", game = %address, "Error submitting move: {}", e);
                }
            }
        }
        Err(SolverError::NoLegalMove) | Err(SolverError::GameResolved) => {}
        Err(SolverError::Trace(e)) => {
            // The local node cannot back this game anymore; concede it by
            // timeout rather than submit moves we cannot prove.
            tracing::error!(target: "fault-engine", game = %address, "Trace unavailable, conceding game: {}", e);
            tracked.move_disabled = true;
        }
        Err(e) => {
            tracing::error!(target: "fault-engine", game = %address, "Error computing move: {}", e);
        }
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
