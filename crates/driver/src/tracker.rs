//! Game discovery and mirroring: polls the factory and every tracked game,
//! diffs chain state against the local mirrors, and emits events. Claims are
//! append-only, matching the immutable on-chain history.

use crate::{GameHandle, L1Adapter};
use anyhow::Result;
use ethers::types::Address;
use fault_agent_solvers::fault::{
    ClockMonitor, Game, GameStatus, Move, Role, TraceError, TraceOracle,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// The lifecycle of a tracked game.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    /// Seen in the factory's list, not yet refreshed.
    Discovered,
    /// Mirrored and being played.
    Active,
    /// An opponent claim is open; it is our move.
    AwaitingMove,
    /// Every opponent claim is countered; waiting on the counterparty.
    AwaitingOpponent,
    /// The game resolved, or tracking was halted for it.
    Terminal,
}

/// Events produced by one polling pass. Polling twice with no on-chain
/// change produces nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameEvent {
    /// A claim was appended to a game's DAG (index 0 on discovery).
    NewClaim {
        game: Address,
        index: usize,
        position: u128,
    },
    /// A game reached a terminal status on chain.
    GameResolved { game: Address, status: GameStatus },
    /// A side exhausted its chess clock; the game is resolvable.
    TimeoutEligible { game: Address, winner: Role },
}

/// One game's mirror plus the engine-side bookkeeping around it. Actors
/// serialize all per-game work: the tracker and the move workers both go
/// through the same lock.
#[derive(Debug)]
pub struct TrackedGame {
    /// The local mirror of the on-chain game.
    pub game: Game,
    /// The tracker's lifecycle state for the game.
    pub state: TrackerState,
    /// Set when the local node cannot back this game's moves anymore (the
    /// trace was pruned). The game is conceded by timeout.
    pub move_disabled: bool,
    /// Set while a move worker is computing for this game.
    pub in_flight: bool,
    /// The last submitted move and the claim count it was computed against,
    /// to avoid resubmitting while the chain catches up.
    pub last_submitted: Option<(usize, Move)>,
    /// Whether the timeout event was already emitted for this game.
    timeout_flagged: bool,
}

/// A shared handle to one tracked game.
pub type GameActor = Arc<Mutex<TrackedGame>>;

/// The [GameTracker] owns the mirrors of every game this role is playing.
pub struct GameTracker {
    adapter: Arc<dyn L1Adapter>,
    clock: ClockMonitor,
    self_address: Address,
    games: HashMap<Address, GameActor>,
    next_output: u64,
}

impl GameTracker {
    /// Creates a tracker with no mirrored games; the first poll populates it.
    pub fn new(adapter: Arc<dyn L1Adapter>, clock: ClockMonitor, self_address: Address) -> Self {
        Self {
            adapter,
            clock,
            self_address,
            games: HashMap::new(),
            next_output: 0,
        }
    }

    /// Returns a snapshot of the tracked game actors.
    pub fn actors(&self) -> Vec<(Address, GameActor)> {
        self.games
            .iter()
            .map(|(address, actor)| (*address, Arc::clone(actor)))
            .collect()
    }

    /// One polling pass: discover games from the factory, diff each tracked
    /// game's claims and status against the mirror, check the clocks.
    /// Per-game failures are isolated; one game's RPC error never stops the
    /// others.
    pub async fn poll(&mut self, now: u64) -> Result<Vec<GameEvent>> {
        let mut events = Vec::new();

        for handle in self.adapter.active_games().await? {
            if self.games.contains_key(&handle.address) {
                continue;
            }
            match self.discover(&handle).await {
                Ok(actor) => {
                    events.push(GameEvent::NewClaim {
                        game: handle.address,
                        index: 0,
                        position: 1,
                    });
                    self.games.insert(handle.address, actor);
                }
                Err(e) => {
                    tracing::warn!(target: "game-tracker", game = %handle.address, "Error mirroring discovered game: {}", e);
                }
            }
        }

        let mut resolved = Vec::new();
        for (address, actor) in &self.games {
            let mut tracked = actor.lock().await;
            if tracked.state == TrackerState::Terminal {
                continue;
            }
            if tracked.state == TrackerState::Discovered {
                tracked.state = TrackerState::Active;
            }

            let status = match self.adapter.game_status(*address).await {
                Ok(status) => status,
                Err(e) => {
                    tracing::warn!(target: "game-tracker", game = %address, "Error reading game status: {}", e);
                    continue;
                }
            };
            if status != GameStatus::InProgress {
                tracked.game.set_status(status);
                tracked.state = TrackerState::Terminal;
                tracing::info!(target: "game-tracker", game = %address, %status, "Game resolved");
                events.push(GameEvent::GameResolved {
                    game: *address,
                    status,
                });
                resolved.push(*address);
                continue;
            }

            let count = match self.adapter.claim_count(*address).await {
                Ok(count) => count,
                Err(e) => {
                    tracing::warn!(target: "game-tracker", game = %address, "Error reading claim count: {}", e);
                    continue;
                }
            };
            for index in tracked.game.claims.len()..count {
                let claim = match self.adapter.claim_at(*address, index).await {
                    Ok(claim) => claim,
                    Err(e) => {
                        tracing::warn!(target: "game-tracker", game = %address, index, "Error reading claim: {}", e);
                        break;
                    }
                };
                let position = claim.position;
                tracked.game.record_move(claim.claimant, claim.clock.timestamp);
                if let Err(e) = tracked.game.claims.insert(claim) {
                    // A trusted contract should never hand us a malformed
                    // claim; halt tracking for this game only.
                    tracing::error!(target: "game-tracker", game = %address, "Protocol violation in on-chain claim, halting tracking: {}", e);
                    tracked.state = TrackerState::Terminal;
                    break;
                }
                events.push(GameEvent::NewClaim {
                    game: *address,
                    index,
                    position,
                });
            }
            if tracked.state == TrackerState::Terminal {
                continue;
            }

            let verdict = self.clock.tick(&tracked.game, now);
            if let (true, Some(winner), false) =
                (verdict.can_resolve, verdict.winner, tracked.timeout_flagged)
            {
                tracked.timeout_flagged = true;
                events.push(GameEvent::TimeoutEligible {
                    game: *address,
                    winner,
                });
            }

            tracked.state = if tracked
                .game
                .claims
                .uncontested_leaf(self.self_address)
                .is_some()
            {
                TrackerState::AwaitingMove
            } else {
                TrackerState::AwaitingOpponent
            };
        }

        // Finality observed; the chain stays the source of truth and the
        // mirror is no longer needed.
        for address in resolved {
            self.games.remove(&address);
        }

        Ok(events)
    }

    /// Scans outputs accepted since the last sweep and opens a dispute game
    /// for any whose proposed root diverges from the local trace. Returns
    /// the number of games created.
    pub async fn sweep_outputs(&mut self, oracle: &(dyn TraceOracle + Send + Sync)) -> Result<u64> {
        let count = self.adapter.output_count().await?;
        let mut created = 0u64;

        while self.next_output < count {
            let index = self.next_output;
            let proposed = self.adapter.output_root(index).await?;
            let ours = match oracle.output_root(index) {
                Ok(root) => root,
                // The local node has not caught up to this output yet;
                // resume here on the next cycle.
                Err(TraceError::Unavailable(_)) => break,
            };

            if proposed != ours && !self.adapter.has_active_dispute(index).await? {
                tracing::warn!(
                    target: "game-tracker",
                    output = index,
                    proposed = %proposed,
                    local = %ours,
                    "Proposed output diverges from the local trace, creating dispute game"
                );
                self.adapter.create_game(index, ours).await?;
                created += 1;
            }
            self.next_output = index + 1;
        }

        Ok(created)
    }

    async fn discover(&self, handle: &GameHandle) -> Result<GameActor> {
        let root = self.adapter.claim_at(handle.address, 0).await?;
        let game = Game::new(
            handle.address,
            handle.batch_index,
            handle.trace_offset,
            root,
            handle.max_depth,
            handle.defender,
            handle.challenger,
            handle.created_at,
        );
        tracing::info!(
            target: "game-tracker",
            game = %handle.address,
            batch = handle.batch_index,
            max_depth = handle.max_depth,
            "Tracking new dispute game"
        );
        Ok(Arc::new(Mutex::new(TrackedGame {
            game,
            state: TrackerState::Discovered,
            move_disabled: false,
            in_flight: false,
            last_submitted: None,
            timeout_flagged: false,
        })))
    }
}
