//! Chess-clock timeout accounting.

use super::{Game, GameStatus, Role};
use std::time::Duration;

/// The timeout budgets for the two phases of a game.
///
/// Each side accumulates thinking time only while it is its turn. During
/// bisection a side forfeits once its accumulated time passes
/// `response_timeout`; once the disagreement is a single unit wide the
/// budget switches to `prove_timeout`, sized for external proof
/// construction. A defender that never engages the root claim drains its
/// clock under the same rule and loses by default.
#[derive(Debug, Clone, Copy)]
pub struct ClockConfig {
    /// Budget for answering a bisection claim.
    pub response_timeout: Duration,
    /// Budget for producing the terminal proof after bisection.
    pub prove_timeout: Duration,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(300),
            prove_timeout: Duration::from_secs(1200),
        }
    }
}

/// The phase a game is in, which selects the active timeout budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Attack/defend exchanges are still narrowing the disputed range.
    Bisection,
    /// The range is a single unit; a terminal proof is due.
    Proving,
}

/// The outcome of a clock check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    /// Whether the game is resolvable by timeout.
    pub can_resolve: bool,
    /// The side the timeout resolution favors.
    pub winner: Option<Role>,
}

impl Verdict {
    const PENDING: Self = Self {
        can_resolve: false,
        winner: None,
    };
}

/// The [ClockMonitor] applies the chess-clock rule to a game mirror.
#[derive(Debug, Clone, Copy)]
pub struct ClockMonitor {
    config: ClockConfig,
}

impl ClockMonitor {
    /// Creates a new monitor with the given budgets.
    pub fn new(config: ClockConfig) -> Self {
        Self { config }
    }

    /// Returns the phase the game is in.
    pub fn phase(&self, game: &Game) -> Phase {
        if game.bisection_complete() {
            Phase::Proving
        } else {
            Phase::Bisection
        }
    }

    /// Checks the game's clocks at `now` (UNIX seconds). The verdict is
    /// monotonic: accumulated time never shrinks, so once a side has
    /// exhausted its budget the game stays resolvable until it turns
    /// terminal, at which point the verdict goes quiet.
    pub fn tick(&self, game: &Game, now: u64) -> Verdict {
        if game.status() != GameStatus::InProgress {
            return Verdict::PENDING;
        }

        let budget = match self.phase(game) {
            Phase::Bisection => self.config.response_timeout,
            Phase::Proving => self.config.prove_timeout,
        }
        .as_secs();

        let on_clock = game.turn();
        let total = |role: Role| {
            let running = if on_clock == Some(role) {
                now.saturating_sub(game.last_move_at)
            } else {
                0
            };
            game.elapsed(role) + running
        };

        for role in [Role::Defender, Role::Challenger] {
            if total(role) > budget {
                return Verdict {
                    can_resolve: true,
                    winner: Some(role.opponent()),
                };
            }
        }
        Verdict::PENDING
    }
}
