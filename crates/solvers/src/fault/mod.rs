//! Data structures, types, and the move solver for the fault dispute game.

mod position;
pub use position::{compute_gindex, Position};

mod types;
pub use types::*;

mod claims;
pub use claims::{ClaimTree, ClaimTreeError};

mod game;
pub use game::{Game, TraceError, TraceOracle};

mod solver;
pub use solver::{MoveEngine, SolverError, TerminalVerifier};

mod clock;
pub use clock::{ClockConfig, ClockMonitor, Phase, Verdict};
