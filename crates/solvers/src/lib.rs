//! Pure, deterministic logic for the interactive bisection dispute game.
//! Nothing in this crate performs I/O; the driver crate wires these solvers
//! to the chain, the local trace source, and the terminal provers.

pub mod fault;
