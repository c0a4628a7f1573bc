//! Skinning weight estimation.
//!
//! Responsibilities:
//!
//! - assemble and cache the per-strand normal equations (`system`)
//! - solve one strand's simplex-constrained blend weights (`solver`)
//! - run the solver over a task of strands, sequentially or in parallel (`driver`)
//! - report progress while doing so (`progress`)

pub mod driver;
pub mod progress;
pub mod solver;
pub mod system;

#[cfg(test)]
pub(crate) mod testing;

pub use driver::*;
pub use progress::*;
pub use solver::*;
pub use system::*;
