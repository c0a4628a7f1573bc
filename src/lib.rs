//! `strand-skin` library crate.
//!
//! The binary (`skin`) is a thin wrapper around this library so that:
//!
//! - core logic is testable without spawning processes
//! - the estimator can be driven from other tools (batch farms, notebooks, etc.)
//! - code stays easy to navigate as the project grows

pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod graph;
pub mod io;
pub mod math;
pub mod report;
