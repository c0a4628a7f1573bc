//! Proximity graph construction and strand grouping.
//!
//! - particle proximity graph, filtering and coarsening (`proximity`)
//! - strand → candidate guide index and label propagation (`grouping`)

pub mod grouping;
pub mod proximity;

pub use grouping::*;
pub use proximity::*;
