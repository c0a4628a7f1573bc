//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - frame geometry and strand layout (`Frame`, `StrandLayout`, `ParticleBatch`)
//! - run configuration (`EstimateConfig`, `GraphConfig`, `SolverOptions`)
//! - estimation outputs (`WeightTable`, `WeightEntry`, `WeightFile`)

pub mod types;

pub use types::*;
