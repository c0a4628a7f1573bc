//! Mathematical utilities: particle transforms and the simplex QP solver.

pub mod qp;
pub mod transform;

pub use qp::*;
pub use transform::*;
