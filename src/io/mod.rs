//! Input/output helpers.
//!
//! - binary hair cache read/write (`cache`)
//! - guide motion table read/write (`guides`)
//! - METIS graph export and partition import (`metis`)
//! - weight table JSON read/write (`weights`)
//! - per-strand CSV export (`export`)

pub mod binary;
pub mod cache;
pub mod export;
pub mod guides;
pub mod metis;
pub mod weights;

pub use cache::*;
pub use export::*;
pub use guides::*;
pub use metis::*;
pub use weights::*;
