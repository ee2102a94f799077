//! Query operators
//!
//! Only the snapshot-visibility operator lives here; scan, projection, and
//! the plan layer are external collaborators that consume the same table and
//! transaction interfaces.

pub mod validate;

pub use validate::Validate;
