//! # Folio Common
//!
//! Data model shared by the schema and editor crates: node identifiers, nodes,
//! marks, the serializable node record, and depth-first tree walking.

pub mod id_generator;
pub mod model;
pub mod visitor;

pub use id_generator::*;
pub use model::*;
pub use visitor::*;
