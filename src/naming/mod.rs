//! Name normalisation shared by both descriptor variants.

pub mod case;
pub mod context;

pub use case::{CaseType, NameManipulator};
pub use context::NamingContext;
