//! Persistence for the append-only device activity log.

mod model;
mod repository;

pub use model::*;
pub use repository::*;
