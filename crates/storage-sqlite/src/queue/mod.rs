//! Persistence for the offline queue and the settlement audit table.

mod model;
mod repository;

pub use model::*;
pub use repository::*;
