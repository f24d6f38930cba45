//! Persistence for the durable settlement job queue.

mod model;
mod repository;

pub use model::*;
pub use repository::*;
