//! Persistence for registered devices and their sealed key versions.

mod model;
mod repository;

pub use model::*;
pub use repository::*;
