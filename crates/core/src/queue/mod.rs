//! Offline transaction queue domain: entries, sale payloads, repositories.

mod queue_model;
mod queue_traits;

pub use queue_model::*;
pub use queue_traits::*;
