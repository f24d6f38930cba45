//! Register device domain: models, repository traits, pairing service.

mod devices_model;
mod devices_traits;
mod pairing_service;

pub use devices_model::*;
pub use devices_traits::*;
pub use pairing_service::*;
