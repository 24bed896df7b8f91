//! Domain layer types and invariants.

pub mod building;
pub mod costing;
pub mod validation;
