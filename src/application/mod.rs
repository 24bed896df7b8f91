//! Application services and the collaborator ports they depend on.

pub mod analysis;
pub mod error;
pub mod ports;
