//! bimvision: IFC building-model analysis with a content-addressed result cache.
//!
//! Uploaded models are fingerprinted by their bytes, parsed into a
//! [`domain::building::BuildingRecord`], summarised by an LLM and cached in
//! [`cache::ResultCache`] so repeated uploads within the TTL are answered
//! without parsing or inference.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
pub mod util;
