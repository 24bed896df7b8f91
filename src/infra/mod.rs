//! Infrastructure adapters and runtime bootstrap.

pub mod error;
pub mod http;
pub mod ifc;
pub mod keep_alive;
pub mod llm;
pub mod supabase;
pub mod telemetry;
pub mod uploads;
