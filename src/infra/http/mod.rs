mod admin;
pub mod error;
pub mod middleware;
mod public;

pub use admin::{AdminState, build_admin_router};
pub use error::ApiError;
pub use public::{HttpState, build_router};
