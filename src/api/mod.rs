//! HTTP boundary for the coding pipeline.
//!
//! `api_router()` returns a composable `Router`; `server` owns the
//! bind / serve / shutdown lifecycle.

pub mod endpoints;
pub mod error;
pub mod router;
pub mod server;
pub mod types;

pub use router::api_router;
pub use server::{start_api_server, ApiServer};
pub use types::ApiContext;
