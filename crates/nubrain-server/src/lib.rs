//! NuBrain Server
//!
//! HTTP front end and command line interface for the brain MRI tumor
//! classification pipelines.

pub mod cli;
pub mod config;
pub mod routes;
pub mod state;

pub use config::{ServerConfig, ServerOverrides};
pub use routes::create_router;
pub use state::AppState;
