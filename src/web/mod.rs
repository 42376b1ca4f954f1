//! HTTP API: job endpoints, reference data, health and status.

pub mod error;
pub mod jobs;
pub mod middleware;
pub mod reference;
pub mod routes;
pub mod status;

pub use routes::*;
