//! Domain models and database access.

pub mod kv;
pub mod models;
pub mod reference;
