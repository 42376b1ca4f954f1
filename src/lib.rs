//! Incremental cache-refresh job engine for market data.
//!
//! Item metadata comes from XIVAPI and market prices from Universalis. Both
//! are cached in PostgreSQL and refreshed through pollable background jobs.

pub mod app;
pub mod cli;
pub mod config;
pub mod data;
pub mod logging;
pub mod reference;
pub mod refresh;
pub mod services;
pub mod state;
pub mod store;
pub mod upstream;
pub mod utils;
pub mod web;
