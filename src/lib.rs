//! DDoS live feed: streaming enrichment and fan-out of attack telemetry.

pub mod api;
pub mod config;
pub mod core;
pub mod models;
pub mod utils;
