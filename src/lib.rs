pub mod bars;
pub mod config;
pub mod database;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod indicators;
pub mod ingest;
pub mod ml;
pub mod store;
pub mod types;
