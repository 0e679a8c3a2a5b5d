pub mod buckets;
pub mod cli;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod features;
pub mod gateway;
pub mod models;
pub mod scheduler;
pub mod state;
