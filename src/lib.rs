// genvault - secure multi-tier response cache and batch orchestrator
// Author: kelexine (https://github.com/kelexine)

pub mod audit;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod integrity;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod pipeline;
pub mod ratelimit;
pub mod server;
pub mod templates;
pub mod utils;
