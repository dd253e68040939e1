//! Site deployer library
//!
//! Validates website bundles, publishes them to hosting providers through a
//! job queue, and verifies the deployed result.

pub mod app;
pub mod classify;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod http;
pub mod logs;
pub mod models;
pub mod notify;
pub mod queue;
pub mod server;
pub mod site;
pub mod storage;
pub mod store;
pub mod telemetry;
pub mod utils;
pub mod validate;
pub mod workers;
