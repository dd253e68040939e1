//! Outbound HTTP: provider deploy API and deployed-site fetches

pub mod client;
pub mod error;
pub mod fetch;
