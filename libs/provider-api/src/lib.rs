//! Wire models for the hosting provider deploy API

pub mod models;

pub use models::*;
