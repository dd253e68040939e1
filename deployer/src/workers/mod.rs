//! Background workers

pub mod janitor;
pub mod notifier;
