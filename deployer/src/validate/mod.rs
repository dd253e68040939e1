//! Pre-flight and post-deploy validation

pub mod live;
pub mod markup;
pub mod preflight;
pub mod stylesheet;
