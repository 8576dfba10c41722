//! Data models

mod instance;

pub use instance::*;
