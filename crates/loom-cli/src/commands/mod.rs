//! CLI command implementations

pub mod generate;
pub mod history;
pub mod providers;
