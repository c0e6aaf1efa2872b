//! CLI command implementations.

pub mod output;
pub mod run;
