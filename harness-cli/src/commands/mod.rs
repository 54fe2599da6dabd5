//! Subcommand implementations.

pub mod install;
pub mod run;
pub mod sweep;
pub mod teardown;
