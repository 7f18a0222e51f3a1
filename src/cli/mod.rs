//! CLI module for the market binary

pub mod app;
pub mod commands;

pub use app::MarketApp;
pub use commands::{Cli, Commands, PolicyArg, RoleArg};
