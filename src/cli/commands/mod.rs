//! Command implementations, one module per subcommand

pub mod config;
pub mod generate;
