pub mod commands;
pub mod config;

pub use commands::{run_command, CliCommand, CommandContext, StdoutSink};
pub use config::CliConfig;
