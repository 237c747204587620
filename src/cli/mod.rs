//! CLI command implementations

pub mod backfill;
pub mod error;
pub mod status;
pub mod validate;

pub use backfill::{BackfillArgs, Cli, Commands, OutputFormat};
pub use error::CliError;
pub use status::{ResetCommand, StatusCommand};
pub use validate::ValidateCommand;
