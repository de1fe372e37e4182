//! Mirador CLI Library
//!
//! Command-line interface and HTTP service for the Mirar visual
//! regression testing engine.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)] // Error types are self-documenting

mod commands;
mod config;
mod error;
mod output;
pub mod server;

pub use commands::{CaptureArgs, Cli, ColorArg, Commands, CompareArgs, ConfigArgs, ServeArgs};
pub use config::{CliConfig, ColorChoice, Verbosity};
pub use error::{CliError, CliResult};
pub use output::{OutputFormat, ProgressReporter};
pub use server::{
    ApiServer, AppState, ErrorBody, Health, PixelCompareRequest, PixelCompareResponse, RunAccepted,
    RunRequest,
};
