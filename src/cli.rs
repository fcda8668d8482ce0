//! Command-line arguments.

use std::ffi::OsString;
use std::path::PathBuf;

use clap::Parser;

/// Run `ps -A | grep PATTERN | wc -l` without a shell.
#[derive(Parser, Debug)]
#[command(name = "pipechain", author, version)]
pub struct Cli {
    /// Pattern passed verbatim as the filter's last argument
    pub pattern: Option<OsString>,

    /// Exit with the status of the rightmost stage that failed
    #[arg(long, env = "PIPECHAIN_STRICT")]
    pub strict: bool,

    /// Terminate the pipeline if it has not finished after this many seconds
    #[arg(long, value_name = "SECS", env = "PIPECHAIN_TIMEOUT")]
    pub timeout: Option<f64>,

    /// TOML file overriding the source, filter and counter commands
    #[arg(short, long, value_name = "PATH", env = "PIPECHAIN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all log output except errors
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}
