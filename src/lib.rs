//! Build shell-style pipelines of external commands directly on top of `fork`, `pipe`,
//! `dup2` and `exec`.
//!
//! A [`Pipeline`] is an ordered list of [`Stage`]s. Running it allocates one channel
//! (pipe) per pair of adjacent stages, forks one child per stage, moves the right
//! channel endpoints onto each child's standard input and output, closes every other
//! endpoint, and replaces the child with the stage's program. The calling process then
//! closes its own copies of the endpoints and reaps every stage.
//!
//! ```no_run
//! use pipechain::{Pipeline, Stage};
//!
//! # fn dummy() -> pipechain::Result<()> {
//! // ps -A | grep sshd | wc -l
//! let outcome = Pipeline::new()
//!     .pipe(Stage::cmd("ps").arg("-A"))
//!     .pipe(Stage::cmd("grep").arg("sshd"))
//!     .pipe(Stage::cmd("wc").arg("-l"))
//!     .strict()
//!     .run()?;
//! println!("{}", outcome);
//! # Ok(())
//! # }
//! ```
//!
//! This crate is Unix-only.

#![cfg(unix)]

mod channel;
pub mod config;
mod error;
mod pipeline;
mod posix;
mod stage;
mod status;
mod wiring;

#[cfg(test)]
mod tests;

pub use channel::{Channel, ChannelSet};
pub use error::{EXEC_FAILURE_CODE, FAILURE_CODE, PipelineError, Result};
pub use pipeline::{ExitOutcome, ExitPolicy, Pipeline, StageOutcome, run_pipeline};
pub use stage::{Position, PreparedStage, Stage};
pub use status::ExitStatus;
pub use wiring::{PosixOps, StageOps, Wiring};
