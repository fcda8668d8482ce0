//! Errors produced while building and reaping a pipeline.

use std::io;

use thiserror::Error;

use crate::pipeline::ExitOutcome;

/// Process exit status reported for every pipeline failure.
pub const FAILURE_CODE: i32 = 1;

/// Status a stage exits with when its program cannot be executed, as in the shell.
pub const EXEC_FAILURE_CODE: u8 = 127;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// The pipeline was described incorrectly; nothing was spawned.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A channel could not be allocated; nothing was spawned.
    #[error("cannot allocate channel {channel}: {source}")]
    Resource {
        channel: usize,
        #[source]
        source: io::Error,
    },

    /// Process creation failed for the given stage.
    #[error("cannot spawn stage {stage}: {source}")]
    Spawn {
        stage: usize,
        #[source]
        source: io::Error,
    },

    /// Rewiring or program replacement failed inside a spawned stage.
    ///
    /// This error only exists in the child; the orchestrator observes it as an exit
    /// status of 127.
    #[error("cannot execute stage {stage}: {source}")]
    Exec {
        stage: usize,
        #[source]
        source: io::Error,
    },

    /// Waiting on a stage failed.
    #[error("cannot wait for stage {stage} (pid {pid}): {source}")]
    Wait {
        stage: usize,
        pid: u32,
        #[source]
        source: io::Error,
    },

    /// The pipeline did not finish in time; its stages were terminated and reaped.
    #[error("pipeline timed out after {:?}", .outcome.elapsed)]
    Timeout { outcome: ExitOutcome },
}

impl PipelineError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Exit status for the orchestrating process.
    pub fn exit_code(&self) -> i32 {
        FAILURE_CODE
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
