//! Per-stage descriptor plan, applied in the child between fork and exec.
//!
//! A pipe reader sees end-of-file only once every copy of the write endpoint is closed,
//! in every process. Each stage therefore closes all channel endpoints it does not use,
//! and after moving the ones it does use onto stdin/stdout, closes their original
//! descriptors as well. A stage entering exec holds channel endpoints only on
//! descriptors 0 and 1.

use std::io;
use std::os::unix::io::RawFd;

use crate::channel::ChannelSet;
use crate::error::PipelineError;
use crate::posix;
use crate::stage::{Position, PreparedStage};

const STDIN: RawFd = 0;
const STDOUT: RawFd = 1;

/// Descriptor plan for one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wiring {
    pub position: Position,
    /// Endpoint to move onto standard input.
    pub stdin: Option<RawFd>,
    /// Endpoint to move onto standard output.
    pub stdout: Option<RawFd>,
    /// Endpoints the stage does not use.
    pub unused: Vec<RawFd>,
}

impl Wiring {
    /// Plans the wiring of stage `index` in a pipeline connected by `channels`.
    ///
    /// Returns `None` if the pipeline has no stage `index`.
    pub fn plan(index: usize, channels: &ChannelSet) -> Option<Wiring> {
        let position = Position::of(index, channels.len() + 1)?;
        let stdin = position
            .reads()
            .then(|| channels.get(index - 1).map(|c| c.read_fd()))
            .flatten();
        let stdout = position
            .writes()
            .then(|| channels.get(index).map(|c| c.write_fd()))
            .flatten();
        let unused = channels
            .endpoints()
            .into_iter()
            .filter(|&fd| Some(fd) != stdin && Some(fd) != stdout)
            .collect();
        Some(Wiring {
            position,
            stdin,
            stdout,
            unused,
        })
    }

    /// Plans every stage of the pipeline connected by `channels`, in order.
    pub fn plan_all(channels: &ChannelSet) -> Vec<Wiring> {
        (0..=channels.len())
            .filter_map(|index| Wiring::plan(index, channels))
            .collect()
    }

    /// Endpoints the stage keeps, before they are moved onto stdin/stdout.
    pub fn used(&self) -> impl Iterator<Item = RawFd> + '_ {
        self.stdin.iter().chain(self.stdout.iter()).copied()
    }
}

/// Descriptor and exec operations performed by a stage before it becomes its program.
pub trait StageOps {
    fn close(&mut self, fd: RawFd) -> io::Result<()>;
    fn dup2(&mut self, oldfd: RawFd, newfd: RawFd) -> io::Result<()>;
    /// Lets `fd` survive exec.
    fn inherit(&mut self, fd: RawFd) -> io::Result<()>;
    fn reset_signals(&mut self) -> io::Result<()>;
    /// Replaces the process image. Only returns on failure.
    fn exec(&mut self, stage: &PreparedStage) -> io::Error;
}

/// The real operations, used in forked children.
#[derive(Debug, Default)]
pub struct PosixOps;

impl StageOps for PosixOps {
    fn close(&mut self, fd: RawFd) -> io::Result<()> {
        posix::close(fd)
    }

    fn dup2(&mut self, oldfd: RawFd, newfd: RawFd) -> io::Result<()> {
        posix::dup2(oldfd, newfd)
    }

    fn inherit(&mut self, fd: RawFd) -> io::Result<()> {
        posix::set_cloexec(fd, false)
    }

    fn reset_signals(&mut self) -> io::Result<()> {
        posix::reset_sigpipe()
    }

    fn exec(&mut self, stage: &PreparedStage) -> io::Error {
        posix::execvp(&stage.program, &stage.argv)
    }
}

// dup2 clears FD_CLOEXEC on the new descriptor; an endpoint that already sits on
// its target keeps the flag and must be cleared explicitly.
fn move_onto(ops: &mut impl StageOps, fd: Option<RawFd>, target: RawFd) -> io::Result<()> {
    match fd {
        Some(fd) if fd == target => ops.inherit(fd),
        Some(fd) => ops.dup2(fd, target),
        None => Ok(()),
    }
}

/// Applies `wiring` and execs `stage`. Returns only if something failed.
///
/// Must not allocate: it runs in a forked child.
pub(crate) fn rewire_and_exec(
    ops: &mut impl StageOps,
    wiring: &Wiring,
    stage: &PreparedStage,
) -> PipelineError {
    let exec_err = |source| PipelineError::Exec {
        stage: stage.index,
        source,
    };
    for &fd in &wiring.unused {
        if let Err(e) = ops.close(fd) {
            return exec_err(e);
        }
    }
    if let Err(e) = move_onto(ops, wiring.stdin, STDIN) {
        return exec_err(e);
    }
    if let Err(e) = move_onto(ops, wiring.stdout, STDOUT) {
        return exec_err(e);
    }
    let is_target = |fd: RawFd| {
        (fd == STDIN && wiring.stdin.is_some()) || (fd == STDOUT && wiring.stdout.is_some())
    };
    for fd in wiring.used() {
        if !is_target(fd)
            && let Err(e) = ops.close(fd)
        {
            return exec_err(e);
        }
    }
    if let Err(e) = ops.reset_signals() {
        return exec_err(e);
    }
    exec_err(ops.exec(stage))
}
