use std::cmp::min;
use std::fmt;
use std::io;
use std::ops::BitOr;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::channel::ChannelSet;
use crate::error::{EXEC_FAILURE_CODE, PipelineError, Result};
use crate::posix;
use crate::stage::{PreparedStage, Stage};
use crate::status::ExitStatus;
use crate::wiring::{PosixOps, Wiring, rewire_and_exec};

/// Process operations the orchestrator performs on its stages.
pub(crate) trait ProcessOps {
    /// Forks for `stage`: `Some(pid)` in the parent, `None` in the child.
    ///
    /// # Safety
    ///
    /// Same as [`posix::fork`]: the child must not allocate.
    unsafe fn fork(&mut self, stage: &PreparedStage) -> io::Result<Option<u32>>;
    fn waitpid(&mut self, pid: u32, flags: i32) -> io::Result<Option<i32>>;
    fn kill(&mut self, pid: u32, signal: i32) -> io::Result<()>;
}

impl ProcessOps for PosixOps {
    unsafe fn fork(&mut self, _stage: &PreparedStage) -> io::Result<Option<u32>> {
        unsafe { posix::fork() }
    }

    fn waitpid(&mut self, pid: u32, flags: i32) -> io::Result<Option<i32>> {
        posix::waitpid(pid, flags)
    }

    fn kill(&mut self, pid: u32, signal: i32) -> io::Result<()> {
        posix::kill(pid, signal)
    }
}

/// How the exit statuses of the stages translate into the outcome of the run.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum ExitPolicy {
    /// The run succeeds once every stage has been spawned and reaped, whatever the
    /// stages' own exit statuses.
    #[default]
    BestEffort,
    /// The rightmost stage that did not exit with status 0 determines the exit code,
    /// like the shell's `pipefail`. A stage that failed usually makes the stages
    /// writing to it die of `SIGPIPE`, so the rightmost failure is the one that matters.
    Strict,
}

/// A chain of stages connected by pipes, like the shell's `cmd1 | cmd2 | cmd3`.
///
/// Each stage's standard output is connected to the next stage's standard input. The
/// first stage inherits standard input and the last stage inherits standard output from
/// the calling process; standard error is inherited by all stages.
///
/// # Example
///
/// ```no_run
/// use pipechain::{Pipeline, Stage};
///
/// # fn dummy() -> pipechain::Result<()> {
/// let outcome = (Stage::cmd("ps").arg("-A")
///     | Stage::cmd("grep").arg("sshd")
///     | Stage::cmd("wc").arg("-l"))
///     .run()?;
/// assert!(outcome.success());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
#[must_use]
pub struct Pipeline {
    stages: Vec<Stage>,
    policy: ExitPolicy,
    timeout: Option<Duration>,
}

impl Pipeline {
    /// Creates a new empty pipeline.
    pub fn new() -> Pipeline {
        Pipeline::default()
    }

    /// Appends a stage to the pipeline.
    ///
    /// This is the builder-style equivalent of the `|` operator.
    pub fn pipe(mut self, stage: Stage) -> Pipeline {
        self.stages.push(stage);
        self
    }

    /// Sets how stage exit statuses are reported.
    pub fn policy(mut self, policy: ExitPolicy) -> Pipeline {
        self.policy = policy;
        self
    }

    /// Shorthand for `policy(ExitPolicy::Strict)`.
    pub fn strict(self) -> Pipeline {
        self.policy(ExitPolicy::Strict)
    }

    /// Limits how long [`run`](Self::run) waits for the stages to finish.
    ///
    /// When the time runs out, stages still running are sent `SIGTERM`, reaped, and
    /// `PipelineError::Timeout` is returned.
    pub fn timeout(mut self, timeout: Duration) -> Pipeline {
        self.timeout = Some(timeout);
        self
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    fn validate(&self) -> Result<()> {
        if self.stages.is_empty() {
            return Err(PipelineError::configuration("pipeline has no stages"));
        }
        for (index, stage) in self.stages.iter().enumerate() {
            if stage.program().is_empty() {
                return Err(PipelineError::configuration(format!(
                    "stage {} has an empty program name",
                    index
                )));
            }
        }
        Ok(())
    }

    fn prepare(&self) -> Result<Vec<PreparedStage>> {
        self.stages
            .iter()
            .enumerate()
            .map(|(index, stage)| {
                stage.prepare(index).map_err(|e| {
                    PipelineError::configuration(format!("stage {} ({}): {}", index, stage, e))
                })
            })
            .collect()
    }

    /// Spawns every stage, waits for all of them, and reports the outcome.
    ///
    /// All channels are allocated before the first stage is spawned. Stages are spawned
    /// in order from a single loop in the calling process, so every stage is a direct
    /// child of the caller and is reaped by this call. If a spawn fails, the stages
    /// already started are sent `SIGTERM` and reaped before the error is returned.
    pub fn run(&self) -> Result<ExitOutcome> {
        self.run_with(&mut PosixOps)
    }

    pub(crate) fn run_with(&self, ops: &mut impl ProcessOps) -> Result<ExitOutcome> {
        self.validate()?;
        let prepared = self.prepare()?;
        let channels = ChannelSet::allocate(self.stages.len())?;
        debug!(channels = channels.len(), "allocated channels");
        let wirings = Wiring::plan_all(&channels);

        let started = Instant::now();
        let mut children: Vec<Child> = Vec::with_capacity(self.stages.len());
        for (stage, wiring) in prepared.iter().zip(&wirings) {
            match unsafe { ops.fork(stage) } {
                Ok(Some(pid)) => {
                    debug!(stage = stage.index, pid, command = %self.stages[stage.index], "spawned stage");
                    children.push(Child::new(stage.index, pid));
                }
                Ok(None) => exec_child(wiring, stage),
                Err(source) => {
                    warn!(stage = stage.index, error = %source, "fork failed");
                    channels.close();
                    // The started stages may be waiting on inherited stdin.
                    terminate_running(ops, &children);
                    if let Err(e) = reap_all(ops, &mut children) {
                        warn!(error = %e, "cannot reap started stages");
                    }
                    return Err(PipelineError::Spawn {
                        stage: stage.index,
                        source,
                    });
                }
            }
        }
        // Our copies of the write endpoints would keep readers from ever seeing EOF.
        channels.close();

        let timed_out = match self.timeout {
            None => {
                reap_all(ops, &mut children)?;
                false
            }
            Some(timeout) => reap_until(ops, &mut children, started + timeout)?,
        };

        let outcome = ExitOutcome {
            stages: children
                .iter()
                .map(|child| StageOutcome {
                    stage: self.stages[child.index].clone(),
                    pid: child.pid,
                    status: child.status.unwrap_or_else(ExitStatus::undetermined),
                })
                .collect(),
            policy: self.policy,
            elapsed: started.elapsed(),
        };
        if timed_out {
            warn!(elapsed = ?outcome.elapsed, "pipeline timed out");
            return Err(PipelineError::Timeout { outcome });
        }
        info!(
            stages = outcome.stages.len(),
            exit_code = outcome.exit_code(),
            elapsed = ?outcome.elapsed,
            "pipeline finished"
        );
        Ok(outcome)
    }
}

impl FromIterator<Stage> for Pipeline {
    fn from_iter<I: IntoIterator<Item = Stage>>(iter: I) -> Pipeline {
        Pipeline {
            stages: iter.into_iter().collect(),
            ..Pipeline::default()
        }
    }
}

impl BitOr<Stage> for Stage {
    type Output = Pipeline;

    /// Create a `Pipeline` from `self` and `rhs`.
    fn bitor(self, rhs: Stage) -> Pipeline {
        Pipeline::new().pipe(self).pipe(rhs)
    }
}

impl BitOr<Stage> for Pipeline {
    type Output = Pipeline;

    /// Append a stage to the pipeline and return a new pipeline.
    fn bitor(self, rhs: Stage) -> Pipeline {
        self.pipe(rhs)
    }
}

/// Runs `stages` as a pipeline with the best-effort exit policy.
pub fn run_pipeline(stages: impl IntoIterator<Item = Stage>) -> Result<ExitOutcome> {
    stages.into_iter().collect::<Pipeline>().run()
}

/// The exit status of one reaped stage.
#[derive(Debug, Clone)]
pub struct StageOutcome {
    pub stage: Stage,
    pub pid: u32,
    pub status: ExitStatus,
}

/// The result of a completed run: every stage's status, in pipeline order.
#[derive(Debug, Clone)]
pub struct ExitOutcome {
    pub stages: Vec<StageOutcome>,
    pub policy: ExitPolicy,
    pub elapsed: Duration,
}

impl ExitOutcome {
    /// The rightmost stage that did not exit with status 0.
    pub fn last_failure(&self) -> Option<&StageOutcome> {
        self.stages.iter().rev().find(|s| !s.status.success())
    }

    /// Exit code for the orchestrating process.
    ///
    /// Always 0 under [`ExitPolicy::BestEffort`]. Under [`ExitPolicy::Strict`], the
    /// rightmost failing stage's code, or 128 plus the signal that killed it.
    pub fn exit_code(&self) -> i32 {
        match self.policy {
            ExitPolicy::BestEffort => 0,
            ExitPolicy::Strict => self
                .last_failure()
                .map(|s| s.status.shell_code())
                .unwrap_or(0),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code() == 0
    }

    pub fn pids(&self) -> Vec<u32> {
        self.stages.iter().map(|s| s.pid).collect()
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, s) in self.stages.iter().enumerate() {
            if index > 0 {
                write!(f, " | ")?;
            }
            write!(f, "{} ({})", s.stage, s.status)?;
        }
        Ok(())
    }
}

/// Body of a forked stage. Never returns.
fn exec_child(wiring: &Wiring, stage: &PreparedStage) -> ! {
    let err = rewire_and_exec(&mut PosixOps, wiring, stage);
    let errno = match &err {
        PipelineError::Exec { source, .. } => source.raw_os_error().unwrap_or(0),
        _ => 0,
    };
    let mut digits = [0u8; 12];
    posix::write_stderr(&stage.exec_failure);
    posix::write_stderr(b" (os error ");
    posix::write_stderr(format_decimal(errno, &mut digits));
    posix::write_stderr(b")\n");
    posix::_exit(EXEC_FAILURE_CODE)
}

/// Formats `n` into `buf` without allocating.
pub(crate) fn format_decimal(n: i32, buf: &mut [u8; 12]) -> &[u8] {
    let mut pos = buf.len();
    let mut value = n.unsigned_abs();
    loop {
        pos -= 1;
        buf[pos] = b'0' + (value % 10) as u8;
        value /= 10;
        if value == 0 {
            break;
        }
    }
    if n < 0 {
        pos -= 1;
        buf[pos] = b'-';
    }
    &buf[pos..]
}

/// A spawned stage, owned by the orchestrator until reaped.
#[derive(Debug)]
struct Child {
    index: usize,
    pid: u32,
    status: Option<ExitStatus>,
}

impl Child {
    fn new(index: usize, pid: u32) -> Child {
        Child {
            index,
            pid,
            status: None,
        }
    }

    fn is_reaped(&self) -> bool {
        self.status.is_some()
    }

    fn reap(&mut self, ops: &mut impl ProcessOps, block: bool) -> io::Result<()> {
        while !self.is_reaped() {
            match ops.waitpid(self.pid, if block { 0 } else { posix::WNOHANG }) {
                Ok(Some(raw)) => {
                    let status = ExitStatus::from_raw(raw);
                    debug!(stage = self.index, pid = self.pid, %status, "reaped stage");
                    self.status = Some(status);
                }
                Ok(None) => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.raw_os_error() == Some(posix::ECHILD) => {
                    // Someone else waited for the child, its status is gone.
                    self.status = Some(ExitStatus::undetermined());
                }
                Err(e) => return Err(e),
            }
            if !block {
                break;
            }
        }
        Ok(())
    }

    fn terminate(&self, ops: &mut impl ProcessOps) -> io::Result<()> {
        match ops.kill(self.pid, posix::SIGTERM) {
            Err(e) if e.raw_os_error() == Some(posix::ESRCH) => Ok(()),
            other => other,
        }
    }

    fn wait_error(&self, source: io::Error) -> PipelineError {
        warn!(pid = self.pid, error = %source, "cannot reap stage");
        PipelineError::Wait {
            stage: self.index,
            pid: self.pid,
            source,
        }
    }
}

/// Sends `SIGTERM` to every child not yet reaped.
fn terminate_running(ops: &mut impl ProcessOps, children: &[Child]) {
    for child in children.iter().filter(|c| !c.is_reaped()) {
        debug!(stage = child.index, pid = child.pid, "terminating stage");
        if let Err(e) = child.terminate(ops) {
            warn!(pid = child.pid, error = %e, "cannot terminate stage");
        }
    }
}

/// Blocks until every child is reaped. A failed wait does not stop the others from
/// being reaped; the first failure is returned.
fn reap_all(ops: &mut impl ProcessOps, children: &mut [Child]) -> Result<()> {
    let mut first_err = None;
    for child in children.iter_mut() {
        if let Err(source) = child.reap(ops, true) {
            first_err.get_or_insert(child.wait_error(source));
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Polls the children until all are reaped or `deadline` passes. On timeout, terminates
/// and reaps the remaining children and returns `true`.
///
/// A child whose wait fails is no longer polled; the others are still reaped and the
/// first failure is returned.
fn reap_until(
    ops: &mut impl ProcessOps,
    children: &mut [Child],
    deadline: Instant,
) -> Result<bool> {
    let mut first_err = None;
    let mut failed = vec![false; children.len()];
    let mut delay = Duration::from_millis(1);
    let timed_out = loop {
        for (child, failed) in children.iter_mut().zip(failed.iter_mut()) {
            if *failed {
                continue;
            }
            if let Err(source) = child.reap(ops, false) {
                *failed = true;
                first_err.get_or_insert(child.wait_error(source));
            }
        }
        if children.iter().zip(&failed).all(|(c, &f)| f || c.is_reaped()) {
            break false;
        }
        let now = Instant::now();
        if now >= deadline {
            break true;
        }
        std::thread::sleep(min(delay, deadline - now));
        delay = min(delay * 2, Duration::from_millis(100));
    };

    if timed_out {
        terminate_running(ops, children);
        for (child, _) in children.iter_mut().zip(&failed).filter(|(_, f)| !**f) {
            if let Err(source) = child.reap(ops, true) {
                first_err.get_or_insert(child.wait_error(source));
            }
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(timed_out),
    }
}
