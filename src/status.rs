use std::fmt;

/// Exit status of a reaped stage.
///
/// Wraps the raw status returned by `waitpid()`. `None` means it is known that the
/// process has finished, but its status is unavailable (someone else reaped it).
#[derive(Eq, PartialEq, Hash, Copy, Clone)]
pub struct ExitStatus(pub(crate) Option<i32>);

impl ExitStatus {
    /// Create an `ExitStatus` from the raw `waitpid()` status.
    pub fn from_raw(raw: i32) -> ExitStatus {
        ExitStatus(Some(raw))
    }

    /// An exit status that could not be determined.
    pub fn undetermined() -> ExitStatus {
        ExitStatus(None)
    }

    /// True if the exit status of the process is 0.
    pub fn success(&self) -> bool {
        self.code() == Some(0)
    }

    /// Returns the exit code if the process exited normally.
    pub fn code(&self) -> Option<u32> {
        let raw = self.0?;
        libc::WIFEXITED(raw).then(|| libc::WEXITSTATUS(raw) as u32)
    }

    /// Returns the signal number if the process was killed by a signal.
    pub fn signal(&self) -> Option<i32> {
        let raw = self.0?;
        libc::WIFSIGNALED(raw).then(|| libc::WTERMSIG(raw))
    }

    /// The status a shell would report for this process: the exit code, or 128 plus
    /// the signal number. Undetermined statuses map to 1.
    pub fn shell_code(&self) -> i32 {
        if let Some(code) = self.code() {
            code as i32
        } else if let Some(signal) = self.signal() {
            128 + signal
        } else {
            1
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(raw) if libc::WIFEXITED(raw) => {
                write!(f, "exit code {}", libc::WEXITSTATUS(raw))
            }
            Some(raw) if libc::WIFSIGNALED(raw) => {
                write!(f, "signal {}", libc::WTERMSIG(raw))
            }
            Some(raw) => {
                write!(f, "unrecognized wait status: {} {:#x}", raw, raw)
            }
            None => write!(f, "undetermined exit status"),
        }
    }
}

impl fmt::Debug for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(raw) if libc::WIFEXITED(raw) => {
                write!(f, "ExitStatus(Exited({}))", libc::WEXITSTATUS(raw))
            }
            Some(raw) if libc::WIFSIGNALED(raw) => {
                write!(f, "ExitStatus(Signal({}))", libc::WTERMSIG(raw))
            }
            Some(raw) => {
                write!(f, "ExitStatus(Unknown({} {:#x}))", raw, raw)
            }
            None => write!(f, "ExitStatus(Undetermined)"),
        }
    }
}
