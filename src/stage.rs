use std::ffi::{CString, OsStr, OsString};
use std::fmt;
use std::io;

use crate::posix::{self, CVec};

/// One program in a pipeline.
///
/// A stage is a program name and its arguments. The program is looked up in `PATH` when
/// the stage is executed; arguments are passed verbatim, without any shell-style
/// splitting or quoting.
///
/// # Example
///
/// ```
/// use pipechain::Stage;
///
/// let filter = Stage::cmd("grep").arg("sshd");
/// assert_eq!(filter.argv(), ["grep", "sshd"]);
/// ```
#[derive(Clone, PartialEq, Eq)]
#[must_use]
pub struct Stage {
    program: OsString,
    args: Vec<OsString>,
}

impl Stage {
    /// Creates a stage that runs `program` with no arguments.
    pub fn cmd(program: impl AsRef<OsStr>) -> Stage {
        Stage {
            program: program.as_ref().to_owned(),
            args: vec![],
        }
    }

    /// Appends `arg` to the argument list.
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Stage {
        self.args.push(arg.as_ref().to_owned());
        self
    }

    /// Extends the argument list with `args`.
    pub fn args(mut self, args: impl IntoIterator<Item = impl AsRef<OsStr>>) -> Stage {
        self.args
            .extend(args.into_iter().map(|x| x.as_ref().to_owned()));
        self
    }

    pub fn program(&self) -> &OsStr {
        &self.program
    }

    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }

    /// The full argument vector, starting with the program name.
    pub fn argv(&self) -> Vec<OsString> {
        let mut argv = Vec::with_capacity(self.args.len() + 1);
        argv.push(self.program.clone());
        argv.extend(self.args.iter().cloned());
        argv
    }

    /// Converts the stage into C strings ready for `execvp`.
    ///
    /// Must be called before forking: the child may not allocate.
    pub(crate) fn prepare(&self, index: usize) -> io::Result<PreparedStage> {
        let program = posix::os_to_cstring(&self.program)?;
        let argv = CVec::new(&self.argv())?;
        let mut exec_failure = b"pipechain: ".to_vec();
        exec_failure.extend_from_slice(self.program.as_encoded_bytes());
        exec_failure.extend_from_slice(b": cannot execute");
        Ok(PreparedStage {
            index,
            program,
            argv,
            exec_failure,
        })
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Stage {{ {} }}", self)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.to_string_lossy())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Position of a stage in the chain, which decides the channel endpoints it uses.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Position {
    /// Writes to the next channel only.
    First,
    /// Reads from the previous channel and writes to the next one.
    Middle,
    /// Reads from the previous channel only.
    Last,
    /// The only stage of a one-stage pipeline; uses no channel.
    Only,
}

impl Position {
    /// Position of the stage at `index` in a pipeline of `count` stages, or `None` if
    /// `index` is out of range.
    pub fn of(index: usize, count: usize) -> Option<Position> {
        if index >= count {
            return None;
        }
        Some(match (index == 0, index + 1 == count) {
            (true, true) => Position::Only,
            (true, false) => Position::First,
            (false, false) => Position::Middle,
            (false, true) => Position::Last,
        })
    }

    pub fn reads(self) -> bool {
        matches!(self, Position::Middle | Position::Last)
    }

    pub fn writes(self) -> bool {
        matches!(self, Position::First | Position::Middle)
    }
}

/// A stage converted to C strings, with its exec failure diagnostic preformatted.
#[derive(Debug)]
pub struct PreparedStage {
    pub(crate) index: usize,
    pub(crate) program: CString,
    pub(crate) argv: CVec,
    pub(crate) exec_failure: Vec<u8>,
}

impl PreparedStage {
    /// Index of the stage in its pipeline.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn program(&self) -> &CString {
        &self.program
    }
}
