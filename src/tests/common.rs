use std::fs;
use std::path::Path;
use std::process::Command;

use crate::Stage;

/// A counter stage that writes `wc -l` output to `path` instead of the test's stdout.
pub fn count_into(path: &Path) -> Stage {
    Stage::cmd("sh")
        .args(["-c", "wc -l > \"$1\"", "sh"])
        .arg(path)
}

pub fn read_trimmed(path: &Path) -> String {
    fs::read_to_string(path).unwrap().trim().to_owned()
}

/// Output of `script` run by `sh -c`, trimmed.
pub fn shell_output(script: &str) -> String {
    let output = Command::new("sh").args(["-c", script]).output().unwrap();
    String::from_utf8(output.stdout).unwrap().trim().to_owned()
}

/// True if `pid` no longer exists, not even as a zombie.
pub fn is_gone(pid: u32) -> bool {
    let ret = unsafe { libc::kill(pid as libc::pid_t, 0) };
    ret == -1 && std::io::Error::last_os_error().raw_os_error() == Some(libc::ESRCH)
}
