use std::ffi::{CString, OsStr};
use std::fs::File;
use std::io::{Error, Result};
use std::iter;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::{FromRawFd, RawFd};
use std::ptr;

pub use libc::{ECHILD, ESRCH, SIGTERM, WNOHANG};

fn check_err<T: Ord + Default>(num: T) -> Result<T> {
    if num < T::default() {
        return Err(Error::last_os_error());
    }
    Ok(num)
}

pub fn pipe() -> Result<(File, File)> {
    let mut fds = [0 as libc::c_int; 2];
    check_err(unsafe { libc::pipe(fds.as_mut_ptr()) })?;
    Ok(unsafe { (File::from_raw_fd(fds[0]), File::from_raw_fd(fds[1])) })
}

/// Fork the current process.
///
/// Returns `Some(pid)` in the parent and `None` in the child.
///
/// # Safety
///
/// The child of a multi-threaded parent may only call async-signal-safe functions until
/// it execs or exits. In particular it must not allocate.
pub unsafe fn fork() -> Result<Option<u32>> {
    let pid = check_err(unsafe { libc::fork() })?;
    Ok(if pid == 0 { None } else { Some(pid as u32) })
}

pub fn os_to_cstring(s: &OsStr) -> Result<CString> {
    let bytes = s.as_bytes();
    if bytes.contains(&0) {
        return Err(Error::from_raw_os_error(libc::EINVAL));
    }
    Ok(CString::new(bytes)
        // not expected to fail on Unix, as Unix strings without NUL *are* C strings
        .expect("converting Unix string to C string"))
}

fn cstring_ptr(s: &CString) -> *const libc::c_char {
    s.as_ptr()
}

/// A null-terminated argv vector, built before forking so that the child does not
/// need to allocate.
#[derive(Debug)]
pub struct CVec {
    // Individual C strings; they are not unused as rustc thinks, they
    // are pointed to by elements of self.ptrs.
    #[allow(dead_code)]
    strings: Vec<CString>,

    // nullptr-terminated vector of pointers to data inside
    // self.strings.
    ptrs: Vec<*const libc::c_char>,
}

impl CVec {
    pub fn new<S>(slice: &[S]) -> Result<CVec>
    where
        S: AsRef<OsStr>,
    {
        let strings = slice
            .iter()
            .map(|x| os_to_cstring(x.as_ref()))
            .collect::<Result<Vec<CString>>>()?;
        let ptrs: Vec<_> = strings
            .iter()
            .map(cstring_ptr)
            .chain(iter::once(ptr::null()))
            .collect();
        Ok(CVec { strings, ptrs })
    }

    pub fn as_c_vec(&self) -> *const *const libc::c_char {
        self.ptrs.as_ptr()
    }
}

/// Replace the process image, searching `PATH` for `cmd`.
///
/// Only returns on failure.
pub fn execvp(cmd: &CString, argv: &CVec) -> Error {
    unsafe {
        libc::execvp(cstring_ptr(cmd), argv.as_c_vec());
    }
    Error::last_os_error()
}

pub fn _exit(status: u8) -> ! {
    unsafe { libc::_exit(status as libc::c_int) }
}

/// Wait for `pid`, returning `None` if `WNOHANG` was given and the child is still
/// running.
pub fn waitpid(pid: u32, flags: i32) -> Result<Option<i32>> {
    let mut status = 0 as libc::c_int;
    let pid_out = check_err(unsafe {
        libc::waitpid(
            pid as libc::pid_t,
            &mut status as *mut libc::c_int,
            flags as libc::c_int,
        )
    })?;
    Ok((pid_out != 0).then_some(status))
}

pub fn kill(pid: u32, signal: i32) -> Result<()> {
    check_err(unsafe { libc::kill(pid as libc::pid_t, signal) })?;
    Ok(())
}

pub fn dup2(oldfd: RawFd, newfd: RawFd) -> Result<()> {
    check_err(unsafe { libc::dup2(oldfd, newfd) })?;
    Ok(())
}

pub fn fcntl(fd: RawFd, cmd: i32, arg1: Option<i32>) -> Result<i32> {
    check_err(unsafe {
        match arg1 {
            Some(arg1) => libc::fcntl(fd, cmd, arg1),
            None => libc::fcntl(fd, cmd),
        }
    })
}

/// Set or clear `FD_CLOEXEC` on `fd`.
pub fn set_cloexec(fd: RawFd, cloexec: bool) -> Result<()> {
    let old = fcntl(fd, libc::F_GETFD, None)?;
    let new = if cloexec {
        old | libc::FD_CLOEXEC
    } else {
        old & !libc::FD_CLOEXEC
    };
    if new != old {
        fcntl(fd, libc::F_SETFD, Some(new))?;
    }
    Ok(())
}

pub fn close(fd: RawFd) -> Result<()> {
    check_err(unsafe { libc::close(fd) })?;
    Ok(())
}

/// Write raw bytes to standard error, ignoring failures. Safe to call after fork.
pub fn write_stderr(buf: &[u8]) {
    let mut rest = buf;
    while !rest.is_empty() {
        let n = unsafe { libc::write(2, rest.as_ptr() as *const libc::c_void, rest.len()) };
        if n <= 0 {
            return;
        }
        rest = &rest[n as usize..];
    }
}

pub fn reset_sigpipe() -> Result<()> {
    // This is called after forking to reset SIGPIPE handling to the
    // defaults that Unix programs expect. libstd ignores SIGPIPE, and
    // child processes inherit ignored signals and the signal mask, so
    // without this the stages of a pipeline would see EPIPE instead of
    // being killed when their reader goes away.

    unsafe {
        let mut set = std::mem::MaybeUninit::<libc::sigset_t>::uninit();
        check_err(libc::sigemptyset(set.as_mut_ptr()))?;
        let set = set.assume_init();
        check_err(libc::pthread_sigmask(
            libc::SIG_SETMASK,
            &set,
            ptr::null_mut(),
        ))?;
        let ret = libc::signal(libc::SIGPIPE, libc::SIG_DFL);
        if ret == libc::SIG_ERR {
            return Err(Error::last_os_error());
        }
    }
    Ok(())
}
