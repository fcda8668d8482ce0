use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;

use proptest::prelude::*;

use crate::stage::PreparedStage;
use crate::wiring::rewire_and_exec;
use crate::{ChannelSet, PipelineError, Position, Stage, StageOps, Wiring};

/// Which channel endpoint a descriptor refers to: (channel, is_write).
type Endpoint = (usize, bool);

/// A fake process descriptor table. Records what the stage would hold at exec time.
struct RecordingOps {
    table: HashMap<RawFd, Endpoint>,
    calls: Vec<String>,
    at_exec: Option<HashMap<RawFd, Endpoint>>,
    fail_dup2: bool,
}

impl RecordingOps {
    fn new(channels: &ChannelSet) -> RecordingOps {
        let mut table = HashMap::new();
        for i in 0..channels.len() {
            let c = channels.get(i).unwrap();
            table.insert(c.read_fd(), (i, false));
            table.insert(c.write_fd(), (i, true));
        }
        RecordingOps {
            table,
            calls: vec![],
            at_exec: None,
            fail_dup2: false,
        }
    }
}

impl StageOps for RecordingOps {
    fn close(&mut self, fd: RawFd) -> io::Result<()> {
        self.calls.push(format!("close {}", fd));
        match self.table.remove(&fd) {
            Some(_) => Ok(()),
            None => Err(io::Error::from_raw_os_error(libc::EBADF)),
        }
    }

    fn dup2(&mut self, oldfd: RawFd, newfd: RawFd) -> io::Result<()> {
        self.calls.push(format!("dup2 {} {}", oldfd, newfd));
        if self.fail_dup2 {
            return Err(io::Error::from_raw_os_error(libc::EMFILE));
        }
        let endpoint = *self
            .table
            .get(&oldfd)
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EBADF))?;
        self.table.insert(newfd, endpoint);
        Ok(())
    }

    fn inherit(&mut self, fd: RawFd) -> io::Result<()> {
        self.calls.push(format!("inherit {}", fd));
        Ok(())
    }

    fn reset_signals(&mut self) -> io::Result<()> {
        self.calls.push("reset".to_owned());
        Ok(())
    }

    fn exec(&mut self, _stage: &PreparedStage) -> io::Error {
        self.calls.push("exec".to_owned());
        self.at_exec = Some(self.table.clone());
        io::Error::from_raw_os_error(libc::ENOENT)
    }
}

fn prepared(index: usize) -> PreparedStage {
    Stage::cmd("stage").prepare(index).unwrap()
}

/// Runs the child side of stage `index` against a fake table and checks what is left
/// at exec time.
fn check_stage(index: usize, channels: &ChannelSet) {
    let wiring = Wiring::plan(index, channels).unwrap();
    let mut ops = RecordingOps::new(channels);
    let err = rewire_and_exec(&mut ops, &wiring, &prepared(index));
    match err {
        PipelineError::Exec { stage, source } => {
            assert_eq!(stage, index);
            assert_eq!(source.raw_os_error(), Some(libc::ENOENT));
        }
        other => panic!("unexpected error {:?}", other),
    }

    let live = ops.at_exec.expect("exec was not reached");
    assert!(live.len() <= 2, "stage {} holds {:?}", index, live);
    for (&fd, &(channel, is_write)) in &live {
        if is_write {
            assert_eq!((fd, channel), (1, index));
        } else {
            assert_eq!((fd, channel + 1), (0, index));
        }
    }
    assert_eq!(live.contains_key(&0), wiring.position.reads());
    assert_eq!(live.contains_key(&1), wiring.position.writes());
    assert_eq!(ops.calls.last().map(String::as_str), Some("exec"));
}

#[test]
fn three_stage_plan() {
    let channels = ChannelSet::allocate(3).unwrap();
    let c0 = channels.get(0).unwrap();
    let c1 = channels.get(1).unwrap();

    let first = Wiring::plan(0, &channels).unwrap();
    assert_eq!(first.position, Position::First);
    assert_eq!(first.stdin, None);
    assert_eq!(first.stdout, Some(c0.write_fd()));
    assert_eq!(first.unused, vec![c0.read_fd(), c1.read_fd(), c1.write_fd()]);

    let middle = Wiring::plan(1, &channels).unwrap();
    assert_eq!(middle.position, Position::Middle);
    assert_eq!(middle.stdin, Some(c0.read_fd()));
    assert_eq!(middle.stdout, Some(c1.write_fd()));
    assert_eq!(middle.unused, vec![c0.write_fd(), c1.read_fd()]);

    let last = Wiring::plan(2, &channels).unwrap();
    assert_eq!(last.position, Position::Last);
    assert_eq!(last.stdin, Some(c1.read_fd()));
    assert_eq!(last.stdout, None);
    assert_eq!(last.unused, vec![c0.read_fd(), c0.write_fd(), c1.write_fd()]);
}

#[test]
fn plan_out_of_range_is_none() {
    let channels = ChannelSet::allocate(3).unwrap();
    assert!(Wiring::plan(3, &channels).is_none());
    let all = Wiring::plan_all(&channels);
    assert_eq!(all.len(), 3);
    assert_eq!(all[2], Wiring::plan(2, &channels).unwrap());
}

#[test]
fn single_stage_plan_is_empty() {
    let channels = ChannelSet::allocate(1).unwrap();
    let wiring = Wiring::plan(0, &channels).unwrap();
    assert_eq!(wiring.position, Position::Only);
    assert_eq!(wiring.used().count(), 0);
    assert!(wiring.unused.is_empty());
    check_stage(0, &channels);
}

#[test]
fn three_stages_close_before_exec() {
    let channels = ChannelSet::allocate(3).unwrap();
    for index in 0..3 {
        check_stage(index, &channels);
    }
}

#[test]
fn unused_endpoints_closed_before_rewiring() {
    let channels = ChannelSet::allocate(3).unwrap();
    let wiring = Wiring::plan(1, &channels).unwrap();
    let mut ops = RecordingOps::new(&channels);
    rewire_and_exec(&mut ops, &wiring, &prepared(1));
    let first_dup = ops.calls.iter().position(|c| c.starts_with("dup2")).unwrap();
    let unused_closes: Vec<_> = wiring.unused.iter().map(|fd| format!("close {}", fd)).collect();
    assert_eq!(&ops.calls[..first_dup], &unused_closes[..]);
}

#[test]
fn failed_dup2_stops_before_exec() {
    let channels = ChannelSet::allocate(2).unwrap();
    let wiring = Wiring::plan(1, &channels).unwrap();
    let mut ops = RecordingOps::new(&channels);
    ops.fail_dup2 = true;
    match rewire_and_exec(&mut ops, &wiring, &prepared(1)) {
        PipelineError::Exec { stage: 1, source } => {
            assert_eq!(source.raw_os_error(), Some(libc::EMFILE))
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(ops.at_exec.is_none());
    assert!(!ops.calls.iter().any(|c| c == "exec"));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn no_stage_keeps_more_than_two_endpoints(stages in 1usize..12) {
        let channels = ChannelSet::allocate(stages).unwrap();
        prop_assert_eq!(channels.len(), stages - 1);
        for index in 0..stages {
            let wiring = Wiring::plan(index, &channels).unwrap();
            prop_assert_eq!(wiring.used().count() + wiring.unused.len(), channels.endpoints().len());
            check_stage(index, &channels);
        }
    }
}
