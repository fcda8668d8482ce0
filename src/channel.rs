use std::fs::File;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};

use crate::error::{PipelineError, Result};
use crate::posix;

/// A unidirectional pipe connecting two adjacent stages.
#[derive(Debug)]
pub struct Channel {
    ends: [File; 2],
}

impl Channel {
    /// Index of the read endpoint.
    pub const READ: usize = 0;
    /// Index of the write endpoint.
    pub const WRITE: usize = 1;

    /// Creates a channel from an already opened `(read, write)` pair.
    pub fn from_ends(read: File, write: File) -> Channel {
        Channel {
            ends: [read, write],
        }
    }

    /// Opens a pipe. Both endpoints are close-on-exec, so programs started by other
    /// threads never inherit them; a stage moves the endpoints it uses onto its standard
    /// descriptors, which are inherited.
    pub fn open() -> io::Result<Channel> {
        let (read, write) = posix::pipe()?;
        posix::set_cloexec(read.as_raw_fd(), true)?;
        posix::set_cloexec(write.as_raw_fd(), true)?;
        Ok(Channel::from_ends(read, write))
    }

    pub fn read_fd(&self) -> RawFd {
        self.ends[Channel::READ].as_raw_fd()
    }

    pub fn write_fd(&self) -> RawFd {
        self.ends[Channel::WRITE].as_raw_fd()
    }

    pub fn into_ends(self) -> (File, File) {
        let [read, write] = self.ends;
        (read, write)
    }
}

/// The channels of a pipeline, one per pair of adjacent stages.
///
/// Channel `i` connects stage `i` (writer) to stage `i + 1` (reader). Dropping the set
/// closes the orchestrator's copies of every endpoint.
#[derive(Debug, Default)]
pub struct ChannelSet {
    channels: Vec<Channel>,
}

impl ChannelSet {
    /// Allocates the channels for a pipeline of `stages` stages.
    pub fn allocate(stages: usize) -> Result<ChannelSet> {
        ChannelSet::allocate_with(stages, Channel::open)
    }

    /// Like [`allocate`](Self::allocate), but obtains each channel from `open`.
    ///
    /// If any channel fails to open, the ones already opened are closed and
    /// `PipelineError::Resource` is returned.
    pub fn allocate_with(
        stages: usize,
        mut open: impl FnMut() -> io::Result<Channel>,
    ) -> Result<ChannelSet> {
        let count = stages.saturating_sub(1);
        let mut channels = Vec::with_capacity(count);
        for channel in 0..count {
            let opened = open().map_err(|source| PipelineError::Resource { channel, source })?;
            channels.push(opened);
        }
        Ok(ChannelSet { channels })
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Channel> {
        self.channels.get(index)
    }

    /// Every endpoint of every channel, in channel order, read before write.
    pub fn endpoints(&self) -> Vec<RawFd> {
        self.channels
            .iter()
            .flat_map(|c| [c.read_fd(), c.write_fd()])
            .collect()
    }

    /// Closes the orchestrator's copies of all endpoints.
    pub fn close(self) {
        drop(self);
    }
}
