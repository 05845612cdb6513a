// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Readiness polling of the decoder descriptor.
//!
//! An M2M device reports both queues through one descriptor: `POLLOUT`
//! means an OUTPUT buffer has been consumed and can be dequeued, `POLLIN`
//! means a decoded CAPTURE buffer is ready, and `POLLERR` means the driver
//! has flagged an error or has no buffers queued at all.

use std::os::fd::BorrowedFd;
use std::time::Duration;

use log::trace;
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

use crate::Error;

/// Which queue directions a poll should wait on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interest {
    pub output: bool,
    pub capture: bool,
}

impl Interest {
    pub const OUTPUT: Interest = Interest {
        output: true,
        capture: false,
    };
    pub const CAPTURE: Interest = Interest {
        output: false,
        capture: true,
    };
    pub const BOTH: Interest = Interest {
        output: true,
        capture: true,
    };

    fn flags(self) -> PollFlags {
        let mut flags = PollFlags::empty();
        if self.output {
            flags |= PollFlags::POLLOUT | PollFlags::POLLWRNORM;
        }
        if self.capture {
            flags |= PollFlags::POLLIN | PollFlags::POLLRDNORM;
        }
        flags
    }
}

/// Result of a readiness poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Readiness {
    /// An OUTPUT buffer can be dequeued
    pub output: bool,
    /// A CAPTURE buffer can be dequeued
    pub capture: bool,
    /// The device signalled an error condition
    pub error: bool,
}

impl Readiness {
    /// True when the poll timed out with nothing to report.
    pub fn is_empty(&self) -> bool {
        !self.output && !self.capture && !self.error
    }

    fn from_flags(revents: PollFlags, interest: Interest) -> Self {
        Readiness {
            output: interest.output
                && revents.intersects(PollFlags::POLLOUT | PollFlags::POLLWRNORM),
            capture: interest.capture
                && revents.intersects(PollFlags::POLLIN | PollFlags::POLLRDNORM),
            error: revents.intersects(PollFlags::POLLERR | PollFlags::POLLHUP),
        }
    }
}

/// Waits up to `timeout` for the requested directions to become ready.
///
/// The timeout is clamped to the largest value `poll(2)` accepts through
/// `PollTimeout` (about 65 seconds). An interrupted poll (`EINTR`) is
/// reported as an empty readiness so the caller re-checks its stop flag.
pub fn poll_device(
    fd: BorrowedFd<'_>,
    interest: Interest,
    timeout: Duration,
) -> Result<Readiness, Error> {
    let mut fds = [PollFd::new(fd, interest.flags())];
    let timeout_ms = timeout.as_millis().min(u16::MAX as u128) as u16;

    match poll(&mut fds, PollTimeout::from(timeout_ms)) {
        Ok(0) => Ok(Readiness::default()),
        Ok(_) => {
            let revents = fds[0].revents().unwrap_or(PollFlags::empty());
            trace!("poll revents {:?}", revents);
            Ok(Readiness::from_flags(revents, interest))
        }
        Err(Errno::EINTR) => Ok(Readiness::default()),
        Err(errno) => Err(Error::ioctl("poll", errno)),
    }
}
