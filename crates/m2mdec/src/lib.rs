// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! M2M Decoder Library for Rust
//!
//! Drives hardware video decoders exposed through V4L2 multi-planar
//! memory-to-memory (M2M) devices, such as the Samsung `s5p-mfc` codec block.
//!
//! The library discovers the decoder node in sysfs, negotiates the
//! compressed input format, allocates and maps the device-owned buffers of
//! both queues and runs the queue/dequeue protocol that feeds compressed
//! frames in and pulls decoded frames out.
//!
//! # Quick Start
//!
//! ```no_run
//! use m2mdec::demux::{self, Demuxer};
//! use m2mdec::session::{DecodeSession, SessionConfig};
//!
//! let mut input = demux::open("movie.mp4")?;
//! let codec = input.identify_codec().ok_or(m2mdec::Error::UnrecognizedCodec(
//!     "no video stream".to_string(),
//! ))?;
//! let header = input.extra_data();
//!
//! let mut session = DecodeSession::open(SessionConfig::new("s5p-mfc-dec"))?;
//! session.start(codec, &header)?;
//! session.run(&mut input, |frame| {
//!     println!("frame {}: {}x{}", frame.sequence(), frame.width(), frame.height());
//!     Ok(())
//! })?;
//! session.close()?;
//! # Ok::<(), m2mdec::Error>(())
//! ```
//!
//! # Architecture
//!
//! - [`v4l2`] - typed ioctl transport, capabilities and device discovery
//! - [`poll`] - readiness polling of the device descriptor
//! - [`pool`] - per-direction buffer pools with mapped planes
//! - [`format`] - OUTPUT format negotiation and CAPTURE geometry read-back
//! - [`session`] - the decode session state machine and feed/drain loops
//! - [`demux`] - compressed frame sources for MP4 and Annex-B input
//! - [`frame`] - borrowed views of decoded frames
//!
//! # Support
//!
//! - Repository: <https://github.com/EdgeFirstAI/m2mdec>
//! - Professional support: support@au-zone.com

use nix::errno::Errno;
use std::{error, fmt, io};

use crate::fourcc::FourCC;
use crate::session::SessionState;
use crate::v4l2::Direction;

/// Error type for decoder operations
#[derive(Debug)]
pub enum Error {
    /// No video node in sysfs reports a driver name matching the request
    DeviceNotFound(String),

    /// The device lacks the multi-planar M2M queue types a decoder needs
    CapabilityMismatch {
        /// Card name reported by the driver
        card: String,
        /// Effective capability bits that were checked
        capabilities: u32,
    },

    /// A device control call failed
    Ioctl {
        /// Name of the ioctl, e.g. `VIDIOC_QBUF`
        op: &'static str,
        /// OS error code returned by the kernel
        errno: Errno,
    },

    /// Mapping a buffer plane into the process failed
    Mmap {
        /// Buffer index within its pool
        buffer: u32,
        /// Plane index within the buffer
        plane: usize,
        /// OS error code returned by `mmap`
        errno: Errno,
    },

    /// The device refused the requested compressed format
    FormatRejected {
        /// Format that was requested
        requested: FourCC,
        /// Format the driver reported back, if it substituted one
        actual: Option<FourCC>,
    },

    /// The input contains no video stream this library can decode
    UnrecognizedCodec(String),

    /// A buffer was queued twice, or dequeued with none outstanding
    BufferStateViolation(String),

    /// A session operation was called in the wrong lifecycle state
    InvalidState {
        /// The operation that was attempted
        op: &'static str,
        /// The state the session was in
        state: SessionState,
    },

    /// A configuration value is out of range
    InvalidConfig(String),

    /// The device granted zero buffers for a queue
    BuffersUnavailable(Direction),

    /// The device did not report CAPTURE geometry after the header
    CaptureFormatUnavailable,

    /// I/O error from the filesystem or device node
    Io(io::Error),

    /// The container or elementary stream could not be parsed
    Demux(String),
}

impl Error {
    /// The OS error code carried by ioctl and mmap failures.
    pub fn errno(&self) -> Option<Errno> {
        match self {
            Error::Ioctl { errno, .. } | Error::Mmap { errno, .. } => Some(*errno),
            Error::Io(err) => err.raw_os_error().map(Errno::from_raw),
            _ => None,
        }
    }

    pub(crate) fn ioctl(op: &'static str, errno: Errno) -> Self {
        Error::Ioctl { op, errno }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::DeviceNotFound(driver) => {
                write!(f, "no video device with driver matching '{}'", driver)
            }
            Error::CapabilityMismatch { card, capabilities } => write!(
                f,
                "device '{}' is not a multi-planar M2M decoder (capabilities {:#010x})",
                card, capabilities
            ),
            Error::Ioctl { op, errno } => write!(f, "{} failed: {}", op, errno),
            Error::Mmap {
                buffer,
                plane,
                errno,
            } => write!(
                f,
                "failed to map plane {} of buffer {}: {}",
                plane, buffer, errno
            ),
            Error::FormatRejected { requested, actual } => match actual {
                Some(actual) => write!(
                    f,
                    "device rejected format {} (substituted {})",
                    requested, actual
                ),
                None => write!(f, "device rejected format {}", requested),
            },
            Error::UnrecognizedCodec(msg) => write!(f, "unrecognized codec: {}", msg),
            Error::BufferStateViolation(msg) => write!(f, "buffer state violation: {}", msg),
            Error::InvalidState { op, state } => {
                write!(f, "{} is not allowed in state {:?}", op, state)
            }
            Error::InvalidConfig(msg) => write!(f, "invalid configuration: {}", msg),
            Error::BuffersUnavailable(direction) => {
                write!(f, "device granted no {} buffers", direction)
            }
            Error::CaptureFormatUnavailable => {
                write!(f, "device did not report a capture format after the header")
            }
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::Demux(msg) => write!(f, "demux error: {}", msg),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Ioctl { errno, .. } => Some(errno),
            Error::Mmap { errno, .. } => Some(errno),
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

/// The v4l2 module provides the device transport and discovery.
pub mod v4l2;

/// The poll module provides readiness checks on the device descriptor.
pub mod poll;

/// The pool module manages one queue direction's device buffers.
pub mod pool;

/// The format module negotiates the OUTPUT format and reads CAPTURE geometry.
pub mod format;

/// The session module provides the decode state machine.
pub mod session;

/// The demux module provides compressed frame sources.
pub mod demux;

/// The frame module provides views of decoded frames.
pub mod frame;

/// The fourcc module provides portable handling of fourcc codes.
pub mod fourcc;

pub use session::{DecodeSession, ExecutionModel, SessionConfig};
pub use v4l2::locate_device;
