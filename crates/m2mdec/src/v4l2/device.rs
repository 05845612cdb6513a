// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! The device transport seam and the types that cross it.
//!
//! - [`Direction`] - OUTPUT (compressed input) or CAPTURE (decoded output)
//! - [`Memory`] - buffer memory model requested with `VIDIOC_REQBUFS`
//! - [`PixFormat`] / [`PlaneFormat`] - multi-planar format descriptor
//! - [`PlaneInfo`] - plane geometry from `VIDIOC_QUERYBUF`
//! - [`DequeuedBuffer`] - a completed buffer from `VIDIOC_DQBUF`
//! - [`VideoDevice`] - the operations the decoder core needs

use std::fmt;
use std::time::Duration;

use dma_buf::DmaBuf;
use m2mdec_sys as sys;
use nix::errno::Errno;
use unix_ts::Timestamp;

use super::caps::Capabilities;
use crate::fourcc::FourCC;
use crate::poll::{Interest, Readiness};
use crate::Error;

/// Queue direction of an M2M device, named from the device's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Application to device: compressed bitstream
    Output,
    /// Device to application: decoded frames
    Capture,
}

impl Direction {
    /// The multi-planar `v4l2_buf_type` of this direction.
    pub fn buf_type(self) -> u32 {
        match self {
            Direction::Output => sys::V4L2_BUF_TYPE_VIDEO_OUTPUT_MPLANE,
            Direction::Capture => sys::V4L2_BUF_TYPE_VIDEO_CAPTURE_MPLANE,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Direction::Output => "OUTPUT",
            Direction::Capture => "CAPTURE",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Buffer memory model.
///
/// Only kernel-allocated buffers are supported; decoded planes can still be
/// shared zero-copy through [`VideoDevice::export_plane`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Memory {
    /// Kernel allocates, the application maps with `mmap`
    #[default]
    Mmap,
}

impl Memory {
    pub fn raw(self) -> u32 {
        match self {
            Memory::Mmap => sys::V4L2_MEMORY_MMAP,
        }
    }
}

/// Per-plane size of a multi-planar format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlaneFormat {
    /// Bytes needed to hold the plane
    pub size_image: u32,
    /// Line stride in bytes, zero for compressed formats
    pub bytes_per_line: u32,
}

/// Multi-planar format of one queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixFormat {
    pub width: u32,
    pub height: u32,
    pub fourcc: FourCC,
    pub planes: Vec<PlaneFormat>,
}

impl PixFormat {
    /// A compressed OUTPUT format with a single plane of `max_size` bytes.
    pub fn compressed(fourcc: FourCC, max_size: u32) -> Self {
        PixFormat {
            width: 0,
            height: 0,
            fourcc,
            planes: vec![PlaneFormat {
                size_image: max_size,
                bytes_per_line: 0,
            }],
        }
    }

    pub(crate) fn to_raw(&self, direction: Direction) -> sys::v4l2_format {
        let mut raw = sys::v4l2_format::zeroed();
        raw.type_ = direction.buf_type();
        let mut pix = sys::v4l2_pix_format_mplane::zeroed();
        pix.width = self.width;
        pix.height = self.height;
        pix.pixelformat = self.fourcc.as_u32();
        pix.field = sys::V4L2_FIELD_ANY;
        let count = self.planes.len().min(sys::VIDEO_MAX_PLANES);
        pix.num_planes = count as u8;
        for (dst, src) in pix.plane_fmt.iter_mut().zip(&self.planes[..count]) {
            dst.sizeimage = src.size_image;
            dst.bytesperline = src.bytes_per_line;
        }
        raw.fmt.pix_mp = pix;
        raw
    }

    pub(crate) fn from_raw(raw: &sys::v4l2_format) -> Self {
        // SAFETY: pix_mp is the active member for the multi-planar buffer
        // types this crate uses, and every bit pattern is a valid value.
        let pix = unsafe { raw.fmt.pix_mp };
        let plane_fmt = pix.plane_fmt;
        let count = (pix.num_planes as usize).min(sys::VIDEO_MAX_PLANES);
        PixFormat {
            width: pix.width,
            height: pix.height,
            fourcc: FourCC::from(pix.pixelformat),
            planes: plane_fmt[..count]
                .iter()
                .map(|p| PlaneFormat {
                    size_image: p.sizeimage,
                    bytes_per_line: p.bytesperline,
                })
                .collect(),
        }
    }
}

/// Geometry of one plane of a device buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlaneInfo {
    /// Plane length in bytes; zero marks an absent plane
    pub length: u32,
    /// Offset to pass to `mmap`
    pub offset: u32,
}

/// A buffer the device has finished with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DequeuedBuffer {
    pub index: u32,
    /// Bytes used per plane as reported by the driver
    pub bytes_used: Vec<u32>,
    pub flags: u32,
    pub sequence: u32,
    pub timestamp: Timestamp,
}

impl DequeuedBuffer {
    /// The driver marked this as the final buffer of a drain.
    pub fn is_last(&self) -> bool {
        self.flags & sys::V4L2_BUF_FLAG_LAST != 0
    }

    /// The driver flagged the content as corrupted.
    pub fn is_error(&self) -> bool {
        self.flags & sys::V4L2_BUF_FLAG_ERROR != 0
    }

    pub fn is_keyframe(&self) -> bool {
        self.flags & sys::V4L2_BUF_FLAG_KEYFRAME != 0
    }

    /// Sum of bytes used over all planes.
    pub fn total_bytes(&self) -> usize {
        self.bytes_used.iter().map(|&b| b as usize).sum()
    }
}

/// Crop rectangle of the decoded picture within the CAPTURE buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

/// Device control operations used by the decoder core.
///
/// One method per ioctl. Methods take `&self` because both queue directions
/// share the descriptor and may be driven from two threads; the kernel
/// serialises operations per queue. No method retries: `EAGAIN` and other
/// errors are returned as [`Error::Ioctl`] and retry policy belongs to the
/// caller.
pub trait VideoDevice {
    /// Process-visible mapping of one buffer plane, released on drop.
    type Mapping: AsRef<[u8]> + AsMut<[u8]>;

    fn query_capabilities(&self) -> Result<Capabilities, Error>;

    /// Sets the format of `direction`, returning the format the driver
    /// actually applied.
    fn set_format(&self, direction: Direction, format: &PixFormat) -> Result<PixFormat, Error>;

    fn get_format(&self, direction: Direction) -> Result<PixFormat, Error>;

    /// Requests `count` buffers and returns the number the driver granted,
    /// which may differ from the request.
    fn request_buffers(&self, direction: Direction, memory: Memory, count: u32)
        -> Result<u32, Error>;

    fn query_buffer(&self, direction: Direction, index: u32) -> Result<Vec<PlaneInfo>, Error>;

    /// Queues buffer `index` with one bytes-used entry per plane.
    fn queue_buffer(&self, direction: Direction, index: u32, bytes_used: &[u32])
        -> Result<(), Error>;

    /// Dequeues the next completed buffer of `direction`. Returns
    /// `EAGAIN` when nothing has completed on a non-blocking descriptor.
    fn dequeue_buffer(&self, direction: Direction) -> Result<DequeuedBuffer, Error>;

    fn stream_on(&self, direction: Direction) -> Result<(), Error>;

    fn stream_off(&self, direction: Direction) -> Result<(), Error>;

    fn set_control(&self, id: u32, value: i32) -> Result<(), Error>;

    fn get_control(&self, id: u32) -> Result<i32, Error>;

    fn get_crop(&self, direction: Direction) -> Result<Rect, Error>;

    fn poll(&self, interest: Interest, timeout: Duration) -> Result<Readiness, Error>;

    /// Maps one plane read-write and shared.
    fn map_plane(&self, plane: &PlaneInfo) -> Result<Self::Mapping, Errno>;

    /// Exports a plane of an MMAP buffer as a DMA-BUF descriptor.
    fn export_plane(&self, direction: Direction, index: u32, plane: u32) -> Result<DmaBuf, Error>;
}
