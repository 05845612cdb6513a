// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! [`VideoDevice`] implementation over a real V4L2 device node.

use std::fs::OpenOptions;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use dma_buf::DmaBuf;
use log::{debug, trace};
use m2mdec_sys as sys;
use nix::errno::Errno;
use unix_ts::Timestamp;

use super::caps::Capabilities;
use super::device::{
    DequeuedBuffer, Direction, Memory, PixFormat, PlaneInfo, Rect, VideoDevice,
};
use super::mmap::MappedRegion;
use crate::poll::{poll_device, Interest, Readiness};
use crate::Error;

/// An open V4L2 device node.
///
/// The node is opened read-write and non-blocking, so [`dequeue_buffer`]
/// returns `EAGAIN` instead of sleeping. The descriptor is closed when the
/// value is dropped.
///
/// [`dequeue_buffer`]: VideoDevice::dequeue_buffer
#[derive(Debug)]
pub struct V4l2Device {
    fd: OwnedFd,
    path: PathBuf,
}

fn check<T>(op: &'static str, ret: nix::Result<T>) -> Result<T, Error> {
    ret.map_err(|errno| Error::ioctl(op, errno))
}

impl V4l2Device {
    /// Opens `path` with `O_RDWR | O_NONBLOCK`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the node is missing or not accessible.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)?;
        debug!("opened {} as fd {}", path.display(), file.as_raw_fd());
        Ok(V4l2Device {
            fd: file.into(),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn raw(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl AsFd for V4l2Device {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl VideoDevice for V4l2Device {
    type Mapping = MappedRegion;

    fn query_capabilities(&self) -> Result<Capabilities, Error> {
        let mut cap = sys::v4l2_capability::zeroed();
        check("VIDIOC_QUERYCAP", unsafe { sys::vidioc_querycap(self.raw(), &mut cap) })?;
        let caps = Capabilities::from_raw(&cap);
        debug!("{}: {}", self.path.display(), caps);
        Ok(caps)
    }

    fn set_format(&self, direction: Direction, format: &PixFormat) -> Result<PixFormat, Error> {
        let mut raw = format.to_raw(direction);
        check("VIDIOC_S_FMT", unsafe { sys::vidioc_s_fmt(self.raw(), &mut raw) })?;
        Ok(PixFormat::from_raw(&raw))
    }

    fn get_format(&self, direction: Direction) -> Result<PixFormat, Error> {
        let mut raw = sys::v4l2_format::zeroed();
        raw.type_ = direction.buf_type();
        check("VIDIOC_G_FMT", unsafe { sys::vidioc_g_fmt(self.raw(), &mut raw) })?;
        Ok(PixFormat::from_raw(&raw))
    }

    fn request_buffers(
        &self,
        direction: Direction,
        memory: Memory,
        count: u32,
    ) -> Result<u32, Error> {
        let mut req = sys::v4l2_requestbuffers::zeroed();
        req.count = count;
        req.type_ = direction.buf_type();
        req.memory = memory.raw();
        check("VIDIOC_REQBUFS", unsafe { sys::vidioc_reqbufs(self.raw(), &mut req) })?;
        debug!("{} REQBUFS {} -> {}", direction, count, req.count);
        Ok(req.count)
    }

    fn query_buffer(&self, direction: Direction, index: u32) -> Result<Vec<PlaneInfo>, Error> {
        let mut planes = [sys::v4l2_plane::zeroed(); sys::VIDEO_MAX_PLANES];
        let mut buf = sys::v4l2_buffer::zeroed();
        buf.type_ = direction.buf_type();
        buf.memory = Memory::Mmap.raw();
        buf.index = index;
        buf.m.planes = planes.as_mut_ptr();
        buf.length = sys::VIDEO_MAX_PLANES as u32;
        check("VIDIOC_QUERYBUF", unsafe { sys::vidioc_querybuf(self.raw(), &mut buf) })?;

        let count = (buf.length as usize).min(sys::VIDEO_MAX_PLANES);
        Ok(planes[..count]
            .iter()
            .map(|p| PlaneInfo {
                length: p.length,
                // SAFETY: mem_offset is the member the kernel fills for MMAP
                offset: unsafe { p.m.mem_offset },
            })
            .collect())
    }

    fn queue_buffer(
        &self,
        direction: Direction,
        index: u32,
        bytes_used: &[u32],
    ) -> Result<(), Error> {
        let mut planes = [sys::v4l2_plane::zeroed(); sys::VIDEO_MAX_PLANES];
        let count = bytes_used.len().min(sys::VIDEO_MAX_PLANES);
        for (plane, &used) in planes.iter_mut().zip(&bytes_used[..count]) {
            plane.bytesused = used;
        }
        let mut buf = sys::v4l2_buffer::zeroed();
        buf.type_ = direction.buf_type();
        buf.memory = Memory::Mmap.raw();
        buf.index = index;
        buf.m.planes = planes.as_mut_ptr();
        buf.length = count as u32;
        check("VIDIOC_QBUF", unsafe { sys::vidioc_qbuf(self.raw(), &mut buf) })?;
        trace!("{} QBUF {} {:?}", direction, index, &bytes_used[..count]);
        Ok(())
    }

    fn dequeue_buffer(&self, direction: Direction) -> Result<DequeuedBuffer, Error> {
        let mut planes = [sys::v4l2_plane::zeroed(); sys::VIDEO_MAX_PLANES];
        let mut buf = sys::v4l2_buffer::zeroed();
        buf.type_ = direction.buf_type();
        buf.memory = Memory::Mmap.raw();
        buf.m.planes = planes.as_mut_ptr();
        buf.length = sys::VIDEO_MAX_PLANES as u32;
        check("VIDIOC_DQBUF", unsafe { sys::vidioc_dqbuf(self.raw(), &mut buf) })?;

        let count = (buf.length as usize).min(sys::VIDEO_MAX_PLANES);
        let dequeued = DequeuedBuffer {
            index: buf.index,
            bytes_used: planes[..count].iter().map(|p| p.bytesused).collect(),
            flags: buf.flags,
            sequence: buf.sequence,
            timestamp: Timestamp::new(
                buf.timestamp.tv_sec as i64,
                (buf.timestamp.tv_usec as u32).saturating_mul(1000),
            ),
        };
        trace!(
            "{} DQBUF {} {:?} flags {:#x}",
            direction,
            dequeued.index,
            dequeued.bytes_used,
            dequeued.flags
        );
        Ok(dequeued)
    }

    fn stream_on(&self, direction: Direction) -> Result<(), Error> {
        let ty = direction.buf_type() as libc::c_int;
        check("VIDIOC_STREAMON", unsafe { sys::vidioc_streamon(self.raw(), &ty) })?;
        debug!("{} STREAMON", direction);
        Ok(())
    }

    fn stream_off(&self, direction: Direction) -> Result<(), Error> {
        let ty = direction.buf_type() as libc::c_int;
        check("VIDIOC_STREAMOFF", unsafe { sys::vidioc_streamoff(self.raw(), &ty) })?;
        debug!("{} STREAMOFF", direction);
        Ok(())
    }

    fn set_control(&self, id: u32, value: i32) -> Result<(), Error> {
        let mut ctrl = sys::v4l2_control { id, value };
        check("VIDIOC_S_CTRL", unsafe { sys::vidioc_s_ctrl(self.raw(), &mut ctrl) })?;
        Ok(())
    }

    fn get_control(&self, id: u32) -> Result<i32, Error> {
        let mut ctrl = sys::v4l2_control { id, value: 0 };
        check("VIDIOC_G_CTRL", unsafe { sys::vidioc_g_ctrl(self.raw(), &mut ctrl) })?;
        Ok(ctrl.value)
    }

    fn get_crop(&self, direction: Direction) -> Result<Rect, Error> {
        let mut crop = sys::v4l2_crop::zeroed();
        crop.type_ = direction.buf_type();
        check("VIDIOC_G_CROP", unsafe { sys::vidioc_g_crop(self.raw(), &mut crop) })?;
        Ok(Rect {
            left: crop.c.left,
            top: crop.c.top,
            width: crop.c.width,
            height: crop.c.height,
        })
    }

    fn poll(&self, interest: Interest, timeout: Duration) -> Result<Readiness, Error> {
        poll_device(self.fd.as_fd(), interest, timeout)
    }

    fn map_plane(&self, plane: &PlaneInfo) -> Result<MappedRegion, Errno> {
        MappedRegion::new(self.fd.as_fd(), plane.offset, plane.length as usize)
    }

    fn export_plane(&self, direction: Direction, index: u32, plane: u32) -> Result<DmaBuf, Error> {
        let mut exp = sys::v4l2_exportbuffer::zeroed();
        exp.type_ = direction.buf_type();
        exp.index = index;
        exp.plane = plane;
        exp.flags = (libc::O_CLOEXEC | libc::O_RDWR) as u32;
        check("VIDIOC_EXPBUF", unsafe { sys::vidioc_expbuf(self.raw(), &mut exp) })?;
        debug!("{} EXPBUF {}:{} -> fd {}", direction, index, plane, exp.fd);
        // SAFETY: EXPBUF returned a new descriptor owned by the caller
        Ok(unsafe { DmaBuf::from_raw_fd(exp.fd) })
    }
}
