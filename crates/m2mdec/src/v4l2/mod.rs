// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! V4L2 Device Transport and Discovery
//!
//! This module is the boundary between the decoder core and the kernel.
//!
//! # Transport
//!
//! [`VideoDevice`] is a thin typed wrapper around the fixed set of control
//! messages a multi-planar M2M decoder needs. Each method builds the kernel
//! request structure, issues the ioctl and returns either the populated
//! response or [`Error::Ioctl`](crate::Error::Ioctl) carrying the OS error
//! code. [`V4l2Device`] implements it over a real device node.
//!
//! | Operation | ioctl |
//! |-----------|-------|
//! | [`query_capabilities`](VideoDevice::query_capabilities) | `VIDIOC_QUERYCAP` |
//! | [`set_format`](VideoDevice::set_format) / [`get_format`](VideoDevice::get_format) | `VIDIOC_S_FMT` / `VIDIOC_G_FMT` |
//! | [`request_buffers`](VideoDevice::request_buffers) | `VIDIOC_REQBUFS` |
//! | [`query_buffer`](VideoDevice::query_buffer) | `VIDIOC_QUERYBUF` |
//! | [`queue_buffer`](VideoDevice::queue_buffer) / [`dequeue_buffer`](VideoDevice::dequeue_buffer) | `VIDIOC_QBUF` / `VIDIOC_DQBUF` |
//! | [`stream_on`](VideoDevice::stream_on) / [`stream_off`](VideoDevice::stream_off) | `VIDIOC_STREAMON` / `VIDIOC_STREAMOFF` |
//! | [`set_control`](VideoDevice::set_control) / [`get_control`](VideoDevice::get_control) | `VIDIOC_S_CTRL` / `VIDIOC_G_CTRL` |
//! | [`get_crop`](VideoDevice::get_crop) | `VIDIOC_G_CROP` |
//! | [`export_plane`](VideoDevice::export_plane) | `VIDIOC_EXPBUF` |
//! | [`poll`](VideoDevice::poll) | `poll(2)` |
//!
//! # Discovery
//!
//! ```no_run
//! use m2mdec::v4l2::{DeviceEnumerator, V4l2Device, VideoDevice};
//!
//! let info = DeviceEnumerator::new().locate("s5p-mfc-dec")?;
//! let device = V4l2Device::open(&info.path)?;
//! let caps = device.query_capabilities()?;
//! caps.verify()?;
//! println!("{}", caps);
//! # Ok::<(), m2mdec::Error>(())
//! ```

mod caps;
mod device;
mod enumerator;
mod mmap;
mod transport;

#[cfg(test)]
pub(crate) mod mock;

pub use caps::Capabilities;
pub use device::{
    DequeuedBuffer, Direction, Memory, PixFormat, PlaneFormat, PlaneInfo, Rect, VideoDevice,
};
pub use enumerator::{locate_device, DeviceEnumerator, DeviceInfo, DEV_DIR, SYSFS_ROOT};
pub use mmap::MappedRegion;
pub use transport::V4l2Device;
