// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Device buffer pools.
//!
//! A [`BufferPool`] owns the buffers of one queue direction. It turns the
//! plane geometry reported by the driver into process-visible mappings and
//! tracks every buffer through its lifecycle:
//!
//! ```text
//! Unmapped -> Mapped -> Queued -> Dequeued -> Queued ...
//!                 \________\__________\______-> Unmapped (teardown)
//! ```
//!
//! The pool never talks to the device on its own: every operation that
//! needs the device borrows it, so the OUTPUT and CAPTURE pools can be
//! driven from two threads sharing one [`VideoDevice`].

use dma_buf::DmaBuf;
use log::{debug, trace, warn};
use nix::errno::Errno;

use crate::v4l2::{DequeuedBuffer, Direction, Memory, VideoDevice};
use crate::Error;

/// Lifecycle state of a device buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// Known to the driver but not yet mapped, or released on teardown
    Unmapped,
    /// Mapped and owned by the application, never queued
    Mapped,
    /// Owned by the driver
    Queued,
    /// Returned by the driver and owned by the application again
    Dequeued,
}

/// One plane of a device buffer.
#[derive(Debug)]
pub struct Plane<M> {
    pub length: u32,
    pub offset: u32,
    pub bytes_used: u32,
    mapping: Option<M>,
}

impl<M: AsRef<[u8]>> Plane<M> {
    pub fn is_mapped(&self) -> bool {
        self.mapping.is_some()
    }

    /// The whole mapped plane.
    pub fn data(&self) -> Option<&[u8]> {
        self.mapping.as_ref().map(|m| m.as_ref())
    }

    /// The mapped plane limited to the bytes in use.
    pub fn payload(&self) -> Option<&[u8]> {
        self.data().map(|d| &d[..(self.bytes_used as usize).min(d.len())])
    }
}

/// A device buffer and its planes.
#[derive(Debug)]
pub struct Buffer<M> {
    index: u32,
    state: BufferState,
    planes: Vec<Plane<M>>,
}

impl<M> Buffer<M> {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn state(&self) -> BufferState {
        self.state
    }

    pub fn planes(&self) -> &[Plane<M>] {
        &self.planes
    }
}

/// The buffers of one queue direction.
#[derive(Debug)]
pub struct BufferPool<M> {
    direction: Direction,
    buffers: Vec<Buffer<M>>,
    queued: usize,
}

impl<M: AsRef<[u8]> + AsMut<[u8]>> BufferPool<M> {
    pub fn new(direction: Direction) -> Self {
        BufferPool {
            direction,
            buffers: Vec::new(),
            queued: 0,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Number of buffers, as granted by the device.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Number of buffers currently owned by the driver.
    pub fn queued_count(&self) -> usize {
        self.queued
    }

    pub fn buffer(&self, index: u32) -> Option<&Buffer<M>> {
        self.buffers.get(index as usize)
    }

    pub fn buffers(&self) -> &[Buffer<M>] {
        &self.buffers
    }

    /// Requests `count` MMAP buffers and sizes the pool to the number the
    /// device granted.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidConfig`] if `count` is zero
    /// - [`Error::BufferStateViolation`] if the pool already holds buffers
    /// - [`Error::BuffersUnavailable`] if the device granted none
    /// - [`Error::Ioctl`] if `VIDIOC_REQBUFS` fails
    pub fn allocate<D>(&mut self, device: &D, count: u32) -> Result<u32, Error>
    where
        D: VideoDevice<Mapping = M>,
    {
        if count == 0 {
            return Err(Error::InvalidConfig(format!(
                "{} buffer count must be at least 1",
                self.direction
            )));
        }
        if !self.buffers.is_empty() {
            return Err(Error::BufferStateViolation(format!(
                "{} pool is already allocated",
                self.direction
            )));
        }

        let granted = device.request_buffers(self.direction, Memory::Mmap, count)?;
        if granted == 0 {
            return Err(Error::BuffersUnavailable(self.direction));
        }
        if granted != count {
            debug!(
                "{}: requested {} buffers, device granted {}",
                self.direction, count, granted
            );
        }

        self.buffers = (0..granted)
            .map(|index| Buffer {
                index,
                state: BufferState::Unmapped,
                planes: Vec::new(),
            })
            .collect();
        self.queued = 0;
        Ok(granted)
    }

    /// Queries every buffer's planes and maps each plane of non-zero length.
    ///
    /// Mappings are zero-filled. Zero-length planes mark planes the format
    /// does not use and are recorded without a mapping. On failure every
    /// plane mapped so far is released before the error is returned.
    pub fn map_all<D>(&mut self, device: &D) -> Result<(), Error>
    where
        D: VideoDevice<Mapping = M>,
    {
        let direction = self.direction;
        let result = self.buffers.iter_mut().try_for_each(|buffer| {
            let infos = device.query_buffer(direction, buffer.index)?;
            buffer.planes.clear();
            for (plane_index, info) in infos.iter().enumerate() {
                let mapping = if info.length == 0 {
                    None
                } else {
                    let mut mapping = device.map_plane(info).map_err(|errno| Error::Mmap {
                        buffer: buffer.index,
                        plane: plane_index,
                        errno,
                    })?;
                    mapping.as_mut().fill(0);
                    Some(mapping)
                };
                buffer.planes.push(Plane {
                    length: info.length,
                    offset: info.offset,
                    bytes_used: 0,
                    mapping,
                });
            }
            buffer.state = BufferState::Mapped;
            trace!(
                "{} buffer {} mapped {:?}",
                direction,
                buffer.index,
                buffer.planes.iter().map(|p| p.length).collect::<Vec<_>>()
            );
            Ok::<(), Error>(())
        });

        if let Err(err) = result {
            let released = self.unmap_all();
            warn!(
                "{} mapping failed, released {} planes: {}",
                direction, released, err
            );
            return Err(err);
        }
        debug!("{}: mapped {} buffers", direction, self.buffers.len());
        Ok(())
    }

    /// Queues buffer `index` with the given bytes-used per plane; missing
    /// entries are treated as zero.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BufferStateViolation`] without contacting the device
    /// if the buffer does not exist, is not mapped or is already queued.
    pub fn enqueue<D>(&mut self, device: &D, index: u32, bytes_used: &[u32]) -> Result<(), Error>
    where
        D: VideoDevice<Mapping = M>,
    {
        let direction = self.direction;
        let buffer = self.buffers.get_mut(index as usize).ok_or_else(|| {
            Error::BufferStateViolation(format!("{} buffer {} does not exist", direction, index))
        })?;
        match buffer.state {
            BufferState::Mapped | BufferState::Dequeued => {}
            BufferState::Queued => {
                return Err(Error::BufferStateViolation(format!(
                    "{} buffer {} is already queued",
                    direction, index
                )))
            }
            BufferState::Unmapped => {
                return Err(Error::BufferStateViolation(format!(
                    "{} buffer {} is not mapped",
                    direction, index
                )))
            }
        }

        let per_plane: Vec<u32> = (0..buffer.planes.len().max(1))
            .map(|i| bytes_used.get(i).copied().unwrap_or(0))
            .collect();
        device.queue_buffer(direction, index, &per_plane)?;

        for (plane, &used) in buffer.planes.iter_mut().zip(&per_plane) {
            plane.bytes_used = used;
        }
        buffer.state = BufferState::Queued;
        self.queued += 1;
        Ok(())
    }

    /// Dequeues the next buffer the device has completed.
    ///
    /// Returns `Ok(None)` when nothing has completed yet (`EAGAIN`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::BufferStateViolation`] without contacting the device
    /// when no buffer of this pool is queued.
    pub fn dequeue<D>(&mut self, device: &D) -> Result<Option<DequeuedBuffer>, Error>
    where
        D: VideoDevice<Mapping = M>,
    {
        let direction = self.direction;
        if self.queued == 0 {
            return Err(Error::BufferStateViolation(format!(
                "no {} buffers are queued",
                direction
            )));
        }

        let dequeued = match device.dequeue_buffer(direction) {
            Ok(dequeued) => dequeued,
            Err(err) if err.errno() == Some(Errno::EAGAIN) => return Ok(None),
            Err(err) => return Err(err),
        };

        let buffer = self
            .buffers
            .get_mut(dequeued.index as usize)
            .filter(|b| b.state == BufferState::Queued)
            .ok_or_else(|| {
                Error::BufferStateViolation(format!(
                    "device returned {} buffer {} which was not queued",
                    direction, dequeued.index
                ))
            })?;
        for (plane, &used) in buffer.planes.iter_mut().zip(&dequeued.bytes_used) {
            plane.bytes_used = used;
        }
        buffer.state = BufferState::Dequeued;
        self.queued -= 1;
        Ok(Some(dequeued))
    }

    /// Releases every mapped plane and returns how many were released.
    ///
    /// Safe on a partially mapped pool and idempotent.
    pub fn unmap_all(&mut self) -> usize {
        let mut released = 0;
        for buffer in &mut self.buffers {
            for plane in &mut buffer.planes {
                if plane.mapping.take().is_some() {
                    released += 1;
                }
            }
            buffer.state = BufferState::Unmapped;
        }
        self.queued = 0;
        if released > 0 {
            debug!("{}: unmapped {} planes", self.direction, released);
        }
        released
    }

    /// Copies `data` into plane 0 of buffer `index` and records its length
    /// as bytes-used. Data longer than the plane is truncated.
    ///
    /// Returns the number of bytes copied.
    pub fn write(&mut self, index: u32, data: &[u8]) -> Result<u32, Error> {
        let direction = self.direction;
        let buffer = self.buffers.get_mut(index as usize).ok_or_else(|| {
            Error::BufferStateViolation(format!("{} buffer {} does not exist", direction, index))
        })?;
        if buffer.state == BufferState::Queued {
            return Err(Error::BufferStateViolation(format!(
                "{} buffer {} is owned by the device",
                direction, index
            )));
        }
        let Some(plane) = buffer.planes.first_mut() else {
            return Err(Error::BufferStateViolation(format!(
                "{} buffer {} has no planes",
                direction, index
            )));
        };
        let Some(mapping) = plane.mapping.as_mut() else {
            return Err(Error::BufferStateViolation(format!(
                "{} buffer {} plane 0 is not mapped",
                direction, index
            )));
        };

        let dst = mapping.as_mut();
        let n = data.len().min(dst.len());
        if n < data.len() {
            warn!(
                "{} buffer {}: frame of {} bytes truncated to {}",
                direction,
                index,
                data.len(),
                n
            );
        }
        dst[..n].copy_from_slice(&data[..n]);
        plane.bytes_used = n as u32;
        Ok(n as u32)
    }

    /// Lowest-index buffer the application owns.
    pub fn next_free(&self) -> Option<u32> {
        self.buffers
            .iter()
            .find(|b| matches!(b.state, BufferState::Mapped | BufferState::Dequeued))
            .map(|b| b.index)
    }

    /// Bytes-used payload of every plane of buffer `index`.
    pub fn payloads(&self, index: u32) -> Vec<&[u8]> {
        self.buffer(index)
            .map(|b| b.planes.iter().filter_map(|p| p.payload()).collect())
            .unwrap_or_default()
    }

    /// Exports a plane of buffer `index` as a DMA-BUF.
    pub fn export<D>(&self, device: &D, index: u32, plane: u32) -> Result<DmaBuf, Error>
    where
        D: VideoDevice<Mapping = M>,
    {
        let buffer = self.buffer(index).ok_or_else(|| {
            Error::BufferStateViolation(format!(
                "{} buffer {} does not exist",
                self.direction, index
            ))
        })?;
        if plane as usize >= buffer.planes.len() {
            return Err(Error::BufferStateViolation(format!(
                "{} buffer {} has no plane {}",
                self.direction, index, plane
            )));
        }
        device.export_plane(self.direction, index, plane)
    }
}
