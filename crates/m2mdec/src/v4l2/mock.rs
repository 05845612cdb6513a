// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! In-process stand-in for an M2M decoder used by the unit tests.
//!
//! The mock keeps a log of every device call and simulates the queue
//! behaviour of a stateful decoder: the first OUTPUT buffer after
//! stream-on is the header, every later non-empty OUTPUT buffer yields one
//! decoded frame, and an empty OUTPUT buffer starts the drain.

use std::collections::{HashMap, VecDeque};
use std::os::fd::{FromRawFd, IntoRawFd};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dma_buf::DmaBuf;
use m2mdec_sys as sys;
use nix::errno::Errno;
use unix_ts::Timestamp;

use super::caps::Capabilities;
use super::device::{
    DequeuedBuffer, Direction, Memory, PixFormat, PlaneFormat, PlaneInfo, Rect, VideoDevice,
};
use crate::fourcc::FourCC;
use crate::poll::{Interest, Readiness};
use crate::Error;

/// How the mock reports the end of a drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DrainSignal {
    /// Nothing; the session has to time out
    Silent,
    /// The final CAPTURE buffer carries `V4L2_BUF_FLAG_LAST`
    LastFlag,
    /// CAPTURE dequeue fails with `EPIPE`
    Epipe,
}

#[derive(Debug)]
pub(crate) struct MockState {
    pub calls: Vec<String>,
    pub caps: u32,
    pub accepted: Vec<FourCC>,
    pub substitute: Option<FourCC>,
    pub output_format: Option<PixFormat>,
    pub output_plane_size: Option<u32>,
    pub capture_format: PixFormat,
    /// G_FMT(CAPTURE) calls answered with zero geometry after the header
    pub format_delay: u32,
    pub min_buffers: Option<i32>,
    pub crop: Option<Rect>,
    pub controls: HashMap<u32, i32>,
    pub grant_output: Option<u32>,
    pub grant_capture: Option<u32>,
    pub extra_empty_planes: usize,
    pub fail_map_at: Option<usize>,
    pub fail_op: Option<&'static str>,
    pub map_fill: u8,
    pub map_attempts: usize,
    pub mapped: usize,
    pub unmapped: usize,
    pub buffer_counts: [u32; 2],
    pub streaming: [bool; 2],
    pub header_consumed: bool,
    pub drain_signal: DrainSignal,
    pub poll_error: bool,
    pub eos: bool,
    pub last_sent: bool,
    /// OUTPUT buffers stop completing once the LAST buffer went out
    pub hold_output_after_last: bool,
    pub closed: bool,
    queued: [VecDeque<(u32, Vec<u32>)>; 2],
    done: [VecDeque<DequeuedBuffer>; 2],
    pending: usize,
    sequence: [u32; 2],
}

fn slot(direction: Direction) -> usize {
    match direction {
        Direction::Output => 0,
        Direction::Capture => 1,
    }
}

impl MockState {
    fn log(&mut self, call: String) -> Result<(), Error> {
        let op = call.split(' ').next().unwrap_or_default().to_string();
        self.calls.push(call);
        if self.fail_op == Some(op.as_str()) {
            return Err(Error::ioctl(self.fail_op.unwrap_or("mock"), Errno::EIO));
        }
        Ok(())
    }

    fn plane_lengths(&self, direction: Direction) -> Vec<u32> {
        let mut lengths: Vec<u32> = match direction {
            Direction::Output => {
                let size = self.output_plane_size.unwrap_or_else(|| {
                    self.output_format
                        .as_ref()
                        .and_then(|f| f.planes.first())
                        .map(|p| p.size_image)
                        .unwrap_or(4096)
                });
                vec![size]
            }
            Direction::Capture => self
                .capture_format
                .planes
                .iter()
                .map(|p| p.size_image)
                .collect(),
        };
        lengths.extend(std::iter::repeat(0).take(self.extra_empty_planes));
        lengths
    }

    fn drained(&self) -> bool {
        self.eos && self.pending == 0
    }

    fn epipe(&self) -> bool {
        self.drain_signal == DrainSignal::Epipe && self.drained() && self.done[1].is_empty()
    }

    fn complete(&mut self, direction: Direction, index: u32, bytes_used: Vec<u32>, flags: u32) {
        let s = slot(direction);
        let sequence = self.sequence[s];
        self.sequence[s] += 1;
        self.done[s].push_back(DequeuedBuffer {
            index,
            bytes_used,
            flags: flags | sys::V4L2_BUF_FLAG_DONE,
            sequence,
            timestamp: Timestamp::new(sequence as i64, 0),
        });
    }

    fn advance(&mut self) {
        if self.streaming[0] && !(self.hold_output_after_last && self.last_sent) {
            while let Some((index, bytes_used)) = self.queued[0].pop_front() {
                let total: u32 = bytes_used.iter().sum();
                if !self.header_consumed {
                    self.header_consumed = true;
                } else if total == 0 {
                    self.eos = true;
                } else {
                    self.pending += 1;
                }
                self.complete(Direction::Output, index, bytes_used, 0);
            }
        }

        if self.streaming[1] {
            while self.pending > 0 {
                let Some((index, _)) = self.queued[1].pop_front() else {
                    break;
                };
                self.pending -= 1;
                let sizes = self.plane_lengths(Direction::Capture);
                self.complete(Direction::Capture, index, sizes, 0);
            }
            if self.drained() && !self.last_sent && self.drain_signal == DrainSignal::LastFlag {
                if let Some((index, bytes_used)) = self.queued[1].pop_front() {
                    let empty = vec![0; bytes_used.len()];
                    self.complete(Direction::Capture, index, empty, sys::V4L2_BUF_FLAG_LAST);
                    self.last_sent = true;
                }
            }
        }
    }
}

pub(crate) struct MockDevice {
    state: Arc<Mutex<MockState>>,
}

impl MockDevice {
    /// A split-queue decoder accepting every compressed format and producing
    /// 320x240 two-plane frames.
    pub fn decoder() -> Self {
        Self::with_caps(
            sys::V4L2_CAP_VIDEO_OUTPUT_MPLANE
                | sys::V4L2_CAP_VIDEO_CAPTURE_MPLANE
                | sys::V4L2_CAP_STREAMING,
        )
    }

    pub fn with_caps(caps: u32) -> Self {
        let state = MockState {
            calls: Vec::new(),
            caps,
            accepted: vec![
                FourCC::H264,
                FourCC::HEVC,
                FourCC::MPEG4,
                FourCC::H263,
                FourCC::MPEG2,
                FourCC::MPEG1,
                FourCC::VP8,
                FourCC::VP9,
            ],
            substitute: None,
            output_format: None,
            output_plane_size: None,
            capture_format: PixFormat {
                width: 320,
                height: 240,
                fourcc: FourCC::NV12M,
                planes: vec![
                    PlaneFormat {
                        size_image: 76_800,
                        bytes_per_line: 320,
                    },
                    PlaneFormat {
                        size_image: 38_400,
                        bytes_per_line: 320,
                    },
                ],
            },
            format_delay: 0,
            min_buffers: Some(3),
            crop: Some(Rect {
                left: 0,
                top: 0,
                width: 320,
                height: 240,
            }),
            controls: HashMap::new(),
            grant_output: None,
            grant_capture: None,
            extra_empty_planes: 0,
            fail_map_at: None,
            fail_op: None,
            map_fill: 0xff,
            map_attempts: 0,
            mapped: 0,
            unmapped: 0,
            buffer_counts: [0; 2],
            streaming: [false; 2],
            header_consumed: false,
            drain_signal: DrainSignal::LastFlag,
            poll_error: false,
            eos: false,
            last_sent: false,
            hold_output_after_last: false,
            closed: false,
            queued: [VecDeque::new(), VecDeque::new()],
            done: [VecDeque::new(), VecDeque::new()],
            pending: 0,
            sequence: [0; 2],
        };
        MockDevice {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn state(&self) -> Arc<Mutex<MockState>> {
        Arc::clone(&self.state)
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }
}

impl Drop for MockDevice {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.closed = true;
        }
    }
}

/// Heap-backed plane mapping that counts its release.
pub(crate) struct MockMapping {
    data: Vec<u8>,
    state: Arc<Mutex<MockState>>,
}

impl AsRef<[u8]> for MockMapping {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl AsMut<[u8]> for MockMapping {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Drop for MockMapping {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.unmapped += 1;
        }
    }
}

impl VideoDevice for MockDevice {
    type Mapping = MockMapping;

    fn query_capabilities(&self) -> Result<Capabilities, Error> {
        let mut state = self.state.lock().unwrap();
        state.log("QUERYCAP".to_string())?;
        Ok(Capabilities {
            driver: "mock-mfc".to_string(),
            card: "mock decoder".to_string(),
            bus_info: "platform:mock".to_string(),
            version: 0x0006_0000,
            capabilities: state.caps,
            device_caps: 0,
        })
    }

    fn set_format(&self, direction: Direction, format: &PixFormat) -> Result<PixFormat, Error> {
        let mut state = self.state.lock().unwrap();
        state.log(format!("S_FMT {}", direction))?;
        if state.streaming[slot(direction)] {
            return Err(Error::ioctl("VIDIOC_S_FMT", Errno::EBUSY));
        }
        if direction == Direction::Capture {
            return Err(Error::ioctl("VIDIOC_S_FMT", Errno::EINVAL));
        }
        if !state.accepted.contains(&format.fourcc) {
            return Err(Error::ioctl("VIDIOC_S_FMT", Errno::EINVAL));
        }
        let mut applied = format.clone();
        if let Some(fourcc) = state.substitute {
            applied.fourcc = fourcc;
        }
        state.output_format = Some(applied.clone());
        Ok(applied)
    }

    fn get_format(&self, direction: Direction) -> Result<PixFormat, Error> {
        let mut state = self.state.lock().unwrap();
        state.log(format!("G_FMT {}", direction))?;
        match direction {
            Direction::Output => state
                .output_format
                .clone()
                .ok_or(Error::ioctl("VIDIOC_G_FMT", Errno::EINVAL)),
            Direction::Capture => {
                let zero = PixFormat {
                    width: 0,
                    height: 0,
                    fourcc: FourCC([0; 4]),
                    planes: Vec::new(),
                };
                if !state.header_consumed {
                    return Ok(zero);
                }
                if state.format_delay > 0 {
                    state.format_delay -= 1;
                    return Ok(zero);
                }
                Ok(state.capture_format.clone())
            }
        }
    }

    fn request_buffers(
        &self,
        direction: Direction,
        _memory: Memory,
        count: u32,
    ) -> Result<u32, Error> {
        let mut state = self.state.lock().unwrap();
        state.log(format!("REQBUFS {} {}", direction, count))?;
        let granted = if count == 0 {
            0
        } else {
            match direction {
                Direction::Output => state.grant_output.unwrap_or(count),
                Direction::Capture => state.grant_capture.unwrap_or(count),
            }
        };
        state.buffer_counts[slot(direction)] = granted;
        Ok(granted)
    }

    fn query_buffer(&self, direction: Direction, index: u32) -> Result<Vec<PlaneInfo>, Error> {
        let mut state = self.state.lock().unwrap();
        state.log(format!("QUERYBUF {} {}", direction, index))?;
        if index >= state.buffer_counts[slot(direction)] {
            return Err(Error::ioctl("VIDIOC_QUERYBUF", Errno::EINVAL));
        }
        Ok(state
            .plane_lengths(direction)
            .into_iter()
            .enumerate()
            .map(|(plane, length)| PlaneInfo {
                length,
                offset: ((slot(direction) as u32) << 30) | (index << 20) | ((plane as u32) << 16),
            })
            .collect())
    }

    fn queue_buffer(&self, direction: Direction, index: u32, bytes_used: &[u32]) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        state.log(format!("QBUF {} {}", direction, index))?;
        let s = slot(direction);
        if index >= state.buffer_counts[s] || state.queued[s].iter().any(|(i, _)| *i == index) {
            return Err(Error::ioctl("VIDIOC_QBUF", Errno::EINVAL));
        }
        state.queued[s].push_back((index, bytes_used.to_vec()));
        state.advance();
        Ok(())
    }

    fn dequeue_buffer(&self, direction: Direction) -> Result<DequeuedBuffer, Error> {
        let mut state = self.state.lock().unwrap();
        state.log(format!("DQBUF {}", direction))?;
        if direction == Direction::Capture && state.epipe() {
            return Err(Error::ioctl("VIDIOC_DQBUF", Errno::EPIPE));
        }
        let buffer = state.done[slot(direction)]
            .pop_front()
            .ok_or(Error::ioctl("VIDIOC_DQBUF", Errno::EAGAIN))?;
        Ok(buffer)
    }

    fn stream_on(&self, direction: Direction) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        state.log(format!("STREAMON {}", direction))?;
        state.streaming[slot(direction)] = true;
        state.advance();
        Ok(())
    }

    fn stream_off(&self, direction: Direction) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        state.log(format!("STREAMOFF {}", direction))?;
        let s = slot(direction);
        state.streaming[s] = false;
        state.queued[s].clear();
        state.done[s].clear();
        Ok(())
    }

    fn set_control(&self, id: u32, value: i32) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        state.log(format!("S_CTRL {:#x} {}", id, value))?;
        state.controls.insert(id, value);
        Ok(())
    }

    fn get_control(&self, id: u32) -> Result<i32, Error> {
        let mut state = self.state.lock().unwrap();
        state.log(format!("G_CTRL {:#x}", id))?;
        let value = if id == sys::V4L2_CID_MIN_BUFFERS_FOR_CAPTURE {
            state.min_buffers
        } else {
            state.controls.get(&id).copied()
        };
        value.ok_or(Error::ioctl("VIDIOC_G_CTRL", Errno::EINVAL))
    }

    fn get_crop(&self, direction: Direction) -> Result<Rect, Error> {
        let mut state = self.state.lock().unwrap();
        state.log(format!("G_CROP {}", direction))?;
        state.crop.ok_or(Error::ioctl("VIDIOC_G_CROP", Errno::EINVAL))
    }

    fn poll(&self, interest: Interest, timeout: Duration) -> Result<Readiness, Error> {
        let readiness = {
            let state = self.state.lock().unwrap();
            Readiness {
                output: interest.output && !state.done[0].is_empty(),
                capture: interest.capture && (!state.done[1].is_empty() || state.epipe()),
                error: state.poll_error,
            }
        };
        if readiness.is_empty() {
            std::thread::sleep(timeout.min(Duration::from_millis(1)));
        }
        Ok(readiness)
    }

    fn map_plane(&self, plane: &PlaneInfo) -> Result<MockMapping, Errno> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("MMAP {:#x}", plane.offset));
        let attempt = state.map_attempts;
        state.map_attempts += 1;
        if state.fail_map_at == Some(attempt) {
            return Err(Errno::ENOMEM);
        }
        state.mapped += 1;
        Ok(MockMapping {
            data: vec![state.map_fill; plane.length as usize],
            state: Arc::clone(&self.state),
        })
    }

    fn export_plane(&self, direction: Direction, index: u32, plane: u32) -> Result<DmaBuf, Error> {
        {
            let mut state = self.state.lock().unwrap();
            state.log(format!("EXPBUF {} {} {}", direction, index, plane))?;
        }
        let file = tempfile::tempfile()?;
        Ok(unsafe { DmaBuf::from_raw_fd(file.into_raw_fd()) })
    }
}
