// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Decode session state machine.
//!
//! A [`DecodeSession`] owns the device, both buffer pools and the lifecycle
//! state. Setup runs strictly in order:
//!
//! ```text
//! Created -> Located -> Opened -> CapabilitiesVerified -> OutputFormatSet
//!   -> OutputBuffersReady -> HeaderQueued -> OutputStreaming
//!   -> CaptureFormatKnown -> CaptureBuffersReady -> CaptureStreaming
//!   -> Draining -> Stopped -> Closed
//! ```
//!
//! Any failing operation moves the session to `Failed`. [`close`] is
//! reachable from every state, releases everything and is idempotent.
//!
//! The feed/drain loop runs in one of two [`ExecutionModel`]s:
//!
//! - `Polling`: one thread multiplexes both queues with `poll(2)`.
//! - `Threaded`: a feeder thread owns the OUTPUT pool while the calling
//!   thread owns the CAPTURE pool and runs the frame sink. The pools are
//!   never shared; only the device descriptor is.
//!
//! [`close`]: DecodeSession::close

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use dma_buf::DmaBuf;
use log::{debug, info, trace, warn};
use nix::errno::Errno;

use crate::demux::FrameSource;
use crate::format::{
    self, CaptureFormat, DEFAULT_EXTRA_CAPTURE_BUFFERS, DEFAULT_MAX_FRAME_SIZE,
    DEFAULT_OUTPUT_BUFFERS,
};
use crate::fourcc::FourCC;
use crate::frame::DecodedFrame;
use crate::poll::Interest;
use crate::pool::BufferPool;
use crate::v4l2::{Capabilities, DeviceEnumerator, Direction, PixFormat, V4l2Device, VideoDevice};
use crate::Error;

/// Driver name of the Samsung MFC decoder node.
pub const DEFAULT_DRIVER: &str = "s5p-mfc-dec";

const FORMAT_RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Lifecycle state of a [`DecodeSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Created,
    Located,
    Opened,
    CapabilitiesVerified,
    OutputFormatSet,
    OutputBuffersReady,
    HeaderQueued,
    OutputStreaming,
    CaptureFormatKnown,
    CaptureBuffersReady,
    CaptureStreaming,
    Draining,
    Stopped,
    Closed,
    Failed,
}

/// How the feed/drain loop is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionModel {
    /// Single thread, both queues multiplexed with `poll(2)`
    #[default]
    Polling,
    /// One thread per queue direction
    Threaded,
}

/// How the end of the drain was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainEnd {
    /// A CAPTURE buffer carried `V4L2_BUF_FLAG_LAST`
    LastBuffer,
    /// CAPTURE dequeue failed with `EPIPE`
    Epipe,
    /// No CAPTURE completion within the drain timeout
    Timeout,
}

/// Session configuration.
///
/// ```
/// use std::time::Duration;
/// use m2mdec::{ExecutionModel, SessionConfig};
///
/// let config = SessionConfig::new("s5p-mfc-dec")
///     .with_output_buffers(4)
///     .with_drain_timeout(Duration::from_secs(1))
///     .with_model(ExecutionModel::Threaded);
/// assert_eq!(config.output_buffers, 4);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Substring matched against the sysfs driver name
    pub driver: String,
    pub output_buffers: u32,
    /// Byte budget of one compressed frame
    pub max_frame_size: u32,
    /// CAPTURE buffers on top of the driver minimum
    pub extra_capture_buffers: u32,
    pub poll_timeout: Duration,
    /// Quiet period after end of stream that ends the drain
    pub drain_timeout: Duration,
    /// How long to wait for the driver to parse the header
    pub header_timeout: Duration,
    pub model: ExecutionModel,
    /// Integer controls applied before OUTPUT buffers are requested
    pub controls: Vec<(u32, i32)>,
    pub sysfs_root: Option<PathBuf>,
    pub dev_dir: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new(DEFAULT_DRIVER)
    }
}

impl SessionConfig {
    pub fn new<S: Into<String>>(driver: S) -> Self {
        SessionConfig {
            driver: driver.into(),
            output_buffers: DEFAULT_OUTPUT_BUFFERS,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            extra_capture_buffers: DEFAULT_EXTRA_CAPTURE_BUFFERS,
            poll_timeout: Duration::from_millis(100),
            drain_timeout: Duration::from_millis(500),
            header_timeout: Duration::from_secs(2),
            model: ExecutionModel::Polling,
            controls: Vec::new(),
            sysfs_root: None,
            dev_dir: None,
        }
    }

    pub fn with_driver<S: Into<String>>(mut self, driver: S) -> Self {
        self.driver = driver.into();
        self
    }

    pub fn with_output_buffers(mut self, count: u32) -> Self {
        self.output_buffers = count;
        self
    }

    pub fn with_max_frame_size(mut self, bytes: u32) -> Self {
        self.max_frame_size = bytes;
        self
    }

    pub fn with_extra_capture_buffers(mut self, count: u32) -> Self {
        self.extra_capture_buffers = count;
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn with_header_timeout(mut self, timeout: Duration) -> Self {
        self.header_timeout = timeout;
        self
    }

    pub fn with_model(mut self, model: ExecutionModel) -> Self {
        self.model = model;
        self
    }

    /// Adds an integer control, e.g. a driver specific decoder option.
    pub fn with_control(mut self, id: u32, value: i32) -> Self {
        self.controls.push((id, value));
        self
    }

    pub fn with_sysfs_root<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.sysfs_root = Some(root.into());
        self
    }

    pub fn with_dev_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.dev_dir = Some(dir.into());
        self
    }

    /// Checks the values a session cannot start with.
    pub fn validate(&self) -> Result<(), Error> {
        if self.output_buffers == 0 {
            return Err(Error::InvalidConfig(
                "at least one OUTPUT buffer is required".to_string(),
            ));
        }
        if self.max_frame_size == 0 {
            return Err(Error::InvalidConfig(
                "maximum frame size must be non-zero".to_string(),
            ));
        }
        if self.poll_timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "poll timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Counters and outcome of a decode run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    /// Compressed frames queued, excluding the header and end-of-stream buffers
    pub frames_fed: u64,
    pub bytes_fed: u64,
    /// Frames that did not fit the OUTPUT plane
    pub truncated_frames: u64,
    pub frames_decoded: u64,
    /// The end-of-stream buffer was queued
    pub end_of_stream: bool,
    pub drain: Option<DrainEnd>,
    /// The run ended on a stop request
    pub stopped: bool,
    pub elapsed: Duration,
    pub capture_format: Option<CaptureFormat>,
    pub state: SessionState,
}

#[derive(Debug, Clone, Copy, Default)]
struct FeedStats {
    frames_fed: u64,
    bytes_fed: u64,
    truncated_frames: u64,
    end_of_stream: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct DrainStats {
    frames_decoded: u64,
    end: Option<DrainEnd>,
    stopped: bool,
}

/// Flags shared between the two loops of the threaded model.
struct Signals<'a> {
    stop: &'a AtomicBool,
    abort: &'a AtomicBool,
    eos: &'a AtomicBool,
}

/// A decode task over one M2M decoder device.
///
/// Each step method expects one lifecycle state. A device or input failure
/// moves the session to [`SessionState::Failed`], after which only
/// [`close`](Self::close) is useful. Calling a step in the wrong state is
/// different: it returns [`Error::InvalidState`] without touching the
/// device and leaves the state as it was.
pub struct DecodeSession<D: VideoDevice = V4l2Device> {
    config: SessionConfig,
    state: SessionState,
    device: Option<D>,
    path: Option<PathBuf>,
    capabilities: Option<Capabilities>,
    output_format: Option<PixFormat>,
    capture_format: Option<CaptureFormat>,
    output: BufferPool<D::Mapping>,
    capture: BufferPool<D::Mapping>,
    output_streaming: bool,
    capture_streaming: bool,
    stop: Arc<AtomicBool>,
    fed: FeedStats,
    drained: DrainStats,
    elapsed: Duration,
}

impl DecodeSession<V4l2Device> {
    /// Locates the decoder named by `config.driver` and opens it.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidConfig`] for an unusable configuration
    /// - [`Error::DeviceNotFound`] when no node matches the driver name
    /// - [`Error::Io`] when the node cannot be opened
    pub fn open(config: SessionConfig) -> Result<Self, Error> {
        config.validate()?;
        let mut enumerator = DeviceEnumerator::new();
        if let Some(root) = &config.sysfs_root {
            enumerator = enumerator.with_sysfs_root(root.clone());
        }
        if let Some(dir) = &config.dev_dir {
            enumerator = enumerator.with_dev_dir(dir.clone());
        }

        let mut session = Self::detached(config);
        let info = enumerator.locate(&session.config.driver)?;
        enter(&mut session.state, SessionState::Located);

        let device = V4l2Device::open(&info.path)?;
        session.device = Some(device);
        session.path = Some(info.path);
        enter(&mut session.state, SessionState::Opened);
        Ok(session)
    }
}

impl<D: VideoDevice> DecodeSession<D> {
    /// Starts a session on an already opened device.
    pub fn with_device(device: D, config: SessionConfig) -> Result<Self, Error> {
        config.validate()?;
        let mut session = Self::detached(config);
        session.device = Some(device);
        enter(&mut session.state, SessionState::Opened);
        Ok(session)
    }

    fn detached(config: SessionConfig) -> Self {
        DecodeSession {
            config,
            state: SessionState::Created,
            device: None,
            path: None,
            capabilities: None,
            output_format: None,
            capture_format: None,
            output: BufferPool::new(Direction::Output),
            capture: BufferPool::new(Direction::Capture),
            output_streaming: false,
            capture_streaming: false,
            stop: Arc::new(AtomicBool::new(false)),
            fed: FeedStats::default(),
            drained: DrainStats::default(),
            elapsed: Duration::ZERO,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Device node the session was opened on, if it located one itself.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn device(&self) -> Option<&D> {
        self.device.as_ref()
    }

    pub fn capabilities(&self) -> Option<&Capabilities> {
        self.capabilities.as_ref()
    }

    pub fn output_format(&self) -> Option<&PixFormat> {
        self.output_format.as_ref()
    }

    pub fn capture_format(&self) -> Option<&CaptureFormat> {
        self.capture_format.as_ref()
    }

    pub fn output_pool(&self) -> &BufferPool<D::Mapping> {
        &self.output
    }

    pub fn capture_pool(&self) -> &BufferPool<D::Mapping> {
        &self.capture
    }

    /// Flag that ends [`run`](Self::run) between loop iterations when set.
    ///
    /// Setting it is the only operation that is safe from another thread or
    /// a signal handler.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Counters of the last run together with the current state.
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            frames_fed: self.fed.frames_fed,
            bytes_fed: self.fed.bytes_fed,
            truncated_frames: self.fed.truncated_frames,
            frames_decoded: self.drained.frames_decoded,
            end_of_stream: self.fed.end_of_stream,
            drain: self.drained.end,
            stopped: self.drained.stopped,
            elapsed: self.elapsed,
            capture_format: self.capture_format.clone(),
            state: self.state,
        }
    }

    // Runs `f` if the session is in `expected`; a failure of `f` moves it to
    // Failed. A wrong state is reported without a transition.
    fn step<T>(
        &mut self,
        op: &'static str,
        expected: SessionState,
        f: impl FnOnce(&mut Self) -> Result<T, Error>,
    ) -> Result<T, Error> {
        if self.state != expected {
            return Err(Error::InvalidState {
                op,
                state: self.state,
            });
        }
        let result = f(self);
        if let Err(err) = &result {
            warn!("{} failed in state {:?}: {}", op, self.state, err);
            self.state = SessionState::Failed;
        }
        result
    }

    /// Queries the capabilities and rejects devices that are not
    /// multi-planar M2M decoders.
    pub fn verify_capabilities(&mut self) -> Result<Capabilities, Error> {
        self.step("verify_capabilities", SessionState::Opened, |s| {
            let caps = attached(&s.device)?.query_capabilities()?;
            caps.verify()?;
            info!("device {}", caps);
            s.capabilities = Some(caps.clone());
            enter(&mut s.state, SessionState::CapabilitiesVerified);
            Ok(caps)
        })
    }

    /// Sets the compressed OUTPUT format with the configured frame budget.
    pub fn set_output_format(&mut self, codec: impl Into<FourCC>) -> Result<PixFormat, Error> {
        let codec = codec.into();
        self.step("set_output_format", SessionState::CapabilitiesVerified, |s| {
            let device = attached(&s.device)?;
            let applied = format::set_output_format(device, codec, s.config.max_frame_size)?;
            s.output_format = Some(applied.clone());
            enter(&mut s.state, SessionState::OutputFormatSet);
            Ok(applied)
        })
    }

    /// Applies the configured integer controls.
    pub fn apply_controls(&mut self) -> Result<(), Error> {
        self.step("apply_controls", SessionState::OutputFormatSet, |s| {
            let device = attached(&s.device)?;
            for &(id, value) in &s.config.controls {
                debug!("control {:#x} = {}", id, value);
                device.set_control(id, value)?;
            }
            Ok(())
        })
    }

    /// Requests and maps the OUTPUT buffers, returning the granted count.
    pub fn setup_output_buffers(&mut self) -> Result<u32, Error> {
        self.step("setup_output_buffers", SessionState::OutputFormatSet, |s| {
            let device = attached(&s.device)?;
            let granted = s.output.allocate(device, s.config.output_buffers)?;
            s.output.map_all(device)?;
            enter(&mut s.state, SessionState::OutputBuffersReady);
            Ok(granted)
        })
    }

    /// Copies the stream header into OUTPUT buffer 0 and queues it.
    ///
    /// An empty header is queued with zero bytes used; streams that carry
    /// their parameters in-band need nothing else.
    pub fn queue_header(&mut self, header: &[u8]) -> Result<u32, Error> {
        self.step("queue_header", SessionState::OutputBuffersReady, |s| {
            let device = attached(&s.device)?;
            let written = s.output.write(0, header)?;
            s.output.enqueue(device, 0, &[written])?;
            debug!("header of {} bytes queued", written);
            enter(&mut s.state, SessionState::HeaderQueued);
            Ok(written)
        })
    }

    /// Starts OUTPUT streaming, which lets the driver parse the header.
    pub fn start_output(&mut self) -> Result<(), Error> {
        self.step("start_output", SessionState::HeaderQueued, |s| {
            attached(&s.device)?.stream_on(Direction::Output)?;
            s.output_streaming = true;
            enter(&mut s.state, SessionState::OutputStreaming);
            Ok(())
        })
    }

    /// Waits for the CAPTURE geometry, then requests, maps and queues the
    /// CAPTURE buffers and starts CAPTURE streaming.
    pub fn setup_capture(&mut self) -> Result<CaptureFormat, Error> {
        self.step("setup_capture", SessionState::OutputStreaming, |s| {
            let device = attached(&s.device)?;
            let capture = wait_capture_format(device, &mut s.output, s.config.header_timeout)?;
            s.capture_format = Some(capture.clone());
            enter(&mut s.state, SessionState::CaptureFormatKnown);

            let count = capture.buffer_count(s.config.extra_capture_buffers);
            s.capture.allocate(device, count)?;
            s.capture.map_all(device)?;
            enter(&mut s.state, SessionState::CaptureBuffersReady);

            let empty = vec![0; capture.num_planes()];
            for index in 0..s.capture.len() as u32 {
                s.capture.enqueue(device, index, &empty)?;
            }
            device.stream_on(Direction::Capture)?;
            s.capture_streaming = true;
            enter(&mut s.state, SessionState::CaptureStreaming);
            Ok(capture)
        })
    }

    /// Runs every setup step from an opened device to CAPTURE streaming.
    pub fn start(&mut self, codec: impl Into<FourCC>, header: &[u8]) -> Result<CaptureFormat, Error> {
        self.verify_capabilities()?;
        self.set_output_format(codec)?;
        self.apply_controls()?;
        self.setup_output_buffers()?;
        self.queue_header(header)?;
        self.start_output()?;
        self.setup_capture()
    }

    /// Feeds `source` to the decoder and hands every decoded frame to
    /// `sink` until the drain completes or a stop is requested, then stops
    /// streaming on both queues.
    ///
    /// Frames borrow the CAPTURE mapping; the buffer is queued back once
    /// `sink` returns. An error from `sink` fails the session.
    pub fn run<S, F>(&mut self, source: &mut S, sink: F) -> Result<SessionSummary, Error>
    where
        S: FrameSource + Send + ?Sized,
        F: FnMut(&DecodedFrame<'_>) -> Result<(), Error>,
        D: Sync,
        D::Mapping: Send,
    {
        self.step("run", SessionState::CaptureStreaming, |s| {
            let started = Instant::now();
            info!("decoding with the {:?} model", s.config.model);
            let (fed, drained) = match s.config.model {
                ExecutionModel::Polling => s.run_polling(source, sink)?,
                ExecutionModel::Threaded => s.run_threaded(source, sink)?,
            };
            s.fed = fed;
            s.drained = drained;
            s.elapsed = started.elapsed();
            if fed.end_of_stream && s.state != SessionState::Draining {
                enter(&mut s.state, SessionState::Draining);
            }

            s.stop_streaming()?;
            enter(&mut s.state, SessionState::Stopped);
            info!(
                "fed {} frames ({} bytes), decoded {} frames in {:?}",
                fed.frames_fed, fed.bytes_fed, drained.frames_decoded, s.elapsed
            );
            Ok(s.summary())
        })
    }

    fn run_polling<S, F>(&mut self, source: &mut S, mut sink: F) -> Result<(FeedStats, DrainStats), Error>
    where
        S: FrameSource + ?Sized,
        F: FnMut(&DecodedFrame<'_>) -> Result<(), Error>,
    {
        let device = attached(&self.device)?;
        let format = self
            .capture_format
            .as_ref()
            .ok_or(Error::CaptureFormatUnavailable)?;
        let mut fed = FeedStats::default();
        let mut drained = DrainStats::default();
        let mut deadline: Option<Instant> = None;

        loop {
            if self.stop.load(Ordering::Acquire) {
                info!("stop requested");
                drained.stopped = true;
                break;
            }

            while !fed.end_of_stream {
                let Some(index) = self.output.next_free() else {
                    break;
                };
                if feed_frame(device, &mut self.output, index, source, &mut fed)? {
                    enter(&mut self.state, SessionState::Draining);
                    deadline = Some(Instant::now() + self.config.drain_timeout);
                }
            }

            let interest = Interest {
                output: self.output.queued_count() > 0,
                capture: true,
            };
            let readiness = device.poll(interest, self.config.poll_timeout)?;
            if readiness.error {
                return Err(Error::ioctl("poll", Errno::EIO));
            }
            if readiness.output {
                reclaim_output(device, &mut self.output)?;
            }
            if readiness.capture {
                let before = drained.frames_decoded;
                if let Some(end) =
                    collect_capture(device, &mut self.capture, format, &mut sink, &mut drained)?
                {
                    drained.end = Some(end);
                    break;
                }
                if drained.frames_decoded > before && deadline.is_some() {
                    deadline = Some(Instant::now() + self.config.drain_timeout);
                }
            }

            if deadline.is_some_and(|d| Instant::now() >= d) {
                info!(
                    "no decoded frame within {:?} of end of stream",
                    self.config.drain_timeout
                );
                drained.end = Some(DrainEnd::Timeout);
                break;
            }
        }
        Ok((fed, drained))
    }

    fn run_threaded<S, F>(&mut self, source: &mut S, mut sink: F) -> Result<(FeedStats, DrainStats), Error>
    where
        S: FrameSource + Send + ?Sized,
        F: FnMut(&DecodedFrame<'_>) -> Result<(), Error>,
        D: Sync,
        D::Mapping: Send,
    {
        let device = attached(&self.device)?;
        let format = self
            .capture_format
            .as_ref()
            .ok_or(Error::CaptureFormatUnavailable)?;
        let output = &mut self.output;
        let capture = &mut self.capture;
        let poll_timeout = self.config.poll_timeout;
        let drain_timeout = self.config.drain_timeout;
        let eos = AtomicBool::new(false);
        let abort = AtomicBool::new(false);
        let signals = Signals {
            stop: &self.stop,
            abort: &abort,
            eos: &eos,
        };

        let (fed, drained) = thread::scope(|scope| {
            let feeder = scope.spawn(|| {
                let result = feed_loop(device, output, source, &signals, poll_timeout);
                if result.is_err() {
                    signals.abort.store(true, Ordering::Release);
                }
                result
            });

            let drained = drain_loop(
                device,
                capture,
                format,
                &mut sink,
                &signals,
                poll_timeout,
                drain_timeout,
            );
            // The feeder may be waiting on OUTPUT buffers a drained
            // decoder no longer returns.
            signals.abort.store(true, Ordering::Release);
            let fed = feeder
                .join()
                .unwrap_or_else(|panic| std::panic::resume_unwind(panic));
            (fed, drained)
        });

        let drained = drained?;
        let fed = fed?;
        Ok((fed, drained))
    }

    // Stream-off of every streaming direction, CAPTURE first. Each direction
    // is attempted even if the other fails.
    fn stop_streaming(&mut self) -> Result<(), Error> {
        let device = attached(&self.device)?;
        let mut first_err = None;
        for (direction, streaming) in [
            (Direction::Capture, &mut self.capture_streaming),
            (Direction::Output, &mut self.output_streaming),
        ] {
            if !*streaming {
                continue;
            }
            match device.stream_off(direction) {
                Ok(()) => {
                    *streaming = false;
                    debug!("{} streaming stopped", direction);
                }
                Err(err) => {
                    warn!("{} stream off failed: {}", direction, err);
                    first_err.get_or_insert(err);
                }
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Exports a CAPTURE plane as a DMA-BUF for zero-copy sharing.
    pub fn export_capture_plane(&self, index: u32, plane: u32) -> Result<DmaBuf, Error> {
        let device = self.device.as_ref().ok_or(Error::InvalidState {
            op: "export_capture_plane",
            state: self.state,
        })?;
        self.capture.export(device, index, plane)
    }

    /// Stops streaming, unmaps both pools and closes the device.
    ///
    /// Valid from any state. Teardown always completes; the first stream-off
    /// failure, if any, is returned afterwards. Calling it again is a no-op.
    pub fn close(&mut self) -> Result<(), Error> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        let result = if self.device.is_some() {
            self.stop_streaming()
        } else {
            Ok(())
        };
        self.output_streaming = false;
        self.capture_streaming = false;

        let released = self.output.unmap_all() + self.capture.unmap_all();
        if self.device.take().is_some() {
            debug!("device closed, {} planes released", released);
        }
        enter(&mut self.state, SessionState::Closed);
        result
    }
}

impl<D: VideoDevice> Drop for DecodeSession<D> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!("teardown: {}", err);
        }
    }
}

fn enter(state: &mut SessionState, next: SessionState) {
    info!("session {:?} -> {:?}", state, next);
    *state = next;
}

fn attached<D>(device: &Option<D>) -> Result<&D, Error> {
    device.as_ref().ok_or(Error::InvalidState {
        op: "device access",
        state: SessionState::Closed,
    })
}

// Retries the CAPTURE format read until the header has been parsed. The
// header buffer is reclaimed as soon as the driver returns it.
fn wait_capture_format<D: VideoDevice>(
    device: &D,
    output: &mut BufferPool<D::Mapping>,
    timeout: Duration,
) -> Result<CaptureFormat, Error> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(capture) = format::read_capture_format(device)? {
            return Ok(capture);
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(Error::CaptureFormatUnavailable);
        }
        let wait = (deadline - now).min(FORMAT_RETRY_INTERVAL);
        let readiness = device.poll(Interest::OUTPUT, wait)?;
        if readiness.output && output.queued_count() > 0 {
            reclaim_output(device, output)?;
        } else if !readiness.is_empty() {
            thread::sleep(wait);
        }
    }
}

// Fills OUTPUT buffer `index` with the next frame, or queues the empty
// end-of-stream buffer. Returns true once end of stream has been queued.
fn feed_frame<D, S>(
    device: &D,
    pool: &mut BufferPool<D::Mapping>,
    index: u32,
    source: &mut S,
    stats: &mut FeedStats,
) -> Result<bool, Error>
where
    D: VideoDevice,
    S: FrameSource + ?Sized,
{
    // An empty frame would read as end of stream
    let frame = loop {
        match source.next_frame()? {
            Some(frame) if frame.is_empty() => continue,
            other => break other,
        }
    };

    match frame {
        Some(frame) => {
            let written = pool.write(index, &frame)?;
            if (written as usize) < frame.len() {
                stats.truncated_frames += 1;
            }
            pool.enqueue(device, index, &[written])?;
            stats.frames_fed += 1;
            stats.bytes_fed += written as u64;
            trace!("OUTPUT buffer {} queued with {} bytes", index, written);
            Ok(false)
        }
        None => {
            pool.enqueue(device, index, &[])?;
            stats.end_of_stream = true;
            info!("end of stream after {} frames", stats.frames_fed);
            Ok(true)
        }
    }
}

fn reclaim_output<D: VideoDevice>(
    device: &D,
    pool: &mut BufferPool<D::Mapping>,
) -> Result<usize, Error> {
    let mut reclaimed = 0;
    while pool.queued_count() > 0 {
        let Some(buffer) = pool.dequeue(device)? else {
            break;
        };
        if buffer.is_error() {
            warn!("driver reported an error on OUTPUT buffer {}", buffer.index);
        }
        trace!("OUTPUT buffer {} returned", buffer.index);
        reclaimed += 1;
    }
    Ok(reclaimed)
}

// Hands every completed CAPTURE buffer to `sink` and queues it back.
// Returns how the drain ended once the driver signals it.
fn collect_capture<D, F>(
    device: &D,
    pool: &mut BufferPool<D::Mapping>,
    format: &CaptureFormat,
    sink: &mut F,
    stats: &mut DrainStats,
) -> Result<Option<DrainEnd>, Error>
where
    D: VideoDevice,
    F: FnMut(&DecodedFrame<'_>) -> Result<(), Error>,
{
    while pool.queued_count() > 0 {
        let buffer = match pool.dequeue(device) {
            Ok(Some(buffer)) => buffer,
            Ok(None) => break,
            Err(err) if err.errno() == Some(Errno::EPIPE) => {
                debug!("CAPTURE queue drained");
                return Ok(Some(DrainEnd::Epipe));
            }
            Err(err) => return Err(err),
        };

        if buffer.total_bytes() > 0 {
            if buffer.is_error() {
                warn!("CAPTURE buffer {} may be corrupted", buffer.index);
            }
            let frame = DecodedFrame::new(&buffer, format, pool.payloads(buffer.index));
            sink(&frame)?;
            stats.frames_decoded += 1;
            trace!(
                "frame {} from CAPTURE buffer {}",
                buffer.sequence,
                buffer.index
            );
        }

        if buffer.is_last() {
            debug!("last CAPTURE buffer {}", buffer.index);
            return Ok(Some(DrainEnd::LastBuffer));
        }
        pool.enqueue(device, buffer.index, &vec![0; format.num_planes()])?;
    }
    Ok(None)
}

fn feed_loop<D, S>(
    device: &D,
    pool: &mut BufferPool<D::Mapping>,
    source: &mut S,
    signals: &Signals<'_>,
    poll_timeout: Duration,
) -> Result<FeedStats, Error>
where
    D: VideoDevice,
    S: FrameSource + ?Sized,
{
    let mut stats = FeedStats::default();
    loop {
        if signals.stop.load(Ordering::Acquire) || signals.abort.load(Ordering::Acquire) {
            return Ok(stats);
        }
        let Some(index) = pool.next_free() else {
            let readiness = device.poll(Interest::OUTPUT, poll_timeout)?;
            if readiness.error {
                return Err(Error::ioctl("poll", Errno::EIO));
            }
            if readiness.output {
                reclaim_output(device, pool)?;
            }
            continue;
        };
        if feed_frame(device, pool, index, source, &mut stats)? {
            signals.eos.store(true, Ordering::Release);
            return Ok(stats);
        }
    }
}

fn drain_loop<D, F>(
    device: &D,
    pool: &mut BufferPool<D::Mapping>,
    format: &CaptureFormat,
    sink: &mut F,
    signals: &Signals<'_>,
    poll_timeout: Duration,
    drain_timeout: Duration,
) -> Result<DrainStats, Error>
where
    D: VideoDevice,
    F: FnMut(&DecodedFrame<'_>) -> Result<(), Error>,
{
    let mut stats = DrainStats::default();
    let mut deadline: Option<Instant> = None;
    loop {
        if signals.stop.load(Ordering::Acquire) {
            info!("stop requested");
            stats.stopped = true;
            return Ok(stats);
        }
        if signals.abort.load(Ordering::Acquire) {
            return Ok(stats);
        }
        if deadline.is_none() && signals.eos.load(Ordering::Acquire) {
            deadline = Some(Instant::now() + drain_timeout);
        }

        let readiness = device.poll(Interest::CAPTURE, poll_timeout)?;
        if readiness.error {
            return Err(Error::ioctl("poll", Errno::EIO));
        }
        if readiness.capture {
            let before = stats.frames_decoded;
            if let Some(end) = collect_capture(device, pool, format, sink, &mut stats)? {
                stats.end = Some(end);
                return Ok(stats);
            }
            if stats.frames_decoded > before && deadline.is_some() {
                deadline = Some(Instant::now() + drain_timeout);
            }
        }

        if deadline.is_some_and(|d| Instant::now() >= d) {
            info!("no decoded frame within {:?} of end of stream", drain_timeout);
            stats.end = Some(DrainEnd::Timeout);
            return Ok(stats);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use m2mdec_sys as sys;
    use rand::Rng;

    use super::*;
    use crate::pool::BufferState;
    use crate::v4l2::mock::{DrainSignal, MockDevice};
    use crate::v4l2::PlaneFormat;

    fn config() -> SessionConfig {
        SessionConfig::new("mock")
            .with_poll_timeout(Duration::from_millis(5))
            .with_drain_timeout(Duration::from_millis(50))
            .with_header_timeout(Duration::from_millis(100))
    }

    fn frames(count: usize) -> VecDeque<Vec<u8>> {
        (0..count).map(|i| vec![0, 0, 0, 1, 0x65, i as u8]).collect()
    }

    fn started(device: MockDevice, config: SessionConfig) -> DecodeSession<MockDevice> {
        let mut session = DecodeSession::with_device(device, config).unwrap();
        session.start(FourCC::H264, &[0, 0, 0, 1, 0x67]).unwrap();
        session
    }

    fn position(calls: &[String], call: &str) -> usize {
        calls
            .iter()
            .position(|c| c == call)
            .unwrap_or_else(|| panic!("{} not in {:?}", call, calls))
    }

    #[test]
    fn test_output_setup_scenario() {
        let device = MockDevice::decoder();
        let state = device.state();
        let mut session = DecodeSession::with_device(device, config()).unwrap();

        session.verify_capabilities().unwrap();
        let applied = session.set_output_format(FourCC::H264).unwrap();
        assert_eq!(applied.planes[0].size_image, 3_145_728);
        assert_eq!(session.setup_output_buffers().unwrap(), 2);
        assert_eq!(session.state(), SessionState::OutputBuffersReady);

        let pool = session.output_pool();
        assert_eq!(pool.len(), 2);
        assert!(pool.buffers().iter().all(|b| b.state() == BufferState::Mapped
            && b.planes().iter().all(|p| p.is_mapped())));
        assert_eq!(state.lock().unwrap().mapped, 2);
    }

    #[test]
    fn test_empty_header_accepted() {
        let mut session = DecodeSession::with_device(MockDevice::decoder(), config()).unwrap();
        session.verify_capabilities().unwrap();
        session.set_output_format(FourCC::MPEG4).unwrap();
        session.setup_output_buffers().unwrap();

        assert_eq!(session.queue_header(&[]).unwrap(), 0);
        assert_eq!(session.state(), SessionState::HeaderQueued);
        let header = session.output_pool().buffer(0).unwrap();
        assert_eq!(header.state(), BufferState::Queued);
        assert_eq!(header.planes()[0].bytes_used, 0);

        session.start_output().unwrap();
        assert_eq!(session.state(), SessionState::OutputStreaming);
    }

    #[test]
    fn test_capture_only_device_rejected() {
        let device =
            MockDevice::with_caps(sys::V4L2_CAP_VIDEO_CAPTURE_MPLANE | sys::V4L2_CAP_STREAMING);
        let state = device.state();
        let mut session = DecodeSession::with_device(device, config()).unwrap();

        let err = session.verify_capabilities().unwrap_err();
        assert!(matches!(err, Error::CapabilityMismatch { .. }));
        assert_eq!(session.state(), SessionState::Failed);

        let err = session.set_output_format(FourCC::H264).unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
        assert!(session.setup_output_buffers().is_err());
        assert_eq!(state.lock().unwrap().calls, vec!["QUERYCAP".to_string()]);
    }

    #[test]
    fn test_random_capabilities_rejected_without_side_effects() {
        let mut rng = rand::rng();
        for _ in 0..500 {
            let bits: u32 = rng.random();
            // The mock reports no device_caps, so DEVICE_CAPS masks everything
            let effective = if bits & sys::V4L2_CAP_DEVICE_CAPS != 0 {
                0
            } else {
                bits
            };
            let split = sys::V4L2_CAP_VIDEO_OUTPUT_MPLANE
                | sys::V4L2_CAP_VIDEO_CAPTURE_MPLANE
                | sys::V4L2_CAP_STREAMING;
            let usable =
                effective & split == split || effective & sys::V4L2_CAP_VIDEO_M2M_MPLANE != 0;

            let device = MockDevice::with_caps(bits);
            let state = device.state();
            let mut session = DecodeSession::with_device(device, config()).unwrap();
            let result = session.start(FourCC::H264, &[]);
            if usable {
                assert!(result.is_ok(), "bits {:#x}: {:?}", bits, result);
            } else {
                assert!(matches!(result, Err(Error::CapabilityMismatch { .. })));
                assert_eq!(state.lock().unwrap().calls, vec!["QUERYCAP".to_string()]);
            }
        }
    }

    #[test]
    fn test_capture_geometry_scenario() {
        let device = MockDevice::decoder();
        let state = device.state();
        {
            let mut state = state.lock().unwrap();
            state.capture_format = PixFormat {
                width: 1920,
                height: 1080,
                fourcc: FourCC::NV12MT,
                planes: vec![
                    PlaneFormat {
                        size_image: 3_133_440,
                        bytes_per_line: 1920,
                    },
                    PlaneFormat {
                        size_image: 1_566_720,
                        bytes_per_line: 1920,
                    },
                ],
            };
        }
        let session = started(device, config());
        assert_eq!(session.state(), SessionState::CaptureStreaming);

        let capture = session.capture_format().unwrap();
        assert_eq!((capture.width(), capture.height()), (1920, 1080));
        let pool = session.capture_pool();
        assert_eq!(pool.len(), 5);
        for buffer in pool.buffers() {
            assert_eq!(buffer.state(), BufferState::Queued);
            let lengths: Vec<u32> = buffer.planes().iter().map(|p| p.length).collect();
            assert_eq!(lengths, vec![3_133_440, 1_566_720]);
        }
        assert!(state
            .lock()
            .unwrap()
            .calls
            .contains(&"REQBUFS CAPTURE 5".to_string()));
    }

    #[test]
    fn test_setup_ordering() {
        let device = MockDevice::decoder();
        let state = device.state();
        let _session = started(device, config().with_control(sys::V4L2_CID_BASE + 1, 7));
        let calls = state.lock().unwrap().calls.clone();

        let set_fmt = position(&calls, "S_FMT OUTPUT");
        let control = calls.iter().position(|c| c.starts_with("S_CTRL")).unwrap();
        let reqbufs = position(&calls, "REQBUFS OUTPUT 2");
        let header = position(&calls, "QBUF OUTPUT 0");
        let output_on = position(&calls, "STREAMON OUTPUT");
        let get_fmt = position(&calls, "G_FMT CAPTURE");
        let capture_req = position(&calls, "REQBUFS CAPTURE 5");
        let capture_on = position(&calls, "STREAMON CAPTURE");

        assert!(set_fmt < control && control < reqbufs);
        assert!(reqbufs < header && header < output_on);
        assert!(output_on < get_fmt && get_fmt < capture_req && capture_req < capture_on);
        assert_eq!(
            state.lock().unwrap().controls.get(&(sys::V4L2_CID_BASE + 1)),
            Some(&7)
        );
    }

    #[test]
    fn test_delayed_capture_format() {
        let device = MockDevice::decoder();
        device.state().lock().unwrap().format_delay = 3;
        let session = started(device, config());
        assert_eq!(session.state(), SessionState::CaptureStreaming);
        // The header buffer was reclaimed while waiting
        assert_eq!(
            session.output_pool().buffer(0).unwrap().state(),
            BufferState::Dequeued
        );
    }

    #[test]
    fn test_header_timeout() {
        let device = MockDevice::decoder();
        device.state().lock().unwrap().format_delay = u32::MAX;
        let mut session = DecodeSession::with_device(device, config()).unwrap();
        let err = session.start(FourCC::H264, &[]).unwrap_err();
        assert!(matches!(err, Error::CaptureFormatUnavailable));
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[test]
    fn test_decode_polling() {
        let device = MockDevice::decoder();
        let state = device.state();
        let mut session = started(device, config());

        let mut sizes = Vec::new();
        let summary = session
            .run(&mut frames(6), |frame| {
                assert_eq!((frame.width(), frame.height()), (320, 240));
                sizes.push(frame.planes().iter().map(|p| p.len()).collect::<Vec<_>>());
                Ok(())
            })
            .unwrap();

        assert_eq!(summary.frames_fed, 6);
        assert_eq!(summary.bytes_fed, 36);
        assert_eq!(summary.frames_decoded, 6);
        assert!(summary.end_of_stream);
        assert_eq!(summary.drain, Some(DrainEnd::LastBuffer));
        assert_eq!(summary.state, SessionState::Stopped);
        assert!(sizes.iter().all(|s| s == &vec![76_800, 38_400]));

        let state = state.lock().unwrap();
        assert_eq!(state.streaming, [false, false]);
        assert!(state.calls.contains(&"STREAMOFF CAPTURE".to_string()));
        assert!(state.calls.contains(&"STREAMOFF OUTPUT".to_string()));
    }

    #[test]
    fn test_decode_threaded() {
        let device = MockDevice::decoder();
        let mut session = started(device, config().with_model(ExecutionModel::Threaded));

        let mut decoded = 0;
        let summary = session
            .run(&mut frames(10), |_| {
                decoded += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(decoded, 10);
        assert_eq!(summary.frames_fed, 10);
        assert_eq!(summary.frames_decoded, 10);
        assert_eq!(summary.drain, Some(DrainEnd::LastBuffer));
        assert_eq!(session.state(), SessionState::Stopped);
    }

    #[test]
    fn test_drain_signals() {
        for (model, signal, expected) in [
            (ExecutionModel::Polling, DrainSignal::Epipe, DrainEnd::Epipe),
            (ExecutionModel::Polling, DrainSignal::Silent, DrainEnd::Timeout),
            (ExecutionModel::Threaded, DrainSignal::Epipe, DrainEnd::Epipe),
            (ExecutionModel::Threaded, DrainSignal::Silent, DrainEnd::Timeout),
        ] {
            let device = MockDevice::decoder();
            device.state().lock().unwrap().drain_signal = signal;
            let mut session = started(device, config().with_model(model));
            let summary = session.run(&mut frames(4), |_| Ok(())).unwrap();
            assert_eq!(summary.drain, Some(expected), "{:?} {:?}", model, signal);
            assert_eq!(summary.frames_decoded, 4);
            assert_eq!(session.state(), SessionState::Stopped);
        }
    }

    #[test]
    fn test_stop_requested() {
        for model in [ExecutionModel::Polling, ExecutionModel::Threaded] {
            let mut session = started(MockDevice::decoder(), config().with_model(model));
            session.stop_handle().store(true, Ordering::Release);
            let summary = session.run(&mut frames(4), |_| Ok(())).unwrap();
            assert!(summary.stopped, "{:?}", model);
            assert_eq!(summary.frames_fed, 0);
            assert_eq!(summary.drain, None);
            assert_eq!(summary.state, SessionState::Stopped);
        }
    }

    #[test]
    fn test_truncated_frames_counted() {
        let device = MockDevice::decoder();
        device.state().lock().unwrap().output_plane_size = Some(4);
        let mut session = started(device, config());
        let summary = session.run(&mut frames(3), |_| Ok(())).unwrap();
        assert_eq!(summary.truncated_frames, 3);
        assert_eq!(summary.bytes_fed, 12);
    }

    #[test]
    fn test_sink_error_fails_session() {
        for model in [ExecutionModel::Polling, ExecutionModel::Threaded] {
            let mut session = started(MockDevice::decoder(), config().with_model(model));
            let err = session
                .run(&mut frames(3), |_| Err(Error::Demux("sink".to_string())))
                .unwrap_err();
            assert!(matches!(err, Error::Demux(_)), "{:?}", model);
            assert_eq!(session.state(), SessionState::Failed);
        }
    }

    #[test]
    fn test_poll_error_fails_session() {
        for model in [ExecutionModel::Polling, ExecutionModel::Threaded] {
            let device = MockDevice::decoder();
            let state = device.state();
            let mut session = started(device, config().with_model(model));
            state.lock().unwrap().poll_error = true;
            let err = session.run(&mut frames(3), |_| Ok(())).unwrap_err();
            assert_eq!(err.errno(), Some(Errno::EIO), "{:?}", model);
            assert_eq!(session.state(), SessionState::Failed);
        }
    }

    /// Yields its frames, then fails instead of reporting end of stream.
    struct BrokenSource {
        frames: VecDeque<Vec<u8>>,
    }

    impl FrameSource for BrokenSource {
        fn next_frame(&mut self) -> Result<Option<Vec<u8>>, Error> {
            match self.frames.pop_front() {
                Some(frame) => Ok(Some(frame)),
                None => Err(Error::Demux("truncated sample".to_string())),
            }
        }
    }

    #[test]
    fn test_source_error_fails_session() {
        for model in [ExecutionModel::Polling, ExecutionModel::Threaded] {
            let device = MockDevice::decoder();
            let state = device.state();
            let mut session = started(device, config().with_model(model));
            let mut source = BrokenSource { frames: frames(2) };

            let err = session.run(&mut source, |_| Ok(())).unwrap_err();
            assert!(
                matches!(&err, Error::Demux(msg) if msg == "truncated sample"),
                "{:?}: {}",
                model,
                err
            );
            assert_eq!(session.state(), SessionState::Failed);

            session.close().unwrap();
            assert_eq!(session.state(), SessionState::Closed);
            let state = state.lock().unwrap();
            assert_eq!(state.mapped, state.unmapped);
        }
    }

    #[test]
    fn test_last_buffer_before_end_of_stream() {
        for model in [ExecutionModel::Polling, ExecutionModel::Threaded] {
            let device = MockDevice::decoder();
            let state = device.state();
            let mut session = started(device, config().with_model(model));
            {
                // The decoder finishes after the first frame and then stops
                // returning OUTPUT buffers.
                let mut state = state.lock().unwrap();
                state.eos = true;
                state.hold_output_after_last = true;
            }

            let (tx, rx) = std::sync::mpsc::channel();
            let runner = thread::spawn(move || {
                let result = session.run(&mut frames(20), |_| Ok(()));
                let _ = tx.send(result.map(|summary| (summary, session.state())));
            });

            let (summary, end_state) = rx
                .recv_timeout(Duration::from_secs(5))
                .unwrap_or_else(|_| panic!("{:?} run did not return", model))
                .unwrap();
            runner.join().unwrap();

            assert_eq!(summary.drain, Some(DrainEnd::LastBuffer), "{:?}", model);
            assert!(!summary.end_of_stream);
            assert!(summary.frames_decoded >= 1);
            assert!(summary.frames_fed < 20);
            assert_eq!(end_state, SessionState::Stopped);
        }
    }

    #[test]
    fn test_run_before_start_rejected() {
        let device = MockDevice::decoder();
        let state = device.state();
        let mut session = DecodeSession::with_device(device, config()).unwrap();
        let err = session.run(&mut frames(1), |_| Ok(())).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidState {
                op: "run",
                state: SessionState::Opened
            }
        ));
        assert!(matches!(
            session.queue_header(&[]),
            Err(Error::InvalidState { .. })
        ));
        assert_eq!(session.state(), SessionState::Opened);
        assert!(state.lock().unwrap().calls.is_empty());
    }

    #[test]
    fn test_close_is_idempotent() {
        let device = MockDevice::decoder();
        let state = device.state();
        let mut session = started(device, config());
        session.run(&mut frames(2), |_| Ok(())).unwrap();

        session.close().unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        let calls = state.lock().unwrap().calls.len();

        session.close().unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        let state = state.lock().unwrap();
        assert_eq!(state.calls.len(), calls);
        assert!(state.closed);
        assert_eq!(state.mapped, state.unmapped);
    }

    #[test]
    fn test_close_while_streaming() {
        let device = MockDevice::decoder();
        let state = device.state();
        let mut session = started(device, config());
        session.close().unwrap();

        let state = state.lock().unwrap();
        assert_eq!(state.streaming, [false, false]);
        let off = position(&state.calls, "STREAMOFF OUTPUT");
        assert!(position(&state.calls, "STREAMOFF CAPTURE") < off);
        assert_eq!(state.mapped, state.unmapped);
    }

    #[test]
    fn test_close_after_failure() {
        let device = MockDevice::decoder();
        let state = device.state();
        state.lock().unwrap().fail_op = Some("STREAMON");
        let mut session = DecodeSession::with_device(device, config()).unwrap();

        let err = session.start(FourCC::H264, &[]).unwrap_err();
        assert!(matches!(err, Error::Ioctl { errno: Errno::EIO, .. }));
        assert_eq!(session.state(), SessionState::Failed);

        session.close().unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        let state = state.lock().unwrap();
        assert!(state.closed);
        assert_eq!(state.mapped, 2);
        assert_eq!(state.unmapped, 2);
        assert!(!state.calls.iter().any(|c| c.starts_with("STREAMOFF")));
    }

    #[test]
    fn test_drop_closes() {
        let device = MockDevice::decoder();
        let state = device.state();
        drop(started(device, config()));
        let state = state.lock().unwrap();
        assert!(state.closed);
        assert_eq!(state.mapped, state.unmapped);
    }

    #[test]
    fn test_export_capture_plane() {
        let device = MockDevice::decoder();
        let state = device.state();
        let session = started(device, config());
        session.export_capture_plane(1, 0).unwrap();
        assert!(state
            .lock()
            .unwrap()
            .calls
            .contains(&"EXPBUF CAPTURE 1 0".to_string()));
        assert!(session.export_capture_plane(1, 5).is_err());
    }

    #[test]
    fn test_invalid_config() {
        for config in [
            config().with_output_buffers(0),
            config().with_max_frame_size(0),
            config().with_poll_timeout(Duration::ZERO),
        ] {
            assert!(matches!(
                DecodeSession::with_device(MockDevice::decoder(), config),
                Err(Error::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn test_open_missing_driver() {
        let sysfs = tempfile::tempdir().unwrap();
        let err = DecodeSession::open(SessionConfig::new("nope").with_sysfs_root(sysfs.path()))
            .err()
            .unwrap();
        assert!(matches!(err, Error::DeviceNotFound(_)));
    }
}
