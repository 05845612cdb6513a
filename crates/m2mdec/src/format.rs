// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Format negotiation.
//!
//! The OUTPUT format (compressed codec and the byte budget of one frame)
//! is set before any OUTPUT buffer is requested. The CAPTURE format is never
//! set for decode: the driver derives it from the stream header, so it is
//! only read back after the header buffer has been queued and OUTPUT
//! streaming has started.

use log::{debug, info, warn};
use m2mdec_sys as sys;
use nix::errno::Errno;

use crate::fourcc::FourCC;
use crate::v4l2::{Direction, PixFormat, Rect, VideoDevice};
use crate::Error;

/// Byte budget of one compressed frame: 1024 x 3072.
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 1024 * 3072;

/// OUTPUT buffers requested by default.
pub const DEFAULT_OUTPUT_BUFFERS: u32 = 2;

/// CAPTURE buffers requested on top of the driver minimum.
pub const DEFAULT_EXTRA_CAPTURE_BUFFERS: u32 = 2;

/// Negotiated geometry of the decoded frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureFormat {
    pub format: PixFormat,
    /// `V4L2_CID_MIN_BUFFERS_FOR_CAPTURE`, zero when the driver has no such control
    pub min_buffers: u32,
    /// Visible area inside the decoded frame, when the driver reports one
    pub crop: Option<Rect>,
}

impl CaptureFormat {
    pub fn width(&self) -> u32 {
        self.format.width
    }

    pub fn height(&self) -> u32 {
        self.format.height
    }

    pub fn fourcc(&self) -> FourCC {
        self.format.fourcc
    }

    pub fn num_planes(&self) -> usize {
        self.format.planes.len()
    }

    pub fn plane_sizes(&self) -> Vec<u32> {
        self.format.planes.iter().map(|p| p.size_image).collect()
    }

    /// CAPTURE buffers to request: the driver minimum (at least one) plus
    /// `extra` for the application to hold while the decoder works ahead.
    pub fn buffer_count(&self, extra: u32) -> u32 {
        self.min_buffers.max(1).saturating_add(extra)
    }
}

/// Sets the compressed OUTPUT format with a single plane of `max_size` bytes.
///
/// # Errors
///
/// - [`Error::InvalidConfig`] if `max_size` is zero
/// - [`Error::FormatRejected`] if the driver refuses the codec (`EINVAL`) or
///   substitutes another format
/// - [`Error::Ioctl`] for any other failure
pub fn set_output_format<D: VideoDevice>(
    device: &D,
    codec: FourCC,
    max_size: u32,
) -> Result<PixFormat, Error> {
    if max_size == 0 {
        return Err(Error::InvalidConfig(
            "maximum frame size must be non-zero".to_string(),
        ));
    }

    let requested = PixFormat::compressed(codec, max_size);
    let applied = match device.set_format(Direction::Output, &requested) {
        Ok(applied) => applied,
        Err(err) if err.errno() == Some(Errno::EINVAL) => {
            return Err(Error::FormatRejected {
                requested: codec,
                actual: None,
            })
        }
        Err(err) => return Err(err),
    };

    if applied.fourcc != codec {
        return Err(Error::FormatRejected {
            requested: codec,
            actual: Some(applied.fourcc),
        });
    }

    let granted = applied.planes.first().map(|p| p.size_image).unwrap_or(0);
    if granted < max_size {
        warn!(
            "OUTPUT frame budget reduced from {} to {} bytes, large frames will be truncated",
            max_size, granted
        );
    }
    info!("OUTPUT format {} with {} byte frames", codec, granted);
    Ok(applied)
}

/// Reads the CAPTURE geometry the driver derived from the stream header.
///
/// Returns `Ok(None)` while the header has not been parsed: drivers then
/// either fail with `EINVAL` or report zeroed geometry.
pub fn read_capture_format<D: VideoDevice>(device: &D) -> Result<Option<CaptureFormat>, Error> {
    let format = match device.get_format(Direction::Capture) {
        Ok(format) => format,
        Err(err) if err.errno() == Some(Errno::EINVAL) => return Ok(None),
        Err(err) => return Err(err),
    };

    if format.width == 0
        || format.height == 0
        || format.planes.is_empty()
        || format.planes.iter().all(|p| p.size_image == 0)
    {
        debug!("CAPTURE format not available yet");
        return Ok(None);
    }

    let min_buffers = match device.get_control(sys::V4L2_CID_MIN_BUFFERS_FOR_CAPTURE) {
        Ok(value) => value.max(0) as u32,
        Err(err) => {
            debug!("no minimum CAPTURE buffer count: {}", err);
            0
        }
    };

    let crop = match device.get_crop(Direction::Capture) {
        Ok(crop) => Some(crop),
        Err(err) => {
            debug!("no CAPTURE crop: {}", err);
            None
        }
    };

    let capture = CaptureFormat {
        format,
        min_buffers,
        crop,
    };
    info!(
        "CAPTURE format {} {}x{} planes {:?} min buffers {}",
        capture.fourcc(),
        capture.width(),
        capture.height(),
        capture.plane_sizes(),
        capture.min_buffers
    );
    Ok(Some(capture))
}
