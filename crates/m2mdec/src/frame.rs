// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use std::io::{self, Write};

use unix_ts::Timestamp;

use crate::format::CaptureFormat;
use crate::fourcc::FourCC;
use crate::v4l2::{DequeuedBuffer, Rect};

/// A decoded frame borrowed from a dequeued CAPTURE buffer.
///
/// The plane slices point into the device mapping and are only valid until
/// the buffer is queued back, which the session does once the sink returns.
#[derive(Debug)]
pub struct DecodedFrame<'a> {
    buffer: &'a DequeuedBuffer,
    format: &'a CaptureFormat,
    planes: Vec<&'a [u8]>,
}

impl<'a> DecodedFrame<'a> {
    pub fn new(
        buffer: &'a DequeuedBuffer,
        format: &'a CaptureFormat,
        planes: Vec<&'a [u8]>,
    ) -> Self {
        DecodedFrame {
            buffer,
            format,
            planes,
        }
    }

    /// CAPTURE buffer index the frame lives in.
    pub fn index(&self) -> u32 {
        self.buffer.index
    }

    /// Driver sequence number.
    pub fn sequence(&self) -> u32 {
        self.buffer.sequence
    }

    pub fn timestamp(&self) -> Timestamp {
        self.buffer.timestamp
    }

    pub fn width(&self) -> u32 {
        self.format.width()
    }

    pub fn height(&self) -> u32 {
        self.format.height()
    }

    pub fn fourcc(&self) -> FourCC {
        self.format.fourcc()
    }

    pub fn crop(&self) -> Option<Rect> {
        self.format.crop
    }

    pub fn is_keyframe(&self) -> bool {
        self.buffer.is_keyframe()
    }

    /// The driver flagged this frame as possibly corrupted.
    pub fn is_error(&self) -> bool {
        self.buffer.is_error()
    }

    /// Plane payloads, each limited to the bytes the driver wrote.
    pub fn planes(&self) -> &[&'a [u8]] {
        &self.planes
    }

    pub fn plane(&self, index: usize) -> Option<&'a [u8]> {
        self.planes.get(index).copied()
    }

    /// Total payload over all planes.
    pub fn len(&self) -> usize {
        self.planes.iter().map(|p| p.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes all planes back to back.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        for plane in &self.planes {
            writer.write_all(plane)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::v4l2::{PixFormat, PlaneFormat};

    #[test]
    fn test_frame_accessors() {
        let buffer = DequeuedBuffer {
            index: 2,
            bytes_used: vec![4, 2],
            flags: m2mdec_sys::V4L2_BUF_FLAG_KEYFRAME,
            sequence: 17,
            timestamp: Timestamp::new(5, 0),
        };
        let format = CaptureFormat {
            format: PixFormat {
                width: 2,
                height: 2,
                fourcc: FourCC::NV12M,
                planes: vec![PlaneFormat::default(); 2],
            },
            min_buffers: 1,
            crop: None,
        };
        let luma = [1u8, 2, 3, 4];
        let chroma = [5u8, 6];
        let frame = DecodedFrame::new(&buffer, &format, vec![&luma[..], &chroma[..]]);

        assert_eq!(frame.index(), 2);
        assert_eq!(frame.sequence(), 17);
        assert_eq!(frame.timestamp(), Timestamp::new(5, 0));
        assert_eq!(frame.fourcc(), FourCC::NV12M);
        assert!(frame.is_keyframe());
        assert_eq!(frame.len(), 6);
        assert_eq!(frame.plane(1), Some(&chroma[..]));
        assert_eq!(frame.plane(2), None);

        let mut out = Vec::new();
        frame.write_to(&mut out).unwrap();
        assert_eq!(out, vec![1, 2, 3, 4, 5, 6]);
    }
}
