// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies
#![forbid(unsafe_code)]

use core::fmt;
use m2mdec_sys as sys;

/// Four character code identifying a V4L2 pixel or codec format.
///
/// V4L2 packs the first character into the least significant byte
/// regardless of host endianness, so conversion to and from `u32` is always
/// little-endian.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    pub const H264: FourCC = FourCC(*b"H264");
    pub const HEVC: FourCC = FourCC(*b"HEVC");
    pub const MPEG4: FourCC = FourCC(*b"MPG4");
    pub const H263: FourCC = FourCC(*b"H263");
    pub const MPEG2: FourCC = FourCC(*b"MPG2");
    pub const MPEG1: FourCC = FourCC(*b"MPG1");
    pub const VP8: FourCC = FourCC(*b"VP80");
    pub const VP9: FourCC = FourCC(*b"VP90");
    pub const NV12: FourCC = FourCC(*b"NV12");
    pub const NV12M: FourCC = FourCC(*b"NM12");
    pub const NV12MT: FourCC = FourCC(*b"TM12");

    pub const fn as_u32(self) -> u32 {
        sys::v4l2_fourcc(self.0[0], self.0[1], self.0[2], self.0[3])
    }

    /// True for formats that carry a compressed bitstream.
    pub fn is_compressed(self) -> bool {
        matches!(
            self,
            FourCC::H264
                | FourCC::HEVC
                | FourCC::MPEG4
                | FourCC::H263
                | FourCC::MPEG2
                | FourCC::MPEG1
                | FourCC::VP8
                | FourCC::VP9
        )
    }
}

impl From<&[u8; 4]> for FourCC {
    fn from(buf: &[u8; 4]) -> FourCC {
        FourCC(*buf)
    }
}

impl From<u32> for FourCC {
    fn from(val: u32) -> FourCC {
        FourCC(val.to_le_bytes())
    }
}

impl From<FourCC> for u32 {
    fn from(val: FourCC) -> Self {
        val.as_u32()
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            if b.is_ascii_graphic() || b == b' ' {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "{}", core::ascii::escape_default(b))?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCC({})", self)
    }
}
