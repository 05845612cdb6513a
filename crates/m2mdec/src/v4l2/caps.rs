// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Device capability bits reported by `VIDIOC_QUERYCAP`.

use std::fmt;

use m2mdec_sys as sys;

use crate::Error;

/// Capabilities reported by a V4L2 device.
///
/// Drivers that set `V4L2_CAP_DEVICE_CAPS` report the capabilities of the
/// opened node in `device_caps` and those of the whole physical device in
/// `capabilities`; [`effective`](Self::effective) picks the node's.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub driver: String,
    pub card: String,
    pub bus_info: String,
    pub version: u32,
    pub capabilities: u32,
    pub device_caps: u32,
}

impl Capabilities {
    pub(crate) fn from_raw(raw: &sys::v4l2_capability) -> Self {
        Capabilities {
            driver: sys::cstr_field(&raw.driver),
            card: sys::cstr_field(&raw.card),
            bus_info: sys::cstr_field(&raw.bus_info),
            version: raw.version,
            capabilities: raw.capabilities,
            device_caps: raw.device_caps,
        }
    }

    /// Capability bits that apply to the opened node.
    pub fn effective(&self) -> u32 {
        if self.capabilities & sys::V4L2_CAP_DEVICE_CAPS != 0 {
            self.device_caps
        } else {
            self.capabilities
        }
    }

    /// True when the node can run as a multi-planar M2M decoder: separate
    /// OUTPUT and CAPTURE multi-planar queues with streaming I/O, or the
    /// combined M2M multi-planar bit.
    pub fn is_mplane_m2m(&self) -> bool {
        let caps = self.effective();
        let split = caps & sys::V4L2_CAP_VIDEO_OUTPUT_MPLANE != 0
            && caps & sys::V4L2_CAP_VIDEO_CAPTURE_MPLANE != 0
            && caps & sys::V4L2_CAP_STREAMING != 0;
        split || caps & sys::V4L2_CAP_VIDEO_M2M_MPLANE != 0
    }

    /// Rejects devices that cannot decode, see [`is_mplane_m2m`](Self::is_mplane_m2m).
    pub fn verify(&self) -> Result<(), Error> {
        if self.is_mplane_m2m() {
            Ok(())
        } else {
            Err(Error::CapabilityMismatch {
                card: self.card.clone(),
                capabilities: self.effective(),
            })
        }
    }

    /// Human-readable names of the queue bits that are set.
    pub fn names(&self) -> Vec<&'static str> {
        const NAMES: [(u32, &str); 8] = [
            (sys::V4L2_CAP_VIDEO_CAPTURE, "capture"),
            (sys::V4L2_CAP_VIDEO_OUTPUT, "output"),
            (sys::V4L2_CAP_VIDEO_CAPTURE_MPLANE, "capture-mplane"),
            (sys::V4L2_CAP_VIDEO_OUTPUT_MPLANE, "output-mplane"),
            (sys::V4L2_CAP_VIDEO_M2M_MPLANE, "m2m-mplane"),
            (sys::V4L2_CAP_VIDEO_M2M, "m2m"),
            (sys::V4L2_CAP_STREAMING, "streaming"),
            (sys::V4L2_CAP_DEVICE_CAPS, "device-caps"),
        ];
        let caps = self.effective();
        NAMES
            .iter()
            .filter(|(bit, _)| caps & bit != 0)
            .map(|(_, name)| *name)
            .collect()
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) [{}]",
            self.card,
            self.driver,
            self.names().join(", ")
        )
    }
}
