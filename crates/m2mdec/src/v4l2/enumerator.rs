// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! V4L2 Device Enumerator
//!
//! This module provides the [`DeviceEnumerator`] type for discovering V4L2
//! video nodes through sysfs and matching them by driver name.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::Error;

/// Default sysfs class directory listing V4L2 nodes.
pub const SYSFS_ROOT: &str = "/sys/class/video4linux";

/// Default directory holding the device nodes.
pub const DEV_DIR: &str = "/dev";

/// A video node found in sysfs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Node number, `6` for `video6`
    pub index: u32,
    /// Driver-reported name from the sysfs `name` attribute
    pub name: String,
    /// Device node path, e.g. `/dev/video6`
    pub path: PathBuf,
}

impl DeviceInfo {
    pub fn path_str(&self) -> String {
        self.path.display().to_string()
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.name)
    }
}

/// V4L2 Device Enumerator
///
/// Walks `/sys/class/video4linux/video*`, reads each entry's `name`
/// attribute and resolves the entry to its `/dev/videoN` node. Both
/// directories can be redirected, which is how the tests run without real
/// hardware.
///
/// # Example
///
/// ```no_run
/// use m2mdec::v4l2::DeviceEnumerator;
///
/// let enumerator = DeviceEnumerator::new();
/// for device in enumerator.enumerate()? {
///     println!("{}", device);
/// }
///
/// let decoder = enumerator.locate("s5p-mfc-dec")?;
/// println!("decoder at {}", decoder.path_str());
/// # Ok::<(), m2mdec::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct DeviceEnumerator {
    sysfs_root: PathBuf,
    dev_dir: PathBuf,
}

impl Default for DeviceEnumerator {
    fn default() -> Self {
        DeviceEnumerator {
            sysfs_root: PathBuf::from(SYSFS_ROOT),
            dev_dir: PathBuf::from(DEV_DIR),
        }
    }
}

impl DeviceEnumerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads entries from `root` instead of `/sys/class/video4linux`.
    pub fn with_sysfs_root<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.sysfs_root = root.into();
        self
    }

    /// Resolves nodes under `dir` instead of `/dev`.
    pub fn with_dev_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.dev_dir = dir.into();
        self
    }

    /// Lists every `video*` entry, sorted by node number.
    ///
    /// A missing sysfs directory means no V4L2 devices and yields an empty
    /// list. Entries without a readable `name` attribute are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the sysfs directory exists but cannot be read.
    pub fn enumerate(&self) -> Result<Vec<DeviceInfo>, Error> {
        let entries = match fs::read_dir(&self.sysfs_root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!("{} does not exist", self.sysfs_root.display());
                return Ok(Vec::new());
            }
            Err(err) => return Err(err.into()),
        };

        let mut devices = Vec::new();
        for entry in entries {
            let entry = entry?;
            let entry_name = entry.file_name().to_string_lossy().into_owned();
            if !entry_name.starts_with("video") {
                continue;
            }

            let name = match fs::read_to_string(entry.path().join("name")) {
                Ok(name) => name.trim_end().to_string(),
                Err(err) => {
                    debug!("skipping {}: {}", entry_name, err);
                    continue;
                }
            };

            let node = node_name(&entry.path()).unwrap_or(entry_name);
            let Some(index) = node_number(&node) else {
                debug!("skipping {}: not a numbered video node", node);
                continue;
            };

            devices.push(DeviceInfo {
                index,
                name,
                path: self.dev_dir.join(&node),
            });
        }

        devices.sort_by_key(|d| d.index);
        Ok(devices)
    }

    /// Finds the first node whose driver name contains `driver`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`] when nothing matches.
    pub fn locate(&self, driver: &str) -> Result<DeviceInfo, Error> {
        let device = self
            .enumerate()?
            .into_iter()
            .find(|d| d.name.contains(driver))
            .ok_or_else(|| Error::DeviceNotFound(driver.to_string()))?;
        info!("found '{}' at {}", device.name, device.path.display());
        Ok(device)
    }
}

/// Locates the node whose driver name contains `driver` using the default
/// sysfs and `/dev` locations.
pub fn locate_device(driver: &str) -> Result<PathBuf, Error> {
    DeviceEnumerator::new().locate(driver).map(|d| d.path)
}

// Sysfs class entries are symlinks into the device tree whose basename is
// the device node name.
fn node_name(entry: &Path) -> Option<String> {
    let target = fs::read_link(entry).ok()?;
    target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
}

fn node_number(node: &str) -> Option<u32> {
    node.strip_prefix("video")?.parse().ok()
}
