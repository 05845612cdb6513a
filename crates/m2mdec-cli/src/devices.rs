// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! V4L2 device listing for `--list-devices`.

use crate::error::CliError;
use m2mdec::v4l2::DeviceEnumerator;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Serialize)]
struct DevicesOutput {
    devices: Vec<DeviceEntry>,
    summary: Summary,
}

#[derive(Debug, Serialize)]
struct DeviceEntry {
    index: u32,
    path: String,
    driver: String,
    /// Driver name contains the requested `--driver`
    decoder: bool,
}

#[derive(Debug, Serialize)]
struct Summary {
    total_devices: usize,
    decoders: usize,
    driver: String,
}

pub fn execute(
    driver: &str,
    sysfs_root: Option<PathBuf>,
    dev_dir: Option<PathBuf>,
    json: bool,
) -> Result<(), CliError> {
    log::debug!("Listing V4L2 devices (driver filter: {})", driver);

    let mut enumerator = DeviceEnumerator::new();
    if let Some(root) = sysfs_root {
        enumerator = enumerator.with_sysfs_root(root);
    }
    if let Some(dir) = dev_dir {
        enumerator = enumerator.with_dev_dir(dir);
    }

    let devices = enumerator
        .enumerate()
        .map_err(|e| CliError::General(format!("Failed to enumerate V4L2 devices: {}", e)))?;

    let entries: Vec<DeviceEntry> = devices
        .iter()
        .map(|device| DeviceEntry {
            index: device.index,
            path: device.path_str(),
            driver: device.name.clone(),
            decoder: device.name.contains(driver),
        })
        .collect();

    let output = DevicesOutput {
        summary: Summary {
            total_devices: entries.len(),
            decoders: entries.iter().filter(|e| e.decoder).count(),
            driver: driver.to_string(),
        },
        devices: entries,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_text(&output);
    }

    Ok(())
}

fn print_text(output: &DevicesOutput) {
    if output.devices.is_empty() {
        println!("No V4L2 devices found");
        return;
    }

    println!("V4L2 Devices:");
    for entry in &output.devices {
        let marker = if entry.decoder { "*" } else { " " };
        println!("{} {:<16} {}", marker, entry.path, entry.driver);
    }

    println!(
        "\n{} device(s), {} matching '{}'",
        output.summary.total_devices, output.summary.decoders, output.summary.driver
    );
}
