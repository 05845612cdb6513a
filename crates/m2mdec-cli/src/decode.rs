// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::error::CliError;
use crate::metrics::{self, MetricsCollector};
use crate::utils;
use m2mdec::demux;
use m2mdec::{DecodeSession, ExecutionModel, SessionConfig};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::time::Duration;

/// Options for one decode run, collected from the command line
#[derive(Debug)]
pub struct Options {
    pub input: PathBuf,
    pub driver: String,
    pub output_buffers: u32,
    pub frame_size: u32,
    pub extra_capture_buffers: u32,
    pub timeout: Duration,
    pub drain_timeout: Duration,
    pub header_timeout: Duration,
    pub threaded: bool,
    pub controls: Vec<(u32, i32)>,
    pub frames: Option<u64>,
    pub dump: Option<PathBuf>,
    pub setup_only: bool,
    pub sysfs_root: Option<PathBuf>,
    pub dev_dir: Option<PathBuf>,
}

impl Options {
    fn session_config(&self) -> SessionConfig {
        let model = if self.threaded {
            ExecutionModel::Threaded
        } else {
            ExecutionModel::Polling
        };

        let mut config = SessionConfig::new(self.driver.as_str())
            .with_output_buffers(self.output_buffers)
            .with_max_frame_size(self.frame_size)
            .with_extra_capture_buffers(self.extra_capture_buffers)
            .with_poll_timeout(self.timeout)
            .with_drain_timeout(self.drain_timeout)
            .with_header_timeout(self.header_timeout)
            .with_model(model);
        for &(id, value) in &self.controls {
            config = config.with_control(id, value);
        }
        if let Some(root) = &self.sysfs_root {
            config = config.with_sysfs_root(root.clone());
        }
        if let Some(dir) = &self.dev_dir {
            config = config.with_dev_dir(dir.clone());
        }
        config
    }
}

pub fn execute(opts: Options, json: bool) -> Result<(), CliError> {
    log::debug!("Executing decode: {:?}", opts);

    let mut input = demux::open(&opts.input)?;
    let codec = input.identify_codec().ok_or_else(|| {
        CliError::Unsupported(format!(
            "no decodable video stream in {}",
            opts.input.display()
        ))
    })?;
    let header = input.extra_data();
    log::info!(
        "Input {}: {} ({} header bytes)",
        opts.input.display(),
        codec,
        header.len()
    );

    let mut session = DecodeSession::open(opts.session_config())?;
    if let Some(path) = session.path() {
        log::info!("Using decoder {}", path.display());
    }
    utils::install_signal_handler(session.stop_handle())?;

    let capture = session.start(codec, &header)?;
    log::info!(
        "Decoding to {}x{} {} ({} planes, {} buffers)",
        capture.width(),
        capture.height(),
        capture.fourcc(),
        capture.num_planes(),
        session.capture_pool().len()
    );

    if opts.setup_only {
        log::info!("Setup complete");
        session.close()?;
        return Ok(());
    }

    let mut dump = match &opts.dump {
        Some(path) => Some(create_dump(path)?),
        None => None,
    };

    let stop = session.stop_handle();
    let limit = opts.frames;
    let mut collector = MetricsCollector::new();
    let mut decoded = 0u64;

    let summary = session.run(&mut input, |frame| {
        collector.record_frame(frame.len() as u64);
        let skipped = collector.track_sequence(frame.sequence());
        if skipped > 0 {
            log::warn!("Skipped {} frame(s) before sequence {}", skipped, frame.sequence());
        }
        if frame.is_error() {
            log::warn!("Frame {} flagged as corrupted", frame.sequence());
        }
        if let Some(writer) = dump.as_mut() {
            frame.write_to(writer)?;
        }

        decoded += 1;
        if limit.is_some_and(|max| decoded >= max) {
            log::debug!("Reached frame limit of {}", decoded);
            stop.store(true, Ordering::Release);
        }
        Ok(())
    })?;

    if let Some(mut writer) = dump {
        writer.flush()?;
    }
    session.close()?;

    let input_name = opts.input.display().to_string();
    let metrics = collector.finalize(&input_name, codec.name(), &summary);
    if json {
        metrics::print_json(&metrics)?;
    } else {
        metrics::print_text(&metrics);
    }

    Ok(())
}

fn create_dump(path: &Path) -> Result<BufWriter<File>, CliError> {
    let file = File::create(path).map_err(|e| {
        CliError::InvalidArgs(format!("Cannot create {}: {}", path.display(), e))
    })?;
    log::info!("Writing decoded frames to {}", path.display());
    Ok(BufWriter::new(file))
}
