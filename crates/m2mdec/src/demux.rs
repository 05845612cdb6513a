// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Compressed frame sources.
//!
//! The decode loop pulls compressed frames from a [`FrameSource`]. A
//! [`Demuxer`] additionally identifies the codec of its first video stream
//! and provides the header (extradata) that primes the decoder.
//!
//! Two demuxers are provided:
//!
//! - [`Mp4Demuxer`] reads the first video track of an MP4 file and converts
//!   its length-prefixed samples to Annex-B byte streams.
//! - [`AnnexBDemuxer`] reads raw H.264/H.265 elementary streams and splits
//!   them into access units on start codes.
//!
//! ```no_run
//! use m2mdec::demux::{self, Demuxer, FrameSource};
//!
//! let mut input = demux::open("clip.h264")?;
//! println!("codec: {:?}", input.identify_codec());
//! while let Some(frame) = input.next_frame()? {
//!     println!("{} bytes", frame.len());
//! }
//! # Ok::<(), m2mdec::Error>(())
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use log::{debug, info};
use mp4::{MediaType, Mp4Reader, TrackType};

use crate::fourcc::FourCC;
use crate::Error;

const START_CODE: [u8; 4] = [0, 0, 0, 1];

/// Compression codecs the decoder core knows how to request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecKind {
    H264,
    Hevc,
    Mpeg4,
    H263,
    Mpeg2,
    Mpeg1,
    Vp8,
    Vp9,
}

impl CodecKind {
    /// The V4L2 pixel format of the compressed stream.
    pub fn fourcc(self) -> FourCC {
        match self {
            CodecKind::H264 => FourCC::H264,
            CodecKind::Hevc => FourCC::HEVC,
            CodecKind::Mpeg4 => FourCC::MPEG4,
            CodecKind::H263 => FourCC::H263,
            CodecKind::Mpeg2 => FourCC::MPEG2,
            CodecKind::Mpeg1 => FourCC::MPEG1,
            CodecKind::Vp8 => FourCC::VP8,
            CodecKind::Vp9 => FourCC::VP9,
        }
    }

    pub fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        [
            CodecKind::H264,
            CodecKind::Hevc,
            CodecKind::Mpeg4,
            CodecKind::H263,
            CodecKind::Mpeg2,
            CodecKind::Mpeg1,
            CodecKind::Vp8,
            CodecKind::Vp9,
        ]
        .into_iter()
        .find(|c| c.fourcc() == fourcc)
    }

    pub fn name(self) -> &'static str {
        match self {
            CodecKind::H264 => "H.264",
            CodecKind::Hevc => "H.265",
            CodecKind::Mpeg4 => "MPEG-4",
            CodecKind::H263 => "H.263",
            CodecKind::Mpeg2 => "MPEG-2",
            CodecKind::Mpeg1 => "MPEG-1",
            CodecKind::Vp8 => "VP8",
            CodecKind::Vp9 => "VP9",
        }
    }
}

impl From<CodecKind> for FourCC {
    fn from(codec: CodecKind) -> Self {
        codec.fourcc()
    }
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A sequence of compressed frames.
pub trait FrameSource {
    /// The next frame, or `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<Vec<u8>>, Error>;
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn next_frame(&mut self) -> Result<Option<Vec<u8>>, Error> {
        (**self).next_frame()
    }
}

/// Frames already held in memory.
impl FrameSource for VecDeque<Vec<u8>> {
    fn next_frame(&mut self) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.pop_front())
    }
}

/// A container reader that identifies its video codec and header.
pub trait Demuxer: FrameSource + Send {
    /// Codec of the first video stream, `None` if there is none this crate
    /// can decode.
    fn identify_codec(&self) -> Option<CodecKind>;

    /// Header bytes to queue before the first frame; empty when the stream
    /// carries its parameters in-band.
    fn extra_data(&self) -> Vec<u8>;
}

/// Opens `path` with the demuxer matching its extension.
///
/// | Extension | Demuxer |
/// |-----------|---------|
/// | `mp4`, `m4v`, `mov` | [`Mp4Demuxer`] |
/// | `h264`, `264`, `avc` | [`AnnexBDemuxer`] (H.264) |
/// | `h265`, `265`, `hevc` | [`AnnexBDemuxer`] (H.265) |
pub fn open<P: AsRef<Path>>(path: P) -> Result<Box<dyn Demuxer>, Error> {
    let path = path.as_ref();
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "mp4" | "m4v" | "mov" => Ok(Box::new(Mp4Demuxer::open(path)?)),
        "h264" | "264" | "avc" => Ok(Box::new(AnnexBDemuxer::open(path, CodecKind::H264)?)),
        "h265" | "265" | "hevc" => Ok(Box::new(AnnexBDemuxer::open(path, CodecKind::Hevc)?)),
        _ => Err(Error::UnrecognizedCodec(format!(
            "unsupported input '{}'",
            path.display()
        ))),
    }
}

/// First video track of an MP4 file.
pub struct Mp4Demuxer {
    reader: Mp4Reader<BufReader<File>>,
    track_id: u32,
    codec: Option<CodecKind>,
    extra: Vec<u8>,
    length_prefixed: bool,
    next_sample: u32,
    sample_count: u32,
}

impl Mp4Demuxer {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let file = File::open(path.as_ref())?;
        let size = file.metadata()?.len();
        let reader = Mp4Reader::read_header(BufReader::new(file), size)
            .map_err(|e| Error::Demux(e.to_string()))?;

        let mut ids: Vec<u32> = reader.tracks().keys().copied().collect();
        ids.sort_unstable();
        let video = ids.into_iter().find_map(|id| {
            let track = reader.tracks().get(&id)?;
            matches!(track.track_type(), Ok(TrackType::Video)).then_some((id, track))
        });

        let Some((track_id, track)) = video else {
            info!("{}: no video track", path.as_ref().display());
            return Ok(Mp4Demuxer {
                reader,
                track_id: 0,
                codec: None,
                extra: Vec::new(),
                length_prefixed: false,
                next_sample: 1,
                sample_count: 0,
            });
        };

        let codec = match track.media_type() {
            Ok(MediaType::H264) => Some(CodecKind::H264),
            Ok(MediaType::H265) => Some(CodecKind::Hevc),
            Ok(MediaType::VP9) => Some(CodecKind::Vp9),
            _ => None,
        };

        let mut extra = Vec::new();
        if codec == Some(CodecKind::H264) {
            if let (Ok(sps), Ok(pps)) = (
                track.sequence_parameter_set(),
                track.picture_parameter_set(),
            ) {
                for nal in [sps, pps] {
                    extra.extend_from_slice(&START_CODE);
                    extra.extend_from_slice(nal);
                }
            }
        }
        let sample_count = track.sample_count();
        info!(
            "{}: track {} {:?} {}x{} with {} samples",
            path.as_ref().display(),
            track_id,
            codec,
            track.width(),
            track.height(),
            sample_count
        );

        Ok(Mp4Demuxer {
            reader,
            track_id,
            codec,
            extra,
            length_prefixed: matches!(codec, Some(CodecKind::H264 | CodecKind::Hevc)),
            next_sample: 1,
            sample_count,
        })
    }
}

impl FrameSource for Mp4Demuxer {
    fn next_frame(&mut self) -> Result<Option<Vec<u8>>, Error> {
        if self.codec.is_none() {
            return Ok(None);
        }
        while self.next_sample <= self.sample_count {
            let sample_id = self.next_sample;
            self.next_sample += 1;
            let sample = self
                .reader
                .read_sample(self.track_id, sample_id)
                .map_err(|e| Error::Demux(e.to_string()))?;
            let Some(sample) = sample else {
                continue;
            };
            if self.length_prefixed {
                return avcc_to_annexb(&sample.bytes).map(Some);
            }
            return Ok(Some(sample.bytes.to_vec()));
        }
        Ok(None)
    }
}

impl Demuxer for Mp4Demuxer {
    fn identify_codec(&self) -> Option<CodecKind> {
        self.codec
    }

    fn extra_data(&self) -> Vec<u8> {
        self.extra.clone()
    }
}

/// Converts 4-byte length-prefixed NAL units to start-code delimited ones.
pub fn avcc_to_annexb(data: &[u8]) -> Result<Vec<u8>, Error> {
    let mut out = Vec::with_capacity(data.len() + 16);
    let mut rest = data;
    while !rest.is_empty() {
        if rest.len() < 4 {
            return Err(Error::Demux(format!(
                "{} trailing bytes in sample",
                rest.len()
            )));
        }
        let len = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
        let nal = rest
            .get(4..4 + len)
            .ok_or_else(|| Error::Demux(format!("NAL unit of {} bytes overruns sample", len)))?;
        out.extend_from_slice(&START_CODE);
        out.extend_from_slice(nal);
        rest = &rest[4 + len..];
    }
    Ok(out)
}

/// Splits an Annex-B byte stream into NAL units, without start codes.
pub fn parse_nal_units(data: &[u8]) -> Vec<&[u8]> {
    let mut units = Vec::new();
    let mut start: Option<usize> = None;
    let mut i = 0;

    while i + 2 < data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            if let Some(s) = start {
                // A 4-byte start code leaves a zero at the end of the unit
                let mut end = i;
                if end > s && data[end - 1] == 0 {
                    end -= 1;
                }
                if end > s {
                    units.push(&data[s..end]);
                }
            }
            i += 3;
            start = Some(i);
        } else {
            i += 1;
        }
    }
    if let Some(s) = start {
        if s < data.len() {
            units.push(&data[s..]);
        }
    }
    units
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NalKind {
    ParameterSet,
    /// Slice data; `true` when it starts a new picture
    Slice(bool),
    Other,
}

fn classify(codec: CodecKind, nal: &[u8]) -> NalKind {
    match codec {
        CodecKind::Hevc => {
            let nal_type = (nal[0] >> 1) & 0x3f;
            match nal_type {
                0..=31 => NalKind::Slice(nal.get(2).map_or(true, |b| b & 0x80 != 0)),
                32..=34 => NalKind::ParameterSet,
                _ => NalKind::Other,
            }
        }
        _ => {
            let nal_type = nal[0] & 0x1f;
            match nal_type {
                // first_mb_in_slice == 0 encodes as a single set bit
                1..=5 => NalKind::Slice(nal.get(1).map_or(true, |b| b & 0x80 != 0)),
                7 | 8 => NalKind::ParameterSet,
                _ => NalKind::Other,
            }
        }
    }
}

/// Raw H.264 or H.265 elementary stream.
///
/// The parameter sets at the start of the stream form the header; each
/// frame is one access unit: the non-slice units preceding a picture plus
/// all of its slices.
pub struct AnnexBDemuxer {
    codec: CodecKind,
    data: Vec<u8>,
    // (start, end) of each NAL unit in `data`, start codes excluded
    units: Vec<(usize, usize)>,
    header_units: usize,
    next_unit: usize,
}

impl AnnexBDemuxer {
    pub fn open<P: AsRef<Path>>(path: P, codec: CodecKind) -> Result<Self, Error> {
        let data = std::fs::read(path.as_ref())?;
        let demuxer = Self::from_bytes(data, codec)?;
        info!(
            "{}: {} elementary stream, {} NAL units",
            path.as_ref().display(),
            codec,
            demuxer.units.len()
        );
        Ok(demuxer)
    }

    /// Parses an in-memory stream.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnrecognizedCodec`] when `codec` is not H.264 or
    /// H.265, or when the data holds no start-code delimited NAL units.
    pub fn from_bytes(data: Vec<u8>, codec: CodecKind) -> Result<Self, Error> {
        if !matches!(codec, CodecKind::H264 | CodecKind::Hevc) {
            return Err(Error::UnrecognizedCodec(format!(
                "{} has no Annex-B framing",
                codec
            )));
        }
        let base = data.as_ptr() as usize;
        let units: Vec<(usize, usize)> = parse_nal_units(&data)
            .into_iter()
            .map(|nal| {
                let start = nal.as_ptr() as usize - base;
                (start, start + nal.len())
            })
            .collect();
        if units.is_empty() {
            return Err(Error::UnrecognizedCodec(
                "no start codes found in elementary stream".to_string(),
            ));
        }

        let header_units = units
            .iter()
            .take_while(|&&(s, e)| classify(codec, &data[s..e]) == NalKind::ParameterSet)
            .count();
        debug!("{} parameter set units in header", header_units);

        Ok(AnnexBDemuxer {
            codec,
            data,
            units,
            header_units,
            next_unit: header_units,
        })
    }

    fn unit(&self, index: usize) -> &[u8] {
        let (start, end) = self.units[index];
        &self.data[start..end]
    }
}

impl FrameSource for AnnexBDemuxer {
    fn next_frame(&mut self) -> Result<Option<Vec<u8>>, Error> {
        let mut frame = Vec::new();
        let mut has_slice = false;

        while self.next_unit < self.units.len() {
            let nal = self.unit(self.next_unit);
            let kind = classify(self.codec, nal);
            let starts_picture = match kind {
                NalKind::Slice(first) => first,
                NalKind::ParameterSet | NalKind::Other => true,
            };
            if has_slice && starts_picture {
                break;
            }
            frame.extend_from_slice(&START_CODE);
            frame.extend_from_slice(nal);
            has_slice |= matches!(kind, NalKind::Slice(_));
            self.next_unit += 1;
        }

        Ok((!frame.is_empty()).then_some(frame))
    }
}

impl Demuxer for AnnexBDemuxer {
    fn identify_codec(&self) -> Option<CodecKind> {
        Some(self.codec)
    }

    fn extra_data(&self) -> Vec<u8> {
        let mut extra = Vec::new();
        for index in 0..self.header_units {
            extra.extend_from_slice(&START_CODE);
            extra.extend_from_slice(self.unit(index));
        }
        extra
    }
}
