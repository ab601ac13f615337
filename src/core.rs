use std::{
    ops::Range,
    path::{Path, PathBuf},
};

use anyhow::Context;
use bytes::Bytes;
use tracing::{info, warn};

use crate::config::SinkConfig;
use crate::constants::{MPEG2_GOP, MPEG2_PICTURE, MPEG2_SEQUENCE_HEADER, NS_PER_SECOND};
use crate::device::FdDevice;
use crate::parsers::aac::{parse_adts_header, sample_rate};
use crate::parsers::utils::start_codes;
use crate::report::Reporter;
use crate::setup::StreamSetup;
use crate::sink::{RenderOutcome, Sink};
use crate::types::{AccessUnit, Framerate, StreamType};

/// AAC frames carry 1024 samples
const AAC_FRAME_SAMPLES: u64 = 1024;

pub struct Options {
    pub input: PathBuf,
    pub output: PathBuf,
    pub stream_type: StreamType,
    pub framerate: Option<Framerate>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u8>,
    pub bit_depth: Option<u16>,
    pub dimensions: Option<(u16, u16)>,
    pub codec_data: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub chunk_size: usize,
    pub json: bool,
}

/// How the input file is cut into access units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    Adts,
    AnnexB,
    MpegVideo,
    Chunks(usize),
}

impl Framing {
    pub fn for_stream(stream_type: StreamType, chunk_size: usize) -> Self {
        match stream_type {
            StreamType::AacAdts | StreamType::AacRaw => Framing::Adts,
            StreamType::H264 => Framing::AnnexB,
            StreamType::Mpeg1Video | StreamType::Mpeg2Video => Framing::MpegVideo,
            _ => Framing::Chunks(chunk_size.max(1)),
        }
    }

    pub fn split(self, data: &[u8]) -> Vec<Range<usize>> {
        match self {
            Framing::Adts => split_adts(data),
            Framing::AnnexB => split_annex_b(data),
            Framing::MpegVideo => split_mpeg_video(data),
            Framing::Chunks(size) => (0..data.len())
                .step_by(size)
                .map(|start| start..(start + size).min(data.len()))
                .collect(),
        }
    }
}

/// Whole ADTS frames, header included; garbage between frames is skipped.
pub fn split_adts(data: &[u8]) -> Vec<Range<usize>> {
    let mut frames = Vec::new();
    let mut pos = 0;
    let mut skipped = 0usize;
    while pos < data.len() {
        match parse_adts_header(&data[pos..]) {
            Some(f) if f.frame_length > f.header_length && pos + f.frame_length <= data.len() => {
                frames.push(pos..pos + f.frame_length);
                pos += f.frame_length;
            }
            _ => {
                skipped += 1;
                pos += 1;
            }
        }
    }
    if skipped > 0 {
        warn!(skipped, "bytes outside ADTS frames");
    }
    frames
}

/// Groups Annex-B NAL units into access units.
///
/// A unit ends before an access unit delimiter, before SPS/PPS/SEI that
/// follow a slice, or before a slice with `first_mb_in_slice == 0` that
/// follows a slice.
pub fn split_annex_b(data: &[u8]) -> Vec<Range<usize>> {
    let mut units = Vec::new();
    let mut start: Option<usize> = None;
    let mut seen_slice = false;
    for sc in start_codes(data) {
        let offset = if sc.offset > 0 && data[sc.offset - 1] == 0 { sc.offset - 1 } else { sc.offset };
        let nal_type = sc.code & 0x1F;
        let slice = matches!(nal_type, 1 | 5);
        let first_slice = slice && data.get(sc.body()).is_some_and(|b| b & 0x80 != 0);
        let boundary = match nal_type {
            9 => true,
            6..=8 => seen_slice,
            _ => first_slice && seen_slice,
        };
        if boundary {
            if let Some(s) = start.filter(|&s| s < offset) {
                units.push(s..offset);
            }
            start = Some(offset);
            seen_slice = false;
        }
        start.get_or_insert(offset);
        seen_slice |= slice;
    }
    if let Some(s) = start {
        units.push(s..data.len());
    }
    units
}

/// One picture per unit, with any sequence and GOP headers before it.
pub fn split_mpeg_video(data: &[u8]) -> Vec<Range<usize>> {
    let mut units = Vec::new();
    let mut start = 0;
    let mut has_picture = false;
    for sc in start_codes(data) {
        if !matches!(sc.code, MPEG2_SEQUENCE_HEADER | MPEG2_GOP | MPEG2_PICTURE) {
            continue;
        }
        if has_picture {
            units.push(start..sc.offset);
            start = sc.offset;
            has_picture = false;
        }
        has_picture |= sc.code == MPEG2_PICTURE;
    }
    if start < data.len() {
        units.push(start..data.len());
    }
    units
}

fn load_config(path: Option<&Path>) -> anyhow::Result<SinkConfig> {
    let Some(path) = path else {
        return Ok(SinkConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
}

/// Builds the stream setup and access units for `data`.
pub fn prepare(opts: &Options, data: &Bytes) -> anyhow::Result<(StreamSetup, Vec<AccessUnit>)> {
    let mut setup = StreamSetup::new(opts.stream_type);
    setup.sample_rate = opts.sample_rate;
    setup.channels = opts.channels;
    setup.bit_depth = opts.bit_depth;
    setup.framerate = opts.framerate;
    if let Some((w, h)) = opts.dimensions {
        setup = setup.dimensions(w, h);
    }
    if let Some(path) = &opts.codec_data {
        let codec_data = std::fs::read(path).with_context(|| format!("reading codec data {}", path.display()))?;
        setup = setup.codec_data(codec_data);
    }

    let framing = Framing::for_stream(opts.stream_type, opts.chunk_size);
    let ranges = framing.split(data);
    info!(?framing, units = ranges.len(), "input split");

    if framing == Framing::Adts {
        if let Some(first) = ranges.first().and_then(|r| parse_adts_header(&data[r.clone()])) {
            setup.sample_rate = setup.sample_rate.or_else(|| sample_rate(first.rate_index));
            setup.channels = setup.channels.or(Some(first.channel_config));
            setup.mpeg_version = Some(if first.mpeg2 { 2 } else { 4 });
        }
    }

    let frame_ns = match framing {
        Framing::Adts => setup.sample_rate.map(|rate| AAC_FRAME_SAMPLES * NS_PER_SECOND / rate as u64),
        _ => opts.framerate.and_then(Framerate::frame_duration_ns),
    };
    let strip_adts = opts.stream_type == StreamType::AacRaw;
    let units = ranges
        .into_iter()
        .enumerate()
        .map(|(i, range)| {
            let mut unit = data.slice(range);
            if strip_adts {
                let header = parse_adts_header(&unit).map_or(0, |f| f.header_length);
                unit = unit.slice(header..);
            }
            AccessUnit::from_slice(&unit, frame_ns.map(|d| i as u64 * d)).with_duration(frame_ns)
        })
        .collect();
    Ok((setup, units))
}

pub async fn run(opts: Options) -> anyhow::Result<()> {
    let config = load_config(opts.config.as_deref())?;
    let data = Bytes::from(
        tokio::fs::read(&opts.input)
            .await
            .with_context(|| format!("reading {}", opts.input.display()))?,
    );
    let (setup, units) = prepare(&opts, &data)?;

    let device = FdDevice::open(&opts.output)?;
    let mut sink = Sink::new(device, config);
    sink.setup(&setup)?;
    let control = sink.control();

    let feed = tokio::task::spawn_blocking(move || -> anyhow::Result<(Sink<FdDevice>, bool)> {
        for au in units {
            if sink.render(au)? == RenderOutcome::Flushing {
                break;
            }
        }
        let drained = sink.end_of_stream()?;
        Ok((sink, drained))
    });
    tokio::pin!(feed);

    let (mut sink, drained) = tokio::select! {
        res = &mut feed => res??,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, flushing");
            control.flush_start();
            control.unlock();
            feed.await??
        }
    };

    let report = Reporter::create_report(sink.stream_type(), sink.stats(), drained, sink.take_events());
    if opts.json {
        println!("{}", Reporter::generate_json_report(&report));
    } else {
        Reporter::print_report(&report);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::aac::AdtsTemplate;

    fn adts_frame(payload: &[u8]) -> Vec<u8> {
        let t = AdtsTemplate { profile: 1, rate_index: 3, channel_config: 2, mpeg2: false };
        let mut out = t.header(payload.len()).unwrap().to_vec();
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn adts_frames_and_resync() {
        let mut data = adts_frame(&[1, 2, 3]);
        data.extend([0x00, 0x13]);
        data.extend(adts_frame(&[4]));
        assert_eq!(split_adts(&data), vec![0..10, 12..20]);
    }

    #[test]
    fn annex_b_access_units() {
        let data = [
            0, 0, 0, 1, 0x09, 0xF0, // AUD
            0, 0, 0, 1, 0x67, 0x42, // SPS
            0, 0, 1, 0x65, 0x88, 0x11, // IDR, first_mb 0
            0, 0, 1, 0x65, 0x40, 0x22, // IDR continuation slice
            0, 0, 1, 0x41, 0x9A, 0x33, // P, first_mb 0
        ];
        assert_eq!(split_annex_b(&data), vec![0..24, 24..30]);
    }

    #[test]
    fn mpeg_video_pictures_keep_their_headers() {
        let data = [
            0, 0, 1, 0xB3, 0x11, // sequence header
            0, 0, 1, 0xB8, 0x22, // GOP
            0, 0, 1, 0x00, 0x33, // I picture
            0, 0, 1, 0x01, 0x44, // slice
            0, 0, 1, 0x00, 0x55, // P picture
        ];
        assert_eq!(split_mpeg_video(&data), vec![0..20, 20..25]);
    }

    #[test]
    fn raw_aac_input_drops_adts_headers() {
        let mut data = adts_frame(&[1, 2, 3]);
        data.extend(adts_frame(&[4, 5]));
        let opts = Options {
            input: PathBuf::new(),
            output: PathBuf::new(),
            stream_type: StreamType::AacRaw,
            framerate: None,
            sample_rate: None,
            channels: None,
            bit_depth: None,
            dimensions: None,
            codec_data: None,
            config: None,
            chunk_size: 4096,
            json: false,
        };
        let (setup, units) = prepare(&opts, &Bytes::from(data)).unwrap();
        assert_eq!(setup.sample_rate, Some(48_000));
        assert_eq!(setup.channels, Some(2));
        assert_eq!(&units[1].data[..], &[4, 5]);
        assert_eq!(units[1].pts, Some(21_333_333));
    }

    #[test]
    fn fixed_chunks() {
        assert_eq!(Framing::Chunks(4).split(&[0u8; 10]), vec![0..4, 4..8, 8..10]);
    }
}
