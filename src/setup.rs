//! Per-stream setup: turns a declared stream into the immutable codec
//! configuration its packetizer runs with.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, info};

use crate::config::SinkConfig;
use crate::constants::{
    PCM_BLOCK_MS, PCM_FORMAT_TAG, PES_HEADER_CAPACITY, PES_START_CODE,
    VC1_SEQUENCE_HEADER, WMA_FORMAT_TAG_BASE,
};
use crate::error::{Result, SinkError};
use crate::parsers::aac::{AdtsTemplate, parse_audio_specific_config};
use crate::parsers::h264::parse_avcc;
use crate::parsers::utils::begins_with_start_code;
use crate::types::{Framerate, StreamType};

/// Room kept free in a PES header for timestamps and per-frame tags.
const HEADER_SLACK: usize = 64;

/// Stream description delivered when the upstream declares a stream type
#[derive(Debug, Clone)]
pub struct StreamSetup {
    pub stream_type: StreamType,
    pub codec_data: Option<Bytes>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u8>,
    pub bit_depth: Option<u16>,
    pub bitrate: Option<u32>,
    pub block_align: Option<u32>,
    pub wma_version: Option<u8>,
    /// 2 or 4 for AAC
    pub mpeg_version: Option<u8>,
    /// AC-3/DTS carried as DVD private stream 1 (two-byte substream prefix)
    pub dvd_private: bool,
    pub width: Option<u16>,
    pub height: Option<u16>,
    pub framerate: Option<Framerate>,
}

impl StreamSetup {
    pub fn new(stream_type: StreamType) -> Self {
        Self {
            stream_type,
            codec_data: None,
            sample_rate: None,
            channels: None,
            bit_depth: None,
            bitrate: None,
            block_align: None,
            wma_version: None,
            mpeg_version: None,
            dvd_private: false,
            width: None,
            height: None,
            framerate: None,
        }
    }

    pub fn codec_data(mut self, data: impl Into<Bytes>) -> Self {
        self.codec_data = Some(data.into());
        self
    }

    pub fn audio(mut self, rate: u32, channels: u8) -> Self {
        self.sample_rate = Some(rate);
        self.channels = Some(channels);
        self
    }

    pub fn dimensions(mut self, width: u16, height: u16) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn framerate(mut self, framerate: Framerate) -> Self {
        self.framerate = Some(framerate);
        self
    }

    fn require<T: Copy>(&self, value: Option<T>, what: &str) -> Result<T> {
        value.ok_or_else(|| {
            SinkError::Unsupported(format!("{} needs {what}", self.stream_type.name()))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashCodec {
    Vp6,
    Vp8,
    Spark,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockFormat {
    Wma,
    Pcm,
}

/// Fixed-size audio blocks behind a "BCMA" header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockAudioConfig {
    pub format: BlockFormat,
    pub block_align: usize,
    /// "BCMA", block size, WAVEFORMATEX and codec extra data
    pub header: Bytes,
    /// Fixed block duration (PCM)
    pub block_ns: Option<u64>,
}

/// Codec-specific packetizer configuration, one shape per codec family
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecConfig {
    /// Forward units as-is after dropping `skip` leading bytes
    Passthrough { skip: usize },
    Lpcm,
    Adts(AdtsTemplate),
    BlockAudio(BlockAudioConfig),
    Mpeg12 { header: Option<Bytes> },
    H264 { nal_length_size: Option<u8>, header: Option<Bytes> },
    Vc1Advanced { header: Option<Bytes> },
    Vc1SimpleMain { header: Bytes },
    Mpeg4 { header: Option<Bytes>, repack: bool },
    DivX311 { header: Bytes },
    Flash { kind: FlashCodec },
    Generic { header: Option<Bytes> },
}

impl CodecConfig {
    /// One-time header sent ahead of the first frame
    pub fn codec_header(&self) -> Option<&Bytes> {
        match self {
            CodecConfig::Mpeg12 { header }
            | CodecConfig::H264 { header, .. }
            | CodecConfig::Vc1Advanced { header }
            | CodecConfig::Mpeg4 { header, .. }
            | CodecConfig::Generic { header } => header.as_ref(),
            CodecConfig::Vc1SimpleMain { header } | CodecConfig::DivX311 { header } => Some(header),
            _ => None,
        }
    }
}

/// Decodes `setup` into the configuration of its packetizer.
pub fn configure(setup: &StreamSetup, config: &SinkConfig) -> Result<CodecConfig> {
    let codec = match setup.stream_type {
        StreamType::Mpeg1Audio
        | StreamType::Mpeg2Audio
        | StreamType::AacAdts
        | StreamType::AacLoas => CodecConfig::Passthrough { skip: 0 },
        StreamType::Ac3 | StreamType::Eac3 | StreamType::Dts => CodecConfig::Passthrough {
            skip: if setup.dvd_private { 2 } else { 0 },
        },
        StreamType::Lpcm => CodecConfig::Lpcm,
        StreamType::AacRaw => CodecConfig::Adts(adts_template(setup)?),
        StreamType::Wma => CodecConfig::BlockAudio(wma(setup)?),
        StreamType::Pcm => CodecConfig::BlockAudio(pcm(setup)?),
        StreamType::Mpeg1Video | StreamType::Mpeg2Video => CodecConfig::Mpeg12 {
            header: setup.codec_data.clone(),
        },
        StreamType::H264 => h264(setup),
        StreamType::Vc1Advanced => CodecConfig::Vc1Advanced {
            header: setup.codec_data.as_ref().map(vc1_advanced_header),
        },
        StreamType::Vc1SimpleMain => CodecConfig::Vc1SimpleMain {
            header: vc1_simple_main_header(setup)?,
        },
        StreamType::Mpeg4Part2 | StreamType::DivX4 => CodecConfig::Mpeg4 {
            header: setup.codec_data.clone(),
            repack: false,
        },
        StreamType::DivX5 | StreamType::DivX6 | StreamType::Xvid => CodecConfig::Mpeg4 {
            header: setup.codec_data.clone(),
            repack: config.repack_mpeg4,
        },
        StreamType::DivX311 => CodecConfig::DivX311 {
            header: divx311_header(setup)?,
        },
        StreamType::Vp6 => CodecConfig::Flash { kind: FlashCodec::Vp6 },
        StreamType::Vp8 => CodecConfig::Flash { kind: FlashCodec::Vp8 },
        StreamType::Spark => CodecConfig::Flash { kind: FlashCodec::Spark },
        StreamType::H263 => CodecConfig::Generic {
            header: setup.codec_data.clone(),
        },
    };

    if let Some(header) = codec.codec_header() {
        let budget = header.len() * config.hardware.codec_header_repeats() + HEADER_SLACK;
        if budget > PES_HEADER_CAPACITY {
            return Err(SinkError::CodecHeaderTooLarge { len: header.len() });
        }
    }
    info!(stream = setup.stream_type.name(), "stream configured");
    debug!(?codec, "codec configuration");
    Ok(codec)
}

fn adts_template(setup: &StreamSetup) -> Result<AdtsTemplate> {
    let mpeg2 = setup.mpeg_version == Some(2);
    if let Some(data) = &setup.codec_data {
        let asc = parse_audio_specific_config(data);
        debug!(?asc, "AudioSpecificConfig");
        return Ok(AdtsTemplate::from_config(&asc, mpeg2));
    }
    match (setup.sample_rate, setup.channels) {
        (Some(rate), Some(channels)) => Ok(AdtsTemplate::from_rate(rate, channels, mpeg2)),
        _ => Err(SinkError::MissingCodecData(setup.stream_type)),
    }
}

fn bcma_header(
    block_size: u32,
    format_tag: u16,
    setup: &StreamSetup,
    byte_rate: u32,
    frame_align: u16,
    depth: u16,
) -> Bytes {
    let extra = setup.codec_data.as_deref().unwrap_or(&[]);
    let mut out = BytesMut::with_capacity(26 + extra.len());
    out.put_slice(b"BCMA");
    out.put_u32(block_size);
    out.put_u16_le(format_tag);
    out.put_u16_le(setup.channels.unwrap_or(0) as u16);
    out.put_u32_le(setup.sample_rate.unwrap_or(0));
    out.put_u32_le(byte_rate);
    out.put_u16_le(frame_align);
    out.put_u16_le(depth);
    out.put_u16_le(extra.len() as u16);
    out.put_slice(extra);
    out.freeze()
}

fn wma(setup: &StreamSetup) -> Result<BlockAudioConfig> {
    let version = setup.require(setup.wma_version, "a WMA version")?;
    if !(2..=3).contains(&version) {
        return Err(SinkError::Unsupported(format!("WMA version {version}")));
    }
    let block_align = setup.require(setup.block_align, "a block alignment")?;
    if block_align == 0 {
        return Err(SinkError::Unsupported("WMA block of zero bytes".into()));
    }
    setup.require(setup.sample_rate, "a sample rate")?;
    setup.require(setup.channels, "a channel count")?;
    let bitrate = setup.bitrate.unwrap_or(0);
    let header = bcma_header(
        block_align,
        WMA_FORMAT_TAG_BASE + version as u16,
        setup,
        bitrate >> 3,
        block_align as u16,
        setup.bit_depth.unwrap_or(16),
    );
    Ok(BlockAudioConfig {
        format: BlockFormat::Wma,
        block_align: block_align as usize,
        header,
        block_ns: None,
    })
}

fn pcm(setup: &StreamSetup) -> Result<BlockAudioConfig> {
    let rate = setup.require(setup.sample_rate, "a sample rate")?;
    let channels = setup.require(setup.channels, "a channel count")? as u32;
    let depth = setup.require(setup.bit_depth, "a sample depth")? as u32;
    let block_align = rate * PCM_BLOCK_MS as u32 / 1000 * channels * depth / 8;
    if block_align == 0 {
        return Err(SinkError::Unsupported("PCM block of zero bytes".into()));
    }
    let header = bcma_header(
        block_align,
        PCM_FORMAT_TAG,
        setup,
        rate * channels * depth / 8,
        (channels * depth / 8) as u16,
        depth as u16,
    );
    Ok(BlockAudioConfig {
        format: BlockFormat::Pcm,
        block_align: block_align as usize,
        header,
        block_ns: Some(PCM_BLOCK_MS * crate::constants::NS_PER_MS),
    })
}

fn h264(setup: &StreamSetup) -> CodecConfig {
    match setup.codec_data.as_deref() {
        Some(data) => match parse_avcc(data) {
            Some(avc) => CodecConfig::H264 {
                nal_length_size: Some(avc.nal_length_size),
                header: Some(Bytes::from(avc.annex_b_header())),
            },
            None => {
                debug!("H.264 codec data is not avcC, forwarding it as Annex-B");
                CodecConfig::H264 {
                    nal_length_size: None,
                    header: Some(Bytes::copy_from_slice(data)),
                }
            }
        },
        None => CodecConfig::H264 { nal_length_size: None, header: None },
    }
}

/// Some containers put one extra byte ahead of the first start code.
fn vc1_advanced_header(data: &Bytes) -> Bytes {
    if !begins_with_start_code(data) && data.len() > 1 && begins_with_start_code(&data[1..]) {
        data.slice(1..)
    } else {
        data.clone()
    }
}

fn vc1_simple_main_header(setup: &StreamSetup) -> Result<Bytes> {
    let struct_c = setup
        .codec_data
        .as_ref()
        .ok_or(SinkError::MissingCodecData(setup.stream_type))?;
    let width = setup.require(setup.width, "a width")?;
    let height = setup.require(setup.height, "a height")?;
    let mut out = BytesMut::with_capacity(8 + struct_c.len());
    out.put_slice(&PES_START_CODE);
    out.put_u8(VC1_SEQUENCE_HEADER);
    out.put_u16(width);
    out.put_u16(height);
    out.put_slice(struct_c);
    Ok(out.freeze())
}

fn divx311_header(setup: &StreamSetup) -> Result<Bytes> {
    let width = setup.require(setup.width, "a width")?;
    let height = setup.require(setup.height, "a height")?;
    let mut out = BytesMut::with_capacity(16);
    out.put_slice(&PES_START_CODE);
    out.put_u8(crate::constants::MPEG4_USER_DATA);
    out.put_slice(b"DivX311A");
    out.put_u16(width);
    out.put_u16(height);
    Ok(out.freeze())
}
