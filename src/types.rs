use bytes::BytesMut;
use serde::{Deserialize, Serialize};

/// Elementary stream types a sink can be declared with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StreamType {
    Mpeg1Audio,
    Mpeg2Audio,
    AacRaw,
    AacAdts,
    AacLoas,
    Ac3,
    Eac3,
    Dts,
    Lpcm,
    Wma,
    Pcm,
    Mpeg1Video,
    Mpeg2Video,
    H264,
    H263,
    Mpeg4Part2,
    DivX311,
    DivX4,
    DivX5,
    DivX6,
    Xvid,
    Vc1Advanced,
    Vc1SimpleMain,
    Vp6,
    Vp8,
    Spark,
}

impl StreamType {
    pub fn is_audio(self) -> bool {
        matches!(
            self,
            StreamType::Mpeg1Audio
                | StreamType::Mpeg2Audio
                | StreamType::AacRaw
                | StreamType::AacAdts
                | StreamType::AacLoas
                | StreamType::Ac3
                | StreamType::Eac3
                | StreamType::Dts
                | StreamType::Lpcm
                | StreamType::Wma
                | StreamType::Pcm
        )
    }

    /// PES stream id the hardware expects for this stream
    pub fn stream_id(self) -> u8 {
        if self.is_audio() {
            crate::constants::AUDIO_STREAM_ID
        } else {
            crate::constants::VIDEO_STREAM_ID
        }
    }

    /// Streams that may arrive unpacked and need N-VOP repacking
    pub fn may_need_repack(self) -> bool {
        matches!(self, StreamType::Xvid | StreamType::DivX5 | StreamType::DivX6)
    }

    pub fn name(self) -> &'static str {
        match self {
            StreamType::Mpeg1Audio => "MPEG-1 Audio",
            StreamType::Mpeg2Audio => "MPEG-2 Audio",
            StreamType::AacRaw => "AAC (raw)",
            StreamType::AacAdts => "AAC (ADTS)",
            StreamType::AacLoas => "AAC (LOAS)",
            StreamType::Ac3 => "AC-3",
            StreamType::Eac3 => "E-AC-3",
            StreamType::Dts => "DTS",
            StreamType::Lpcm => "LPCM",
            StreamType::Wma => "WMA",
            StreamType::Pcm => "PCM",
            StreamType::Mpeg1Video => "MPEG-1 Video",
            StreamType::Mpeg2Video => "MPEG-2 Video",
            StreamType::H264 => "H.264",
            StreamType::H263 => "H.263",
            StreamType::Mpeg4Part2 => "MPEG-4 Part 2",
            StreamType::DivX311 => "DivX 3.11",
            StreamType::DivX4 => "DivX 4",
            StreamType::DivX5 => "DivX 5",
            StreamType::DivX6 => "DivX 6",
            StreamType::Xvid => "XviD",
            StreamType::Vc1Advanced => "VC-1 Advanced",
            StreamType::Vc1SimpleMain => "VC-1 Simple/Main",
            StreamType::Vp6 => "VP6",
            StreamType::Vp8 => "VP8",
            StreamType::Spark => "Sorenson Spark",
        }
    }
}

/// One compressed frame as delivered by the demuxer.
///
/// The payload is owned so packetizers may rewrite it in place (H.264 length
/// prefixes); callers must not expect the bytes back unchanged.
#[derive(Debug, Clone, Default)]
pub struct AccessUnit {
    pub data: BytesMut,
    /// Presentation timestamp in nanoseconds
    pub pts: Option<u64>,
    /// Duration in nanoseconds
    pub duration: Option<u64>,
}

impl AccessUnit {
    pub fn new(data: impl Into<BytesMut>, pts: Option<u64>) -> Self {
        Self {
            data: data.into(),
            pts,
            duration: None,
        }
    }

    pub fn from_slice(data: &[u8], pts: Option<u64>) -> Self {
        Self::new(BytesMut::from(data), pts)
    }

    pub fn with_duration(mut self, duration: Option<u64>) -> Self {
        self.duration = duration;
        self
    }
}

/// Frame rate as a rational number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Framerate {
    pub num: u32,
    pub den: u32,
}

impl Framerate {
    pub fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    /// Frames per 1000 seconds
    pub fn millihertz(self) -> Option<u32> {
        if self.num == 0 || self.den == 0 {
            return None;
        }
        u32::try_from(self.num as u64 * 1000 / self.den as u64).ok()
    }

    /// Nanoseconds between two frames
    pub fn frame_duration_ns(self) -> Option<u64> {
        if self.num == 0 || self.den == 0 {
            return None;
        }
        Some(crate::constants::NS_PER_SECOND * self.den as u64 / self.num as u64)
    }
}

/// Out-of-band notifications raised by the decoder device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeviceEvent {
    SizeChanged { width: u16, height: u16, aspect_ratio: u8 },
    FrameRateChanged { millihertz: u32 },
    ProgressiveChanged { progressive: bool },
}
