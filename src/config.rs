//! Sink configuration.
//!
//! Output-format quirks of particular decoder generations are selected here
//! once, at construction, instead of being consulted from shared state.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_FRAMERATE_MHZ, DRAIN_POLL_INTERVAL_MS, H264_SCRATCH_CAPACITY};

/// Decoder hardware family, selecting PES header variants
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HardwareProfile {
    #[default]
    Generic,
    /// Every timestamped PES header carries PTS and DTS (19-byte header)
    DtsRequired,
    /// The one-time codec header is sent twice back to back
    RepeatCodecHeader,
}

impl HardwareProfile {
    pub fn signals_dts(self) -> bool {
        self == HardwareProfile::DtsRequired
    }

    pub fn codec_header_repeats(self) -> usize {
        match self {
            HardwareProfile::RepeatCodecHeader => 2,
            _ => 1,
        }
    }
}

/// What to do when a PES payload does not fit the 16-bit length field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OversizePolicy {
    /// Write 0 ("unbounded"); only video decoders accept this
    ZeroLength,
    /// Cut the payload into several packets, the first one timestamped
    Split,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    pub hardware: HardwareProfile,
    /// 90 kHz ticks subtracted from the PTS to form the DTS
    pub dts_offset_ticks: u64,
    pub audio_oversize: OversizePolicy,
    pub video_oversize: OversizePolicy,
    /// Capacity for H.264 streams with 1 or 2 byte NAL length prefixes
    pub scratch_capacity: usize,
    pub drain_poll_interval_ms: u64,
    pub drain_timeout_ms: Option<u64>,
    /// VC-1 frame rate used when the sequence header carries none
    pub default_framerate_mhz: u32,
    /// Re-send the stored sequence header at GOP starts lacking one
    pub gop_header_resend: bool,
    /// Regroup unpacked XviD/DivX5 B-frames with N-VOP markers
    pub repack_mpeg4: bool,
}

impl SinkConfig {
    pub fn drain_poll_interval(&self) -> Duration {
        Duration::from_millis(self.drain_poll_interval_ms.max(1))
    }

    pub fn drain_timeout(&self) -> Option<Duration> {
        self.drain_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            hardware: HardwareProfile::Generic,
            dts_offset_ticks: 0,
            audio_oversize: OversizePolicy::Split,
            video_oversize: OversizePolicy::ZeroLength,
            scratch_capacity: H264_SCRATCH_CAPACITY,
            drain_poll_interval_ms: DRAIN_POLL_INTERVAL_MS,
            drain_timeout_ms: None,
            default_framerate_mhz: DEFAULT_FRAMERATE_MHZ,
            gop_header_resend: true,
            repack_mpeg4: true,
        }
    }
}
