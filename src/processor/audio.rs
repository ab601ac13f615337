//! Audio packetizer: ADTS synthesis, block framing and passthrough.

use bytes::{Buf, Bytes, BytesMut};
use tracing::{trace, warn};

use crate::config::SinkConfig;
use crate::constants::AUDIO_STREAM_ID;
use crate::error::Result;
use crate::pes::{PesHeader, Timestamps};
use crate::processor::emit_split;
use crate::setup::{BlockAudioConfig, BlockFormat, CodecConfig};
use crate::stats::PacketCounters;
use crate::types::AccessUnit;

pub struct AudioPacketizer {
    codec: CodecConfig,
    config: SinkConfig,
    /// Running clock for units that carry a duration
    running_pts: Option<u64>,
    /// Partial block carried over to the next unit
    block: BytesMut,
    last_pts: Option<u64>,
    counters: PacketCounters,
}

impl AudioPacketizer {
    pub fn new(codec: CodecConfig, config: &SinkConfig) -> Self {
        Self {
            codec,
            config: config.clone(),
            running_pts: None,
            block: BytesMut::new(),
            last_pts: None,
            counters: PacketCounters::default(),
        }
    }

    pub fn counters(&self) -> PacketCounters {
        self.counters
    }

    pub fn last_pts(&self) -> Option<u64> {
        self.last_pts
    }

    pub fn flush(&mut self) {
        self.running_pts = None;
        self.block.clear();
    }

    /// Audio holds nothing back except a partial block, which is dropped.
    pub fn drain(&mut self) -> Result<Vec<Bytes>> {
        if !self.block.is_empty() {
            trace!(bytes = self.block.len(), "dropping partial audio block");
            self.block.clear();
        }
        Ok(Vec::new())
    }

    /// Follows a running clock while units carry PTS and duration.
    fn smooth(&mut self, pts: Option<u64>, duration: Option<u64>) -> Option<u64> {
        match (pts, duration) {
            (Some(pts), Some(duration)) => {
                let ts = *self.running_pts.get_or_insert(pts);
                self.running_pts = Some(ts + duration);
                Some(ts)
            }
            _ => {
                self.running_pts = None;
                pts
            }
        }
    }

    pub fn process(&mut self, au: AccessUnit) -> Result<Vec<Bytes>> {
        self.counters.units += 1;
        let mut data = au.data.freeze();
        let mut out = Vec::new();
        match self.codec.clone() {
            CodecConfig::Passthrough { skip } => {
                if data.len() <= skip {
                    warn!(len = data.len(), skip, "audio unit shorter than its substream prefix");
                    self.counters.parse_errors += 1;
                    return Ok(out);
                }
                data.advance(skip);
                let pts = self.smooth(au.pts, au.duration);
                self.send(&mut out, pts, &[], data)?;
            }
            CodecConfig::Lpcm => {
                if !matches!(data.first(), Some(0xA0..=0xAF)) {
                    warn!("LPCM unit does not start with a substream header");
                    self.counters.parse_errors += 1;
                }
                let pts = self.smooth(au.pts, au.duration);
                self.send(&mut out, pts, &[], data)?;
            }
            CodecConfig::Adts(template) => {
                let pts = self.smooth(au.pts, au.duration);
                match template.header(data.len()) {
                    Some(adts) => self.send(&mut out, pts, &adts, data)?,
                    None => {
                        warn!(len = data.len(), "AAC frame too long for ADTS, sending it raw");
                        self.counters.parse_errors += 1;
                        self.send(&mut out, pts, &[], data)?;
                    }
                }
            }
            CodecConfig::BlockAudio(block) => self.blocks(&mut out, &block, au.pts, au.duration, data)?,
            other => {
                warn!(codec = ?other, "video configuration on an audio stream");
                self.counters.parse_errors += 1;
            }
        }
        Ok(out)
    }

    /// Cuts `data` into fixed blocks, each behind the "BCMA" header.
    fn blocks(
        &mut self,
        out: &mut Vec<Bytes>,
        cfg: &BlockAudioConfig,
        pts: Option<u64>,
        duration: Option<u64>,
        mut data: Bytes,
    ) -> Result<()> {
        let blocks = (data.len() / cfg.block_align).max(1) as u64;
        let step = cfg.block_ns.or_else(|| duration.map(|d| d / blocks));
        let mut ts = match cfg.format {
            BlockFormat::Pcm => match pts {
                Some(pts) => Some(*self.running_pts.get_or_insert(pts)),
                None => {
                    self.running_pts = None;
                    None
                }
            },
            BlockFormat::Wma => pts,
        };
        while !data.is_empty() {
            let take = (cfg.block_align - self.block.len()).min(data.len());
            self.block.extend_from_slice(&data[..take]);
            data.advance(take);
            if self.block.len() == cfg.block_align {
                let payload = self.block.split().freeze();
                self.send(out, ts, &cfg.header, payload)?;
                ts = ts.zip(step).map(|(t, s)| t + s);
            }
        }
        if cfg.format == BlockFormat::Pcm && self.running_pts.is_some() {
            self.running_pts = ts;
        }
        Ok(())
    }

    /// Emits `payload` behind `lead` in one or more packets.
    fn send(&mut self, out: &mut Vec<Bytes>, pts: Option<u64>, lead: &[u8], payload: Bytes) -> Result<()> {
        let mut header = PesHeader::new(AUDIO_STREAM_ID, Timestamps::for_pts(pts, &self.config));
        header.push(lead)?;
        if pts.is_some() {
            self.last_pts = pts;
        }
        emit_split(out, header, vec![payload], self.config.audio_oversize, &mut self.counters)
    }
}
