//! Per-stream packetizers.
//!
//! A packetizer takes one access unit at a time and returns the byte chunks
//! to hand to the writer, in order: a PES header followed by the payload
//! pieces it covers, repeated for every packet the unit produced. Frames
//! held back for lookahead or repacking are released through a small work
//! queue rather than by re-entering the packetizer.

pub mod audio;
pub mod vc1;
pub mod video;
pub mod xvid;

use bytes::{Bytes, BytesMut};
use tracing::trace;

use crate::config::{OversizePolicy, SinkConfig};
use crate::error::Result;
use crate::pes::{PesHeader, Timestamps};
use crate::setup::CodecConfig;
use crate::stats::PacketCounters;
use crate::types::{AccessUnit, StreamType};

pub use audio::AudioPacketizer;
pub use video::VideoPacketizer;

/// What the start codes ahead of a picture say about the codec header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderBoundary {
    /// The unit carries its own sequence header
    OwnHeader,
    /// A GOP or entry point starts without one
    GopStart,
}

/// Work item for the PES stage
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    pub pts: Option<u64>,
    /// Bytes carried inside the PES header ahead of the payload
    pub lead: Option<Bytes>,
    pub parts: Vec<Bytes>,
    /// Sequence boundary found in the unit this frame came from; it
    /// travels with the frame through the reorder and repack stages
    pub boundary: Option<HeaderBoundary>,
}

impl Frame {
    pub fn new(pts: Option<u64>, data: Bytes) -> Self {
        Self {
            pts,
            lead: None,
            parts: vec![data],
            boundary: None,
        }
    }

    pub fn with_boundary(mut self, boundary: Option<HeaderBoundary>) -> Self {
        self.boundary = boundary;
        self
    }

    pub fn payload_len(&self) -> usize {
        self.parts.iter().map(Bytes::len).sum()
    }

    /// First payload bytes, for start-code checks
    pub fn head(&self) -> &[u8] {
        self.parts.first().map_or(&[], |p| &p[..])
    }
}

/// Writes one PES packet for `payload` behind `header`.
pub(crate) fn emit(
    out: &mut Vec<Bytes>,
    mut header: PesHeader,
    payload: Vec<Bytes>,
    policy: OversizePolicy,
    counters: &mut PacketCounters,
) -> Result<()> {
    let len = payload.iter().map(Bytes::len).sum();
    header.finalize(len, policy)?;
    out.push(header.to_bytes());
    out.extend(payload.into_iter().filter(|p| !p.is_empty()));
    counters.packets += 1;
    Ok(())
}

/// Like [`emit`], but cuts a payload that overflows the length field into
/// continuation packets when the policy is [`OversizePolicy::Split`]. Only
/// the first packet carries the timestamps and injected bytes.
pub(crate) fn emit_split(
    out: &mut Vec<Bytes>,
    header: PesHeader,
    payload: Vec<Bytes>,
    policy: OversizePolicy,
    counters: &mut PacketCounters,
) -> Result<()> {
    let total: usize = payload.iter().map(Bytes::len).sum();
    if policy == OversizePolicy::ZeroLength || total <= header.payload_room() {
        return emit(out, header, payload, policy, counters);
    }
    trace!(len = total, "splitting oversized payload");
    let stream_id = header.stream_id();
    let mut rest = if payload.len() == 1 {
        payload.into_iter().next().unwrap_or_default()
    } else {
        let mut joined = BytesMut::with_capacity(total);
        payload.iter().for_each(|p| joined.extend_from_slice(p));
        joined.freeze()
    };
    let first = rest.split_to(header.payload_room());
    emit(out, header, vec![first], policy, counters)?;
    while !rest.is_empty() {
        let header = PesHeader::new(stream_id, Timestamps::None);
        let chunk = rest.split_to(header.payload_room().min(rest.len()));
        emit(out, header, vec![chunk], policy, counters)?;
    }
    Ok(())
}

/// Packetizer for one declared stream
pub enum Packetizer {
    Audio(AudioPacketizer),
    Video(VideoPacketizer),
}

impl Packetizer {
    pub fn new(
        stream_type: StreamType,
        codec: CodecConfig,
        framerate_mhz: Option<u32>,
        config: &SinkConfig,
    ) -> Self {
        if stream_type.is_audio() {
            Packetizer::Audio(AudioPacketizer::new(codec, config))
        } else {
            Packetizer::Video(VideoPacketizer::new(codec, framerate_mhz, config))
        }
    }

    /// Packetizes one access unit. The unit's buffer may be rewritten.
    pub fn process(&mut self, au: AccessUnit) -> Result<Vec<Bytes>> {
        match self {
            Packetizer::Audio(p) => p.process(au),
            Packetizer::Video(p) => p.process(au),
        }
    }

    /// Releases frames still held for lookahead.
    pub fn drain(&mut self) -> Result<Vec<Bytes>> {
        match self {
            Packetizer::Audio(p) => p.drain(),
            Packetizer::Video(p) => p.drain(),
        }
    }

    /// Forgets buffered state after a flush; the codec header is re-armed.
    pub fn flush(&mut self) {
        match self {
            Packetizer::Audio(p) => p.flush(),
            Packetizer::Video(p) => p.flush(),
        }
    }

    pub fn rearm_codec_header(&mut self) {
        if let Packetizer::Video(p) = self {
            p.rearm_codec_header();
        }
    }

    pub fn counters(&self) -> PacketCounters {
        match self {
            Packetizer::Audio(p) => p.counters(),
            Packetizer::Video(p) => p.counters(),
        }
    }

    /// Last PTS placed in a PES header, in nanoseconds
    pub fn last_pts(&self) -> Option<u64> {
        match self {
            Packetizer::Audio(p) => p.last_pts(),
            Packetizer::Video(p) => p.last_pts(),
        }
    }
}

