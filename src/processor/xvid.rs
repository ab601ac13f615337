//! Packed-bitstream repacking for XviD and DivX 5/6.
//!
//! Unpacked streams deliver one VOP per container frame. Decoders that
//! expect the packed form want each reference frame sent together with
//! the first B frame that follows it, and a not-coded VOP (N-VOP) where
//! the reference frame's slot would have been.
//!
//! Output frames take the input timestamps in arrival order, so every
//! container slot keeps its PTS, the N-VOP markers included.

use std::collections::VecDeque;

use bytes::Bytes;
use tracing::{debug, info, trace, warn};

use crate::parsers::mpeg4;
use crate::processor::{Frame, HeaderBoundary};

#[derive(Debug, Clone)]
struct CachedVop {
    data: Bytes,
    time_inc: u32,
    boundary: Option<HeaderBoundary>,
}

#[derive(Debug)]
pub struct XvidPacker {
    enabled: bool,
    time_inc_bits: Option<u32>,
    cached: Option<CachedVop>,
    /// Set once the cached VOP went out with its first B frame
    cached_sent: bool,
    non_key: u32,
    /// PTS of input VOPs not yet matched by an output frame
    slots: VecDeque<Option<u64>>,
    parse_errors: u64,
}

impl XvidPacker {
    /// `codec_header` may carry the VOL that sizes `vop_time_increment`.
    pub fn new(codec_header: Option<&Bytes>) -> Self {
        let time_inc_bits = codec_header
            .and_then(|h| mpeg4::scan(h).vol)
            .map(|vol| vol.time_inc_bits);
        Self {
            enabled: true,
            time_inc_bits,
            cached: None,
            cached_sent: false,
            non_key: 0,
            slots: VecDeque::new(),
            parse_errors: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn parse_errors(&self) -> u64 {
        self.parse_errors
    }

    /// Takes one frame and returns the frames ready for the PES stage.
    pub fn push(&mut self, frame: Frame) -> Vec<Frame> {
        if !self.enabled {
            return vec![frame];
        }
        let data = frame.parts.first().cloned().unwrap_or_default();
        let found = mpeg4::scan(&data);
        if let Some(vol) = found.vol {
            if self.time_inc_bits != Some(vol.time_inc_bits) {
                debug!(resolution = vol.time_increment_resolution, bits = vol.time_inc_bits, "MPEG-4 VOL");
            }
            self.time_inc_bits = Some(vol.time_inc_bits);
        }
        if found.packed_tag {
            info!("stream is already packed, repacking disabled");
            return self.disable(frame);
        }
        let Some(vop_offset) = found.vop_offset else {
            return vec![frame];
        };
        let Some(bits) = self.time_inc_bits else {
            warn!("VOP without a preceding VOL, repacking disabled");
            return self.disable(frame);
        };
        let body = &data[(vop_offset + 4).min(data.len())..];
        let vop = match mpeg4::parse_vop(body, bits) {
            Ok(vop) => vop,
            Err(e) => {
                self.parse_errors += 1;
                warn!(error = %e, "unreadable VOP header");
                return vec![frame];
            }
        };
        if !vop.coded {
            trace!(time_inc = vop.time_inc, "skipping not-coded VOP");
            return Vec::new();
        }
        self.slots.push_back(frame.pts);

        let mut out = Vec::new();
        if vop.coding_type.is_reference() {
            if let Some(cached) = self.cached.take() {
                if self.non_key == 0 {
                    if !self.cached_sent {
                        out.push(self.release(cached));
                    }
                } else {
                    out.extend(self.nvop(cached.time_inc, bits));
                    self.non_key = 0;
                }
            }
            self.cached = Some(CachedVop { data, time_inc: vop.time_inc, boundary: frame.boundary });
            self.cached_sent = false;
        } else {
            self.non_key += 1;
            match self.cached.clone() {
                Some(cached) if self.non_key == 1 && !self.cached_sent => {
                    trace!(kind = %vop.coding_type, "packing B frame behind its reference");
                    out.push(Frame {
                        pts: self.next_slot(),
                        lead: None,
                        parts: vec![cached.data, data],
                        boundary: cached.boundary,
                    });
                    self.cached_sent = true;
                }
                _ => {
                    let pts = self.next_slot();
                    out.push(Frame { pts, ..frame });
                }
            }
        }
        out
    }

    /// Releases what is still cached at end of stream.
    pub fn drain(&mut self) -> Vec<Frame> {
        let Some(cached) = self.cached.take() else {
            return Vec::new();
        };
        let mut out = Vec::new();
        if !self.cached_sent {
            out.push(self.release(cached));
        } else if self.non_key > 0 {
            if let Some(bits) = self.time_inc_bits {
                out.extend(self.nvop(cached.time_inc, bits));
            }
        }
        self.reset();
        out
    }

    pub fn reset(&mut self) {
        self.cached = None;
        self.cached_sent = false;
        self.non_key = 0;
        self.slots.clear();
    }

    fn disable(&mut self, frame: Frame) -> Vec<Frame> {
        self.enabled = false;
        let mut out = Vec::new();
        if let Some(cached) = self.cached.take() {
            if !self.cached_sent {
                out.push(self.release(cached));
            }
        }
        self.reset();
        out.push(frame);
        out
    }

    fn next_slot(&mut self) -> Option<u64> {
        self.slots.pop_front().flatten()
    }

    fn release(&mut self, cached: CachedVop) -> Frame {
        Frame::new(self.next_slot(), cached.data).with_boundary(cached.boundary)
    }

    fn nvop(&mut self, time_inc: u32, bits: u32) -> Option<Frame> {
        let pts = self.next_slot();
        match mpeg4::build_nvop(time_inc, bits) {
            Ok(nvop) => Some(Frame {
                pts,
                lead: Some(Bytes::from(nvop)),
                parts: Vec::new(),
                boundary: None,
            }),
            Err(e) => {
                self.parse_errors += 1;
                warn!(error = %e, "cannot build N-VOP");
                None
            }
        }
    }
}
