//! Video packetizer.
//!
//! Each access unit goes through up to three stages before it becomes PES
//! packets: NAL prefix rewriting for length-prefixed H.264, a reorder or
//! repack stage (VC-1 lookahead, XviD packing) that may hold frames back,
//! and finally header assembly with the one-time codec header and any
//! per-codec framing tag.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};
use tracing::{debug, error, trace};

use crate::config::SinkConfig;
use crate::constants::{
    MPEG2_GOP, MPEG2_PICTURE, MPEG2_SEQUENCE_HEADER, MPEG4_GOV, MPEG4_VOL_FIRST, MPEG4_VOL_LAST,
    MPEG4_VOP, MPEG4_VOS, PES_START_CODE, VC1_ENTRY_POINT, VC1_FRAME, VC1_SEQUENCE_HEADER,
    VIDEO_STREAM_ID,
};
use crate::error::Result;
use crate::parsers::h264;
use crate::parsers::utils::{begins_with_start_code, start_codes};
use crate::pes::{PesHeader, Timestamps};
use crate::processor::vc1::Vc1Reorder;
use crate::processor::xvid::XvidPacker;
use crate::processor::{Frame, HeaderBoundary, emit_split};
use crate::setup::{CodecConfig, FlashCodec};
use crate::stats::PacketCounters;
use crate::types::AccessUnit;

fn header_boundary(codec: &CodecConfig, data: &[u8]) -> Option<HeaderBoundary> {
    let mut gop = false;
    for sc in start_codes(data) {
        match (codec, sc.code) {
            (CodecConfig::Mpeg12 { .. }, MPEG2_SEQUENCE_HEADER)
            | (CodecConfig::Mpeg4 { .. }, MPEG4_VOS | MPEG4_VOL_FIRST..=MPEG4_VOL_LAST)
            | (CodecConfig::Vc1Advanced { .. }, VC1_SEQUENCE_HEADER) => {
                return Some(HeaderBoundary::OwnHeader);
            }
            (CodecConfig::Mpeg12 { .. }, MPEG2_GOP)
            | (CodecConfig::Mpeg4 { .. }, MPEG4_GOV)
            | (CodecConfig::Vc1Advanced { .. }, VC1_ENTRY_POINT) => gop = true,
            (CodecConfig::Mpeg12 { .. }, MPEG2_PICTURE)
            | (CodecConfig::Mpeg4 { .. }, MPEG4_VOP)
            | (CodecConfig::Vc1Advanced { .. }, VC1_FRAME) => break,
            (CodecConfig::Mpeg12 { .. } | CodecConfig::Mpeg4 { .. } | CodecConfig::Vc1Advanced { .. }, _) => {}
            _ => return None,
        }
    }
    gop.then_some(HeaderBoundary::GopStart)
}

pub struct VideoPacketizer {
    codec: CodecConfig,
    config: SinkConfig,
    must_send_header: bool,
    vc1: Option<Vc1Reorder>,
    xvid: Option<XvidPacker>,
    /// NAL rewrite target for 1 and 2 byte length prefixes
    scratch: BytesMut,
    jobs: VecDeque<Frame>,
    last_pts: Option<u64>,
    counters: PacketCounters,
}

impl VideoPacketizer {
    pub fn new(codec: CodecConfig, framerate_mhz: Option<u32>, config: &SinkConfig) -> Self {
        let vc1 = matches!(codec, CodecConfig::Vc1Advanced { .. })
            .then(|| Vc1Reorder::new(framerate_mhz.unwrap_or(config.default_framerate_mhz)));
        let xvid = match &codec {
            CodecConfig::Mpeg4 { header, repack: true } => Some(XvidPacker::new(header.as_ref())),
            _ => None,
        };
        let scratch = match codec {
            CodecConfig::H264 { nal_length_size: Some(1 | 2), .. } => {
                BytesMut::with_capacity(config.scratch_capacity)
            }
            _ => BytesMut::new(),
        };
        Self {
            must_send_header: codec.codec_header().is_some(),
            codec,
            config: config.clone(),
            vc1,
            xvid,
            scratch,
            jobs: VecDeque::new(),
            last_pts: None,
            counters: PacketCounters::default(),
        }
    }

    pub fn counters(&self) -> PacketCounters {
        let mut counters = self.counters;
        counters.parse_errors += self.vc1.as_ref().map_or(0, Vc1Reorder::parse_errors);
        counters.parse_errors += self.xvid.as_ref().map_or(0, XvidPacker::parse_errors);
        counters
    }

    pub fn last_pts(&self) -> Option<u64> {
        self.last_pts
    }

    pub fn rearm_codec_header(&mut self) {
        self.must_send_header = self.codec.codec_header().is_some();
    }

    /// Forgets held frames and re-arms the codec header.
    pub fn flush(&mut self) {
        self.jobs.clear();
        if let Some(vc1) = &mut self.vc1 {
            vc1.reset();
        }
        if let Some(xvid) = &mut self.xvid {
            xvid.reset();
        }
        self.rearm_codec_header();
    }

    pub fn process(&mut self, mut au: AccessUnit) -> Result<Vec<Bytes>> {
        self.counters.units += 1;
        let data = match self.annex_b(&mut au) {
            Ok(data) => data,
            Err(e) => {
                error!(error = %e, len = au.data.len(), "dropping H.264 access unit");
                self.counters.units_dropped += 1;
                return Err(e);
            }
        };
        let boundary = self.codec.codec_header().and_then(|_| header_boundary(&self.codec, &data));
        let frame = Frame::new(au.pts, data).with_boundary(boundary);
        if let Some(vc1) = &mut self.vc1 {
            self.jobs.extend(vc1.push(frame));
        } else if let Some(xvid) = &mut self.xvid {
            self.jobs.extend(xvid.push(frame));
        } else {
            self.jobs.push_back(frame);
        }
        self.run_jobs()
    }

    /// Releases frames held by the reorder and repack stages.
    pub fn drain(&mut self) -> Result<Vec<Bytes>> {
        if let Some(vc1) = &mut self.vc1 {
            self.jobs.extend(vc1.drain());
        }
        if let Some(xvid) = &mut self.xvid {
            self.jobs.extend(xvid.drain());
        }
        self.run_jobs()
    }

    /// Rewrites length-prefixed NAL units to start codes.
    fn annex_b(&mut self, au: &mut AccessUnit) -> Result<Bytes> {
        let CodecConfig::H264 { nal_length_size: Some(size), .. } = self.codec else {
            return Ok(au.data.split().freeze());
        };
        match size {
            3 | 4 => {
                let units = h264::rewrite_in_place(&mut au.data, size as usize)?;
                trace!(units, "NAL prefixes rewritten in place");
                Ok(au.data.split().freeze())
            }
            _ => {
                let units =
                    h264::rewrite_into(&au.data, size as usize, &mut self.scratch, self.config.scratch_capacity)?;
                trace!(units, "NAL prefixes rewritten into scratch");
                Ok(self.scratch.split().freeze())
            }
        }
    }

    /// Settles the codec header for the frame about to be packetized.
    fn track_sequence_headers(&mut self, boundary: Option<HeaderBoundary>) {
        match boundary {
            Some(HeaderBoundary::OwnHeader) if self.must_send_header => {
                debug!("unit carries its own sequence header");
                self.must_send_header = false;
            }
            Some(HeaderBoundary::GopStart) if self.config.gop_header_resend && !self.must_send_header => {
                trace!("GOP without sequence header, re-sending codec header");
                self.must_send_header = true;
            }
            _ => {}
        }
    }

    fn run_jobs(&mut self) -> Result<Vec<Bytes>> {
        let mut out = Vec::new();
        while let Some(frame) = self.jobs.pop_front() {
            if let Err(e) = self.packetize(&mut out, frame) {
                self.jobs.clear();
                self.counters.units_dropped += 1;
                return Err(e);
            }
        }
        Ok(out)
    }

    fn packetize(&mut self, out: &mut Vec<Bytes>, frame: Frame) -> Result<()> {
        self.track_sequence_headers(frame.boundary);
        let mut header = PesHeader::new(VIDEO_STREAM_ID, Timestamps::for_pts(frame.pts, &self.config));
        if self.must_send_header {
            if let Some(codec_header) = self.codec.codec_header() {
                for _ in 0..self.config.hardware.codec_header_repeats() {
                    header.push(codec_header)?;
                }
                self.counters.codec_headers += 1;
            }
            self.must_send_header = false;
        }
        if let Some(lead) = &frame.lead {
            header.push(lead)?;
        }
        match self.codec {
            CodecConfig::DivX311 { .. } => {
                header.push(&PES_START_CODE)?;
                header.push(&[MPEG4_VOP])?;
            }
            CodecConfig::Vc1Advanced { .. } | CodecConfig::Vc1SimpleMain { .. }
                if !begins_with_start_code(frame.head()) =>
            {
                header.push(&PES_START_CODE)?;
                header.push(&[VC1_FRAME])?;
            }
            CodecConfig::Flash { kind } => {
                let vp6 = usize::from(kind == FlashCodec::Vp6);
                let size = (frame.payload_len() + 10 + vp6) as u32;
                header.push(b"BCMV")?;
                header.push(&size.to_be_bytes())?;
                header.push(&[0u8; 3][..2 + vp6])?;
            }
            _ => {}
        }
        if frame.pts.is_some() {
            self.last_pts = frame.pts;
        }
        emit_split(out, header, frame.parts, self.config.video_oversize, &mut self.counters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitstream::BitstreamWriter;
    use crate::config::{HardwareProfile, OversizePolicy};
    use crate::error::SinkError;
    use crate::setup::{StreamSetup, configure};
    use crate::types::StreamType;

    const AVCC: [u8; 17] = [
        0x01, 0x42, 0xC0, 0x1E, 0xFF, 0xE1, 0x00, 0x04, 0x67, 0x42, 0xC0, 0x1E, 0x01, 0x00, 0x02,
        0x68, 0xCE,
    ];
    const SPS_PPS: [u8; 12] = [0, 0, 1, 0x67, 0x42, 0xC0, 0x1E, 0, 0, 1, 0x68, 0xCE];

    fn packetizer(setup: StreamSetup, config: &SinkConfig) -> VideoPacketizer {
        VideoPacketizer::new(configure(&setup, config).unwrap(), None, config)
    }

    fn declared_len(header: &[u8]) -> usize {
        u16::from_be_bytes([header[4], header[5]]) as usize
    }

    #[test]
    fn avcc_stream_gets_annex_b_and_one_header() {
        let mut p = packetizer(StreamSetup::new(StreamType::H264).codec_data(AVCC.to_vec()), &SinkConfig::default());
        let au = [0u8, 0, 0, 2, 0x65, 0x88];
        let out = p.process(AccessUnit::from_slice(&au, Some(0))).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(&out[0][14..], &SPS_PPS);
        assert_eq!(&out[1][..], &[0, 0, 1, 0x65, 0x88]);
        assert_eq!(declared_len(&out[0]), out[0].len() - 6 + out[1].len());

        let out = p.process(AccessUnit::from_slice(&au, Some(40_000_000))).unwrap();
        assert_eq!(out[0].len(), 14);
        assert_eq!(p.counters().codec_headers, 1);

        p.flush();
        let out = p.process(AccessUnit::from_slice(&au, None)).unwrap();
        assert_eq!(&out[0][9..], &SPS_PPS);
        assert_eq!(p.counters().codec_headers, 2);
    }

    #[test]
    fn repeat_profile_sends_header_twice() {
        let config = SinkConfig { hardware: HardwareProfile::RepeatCodecHeader, ..SinkConfig::default() };
        let mut p = packetizer(StreamSetup::new(StreamType::H264).codec_data(AVCC.to_vec()), &config);
        let out = p.process(AccessUnit::from_slice(&[0, 0, 0, 1, 0x65], None)).unwrap();
        assert_eq!(&out[0][9..21], &SPS_PPS);
        assert_eq!(&out[0][21..], &SPS_PPS);
    }

    #[test]
    fn short_prefixes_use_bounded_scratch() {
        let mut avcc = AVCC;
        avcc[4] = 0xFD; // two-byte lengths
        let config = SinkConfig { scratch_capacity: 16, ..SinkConfig::default() };
        let mut p = packetizer(StreamSetup::new(StreamType::H264).codec_data(avcc.to_vec()), &config);
        let out = p.process(AccessUnit::from_slice(&[0, 2, 0x41, 0x9A, 0, 1, 0x41], None)).unwrap();
        assert_eq!(&out[1][..], &[0, 0, 1, 0x41, 0x9A, 0, 0, 1, 0x41]);

        let big = [&[0u8, 20][..], &[0x41u8; 20][..]].concat();
        let err = p.process(AccessUnit::from_slice(&big, None)).unwrap_err();
        assert!(matches!(err, SinkError::ScratchOverflow { needed: 23, capacity: 16 }));
        assert!(err.drops_unit());
        assert_eq!(p.counters().units_dropped, 1);
    }

    #[test]
    fn gop_without_sequence_header_resends_it() {
        let seq = vec![0, 0, 1, 0xB3, 0x2D, 0x01, 0xE0, 0x24];
        let mut p = packetizer(StreamSetup::new(StreamType::Mpeg2Video).codec_data(seq.clone()), &SinkConfig::default());
        let gop_picture = [0, 0, 1, 0xB8, 0x00, 0x08, 0, 0, 0, 1, 0x00, 0x0F, 0xFF];
        let picture = [0, 0, 1, 0x00, 0x0F, 0xFF];

        let first = p.process(AccessUnit::from_slice(&gop_picture, None)).unwrap();
        assert_eq!(&first[0][9..], &seq[..]);
        let plain = p.process(AccessUnit::from_slice(&picture, None)).unwrap();
        assert_eq!(plain[0].len(), 9);
        let again = p.process(AccessUnit::from_slice(&gop_picture, None)).unwrap();
        assert_eq!(&again[0][9..], &seq[..]);

        // a unit with its own sequence header needs no injected copy
        p.rearm_codec_header();
        let own = [&seq[..], &picture[..]].concat();
        let out = p.process(AccessUnit::from_slice(&own, None)).unwrap();
        assert_eq!(out[0].len(), 9);
        assert_eq!(p.counters().codec_headers, 2);
    }

    #[test]
    fn divx311_frames_get_vop_start_code() {
        let mut p = packetizer(StreamSetup::new(StreamType::DivX311).dimensions(320, 240), &SinkConfig::default());
        let out = p.process(AccessUnit::from_slice(&[0x11, 0x22], None)).unwrap();
        let header = &out[0];
        assert_eq!(&header[9..13], b"\x00\x00\x01\xB2");
        assert_eq!(&header[header.len() - 4..], &[0, 0, 1, 0xB6]);
        let out = p.process(AccessUnit::from_slice(&[0x33], None)).unwrap();
        assert_eq!(&out[0][9..], &[0, 0, 1, 0xB6]);
    }

    #[test]
    fn vc1_simple_frames_get_frame_start_code() {
        let setup = StreamSetup::new(StreamType::Vc1SimpleMain)
            .dimensions(320, 240)
            .codec_data(vec![0x4E, 0x29, 0x1A, 0x11]);
        let mut p = packetizer(setup, &SinkConfig::default());
        p.process(AccessUnit::from_slice(&[0xAA], None)).unwrap();
        let out = p.process(AccessUnit::from_slice(&[0xBB, 0xCC], None)).unwrap();
        assert_eq!(&out[0][9..], &[0, 0, 1, 0x0D]);
        assert_eq!(declared_len(&out[0]), 3 + 4 + 2);
    }

    #[test]
    fn flash_framing() {
        let mut vp6 = packetizer(StreamSetup::new(StreamType::Vp6), &SinkConfig::default());
        let out = vp6.process(AccessUnit::from_slice(&[9; 5], None)).unwrap();
        assert_eq!(&out[0][9..], b"BCMV\x00\x00\x00\x10\x00\x00\x00");

        let mut spark = packetizer(StreamSetup::new(StreamType::Spark), &SinkConfig::default());
        let out = spark.process(AccessUnit::from_slice(&[9; 5], None)).unwrap();
        assert_eq!(&out[0][9..], b"BCMV\x00\x00\x00\x0F\x00\x00");
    }

    #[test]
    fn oversized_video_uses_zero_length_unless_split() {
        let mut p = packetizer(StreamSetup::new(StreamType::Mpeg2Video), &SinkConfig::default());
        let out = p.process(AccessUnit::new(&vec![0x5Au8; 70_000][..], Some(0))).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(declared_len(&out[0]), 0);

        let config = SinkConfig { video_oversize: OversizePolicy::Split, ..SinkConfig::default() };
        let mut p = packetizer(StreamSetup::new(StreamType::Mpeg2Video), &config);
        let out = p.process(AccessUnit::new(&vec![0x5Au8; 70_000][..], Some(0))).unwrap();
        assert_eq!(out.len(), 4);
        assert_eq!(declared_len(&out[0]), 0xFFFF);
    }

    #[test]
    fn xvid_units_flow_through_the_packer() {
        let mut p = VideoPacketizer::new(
            CodecConfig::Mpeg4 { header: None, repack: true },
            None,
            &SinkConfig::default(),
        );
        // no VOL known: the packer steps aside and the frame goes straight out
        let out = p.process(AccessUnit::from_slice(&[0, 0, 1, 0xB6, 0x10, 0x00], Some(0))).unwrap();
        assert_eq!(out.len(), 2);
        assert!(p.drain().unwrap().is_empty());
    }

    #[test]
    fn vc1_entry_point_header_goes_with_its_own_frame() {
        let seq = vec![0, 0, 1, 0x0F, 0xAA];
        let mut p = VideoPacketizer::new(
            CodecConfig::Vc1Advanced { header: Some(Bytes::from(seq.clone())) },
            Some(25_000),
            &SinkConfig::default(),
        );
        let frame = [0, 0, 1, 0x0D, 0xC0, 0x00, 0x00];
        let entry = [0, 0, 1, 0x0E, 0xBB, 0, 0, 1, 0x0D, 0xC0, 0x00, 0x00];

        assert!(p.process(AccessUnit::from_slice(&frame, Some(0))).unwrap().is_empty());
        let first = p.process(AccessUnit::from_slice(&frame, Some(40_000_000))).unwrap();
        assert_eq!(&first[0][14..], &seq[..]);

        // the held mid-GOP frame is released when the entry point arrives
        let mid = p.process(AccessUnit::from_slice(&entry, Some(80_000_000))).unwrap();
        assert_eq!(mid[0].len(), 14);
        assert_eq!(&mid[1][..], &frame);

        let last = p.drain().unwrap();
        assert_eq!(&last[0][14..], &seq[..]);
        assert_eq!(&last[1][..], &entry);
        assert_eq!(p.counters().codec_headers, 2);
    }

    fn vol() -> Vec<u8> {
        let mut out = vec![0, 0, 1, 0x20];
        let mut w = BitstreamWriter::new(&mut out);
        // random access, object type, no layer id, aspect 1:1, no control, shape, marker, resolution 25
        for (v, b) in [(0, 1), (1, 8), (0, 1), (1, 4), (0, 1), (0, 2), (1, 1), (25, 16), (1, 1)] {
            w.put(v, b).unwrap();
        }
        w.finish().unwrap();
        out
    }

    fn vop(kind: u32, time_inc: u32) -> Vec<u8> {
        let mut out = vec![0, 0, 1, 0xB6];
        let mut w = BitstreamWriter::new(&mut out);
        for (v, b) in [(kind, 2), (0, 1), (1, 1), (time_inc, 5), (1, 1), (1, 1), (0xAB, 8)] {
            w.put(v, b).unwrap();
        }
        w.finish().unwrap();
        out
    }

    #[test]
    fn xvid_gov_header_goes_with_its_own_frame() {
        let vol = vol();
        let setup = StreamSetup::new(StreamType::Xvid).codec_data(vol.clone());
        let mut p = packetizer(setup, &SinkConfig::default());
        let gov_i = [&[0u8, 0, 1, 0xB3, 0x10, 0x20, 0x30][..], &vop(0, 2)[..]].concat();

        assert!(p.process(AccessUnit::from_slice(&vop(0, 0), Some(0))).unwrap().is_empty());
        let first = p.process(AccessUnit::from_slice(&vop(1, 1), Some(40))).unwrap();
        assert_eq!(&first[0][14..], &vol[..]);

        // releases the cached P frame, which starts no GOP
        let mid = p.process(AccessUnit::from_slice(&gov_i, Some(80))).unwrap();
        assert_eq!(mid[0].len(), 14);
        assert_eq!(&mid[1][..], &vop(1, 1)[..]);

        let next = p.process(AccessUnit::from_slice(&vop(1, 3), Some(120))).unwrap();
        assert_eq!(&next[0][14..], &vol[..]);
        assert_eq!(&next[1][..], &gov_i[..]);
        assert_eq!(p.counters().codec_headers, 2);
    }

    #[test]
    fn vc1_advanced_holds_one_frame() {
        let mut p = VideoPacketizer::new(
            CodecConfig::Vc1Advanced { header: None },
            Some(25_000),
            &SinkConfig::default(),
        );
        let frame = [0, 0, 1, 0x0D, 0xC0, 0x00, 0x00];
        assert!(p.process(AccessUnit::from_slice(&frame, Some(0))).unwrap().is_empty());
        assert_eq!(p.process(AccessUnit::from_slice(&frame, Some(40))).unwrap().len(), 2);
        assert_eq!(p.drain().unwrap().len(), 2);
        assert!(p.drain().unwrap().is_empty());
    }
}
