//! VC-1 advanced profile header parsing.
//!
//! The parser follows the start-code layers of the stream (sequence header,
//! entry point, frame) and classifies every frame so B-frame timestamps can
//! be fixed up one frame later.

use tracing::{debug, trace, warn};

use crate::bitstream::{BitResult, BitstreamReader};
use crate::constants::{VC1_ENTRY_POINT, VC1_FRAME, VC1_SEQUENCE_HEADER};
use crate::parsers::utils::{begins_with_start_code, remove_emulation_prevention, start_codes};

/// Frame headers are short; only this much is unescaped before parsing.
const FRAME_HEADER_WINDOW: usize = 64;

const FRAMERATE_NR: [u32; 7] = [24, 25, 30, 50, 60, 48, 72];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    I,
    P,
    B,
    BI,
    Skipped,
}

impl FrameType {
    pub fn is_reference(self) -> bool {
        matches!(self, FrameType::I | FrameType::P | FrameType::Skipped)
    }
}

/// B-frame position between its references; denominator 0 marks an invalid code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BFraction {
    pub numerator: u8,
    pub denominator: u8,
}

impl BFraction {
    pub const INVALID: BFraction = BFraction { numerator: 0, denominator: 0 };

    pub fn is_valid(self) -> bool {
        self.denominator != 0
    }

    /// Number of B-frames grouped with the following reference frame
    pub fn b_frame_count(self) -> u32 {
        (self.denominator as u32).saturating_sub(1)
    }
}

const SHORT_FRACTIONS: [(u8, u8); 7] = [(1, 2), (1, 3), (2, 3), (1, 4), (3, 4), (1, 5), (2, 5)];
const LONG_FRACTIONS: [(u8, u8); 13] = [
    (3, 5), (4, 5), (1, 6), (5, 6), (1, 7), (2, 7), (3, 7), (4, 7), (5, 7), (1, 8), (3, 8), (5, 8), (7, 8),
];

/// Decodes the BFRACTION variable-length code.
pub fn read_bfraction(r: &mut BitstreamReader) -> BitResult<BFraction> {
    let short = r.get(3)? as usize;
    if short < 7 {
        let (numerator, denominator) = SHORT_FRACTIONS[short];
        return Ok(BFraction { numerator, denominator });
    }
    let long = r.get(4)? as usize;
    Ok(LONG_FRACTIONS
        .get(long)
        .map(|&(numerator, denominator)| BFraction { numerator, denominator })
        .unwrap_or(BFraction::INVALID))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SequenceHeader {
    pub profile: u8,
    pub level: u8,
    pub max_coded_width: u16,
    pub max_coded_height: u16,
    pub pulldown: bool,
    pub interlace: bool,
    pub tfcntr_flag: bool,
    pub finterp_flag: bool,
    pub psf: bool,
    pub display_size: Option<(u16, u16)>,
    pub framerate_mhz: Option<u32>,
    pub hrd_leaky_buckets: Option<u8>,
}

pub fn parse_sequence_header(body: &[u8]) -> BitResult<SequenceHeader> {
    let rbsp = remove_emulation_prevention(body);
    let mut r = BitstreamReader::new(&rbsp);
    let mut seq = SequenceHeader {
        profile: r.get(2)? as u8,
        level: r.get(3)? as u8,
        ..SequenceHeader::default()
    };
    r.skip(2 + 3 + 5 + 1)?; // COLORDIFF_FORMAT, FRMRTQ/BITRTQ_POSTPROC, POSTPROCFLAG
    seq.max_coded_width = (r.get(12)? as u16 + 1) * 2;
    seq.max_coded_height = (r.get(12)? as u16 + 1) * 2;
    seq.pulldown = r.flag()?;
    seq.interlace = r.flag()?;
    seq.tfcntr_flag = r.flag()?;
    seq.finterp_flag = r.flag()?;
    r.skip(1)?; // reserved
    seq.psf = r.flag()?;
    if r.flag()? {
        let w = r.get(14)? as u16 + 1;
        let h = r.get(14)? as u16 + 1;
        seq.display_size = Some((w, h));
        if r.flag()? && r.get(4)? == 15 {
            r.skip(16)?; // ASPECT_HORIZ_SIZE, ASPECT_VERT_SIZE
        }
        if r.flag()? {
            seq.framerate_mhz = if r.flag()? {
                let exp = r.get(16)?;
                Some((exp + 1) * 1000 / 32)
            } else {
                let nr = r.get(8)? as usize;
                let dr = r.get(4)?;
                let rate = nr.checked_sub(1).and_then(|i| FRAMERATE_NR.get(i));
                let divisor = match dr {
                    1 => Some(1000),
                    2 => Some(1001),
                    _ => None,
                };
                rate.zip(divisor).map(|(&fps, d)| fps * 1_000_000 / d)
            };
        }
        if r.flag()? {
            r.skip(24)?; // COLOR_PRIM, TRANSFER_CHAR, MATRIX_COEF
        }
    }
    if r.flag()? {
        let buckets = r.get(5)? as u8;
        r.skip(8)?; // BIT_RATE_EXPONENT, BUFFER_SIZE_EXPONENT
        for _ in 0..buckets {
            r.skip(32)?;
        }
        seq.hrd_leaky_buckets = Some(buckets);
    }
    Ok(seq)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryPointHeader {
    pub broken_link: bool,
    pub closed_entry: bool,
    pub panscan_flag: bool,
    pub refdist_flag: bool,
    pub extended_mv: bool,
    pub coded_size: Option<(u16, u16)>,
}

pub fn parse_entry_point(body: &[u8], seq: &SequenceHeader) -> BitResult<EntryPointHeader> {
    let rbsp = remove_emulation_prevention(body);
    let mut r = BitstreamReader::new(&rbsp);
    let mut ep = EntryPointHeader {
        broken_link: r.flag()?,
        closed_entry: r.flag()?,
        panscan_flag: r.flag()?,
        refdist_flag: r.flag()?,
        ..EntryPointHeader::default()
    };
    r.skip(2)?; // LOOPFILTER, FASTUVMC
    ep.extended_mv = r.flag()?;
    r.skip(2 + 1 + 1 + 2)?; // DQUANT, VSTRANSFORM, OVERLAP, QUANTIZER
    if let Some(buckets) = seq.hrd_leaky_buckets {
        r.skip(8 * buckets as u32)?;
    }
    if r.flag()? {
        let w = (r.get(12)? as u16 + 1) * 2;
        let h = (r.get(12)? as u16 + 1) * 2;
        ep.coded_size = Some((w, h));
    }
    if ep.extended_mv {
        r.skip(1)?;
    }
    for _ in 0..2 {
        if r.flag()? {
            r.skip(3)?; // RANGE_MAPY / RANGE_MAPUV
        }
    }
    Ok(ep)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub frame_type: FrameType,
    pub bfraction: Option<BFraction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameCoding {
    Progressive,
    FrameInterlace,
    FieldInterlace,
}

fn read_ptype(r: &mut BitstreamReader) -> BitResult<FrameType> {
    for ty in [FrameType::P, FrameType::B, FrameType::I, FrameType::BI] {
        if !r.flag()? {
            return Ok(ty);
        }
    }
    Ok(FrameType::Skipped)
}

pub fn parse_frame_header(
    body: &[u8],
    seq: &SequenceHeader,
    ep: &EntryPointHeader,
) -> BitResult<FrameHeader> {
    let window = &body[..body.len().min(FRAME_HEADER_WINDOW)];
    let rbsp = remove_emulation_prevention(window);
    let mut r = BitstreamReader::new(&rbsp);

    let fcm = if !seq.interlace || !r.flag()? {
        FrameCoding::Progressive
    } else if !r.flag()? {
        FrameCoding::FrameInterlace
    } else {
        FrameCoding::FieldInterlace
    };

    let (frame_type, field_types) = if fcm == FrameCoding::FieldInterlace {
        let fptype = r.get(3)?;
        let first = match fptype {
            0 | 1 => FrameType::I,
            2 | 3 => FrameType::P,
            4 | 5 => FrameType::B,
            _ => FrameType::BI,
        };
        (first, Some(fptype))
    } else {
        (read_ptype(&mut r)?, None)
    };
    if frame_type == FrameType::Skipped {
        return Ok(FrameHeader { frame_type, bfraction: None });
    }

    if seq.tfcntr_flag {
        r.skip(8)?;
    }
    let mut repeat = 0;
    if seq.pulldown {
        if !seq.interlace || seq.psf {
            repeat = r.get(2)?;
        } else {
            r.skip(1)?; // TFF
            repeat = r.get(1)?;
        }
    }
    if ep.panscan_flag && r.flag()? {
        let windows = if seq.interlace && !seq.psf {
            2 + if seq.pulldown { repeat } else { 0 }
        } else {
            1 + if seq.pulldown { repeat } else { 0 }
        };
        for _ in 0..windows {
            r.skip(32)?;
            r.skip(32)?;
        }
    }
    r.skip(1)?; // RNDCTRL
    if seq.interlace {
        r.skip(1)?; // UVSAMP
    }
    if seq.finterp_flag && fcm == FrameCoding::Progressive {
        r.skip(1)?; // INTERPFRM
    }
    if let Some(fptype) = field_types {
        if ep.refdist_flag && fptype < 4 && r.get(2)? == 3 {
            while r.flag()? {}
        }
    }
    let has_bfraction = match field_types {
        Some(fptype) => (4..=6).contains(&fptype),
        None => frame_type == FrameType::B,
    };
    let bfraction = if has_bfraction { Some(read_bfraction(&mut r)?) } else { None };
    Ok(FrameHeader { frame_type, bfraction })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderState {
    AwaitingSequenceHeader,
    AwaitingEntryPoint,
    InFrameStream,
}

/// Tracks the header layers of one VC-1 advanced profile stream
#[derive(Debug)]
pub struct Vc1HeaderParser {
    state: HeaderState,
    seq: Option<SequenceHeader>,
    entry: Option<EntryPointHeader>,
    parse_errors: u64,
}

impl Default for Vc1HeaderParser {
    fn default() -> Self {
        Self::new()
    }
}

impl Vc1HeaderParser {
    pub fn new() -> Self {
        Self {
            state: HeaderState::AwaitingSequenceHeader,
            seq: None,
            entry: None,
            parse_errors: 0,
        }
    }

    pub fn state(&self) -> HeaderState {
        self.state
    }

    pub fn sequence_header(&self) -> Option<&SequenceHeader> {
        self.seq.as_ref()
    }

    pub fn entry_point(&self) -> Option<&EntryPointHeader> {
        self.entry.as_ref()
    }

    pub fn parse_errors(&self) -> u64 {
        self.parse_errors
    }

    fn misaligned(&mut self, found: u8) {
        self.parse_errors += 1;
        warn!(state = ?self.state, code = found, "misaligned VC-1 start code");
    }

    /// Consumes one buffer of stream data and returns the header of the frame
    /// it carries, if any.
    ///
    /// Data that does not open with a start code is treated as a bare frame.
    pub fn feed(&mut self, data: &[u8]) -> Option<FrameHeader> {
        if !begins_with_start_code(data) {
            return self.frame(VC1_FRAME, data);
        }
        let codes: Vec<_> = start_codes(data).collect();
        let mut frame = None;
        for (i, sc) in codes.iter().enumerate() {
            let end = codes.get(i + 1).map_or(data.len(), |next| next.offset);
            let body = &data[sc.body().min(end)..end];
            match sc.code {
                VC1_SEQUENCE_HEADER => match parse_sequence_header(body) {
                    Ok(seq) => {
                        debug!(?seq, "VC-1 sequence header");
                        if seq.profile != 3 {
                            warn!(profile = seq.profile, "sequence header is not advanced profile");
                        }
                        self.seq = Some(seq);
                        self.entry = None;
                        self.state = HeaderState::AwaitingEntryPoint;
                    }
                    Err(e) => {
                        self.parse_errors += 1;
                        warn!(error = %e, "bad VC-1 sequence header");
                    }
                },
                VC1_ENTRY_POINT => {
                    if self.state == HeaderState::AwaitingSequenceHeader {
                        self.misaligned(sc.code);
                    }
                    let seq = self.seq.clone().unwrap_or_default();
                    match parse_entry_point(body, &seq) {
                        Ok(ep) => {
                            trace!(?ep, "VC-1 entry point");
                            self.entry = Some(ep);
                        }
                        Err(e) => {
                            self.parse_errors += 1;
                            warn!(error = %e, "bad VC-1 entry point");
                        }
                    }
                }
                VC1_FRAME if frame.is_none() => frame = self.frame(sc.code, body),
                _ => {}
            }
        }
        frame
    }

    fn frame(&mut self, code: u8, body: &[u8]) -> Option<FrameHeader> {
        match self.state {
            HeaderState::InFrameStream => {}
            HeaderState::AwaitingEntryPoint if self.entry.is_some() => {
                self.state = HeaderState::InFrameStream;
            }
            _ => self.misaligned(code),
        }
        let seq = self.seq.clone().unwrap_or_default();
        let ep = self.entry.clone().unwrap_or_default();
        match parse_frame_header(body, &seq, &ep) {
            Ok(header) => Some(header),
            Err(e) => {
                self.parse_errors += 1;
                warn!(error = %e, "bad VC-1 frame header");
                None
            }
        }
    }
}
