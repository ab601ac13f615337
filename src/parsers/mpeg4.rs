//! MPEG-4 part 2 (XviD / DivX) header fields needed for bitstream packing.

use tracing::trace;

use crate::bitstream::{BitResult, BitstreamReader, BitstreamWriter};
use crate::constants::{MPEG4_USER_DATA, MPEG4_VOL_FIRST, MPEG4_VOL_LAST, MPEG4_VOP, PES_START_CODE};
use crate::parsers::utils::start_codes;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VopCodingType {
    I,
    P,
    B,
    /// Sprite (GMC) VOP
    S,
}

impl VopCodingType {
    fn from_bits(bits: u32) -> Self {
        match bits & 0x3 {
            0 => VopCodingType::I,
            1 => VopCodingType::P,
            2 => VopCodingType::B,
            _ => VopCodingType::S,
        }
    }

    pub fn is_reference(self) -> bool {
        matches!(self, VopCodingType::I | VopCodingType::P)
    }
}

impl std::fmt::Display for VopCodingType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            VopCodingType::I => "I",
            VopCodingType::P => "P",
            VopCodingType::B => "B",
            VopCodingType::S => "S",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolHeader {
    pub time_increment_resolution: u16,
    /// Width of the `vop_time_increment` field
    pub time_inc_bits: u32,
}

/// Bits needed to count up to `resolution - 1`, at least one.
pub fn time_inc_bits(resolution: u16) -> u32 {
    let max = resolution.saturating_sub(1);
    (u16::BITS - max.leading_zeros()).max(1)
}

pub fn parse_vol(body: &[u8]) -> BitResult<VolHeader> {
    let mut r = BitstreamReader::new(body);
    r.skip(1 + 8)?; // random_accessible_vol, video_object_type_indication
    let mut verid = 1;
    if r.flag()? {
        verid = r.get(4)?;
        r.skip(3)?; // video_object_layer_priority
    }
    if r.get(4)? == 15 {
        r.skip(16)?; // par_width, par_height
    }
    if r.flag()? {
        r.skip(2 + 1)?; // chroma_format, low_delay
        if r.flag()? {
            r.skip(79)?; // vbv parameters
        }
    }
    let shape = r.get(2)?;
    if shape == 3 && verid != 1 {
        r.skip(4)?; // video_object_layer_shape_extension
    }
    r.skip(1)?; // marker
    let resolution = r.get(16)? as u16;
    Ok(VolHeader {
        time_increment_resolution: resolution,
        time_inc_bits: time_inc_bits(resolution),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VopHeader {
    pub coding_type: VopCodingType,
    pub time_inc: u32,
    /// `false` for an N-VOP (vop_coded = 0)
    pub coded: bool,
}

pub fn parse_vop(body: &[u8], time_inc_bits: u32) -> BitResult<VopHeader> {
    let mut r = BitstreamReader::new(body);
    let coding_type = VopCodingType::from_bits(r.get(2)?);
    while r.flag()? {} // modulo_time_base
    r.skip(1)?;
    let time_inc = r.get(time_inc_bits)?;
    r.skip(1)?;
    let coded = r.flag()?;
    Ok(VopHeader { coding_type, time_inc, coded })
}

/// Builds a not-coded P-VOP carrying `time_inc`.
pub fn build_nvop(time_inc: u32, time_inc_bits: u32) -> BitResult<Vec<u8>> {
    let mut out = PES_START_CODE.to_vec();
    out.push(MPEG4_VOP);
    let mut w = BitstreamWriter::new(&mut out);
    w.put(0b01, 2)?; // P
    w.put(0, 1)?; // modulo_time_base
    w.put(1, 1)?; // marker
    w.put(time_inc, time_inc_bits)?;
    w.put(1, 1)?; // marker
    w.put(0, 1)?; // vop_coded
    // stuffing: a zero then ones to the byte boundary, a full 0x7F if aligned
    let pad = w.bits_to_boundary();
    if pad == 0 {
        w.put(0x7F, 8)?;
    } else {
        w.put(0x7F >> (8 - pad), pad)?;
    }
    w.finish()?;
    Ok(out)
}

/// Recognises "DivX<ver><b|B><build><p|P>", the tag of an already packed stream.
pub fn is_packed_divx_tag(user_data: &[u8]) -> bool {
    user_data
        .windows(4)
        .enumerate()
        .filter(|(_, w)| *w == b"DivX")
        .any(|(i, _)| packed_suffix(&user_data[i + 4..]))
}

fn packed_suffix(rest: &[u8]) -> bool {
    let digits = |s: &[u8]| s.iter().take_while(|b| b.is_ascii_digit()).count();
    let ver = digits(rest);
    if ver == 0 || !matches!(rest.get(ver), Some(b'b' | b'B')) {
        return false;
    }
    let rest = &rest[ver + 1..];
    let build = digits(rest);
    build > 0 && matches!(rest.get(build), Some(b'p' | b'P'))
}

/// What a scan of one access unit found
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Mpeg4Scan {
    pub vol: Option<VolHeader>,
    pub vop_offset: Option<usize>,
    pub packed_tag: bool,
}

/// Looks for VOL, user data and the first VOP in `data`.
pub fn scan(data: &[u8]) -> Mpeg4Scan {
    let mut found = Mpeg4Scan::default();
    let codes: Vec<_> = start_codes(data).collect();
    for (i, sc) in codes.iter().enumerate() {
        let end = codes.get(i + 1).map_or(data.len(), |next| next.offset);
        let body = &data[sc.body().min(end)..end];
        match sc.code {
            MPEG4_VOL_FIRST..=MPEG4_VOL_LAST if found.vol.is_none() => {
                found.vol = parse_vol(body).ok();
                trace!(vol = ?found.vol, "MPEG-4 VOL");
            }
            MPEG4_USER_DATA => found.packed_tag |= is_packed_divx_tag(body),
            MPEG4_VOP => {
                found.vop_offset = Some(sc.offset);
                break;
            }
            _ => {}
        }
    }
    found
}
