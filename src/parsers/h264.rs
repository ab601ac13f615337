//! H.264 avcC decoding and NAL length-prefix rewriting.
//!
//! Container-delivered H.264 prefixes every NAL unit with a 1 to 4 byte
//! big-endian length. The decoder wants Annex-B, so each prefix becomes
//! `00 00 01`. With 3 and 4 byte prefixes the rewrite happens inside the
//! access unit itself; with 1 and 2 byte prefixes the output is longer than
//! the input and goes to a bounded scratch buffer instead.

use bytes::BytesMut;
use tracing::{debug, warn};

use crate::constants::PES_START_CODE;
use crate::error::{Result, SinkError};

/// Decoded `AVCDecoderConfigurationRecord`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvcConfig {
    pub profile_idc: u8,
    pub level_idc: u8,
    pub nal_length_size: u8,
    pub sps: Vec<Vec<u8>>,
    pub pps: Vec<Vec<u8>>,
}

impl AvcConfig {
    /// SPS and PPS units as an Annex-B byte string.
    pub fn annex_b_header(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for nal in self.sps.iter().chain(self.pps.iter()) {
            out.extend_from_slice(&PES_START_CODE);
            out.extend_from_slice(nal);
        }
        out
    }
}

fn take_units(data: &[u8], pos: &mut usize, count: usize) -> Option<Vec<Vec<u8>>> {
    let mut units = Vec::with_capacity(count);
    for _ in 0..count {
        let len = u16::from_be_bytes([*data.get(*pos)?, *data.get(*pos + 1)?]) as usize;
        *pos += 2;
        units.push(data.get(*pos..*pos + len)?.to_vec());
        *pos += len;
    }
    Some(units)
}

/// Parses avcC codec data; `None` when it is not a version 1 record.
pub fn parse_avcc(data: &[u8]) -> Option<AvcConfig> {
    if data.len() < 7 || data[0] != 1 {
        return None;
    }
    let nal_length_size = (data[4] & 0x03) + 1;
    let mut pos = 5;
    let sps_count = (data[pos] & 0x1F) as usize;
    pos += 1;
    let sps = take_units(data, &mut pos, sps_count)?;
    let pps_count = *data.get(pos)? as usize;
    pos += 1;
    let pps = take_units(data, &mut pos, pps_count)?;
    debug!(
        nal_length_size,
        sps = sps.len(),
        pps = pps.len(),
        "parsed avcC"
    );
    Some(AvcConfig {
        profile_idc: data[1],
        level_idc: data[3],
        nal_length_size,
        sps,
        pps,
    })
}

fn read_length(data: &[u8], pos: usize, size: usize) -> Result<usize> {
    let prefix = data
        .get(pos..pos + size)
        .ok_or(SinkError::MalformedNal { offset: pos })?;
    Ok(prefix.iter().fold(0usize, |acc, &b| (acc << 8) | b as usize))
}

/// Rewrites 3 or 4 byte length prefixes to start codes inside `data`.
///
/// The buffer is modified in place and, for 4-byte prefixes, shrinks by one
/// byte per NAL unit. On error the contents are unspecified and the unit
/// must be dropped.
pub fn rewrite_in_place(data: &mut BytesMut, nal_length_size: usize) -> Result<usize> {
    debug_assert!(nal_length_size == 3 || nal_length_size == 4);
    let total = data.len();
    let mut read = 0;
    let mut write = 0;
    let mut units = 0;
    while read < total {
        let len = read_length(data, read, nal_length_size)?;
        let body = read + nal_length_size;
        if body + len > total {
            warn!(offset = read, len, total, "NAL unit runs past the access unit");
            return Err(SinkError::MalformedNal { offset: read });
        }
        data[write..write + 3].copy_from_slice(&PES_START_CODE);
        write += 3;
        if write != body {
            data.copy_within(body..body + len, write);
        }
        write += len;
        read = body + len;
        units += 1;
    }
    data.truncate(write);
    Ok(units)
}

/// Rewrites 1 or 2 byte length prefixes into `scratch`, which must not grow
/// past `capacity`.
pub fn rewrite_into(
    src: &[u8],
    nal_length_size: usize,
    scratch: &mut BytesMut,
    capacity: usize,
) -> Result<usize> {
    scratch.clear();
    let mut read = 0;
    let mut units = 0;
    while read < src.len() {
        let len = read_length(src, read, nal_length_size)?;
        let body = read + nal_length_size;
        if body + len > src.len() {
            return Err(SinkError::MalformedNal { offset: read });
        }
        let needed = scratch.len() + 3 + len;
        if needed > capacity {
            return Err(SinkError::ScratchOverflow { needed, capacity });
        }
        scratch.extend_from_slice(&PES_START_CODE);
        scratch.extend_from_slice(&src[body..body + len]);
        read = body + len;
        units += 1;
    }
    Ok(units)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn length_prefixed(units: &[&[u8]], size: usize) -> Vec<u8> {
        let mut out = Vec::new();
        for u in units {
            let len = (u.len() as u32).to_be_bytes();
            out.extend_from_slice(&len[4 - size..]);
            out.extend_from_slice(u);
        }
        out
    }

    fn annex_b(units: &[&[u8]]) -> Vec<u8> {
        units.iter().flat_map(|u| [0u8, 0, 1].into_iter().chain(u.iter().copied())).collect()
    }

    #[test]
    fn four_byte_prefixes_shrink_by_one_per_unit() {
        let units: [&[u8]; 3] = [&[0x09, 0xF0], &[0x67, 0x42, 0x00, 0x1E], &[0x65; 300]];
        let src = length_prefixed(&units, 4);
        let mut buf = BytesMut::from(&src[..]);
        assert_eq!(rewrite_in_place(&mut buf, 4).unwrap(), 3);
        assert_eq!(&buf[..], &annex_b(&units)[..]);
        assert_eq!(buf.len(), src.len() - 3);
    }

    #[test]
    fn three_byte_prefixes_keep_length() {
        let units: [&[u8]; 2] = [&[0x41, 0x9A], &[0x41, 0x9B, 0x00]];
        let src = length_prefixed(&units, 3);
        let mut buf = BytesMut::from(&src[..]);
        rewrite_in_place(&mut buf, 3).unwrap();
        assert_eq!(&buf[..], &annex_b(&units)[..]);
    }

    #[test]
    fn short_prefixes_go_through_scratch() {
        let units: [&[u8]; 2] = [&[0x67, 1, 2], &[0x68, 3]];
        let mut scratch = BytesMut::new();
        for size in [1, 2] {
            let src = length_prefixed(&units, size);
            assert_eq!(rewrite_into(&src, size, &mut scratch, 1024).unwrap(), 2);
            assert_eq!(&scratch[..], &annex_b(&units)[..]);
        }
    }

    #[test]
    fn scratch_overflow_is_reported() {
        let big = vec![0x65u8; 200];
        let src = length_prefixed(&[&big[..], &big[..]], 1);
        let mut scratch = BytesMut::new();
        match rewrite_into(&src, 1, &mut scratch, 300) {
            Err(SinkError::ScratchOverflow { needed: 406, capacity: 300 }) => {}
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn truncated_unit_is_malformed() {
        let mut buf = BytesMut::from(&[0u8, 0, 0, 9, 0x65, 0x88][..]);
        assert!(matches!(
            rewrite_in_place(&mut buf, 4),
            Err(SinkError::MalformedNal { offset: 0 })
        ));
    }

    #[test]
    fn avcc_record() {
        let data = [
            0x01, 0x42, 0xC0, 0x1E, 0xFF, 0xE1, 0x00, 0x04, 0x67, 0x42, 0xC0, 0x1E, 0x01, 0x00,
            0x02, 0x68, 0xCE,
        ];
        let cfg = parse_avcc(&data).unwrap();
        assert_eq!(cfg.nal_length_size, 4);
        assert_eq!(cfg.level_idc, 0x1E);
        assert_eq!(
            cfg.annex_b_header(),
            vec![0, 0, 1, 0x67, 0x42, 0xC0, 0x1E, 0, 0, 1, 0x68, 0xCE]
        );
        assert!(parse_avcc(&[0, 0, 0, 1, 0x67]).is_none());
        assert!(parse_avcc(&data[..10]).is_none());
    }
}
