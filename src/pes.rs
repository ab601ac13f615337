//! PES header assembly.
//!
//! A header is rebuilt on the stack for every packet: start prefix, stream
//! id, length field, flag bytes, optional PTS/DTS, then any bytes the
//! packetizer injects ahead of the payload (codec headers, ADTS, framing
//! tags). The length field is written last, once the payload size is known.

use bytes::Bytes;

use crate::config::{OversizePolicy, SinkConfig};
use crate::constants::{
    PES_BASE_HEADER_LEN, PES_HEADER_CAPACITY, PES_MAX_LENGTH_FIELD, PES_START_CODE,
    PES_TIMESTAMP_LEN, PTS_WRAP_THRESHOLD,
};
use crate::error::{Result, SinkError};

/// Timestamp fields of one PES header, in 90 kHz ticks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timestamps {
    None,
    Pts(u64),
    PtsDts { pts: u64, dts: u64 },
}

impl Timestamps {
    /// Picks the header variant for a nanosecond PTS under `config`.
    pub fn for_pts(pts_ns: Option<u64>, config: &SinkConfig) -> Self {
        match pts_ns {
            None => Timestamps::None,
            Some(ns) => {
                let pts = ns_to_ticks(ns);
                if config.hardware.signals_dts() {
                    let dts = pts.wrapping_sub(config.dts_offset_ticks) & (PTS_WRAP_THRESHOLD - 1);
                    Timestamps::PtsDts { pts, dts }
                } else {
                    Timestamps::Pts(pts)
                }
            }
        }
    }

    fn header_data_len(self) -> usize {
        match self {
            Timestamps::None => 0,
            Timestamps::Pts(_) => PES_TIMESTAMP_LEN,
            Timestamps::PtsDts { .. } => 2 * PES_TIMESTAMP_LEN,
        }
    }
}

/// Nanoseconds to the 33-bit 90 kHz clock
pub fn ns_to_ticks(ns: u64) -> u64 {
    ((ns as u128 * 9 / 100_000) as u64) & (PTS_WRAP_THRESHOLD - 1)
}

/// Encodes a 33-bit timestamp with its 4-bit prefix nibble and marker bits.
pub fn encode_timestamp(prefix: u8, ts: u64) -> [u8; 5] {
    [
        (prefix << 4) | ((ts >> 29) & 0x0E) as u8 | 0x01,
        (ts >> 22) as u8,
        ((ts >> 14) & 0xFE) as u8 | 0x01,
        (ts >> 7) as u8,
        ((ts << 1) & 0xFE) as u8 | 0x01,
    ]
}

pub fn decode_timestamp(b: &[u8; 5]) -> u64 {
    ((b[0] as u64 & 0x0E) << 29)
        | ((b[1] as u64) << 22)
        | ((b[2] as u64 & 0xFE) << 14)
        | ((b[3] as u64) << 7)
        | ((b[4] as u64) >> 1)
}

/// Stack-resident PES header under construction
pub struct PesHeader {
    buf: [u8; PES_HEADER_CAPACITY],
    len: usize,
}

impl PesHeader {
    pub fn new(stream_id: u8, timestamps: Timestamps) -> Self {
        let mut buf = [0u8; PES_HEADER_CAPACITY];
        buf[..3].copy_from_slice(&PES_START_CODE);
        buf[3] = stream_id;
        buf[6] = 0x80;
        buf[8] = timestamps.header_data_len() as u8;
        let mut len = PES_BASE_HEADER_LEN;
        match timestamps {
            Timestamps::None => {}
            Timestamps::Pts(pts) => {
                buf[7] = 0x80;
                buf[9..14].copy_from_slice(&encode_timestamp(0x2, pts));
                len += PES_TIMESTAMP_LEN;
            }
            Timestamps::PtsDts { pts, dts } => {
                buf[7] = 0xC0;
                buf[9..14].copy_from_slice(&encode_timestamp(0x3, pts));
                buf[14..19].copy_from_slice(&encode_timestamp(0x1, dts));
                len += 2 * PES_TIMESTAMP_LEN;
            }
        }
        Self { buf, len }
    }

    /// Appends bytes that travel between the header fields and the payload.
    pub fn push(&mut self, bytes: &[u8]) -> Result<()> {
        let end = self.len + bytes.len();
        if end > PES_HEADER_CAPACITY {
            return Err(SinkError::HeaderOverflow { limit: PES_HEADER_CAPACITY });
        }
        self.buf[self.len..end].copy_from_slice(bytes);
        self.len = end;
        Ok(())
    }

    pub fn stream_id(&self) -> u8 {
        self.buf[3]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Largest payload that still fits the 16-bit length field.
    pub fn payload_room(&self) -> usize {
        PES_MAX_LENGTH_FIELD.saturating_sub(self.len - 6)
    }

    /// Writes the length field for `payload_len` trailing bytes.
    pub fn finalize(&mut self, payload_len: usize, policy: OversizePolicy) -> Result<()> {
        let declared = self.len - 6 + payload_len;
        let field = if declared > PES_MAX_LENGTH_FIELD {
            match policy {
                OversizePolicy::ZeroLength => 0,
                OversizePolicy::Split => return Err(SinkError::PayloadTooLarge(declared)),
            }
        } else {
            declared as u16
        };
        self.buf[4..6].copy_from_slice(&field.to_be_bytes());
        Ok(())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HardwareProfile;

    #[test]
    fn untimed_header_is_nine_bytes() {
        let mut h = PesHeader::new(0xE0, Timestamps::None);
        h.finalize(100, OversizePolicy::ZeroLength).unwrap();
        assert_eq!(h.as_bytes(), &[0x00, 0x00, 0x01, 0xE0, 0x00, 103, 0x80, 0x00, 0x00]);
    }

    #[test]
    fn one_second_pts() {
        assert_eq!(ns_to_ticks(1_000_000_000), 90_000);
        let mut h = PesHeader::new(0xC0, Timestamps::Pts(90_000));
        h.finalize(8, OversizePolicy::Split).unwrap();
        assert_eq!(
            h.as_bytes(),
            &[0x00, 0x00, 0x01, 0xC0, 0x00, 0x10, 0x80, 0x80, 0x05, 0x21, 0x00, 0x05, 0xBF, 0x21]
        );
    }

    #[test]
    fn dts_variant_uses_nineteen_bytes() {
        let cfg = SinkConfig {
            hardware: HardwareProfile::DtsRequired,
            ..SinkConfig::default()
        };
        let ts = Timestamps::for_pts(Some(1_000_000_000), &cfg);
        assert_eq!(ts, Timestamps::PtsDts { pts: 90_000, dts: 90_000 });
        let mut h = PesHeader::new(0xE0, ts);
        h.finalize(10, OversizePolicy::ZeroLength).unwrap();
        let b = h.as_bytes();
        assert_eq!(b.len(), 19);
        assert_eq!(u16::from_be_bytes([b[4], b[5]]), 10 + 13);
        assert_eq!(b[7], 0xC0);
        assert_eq!(b[8], 10);
        assert_eq!(b[9] >> 4, 0x3);
        assert_eq!(b[14] >> 4, 0x1);
    }

    #[test]
    fn timestamps_survive_all_33_bits() {
        for ts in [0u64, 1, 90_000, 0x1_2345_6789, PTS_WRAP_THRESHOLD - 1] {
            assert_eq!(decode_timestamp(&encode_timestamp(0x2, ts)), ts);
        }
    }

    #[test]
    fn oversize_policies() {
        let mut video = PesHeader::new(0xE0, Timestamps::Pts(0));
        video.finalize(0x10000, OversizePolicy::ZeroLength).unwrap();
        assert_eq!(&video.as_bytes()[4..6], &[0, 0]);

        let mut audio = PesHeader::new(0xC0, Timestamps::Pts(0));
        assert_eq!(audio.payload_room(), 0xFFFF - 8);
        assert!(matches!(
            audio.finalize(0xFFFF, OversizePolicy::Split),
            Err(SinkError::PayloadTooLarge(_))
        ));
    }

    #[test]
    fn injected_bytes_count_toward_length() {
        let mut h = PesHeader::new(0xE0, Timestamps::None);
        h.push(&[0xAA; 20]).unwrap();
        h.finalize(5, OversizePolicy::ZeroLength).unwrap();
        assert_eq!(h.len(), 29);
        assert_eq!(u16::from_be_bytes([h.as_bytes()[4], h.as_bytes()[5]]), 3 + 20 + 5);
        assert!(h.push(&[0u8; PES_HEADER_CAPACITY]).is_err());
    }
}
