//! MSB-first bit reader and writer used by every codec header parser.
//!
//! Both wrap `bitstream-io` and keep a running bit count, so callers can ask
//! how much of a header is left before committing to an optional field.

use bitstream_io::{BigEndian, BitRead, BitReader, BitWrite, BitWriter};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BitstreamError {
    #[error("wanted {wanted} bits but only {remaining} remain")]
    Exhausted { wanted: u64, remaining: u64 },
    #[error("field of {0} bits is wider than 32")]
    TooWide(u32),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type BitResult<T> = std::result::Result<T, BitstreamError>;

/// Reads big-endian bit fields out of a byte slice.
pub struct BitstreamReader<'a> {
    data: &'a [u8],
    inner: BitReader<&'a [u8], BigEndian>,
    consumed: u64,
}

impl<'a> BitstreamReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            inner: BitReader::endian(data, BigEndian),
            consumed: 0,
        }
    }

    pub fn consumed_bits(&self) -> u64 {
        self.consumed
    }

    pub fn remaining_bits(&self) -> u64 {
        self.data.len() as u64 * 8 - self.consumed
    }

    fn reserve(&mut self, bits: u64) -> BitResult<()> {
        let remaining = self.remaining_bits();
        if bits > remaining {
            return Err(BitstreamError::Exhausted { wanted: bits, remaining });
        }
        self.consumed += bits;
        Ok(())
    }

    /// Reads `bits` (0..=32) as an unsigned value.
    pub fn get(&mut self, bits: u32) -> BitResult<u32> {
        if bits == 0 {
            return Ok(0);
        }
        if bits > 32 {
            return Err(BitstreamError::TooWide(bits));
        }
        self.reserve(bits as u64)?;
        Ok(self.inner.read_var::<u32>(bits)?)
    }

    pub fn flag(&mut self) -> BitResult<bool> {
        Ok(self.get(1)? == 1)
    }

    /// Looks at the next `bits` without consuming them.
    pub fn peek(&self, bits: u32) -> BitResult<u32> {
        let mut probe = BitstreamReader::new(self.data);
        probe.skip_long(self.consumed)?;
        probe.get(bits)
    }

    pub fn skip(&mut self, bits: u32) -> BitResult<()> {
        if bits == 0 {
            return Ok(());
        }
        self.reserve(bits as u64)?;
        Ok(self.inner.skip(bits)?)
    }

    fn skip_long(&mut self, mut bits: u64) -> BitResult<()> {
        while bits > 0 {
            let step = bits.min(u32::MAX as u64) as u32;
            self.skip(step)?;
            bits -= step as u64;
        }
        Ok(())
    }
}

/// Appends big-endian bit fields to a byte vector.
pub struct BitstreamWriter<'a> {
    inner: BitWriter<&'a mut Vec<u8>, BigEndian>,
    written: u64,
}

impl<'a> BitstreamWriter<'a> {
    pub fn new(out: &'a mut Vec<u8>) -> Self {
        Self {
            inner: BitWriter::endian(out, BigEndian),
            written: 0,
        }
    }

    /// Writes the low `bits` (0..=32) of `value`.
    pub fn put(&mut self, value: u32, bits: u32) -> BitResult<()> {
        if bits == 0 {
            return Ok(());
        }
        if bits > 32 {
            return Err(BitstreamError::TooWide(bits));
        }
        let masked = if bits == 32 { value } else { value & ((1u32 << bits) - 1) };
        self.inner.write_var::<u32>(bits, masked)?;
        self.written += bits as u64;
        Ok(())
    }

    pub fn written_bits(&self) -> u64 {
        self.written
    }

    /// Bits still needed to reach the next byte boundary.
    pub fn bits_to_boundary(&self) -> u32 {
        ((8 - self.written % 8) % 8) as u32
    }

    /// Pads with zero bits up to the next byte boundary.
    pub fn finish(mut self) -> BitResult<()> {
        let pad = self.bits_to_boundary();
        self.put(0, pad)?;
        Ok(())
    }
}
