//! MPEG-4 AudioSpecificConfig decoding and ADTS header synthesis.

use tracing::{debug, warn};

use crate::bitstream::{BitResult, BitstreamReader, BitstreamWriter};
use crate::constants::{
    AAC_ESCAPE_OBJECT_TYPE, AAC_ESCAPE_RATE_INDEX, AAC_PS_SYNC, AAC_SAMPLE_RATES, AAC_SBR_SYNC,
    ADTS_HEADER_LEN, ADTS_MAX_FRAME_LEN,
};

const OBJECT_TYPE_SBR: u8 = 5;
const OBJECT_TYPE_PS: u8 = 29;

/// Decoded AudioSpecificConfig
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpecificConfig {
    pub object_type: u8,
    pub rate_index: u8,
    pub channel_config: u8,
    /// Extension object type, 5 when SBR was signalled anywhere
    pub extension_object_type: Option<u8>,
    pub extension_rate_index: Option<u8>,
    pub sbr: bool,
    pub ps: bool,
    /// Set when the input ran out before every field was read
    pub truncated: bool,
}

impl Default for AudioSpecificConfig {
    fn default() -> Self {
        Self {
            object_type: 0,
            rate_index: AAC_ESCAPE_RATE_INDEX,
            channel_config: 0,
            extension_object_type: None,
            extension_rate_index: None,
            sbr: false,
            ps: false,
            truncated: false,
        }
    }
}

impl AudioSpecificConfig {
    pub fn extension_present(&self) -> bool {
        self.extension_object_type.is_some()
    }

    /// Two-bit ADTS profile for this object type
    pub fn adts_profile(&self) -> u8 {
        match self.object_type {
            1..=4 => self.object_type - 1,
            OBJECT_TYPE_SBR => 1,
            other => {
                warn!(object_type = other, "object type has no ADTS profile, signalling AAC-LC");
                1
            }
        }
    }
}

/// Nearest index in the standard rate table
pub fn rate_index_for(rate: u32) -> u8 {
    let mut best = 0usize;
    let mut best_delta = u32::MAX;
    for (idx, &std_rate) in AAC_SAMPLE_RATES.iter().enumerate() {
        if std_rate == 0 {
            break;
        }
        let delta = std_rate.abs_diff(rate);
        if delta < best_delta {
            best = idx;
            best_delta = delta;
        }
    }
    if best_delta != 0 {
        debug!(rate, mapped = AAC_SAMPLE_RATES[best], "non-standard AAC sample rate");
    }
    best as u8
}

pub fn sample_rate(index: u8) -> Option<u32> {
    AAC_SAMPLE_RATES
        .get(index as usize)
        .copied()
        .filter(|&r| r != 0)
}

fn object_type(r: &mut BitstreamReader) -> BitResult<u8> {
    let mut ot = r.get(5)? as u8;
    if ot == AAC_ESCAPE_OBJECT_TYPE {
        ot = 32 + r.get(6)? as u8;
    }
    Ok(ot)
}

/// Returns the index and, for the escape value, the explicit rate.
fn rate(r: &mut BitstreamReader) -> BitResult<(u8, Option<u32>)> {
    let idx = r.get(4)? as u8;
    if idx == AAC_ESCAPE_RATE_INDEX {
        return Ok((idx, Some(r.get(24)?)));
    }
    Ok((idx, None))
}

/// Decodes an AudioSpecificConfig.
///
/// Never fails: malformed or short input leaves the remaining fields at
/// their defaults and sets `truncated`.
pub fn parse_audio_specific_config(data: &[u8]) -> AudioSpecificConfig {
    let mut cfg = AudioSpecificConfig::default();
    let mut explicit = (None, None);
    let mut r = BitstreamReader::new(data);
    if let Err(e) = read_config(&mut r, &mut cfg, &mut explicit) {
        debug!(error = %e, "AudioSpecificConfig ended early");
        cfg.truncated = true;
    }
    if cfg.rate_index == AAC_ESCAPE_RATE_INDEX {
        cfg.rate_index = explicit.0.map(rate_index_for).unwrap_or(AAC_ESCAPE_RATE_INDEX);
    }
    if cfg.extension_rate_index == Some(AAC_ESCAPE_RATE_INDEX) {
        cfg.extension_rate_index = explicit.1.map(rate_index_for);
    }
    cfg
}

fn read_config(
    r: &mut BitstreamReader,
    cfg: &mut AudioSpecificConfig,
    explicit: &mut (Option<u32>, Option<u32>),
) -> BitResult<()> {
    cfg.object_type = object_type(r)?;
    let (idx, rate_hz) = rate(r)?;
    cfg.rate_index = idx;
    explicit.0 = rate_hz;
    cfg.channel_config = r.get(4)? as u8;

    if cfg.object_type == OBJECT_TYPE_SBR || cfg.object_type == OBJECT_TYPE_PS {
        cfg.extension_object_type = Some(OBJECT_TYPE_SBR);
        cfg.sbr = true;
        cfg.ps = cfg.object_type == OBJECT_TYPE_PS;
        let (ext_idx, ext_hz) = rate(r)?;
        cfg.extension_rate_index = Some(ext_idx);
        explicit.1 = ext_hz;
        cfg.object_type = object_type(r)?;
    }

    match cfg.object_type {
        1..=4 | 6 | 7 | 17 | 19..=23 => skip_ga_specific(r, cfg.object_type)?,
        _ => {}
    }

    if matches!(cfg.object_type, 17 | 19..=27) {
        let ep_config = r.get(2)?;
        if ep_config == 2 || ep_config == 3 {
            r.skip(1)?;
        }
    }

    if cfg.extension_object_type != Some(OBJECT_TYPE_SBR) && r.remaining_bits() >= 16 {
        probe_backward_compatible_sbr(r, cfg, explicit)?;
    }
    Ok(())
}

fn skip_ga_specific(r: &mut BitstreamReader, object_type: u8) -> BitResult<()> {
    r.skip(1)?; // frameLengthFlag
    if r.flag()? {
        r.skip(14)?; // coreCoderDelay
    }
    let extension_flag = r.flag()?;
    if object_type == 6 || object_type == 20 {
        r.skip(3)?; // layerNr
    }
    if extension_flag {
        match object_type {
            22 => r.skip(16)?, // numOfSubFrame + layer_length
            17 | 19 | 20 | 23 => r.skip(3)?, // resilience flags
            _ => {}
        }
        r.skip(1)?; // extensionFlag3
    }
    Ok(())
}

fn probe_backward_compatible_sbr(
    r: &mut BitstreamReader,
    cfg: &mut AudioSpecificConfig,
    explicit: &mut (Option<u32>, Option<u32>),
) -> BitResult<()> {
    if r.get(11)? != AAC_SBR_SYNC {
        return Ok(());
    }
    let nested = object_type(r)?;
    if nested != OBJECT_TYPE_SBR {
        return Ok(());
    }
    cfg.sbr = r.flag()?;
    if cfg.sbr {
        cfg.extension_object_type = Some(OBJECT_TYPE_SBR);
        let (ext_idx, ext_hz) = rate(r)?;
        cfg.extension_rate_index = Some(ext_idx);
        explicit.1 = ext_hz;
        if r.remaining_bits() >= 12 && r.get(11)? == AAC_PS_SYNC {
            cfg.ps = r.flag()?;
        }
        cfg.object_type = nested;
    }
    Ok(())
}

/// Per-stream ADTS parameters; only the frame length changes per frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdtsTemplate {
    pub profile: u8,
    pub rate_index: u8,
    pub channel_config: u8,
    /// ID bit set: MPEG-2 AAC
    pub mpeg2: bool,
}

impl AdtsTemplate {
    pub fn from_config(cfg: &AudioSpecificConfig, mpeg2: bool) -> Self {
        let profile = if cfg.object_type == 0 {
            warn!("AudioSpecificConfig unreadable, falling back to AAC-LC");
            1
        } else {
            cfg.adts_profile()
        };
        Self {
            profile,
            rate_index: cfg.rate_index,
            channel_config: cfg.channel_config,
            mpeg2,
        }
    }

    /// AAC-LC at the given rate and channel count
    pub fn from_rate(rate: u32, channels: u8, mpeg2: bool) -> Self {
        Self {
            profile: 1,
            rate_index: rate_index_for(rate),
            channel_config: channels,
            mpeg2,
        }
    }

    /// Header for a frame whose raw payload is `payload_len` bytes.
    pub fn header(&self, payload_len: usize) -> Option<[u8; ADTS_HEADER_LEN]> {
        let size = payload_len + ADTS_HEADER_LEN;
        if size > ADTS_MAX_FRAME_LEN {
            return None;
        }
        let mut out = Vec::with_capacity(ADTS_HEADER_LEN);
        let mut w = BitstreamWriter::new(&mut out);
        let fields: [(u32, u32); 15] = [
            (0xFFF, 12),                        // syncword
            (self.mpeg2 as u32, 1),             // ID
            (0, 2),                             // layer
            (1, 1),                             // protection_absent
            (self.profile as u32, 2),
            (self.rate_index as u32, 4),
            (0, 1),                             // private_bit
            (self.channel_config as u32, 3),
            (0, 1),                             // original_copy
            (0, 1),                             // home
            (0, 1),                             // copyright_identification_bit
            (0, 1),                             // copyright_identification_start
            (size as u32, 13),
            (0x7FF, 11),                        // buffer fullness: VBR
            (0, 2),                             // one raw data block
        ];
        for (value, bits) in fields {
            w.put(value, bits).ok()?;
        }
        w.finish().ok()?;
        out.try_into().ok()
    }
}

/// Fields of an ADTS header as read back from a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdtsFrame {
    pub mpeg2: bool,
    pub profile: u8,
    pub rate_index: u8,
    pub channel_config: u8,
    /// Whole frame including the header
    pub frame_length: usize,
    pub header_length: usize,
}

/// Parses the ADTS header at the start of `data`
pub fn parse_adts_header(data: &[u8]) -> Option<AdtsFrame> {
    if data.len() < ADTS_HEADER_LEN || data[0] != 0xFF || (data[1] & 0xF6) != 0xF0 {
        return None;
    }
    let mut r = BitstreamReader::new(&data[..ADTS_HEADER_LEN]);
    r.skip(12).ok()?;
    let mpeg2 = r.flag().ok()?;
    r.skip(2).ok()?;
    let protection_absent = r.flag().ok()?;
    let profile = r.get(2).ok()? as u8;
    let rate_index = r.get(4).ok()? as u8;
    r.skip(1).ok()?;
    let channel_config = r.get(3).ok()? as u8;
    r.skip(4).ok()?;
    let frame_length = r.get(13).ok()? as usize;
    Some(AdtsFrame {
        mpeg2,
        profile,
        rate_index,
        channel_config,
        frame_length,
        header_length: if protection_absent { 7 } else { 9 },
    })
}
