//! Constants for PES packetization and elementary-stream reframing

/// PES packet constants
pub const PES_START_CODE: [u8; 3] = [0x00, 0x00, 0x01];
pub const AUDIO_STREAM_ID: u8 = 0xC0;
pub const VIDEO_STREAM_ID: u8 = 0xE0;
pub const PES_MAX_LENGTH_FIELD: usize = 0xFFFF;
pub const PES_HEADER_CAPACITY: usize = 2048;
pub const PES_BASE_HEADER_LEN: usize = 9;
pub const PES_TIMESTAMP_LEN: usize = 5;

/// PTS constants
pub const PTS_CLOCK_HZ: u64 = 90_000; // 90 kHz
pub const PTS_WRAP_THRESHOLD: u64 = 1u64 << 33; // 33-bit PTS counter
pub const NS_PER_SECOND: u64 = 1_000_000_000;
pub const NS_PER_MS: u64 = 1_000_000;
/// Device decoder clock to nanoseconds (100000 / 9, truncated)
pub const DECODER_PTS_TO_NS: u64 = 11_111;

/// ADTS constants
pub const ADTS_HEADER_LEN: usize = 7;
pub const ADTS_MAX_FRAME_LEN: usize = 0x1FFF;
/// MPEG-4 sampling frequency table, descending, zero terminated
pub const AAC_SAMPLE_RATES: [u32; 14] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350, 0,
];
pub const AAC_ESCAPE_RATE_INDEX: u8 = 15;
pub const AAC_ESCAPE_OBJECT_TYPE: u8 = 31;
pub const AAC_SBR_SYNC: u32 = 0x2B7;
pub const AAC_PS_SYNC: u32 = 0x548;

/// VC-1 start code suffixes
pub const VC1_SEQUENCE_HEADER: u8 = 0x0F;
pub const VC1_ENTRY_POINT: u8 = 0x0E;
pub const VC1_FRAME: u8 = 0x0D;

/// MPEG-4 part 2 start code suffixes
pub const MPEG4_VOS: u8 = 0xB0;
pub const MPEG4_USER_DATA: u8 = 0xB2;
pub const MPEG4_GOV: u8 = 0xB3;
pub const MPEG4_VOP: u8 = 0xB6;
pub const MPEG4_VOL_FIRST: u8 = 0x20;
pub const MPEG4_VOL_LAST: u8 = 0x2F;

/// MPEG-1/2 video start code suffixes
pub const MPEG2_SEQUENCE_HEADER: u8 = 0xB3;
pub const MPEG2_GOP: u8 = 0xB8;
pub const MPEG2_PICTURE: u8 = 0x00;

/// H.264 NAL rewrite scratch size (one maximal PES payload plus slack)
pub const H264_SCRATCH_CAPACITY: usize = 64 * 1024 + 2048;

/// Block audio framing
pub const PCM_BLOCK_MS: u64 = 30;
pub const WMA_FORMAT_TAG_BASE: u16 = 0x15F;
pub const PCM_FORMAT_TAG: u16 = 0x0001;

/// End-of-stream drain polling
pub const DRAIN_POLL_INTERVAL_MS: u64 = 250;

/// VC-1 framerate fallback (25 fps) in mHz
pub const DEFAULT_FRAMERATE_MHZ: u32 = 25_000;
