//! Codec header parsers
//!
//! This module contains the header readers and writers the packetizers
//! rely on to reframe elementary streams for the decoder.

pub mod aac;
pub mod h264;
pub mod mpeg4;
pub mod utils;
pub mod vc1;

pub use aac::{AdtsTemplate, AudioSpecificConfig, parse_adts_header, parse_audio_specific_config};
pub use h264::{AvcConfig, parse_avcc};
pub use vc1::{FrameType, Vc1HeaderParser};
