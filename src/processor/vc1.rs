//! One-frame lookahead for VC-1 advanced profile timestamps.
//!
//! B frames arrive after the reference frame they are displayed before, so
//! each frame is held until the next one shows its type: a reference frame
//! followed by B frames is pushed back by the B frames' share of the GOP,
//! and a held B frame moves one interval earlier.

use tracing::{debug, trace};

use crate::parsers::vc1::{FrameType, Vc1HeaderParser};
use crate::processor::Frame;

pub struct Vc1Reorder {
    parser: Vc1HeaderParser,
    prev: Option<(Frame, Option<FrameType>)>,
    /// Framerate from the stream setup or the sink default, in mHz
    fallback_mhz: u32,
}

impl Vc1Reorder {
    pub fn new(fallback_mhz: u32) -> Self {
        Self {
            parser: Vc1HeaderParser::new(),
            prev: None,
            fallback_mhz,
        }
    }

    /// Nanoseconds per frame; a framerate in the sequence header wins.
    pub fn interval_ns(&self) -> u64 {
        let mhz = self
            .parser
            .sequence_header()
            .and_then(|seq| seq.framerate_mhz)
            .unwrap_or(self.fallback_mhz)
            .max(1);
        1_000_000_000_000 / mhz as u64
    }

    pub fn parse_errors(&self) -> u64 {
        self.parser.parse_errors()
    }

    /// Holds `frame` and releases the one before it, corrected.
    pub fn push(&mut self, frame: Frame) -> Option<Frame> {
        let header = self.parser.feed(frame.head());
        let frame_type = header.map(|h| h.frame_type);
        trace!(?frame_type, pts = frame.pts, "VC-1 frame");
        let released = self.prev.take().map(|(mut prev, prev_type)| {
            match (prev_type, header) {
                (Some(FrameType::B), _) => self.shift_back(&mut prev),
                (Some(FrameType::I | FrameType::P | FrameType::Skipped), Some(cur))
                    if cur.frame_type == FrameType::B =>
                {
                    if let Some(fraction) = cur.bfraction.filter(|f| f.is_valid()) {
                        let count = fraction.b_frame_count() as u64;
                        let delay = self.interval_ns() * count;
                        prev.pts = prev.pts.map(|pts| pts + delay);
                        debug!(count, delay, "reference frame delayed behind B frames");
                    }
                }
                _ => {}
            }
            prev
        });
        self.prev = Some((frame, frame_type));
        released
    }

    /// Releases the held frame at end of stream.
    pub fn drain(&mut self) -> Option<Frame> {
        let (mut prev, prev_type) = self.prev.take()?;
        if prev_type == Some(FrameType::B) {
            self.shift_back(&mut prev);
        }
        Some(prev)
    }

    /// Forgets the held frame; header state survives a flush.
    pub fn reset(&mut self) {
        self.prev = None;
    }

    fn shift_back(&self, frame: &mut Frame) {
        let interval = self.interval_ns();
        frame.pts = frame.pts.map(|pts| pts.saturating_sub(interval));
    }
}
