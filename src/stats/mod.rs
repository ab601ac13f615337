//! Counters kept by the packetizers and the writer

use std::time::Instant;

use serde::Serialize;

/// Packetizer-side counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PacketCounters {
    pub units: u64,
    pub packets: u64,
    pub codec_headers: u64,
    pub parse_errors: u64,
    pub units_dropped: u64,
}

/// Writer-side counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriterCounters {
    pub bytes_written: u64,
    pub bytes_queued: u64,
    pub bytes_discarded: u64,
    pub would_block: u64,
    pub interrupted: u64,
}

/// Snapshot of one sink
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SinkStats {
    #[serde(flatten)]
    pub packetizer: PacketCounters,
    #[serde(flatten)]
    pub writer: WriterCounters,
    pub elapsed_secs: f64,
}

impl SinkStats {
    /// Average output rate in kbps
    pub fn bitrate_kbps(&self) -> f64 {
        let seconds = self.elapsed_secs.max(0.1);
        (self.writer.bytes_written as f64 * 8.0 / 1000.0) / seconds
    }
}

/// Builds snapshots relative to the time the stream started
pub struct StatsManager {
    start: Instant,
}

impl StatsManager {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }

    pub fn restart(&mut self) {
        self.start = Instant::now();
    }

    pub fn snapshot(&self, packetizer: PacketCounters, writer: WriterCounters) -> SinkStats {
        SinkStats {
            packetizer,
            writer,
            elapsed_secs: self.start.elapsed().as_secs_f64(),
        }
    }
}

impl Default for StatsManager {
    fn default() -> Self {
        Self::new()
    }
}
