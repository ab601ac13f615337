//! Report generation for a finished or running sink

use serde::Serialize;

use crate::stats::SinkStats;
use crate::types::{DeviceEvent, StreamType};

/// JSON structure for the CLI report
#[derive(Debug, Serialize)]
pub struct SinkReport {
    pub ts_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<StreamType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codec: Option<&'static str>,
    pub stats: SinkStats,
    pub bitrate_kbps: f64,
    /// False when end-of-stream was cut short
    pub drained: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<DeviceEvent>,
}

/// Report generator for sink statistics
pub struct Reporter;

impl Reporter {
    pub fn create_report(
        stream: Option<StreamType>,
        stats: SinkStats,
        drained: bool,
        events: Vec<DeviceEvent>,
    ) -> SinkReport {
        SinkReport {
            ts_time: chrono::Utc::now().to_rfc3339(),
            stream,
            codec: stream.map(StreamType::name),
            bitrate_kbps: (stats.bitrate_kbps() * 100.0).round() / 100.0,
            stats,
            drained,
            events,
        }
    }

    /// Pretty-printed JSON for CLI output
    pub fn generate_json_report(report: &SinkReport) -> String {
        serde_json::to_string_pretty(report).unwrap_or_else(|_| "{}".to_string())
    }

    /// Human-readable summary
    pub fn print_report(report: &SinkReport) {
        println!("================ PES Sink =================");
        println!("Stream: {}", report.codec.unwrap_or("none"));
        let s = &report.stats;
        println!(
            "  units {:>8}  packets {:>8}  dropped {:>5}  codec headers {:>4}  parse errors {:>4}",
            s.packetizer.units,
            s.packetizer.packets,
            s.packetizer.units_dropped,
            s.packetizer.codec_headers,
            s.packetizer.parse_errors,
        );
        println!(
            "  written {:>10} B  queued {:>8} B  discarded {:>8} B  would-block {:>6}",
            s.writer.bytes_written, s.writer.bytes_queued, s.writer.bytes_discarded, s.writer.would_block,
        );
        println!("  {:.2} kbps over {:.2} s, drained: {}", report.bitrate_kbps, s.elapsed_secs, report.drained);
        for event in &report.events {
            println!("  event: {event:?}");
        }
    }
}
