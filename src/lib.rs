// src/lib.rs
pub mod feeder {
    pub use crate::core::{Framing, Options, prepare, split_adts, split_annex_b, split_mpeg_video};

    /// Async entry-point; returns once the input is sent and drained, or on Ctrl-C
    pub async fn run(opts: Options) -> anyhow::Result<()> {
        crate::core::run(opts).await
    }
}

pub mod bitstream;
pub mod config;
pub mod constants;
pub mod device;
pub mod error;
pub mod parsers;
pub mod pes;
pub mod processor;
pub mod report;
pub mod setup;
pub mod sink;
pub mod stats;
pub mod types;
pub mod writer;
mod core;         // CLI feeder: file splitting and the blocking render loop

pub use config::{HardwareProfile, OversizePolicy, SinkConfig};
pub use device::{Device, DeviceWaker, FdDevice, Readiness};
pub use error::{Result, SinkError};
pub use setup::StreamSetup;
pub use sink::{RenderOutcome, Sink};
pub use stats::SinkStats;
pub use types::{AccessUnit, DeviceEvent, Framerate, StreamType};
pub use writer::{ControlHandle, WriteOutcome};
