//! Audio/video sink: one declared stream, one packetizer, one device.

use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::config::SinkConfig;
use crate::constants::DECODER_PTS_TO_NS;
use crate::device::Device;
use crate::error::{Result, SinkError};
use crate::processor::Packetizer;
use crate::setup::{StreamSetup, configure};
use crate::stats::{SinkStats, StatsManager};
use crate::types::{AccessUnit, DeviceEvent, StreamType};
use crate::writer::{ControlHandle, WriteOutcome, Writer};

/// Result of rendering one access unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    /// Every packet reached the device
    Sent,
    /// Some packets are parked until pause or unlock ends
    Queued,
    /// The unit was lost to a per-unit error and the stream goes on
    Dropped,
    /// A flush is in progress; nothing was sent
    Flushing,
}

pub struct Sink<D: Device> {
    config: SinkConfig,
    writer: Writer<D>,
    stream_type: Option<StreamType>,
    packetizer: Option<Packetizer>,
    stats: StatsManager,
    /// Last non-zero decoder clock, in nanoseconds
    decoder_ns: Option<u64>,
}

impl<D: Device> Sink<D> {
    pub fn new(device: D, config: SinkConfig) -> Self {
        Self {
            config,
            writer: Writer::new(device),
            stream_type: None,
            packetizer: None,
            stats: StatsManager::new(),
            decoder_ns: None,
        }
    }

    pub fn control(&self) -> ControlHandle {
        self.writer.control()
    }

    pub fn config(&self) -> &SinkConfig {
        &self.config
    }

    pub fn stream_type(&self) -> Option<StreamType> {
        self.stream_type
    }

    pub fn device(&self) -> &D {
        self.writer.device()
    }

    /// Declares the stream; configuration errors surface here once.
    pub fn setup(&mut self, setup: &StreamSetup) -> Result<()> {
        let codec = configure(setup, &self.config)?;
        let framerate_mhz = setup.framerate.and_then(|f| f.millihertz());
        self.packetizer = Some(Packetizer::new(setup.stream_type, codec, framerate_mhz, &self.config));
        self.stream_type = Some(setup.stream_type);
        self.stats.restart();
        info!(stream = setup.stream_type.name(), "sink ready");
        Ok(())
    }

    pub fn render(&mut self, au: AccessUnit) -> Result<RenderOutcome> {
        let packetizer = self.packetizer.as_mut().ok_or(SinkError::NotConfigured)?;
        if self.writer.control().is_flushing() {
            return Ok(RenderOutcome::Flushing);
        }
        let chunks = match packetizer.process(au) {
            Ok(chunks) => chunks,
            Err(e) if e.drops_unit() => {
                warn!(error = %e, "access unit dropped");
                return Ok(RenderOutcome::Dropped);
            }
            Err(e) => return Err(e),
        };
        self.send(&chunks)
    }

    fn send(&mut self, chunks: &[Bytes]) -> Result<RenderOutcome> {
        let mut outcome = RenderOutcome::Sent;
        for chunk in chunks {
            match self.writer.write(chunk)? {
                WriteOutcome::Written => {}
                WriteOutcome::Queued(_) => outcome = RenderOutcome::Queued,
                WriteOutcome::Discarded(_) => return Ok(RenderOutcome::Flushing),
            }
        }
        Ok(outcome)
    }

    /// Ends a flush: pending bytes and held frames are dropped and the
    /// codec header goes out again with the next frame.
    pub fn flush_stop(&mut self) {
        self.writer.flush_stop();
        if let Some(packetizer) = &mut self.packetizer {
            packetizer.flush();
        }
        self.decoder_ns = None;
    }

    /// Pushes out held frames and waits for the decoder to consume them.
    ///
    /// Returns `false` when a flush, unlock or the drain timeout cut the
    /// wait short.
    pub fn end_of_stream(&mut self) -> Result<bool> {
        let Some(packetizer) = &mut self.packetizer else {
            return Ok(true);
        };
        let chunks = packetizer.drain()?;
        let last_pts = packetizer.last_pts();
        if self.send(&chunks)? != RenderOutcome::Sent {
            return Ok(false);
        }
        if self.writer.drain_pending()? != WriteOutcome::Written {
            return Ok(false);
        }

        let interval = self.config.drain_poll_interval();
        let timeout = self.config.drain_timeout();
        let control = self.writer.control();
        let started = Instant::now();
        debug!(?last_pts, "waiting for the decoder to drain");
        loop {
            if control.is_interrupted() {
                debug!("drain interrupted");
                return Ok(false);
            }
            let ready = self.writer.poll_device(interval)?;
            if ready.drained {
                return Ok(true);
            }
            if let (Some(last), Some(now)) = (last_pts, self.decoder_time()) {
                if now >= last {
                    return Ok(true);
                }
            }
            if timeout.is_some_and(|t| started.elapsed() >= t) {
                warn!(elapsed = ?started.elapsed(), "decoder did not drain in time");
                return Ok(false);
            }
            if !ready.woken {
                std::thread::sleep(interval);
            }
        }
    }

    /// Returns to the unconfigured state; queued bytes are dropped.
    pub fn stop(&mut self) {
        self.writer.flush_stop();
        self.packetizer = None;
        self.stream_type = None;
        self.decoder_ns = None;
    }

    /// Decoder clock in nanoseconds, holding the last non-zero reading.
    pub fn decoder_time(&mut self) -> Option<u64> {
        match self.writer.device_mut().decoder_pts() {
            Some(pts) if pts != 0 => {
                self.decoder_ns = Some(pts * DECODER_PTS_TO_NS);
            }
            _ => {}
        }
        self.decoder_ns
    }

    pub fn take_events(&mut self) -> Vec<DeviceEvent> {
        self.writer.take_events()
    }

    pub fn stats(&self) -> SinkStats {
        let packetizer = self.packetizer.as_ref().map(Packetizer::counters).unwrap_or_default();
        self.stats.snapshot(packetizer, self.writer.counters())
    }
}
