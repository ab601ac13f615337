//! Non-blocking writer with an ordered backpressure queue.
//!
//! Bytes handed to [`Writer::write`] reach the device in call order. When
//! the sink is paused or unlocked they are parked in a FIFO of byte runs
//! and sent ahead of any newer data once writing resumes; during a flush
//! they are discarded. Control requests come from other threads through a
//! [`ControlHandle`], which also wakes a writer blocked on the device.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, Bytes};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::device::{Device, DeviceWaker, Readiness};
use crate::error::{Result, SinkError};
use crate::stats::WriterCounters;
use crate::types::DeviceEvent;

/// What happened to the bytes of one write call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// Parked in the pending queue; this many bytes were added
    Queued(usize),
    Discarded(usize),
}

/// A byte run not yet delivered, with the part already written skipped
#[derive(Debug)]
struct PendingRun {
    data: Bytes,
    offset: usize,
}

impl PendingRun {
    fn remaining(&self) -> &[u8] {
        &self.data[self.offset..]
    }
}

#[derive(Debug, Default)]
struct ControlState {
    discard: bool,
    paused: bool,
    unlocked: bool,
    queue: VecDeque<PendingRun>,
}

impl ControlState {
    fn queued_bytes(&self) -> usize {
        self.queue.iter().map(|run| run.remaining().len()).sum()
    }
}

struct Shared {
    state: Mutex<ControlState>,
    waker: DeviceWaker,
}

/// Thread-safe handle for flush, pause and unlock requests
#[derive(Clone)]
pub struct ControlHandle {
    shared: Arc<Shared>,
}

impl ControlHandle {
    /// Starts discarding everything written until the flush is stopped.
    pub fn flush_start(&self) {
        self.shared.state.lock().discard = true;
        debug!("flush started");
        (self.shared.waker)();
    }

    pub fn set_paused(&self, paused: bool) {
        self.shared.state.lock().paused = paused;
        debug!(paused, "pause state changed");
        (self.shared.waker)();
    }

    /// Releases a blocked writer; later writes queue until `unlock_stop`.
    pub fn unlock(&self) {
        self.shared.state.lock().unlocked = true;
        debug!("writer unlocked");
        (self.shared.waker)();
    }

    pub fn unlock_stop(&self) {
        self.shared.state.lock().unlocked = false;
    }

    pub fn is_flushing(&self) -> bool {
        self.shared.state.lock().discard
    }

    pub fn is_paused(&self) -> bool {
        self.shared.state.lock().paused
    }

    /// True while a flush or unlock should cut waits short
    pub fn is_interrupted(&self) -> bool {
        let state = self.shared.state.lock();
        state.discard || state.unlocked
    }

    pub fn queued_bytes(&self) -> usize {
        self.shared.state.lock().queued_bytes()
    }
}

pub struct Writer<D: Device> {
    device: D,
    shared: Arc<Shared>,
    counters: WriterCounters,
    events: Vec<DeviceEvent>,
}

impl<D: Device> Writer<D> {
    pub fn new(device: D) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(ControlState::default()),
            waker: device.waker(),
        });
        Self {
            device,
            shared,
            counters: WriterCounters::default(),
            events: Vec::new(),
        }
    }

    pub fn control(&self) -> ControlHandle {
        ControlHandle { shared: self.shared.clone() }
    }

    pub fn counters(&self) -> WriterCounters {
        self.counters
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Device events collected while writing
    pub fn take_events(&mut self) -> Vec<DeviceEvent> {
        std::mem::take(&mut self.events)
    }

    /// Sends `data` after everything already queued.
    pub fn write(&mut self, data: &Bytes) -> Result<WriteOutcome> {
        let mut data = data.clone();
        loop {
            {
                let mut state = self.shared.state.lock();
                if state.discard {
                    let dropped = data.len();
                    self.counters.bytes_discarded += dropped as u64;
                    return Ok(WriteOutcome::Discarded(dropped));
                }
                if state.paused || state.unlocked {
                    let queued = data.len();
                    if queued > 0 {
                        state.queue.push_back(PendingRun { data, offset: 0 });
                        self.counters.bytes_queued += queued as u64;
                        trace!(queued, total = state.queued_bytes(), "write parked");
                    }
                    return Ok(WriteOutcome::Queued(queued));
                }
                if state.queue.is_empty() && data.is_empty() {
                    return Ok(WriteOutcome::Written);
                }
            }

            let ready = self.device.wait(None).map_err(SinkError::Poll)?;
            if ready.event {
                self.collect_events()?;
            }
            if !ready.writable {
                if ready.woken {
                    trace!("writer woken, re-checking control state");
                }
                continue;
            }
            self.write_step(&mut data)?;
        }
    }

    /// Sends queued runs, oldest first.
    pub fn drain_pending(&mut self) -> Result<WriteOutcome> {
        self.write(&Bytes::new())
    }

    /// One device write: the oldest queued run first, else the new data.
    fn write_step(&mut self, data: &mut Bytes) -> Result<()> {
        let mut state = self.shared.state.lock();
        let from_queue = !state.queue.is_empty();
        let buf = match state.queue.front() {
            Some(run) => run.remaining(),
            None => &data[..],
        };
        let written = match self.device.write(buf) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                self.counters.interrupted += 1;
                return Ok(());
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.counters.would_block += 1;
                return Ok(());
            }
            Err(e) => {
                warn!(error = %e, "device write failed");
                return Err(SinkError::Write(e));
            }
        };
        self.counters.bytes_written += written as u64;
        if from_queue {
            if let Some(run) = state.queue.front_mut() {
                run.offset += written;
                if run.remaining().is_empty() {
                    state.queue.pop_front();
                }
            }
        } else {
            data.advance(written.min(data.len()));
        }
        Ok(())
    }

    fn collect_events(&mut self) -> Result<()> {
        while let Some(event) = self.device.read_event().map_err(SinkError::Poll)? {
            debug!(?event, "device event");
            self.events.push(event);
        }
        Ok(())
    }

    /// Ends a flush: the queue is emptied and the device buffer cleared.
    pub fn flush_stop(&mut self) {
        let mut state = self.shared.state.lock();
        let dropped = state.queued_bytes();
        state.queue.clear();
        state.discard = false;
        drop(state);
        self.counters.bytes_discarded += dropped as u64;
        if let Err(e) = self.device.clear_buffer() {
            warn!(error = %e, "failed to clear device buffer");
        }
        debug!(dropped, "flush stopped");
    }

    /// Waits up to `interval` for the device and collects pending events.
    pub fn poll_device(&mut self, interval: Duration) -> Result<Readiness> {
        let ready = self.device.wait(Some(interval)).map_err(SinkError::Poll)?;
        if ready.event {
            self.collect_events()?;
        }
        Ok(ready)
    }
}
