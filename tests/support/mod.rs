#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use pes_sink::{Device, DeviceEvent, DeviceWaker, Readiness};

/// One scripted reaction to a device write
#[derive(Debug, Clone, Copy)]
pub enum Step {
    Accept(usize),
    WouldBlock,
    Interrupted,
    Fail,
}

#[derive(Default)]
pub struct MockState {
    pub steps: VecDeque<Step>,
    pub out: Vec<u8>,
    pub events: VecDeque<DeviceEvent>,
    pub decoder_pts: Option<u64>,
    pub drained: bool,
    /// Report "not writable" until the waker fires
    pub stall: bool,
    pub clears: usize,
    pub waits: usize,
}

/// Scripted in-memory device; the test keeps a handle on its state
#[derive(Clone)]
pub struct MockDevice {
    pub state: Arc<Mutex<MockState>>,
    woken: Arc<AtomicBool>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState { drained: true, ..MockState::default() })),
            woken: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn script(&self, steps: impl IntoIterator<Item = Step>) {
        self.state.lock().steps.extend(steps);
    }

    pub fn output(&self) -> Vec<u8> {
        self.state.lock().out.clone()
    }
}

impl Device for MockDevice {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        match state.steps.pop_front() {
            None => {
                state.out.extend_from_slice(buf);
                Ok(buf.len())
            }
            Some(Step::Accept(n)) => {
                let n = n.min(buf.len());
                state.out.extend_from_slice(&buf[..n]);
                Ok(n)
            }
            Some(Step::WouldBlock) => Err(io::ErrorKind::WouldBlock.into()),
            Some(Step::Interrupted) => Err(io::ErrorKind::Interrupted.into()),
            Some(Step::Fail) => Err(io::Error::other("decoder went away")),
        }
    }

    fn wait(&mut self, timeout: Option<Duration>) -> io::Result<Readiness> {
        let woken = self.woken.swap(false, Ordering::SeqCst);
        let mut state = self.state.lock();
        state.waits += 1;
        if state.stall && !woken {
            drop(state);
            std::thread::sleep(timeout.unwrap_or(Duration::from_millis(1)).min(Duration::from_millis(5)));
            return Ok(Readiness { woken: true, ..Readiness::default() });
        }
        Ok(Readiness {
            writable: !state.stall,
            drained: state.drained,
            event: !state.events.is_empty(),
            woken,
        })
    }

    fn waker(&self) -> DeviceWaker {
        let woken = self.woken.clone();
        Arc::new(move || woken.store(true, Ordering::SeqCst))
    }

    fn read_event(&mut self) -> io::Result<Option<DeviceEvent>> {
        Ok(self.state.lock().events.pop_front())
    }

    fn decoder_pts(&mut self) -> Option<u64> {
        self.state.lock().decoder_pts
    }

    fn clear_buffer(&mut self) -> io::Result<()> {
        self.state.lock().clears += 1;
        Ok(())
    }
}

/// Splits concatenated PES output into (header, payload) pairs using the
/// length field; a zero length runs to the end of the buffer.
pub fn packets(mut data: &[u8]) -> Vec<(u8, Vec<u8>)> {
    let mut out = Vec::new();
    while data.len() >= 6 {
        assert_eq!(&data[..3], &[0, 0, 1], "PES start code");
        let len = u16::from_be_bytes([data[4], data[5]]) as usize;
        let end = if len == 0 { data.len() } else { 6 + len };
        out.push((data[3], data[..end].to_vec()));
        data = &data[end..];
    }
    assert!(data.is_empty(), "trailing bytes after last packet");
    out
}

/// 90 kHz PTS of a PES packet, if it carries one
pub fn pts_of(packet: &[u8]) -> Option<u64> {
    if packet[7] & 0x80 == 0 {
        return None;
    }
    let field: [u8; 5] = packet[9..14].try_into().ok()?;
    Some(pes_sink::pes::decode_timestamp(&field))
}
