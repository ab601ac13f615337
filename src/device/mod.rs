//! Decoder device abstraction.
//!
//! The writer only needs four things from a device: a non-blocking write,
//! a readiness wait that a control thread can interrupt, an optional event
//! channel and an optional decoder clock. [`FdDevice`] provides them for a
//! file descriptor opened with `O_NONBLOCK`.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::fd::{AsFd, AsRawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use polling::{Event, Events, Poller};
use tracing::{debug, warn};

use crate::error::{Result, SinkError};
use crate::types::DeviceEvent;

/// Callback that interrupts a blocked [`Device::wait`] from another thread
pub type DeviceWaker = Arc<dyn Fn() + Send + Sync>;

/// Outcome of one readiness wait
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub writable: bool,
    /// The device holds no undecoded data
    pub drained: bool,
    /// An out-of-band event is waiting to be read
    pub event: bool,
    /// The wait returned without device readiness (waker or timeout)
    pub woken: bool,
}

pub trait Device: Send {
    /// Non-blocking write; `WouldBlock` when the device is full.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Blocks until the device is ready, the waker fires, or `timeout` elapses.
    fn wait(&mut self, timeout: Option<Duration>) -> io::Result<Readiness>;

    fn waker(&self) -> DeviceWaker;

    fn read_event(&mut self) -> io::Result<Option<DeviceEvent>> {
        Ok(None)
    }

    /// Presentation time of the picture or sample being decoded, 90 kHz
    fn decoder_pts(&mut self) -> Option<u64> {
        None
    }

    /// Discards data the device buffered but has not decoded.
    fn clear_buffer(&mut self) -> io::Result<()> {
        Ok(())
    }
}

const DEVICE_KEY: usize = 7;

/// Device backed by a non-blocking file descriptor.
///
/// Only write readiness is polled. Decoder events and the decoder clock
/// are driver ioctls a plain descriptor does not offer: `read_event`
/// always yields `None` and [`Readiness::event`] is never set. Devices
/// that have them implement [`Device`] directly.
pub struct FdDevice {
    file: File,
    path: PathBuf,
    poller: Arc<Poller>,
    events: Events,
    /// epoll refuses regular files; those are always writable
    pollable: bool,
}

impl FdDevice {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let open_err = |source| SinkError::Open { path: path.clone(), source };
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&path)
            .map_err(open_err)?;
        let poller = Poller::new().map_err(open_err)?;
        let pollable = match unsafe { poller.add(file.as_raw_fd(), Event::writable(DEVICE_KEY)) } {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                debug!(path = %path.display(), "device is not pollable, treating it as always writable");
                false
            }
            Err(e) => return Err(open_err(e)),
        };
        Ok(Self {
            file,
            path,
            poller: Arc::new(poller),
            events: Events::new(),
            pollable,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Device for FdDevice {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn wait(&mut self, timeout: Option<Duration>) -> io::Result<Readiness> {
        self.events.clear();
        if !self.pollable {
            // still honour a pending notify so control requests are seen
            self.poller.wait(&mut self.events, Some(Duration::ZERO))?;
            return Ok(Readiness { writable: true, drained: true, ..Readiness::default() });
        }
        // oneshot mode: re-arm before every wait
        self.poller.modify(self.file.as_fd(), Event::writable(DEVICE_KEY))?;
        self.poller.wait(&mut self.events, timeout)?;
        let writable = self.events.iter().any(|ev| ev.key == DEVICE_KEY && ev.writable);
        Ok(Readiness {
            writable,
            drained: writable,
            event: false,
            woken: !writable,
        })
    }

    fn waker(&self) -> DeviceWaker {
        let poller = self.poller.clone();
        Arc::new(move || {
            for _ in 0..1024 {
                if poller.notify().is_ok() {
                    break;
                }
            }
        })
    }
}

impl Drop for FdDevice {
    fn drop(&mut self) {
        if self.pollable {
            if let Err(e) = self.poller.delete(self.file.as_fd()) {
                warn!(error = %e, "failed to deregister device");
            }
        }
    }
}
