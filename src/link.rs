//! Serial link management.
//!
//! Owns the connection to the station microcontroller and survives a flaky
//! cable. The connection lives in an explicit state machine:
//!
//! - `Disconnected` — no handle; the next [`LinkManager::ensure_open`] tries
//!   to open the port.
//! - `Connected` — handle present and presumed healthy.
//! - `BackoffWait` — a transport failure invalidated the handle; reopen
//!   attempts are refused until the backoff deadline passes, so a dead port
//!   never turns into a hot retry loop.
//!
//! Opening includes a settle delay: the device resets when the port opens and
//! needs a moment before it produces sensible output. The driver read timeout
//! is short (~1s) and its expiry with no pending data is an empty poll, not a
//! failure.

use crate::config::SerialSettings;
use crate::error::{Result, StationError};
use log::{debug, info, warn};
use std::io::{self, Read};
use std::time::{Duration, Instant};

/// Transport handle the manager reads from. The production opener yields a
/// real serial port; tests inject scripted readers.
pub type LinkHandle = Box<dyn Read + Send>;

type OpenFn = Box<dyn FnMut() -> io::Result<LinkHandle> + Send>;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No handle; next `ensure_open` attempts to open.
    Disconnected,
    /// Handle open and presumed healthy.
    Connected,
    /// Waiting out the reconnect backoff after a failure.
    BackoffWait,
}

/// Owns the serial connection; opens, detects failure, closes, reopens with
/// backoff.
pub struct LinkManager {
    opener: OpenFn,
    handle: Option<LinkHandle>,
    retry_after: Option<Instant>,
    settle_delay: Duration,
    backoff: Duration,
    pending: Vec<u8>,
}

impl LinkManager {
    /// Manager for a real serial port described by `settings`.
    pub fn new(settings: &SerialSettings) -> Self {
        let port = settings.port.clone();
        let baud = settings.baud_rate;
        let timeout = settings.read_timeout;
        let opener: OpenFn = Box::new(move || {
            let handle = serialport::new(&port, baud)
                .timeout(timeout)
                .open()
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
            Ok(Box::new(handle) as LinkHandle)
        });
        Self::from_opener(opener, settings.settle_delay, settings.reconnect_backoff)
    }

    /// Manager over an arbitrary transport opener. Used by tests to script
    /// link behavior without hardware.
    pub fn from_opener(opener: OpenFn, settle_delay: Duration, backoff: Duration) -> Self {
        Self {
            opener,
            handle: None,
            retry_after: None,
            settle_delay,
            backoff,
            pending: Vec::new(),
        }
    }

    /// Current state of the connection state machine.
    pub fn state(&self) -> LinkState {
        if self.handle.is_some() {
            LinkState::Connected
        } else if self
            .retry_after
            .is_some_and(|deadline| Instant::now() < deadline)
        {
            LinkState::BackoffWait
        } else {
            LinkState::Disconnected
        }
    }

    /// Return a usable connection, opening one if necessary.
    ///
    /// Refuses to touch the port while the backoff deadline from the last
    /// failure has not passed. A failed open arms the next backoff window.
    pub fn ensure_open(&mut self) -> Result<&mut LinkHandle> {
        if self.handle.is_none() {
            if let Some(deadline) = self.retry_after {
                let now = Instant::now();
                if now < deadline {
                    return Err(StationError::LinkUnavailable(format!(
                        "reconnect backoff, {:.1}s remaining",
                        (deadline - now).as_secs_f64()
                    )));
                }
            }
            info!("opening serial link");
            match (self.opener)() {
                Ok(handle) => {
                    // Let the device finish its post-open reset before we
                    // trust anything it sends.
                    std::thread::sleep(self.settle_delay);
                    self.handle = Some(handle);
                    self.retry_after = None;
                    self.pending.clear();
                    info!("serial link open");
                }
                Err(e) => {
                    self.arm_backoff();
                    return Err(StationError::LinkUnavailable(e.to_string()));
                }
            }
        }
        // Invariant: handle is Some on every path reaching here.
        self.handle
            .as_mut()
            .ok_or_else(|| StationError::LinkUnavailable("handle vanished".into()))
    }

    /// Poll for one newline-terminated line.
    ///
    /// `Ok(None)` means no complete line arrived within the driver timeout —
    /// absence of data is not an error. A transport failure invalidates the
    /// handle and arms the backoff.
    pub fn poll_line(&mut self) -> Result<Option<String>> {
        // A prior read may have buffered more than one line.
        if let Some(line) = self.take_buffered_line() {
            return Ok(Some(line));
        }

        let mut chunk = [0u8; 256];
        let outcome = self.ensure_open()?.read(&mut chunk);
        match outcome {
            Ok(0) => {
                warn!("serial link reported EOF, dropping handle");
                self.invalidate();
                Err(StationError::LinkUnavailable("unexpected EOF".into()))
            }
            Ok(n) => {
                self.pending.extend_from_slice(&chunk[..n]);
                Ok(self.take_buffered_line())
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut || e.kind() == io::ErrorKind::WouldBlock => {
                Ok(None)
            }
            Err(e) => {
                warn!("serial read failed ({e}), dropping handle");
                self.invalidate();
                Err(StationError::LinkUnavailable(e.to_string()))
            }
        }
    }

    /// Time to sleep before the next attempt is worthwhile. Zero unless the
    /// manager is waiting out a backoff.
    pub fn backoff_remaining(&self) -> Duration {
        self.retry_after
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::ZERO)
    }

    fn take_buffered_line(&mut self) -> Option<String> {
        let pos = self.pending.iter().position(|&b| b == b'\n')?;
        let raw: Vec<u8> = self.pending.drain(..=pos).collect();
        let line = String::from_utf8_lossy(&raw).trim().to_string();
        debug!("received line {line:?}");
        Some(line)
    }

    fn invalidate(&mut self) {
        self.handle = None;
        self.pending.clear();
        self.arm_backoff();
    }

    fn arm_backoff(&mut self) {
        self.retry_after = Some(Instant::now() + self.backoff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Scripted transport: a queue of read outcomes.
    struct ScriptedPort {
        script: VecDeque<io::Result<Vec<u8>>>,
    }

    impl Read for ScriptedPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.script.pop_front() {
                Some(Ok(bytes)) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
                Some(Err(e)) => Err(e),
                None => Err(io::Error::new(io::ErrorKind::TimedOut, "empty poll")),
            }
        }
    }

    fn scripted_manager(script: Vec<io::Result<Vec<u8>>>, backoff: Duration) -> LinkManager {
        let mut scripts = VecDeque::from([script]);
        LinkManager::from_opener(
            Box::new(move || {
                let script = scripts.pop_front().ok_or_else(|| {
                    io::Error::new(io::ErrorKind::NotFound, "no such device")
                })?;
                Ok(Box::new(ScriptedPort {
                    script: script.into(),
                }) as LinkHandle)
            }),
            Duration::ZERO,
            backoff,
        )
    }

    #[test]
    fn delivers_buffered_lines_one_at_a_time() {
        let mut link = scripted_manager(
            vec![Ok(b"Temp:21.5\nHum:60.0\n".to_vec())],
            Duration::from_secs(5),
        );
        assert_eq!(link.poll_line().unwrap().as_deref(), Some("Temp:21.5"));
        assert_eq!(link.poll_line().unwrap().as_deref(), Some("Hum:60.0"));
        assert_eq!(link.poll_line().unwrap(), None);
    }

    #[test]
    fn partial_line_waits_for_terminator() {
        let mut link = scripted_manager(
            vec![Ok(b"Soil Mo".to_vec()), Ok(b"isture:42\n".to_vec())],
            Duration::from_secs(5),
        );
        assert_eq!(link.poll_line().unwrap(), None);
        assert_eq!(
            link.poll_line().unwrap().as_deref(),
            Some("Soil Moisture:42")
        );
    }

    #[test]
    fn timeout_is_an_empty_poll_not_an_error() {
        let mut link = scripted_manager(vec![], Duration::from_secs(5));
        assert_eq!(link.poll_line().unwrap(), None);
        assert_eq!(link.state(), LinkState::Connected);
    }

    #[test]
    fn transport_failure_invalidates_and_arms_backoff() {
        let mut link = scripted_manager(
            vec![Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"))],
            Duration::from_secs(60),
        );
        assert!(link.poll_line().is_err());
        assert_eq!(link.state(), LinkState::BackoffWait);
        assert!(link.backoff_remaining() > Duration::ZERO);
        // Next attempt is refused without touching the opener.
        assert!(matches!(
            link.ensure_open().err(),
            Some(StationError::LinkUnavailable(_))
        ));
    }

    #[test]
    fn failed_open_is_not_retried_within_backoff() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let mut link = LinkManager::from_opener(
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(io::Error::new(io::ErrorKind::NotFound, "no such device"))
            }),
            Duration::ZERO,
            Duration::from_secs(60),
        );
        assert!(link.ensure_open().is_err());
        assert!(link.ensure_open().is_err());
        assert!(link.ensure_open().is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reopens_after_backoff_expires() {
        let mut link = scripted_manager(
            vec![Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"))],
            Duration::ZERO,
        );
        assert!(link.poll_line().is_err());
        // Zero backoff: immediately eligible again; the second scripted open
        // fails because the opener queue is exhausted.
        assert_eq!(link.state(), LinkState::Disconnected);
        assert!(link.ensure_open().is_err());
    }
}
