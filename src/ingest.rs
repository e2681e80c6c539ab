//! The long-running ingestion loop.
//!
//! One iteration is the atomic unit "poll one line → parse → update store →
//! maybe commit", executed with the ingestion lock held so the web surface
//! never observes a torn commit. The latest-reading cache itself is outside
//! this lock; only the serial handle and commit bookkeeping are protected.
//!
//! Nothing that happens in here terminates the process. Malformed lines and
//! failed log writes are logged and skipped; a dead link sleeps out the
//! reconnect backoff with the lock released.

use crate::chart::ChartRefresher;
use crate::link::LinkManager;
use crate::parse::{parse_line, ParsedLine};
use crate::store::SampleStore;
use chrono::Local;
use log::warn;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Serial connection plus commit bookkeeping, owned by the ingestion loop
/// and shared with the web surface behind one mutex.
pub struct IngestionState {
    /// The serial connection state machine.
    pub link: LinkManager,
    /// Latest-reading cache and durable log.
    pub store: SampleStore,
}

/// Shared handle to the ingestion state.
pub type SharedState = Arc<Mutex<IngestionState>>;

/// Outcome of one loop iteration, driving the pacing decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// A line was consumed and a reading row was committed.
    Committed,
    /// A line was consumed without a commit.
    Handled,
    /// Nothing arrived within the driver timeout.
    Idle,
    /// The link is down; wait this long before trying again.
    LinkDown(Duration),
}

/// Execute one ingestion iteration against the locked state.
pub fn step(state: &mut IngestionState) -> Step {
    let line = match state.link.poll_line() {
        Ok(Some(line)) => line,
        Ok(None) => return Step::Idle,
        Err(e) => {
            warn!("link unavailable: {e}");
            let wait = state.link.backoff_remaining();
            return Step::LinkDown(wait.max(Duration::from_secs(1)));
        }
    };

    let now = Local::now();
    match parse_line(&line) {
        Ok(ParsedLine::Unknown) => Step::Handled,
        Ok(ParsedLine::Pump(event)) => {
            if let Err(e) = state.store.log_event(event, now) {
                warn!("failed to log event: {e}");
            }
            Step::Handled
        }
        Ok(field) => {
            state.store.update_field(&field);
            match state.store.maybe_commit(now) {
                Ok(true) => Step::Committed,
                Ok(false) => Step::Handled,
                Err(e) => {
                    // Commit lost for this cycle; the next complete reading
                    // retries.
                    warn!("failed to commit reading: {e}");
                    Step::Handled
                }
            }
        }
        Err(e) => {
            warn!("skipping line: {e}");
            Step::Handled
        }
    }
}

/// Run the ingestion loop until process termination.
///
/// The lock is held for exactly one [`step`] at a time; sleeps and chart
/// regeneration happen with the lock released.
pub fn run(state: SharedState, refresher: Arc<ChartRefresher>) {
    loop {
        let outcome = {
            let mut guard = state.lock().unwrap_or_else(PoisonError::into_inner);
            step(&mut guard)
        };
        match outcome {
            Step::Committed => refresher.refresh_if_stale(),
            Step::Handled => {}
            Step::Idle => {
                refresher.refresh_if_stale();
                std::thread::sleep(Duration::from_secs(1));
            }
            Step::LinkDown(wait) => std::thread::sleep(wait),
        }
    }
}
