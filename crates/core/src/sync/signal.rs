//! Wake/terminate signalling between the facade and the sync thread.
//!
//! One mutex guards a small control block and one condvar is shared by the
//! sync thread (waiting for work) and callers of `sync_now` (waiting for a
//! cycle to finish), so every state change uses `notify_all`.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::Serialize;

/// Lifecycle of the sync thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    #[default]
    NotStarted,
    Importing,
    Syncing,
    Terminating,
    Stopped,
}

#[derive(Debug, Default)]
struct Control {
    wake: bool,
    deadline: Option<Instant>,
    terminate: bool,
    remove_all: bool,
    cycles_started: u64,
    cycles_completed: u64,
    state: SyncState,
}

#[derive(Debug, Default)]
pub(crate) struct SyncSignal {
    control: Mutex<Control>,
    cv: Condvar,
}

impl SyncSignal {
    /// Back to the state of a thread that has not been started.
    pub(crate) fn reset(&self) {
        *self.control.lock() = Control::default();
    }

    /// Run a cycle as soon as the current one (if any) finishes.
    pub(crate) fn wake_now(&self) {
        let mut control = self.control.lock();
        control.wake = true;
        self.cv.notify_all();
    }

    /// (Re)start the deferred sync timer.
    pub(crate) fn schedule(&self, delay: Duration) {
        let mut control = self.control.lock();
        control.deadline = Some(Instant::now() + delay);
        self.cv.notify_all();
    }

    pub(crate) fn request_terminate(&self) {
        let mut control = self.control.lock();
        control.terminate = true;
        self.cv.notify_all();
    }

    pub(crate) fn terminate_requested(&self) -> bool {
        self.control.lock().terminate
    }

    pub(crate) fn request_remove_all(&self) {
        let mut control = self.control.lock();
        control.remove_all = true;
        control.wake = true;
        self.cv.notify_all();
    }

    pub(crate) fn remove_all_pending(&self) -> bool {
        self.control.lock().remove_all
    }

    /// Clear the remove-all request, returning whether one was pending.
    pub(crate) fn take_remove_all(&self) -> bool {
        std::mem::take(&mut self.control.lock().remove_all)
    }

    pub(crate) fn state(&self) -> SyncState {
        self.control.lock().state
    }

    pub(crate) fn set_state(&self, state: SyncState) {
        let mut control = self.control.lock();
        control.state = state;
        self.cv.notify_all();
    }

    /// Block the sync thread until a wake, an expired timer or termination.
    ///
    /// Returns false when termination was requested; otherwise a new cycle
    /// has been counted as started.
    pub(crate) fn wait_for_work(&self) -> bool {
        let mut control = self.control.lock();
        loop {
            if control.terminate {
                return false;
            }
            if control.wake {
                break;
            }
            match control.deadline {
                Some(deadline) if Instant::now() >= deadline => break,
                Some(deadline) => {
                    self.cv.wait_until(&mut control, deadline);
                }
                None => self.cv.wait(&mut control),
            }
        }
        control.wake = false;
        control.deadline = None;
        control.cycles_started += 1;
        true
    }

    pub(crate) fn complete_cycle(&self) {
        let mut control = self.control.lock();
        control.cycles_completed += 1;
        self.cv.notify_all();
    }

    /// Wake the sync thread and wait until a cycle that started after this
    /// call has completed. Returns false on timeout or if the thread stopped first.
    pub(crate) fn sync_now(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut control = self.control.lock();
        let target = control.cycles_started + 1;
        control.wake = true;
        self.cv.notify_all();

        while control.cycles_completed < target {
            if control.state == SyncState::Stopped {
                return false;
            }
            if self.cv.wait_until(&mut control, deadline).timed_out() {
                return control.cycles_completed >= target;
            }
        }
        true
    }

    #[cfg(test)]
    fn cycles(&self) -> (u64, u64) {
        let control = self.control.lock();
        (control.cycles_started, control.cycles_completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_terminate_ends_wait() {
        let signal = SyncSignal::default();
        signal.request_terminate();
        assert!(!signal.wait_for_work());
    }

    #[test]
    fn test_wake_starts_cycle() {
        let signal = SyncSignal::default();
        signal.wake_now();
        assert!(signal.wait_for_work());
        assert_eq!(signal.cycles(), (1, 0));
    }

    #[test]
    fn test_expired_timer_starts_cycle() {
        let signal = SyncSignal::default();
        signal.schedule(Duration::from_millis(10));
        assert!(signal.wait_for_work());
    }

    #[test]
    fn test_take_remove_all_clears_flag() {
        let signal = SyncSignal::default();
        signal.request_remove_all();
        assert!(signal.remove_all_pending());
        assert!(signal.take_remove_all());
        assert!(!signal.take_remove_all());
    }

    #[test]
    fn test_sync_now_waits_for_next_cycle() {
        let signal = Arc::new(SyncSignal::default());
        let worker = {
            let signal = Arc::clone(&signal);
            thread::spawn(move || {
                while signal.wait_for_work() {
                    signal.complete_cycle();
                }
                signal.set_state(SyncState::Stopped);
            })
        };

        assert!(signal.sync_now(Duration::from_secs(5)));
        assert!(signal.sync_now(Duration::from_secs(5)));
        let (_, completed) = signal.cycles();
        assert!(completed >= 2);

        signal.request_terminate();
        worker.join().unwrap();
        assert!(!signal.sync_now(Duration::from_millis(50)));
    }
}
