use std::sync::{Mutex, MutexGuard};

use log::{debug, trace};
use tokio::sync::Notify;

use crate::Error;

struct RemoteState {
    available: u32,
    closed: Option<Error>,
}

/// How much the peer lets us send on a channel. Writers wait here
/// until the peer grants some window with `CHANNEL_WINDOW_ADJUST`.
pub(crate) struct RemoteWindow {
    state: Mutex<RemoteState>,
    notify: Notify,
}

impl std::fmt::Debug for RemoteWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("RemoteWindow")
            .field("available", &state.available)
            .field("closed", &state.closed.is_some())
            .finish()
    }
}

impl RemoteWindow {
    pub fn new() -> Self {
        RemoteWindow {
            state: Mutex::new(RemoteState {
                available: 0,
                closed: None,
            }),
            notify: Notify::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, RemoteState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn available(&self) -> u32 {
        self.state().available
    }

    /// Takes between 1 and `max` bytes of window, waiting while none is
    /// available. Fails once the window is closed.
    pub async fn reserve(&self, max: u32) -> Result<u32, Error> {
        if max == 0 {
            return Ok(0);
        }
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.state();
                if let Some(ref e) = state.closed {
                    return Err(e.clone());
                }
                if state.available > 0 {
                    let n = state.available.min(max);
                    state.available -= n;
                    trace!("reserved {n} bytes, {} left", state.available);
                    return Ok(n);
                }
            }
            debug!("waiting for the remote window");
            notified.await;
        }
    }

    /// Adds `n` bytes to the window. The window never exceeds
    /// `2^32 - 1` bytes.
    pub fn grant(&self, n: u32) -> u32 {
        let available = {
            let mut state = self.state();
            state.available = state.available.saturating_add(n);
            state.available
        };
        self.notify.notify_waiters();
        available
    }

    /// Wakes every writer with `error`, now and for all later calls.
    pub fn close(&self, error: Error) {
        {
            let mut state = self.state();
            if state.closed.is_none() {
                state.closed = Some(error);
            }
        }
        self.notify.notify_waiters();
    }
}

/// How much we let the peer send. Bytes count against the window from
/// the moment they arrive until the application reads them, and the
/// window is only credited back for bytes that were read.
#[derive(Debug)]
pub(crate) struct LocalWindow {
    initial: u32,
    /// What the peer may still send.
    available: u32,
    /// Received and not read yet.
    buffered: u32,
}

impl LocalWindow {
    pub fn new(initial: u32) -> Self {
        LocalWindow {
            initial,
            available: initial,
            buffered: 0,
        }
    }

    pub fn available(&self) -> u32 {
        self.available
    }

    /// Accounts for `n` bytes received from the peer.
    pub fn receive(&mut self, n: usize) -> Result<(), Error> {
        let n = u32::try_from(n).map_err(|_| Error::PacketSize(n))?;
        if n > self.available {
            debug!(
                "peer sent {n} bytes with only {} bytes of window",
                self.available
            );
            return Err(Error::Inconsistent);
        }
        self.available -= n;
        self.buffered = self.buffered.saturating_add(n);
        Ok(())
    }

    /// Accounts for `n` bytes handed to the application, or discarded.
    pub fn read(&mut self, n: usize) {
        let n = u32::try_from(n).unwrap_or(u32::MAX);
        self.buffered = self.buffered.saturating_sub(n);
    }

    fn held(&self) -> u32 {
        self.available.saturating_add(self.buffered)
    }

    /// Whether less than half of the window is either available or
    /// waiting to be read.
    pub fn is_due(&self) -> bool {
        self.held() < self.initial / 2
    }

    /// The adjustment to send, if one is due. Counts it as granted.
    pub fn adjustment(&mut self) -> Option<u32> {
        if !self.is_due() {
            return None;
        }
        let credit = self.initial - self.held();
        self.available += credit;
        Some(credit)
    }
}
