// Copyright 2016 Pierre-Étienne Meunier
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Single-assignment slots that the reader task resolves and caller
//! tasks wait on.
//!
//! A [`Promise`] is resolved exactly once, either with a value or with
//! an error, and every waiter (present or future) observes the same
//! outcome. Waiting may be bounded by a timeout, which is reported as
//! [`Error::Timeout`] and leaves the promise pending.

use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, trace};
use tokio::sync::Notify;

use crate::Error;

struct State<T> {
    outcome: Option<Result<T, Error>>,
    waiters: usize,
}

struct Inner<T> {
    name: String,
    state: Mutex<State<T>>,
    notify: Notify,
}

/// A value or an error that will be delivered later.
///
/// Cloning a promise yields another handle to the same slot.
pub struct Promise<T> {
    inner: Arc<Inner<T>>,
}

/// A promise without a value, used to signal that something happened.
pub type Event = Promise<()>;

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Promise {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Debug for Promise<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("Promise")
            .field("name", &self.inner.name)
            .field(
                "state",
                &match state.outcome {
                    None => "pending",
                    Some(Ok(_)) => "delivered",
                    Some(Err(_)) => "failed",
                },
            )
            .field("waiters", &state.waiters)
            .finish()
    }
}

/// Decrements the waiter count when a wait ends, including when the
/// waiting future is dropped.
struct WaiterGuard<'a, T> {
    promise: &'a Promise<T>,
}

impl<T> Drop for WaiterGuard<'_, T> {
    fn drop(&mut self) {
        let mut state = self.promise.state();
        state.waiters = state.waiters.saturating_sub(1);
    }
}

impl<T> Promise<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Promise {
            inner: Arc::new(Inner {
                name: name.into(),
                state: Mutex::new(State {
                    outcome: None,
                    waiters: 0,
                }),
                notify: Notify::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State<T>> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Resolves the promise with a value. Has no effect if it was
    /// already resolved.
    pub fn deliver(&self, value: T) {
        self.resolve(Ok(value))
    }

    /// Resolves the promise with an error. Has no effect if it was
    /// already resolved.
    pub fn deliver_error(&self, error: Error) {
        self.resolve(Err(error))
    }

    fn resolve(&self, outcome: Result<T, Error>) {
        {
            let mut state = self.state();
            if state.outcome.is_some() {
                trace!("{}: already resolved", self.inner.name);
                return;
            }
            debug!(
                "{}: {} ({} waiting)",
                self.inner.name,
                if outcome.is_ok() { "delivered" } else { "failed" },
                state.waiters
            );
            state.outcome = Some(outcome);
        }
        self.inner.notify.notify_waiters();
    }

    /// Makes a resolved promise pending again, for slots that are
    /// reused across rounds (such as key exchanges).
    pub fn clear(&self) {
        self.state().outcome = None;
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self.state().outcome, Some(Ok(_)))
    }

    pub fn in_error(&self) -> bool {
        matches!(self.state().outcome, Some(Err(_)))
    }

    pub fn is_pending(&self) -> bool {
        self.state().outcome.is_none()
    }

    /// Whether some task is currently blocked in [`Promise::retrieve`].
    pub fn has_waiters(&self) -> bool {
        self.state().waiters > 0
    }
}

impl<T: Clone> Promise<T> {
    /// The outcome, if the promise is resolved.
    pub fn try_retrieve(&self) -> Option<Result<T, Error>> {
        self.state().outcome.clone()
    }

    /// Waits for the promise to be resolved, at most `timeout` if one
    /// is given.
    pub async fn retrieve(&self, timeout: Option<Duration>) -> Result<T, Error> {
        self.state().waiters += 1;
        let _guard = WaiterGuard { promise: self };
        let wait = async {
            loop {
                let notified = self.inner.notify.notified();
                tokio::pin!(notified);
                // Register before looking at the state, so that a
                // resolution in between is not missed.
                notified.as_mut().enable();
                if let Some(outcome) = self.state().outcome.clone() {
                    return outcome;
                }
                notified.await;
            }
        };
        match timeout {
            None => wait.await,
            Some(duration) => match tokio::time::timeout(duration, wait).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    debug!("{}: timed out after {:?}", self.inner.name, duration);
                    Err(Error::Timeout {
                        what: self.inner.name.clone(),
                    })
                }
            },
        }
    }
}
