use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};

use bytes::Bytes;
use log::{debug, trace, warn};
use crate::helpers::SshBool;
use ssh_encoding::Encode;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::Notify;

use super::window::{LocalWindow, RemoteWindow};
use super::{ChannelKind, ChannelMsg};
use crate::client::Transport;
use crate::rendezvous::Promise;
use crate::{msg, ChannelId, Error};

/// Mutable state of a channel, shared between the reader task and the
/// caller's handles.
#[derive(Debug)]
pub(crate) struct CoreState {
    pub remote_id: u32,
    pub remote_max_packet: u32,
    pub local: LocalWindow,
    pub eof_sent: bool,
    pub eof_received: bool,
    pub close_sent: bool,
    pub close_received: bool,
    /// The opener stopped waiting for the confirmation.
    pub abandoned: bool,
    /// Want-reply requests, oldest first.
    pub requests: VecDeque<Promise<()>>,
    pub data: Option<UnboundedSender<Bytes>>,
    pub extended: Option<UnboundedSender<(u32, Bytes)>>,
    pub events: Option<UnboundedSender<ChannelMsg>>,
}

impl CoreState {
    pub fn is_closed(&self) -> bool {
        self.close_sent || self.close_received
    }

    pub fn send_event(&self, event: ChannelMsg) {
        if let Some(ref events) = self.events {
            let _ = events.send(event);
        }
    }
}

/// Everything the connection knows about one channel.
#[derive(Debug)]
pub(crate) struct ChannelCore {
    pub id: ChannelId,
    pub kind: ChannelKind,
    pub opened: Promise<()>,
    pub window: RemoteWindow,
    state: Mutex<CoreState>,
}

/// The receiving ends of a channel's streams. Reading data gives the
/// peer window back.
#[derive(Debug)]
pub(crate) struct Inbound {
    core: Arc<ChannelCore>,
    data: Mutex<UnboundedReceiver<Bytes>>,
    extended: Mutex<UnboundedReceiver<(u32, Bytes)>>,
    events: Mutex<UnboundedReceiver<ChannelMsg>>,
    /// Wakes the reader task when a window adjustment is due.
    reads: Arc<Notify>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Inbound {
    fn credit(&self, n: usize) {
        let due = {
            let mut state = self.core.state();
            state.local.read(n);
            !state.close_sent && state.local.is_due()
        };
        if due {
            trace!("channel {}: window adjustment due", self.core.id);
            self.reads.notify_one();
        }
    }

    pub fn poll_data(&self, cx: &mut Context<'_>) -> Poll<Option<Bytes>> {
        let data = lock(&self.data).poll_recv(cx);
        if let Poll::Ready(Some(ref data)) = data {
            self.credit(data.len());
        }
        data
    }

    pub fn poll_extended(&self, cx: &mut Context<'_>) -> Poll<Option<(u32, Bytes)>> {
        let data = lock(&self.extended).poll_recv(cx);
        if let Poll::Ready(Some((_, ref data))) = data {
            self.credit(data.len());
        }
        data
    }

    pub fn poll_event(&self, cx: &mut Context<'_>) -> Poll<Option<ChannelMsg>> {
        lock(&self.events).poll_recv(cx)
    }
}

impl ChannelCore {
    pub fn new(
        id: ChannelId,
        kind: ChannelKind,
        local_window: u32,
        reads: Arc<Notify>,
    ) -> (Arc<Self>, Arc<Inbound>) {
        let (data_tx, data_rx) = unbounded_channel();
        let (ext_tx, ext_rx) = unbounded_channel();
        let (events_tx, events_rx) = unbounded_channel();
        let core = ChannelCore {
            id,
            opened: Promise::new(format!("channel {id} open")),
            kind,
            window: RemoteWindow::new(),
            state: Mutex::new(CoreState {
                remote_id: 0,
                remote_max_packet: 0,
                local: LocalWindow::new(local_window),
                eof_sent: false,
                eof_received: false,
                close_sent: false,
                close_received: false,
                abandoned: false,
                requests: VecDeque::new(),
                data: Some(data_tx),
                extended: Some(ext_tx),
                events: Some(events_tx),
            }),
        };
        let core = Arc::new(core);
        let inbound = Inbound {
            core: core.clone(),
            data: Mutex::new(data_rx),
            extended: Mutex::new(ext_rx),
            events: Mutex::new(events_rx),
            reads,
        };
        (core, Arc::new(inbound))
    }

    pub fn state(&self) -> MutexGuard<'_, CoreState> {
        lock(&self.state)
    }

    /// Records the peer's side of the channel, from the open
    /// confirmation or the peer's open request.
    pub fn set_remote(&self, remote_id: u32, window: u32, max_packet: u32) {
        {
            let mut state = self.state();
            state.remote_id = remote_id;
            state.remote_max_packet = max_packet;
        }
        self.window.grant(window);
    }

    /// Ends the inbound streams, and fails the pending waits and all
    /// later writes with `error`.
    pub fn shutdown(&self, error: Error) {
        self.window.close(error.clone());
        self.opened.deliver_error(error.clone());
        let requests = {
            let mut state = self.state();
            state.data = None;
            state.extended = None;
            state.events = None;
            std::mem::take(&mut state.requests)
        };
        for request in requests {
            request.deliver_error(error.clone());
        }
    }
}

/// A handle on a channel that can send on it.
#[derive(Clone)]
pub(crate) struct ChannelRef {
    pub core: Arc<ChannelCore>,
    pub transport: Arc<Transport>,
}

impl std::fmt::Debug for ChannelRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRef").field("id", &self.core.id).finish()
    }
}

impl ChannelRef {
    /// Sends at most one packet worth of `data`, waiting for window if
    /// needed. Returns how many bytes were sent.
    pub async fn send_chunk(&self, ext: Option<u32>, data: &[u8]) -> Result<usize, Error> {
        if data.is_empty() {
            return Ok(0);
        }
        let max_packet = {
            let state = self.core.state();
            if state.eof_sent || state.is_closed() {
                return Err(Error::ChannelClosed);
            }
            state.remote_max_packet.max(1)
        };
        let wanted = u32::try_from(data.len())
            .unwrap_or(u32::MAX)
            .min(max_packet);
        let n = self.core.window.reserve(wanted).await? as usize;
        let (chunk, _) = data.split_at(n.min(data.len()));

        let mut payload = Vec::with_capacity(chunk.len() + 13);
        let remote_id = self.core.state().remote_id;
        match ext {
            None => {
                msg::CHANNEL_DATA.encode(&mut payload)?;
                remote_id.encode(&mut payload)?;
            }
            Some(code) => {
                msg::CHANNEL_EXTENDED_DATA.encode(&mut payload)?;
                remote_id.encode(&mut payload)?;
                code.encode(&mut payload)?;
            }
        }
        chunk.encode(&mut payload)?;
        trace!("channel {}: sending {} bytes", self.core.id, chunk.len());
        self.transport.send(&payload).await?;
        Ok(chunk.len())
    }

    pub async fn send_data(&self, ext: Option<u32>, mut data: &[u8]) -> Result<(), Error> {
        while !data.is_empty() {
            let n = self.send_chunk(ext, data).await?;
            data = data.get(n..).unwrap_or_default();
        }
        Ok(())
    }

    pub async fn eof(&self) -> Result<(), Error> {
        let remote_id = {
            let mut state = self.core.state();
            if state.eof_sent || state.is_closed() {
                return Ok(());
            }
            state.eof_sent = true;
            state.remote_id
        };
        let mut payload = Vec::new();
        msg::CHANNEL_EOF.encode(&mut payload)?;
        remote_id.encode(&mut payload)?;
        self.transport.send(&payload).await
    }

    pub async fn close(&self) -> Result<(), Error> {
        let remote_id = {
            let mut state = self.core.state();
            if state.close_sent {
                return Ok(());
            }
            state.close_sent = true;
            state.remote_id
        };
        debug!("closing channel {}", self.core.id);
        self.core.window.close(Error::ChannelClosed);
        let mut payload = Vec::new();
        msg::CHANNEL_CLOSE.encode(&mut payload)?;
        remote_id.encode(&mut payload)?;
        let result = self.transport.send(&payload).await;
        self.transport.connection.release_if_closed(self.core.id);
        result
    }

    /// Sends a channel request, waiting for the reply if `want_reply`
    /// is set.
    pub async fn request(&self, name: &str, want_reply: bool, extra: &[u8]) -> Result<(), Error> {
        let mut payload = Vec::with_capacity(extra.len() + name.len() + 10);
        msg::CHANNEL_REQUEST.encode(&mut payload)?;
        self.core.state().remote_id.encode(&mut payload)?;
        name.encode(&mut payload)?;
        want_reply.encode(&mut payload)?;
        payload.extend_from_slice(extra);

        let core = &self.core;
        let promise = self
            .transport
            .send_registered(&payload, || {
                let mut state = core.state();
                if state.is_closed() {
                    return Err(Error::ChannelClosed);
                }
                if !want_reply {
                    return Ok(None);
                }
                let promise = Promise::new(format!("channel {} {name}", core.id));
                state.requests.push_back(promise.clone());
                Ok(Some(promise))
            })
            .await?;
        if let Some(promise) = promise {
            promise.retrieve(self.transport.timeout()).await?;
        }
        Ok(())
    }
}

/// Shared by a [`Channel`](super::Channel) and the readers and writers
/// made from it. Dropping the last one closes the channel, unless a
/// CLOSE was sent already.
#[derive(Debug)]
pub(crate) struct Owner(pub ChannelRef);

impl Drop for Owner {
    fn drop(&mut self) {
        if self.0.core.state().close_sent {
            return;
        }
        debug!("channel {} dropped, closing it", self.0.core.id);
        let channel = self.0.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let _ = channel.close().await;
                });
            }
            Err(_) => warn!("no runtime to close dropped channel {}", self.0.core.id),
        }
    }
}
