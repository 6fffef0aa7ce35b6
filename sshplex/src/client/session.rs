use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use log::{debug, trace, warn};
use crate::helpers::SshBool;
use ssh_encoding::{Decode, Encode};
use tokio::sync::Notify;

use super::{lock, Transport};
use crate::channels::{
    ChannelCore, ChannelKind, ChannelMsg, ChannelOpenRequest, ChannelOpener, ChannelRef,
    CoreState, Inbound,
};
use crate::parsing::{
    open_failure, recipient, ChannelOpenConfirmation, ChannelOpenFailureMessage,
    OpenChannelMessage,
};
use crate::rendezvous::Promise;
use crate::{msg, ChannelId, Error, Sig};

/// The connection protocol state: channels by local id, pending global
/// requests, and the handlers for channels opened by the server.
pub(crate) struct Connection {
    channels: Mutex<BTreeMap<ChannelId, Arc<ChannelCore>>>,
    global_requests: Mutex<VecDeque<Promise<Bytes>>>,
    openers: Mutex<HashMap<String, Arc<dyn ChannelOpener>>>,
    /// Notified when reading a channel made a window adjustment due.
    pub reads: Arc<Notify>,
    window_size: u32,
    maximum_packet_size: u32,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("channels", &lock(&self.channels).len())
            .field("global_requests", &lock(&self.global_requests).len())
            .finish()
    }
}

/// The bytes of the string starting at `r`, as a slice of `payload`.
fn string_slice(payload: &Bytes, r: &mut &[u8]) -> Result<Bytes, Error> {
    let len = u32::decode(r)? as usize;
    let start = payload.len() - r.len();
    let data = r.get(..len).ok_or(Error::PacketSize(len))?;
    *r = r.get(len..).unwrap_or_default();
    Ok(payload.slice(start..start + data.len()))
}

impl Connection {
    pub fn new(window_size: u32, maximum_packet_size: u32) -> Self {
        Connection {
            channels: Mutex::new(BTreeMap::new()),
            global_requests: Mutex::new(VecDeque::new()),
            openers: Mutex::new(HashMap::new()),
            reads: Arc::new(Notify::new()),
            window_size,
            maximum_packet_size,
        }
    }

    /// Creates a channel with the lowest unused local id.
    pub fn allocate(&self, kind: ChannelKind) -> (Arc<ChannelCore>, Arc<Inbound>) {
        let mut channels = lock(&self.channels);
        let mut id = 0u32;
        for existing in channels.keys() {
            if existing.0 != id {
                break;
            }
            id = id.saturating_add(1);
        }
        let (core, inbound) =
            ChannelCore::new(ChannelId(id), kind, self.window_size, self.reads.clone());
        channels.insert(core.id, core.clone());
        trace!("allocated channel {id}");
        (core, inbound)
    }

    pub fn release(&self, id: ChannelId) {
        if lock(&self.channels).remove(&id).is_some() {
            debug!("released channel {id}");
        }
    }

    /// Releases `id` if both sides have sent CLOSE.
    pub fn release_if_closed(&self, id: ChannelId) {
        let mut channels = lock(&self.channels);
        let closed = channels.get(&id).is_some_and(|core| {
            let state = core.state();
            state.close_sent && state.close_received
        });
        if closed {
            channels.remove(&id);
            debug!("released channel {id}");
        }
    }

    pub fn contains(&self, id: ChannelId) -> bool {
        lock(&self.channels).contains_key(&id)
    }

    pub fn len(&self) -> usize {
        lock(&self.channels).len()
    }

    fn get(&self, id: u32) -> Result<Arc<ChannelCore>, Error> {
        match lock(&self.channels).get(&ChannelId(id)) {
            Some(core) => Ok(core.clone()),
            None => {
                debug!("message for unknown channel {id}");
                Err(Error::WrongChannel)
            }
        }
    }

    /// The opener stopped waiting for `core` to open. A confirmation
    /// still to come is answered with CLOSE, and a channel that opened
    /// in the meantime is closed.
    pub fn abandon(&self, t: &Arc<Transport>, core: &Arc<ChannelCore>) {
        {
            let mut state = core.state();
            if core.opened.is_pending() {
                debug!("channel {} abandoned before confirmation", core.id);
                state.abandoned = true;
                return;
            }
        }
        if let Some(Ok(())) = core.opened.try_retrieve() {
            let channel = ChannelRef {
                core: core.clone(),
                transport: t.clone(),
            };
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        let _ = channel.close().await;
                    });
                }
                Err(_) => warn!("no runtime to close abandoned channel {}", core.id),
            }
        }
    }

    /// Grants window back to the peer on every channel where reading
    /// made room.
    pub async fn send_window_adjusts(&self, t: &Arc<Transport>) -> Result<(), Error> {
        let channels: Vec<_> = lock(&self.channels).values().cloned().collect();
        for core in channels {
            let adjust = window_adjustment(&mut core.state());
            if let Some((remote_id, n)) = adjust {
                trace!("channel {}: granting {n} bytes", core.id);
                t.send(&window_adjust_payload(remote_id, n)?).await?;
            }
        }
        Ok(())
    }

    pub fn register_opener(&self, channel_type: &str, opener: Arc<dyn ChannelOpener>) {
        lock(&self.openers).insert(channel_type.to_string(), opener);
    }

    pub fn push_global_request(&self, name: &str) -> Promise<Bytes> {
        let promise = Promise::new(format!("global request {name}"));
        lock(&self.global_requests).push_back(promise.clone());
        promise
    }

    /// Fails every channel and pending global request with `error`.
    pub fn fail(&self, error: &Error) {
        let channels = std::mem::take(&mut *lock(&self.channels));
        for core in channels.values() {
            core.shutdown(error.clone());
        }
        let requests = std::mem::take(&mut *lock(&self.global_requests));
        for request in requests {
            request.deliver_error(error.clone());
        }
    }

    /// Handles a connection protocol message (80 to 127).
    pub async fn handle(&self, t: &Arc<Transport>, msg: u8, payload: &Bytes) -> Result<(), Error> {
        let mut r = payload.get(1..).unwrap_or_default();
        match msg {
            msg::CHANNEL_OPEN_CONFIRMATION => {
                let confirmation = ChannelOpenConfirmation::parse(&mut r)?;
                let core = self.get(confirmation.recipient_channel)?;
                if !core.opened.is_pending() {
                    debug!("channel {} confirmed twice", core.id);
                    return Err(Error::Inconsistent);
                }
                core.set_remote(
                    confirmation.sender_channel,
                    confirmation.initial_window_size,
                    confirmation.maximum_packet_size,
                );
                let abandoned = {
                    let mut state = core.state();
                    if state.abandoned {
                        state.close_sent = true;
                        true
                    } else {
                        core.opened.deliver(());
                        false
                    }
                };
                debug!(
                    "channel {} confirmed (remote {})",
                    core.id, confirmation.sender_channel
                );
                if abandoned {
                    debug!("closing abandoned channel {}", core.id);
                    core.window.close(Error::ChannelClosed);
                    t.send(&close_payload(confirmation.sender_channel)?).await?;
                }
                Ok(())
            }
            msg::CHANNEL_OPEN_FAILURE => {
                let failure = ChannelOpenFailureMessage::parse(&mut r)?;
                let core = self.get(failure.recipient_channel)?;
                debug!(
                    "channel {} refused ({:?}): {}",
                    core.id, failure.reason, failure.description
                );
                core.opened.deliver_error(Error::ChannelOpenFailure {
                    reason: failure.reason,
                    message: failure.description,
                });
                self.release(core.id);
                Ok(())
            }
            msg::CHANNEL_WINDOW_ADJUST => {
                let core = self.get(recipient(&mut r)?)?;
                let n = u32::decode(&mut r)?;
                let new_size = core.window.grant(n);
                trace!("channel {}: window adjusted by {n} to {new_size}", core.id);
                core.state()
                    .send_event(ChannelMsg::WindowAdjusted { new_size });
                Ok(())
            }
            msg::CHANNEL_DATA | msg::CHANNEL_EXTENDED_DATA => {
                let core = self.get(recipient(&mut r)?)?;
                let ext = if msg == msg::CHANNEL_EXTENDED_DATA {
                    Some(u32::decode(&mut r)?)
                } else {
                    None
                };
                let data = string_slice(payload, &mut r)?;
                if data.len() > self.maximum_packet_size as usize {
                    debug!(
                        "channel {}: {} bytes in one packet, above {}",
                        core.id,
                        data.len(),
                        self.maximum_packet_size
                    );
                    return Err(Error::PacketSize(data.len()));
                }
                let adjust = {
                    let mut state = core.state();
                    if state.eof_received || state.close_received {
                        debug!("channel {}: data after EOF", core.id);
                        return Err(Error::Inconsistent);
                    }
                    let len = data.len();
                    state.local.receive(len)?;
                    trace!("channel {}: received {len} bytes", core.id);
                    let delivered = match ext {
                        None => state.data.as_ref().is_some_and(|tx| tx.send(data).is_ok()),
                        Some(code) => state
                            .extended
                            .as_ref()
                            .is_some_and(|tx| tx.send((code, data)).is_ok()),
                    };
                    if !delivered {
                        trace!("channel {}: nobody reads, discarding {len} bytes", core.id);
                        state.local.read(len);
                    }
                    window_adjustment(&mut state)
                };
                if let Some((remote_id, n)) = adjust {
                    t.send(&window_adjust_payload(remote_id, n)?).await?;
                }
                Ok(())
            }
            msg::CHANNEL_EOF => {
                let core = self.get(recipient(&mut r)?)?;
                debug!("channel {}: EOF", core.id);
                let mut state = core.state();
                state.eof_received = true;
                state.data = None;
                state.extended = None;
                state.send_event(ChannelMsg::Eof);
                Ok(())
            }
            msg::CHANNEL_CLOSE => {
                let core = self.get(recipient(&mut r)?)?;
                debug!("channel {}: CLOSE", core.id);
                let reply = {
                    let mut state = core.state();
                    state.close_received = true;
                    state.send_event(ChannelMsg::Close);
                    let reply = !state.close_sent;
                    state.close_sent = true;
                    reply.then_some(state.remote_id)
                };
                core.shutdown(Error::ChannelClosed);
                self.release(core.id);
                if let Some(remote_id) = reply {
                    t.send(&close_payload(remote_id)?).await?;
                }
                Ok(())
            }
            msg::CHANNEL_REQUEST => {
                let core = self.get(recipient(&mut r)?)?;
                let name = String::decode(&mut r)?;
                let want_reply = bool::decode(&mut r)?;
                debug!("channel {}: request {name:?}", core.id);
                let known = match name.as_str() {
                    "exit-status" => {
                        let exit_status = u32::decode(&mut r)?;
                        core.state()
                            .send_event(ChannelMsg::ExitStatus { exit_status });
                        true
                    }
                    "exit-signal" => {
                        let signal_name = Sig::from_name(&String::decode(&mut r)?);
                        let core_dumped = bool::decode(&mut r)?;
                        let error_message = String::decode(&mut r)?;
                        let lang_tag = String::decode(&mut r).unwrap_or_default();
                        core.state().send_event(ChannelMsg::ExitSignal {
                            signal_name,
                            core_dumped,
                            error_message,
                            lang_tag,
                        });
                        true
                    }
                    "xon-xoff" => {
                        let client_can_do = bool::decode(&mut r)?;
                        core.state()
                            .send_event(ChannelMsg::XonXoff { client_can_do });
                        true
                    }
                    "keepalive@openssh.com" => true,
                    _ => {
                        debug!("unknown channel request {name:?}");
                        false
                    }
                };
                if want_reply {
                    let remote_id = core.state().remote_id;
                    let mut out = Vec::new();
                    if known {
                        msg::CHANNEL_SUCCESS.encode(&mut out)?;
                    } else {
                        msg::CHANNEL_FAILURE.encode(&mut out)?;
                    }
                    remote_id.encode(&mut out)?;
                    t.send(&out).await?;
                }
                Ok(())
            }
            msg::CHANNEL_SUCCESS | msg::CHANNEL_FAILURE => {
                let core = self.get(recipient(&mut r)?)?;
                let pending = core.state().requests.pop_front();
                match pending {
                    Some(request) if msg == msg::CHANNEL_SUCCESS => request.deliver(()),
                    Some(request) => request.deliver_error(Error::RequestDenied),
                    None => {
                        debug!("channel {}: reply without request", core.id);
                        return Err(Error::Inconsistent);
                    }
                }
                Ok(())
            }
            msg::GLOBAL_REQUEST => {
                let name = String::decode(&mut r)?;
                let want_reply = bool::decode(&mut r)?;
                debug!("global request {name:?}, refusing");
                if want_reply {
                    t.send(&[msg::REQUEST_FAILURE]).await?;
                }
                Ok(())
            }
            msg::REQUEST_SUCCESS | msg::REQUEST_FAILURE => {
                let pending = lock(&self.global_requests).pop_front();
                match pending {
                    Some(request) if msg == msg::REQUEST_SUCCESS => {
                        request.deliver(payload.slice(1..))
                    }
                    Some(request) => request.deliver_error(Error::RequestDenied),
                    None => {
                        debug!("global reply without request");
                        return Err(Error::Inconsistent);
                    }
                }
                Ok(())
            }
            msg::CHANNEL_OPEN => {
                let message = OpenChannelMessage::parse(&mut r)?;
                let opener = lock(&self.openers)
                    .get(message.kind.type_name())
                    .cloned();
                match opener {
                    Some(opener) => {
                        debug!("server opens a {} channel", message.kind.type_name());
                        opener.open(ChannelOpenRequest::new(message, t.clone()));
                        Ok(())
                    }
                    None => {
                        debug!(
                            "refusing {} channel: no opener",
                            message.kind.type_name()
                        );
                        t.send(&open_failure(
                            message.sender_channel,
                            msg::SSH_OPEN_UNKNOWN_CHANNEL_TYPE,
                            "unknown channel type",
                        )?)
                        .await
                    }
                }
            }
            _ => {
                debug!("unhandled connection message {msg:?}");
                Err(Error::Inconsistent)
            }
        }
    }
}

/// The peer's channel id and the window to grant it, unless we closed
/// the channel.
fn window_adjustment(state: &mut CoreState) -> Option<(u32, u32)> {
    if state.close_sent {
        return None;
    }
    state.local.adjustment().map(|n| (state.remote_id, n))
}

fn window_adjust_payload(remote_id: u32, n: u32) -> Result<Vec<u8>, Error> {
    let mut out = Vec::new();
    msg::CHANNEL_WINDOW_ADJUST.encode(&mut out)?;
    remote_id.encode(&mut out)?;
    n.encode(&mut out)?;
    Ok(out)
}

fn close_payload(remote_id: u32) -> Result<Vec<u8>, Error> {
    let mut out = Vec::new();
    msg::CHANNEL_CLOSE.encode(&mut out)?;
    remote_id.encode(&mut out)?;
    Ok(out)
}

/// Abandons a channel open if the opening future is dropped before the
/// answer arrived.
pub(crate) struct OpenGuard<'a> {
    transport: &'a Arc<Transport>,
    core: &'a Arc<ChannelCore>,
    armed: bool,
}

impl<'a> OpenGuard<'a> {
    pub fn new(transport: &'a Arc<Transport>, core: &'a Arc<ChannelCore>) -> Self {
        OpenGuard {
            transport,
            core,
            armed: true,
        }
    }

    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for OpenGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.transport.connection.abandon(self.transport, self.core);
        }
    }
}
