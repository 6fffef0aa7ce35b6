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
//

//! # Implementing clients
//!
//! [`connect`] (or [`connect_stream`] for an existing socket) runs the
//! identification exchange and the first key exchange, then returns a
//! [`Handle`]. From there:
//!
//! * the user authentication protocol runs on top of
//!   [`Handle::request_service`], [`Handle::send_packet`] and
//!   [`Handle::auth_packets`];
//! * channels are opened with [`Handle::channel_open_session`] and
//!   friends, and channels opened by the server are handed to the
//!   [`ChannelOpener`] registered for their type;
//! * keys are renewed automatically under [`Config::limits`], or on
//!   demand with [`Handle::rekey`].
//!
//! A single task, spawned by [`connect_stream`], reads from the
//! socket and dispatches every packet.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use log::{debug, error, info, trace, warn};
use crate::helpers::SshBool;
use ssh_encoding::{Decode, Encode};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::channels::{Channel, ChannelKind, ChannelOpener, SessionChannel};
use crate::codec::Decoder;
use crate::hostkey::ServerKeyVerifier;
use crate::negotiation::{Negotiated, Preferred};
use crate::rendezvous::{Event, Promise};
use crate::session::Writer;
use crate::sshbuffer::{read_ssh_id, SshId};
use crate::{msg, Disconnect, Error, Limits};

mod encrypted;
mod kex;
mod session;

pub use kex::KexPhase;
use kex::KexEngine;
pub(crate) use session::Connection;

/// How long a failing connection tries to send its DISCONNECT.
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Group sizes, in bits, asked for in a Diffie-Hellman group exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GexParams {
    pub(crate) min_group_size: usize,
    pub(crate) preferred_group_size: usize,
    pub(crate) max_group_size: usize,
}

impl GexParams {
    pub fn new(
        min_group_size: usize,
        preferred_group_size: usize,
        max_group_size: usize,
    ) -> Result<Self, Error> {
        let this = Self {
            min_group_size,
            preferred_group_size,
            max_group_size,
        };
        this.validate()?;
        Ok(this)
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.min_group_size < 2048 {
            return Err(Error::InvalidConfig(
                "min_group_size must be at least 2048 bits".into(),
            ));
        }
        if self.min_group_size > self.preferred_group_size
            || self.preferred_group_size > self.max_group_size
        {
            return Err(Error::InvalidConfig(
                "group sizes must satisfy min <= preferred <= max".into(),
            ));
        }
        Ok(())
    }

    pub fn min_group_size(&self) -> usize {
        self.min_group_size
    }

    pub fn preferred_group_size(&self) -> usize {
        self.preferred_group_size
    }

    pub fn max_group_size(&self) -> usize {
        self.max_group_size
    }
}

impl Default for GexParams {
    fn default() -> GexParams {
        GexParams {
            min_group_size: 2048,
            preferred_group_size: 3072,
            max_group_size: 8192,
        }
    }
}

/// The configuration of clients.
#[derive(Debug)]
pub struct Config {
    /// The client ID string sent at the beginning of the protocol.
    pub client_id: SshId,
    /// The bytes and time limits before key re-exchange.
    pub limits: Limits,
    /// The initial size of a channel (used for flow control).
    pub window_size: u32,
    /// The maximal size of a single packet.
    pub maximum_packet_size: u32,
    /// Lists of preferred algorithms.
    pub preferred: Preferred,
    /// Group sizes for `diffie-hellman-group-exchange-*`.
    pub gex: GexParams,
    /// How long to wait for each answer from the server (identification,
    /// key exchange, channel opens, requests). `None` waits until the
    /// connection ends.
    pub timeout: Option<Duration>,
    /// Whether to offer strict key exchange.
    pub strict_kex: bool,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            client_id: SshId::Standard(format!(
                "SSH-2.0-{}_{}",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION")
            )),
            limits: Limits::default(),
            window_size: 2097152,
            maximum_packet_size: 32768,
            preferred: Default::default(),
            gex: GexParams::default(),
            timeout: None,
            strict_kex: true,
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// The state shared by the reader task and every handle of a
/// connection.
///
/// Lock order: `kex`, then `writer`. The `std` mutexes are never held
/// across an `.await`.
pub(crate) struct Transport {
    pub config: Arc<Config>,
    writer: tokio::sync::Mutex<Writer>,
    kex: tokio::sync::Mutex<KexEngine>,
    pub connection: Connection,
    error: Mutex<Option<Error>>,
    /// Resolved when the current key exchange completes.
    kex_event: Mutex<Event>,
    kex_ongoing: AtomicBool,
    strict_kex: AtomicBool,
    peer_in_kex: AtomicBool,
    last_kex: Mutex<Instant>,
    session_id: Mutex<Option<Vec<u8>>>,
    negotiated: Mutex<Option<Negotiated>>,
    service_requests: Mutex<VecDeque<Promise<()>>>,
    auth_tx: Mutex<Option<UnboundedSender<Bytes>>>,
    auth_rx: Mutex<Option<UnboundedReceiver<Bytes>>>,
    rekey_wanted: Notify,
    closed: Event,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("kex_ongoing", &self.kex_ongoing.load(Ordering::Relaxed))
            .field("error", &*lock(&self.error))
            .finish()
    }
}

impl Transport {
    pub(crate) fn new(
        config: Arc<Config>,
        stream: Box<dyn AsyncWrite + Send + Unpin>,
        server_id: Vec<u8>,
        host: &str,
        port: u16,
        verifier: Arc<dyn ServerKeyVerifier>,
    ) -> Arc<Self> {
        let (auth_tx, auth_rx) = unbounded_channel();
        let kex = KexEngine::new(config.clone(), server_id, host, port, verifier);
        Arc::new(Transport {
            writer: tokio::sync::Mutex::new(Writer::new(stream, config.limits.clone())),
            kex: tokio::sync::Mutex::new(kex),
            connection: Connection::new(config.window_size, config.maximum_packet_size),
            config,
            error: Mutex::new(None),
            kex_event: Mutex::new(Event::new("key exchange")),
            kex_ongoing: AtomicBool::new(false),
            strict_kex: AtomicBool::new(false),
            peer_in_kex: AtomicBool::new(false),
            last_kex: Mutex::new(Instant::now()),
            session_id: Mutex::new(None),
            negotiated: Mutex::new(None),
            service_requests: Mutex::new(VecDeque::new()),
            auth_tx: Mutex::new(Some(auth_tx)),
            auth_rx: Mutex::new(Some(auth_rx)),
            rekey_wanted: Notify::new(),
            closed: Event::new("connection closed"),
        })
    }

    /// Sends our first KEXINIT and spawns the reader task, which owns
    /// `decoder` from now on.
    pub(crate) async fn start<R>(self: &Arc<Self>, stream: R, decoder: Decoder) -> Result<(), Error>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        self.start_kex().await?;
        tokio::spawn(run_reader(self.clone(), stream, decoder));
        Ok(())
    }

    pub(crate) fn timeout(&self) -> Option<Duration> {
        self.config.timeout
    }

    /// The error that ended the connection, if it ended.
    pub(crate) fn error(&self) -> Option<Error> {
        lock(&self.error).clone()
    }

    fn check(&self) -> Result<(), Error> {
        match self.error() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub(crate) async fn send(&self, payload: &[u8]) -> Result<(), Error> {
        self.send_registered(payload, || Ok(())).await
    }

    /// Sends `payload`, running `register` under the writer lock just
    /// before. Waits registered this way are in the same order as the
    /// packets on the wire.
    pub(crate) async fn send_registered<R>(
        &self,
        payload: &[u8],
        register: impl FnOnce() -> Result<R, Error>,
    ) -> Result<R, Error> {
        self.check()?;
        let mut writer = self.writer.lock().await;
        self.check()?;
        let registered = register()?;
        match writer.send(payload).await {
            Ok(rekey) => {
                if rekey {
                    debug!("outbound limits reached, asking for a key exchange");
                    self.rekey_wanted.notify_one();
                }
                Ok(registered)
            }
            Err(e) => {
                drop(writer);
                self.fail(e.clone()).await;
                Err(e)
            }
        }
    }

    /// Starts a key exchange unless one is running, and returns the
    /// event resolved at its end.
    pub(crate) async fn start_kex(&self) -> Result<Event, Error> {
        self.check()?;
        let result = {
            let mut kex = self.kex.lock().await;
            kex.start(self).await
        };
        match result {
            Ok(()) => Ok(lock(&self.kex_event).clone()),
            Err(e) => {
                self.fail(e.clone()).await;
                Err(e)
            }
        }
    }

    pub(crate) fn kex_event(&self) -> Event {
        lock(&self.kex_event).clone()
    }

    /// When the time limit calls for a new key exchange.
    fn rekey_deadline(&self) -> Instant {
        if self.kex_ongoing.load(Ordering::Acquire) || lock(&self.session_id).is_none() {
            // Far enough to never fire, but not so far as to overflow.
            return Instant::now() + Duration::from_secs(86400 * 365);
        }
        *lock(&self.last_kex) + self.config.limits.rekey_time_limit
    }

    /// Ends the connection with `error`: tries to tell the server, then
    /// wakes every task waiting on the connection with the error. Only
    /// the first call has an effect.
    pub(crate) async fn fail(&self, error: Error) {
        {
            let mut slot = lock(&self.error);
            if slot.is_some() {
                return;
            }
            *slot = Some(error.clone());
        }
        match error {
            Error::Disconnect { .. } | Error::HUP => info!("connection closed: {error}"),
            _ => error!("connection failed: {error}"),
        }

        let goodbye = async {
            let mut writer = self.writer.lock().await;
            if let Some(reason) = error.disconnect_reason() {
                match disconnect_payload(reason, &error.to_string()) {
                    Ok(payload) => {
                        if let Err(e) = writer.send(&payload).await {
                            debug!("could not send disconnect: {e:?}");
                        }
                    }
                    Err(e) => debug!("could not encode disconnect: {e:?}"),
                }
            }
            writer.shutdown().await;
        };
        if tokio::time::timeout(DISCONNECT_TIMEOUT, goodbye).await.is_err() {
            debug!("timed out closing the socket");
        }

        self.kex_ongoing.store(false, Ordering::Release);
        self.kex_event().deliver_error(error.clone());
        self.connection.fail(&error);
        let services = std::mem::take(&mut *lock(&self.service_requests));
        for service in services {
            service.deliver_error(error.clone());
        }
        lock(&self.auth_tx).take();
        self.closed.deliver(());
    }
}

pub(crate) fn disconnect_payload(reason: Disconnect, description: &str) -> Result<Vec<u8>, Error> {
    let mut payload = Vec::new();
    msg::DISCONNECT.encode(&mut payload)?;
    (reason as u32).encode(&mut payload)?;
    description.encode(&mut payload)?;
    "en".encode(&mut payload)?;
    Ok(payload)
}

/// Reads until the connection ends, then fails it with the reason.
async fn run_reader<R: AsyncRead + Unpin>(transport: Arc<Transport>, mut stream: R, mut decoder: Decoder) {
    let error = match read_loop(&transport, &mut stream, &mut decoder).await {
        Ok(()) => Error::HUP,
        Err(e) => e,
    };
    debug!("reader stopped: {error:?}");
    transport.fail(error).await;
}

async fn read_loop<R: AsyncRead + Unpin>(
    t: &Arc<Transport>,
    stream: &mut R,
    decoder: &mut Decoder,
) -> Result<(), Error> {
    let mut buffer = vec![0; 65536];
    loop {
        while let Some((seqn, payload)) = decoder.decode()? {
            encrypted::dispatch(t, seqn, &payload, decoder).await?;
            if decoder.needs_rekey(&t.config.limits) && !t.kex_ongoing.load(Ordering::Acquire) {
                debug!("inbound limits reached, starting a key exchange");
                t.start_kex().await?;
            }
        }
        let deadline = t.rekey_deadline();
        tokio::select! {
            n = stream.read(&mut buffer) => {
                let n = n?;
                if n == 0 {
                    debug!("connection closed by the server");
                    return Err(Error::HUP);
                }
                trace!("read {n} bytes");
                decoder.feed(buffer.get(..n).unwrap_or_default());
            }
            _ = t.rekey_wanted.notified() => {
                t.start_kex().await?;
            }
            _ = t.connection.reads.notified() => {
                t.connection.send_window_adjusts(t).await?;
            }
            _ = tokio::time::sleep_until(deadline) => {
                debug!("time limit reached, starting a key exchange");
                t.start_kex().await?;
            }
            _ = t.closed.retrieve(None) => return Ok(()),
        }
    }
}

/// A handle to a connection. Clones share the connection.
///
/// The connection stays up until [`Handle::disconnect`] is called, the
/// server closes it, or a fatal error happens.
#[derive(Clone, Debug)]
pub struct Handle {
    transport: Arc<Transport>,
}

impl Handle {
    /// Sends `SERVICE_REQUEST` and waits for `SERVICE_ACCEPT`.
    pub async fn request_service(&self, name: &str) -> Result<(), Error> {
        let t = &self.transport;
        let mut payload = Vec::new();
        msg::SERVICE_REQUEST.encode(&mut payload)?;
        name.encode(&mut payload)?;
        let promise = t
            .send_registered(&payload, || {
                let promise = Promise::new(format!("service {name}"));
                lock(&t.service_requests).push_back(promise.clone());
                Ok(promise)
            })
            .await?;
        promise.retrieve(t.timeout()).await
    }

    /// Sends a packet of the authentication protocol (messages 50 to
    /// 79). Anything else is refused: channels and global requests have
    /// their own methods, which keep the connection state in step.
    pub async fn send_packet(&self, payload: &[u8]) -> Result<(), Error> {
        match payload.first() {
            Some(&m) if (50..=79).contains(&m) => self.transport.send(payload).await,
            _ => Err(Error::Inconsistent),
        }
    }

    /// The authentication protocol messages (50 to 79) received from
    /// the server, in order. Can be taken only once.
    pub fn auth_packets(&self) -> Option<UnboundedReceiver<Bytes>> {
        lock(&self.transport.auth_rx).take()
    }

    /// Opens a channel of any kind.
    pub async fn channel_open(&self, kind: ChannelKind) -> Result<Channel, Error> {
        let t = &self.transport;
        let (core, inbound) = t.connection.allocate(kind);
        let mut payload = Vec::new();
        msg::CHANNEL_OPEN.encode(&mut payload)?;
        core.kind.type_name().encode(&mut payload)?;
        core.id.encode(&mut payload)?;
        t.config.window_size.encode(&mut payload)?;
        t.config.maximum_packet_size.encode(&mut payload)?;
        core.kind.encode_extra(&mut payload)?;

        debug!("opening {} channel {}", core.kind.type_name(), core.id);
        let mut guard = session::OpenGuard::new(t, &core);
        t.send(&payload).await?;
        let opened = core.opened.retrieve(t.timeout()).await;
        guard.disarm();
        drop(guard);
        match opened {
            Ok(()) => Ok(Channel::new(core, inbound, t.clone())),
            Err(e) => {
                // A refusal was already released by the reader task.
                if let Error::Timeout { .. } = e {
                    t.connection.abandon(t, &core);
                }
                Err(e)
            }
        }
    }

    pub async fn channel_open_session(&self) -> Result<SessionChannel, Error> {
        Ok(SessionChannel::new(
            self.channel_open(ChannelKind::Session).await?,
        ))
    }

    /// Asks the server to connect to `host_to_connect:port_to_connect`.
    pub async fn channel_open_direct_tcpip(
        &self,
        host_to_connect: &str,
        port_to_connect: u32,
        originator_address: &str,
        originator_port: u32,
    ) -> Result<Channel, Error> {
        self.channel_open(ChannelKind::DirectTcpip {
            host_to_connect: host_to_connect.into(),
            port_to_connect,
            originator_address: originator_address.into(),
            originator_port,
        })
        .await
    }

    pub async fn channel_open_x11(
        &self,
        originator_address: &str,
        originator_port: u32,
    ) -> Result<Channel, Error> {
        self.channel_open(ChannelKind::X11 {
            originator_address: originator_address.into(),
            originator_port,
        })
        .await
    }

    /// Hands the channels of type `channel_type` opened by the server
    /// to `opener`. Other types are refused.
    pub fn register_opener(&self, channel_type: &str, opener: impl ChannelOpener + 'static) {
        self.transport
            .connection
            .register_opener(channel_type, Arc::new(opener));
    }

    /// Sends a global request. With `want_reply`, waits for the answer
    /// and returns its data, a failure being [`Error::RequestDenied`].
    pub async fn global_request(
        &self,
        name: &str,
        want_reply: bool,
        extra: &[u8],
    ) -> Result<Option<Bytes>, Error> {
        let t = &self.transport;
        let mut payload = Vec::new();
        msg::GLOBAL_REQUEST.encode(&mut payload)?;
        name.encode(&mut payload)?;
        want_reply.encode(&mut payload)?;
        payload.extend_from_slice(extra);
        let promise = t
            .send_registered(&payload, || {
                Ok(want_reply.then(|| t.connection.push_global_request(name)))
            })
            .await?;
        match promise {
            Some(promise) => Ok(Some(promise.retrieve(t.timeout()).await?)),
            None => Ok(None),
        }
    }

    /// Asks the server to listen on `address:port` and forward the
    /// connections it accepts as `forwarded-tcpip` channels. Returns
    /// the port, which the server picks when `port` is 0.
    pub async fn tcpip_forward(&self, address: &str, port: u32) -> Result<u32, Error> {
        let mut extra = Vec::new();
        address.encode(&mut extra)?;
        port.encode(&mut extra)?;
        let reply = self
            .global_request("tcpip-forward", true, &extra)
            .await?
            .unwrap_or_default();
        if port == 0 {
            Ok(u32::decode(&mut reply.as_ref())?)
        } else {
            Ok(port)
        }
    }

    pub async fn cancel_tcpip_forward(&self, address: &str, port: u32) -> Result<(), Error> {
        let mut extra = Vec::new();
        address.encode(&mut extra)?;
        port.encode(&mut extra)?;
        self.global_request("cancel-tcpip-forward", true, &extra)
            .await?;
        Ok(())
    }

    /// Starts a key exchange (unless one is running) and waits for it
    /// to complete.
    pub async fn rekey(&self) -> Result<(), Error> {
        let event = self.transport.start_kex().await?;
        event.retrieve(self.transport.timeout()).await
    }

    /// Sends `DISCONNECT` and closes the connection.
    pub async fn disconnect(&self, reason: Disconnect, description: &str) -> Result<(), Error> {
        let payload = disconnect_payload(reason, description)?;
        let sent = self.transport.send(&payload).await;
        self.transport
            .fail(Error::Disconnect {
                reason,
                description: description.to_string(),
            })
            .await;
        sent
    }

    /// The exchange hash of the first key exchange.
    pub fn session_id(&self) -> Option<Vec<u8>> {
        lock(&self.transport.session_id).clone()
    }

    /// The algorithms of the last key exchange.
    pub fn negotiated(&self) -> Option<Negotiated> {
        lock(&self.transport.negotiated).clone()
    }

    pub fn is_kex_ongoing(&self) -> bool {
        self.transport.kex_ongoing.load(Ordering::Acquire)
    }

    pub async fn kex_phase(&self) -> KexPhase {
        self.transport.kex.lock().await.phase()
    }

    pub fn is_closed(&self) -> bool {
        self.transport.error().is_some()
    }

    /// Waits until the connection ends, and returns why.
    pub async fn closed(&self) -> Error {
        let _ = self.transport.closed.retrieve(None).await;
        self.transport.error().unwrap_or(Error::HUP)
    }
}

/// Connects to `host:port` over TCP. See [`connect_stream`].
pub async fn connect<V: ServerKeyVerifier + 'static>(
    config: Arc<Config>,
    (host, port): (&str, u16),
    verifier: V,
) -> Result<Handle, Error> {
    let socket = TcpStream::connect((host, port)).await?;
    socket.set_nodelay(true)?;
    connect_stream(config, socket, host, port, verifier).await
}

/// Runs the identification exchange and the first key exchange over
/// `stream`. `host` and `port` are only passed to `verifier`.
pub async fn connect_stream<S, V>(
    config: Arc<Config>,
    stream: S,
    host: &str,
    port: u16,
    verifier: V,
) -> Result<Handle, Error>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    V: ServerKeyVerifier + 'static,
{
    let (transport, read, decoder) = open_transport(config, stream, host, port, verifier).await?;
    first_kex(transport, read, decoder).await
}

/// Exchanges identification lines, and sets up the transport for the
/// rest of the connection. Bytes read past the server's line are left
/// in the returned decoder.
pub(crate) async fn open_transport<S, V>(
    config: Arc<Config>,
    mut stream: S,
    host: &str,
    port: u16,
    verifier: V,
) -> Result<(Arc<Transport>, ReadHalf<S>, Decoder), Error>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    V: ServerKeyVerifier + 'static,
{
    config.gex.validate()?;
    if config.maximum_packet_size > 65535 {
        warn!(
            "Maximum packet size ({:?}) should not larger than a TCP packet (65535)",
            config.maximum_packet_size
        );
    }

    // Writing SSH id.
    let mut id = Vec::new();
    config.client_id.write(&mut id);
    stream.write_all(&id).await?;
    stream.flush().await?;

    // Reading SSH id.
    let (server_id, leftover) = match config.timeout {
        Some(timeout) => tokio::time::timeout(timeout, read_ssh_id(&mut stream))
            .await
            .map_err(|_| Error::Timeout {
                what: "server identification".into(),
            })??,
        None => read_ssh_id(&mut stream).await?,
    };

    let (read, write) = tokio::io::split(stream);
    let transport = Transport::new(
        config,
        Box::new(write),
        server_id,
        host,
        port,
        Arc::new(verifier),
    );
    let mut decoder = Decoder::new();
    decoder.feed(&leftover);
    Ok((transport, read, decoder))
}

/// Starts the reader task and waits for the first key exchange to end.
pub(crate) async fn first_kex<R>(
    transport: Arc<Transport>,
    read: R,
    decoder: Decoder,
) -> Result<Handle, Error>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    transport.start(read, decoder).await?;
    let first = transport.kex_event();
    if let Err(e) = first.retrieve(transport.timeout()).await {
        transport.fail(e.clone()).await;
        return Err(e);
    }
    Ok(Handle { transport })
}

#[cfg(test)]
impl Transport {
    pub(crate) async fn set_outbound_sequence_number(&self, seqn: u32) {
        self.writer.lock().await.encoder().set_sequence_number(seqn);
    }
}

#[cfg(test)]
impl Handle {
    pub(crate) fn connection(&self) -> &Connection {
        &self.transport.connection
    }
}
