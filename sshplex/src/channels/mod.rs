use std::ops::Deref;
use std::sync::Arc;

use bytes::Bytes;
use crate::helpers::SshBool;
use ssh_encoding::{Decode, Encode};

use crate::client::Transport;
use crate::pty::encode_modes;
use crate::{ChannelId, Error, Pty, Sig};

mod channel_ref;
mod io;
mod open;
mod window;

pub(crate) use channel_ref::{ChannelCore, ChannelRef, CoreState, Inbound, Owner};
pub use io::{ChannelReader, ChannelWriter};
pub use open::{ChannelOpenRequest, ChannelOpener};

/// The type of a channel, with the data sent along with its opening.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelKind {
    /// An interactive session (shell, command or subsystem).
    Session,
    /// A connection from the server to `host_to_connect`, forwarded
    /// from a local socket.
    DirectTcpip {
        host_to_connect: String,
        port_to_connect: u32,
        originator_address: String,
        originator_port: u32,
    },
    /// A connection accepted by the server on a port forwarded with
    /// `tcpip-forward`.
    ForwardedTcpip {
        connected_address: String,
        connected_port: u32,
        originator_address: String,
        originator_port: u32,
    },
    X11 {
        originator_address: String,
        originator_port: u32,
    },
    /// Any other type, with its type-specific data left encoded.
    Other { name: String, data: Vec<u8> },
}

impl ChannelKind {
    /// The channel type, as sent in `CHANNEL_OPEN`.
    pub fn type_name(&self) -> &str {
        match self {
            ChannelKind::Session => "session",
            ChannelKind::DirectTcpip { .. } => "direct-tcpip",
            ChannelKind::ForwardedTcpip { .. } => "forwarded-tcpip",
            ChannelKind::X11 { .. } => "x11",
            ChannelKind::Other { name, .. } => name,
        }
    }

    pub(crate) fn encode_extra(&self, buffer: &mut Vec<u8>) -> Result<(), Error> {
        match self {
            ChannelKind::Session => {}
            ChannelKind::DirectTcpip {
                host_to_connect,
                port_to_connect,
                originator_address,
                originator_port,
            } => {
                host_to_connect.encode(buffer)?;
                port_to_connect.encode(buffer)?;
                originator_address.encode(buffer)?;
                originator_port.encode(buffer)?;
            }
            ChannelKind::ForwardedTcpip {
                connected_address,
                connected_port,
                originator_address,
                originator_port,
            } => {
                connected_address.encode(buffer)?;
                connected_port.encode(buffer)?;
                originator_address.encode(buffer)?;
                originator_port.encode(buffer)?;
            }
            ChannelKind::X11 {
                originator_address,
                originator_port,
            } => {
                originator_address.encode(buffer)?;
                originator_port.encode(buffer)?;
            }
            ChannelKind::Other { data, .. } => buffer.extend_from_slice(data),
        }
        Ok(())
    }

    pub(crate) fn decode_extra(typ: &str, r: &mut &[u8]) -> Result<Self, Error> {
        Ok(match typ {
            "session" => ChannelKind::Session,
            "direct-tcpip" => ChannelKind::DirectTcpip {
                host_to_connect: String::decode(r)?,
                port_to_connect: u32::decode(r)?,
                originator_address: String::decode(r)?,
                originator_port: u32::decode(r)?,
            },
            "forwarded-tcpip" => ChannelKind::ForwardedTcpip {
                connected_address: String::decode(r)?,
                connected_port: u32::decode(r)?,
                originator_address: String::decode(r)?,
                originator_port: u32::decode(r)?,
            },
            "x11" => ChannelKind::X11 {
                originator_address: String::decode(r)?,
                originator_port: u32::decode(r)?,
            },
            name => ChannelKind::Other {
                name: name.to_string(),
                data: std::mem::take(r).to_vec(),
            },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
/// Events on a channel, other than data. See [Channel::wait].
pub enum ChannelMsg {
    /// The peer will send no more data.
    Eof,
    /// The peer closed the channel. Nothing follows.
    Close,
    ExitStatus {
        exit_status: u32,
    },
    ExitSignal {
        signal_name: Sig,
        core_dumped: bool,
        error_message: String,
        lang_tag: String,
    },
    XonXoff {
        client_can_do: bool,
    },
    /// The peer granted more window. `new_size` is the window now
    /// available.
    WindowAdjusted {
        new_size: u32,
    },
}

/// A channel opened on a connection.
///
/// Inbound data, extended data and events arrive on three separate
/// streams, read with [`Channel::recv_data`], [`Channel::recv_extended`]
/// and [`Channel::wait`] (or through [`Channel::make_reader`]). The
/// window granted to the peer is given back as the data is read.
///
/// Once the channel and every reader and writer made from it are
/// dropped, the channel is closed.
pub struct Channel {
    inner: ChannelRef,
    inbound: Arc<Inbound>,
    owner: Arc<Owner>,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.inner.core.id)
            .field("kind", &self.inner.core.kind)
            .finish()
    }
}

impl Channel {
    pub(crate) fn new(
        core: Arc<ChannelCore>,
        inbound: Arc<Inbound>,
        transport: Arc<Transport>,
    ) -> Self {
        let inner = ChannelRef { core, transport };
        Channel {
            owner: Arc::new(Owner(inner.clone())),
            inner,
            inbound,
        }
    }

    pub fn id(&self) -> ChannelId {
        self.inner.core.id
    }

    pub fn kind(&self) -> &ChannelKind {
        &self.inner.core.kind
    }

    /// Bytes we may currently send before waiting for the peer.
    pub fn window_size(&self) -> u32 {
        self.inner.core.window.available()
    }

    /// The largest data packet the peer accepts.
    pub fn max_packet_size(&self) -> u32 {
        self.inner.core.state().remote_max_packet
    }

    /// Whether a `CHANNEL_CLOSE` was sent or received.
    pub fn is_closed(&self) -> bool {
        self.inner.core.state().is_closed()
    }

    /// Sends `data`, cut into packets no larger than the peer's maximum
    /// packet size. Waits for window adjustments when the window is
    /// exhausted.
    pub async fn data(&self, data: &[u8]) -> Result<(), Error> {
        self.inner.send_data(None, data).await
    }

    /// Sends extended data (for instance `1` for stderr).
    pub async fn extended_data(&self, ext: u32, data: &[u8]) -> Result<(), Error> {
        self.inner.send_data(Some(ext), data).await
    }

    pub async fn eof(&self) -> Result<(), Error> {
        self.inner.eof().await
    }

    /// Requests that the channel be closed. Its id is released once the
    /// peer's close arrives.
    pub async fn close(&self) -> Result<(), Error> {
        self.inner.close().await
    }

    /// Sends a channel request of any type, `extra` being its encoded
    /// type-specific data. With `want_reply`, waits for the peer's
    /// answer, a failure being [`Error::RequestDenied`].
    pub async fn request(&self, name: &str, want_reply: bool, extra: &[u8]) -> Result<(), Error> {
        self.inner.request(name, want_reply, extra).await
    }

    /// The next chunk of data, or `None` after EOF or close.
    pub async fn recv_data(&self) -> Option<Bytes> {
        futures::future::poll_fn(|cx| self.inbound.poll_data(cx)).await
    }

    /// The next chunk of extended data, with its type code.
    pub async fn recv_extended(&self) -> Option<(u32, Bytes)> {
        futures::future::poll_fn(|cx| self.inbound.poll_extended(cx)).await
    }

    /// Waits for the next event on this channel.
    pub async fn wait(&self) -> Option<ChannelMsg> {
        futures::future::poll_fn(|cx| self.inbound.poll_event(cx)).await
    }

    /// An [`tokio::io::AsyncRead`] over the data stream.
    pub fn make_reader(&self) -> ChannelReader {
        ChannelReader::new(self.inbound.clone(), None, self.owner.clone())
    }

    /// An [`tokio::io::AsyncRead`] over the extended data of type `ext`.
    /// Extended data of other types is discarded.
    pub fn make_reader_ext(&self, ext: u32) -> ChannelReader {
        ChannelReader::new(self.inbound.clone(), Some(ext), self.owner.clone())
    }

    /// An [`tokio::io::AsyncWrite`] sending data on this channel.
    /// Shutting it down sends EOF.
    pub fn make_writer(&self) -> ChannelWriter {
        ChannelWriter::new(self.inner.clone(), None, self.owner.clone())
    }

    pub fn make_writer_ext(&self, ext: u32) -> ChannelWriter {
        ChannelWriter::new(self.inner.clone(), Some(ext), self.owner.clone())
    }
}

/// A `session` channel, with the requests defined for sessions.
#[derive(Debug)]
pub struct SessionChannel {
    channel: Channel,
}

impl Deref for SessionChannel {
    type Target = Channel;

    fn deref(&self) -> &Channel {
        &self.channel
    }
}

impl From<SessionChannel> for Channel {
    fn from(s: SessionChannel) -> Channel {
        s.channel
    }
}

impl SessionChannel {
    pub(crate) fn new(channel: Channel) -> Self {
        SessionChannel { channel }
    }

    pub fn into_inner(self) -> Channel {
        self.channel
    }

    /// Request a pseudo-terminal with the given characteristics.
    #[allow(clippy::too_many_arguments)]
    pub async fn request_pty(
        &self,
        want_reply: bool,
        term: &str,
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
        terminal_modes: &[(Pty, u32)],
    ) -> Result<(), Error> {
        let mut extra = Vec::new();
        term.encode(&mut extra)?;
        col_width.encode(&mut extra)?;
        row_height.encode(&mut extra)?;
        pix_width.encode(&mut extra)?;
        pix_height.encode(&mut extra)?;
        encode_modes(terminal_modes).as_slice().encode(&mut extra)?;
        self.request("pty-req", want_reply, &extra).await
    }

    /// Request a remote shell.
    pub async fn request_shell(&self, want_reply: bool) -> Result<(), Error> {
        self.request("shell", want_reply, &[]).await
    }

    /// Execute a remote program (will be passed to a shell).
    pub async fn exec<A: AsRef<[u8]>>(&self, want_reply: bool, command: A) -> Result<(), Error> {
        let mut extra = Vec::new();
        command.as_ref().encode(&mut extra)?;
        self.request("exec", want_reply, &extra).await
    }

    /// Request the start of a subsystem with the given name.
    pub async fn request_subsystem(&self, want_reply: bool, name: &str) -> Result<(), Error> {
        let mut extra = Vec::new();
        name.encode(&mut extra)?;
        self.request("subsystem", want_reply, &extra).await
    }

    /// Set a remote environment variable.
    pub async fn set_env(
        &self,
        want_reply: bool,
        variable_name: &str,
        variable_value: &str,
    ) -> Result<(), Error> {
        let mut extra = Vec::new();
        variable_name.encode(&mut extra)?;
        variable_value.encode(&mut extra)?;
        self.request("env", want_reply, &extra).await
    }

    /// Inform the server that our window size has changed.
    pub async fn window_change(
        &self,
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
    ) -> Result<(), Error> {
        let mut extra = Vec::new();
        col_width.encode(&mut extra)?;
        row_height.encode(&mut extra)?;
        pix_width.encode(&mut extra)?;
        pix_height.encode(&mut extra)?;
        self.request("window-change", false, &extra).await
    }

    /// Signal a remote process.
    pub async fn signal(&self, signal: Sig) -> Result<(), Error> {
        let mut extra = Vec::new();
        signal.name().encode(&mut extra)?;
        self.request("signal", false, &extra).await
    }

    /// Request X11 forwarding. See
    /// [RFC4254](https://tools.ietf.org/html/rfc4254#section-6.3.1)
    /// for security issues related to cookies.
    pub async fn request_x11(
        &self,
        want_reply: bool,
        single_connection: bool,
        x11_authentication_protocol: &str,
        x11_authentication_cookie: &str,
        x11_screen_number: u32,
    ) -> Result<(), Error> {
        let mut extra = Vec::new();
        single_connection.encode(&mut extra)?;
        x11_authentication_protocol.encode(&mut extra)?;
        x11_authentication_cookie.encode(&mut extra)?;
        x11_screen_number.encode(&mut extra)?;
        self.request("x11-req", want_reply, &extra).await
    }

    /// Inform the server that we will accept agent forwarding channels.
    pub async fn agent_forward(&self, want_reply: bool) -> Result<(), Error> {
        self.request("auth-agent-req@openssh.com", want_reply, &[])
            .await
    }
}
