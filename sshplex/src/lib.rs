#![deny(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
#![allow(clippy::single_match, clippy::upper_case_acronyms)]
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

//! Client side of the SSH2 protocol: the transport (packet codec,
//! algorithm negotiation, key exchange and rekeying) and the
//! connection layer (channels multiplexed over the encrypted socket).
//!
//! A connection is started with [`client::connect`] or
//! [`client::connect_stream`], which run the identification exchange
//! and the first key exchange, then return a [`client::Handle`].
//! Authentication happens above this crate: the handle forwards the
//! authentication messages in both directions without interpreting
//! them.
//!
//! ```no_run
//! # async fn run() -> Result<(), sshplex::Error> {
//! use std::sync::Arc;
//!
//! let config = Arc::new(sshplex::client::Config::default());
//! let handle = sshplex::client::connect(
//!     config,
//!     ("localhost", 22),
//!     |_host: &str, _port: u16, _key: &ssh_key::PublicKey| true,
//! )
//! .await?;
//! handle.request_service("ssh-userauth").await?;
//! // ... authenticate with `send_packet` / `auth_packets` ...
//! let session = handle.channel_open_session().await?;
//! session.exec(true, "uname -a").await?;
//! while let Some(data) = session.recv_data().await {
//!     println!("{}", String::from_utf8_lossy(&data));
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Threads and tasks
//!
//! Each connection runs one reader task, which owns the inbound half
//! of the codec and dispatches every packet in order. Any number of
//! tasks may write concurrently: the outbound half of the codec is
//! shared behind an async mutex. Callers waiting for an answer from
//! the server (channel opens, requests, key exchanges) wait on a
//! [`rendezvous::Promise`], which is resolved by the reader task, or
//! failed with the connection's error if the connection dies.
//!
//! # Algorithms
//!
//! Every algorithm family is a [`registry::Registry`] of named
//! factories, ordered by preference. [`Preferred::default`] lists the
//! built-in algorithms, and new ones can be registered without
//! touching the negotiation or codec code.

#[cfg(not(any(feature = "ring", feature = "aws-lc-rs")))]
compile_error!(
    "`sshplex` requires enabling either the `ring` or `aws-lc-rs` feature as a crypto backend."
);

use std::convert::TryFrom;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

use log::warn;
use ssh_encoding::{Decode, Encode};
use thiserror::Error;

#[cfg(test)]
mod tests;

/// Cipher names
pub mod cipher;
/// Packet codec
pub mod codec;
/// Compression algorithm names
pub mod compression;
/// Host key algorithms
pub mod hostkey;
/// Key exchange algorithm names
pub mod kex;
/// MAC algorithm names
pub mod mac;
pub mod registry;
pub mod rendezvous;

mod msg;
mod negotiation;
mod sshbuffer;

pub use negotiation::{Negotiated, Preferred, Proposal};

mod pty;

pub use pty::Pty;
pub use sshbuffer::SshId;

mod helpers;

mod channels;
pub use channels::{
    Channel, ChannelKind, ChannelMsg, ChannelOpenRequest, ChannelOpener, ChannelReader,
    ChannelWriter, SessionChannel,
};

mod parsing;
mod session;

/// Client side of this library.
pub mod client;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgorithmKind {
    Kex,
    Key,
    Cipher,
    Compression,
    Mac,
}

#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Unspecified problem with the beginning of key exchange.
    #[error("Key exchange init failed")]
    KexInit,

    /// Unknown algorithm name.
    #[error("Unknown algorithm")]
    UnknownAlgo,

    /// No common algorithm found during key exchange.
    #[error("No common {kind:?} algorithm - ours: {ours:?}, theirs: {theirs:?}")]
    NoCommonAlgo {
        kind: AlgorithmKind,
        ours: Vec<String>,
        theirs: Vec<String>,
    },

    /// Invalid SSH version string.
    #[error("invalid SSH version string")]
    Version,

    /// Error during key exchange.
    #[error("Key exchange failed")]
    Kex,

    /// Invalid packet authentication code.
    #[error("Wrong packet authentication code")]
    PacketAuth,

    /// The protocol is in an inconsistent state.
    #[error("Inconsistent state of the protocol")]
    Inconsistent,

    /// The host key was rejected by the verifier.
    #[error("Unknown server key")]
    UnknownKey,

    /// The server provided a wrong signature.
    #[error("Wrong server signature")]
    WrongServerSig,

    /// Excessive or misaligned packet size.
    #[error("Bad packet size: {0}")]
    PacketSize(usize),

    /// Message received/sent on unopened channel.
    #[error("Channel not open")]
    WrongChannel,

    /// Server refused to open a channel.
    #[error("Failed to open channel ({reason:?}): {message}")]
    ChannelOpenFailure {
        reason: ChannelOpenFailure,
        message: String,
    },

    /// The channel was closed while an operation was pending on it.
    #[error("Channel closed")]
    ChannelClosed,

    /// The connection was ended with a disconnect message.
    #[error("Disconnected ({reason:?}): {description}")]
    Disconnect {
        reason: Disconnect,
        description: String,
    },

    /// Connection closed by the remote side.
    #[error("Connection closed by the remote side")]
    HUP,

    /// No answer arrived in time.
    #[error("Timed out waiting for {what}")]
    Timeout { what: String },

    #[error("Failed to decrypt a packet")]
    DecryptionError,

    #[error("The request was rejected by the other party")]
    RequestDenied,

    /// A sequence number would have wrapped before the first key
    /// exchange completed.
    #[error("Sequence number wrapped before the first key exchange, key exchange required")]
    SequenceWrap,

    #[error(transparent)]
    IO(Arc<std::io::Error>),

    #[error(transparent)]
    Utf8(#[from] std::str::Utf8Error),

    #[error("Compression failed")]
    Compress,

    #[error("Decompression failed")]
    Decompress,

    #[error("Violation detected during strict key exchange, message {message_type} at seq no {sequence_number}")]
    StrictKeyExchangeViolation {
        message_type: u8,
        sequence_number: u32,
    },

    #[error("SshKey: {0}")]
    SshKey(#[from] ssh_key::Error),

    #[error("SshEncoding: {0}")]
    SshEncoding(#[from] ssh_encoding::Error),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::IO(Arc::new(e))
    }
}

impl Error {
    /// The reason code to send to the peer when this error ends the
    /// connection, or `None` if no disconnect message should be sent.
    pub fn disconnect_reason(&self) -> Option<Disconnect> {
        match self {
            Error::PacketAuth => Some(Disconnect::MACError),
            Error::Compress | Error::Decompress => Some(Disconnect::CompressionError),
            Error::KexInit
            | Error::Kex
            | Error::UnknownAlgo
            | Error::NoCommonAlgo { .. }
            | Error::WrongServerSig => Some(Disconnect::KeyExchangeFailed),
            Error::UnknownKey => Some(Disconnect::HostKeyNotVerifiable),
            Error::Version => Some(Disconnect::ProtocolVersionNotSupported),
            Error::PacketSize(_)
            | Error::Inconsistent
            | Error::WrongChannel
            | Error::DecryptionError
            | Error::SequenceWrap
            | Error::StrictKeyExchangeViolation { .. }
            | Error::Utf8(_)
            | Error::SshKey(_)
            | Error::SshEncoding(_) => Some(Disconnect::ProtocolError),
            Error::ChannelOpenFailure { .. }
            | Error::ChannelClosed
            | Error::Disconnect { .. }
            | Error::HUP
            | Error::Timeout { .. }
            | Error::RequestDenied
            | Error::IO(_)
            | Error::InvalidConfig(_) => None,
        }
    }
}

pub(crate) fn strict_kex_violation(message_type: u8, sequence_number: u32) -> crate::Error {
    warn!(
        "strict kex violated at sequence no. {sequence_number:?}, message type: {message_type:?}"
    );
    crate::Error::StrictKeyExchangeViolation {
        message_type,
        sequence_number,
    }
}

/// The number of bytes read/written, and the number of seconds before a key
/// re-exchange is requested.
#[derive(Debug, Clone)]
pub struct Limits {
    pub rekey_write_limit: usize,
    pub rekey_read_limit: usize,
    pub rekey_time_limit: std::time::Duration,
}

impl Limits {
    /// Create a new `Limits`. Byte limits above 1 GiB are lowered to
    /// 1 GiB, since larger values could lead to nonce reuse.
    pub fn new(write_limit: usize, read_limit: usize, time_limit: std::time::Duration) -> Limits {
        Limits {
            rekey_write_limit: write_limit.min(1 << 30),
            rekey_read_limit: read_limit.min(1 << 30),
            rekey_time_limit: time_limit,
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        // Following the recommendations of
        // https://tools.ietf.org/html/rfc4253#section-9
        Limits {
            rekey_write_limit: 1 << 30, // 1 Gb
            rekey_read_limit: 1 << 30,  // 1 Gb
            rekey_time_limit: std::time::Duration::from_secs(3600),
        }
    }
}

/// A reason for disconnection.
#[allow(missing_docs)] // This should be relatively self-explanatory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disconnect {
    HostNotAllowedToConnect = 1,
    ProtocolError = 2,
    KeyExchangeFailed = 3,
    #[doc(hidden)]
    Reserved = 4,
    MACError = 5,
    CompressionError = 6,
    ServiceNotAvailable = 7,
    ProtocolVersionNotSupported = 8,
    HostKeyNotVerifiable = 9,
    ConnectionLost = 10,
    ByApplication = 11,
    TooManyConnections = 12,
    AuthCancelledByUser = 13,
    NoMoreAuthMethodsAvailable = 14,
    IllegalUserName = 15,
}

impl TryFrom<u32> for Disconnect {
    type Error = crate::Error;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => Self::HostNotAllowedToConnect,
            2 => Self::ProtocolError,
            3 => Self::KeyExchangeFailed,
            4 => Self::Reserved,
            5 => Self::MACError,
            6 => Self::CompressionError,
            7 => Self::ServiceNotAvailable,
            8 => Self::ProtocolVersionNotSupported,
            9 => Self::HostKeyNotVerifiable,
            10 => Self::ConnectionLost,
            11 => Self::ByApplication,
            12 => Self::TooManyConnections,
            13 => Self::AuthCancelledByUser,
            14 => Self::NoMoreAuthMethodsAvailable,
            15 => Self::IllegalUserName,
            _ => return Err(crate::Error::Inconsistent),
        })
    }
}

/// The type of signals that can be sent to a remote process. If you
/// plan to use custom signals, read [the
/// RFC](https://tools.ietf.org/html/rfc4254#section-6.10) to
/// understand the encoding.
#[allow(missing_docs)]
// This should be relatively self-explanatory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sig {
    ABRT,
    ALRM,
    FPE,
    HUP,
    ILL,
    INT,
    KILL,
    PIPE,
    QUIT,
    SEGV,
    TERM,
    USR1,
    Custom(String),
}

impl Sig {
    pub(crate) fn name(&self) -> &str {
        match *self {
            Sig::ABRT => "ABRT",
            Sig::ALRM => "ALRM",
            Sig::FPE => "FPE",
            Sig::HUP => "HUP",
            Sig::ILL => "ILL",
            Sig::INT => "INT",
            Sig::KILL => "KILL",
            Sig::PIPE => "PIPE",
            Sig::QUIT => "QUIT",
            Sig::SEGV => "SEGV",
            Sig::TERM => "TERM",
            Sig::USR1 => "USR1",
            Sig::Custom(ref c) => c,
        }
    }

    pub(crate) fn from_name(name: &str) -> Sig {
        match name {
            "ABRT" => Sig::ABRT,
            "ALRM" => Sig::ALRM,
            "FPE" => Sig::FPE,
            "HUP" => Sig::HUP,
            "ILL" => Sig::ILL,
            "INT" => Sig::INT,
            "KILL" => Sig::KILL,
            "PIPE" => Sig::PIPE,
            "QUIT" => Sig::QUIT,
            "SEGV" => Sig::SEGV,
            "TERM" => Sig::TERM,
            "USR1" => Sig::USR1,
            x => Sig::Custom(x.to_string()),
        }
    }
}

/// Reason for not being able to open a channel.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum ChannelOpenFailure {
    AdministrativelyProhibited = 1,
    ConnectFailed = 2,
    UnknownChannelType = 3,
    ResourceShortage = 4,
    Unknown = 0,
}

impl ChannelOpenFailure {
    pub(crate) fn from_u32(x: u32) -> ChannelOpenFailure {
        match x {
            1 => ChannelOpenFailure::AdministrativelyProhibited,
            2 => ChannelOpenFailure::ConnectFailed,
            3 => ChannelOpenFailure::UnknownChannelType,
            4 => ChannelOpenFailure::ResourceShortage,
            _ => ChannelOpenFailure::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
/// The identifier of a channel, as allocated by this side.
pub struct ChannelId(u32);

impl Decode for ChannelId {
    type Error = ssh_encoding::Error;

    fn decode(reader: &mut impl ssh_encoding::Reader) -> Result<Self, Self::Error> {
        Ok(Self(u32::decode(reader)?))
    }
}

impl Encode for ChannelId {
    fn encoded_len(&self) -> Result<usize, ssh_encoding::Error> {
        self.0.encoded_len()
    }

    fn encode(&self, writer: &mut impl ssh_encoding::Writer) -> Result<(), ssh_encoding::Error> {
        self.0.encode(writer)
    }
}

impl From<ChannelId> for u32 {
    fn from(c: ChannelId) -> u32 {
        c.0
    }
}

impl Display for ChannelId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
