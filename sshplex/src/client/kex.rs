use std::fmt::{Debug, Formatter};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use log::{debug, error, warn};
use ssh_encoding::{Decode, Encode};
use ssh_key::Mpint;
use tokio::time::Instant;

use super::{lock, Config, Transport};
use crate::codec::Decoder;
use crate::hostkey::ServerKeyVerifier;
use crate::kex::{DhGroup, Direction, KexAlgorithm};
use crate::negotiation::{Negotiated, Proposal};
use crate::rendezvous::Event;
use crate::session::{Exchange, GexExchange};
use crate::{msg, strict_kex_violation, Error};

/// Where the key exchange engine stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KexPhase {
    /// No exchange running, and none completed yet.
    Idle,
    /// Our KEXINIT is out, the server's has not arrived.
    ProposalSent,
    /// Algorithms are agreed on, and the method's messages are being
    /// exchanged.
    AlgorithmExchange,
    /// The reply arrived and its host key is being checked.
    HostKeyVerification,
    /// We sent NEWKEYS and wait for the server's.
    AwaitingNewKeys,
    /// The last exchange completed.
    Done,
}

#[allow(clippy::large_enum_variant)]
enum State {
    Idle,
    ProposalSent,
    WaitingForGroup {
        negotiated: Negotiated,
        kex: Box<dyn KexAlgorithm + Send>,
    },
    WaitingForReply {
        negotiated: Negotiated,
        kex: Box<dyn KexAlgorithm + Send>,
    },
    WaitingForNewKeys {
        negotiated: Negotiated,
    },
    Done,
}

/// Runs the client side of key exchanges, one at a time. Lives behind
/// the transport's `kex` lock; packets reach it from the reader task,
/// and exchanges may also be started by callers.
pub(crate) struct KexEngine {
    config: Arc<Config>,
    server_id: Vec<u8>,
    host: String,
    port: u16,
    verifier: Arc<dyn ServerKeyVerifier>,
    state: State,
    exchange: Exchange,
    ours: Option<Proposal>,
    /// The next kex packet is a wrong guess from the server.
    skip_guessed: bool,
    /// No exchange has completed yet.
    first: bool,
}

impl Debug for KexEngine {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KexEngine")
            .field("phase", &self.phase())
            .field("first", &self.first)
            .finish()
    }
}

impl KexEngine {
    pub fn new(
        config: Arc<Config>,
        server_id: Vec<u8>,
        host: &str,
        port: u16,
        verifier: Arc<dyn ServerKeyVerifier>,
    ) -> Self {
        let exchange = Exchange::new(config.client_id.as_kex_hash_bytes(), &server_id);
        KexEngine {
            config,
            server_id,
            host: host.to_string(),
            port,
            verifier,
            state: State::Idle,
            exchange,
            ours: None,
            skip_guessed: false,
            first: true,
        }
    }

    pub fn phase(&self) -> KexPhase {
        match self.state {
            State::Idle => KexPhase::Idle,
            State::ProposalSent => KexPhase::ProposalSent,
            State::WaitingForGroup { .. } | State::WaitingForReply { .. } => {
                KexPhase::AlgorithmExchange
            }
            State::WaitingForNewKeys { .. } => KexPhase::AwaitingNewKeys,
            State::Done => KexPhase::Done,
        }
    }

    fn is_running(&self) -> bool {
        !matches!(self.state, State::Idle | State::Done)
    }

    /// Sends our KEXINIT, unless an exchange is already running.
    pub async fn start(&mut self, t: &Transport) -> Result<(), Error> {
        if self.is_running() {
            debug!("key exchange already running");
            return Ok(());
        }
        self.send_kexinit(t).await
    }

    async fn send_kexinit(&mut self, t: &Transport) -> Result<(), Error> {
        {
            let mut event = lock(&t.kex_event);
            if !event.is_pending() {
                *event = Event::new("key exchange");
            }
        }
        t.kex_ongoing.store(true, Ordering::Release);

        let proposal = Proposal::client(&self.config.preferred, self.first, self.config.strict_kex);
        let mut payload = Vec::new();
        proposal.write(&mut payload)?;
        self.exchange = Exchange::new(self.config.client_id.as_kex_hash_bytes(), &self.server_id);
        self.exchange.client_kex_init = payload.clone();
        self.ours = Some(proposal);
        self.state = State::ProposalSent;

        debug!("sending KEXINIT");
        t.writer.lock().await.send(&payload).await?;
        Ok(())
    }

    /// Handles a key exchange message (20 to 49) from the server.
    pub async fn handle(
        &mut self,
        t: &Transport,
        seqn: u32,
        payload: &[u8],
        decoder: &mut Decoder,
    ) -> Result<(), Error> {
        let msg = *payload.first().ok_or(Error::Inconsistent)?;
        let strict = t.strict_kex.load(Ordering::Acquire);

        if self.skip_guessed && msg != msg::KEXINIT {
            self.skip_guessed = false;
            if strict {
                return Err(strict_kex_violation(msg, seqn));
            }
            debug!("ignoring guessed kex packet {msg:?}");
            return Ok(());
        }

        let state = std::mem::replace(&mut self.state, State::Idle);
        match (msg, state) {
            (msg::KEXINIT, State::Idle | State::Done) => {
                debug!("server started a key exchange");
                self.send_kexinit(t).await?;
                self.server_kexinit(t, seqn, payload).await
            }
            (msg::KEXINIT, State::ProposalSent) => self.server_kexinit(t, seqn, payload).await,
            (msg::KEX_DH_GEX_GROUP, State::WaitingForGroup { negotiated, kex }) => {
                self.gex_group(t, payload, negotiated, kex).await
            }
            (
                msg::KEX_ECDH_REPLY | msg::KEX_DH_GEX_REPLY,
                State::WaitingForReply { negotiated, kex },
            ) => {
                let expected = if kex.is_dh_gex() {
                    msg::KEX_DH_GEX_REPLY
                } else {
                    msg::KEX_ECDH_REPLY
                };
                if msg != expected {
                    error!("Unexpected kex message at this stage: {msg:?}");
                    return Err(Error::Kex);
                }
                self.reply(t, payload, negotiated, kex, decoder).await
            }
            (msg::NEWKEYS, State::WaitingForNewKeys { negotiated }) => {
                // The decoder switched to the new keys when it read
                // this packet.
                t.peer_in_kex.store(false, Ordering::Release);
                t.kex_ongoing.store(false, Ordering::Release);
                *lock(&t.last_kex) = Instant::now();
                *lock(&t.negotiated) = Some(negotiated);
                self.first = false;
                self.state = State::Done;
                debug!("key exchange done");
                t.kex_event().deliver(());
                Ok(())
            }
            (msg, state) => {
                self.state = state;
                error!(
                    "Unexpected kex message at this stage: {msg:?} ({:?})",
                    self.phase()
                );
                if strict {
                    Err(strict_kex_violation(msg, seqn))
                } else {
                    Err(Error::Kex)
                }
            }
        }
    }

    async fn server_kexinit(&mut self, t: &Transport, seqn: u32, payload: &[u8]) -> Result<(), Error> {
        t.peer_in_kex.store(true, Ordering::Release);
        self.exchange.server_kex_init = payload.to_vec();
        let server = Proposal::read(payload)?;
        let ours = self.ours.as_ref().ok_or(Error::KexInit)?;
        let negotiated = Negotiated::select(&self.config.preferred, ours, &server)?;

        if self.first {
            if negotiated.strict_kex && seqn != 0 {
                return Err(strict_kex_violation(msg::KEXINIT, seqn));
            }
            t.strict_kex.store(negotiated.strict_kex, Ordering::Release);
        }
        self.skip_guessed = negotiated.ignore_guessed;

        let mut kex = negotiated.algorithms.kex.make();
        let mut out = Vec::new();
        if kex.is_dh_gex() {
            let gex = &self.config.gex;
            msg::KEX_DH_GEX_REQUEST.encode(&mut out)?;
            (gex.min_group_size as u32).encode(&mut out)?;
            (gex.preferred_group_size as u32).encode(&mut out)?;
            (gex.max_group_size as u32).encode(&mut out)?;
            self.state = State::WaitingForGroup { negotiated, kex };
        } else {
            self.exchange.client_ephemeral = kex.generate_ephemeral()?;
            msg::KEX_ECDH_INIT.encode(&mut out)?;
            self.exchange.client_ephemeral.as_slice().encode(&mut out)?;
            self.state = State::WaitingForReply { negotiated, kex };
        }
        t.writer.lock().await.send(&out).await?;
        Ok(())
    }

    async fn gex_group(
        &mut self,
        t: &Transport,
        payload: &[u8],
        negotiated: Negotiated,
        mut kex: Box<dyn KexAlgorithm + Send>,
    ) -> Result<(), Error> {
        let mut r = payload.get(1..).unwrap_or_default();
        let prime = Mpint::decode(&mut r)?;
        let generator = Mpint::decode(&mut r)?;
        let group = DhGroup::new(prime.as_bytes().to_vec(), generator.as_bytes().to_vec());
        debug!("received gex group: {group:?}");

        let gex = &self.config.gex;
        if group.bit_size() < gex.min_group_size || group.bit_size() > gex.max_group_size {
            warn!(
                "DH prime size ({} bits) not within requested range",
                group.bit_size()
            );
            return Err(Error::KexInit);
        }
        kex.dh_gex_set_group(group.clone())?;
        self.exchange.gex = Some(GexExchange {
            params: *gex,
            group,
        });

        self.exchange.client_ephemeral = kex.generate_ephemeral()?;
        let mut out = Vec::new();
        msg::KEX_DH_GEX_INIT.encode(&mut out)?;
        self.exchange.client_ephemeral.as_slice().encode(&mut out)?;
        self.state = State::WaitingForReply { negotiated, kex };
        t.writer.lock().await.send(&out).await?;
        Ok(())
    }

    async fn reply(
        &mut self,
        t: &Transport,
        payload: &[u8],
        negotiated: Negotiated,
        mut kex: Box<dyn KexAlgorithm + Send>,
        decoder: &mut Decoder,
    ) -> Result<(), Error> {
        let mut r = payload.get(1..).unwrap_or_default();
        let host_key = Vec::<u8>::decode(&mut r)?;
        self.exchange.server_ephemeral = Vec::<u8>::decode(&mut r)?;
        let signature = Vec::<u8>::decode(&mut r)?;

        kex.compute_shared_secret(&self.exchange.server_ephemeral)?;
        let hash = kex.compute_exchange_hash(&host_key, &self.exchange)?;

        let algorithms = &negotiated.algorithms;
        let key = algorithms.key.decode_key(&host_key)?;
        algorithms.key.verify(&key, &hash, &signature)?;
        if !self.verifier.verify(&self.host, self.port, &key) {
            debug!("server key rejected for {}:{}", self.host, self.port);
            return Err(Error::UnknownKey);
        }

        let session_id = lock(&t.session_id).get_or_insert_with(|| hash.clone()).clone();
        let keys = kex.compute_keys(
            &session_id,
            &hash,
            Direction {
                cipher: algorithms.cipher_client_to_server.as_ref(),
                mac: algorithms.mac_client_to_server.as_ref(),
            },
            Direction {
                cipher: algorithms.cipher_server_to_client.as_ref(),
                mac: algorithms.mac_server_to_client.as_ref(),
            },
            false,
        )?;

        let strict = t.strict_kex.load(Ordering::Acquire);
        {
            let mut writer = t.writer.lock().await;
            let encoder = writer.encoder();
            encoder.set_strict(strict);
            encoder.set_pending(keys.local_to_remote, &algorithms.compression_client_to_server);
            writer.send(&[msg::NEWKEYS]).await?;
        }
        decoder.set_strict(strict);
        decoder.set_pending(keys.remote_to_local, &algorithms.compression_server_to_client);
        debug!("sent NEWKEYS");
        self.state = State::WaitingForNewKeys { negotiated };
        Ok(())
    }
}
