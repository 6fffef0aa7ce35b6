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

use std::collections::VecDeque;
use std::fmt::{Debug, Formatter};

use log::{debug, trace};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::client::GexParams;
use crate::codec::Encoder;
use crate::kex::DhGroup;
use crate::{msg, Error, Limits};

/// The group agreed on during a group exchange, with the sizes we
/// asked for. Both go into the exchange hash.
#[derive(Debug, Clone)]
pub(crate) struct GexExchange {
    pub params: GexParams,
    pub group: DhGroup,
}

/// The transcript of one key exchange, hashed into `H`.
#[derive(Debug, Clone)]
pub(crate) struct Exchange {
    pub client_id: Vec<u8>,
    pub server_id: Vec<u8>,
    pub client_kex_init: Vec<u8>,
    pub server_kex_init: Vec<u8>,
    pub client_ephemeral: Vec<u8>,
    pub server_ephemeral: Vec<u8>,
    pub gex: Option<GexExchange>,
}

impl Exchange {
    pub fn new(client_id: &[u8], server_id: &[u8]) -> Self {
        Exchange {
            client_id: client_id.to_vec(),
            server_id: server_id.to_vec(),
            client_kex_init: Vec::new(),
            server_kex_init: Vec::new(),
            client_ephemeral: Vec::new(),
            server_ephemeral: Vec::new(),
            gex: None,
        }
    }
}

/// The outbound half of a connection: the encoder and the write half
/// of the socket. Shared by every task that sends packets, behind an
/// async mutex.
///
/// Between our KEXINIT and our NEWKEYS, only transport and key
/// exchange messages go out. Everything else is queued, and sent with
/// the new keys right after NEWKEYS.
pub(crate) struct Writer {
    encoder: Encoder,
    stream: Box<dyn AsyncWrite + Send + Unpin>,
    buffer: Vec<u8>,
    kex_in_progress: bool,
    deferred: VecDeque<Vec<u8>>,
    limits: Limits,
}

impl Debug for Writer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Writer")
            .field("encoder", &self.encoder)
            .field("kex_in_progress", &self.kex_in_progress)
            .field("deferred", &self.deferred.len())
            .finish()
    }
}

impl Writer {
    pub fn new(stream: Box<dyn AsyncWrite + Send + Unpin>, limits: Limits) -> Self {
        Writer {
            encoder: Encoder::new(),
            stream,
            buffer: Vec::new(),
            kex_in_progress: false,
            deferred: VecDeque::new(),
            limits,
        }
    }

    pub fn encoder(&mut self) -> &mut Encoder {
        &mut self.encoder
    }

    /// Whether we sent a KEXINIT and not yet the matching NEWKEYS.
    pub fn is_kex_in_progress(&self) -> bool {
        self.kex_in_progress
    }

    pub fn deferred(&self) -> usize {
        self.deferred.len()
    }

    /// Sends `payload`, or queues it if a key exchange is in
    /// progress. Returns `true` if the outbound traffic calls for a
    /// new key exchange.
    pub async fn send(&mut self, payload: &[u8]) -> Result<bool, Error> {
        let msg = *payload.first().ok_or(Error::PacketSize(0))?;
        if self.kex_in_progress && !msg::allowed_during_kex(msg) {
            trace!("deferring message {msg:?} until the end of the key exchange");
            self.deferred.push_back(payload.to_vec());
            return Ok(false);
        }
        self.encoder.encode(payload, &mut self.buffer)?;
        match msg {
            msg::KEXINIT => self.kex_in_progress = true,
            msg::NEWKEYS => {
                self.kex_in_progress = false;
                if !self.deferred.is_empty() {
                    debug!("sending {} deferred packets", self.deferred.len());
                }
                while let Some(p) = self.deferred.pop_front() {
                    self.encoder.encode(&p, &mut self.buffer)?;
                }
            }
            _ => {}
        }
        self.flush().await?;
        Ok(!self.kex_in_progress && self.encoder.needs_rekey(&self.limits))
    }

    async fn flush(&mut self) -> Result<(), Error> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let result = async {
            self.stream.write_all(&self.buffer).await?;
            self.stream.flush().await
        }
        .await;
        self.buffer.clear();
        Ok(result?)
    }

    /// Closes the write half of the socket.
    pub async fn shutdown(&mut self) {
        if let Err(e) = self.stream.shutdown().await {
            debug!("shutdown: {e:?}");
        }
    }
}
