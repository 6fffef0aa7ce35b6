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
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use log::debug;
use rand::RngCore;
use ssh_encoding::{Decode, Encode};

use crate::cipher::Cipher;
use crate::compression::CompressionAlgorithm;
use crate::helpers::NameList;
use crate::hostkey::HostKeyAlgorithm;
use crate::kex::{
    is_marker, KexType, EXTENSION_OPENSSH_STRICT_KEX_AS_CLIENT,
    EXTENSION_OPENSSH_STRICT_KEX_AS_SERVER, EXTENSION_SUPPORT_AS_CLIENT,
};
use crate::mac::MacAlgorithm;
use crate::registry::Registry;
use crate::{cipher, compression, hostkey, kex, mac, msg, AlgorithmKind, Error};

/// Registries of the algorithms we support, most preferred first.
#[derive(Debug, Clone)]
pub struct Preferred {
    /// Key exchange methods.
    pub kex: Registry<dyn KexType>,
    /// Host key signature algorithms.
    pub key: Registry<dyn HostKeyAlgorithm>,
    /// Symmetric ciphers.
    pub cipher: Registry<dyn Cipher>,
    /// MAC algorithms.
    pub mac: Registry<dyn MacAlgorithm>,
    /// Compression algorithms.
    pub compression: Registry<dyn CompressionAlgorithm>,
}

impl Default for Preferred {
    fn default() -> Preferred {
        Preferred {
            kex: kex::registry(kex::DEFAULT_ORDER),
            key: hostkey::registry(hostkey::DEFAULT_ORDER),
            cipher: cipher::registry(cipher::DEFAULT_ORDER),
            mac: mac::registry(mac::DEFAULT_ORDER),
            compression: compression::registry(compression::DEFAULT_ORDER),
        }
    }
}

impl Preferred {
    /// The defaults, but asking for compression first.
    #[cfg(feature = "flate2")]
    pub fn compressed() -> Preferred {
        let mut p = Preferred::default();
        p.compression.prefer(compression::ZLIB);
        p.compression.prefer(compression::ZLIB_LEGACY);
        p
    }
}

/// The contents of a KEXINIT message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
    pub cookie: [u8; 16],
    pub kex: NameList,
    pub key: NameList,
    pub cipher_client_to_server: NameList,
    pub cipher_server_to_client: NameList,
    pub mac_client_to_server: NameList,
    pub mac_server_to_client: NameList,
    pub compression_client_to_server: NameList,
    pub compression_server_to_client: NameList,
    pub languages_client_to_server: NameList,
    pub languages_server_to_client: NameList,
    pub first_kex_packet_follows: bool,
}

fn names<T: ?Sized>(registry: &Registry<T>) -> NameList {
    NameList(registry.names().map(str::to_owned).collect())
}

impl Proposal {
    /// Our proposal as a client. The extension markers only go into the
    /// first exchange of a connection.
    pub fn client(pref: &Preferred, first_exchange: bool, strict_kex: bool) -> Proposal {
        let mut cookie = [0; 16];
        rand::thread_rng().fill_bytes(&mut cookie);

        let mut kex = names(&pref.kex);
        if first_exchange {
            kex.0.push(EXTENSION_SUPPORT_AS_CLIENT.to_owned());
            if strict_kex {
                kex.0.push(EXTENSION_OPENSSH_STRICT_KEX_AS_CLIENT.to_owned());
            }
        }
        Proposal {
            cookie,
            kex,
            key: names(&pref.key),
            cipher_client_to_server: names(&pref.cipher),
            cipher_server_to_client: names(&pref.cipher),
            mac_client_to_server: names(&pref.mac),
            mac_server_to_client: names(&pref.mac),
            compression_client_to_server: names(&pref.compression),
            compression_server_to_client: names(&pref.compression),
            languages_client_to_server: NameList(Vec::new()),
            languages_server_to_client: NameList(Vec::new()),
            first_kex_packet_follows: false,
        }
    }

    /// The KEXINIT payload, message number included.
    pub fn write(&self, buf: &mut Vec<u8>) -> Result<(), Error> {
        buf.push(msg::KEXINIT);
        buf.extend_from_slice(&self.cookie);
        self.kex.encode(buf)?;
        self.key.encode(buf)?;
        self.cipher_client_to_server.encode(buf)?;
        self.cipher_server_to_client.encode(buf)?;
        self.mac_client_to_server.encode(buf)?;
        self.mac_server_to_client.encode(buf)?;
        self.compression_client_to_server.encode(buf)?;
        self.compression_server_to_client.encode(buf)?;
        self.languages_client_to_server.encode(buf)?;
        self.languages_server_to_client.encode(buf)?;
        u8::from(self.first_kex_packet_follows).encode(buf)?;
        0u32.encode(buf)?; // reserved
        Ok(())
    }

    /// Parses a KEXINIT payload, message number included.
    pub fn read(payload: &[u8]) -> Result<Proposal, Error> {
        let Some((&msg::KEXINIT, mut r)) = payload.split_first() else {
            return Err(Error::KexInit);
        };
        let mut cookie = [0; 16];
        ssh_encoding::Reader::read(&mut r, &mut cookie)?;
        let proposal = Proposal {
            cookie,
            kex: NameList::decode(&mut r)?,
            key: NameList::decode(&mut r)?,
            cipher_client_to_server: NameList::decode(&mut r)?,
            cipher_server_to_client: NameList::decode(&mut r)?,
            mac_client_to_server: NameList::decode(&mut r)?,
            mac_server_to_client: NameList::decode(&mut r)?,
            compression_client_to_server: NameList::decode(&mut r)?,
            compression_server_to_client: NameList::decode(&mut r)?,
            languages_client_to_server: NameList::decode(&mut r)?,
            languages_server_to_client: NameList::decode(&mut r)?,
            first_kex_packet_follows: u8::decode(&mut r)? != 0,
        };
        u32::decode(&mut r)?; // reserved
        Ok(proposal)
    }
}

/// The algorithms agreed on for one exchange.
#[derive(Clone)]
pub struct Negotiated {
    pub kex: String,
    pub key: String,
    pub cipher_client_to_server: String,
    pub cipher_server_to_client: String,
    pub mac_client_to_server: String,
    pub mac_server_to_client: String,
    pub compression_client_to_server: String,
    pub compression_server_to_client: String,
    /// The server sent a guessed kex packet that must be dropped.
    pub ignore_guessed: bool,
    /// Both sides asked for strict key exchange.
    pub strict_kex: bool,
    pub(crate) algorithms: Algorithms,
}

impl Debug for Negotiated {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Negotiated")
            .field("kex", &self.kex)
            .field("key", &self.key)
            .field("cipher_client_to_server", &self.cipher_client_to_server)
            .field("cipher_server_to_client", &self.cipher_server_to_client)
            .field("mac_client_to_server", &self.mac_client_to_server)
            .field("mac_server_to_client", &self.mac_server_to_client)
            .field(
                "compression_client_to_server",
                &self.compression_client_to_server,
            )
            .field(
                "compression_server_to_client",
                &self.compression_server_to_client,
            )
            .field("ignore_guessed", &self.ignore_guessed)
            .field("strict_kex", &self.strict_kex)
            .finish()
    }
}

/// Factories for the negotiated names, looked up once.
#[derive(Clone)]
pub(crate) struct Algorithms {
    pub kex: Arc<dyn KexType>,
    pub key: Arc<dyn HostKeyAlgorithm>,
    pub cipher_client_to_server: Arc<dyn Cipher>,
    pub cipher_server_to_client: Arc<dyn Cipher>,
    pub mac_client_to_server: Arc<dyn MacAlgorithm>,
    pub mac_server_to_client: Arc<dyn MacAlgorithm>,
    pub compression_client_to_server: Arc<dyn CompressionAlgorithm>,
    pub compression_server_to_client: Arc<dyn CompressionAlgorithm>,
}

/// The first name of `client` that also appears in `server`, and
/// whether it is the first choice of both sides.
pub(crate) fn select<'a>(
    client: &'a [String],
    server: &[String],
    kind: AlgorithmKind,
) -> Result<(bool, &'a str), Error> {
    let mut both_first_choice = true;
    for c in client {
        if server.iter().any(|s| s == c) {
            let both_first = both_first_choice && server.first() == Some(c);
            return Ok((both_first, c));
        }
        both_first_choice = false;
    }
    Err(Error::NoCommonAlgo {
        kind,
        ours: client.to_vec(),
        theirs: server.to_vec(),
    })
}

fn lookup<T: ?Sized>(registry: &Registry<T>, name: &str) -> Result<Arc<T>, Error> {
    registry.get(name).cloned().ok_or_else(|| {
        debug!("negotiated {name:?}, which is not registered");
        Error::UnknownAlgo
    })
}

/// MACs are negotiated even for AEAD ciphers, but a missing match is
/// only an error when the cipher needs one.
fn select_mac(
    pref: &Preferred,
    cipher: &dyn Cipher,
    client: &NameList,
    server: &NameList,
) -> Result<(String, Arc<dyn MacAlgorithm>), Error> {
    match select(&client.0, &server.0, AlgorithmKind::Mac) {
        Ok((_, name)) if cipher.needs_mac() => Ok((name.to_owned(), lookup(&pref.mac, name)?)),
        Err(e) if cipher.needs_mac() => Err(e),
        _ => Ok((
            mac::NONE.to_owned(),
            mac::builtin(mac::NONE).ok_or(Error::UnknownAlgo)?,
        )),
    }
}

impl Negotiated {
    /// Picks, in each category, the first client name also offered by
    /// the server. `client` is the proposal we sent, built from `pref`.
    pub fn select(
        pref: &Preferred,
        client: &Proposal,
        server: &Proposal,
    ) -> Result<Negotiated, Error> {
        let client_kex: Vec<String> = client
            .kex
            .0
            .iter()
            .filter(|n| !is_marker(n))
            .cloned()
            .collect();
        let server_kex: Vec<String> = server
            .kex
            .0
            .iter()
            .filter(|n| !is_marker(n))
            .cloned()
            .collect();
        let (kex_both_first, kex_name) = select(&client_kex, &server_kex, AlgorithmKind::Kex)?;

        let strict_kex = client.kex.contains(EXTENSION_OPENSSH_STRICT_KEX_AS_CLIENT)
            && server.kex.contains(EXTENSION_OPENSSH_STRICT_KEX_AS_SERVER);

        let (key_both_first, key_name) = select(&client.key.0, &server.key.0, AlgorithmKind::Key)?;

        let (_, c2s_cipher) = select(
            &client.cipher_client_to_server.0,
            &server.cipher_client_to_server.0,
            AlgorithmKind::Cipher,
        )?;
        let (_, s2c_cipher) = select(
            &client.cipher_server_to_client.0,
            &server.cipher_server_to_client.0,
            AlgorithmKind::Cipher,
        )?;
        let c2s_cipher_alg = lookup(&pref.cipher, c2s_cipher)?;
        let s2c_cipher_alg = lookup(&pref.cipher, s2c_cipher)?;

        let (c2s_mac, c2s_mac_alg) = select_mac(
            pref,
            c2s_cipher_alg.as_ref(),
            &client.mac_client_to_server,
            &server.mac_client_to_server,
        )?;
        let (s2c_mac, s2c_mac_alg) = select_mac(
            pref,
            s2c_cipher_alg.as_ref(),
            &client.mac_server_to_client,
            &server.mac_server_to_client,
        )?;

        let (_, c2s_compression) = select(
            &client.compression_client_to_server.0,
            &server.compression_client_to_server.0,
            AlgorithmKind::Compression,
        )?;
        let (_, s2c_compression) = select(
            &client.compression_server_to_client.0,
            &server.compression_server_to_client.0,
            AlgorithmKind::Compression,
        )?;

        let algorithms = Algorithms {
            kex: lookup(&pref.kex, kex_name)?,
            key: lookup(&pref.key, key_name)?,
            cipher_client_to_server: c2s_cipher_alg,
            cipher_server_to_client: s2c_cipher_alg,
            mac_client_to_server: c2s_mac_alg,
            mac_server_to_client: s2c_mac_alg,
            compression_client_to_server: lookup(&pref.compression, c2s_compression)?,
            compression_server_to_client: lookup(&pref.compression, s2c_compression)?,
        };

        let negotiated = Negotiated {
            kex: kex_name.to_owned(),
            key: key_name.to_owned(),
            cipher_client_to_server: c2s_cipher.to_owned(),
            cipher_server_to_client: s2c_cipher.to_owned(),
            mac_client_to_server: c2s_mac,
            mac_server_to_client: s2c_mac,
            compression_client_to_server: c2s_compression.to_owned(),
            compression_server_to_client: s2c_compression.to_owned(),
            // Ignore the next packet if (1) it follows and (2) it's not the correct guess.
            ignore_guessed: server.first_kex_packet_follows && !(kex_both_first && key_both_first),
            strict_kex,
            algorithms,
        };
        debug!("negotiated: {negotiated:?}");
        Ok(negotiated)
    }
}
