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

//!
//! This module exports kex algorithm names and factories for use with [Preferred](crate::Preferred).
mod curve25519;
pub(crate) mod dh;
mod ecdh_nistp;

use std::fmt::Debug;
use std::sync::Arc;

use curve25519::Curve25519KexType;
use dh::{
    DhGexSha256KexType, DhGroup14Sha1KexType, DhGroup14Sha256KexType, DhGroup16Sha512KexType,
    DhGroup1Sha1KexType,
};
use digest::Digest;
use ecdh_nistp::{EcdhNistP256KexType, EcdhNistP384KexType, EcdhNistP521KexType};
use ssh_encoding::Encode;
use zeroize::Zeroizing;

pub use self::dh::groups::DhGroup;
use crate::cipher::{Cipher, CipherPair};
use crate::helpers::encode_mpint;
use crate::mac::MacAlgorithm;
use crate::registry::Registry;
use crate::session::Exchange;
use crate::Error;

/// A key exchange method as negotiated: makes a fresh state for each
/// exchange.
pub trait KexType: Send + Sync {
    fn make(&self) -> Box<dyn KexAlgorithm + Send>;
}

impl Debug for dyn KexAlgorithm + Send {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KexAlgorithm")
    }
}

/// The state of one exchange. Both sides run the same steps: make an
/// ephemeral value, combine it with the other side's, hash the
/// transcript, then stretch the shared secret into keys.
pub trait KexAlgorithm {
    /// Diffie-Hellman group exchange (RFC 4419) first agrees on a group
    /// with `KEX_DH_GEX_REQUEST` / `KEX_DH_GEX_GROUP`.
    fn is_dh_gex(&self) -> bool {
        false
    }

    /// Sets the group received in `KEX_DH_GEX_GROUP`.
    fn dh_gex_set_group(&mut self, _group: DhGroup) -> Result<(), Error> {
        Err(Error::Inconsistent)
    }

    /// Generates our ephemeral key pair and returns the public half,
    /// as the contents of the string sent on the wire (`e` or `Q_C`).
    fn generate_ephemeral(&mut self) -> Result<Vec<u8>, Error>;

    /// Combines our ephemeral secret with the peer's public value.
    fn compute_shared_secret(&mut self, remote_public: &[u8]) -> Result<(), Error>;

    /// The exchange hash `H`, with `K_S` given as the encoded host key.
    fn compute_exchange_hash(&self, host_key: &[u8], exchange: &Exchange)
        -> Result<Vec<u8>, Error>;

    fn compute_keys(
        &self,
        session_id: &[u8],
        exchange_hash: &[u8],
        local_to_remote: Direction<'_>,
        remote_to_local: Direction<'_>,
        is_server: bool,
    ) -> Result<CipherPair, Error>;
}

/// Algorithms negotiated for one direction.
#[derive(Clone, Copy)]
pub struct Direction<'a> {
    pub cipher: &'a dyn Cipher,
    pub mac: &'a dyn MacAlgorithm,
}

/// `curve25519-sha256`
pub const CURVE25519: &str = "curve25519-sha256";
/// `curve25519-sha256@libssh.org`
pub const CURVE25519_PRE_RFC_8731: &str = "curve25519-sha256@libssh.org";
/// `diffie-hellman-group1-sha1`
pub const DH_G1_SHA1: &str = "diffie-hellman-group1-sha1";
/// `diffie-hellman-group14-sha1`
pub const DH_G14_SHA1: &str = "diffie-hellman-group14-sha1";
/// `diffie-hellman-group14-sha256`
pub const DH_G14_SHA256: &str = "diffie-hellman-group14-sha256";
/// `diffie-hellman-group16-sha512`
pub const DH_G16_SHA512: &str = "diffie-hellman-group16-sha512";
/// `diffie-hellman-group-exchange-sha256`
pub const DH_GEX_SHA256: &str = "diffie-hellman-group-exchange-sha256";
/// `ecdh-sha2-nistp256`
pub const ECDH_SHA2_NISTP256: &str = "ecdh-sha2-nistp256";
/// `ecdh-sha2-nistp384`
pub const ECDH_SHA2_NISTP384: &str = "ecdh-sha2-nistp384";
/// `ecdh-sha2-nistp521`
pub const ECDH_SHA2_NISTP521: &str = "ecdh-sha2-nistp521";
/// `ext-info-c`
pub const EXTENSION_SUPPORT_AS_CLIENT: &str = "ext-info-c";
/// `ext-info-s`
pub const EXTENSION_SUPPORT_AS_SERVER: &str = "ext-info-s";
/// `kex-strict-c-v00@openssh.com`
pub const EXTENSION_OPENSSH_STRICT_KEX_AS_CLIENT: &str = "kex-strict-c-v00@openssh.com";
/// `kex-strict-s-v00@openssh.com`
pub const EXTENSION_OPENSSH_STRICT_KEX_AS_SERVER: &str = "kex-strict-s-v00@openssh.com";

/// Names that may appear in the kex list without being methods.
pub(crate) fn is_marker(name: &str) -> bool {
    matches!(
        name,
        EXTENSION_SUPPORT_AS_CLIENT
            | EXTENSION_SUPPORT_AS_SERVER
            | EXTENSION_OPENSSH_STRICT_KEX_AS_CLIENT
            | EXTENSION_OPENSSH_STRICT_KEX_AS_SERVER
    )
}

/// Advertised by default, most preferred first.
pub const DEFAULT_ORDER: &[&str] = &[
    CURVE25519,
    CURVE25519_PRE_RFC_8731,
    ECDH_SHA2_NISTP256,
    ECDH_SHA2_NISTP384,
    ECDH_SHA2_NISTP521,
    DH_GEX_SHA256,
    DH_G16_SHA512,
    DH_G14_SHA256,
];

/// Every key exchange method implemented by this crate.
pub const ALL_KEX_ALGORITHMS: &[&str] = &[
    CURVE25519,
    CURVE25519_PRE_RFC_8731,
    ECDH_SHA2_NISTP256,
    ECDH_SHA2_NISTP384,
    ECDH_SHA2_NISTP521,
    DH_GEX_SHA256,
    DH_G16_SHA512,
    DH_G14_SHA256,
    DH_G14_SHA1,
    DH_G1_SHA1,
];

pub fn builtin(name: &str) -> Option<Arc<dyn KexType>> {
    Some(match name {
        CURVE25519 | CURVE25519_PRE_RFC_8731 => Arc::new(Curve25519KexType {}),
        ECDH_SHA2_NISTP256 => Arc::new(EcdhNistP256KexType {}),
        ECDH_SHA2_NISTP384 => Arc::new(EcdhNistP384KexType {}),
        ECDH_SHA2_NISTP521 => Arc::new(EcdhNistP521KexType {}),
        DH_GEX_SHA256 => Arc::new(DhGexSha256KexType {}),
        DH_G16_SHA512 => Arc::new(DhGroup16Sha512KexType {}),
        DH_G14_SHA256 => Arc::new(DhGroup14Sha256KexType {}),
        DH_G14_SHA1 => Arc::new(DhGroup14Sha1KexType {}),
        DH_G1_SHA1 => Arc::new(DhGroup1Sha1KexType {}),
        _ => return None,
    })
}

/// A registry holding the built-in methods listed in `names`, in order.
pub fn registry(names: &[&'static str]) -> Registry<dyn KexType> {
    let mut r = Registry::new();
    for &name in names {
        if let Some(f) = builtin(name) {
            r.register(name, f);
        }
    }
    r
}

/// Writes the transcript common to every method, up to and including
/// `K_S`.
pub(crate) fn encode_exchange_prefix(
    host_key: &[u8],
    exchange: &Exchange,
    buffer: &mut Vec<u8>,
) -> Result<(), Error> {
    exchange.client_id.as_slice().encode(buffer)?;
    exchange.server_id.as_slice().encode(buffer)?;
    exchange.client_kex_init.as_slice().encode(buffer)?;
    exchange.server_kex_init.as_slice().encode(buffer)?;
    host_key.encode(buffer)?;
    Ok(())
}

/// The exchange hash of the ECDH-style methods (RFC 5656, section 4,
/// and RFC 4253, section 8): the transcript, both ephemerals as
/// strings, then `K` as an mpint.
pub(crate) fn exchange_hash<D: Digest>(
    host_key: &[u8],
    exchange: &Exchange,
    shared_secret: &[u8],
) -> Result<Vec<u8>, Error> {
    let mut buffer = Zeroizing::new(Vec::new());
    encode_exchange_prefix(host_key, exchange, &mut buffer)?;
    exchange.client_ephemeral.as_slice().encode(&mut *buffer)?;
    exchange.server_ephemeral.as_slice().encode(&mut *buffer)?;
    encode_mpint(shared_secret, &mut *buffer)?;
    Ok(D::digest(buffer.as_slice()).to_vec())
}

/// Key stretching, as in RFC 4253, section 7.2:
/// `HASH(K || H || letter || session_id)`, extended with
/// `HASH(K || H || K1 || ...)` until long enough.
pub(crate) fn derive_key<D: Digest>(
    shared_secret: &[u8],
    exchange_hash: &[u8],
    letter: u8,
    session_id: &[u8],
    len: usize,
) -> Result<Zeroizing<Vec<u8>>, Error> {
    let mut key = Zeroizing::new(Vec::with_capacity(len));
    if len == 0 {
        return Ok(key);
    }
    let mut k = Zeroizing::new(Vec::new());
    encode_mpint(shared_secret, &mut *k)?;

    let mut hasher = D::new();
    hasher.update(k.as_slice());
    hasher.update(exchange_hash);
    hasher.update([letter]);
    hasher.update(session_id);
    key.extend_from_slice(&hasher.finalize());

    while key.len() < len {
        let mut hasher = D::new();
        hasher.update(k.as_slice());
        hasher.update(exchange_hash);
        hasher.update(key.as_slice());
        key.extend_from_slice(&hasher.finalize());
    }
    key.truncate(len);
    Ok(key)
}

pub(crate) fn compute_keys<D: Digest>(
    shared_secret: &[u8],
    session_id: &[u8],
    exchange_hash: &[u8],
    local_to_remote: Direction<'_>,
    remote_to_local: Direction<'_>,
    is_server: bool,
) -> Result<CipherPair, Error> {
    // A/B are the IVs, C/D the encryption keys and E/F the MAC keys,
    // client to server first.
    let (out_iv, in_iv, out_key, in_key, out_mac, in_mac) = if is_server {
        (b'B', b'A', b'D', b'C', b'F', b'E')
    } else {
        (b'A', b'B', b'C', b'D', b'E', b'F')
    };
    let derive = |letter, len| derive_key::<D>(shared_secret, exchange_hash, letter, session_id, len);

    let local_to_remote = {
        let key = derive(out_key, local_to_remote.cipher.key_len())?;
        let iv = derive(out_iv, local_to_remote.cipher.nonce_len())?;
        let mac = derive(out_mac, local_to_remote.mac.key_len())?;
        local_to_remote
            .cipher
            .make_sealing_key(&key, &iv, &mac, local_to_remote.mac)?
    };
    let remote_to_local = {
        let key = derive(in_key, remote_to_local.cipher.key_len())?;
        let iv = derive(in_iv, remote_to_local.cipher.nonce_len())?;
        let mac = derive(in_mac, remote_to_local.mac.key_len())?;
        remote_to_local
            .cipher
            .make_opening_key(&key, &iv, &mac, remote_to_local.mac)?
    };
    Ok(CipherPair {
        local_to_remote,
        remote_to_local,
    })
}
