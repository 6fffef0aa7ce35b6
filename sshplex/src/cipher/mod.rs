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

//!
//! This module exports cipher names and factories for use with [Preferred](crate::Preferred).
use std::fmt::Debug;
use std::sync::Arc;

use aes::{Aes128, Aes192, Aes256};
#[cfg(feature = "aws-lc-rs")]
use aws_lc_rs::aead::{AES_128_GCM as ALGORITHM_AES_128_GCM, AES_256_GCM as ALGORITHM_AES_256_GCM};
use ctr::Ctr128BE;
use rand::RngCore;
#[cfg(all(not(feature = "aws-lc-rs"), feature = "ring"))]
use ring::aead::{AES_128_GCM as ALGORITHM_AES_128_GCM, AES_256_GCM as ALGORITHM_AES_256_GCM};

use self::cbc::CbcWrapper;
use crate::mac::MacAlgorithm;
use crate::registry::Registry;
use crate::Error;

pub(crate) mod block;
pub(crate) mod cbc;
pub(crate) mod chacha20poly1305;
pub(crate) mod clear;
pub(crate) mod gcm;

use block::SshBlockCipher;
use chacha20poly1305::SshChacha20Poly1305Cipher;
use gcm::GcmCipher;

/// A cipher as negotiated: builds the per-direction keyed states.
pub trait Cipher: Send + Sync {
    /// Whether a separate MAC must be negotiated alongside this
    /// cipher. AEAD ciphers authenticate packets themselves.
    fn needs_mac(&self) -> bool {
        false
    }
    fn key_len(&self) -> usize;
    fn nonce_len(&self) -> usize {
        0
    }
    fn make_opening_key(
        &self,
        key: &[u8],
        nonce: &[u8],
        mac_key: &[u8],
        mac: &dyn MacAlgorithm,
    ) -> Result<Box<dyn OpeningKey + Send>, Error>;
    fn make_sealing_key(
        &self,
        key: &[u8],
        nonce: &[u8],
        mac_key: &[u8],
        mac: &dyn MacAlgorithm,
    ) -> Result<Box<dyn SealingKey + Send>, Error>;
}

/// `clear`
pub const CLEAR: &str = "clear";
/// `aes128-ctr`
pub const AES_128_CTR: &str = "aes128-ctr";
/// `aes192-ctr`
pub const AES_192_CTR: &str = "aes192-ctr";
/// `aes256-ctr`
pub const AES_256_CTR: &str = "aes256-ctr";
/// `aes128-cbc`
pub const AES_128_CBC: &str = "aes128-cbc";
/// `aes192-cbc`
pub const AES_192_CBC: &str = "aes192-cbc";
/// `aes256-cbc`
pub const AES_256_CBC: &str = "aes256-cbc";
/// `aes128-gcm@openssh.com`
pub const AES_128_GCM: &str = "aes128-gcm@openssh.com";
/// `aes256-gcm@openssh.com`
pub const AES_256_GCM: &str = "aes256-gcm@openssh.com";
/// `chacha20-poly1305@openssh.com`
pub const CHACHA20_POLY1305: &str = "chacha20-poly1305@openssh.com";

/// Advertised by default, most preferred first.
pub const DEFAULT_ORDER: &[&str] = &[
    CHACHA20_POLY1305,
    AES_256_GCM,
    AES_128_GCM,
    AES_256_CTR,
    AES_192_CTR,
    AES_128_CTR,
];

/// Every cipher this crate can negotiate.
pub const ALL_CIPHERS: &[&str] = &[
    AES_128_CTR,
    AES_192_CTR,
    AES_256_CTR,
    AES_128_GCM,
    AES_256_GCM,
    AES_128_CBC,
    AES_192_CBC,
    AES_256_CBC,
    CHACHA20_POLY1305,
];

/// The built-in factory for `name`.
pub fn builtin(name: &str) -> Option<Arc<dyn Cipher>> {
    Some(match name {
        AES_128_CTR => Arc::new(SshBlockCipher::<Ctr128BE<Aes128>>::new(16)),
        AES_192_CTR => Arc::new(SshBlockCipher::<Ctr128BE<Aes192>>::new(16)),
        AES_256_CTR => Arc::new(SshBlockCipher::<Ctr128BE<Aes256>>::new(16)),
        AES_128_CBC => Arc::new(SshBlockCipher::<CbcWrapper<Aes128>>::new(16)),
        AES_192_CBC => Arc::new(SshBlockCipher::<CbcWrapper<Aes192>>::new(16)),
        AES_256_CBC => Arc::new(SshBlockCipher::<CbcWrapper<Aes256>>::new(16)),
        AES_128_GCM => Arc::new(GcmCipher(&ALGORITHM_AES_128_GCM)),
        AES_256_GCM => Arc::new(GcmCipher(&ALGORITHM_AES_256_GCM)),
        CHACHA20_POLY1305 => Arc::new(SshChacha20Poly1305Cipher {}),
        _ => return None,
    })
}

/// A registry holding the built-in ciphers listed in `names`, in order.
pub fn registry(names: &[&'static str]) -> Registry<dyn Cipher> {
    let mut r = Registry::new();
    for &name in names {
        if let Some(f) = builtin(name) {
            r.register(name, f);
        }
    }
    r
}

/// The keys for both directions, produced by a key exchange.
pub struct CipherPair {
    pub local_to_remote: Box<dyn SealingKey + Send>,
    pub remote_to_local: Box<dyn OpeningKey + Send>,
}

impl Debug for CipherPair {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> Result<(), std::fmt::Error> {
        f.write_str("CipherPair { .. }")
    }
}

/// Inbound half of a cipher.
pub trait OpeningKey {
    /// How many bytes must be available before the packet length can
    /// be recovered.
    fn packet_length_to_read_for_block_length(&self) -> usize {
        PACKET_LENGTH_LEN
    }

    /// Recovers the packet length from the first
    /// `packet_length_to_read_for_block_length()` bytes. Ciphers whose
    /// tag covers the encrypted length must leave `first_bytes`
    /// untouched; the others may decrypt it in place, and `open` then
    /// continues from there.
    fn decrypt_packet_length(&mut self, sequence_number: u32, first_bytes: &mut [u8])
        -> Result<u32, Error>;

    fn block_size(&self) -> usize {
        8
    }

    /// Whether the length field stays outside the padded area.
    fn length_is_separate(&self) -> bool {
        false
    }

    fn tag_len(&self) -> usize;

    /// Authenticates and decrypts a whole packet (length, body and
    /// tag), returning `padding_length || payload || padding`.
    fn open<'a>(&mut self, sequence_number: u32, packet: &'a mut [u8])
        -> Result<&'a [u8], Error>;
}

/// Outbound half of a cipher.
pub trait SealingKey {
    fn block_size(&self) -> usize {
        8
    }

    /// Whether the length field stays outside the padded area.
    fn length_is_separate(&self) -> bool {
        false
    }

    // https://tools.ietf.org/html/rfc4253#section-6
    fn padding_length(&self, payload_len: usize) -> usize {
        let block_size = self.block_size().max(8);
        let covered = if self.length_is_separate() {
            PADDING_LENGTH_LEN + payload_len
        } else {
            PACKET_LENGTH_LEN + PADDING_LENGTH_LEN + payload_len
        };
        let mut padding = block_size - covered % block_size;
        if padding < MINIMUM_PADDING_LEN {
            padding += block_size;
        }
        while PACKET_LENGTH_LEN + PADDING_LENGTH_LEN + payload_len + padding < MINIMUM_PACKET_LEN {
            padding += block_size;
        }
        padding
    }

    fn fill_padding(&self, padding_out: &mut [u8]) {
        rand::thread_rng().fill_bytes(padding_out);
    }

    fn tag_len(&self) -> usize;

    /// Encrypts `packet` (length, padding length, payload, padding) in
    /// place and writes the tag.
    fn seal(&mut self, sequence_number: u32, packet: &mut [u8], tag_out: &mut [u8])
        -> Result<(), Error>;
}

pub(crate) const PACKET_LENGTH_LEN: usize = 4;
pub(crate) const PADDING_LENGTH_LEN: usize = 1;
pub(crate) const MINIMUM_PADDING_LEN: usize = 4;
pub(crate) const MINIMUM_PACKET_LEN: usize = 16;
pub(crate) const MAXIMUM_PACKET_LEN: usize = 256 * 1024;
