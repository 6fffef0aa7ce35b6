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

//! Binary packet framing (RFC 4253, section 6).
//!
//! An [`Encoder`] turns payloads into wire bytes and a [`Decoder`] does
//! the reverse. Each holds the keys currently in use for its direction
//! and the keys to switch to once NEWKEYS goes through, along with the
//! sequence number and the traffic counters that drive rekeying.

use std::num::Wrapping;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Buf, Bytes, BytesMut};
use log::{debug, trace};

use crate::cipher::{
    clear, OpeningKey, SealingKey, MAXIMUM_PACKET_LEN, MINIMUM_PACKET_LEN, PACKET_LENGTH_LEN,
    PADDING_LENGTH_LEN,
};
use crate::compression::{CompressionAlgorithm, Compressor, Decompressor};
use crate::{msg, Error, Limits};

/// Traffic in one direction since the keys were last changed.
#[derive(Debug, Clone, Copy)]
pub struct Counters {
    pub bytes: u64,
    pub packets: u64,
    pub since: Instant,
}

impl Counters {
    fn new() -> Self {
        Counters {
            bytes: 0,
            packets: 0,
            since: Instant::now(),
        }
    }

    fn record(&mut self, bytes: usize) {
        self.bytes += bytes as u64;
        self.packets += 1;
    }

    /// Whether this traffic calls for a new key exchange.
    pub fn exceeds(&self, byte_limit: usize, time_limit: Duration) -> bool {
        self.bytes >= byte_limit as u64
            || self.packets >= REKEY_PACKET_LIMIT
            || self.since.elapsed() >= time_limit
    }
}

/// Rekey well before a 32-bit sequence number could repeat.
const REKEY_PACKET_LIMIT: u64 = 1 << 31;

/// Compression state for one direction. Delayed methods only start
/// once the user is authenticated.
#[derive(Default)]
struct CompressionSlot<T: ?Sized> {
    state: Option<Box<T>>,
    waiting: Option<Box<T>>,
}

impl<T: ?Sized> CompressionSlot<T> {
    fn install(&mut self, state: Option<Box<T>>, delayed: bool, authenticated: bool) {
        if delayed && !authenticated {
            self.state = None;
            self.waiting = state;
        } else {
            self.state = state;
            self.waiting = None;
        }
    }

    fn activate(&mut self) {
        if let Some(state) = self.waiting.take() {
            debug!("starting delayed compression");
            self.state = Some(state);
        }
    }
}

struct PendingSealing {
    key: Box<dyn SealingKey + Send>,
    compressor: Option<Box<dyn Compressor + Send>>,
    delayed: bool,
}

struct PendingOpening {
    key: Box<dyn OpeningKey + Send>,
    decompressor: Option<Box<dyn Decompressor + Send>>,
    delayed: bool,
}

/// Outbound half of the codec.
pub struct Encoder {
    seqn: Wrapping<u32>,
    key: Box<dyn SealingKey + Send>,
    pending: Option<PendingSealing>,
    compression: CompressionSlot<dyn Compressor + Send>,
    authenticated: bool,
    keyed: bool,
    strict: bool,
    counters: Counters,
    compressed: Vec<u8>,
}

impl std::fmt::Debug for Encoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Encoder")
            .field("seqn", &self.seqn.0)
            .field("keyed", &self.keyed)
            .field("strict", &self.strict)
            .field("counters", &self.counters)
            .finish()
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder {
    /// An encoder sending unencrypted packets, as at the start of a
    /// connection.
    pub fn new() -> Self {
        Encoder {
            seqn: Wrapping(0),
            key: Box::new(clear::Key),
            pending: None,
            compression: CompressionSlot {
                state: None,
                waiting: None,
            },
            authenticated: false,
            keyed: false,
            strict: false,
            counters: Counters::new(),
            compressed: Vec::new(),
        }
    }

    /// Sequence number of the next packet.
    pub fn sequence_number(&self) -> u32 {
        self.seqn.0
    }

    pub(crate) fn set_sequence_number(&mut self, seqn: u32) {
        self.seqn = Wrapping(seqn)
    }

    /// Restarts sequence numbers at zero after each NEWKEYS.
    pub fn set_strict(&mut self, strict: bool) {
        self.strict = strict
    }

    /// Whether the first key exchange has completed in this direction.
    pub fn is_keyed(&self) -> bool {
        self.keyed
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    /// Whether this direction should be rekeyed under `limits`.
    pub fn needs_rekey(&self, limits: &Limits) -> bool {
        self.keyed && self.counters.exceeds(limits.rekey_write_limit, limits.rekey_time_limit)
    }

    /// Keys to use from the packet after the next NEWKEYS.
    pub fn set_pending(
        &mut self,
        key: Box<dyn SealingKey + Send>,
        compression: &Arc<dyn CompressionAlgorithm>,
    ) {
        self.pending = Some(PendingSealing {
            key,
            compressor: compression.make_compressor(),
            delayed: compression.is_delayed(),
        })
    }

    /// Starts `zlib@openssh.com` compression, once the peer has
    /// accepted the user.
    pub fn activate_delayed_compression(&mut self) {
        self.authenticated = true;
        self.compression.activate();
    }

    /// Appends the wire form of `payload` to `out`, and returns the
    /// sequence number it was sent with.
    pub fn encode(&mut self, payload: &[u8], out: &mut Vec<u8>) -> Result<u32, Error> {
        let first = *payload.first().ok_or(Error::PacketSize(0))?;
        if self.seqn.0 == u32::MAX && !self.keyed {
            debug!("outgoing sequence number would wrap before the first key exchange");
            return Err(Error::SequenceWrap);
        }
        let seqn = self.seqn.0;
        trace!("writing, seqn = {seqn:?}, msg = {first:?}");

        let payload = if let Some(ref mut c) = self.compression.state {
            c.compress(payload, &mut self.compressed)?;
            self.compressed.as_slice()
        } else {
            payload
        };

        let padding_length = self.key.padding_length(payload.len());
        let packet_length = PADDING_LENGTH_LEN + payload.len() + padding_length;
        if packet_length > MAXIMUM_PACKET_LEN || padding_length > u8::MAX as usize {
            return Err(Error::PacketSize(packet_length));
        }
        let offset = out.len();
        out.extend_from_slice(&(packet_length as u32).to_be_bytes());
        out.push(padding_length as u8);
        out.extend_from_slice(payload);
        let padding_start = out.len();
        out.resize(padding_start + padding_length, 0);
        if let Some(padding) = out.get_mut(padding_start..) {
            self.key.fill_padding(padding);
        }
        let tag_len = self.key.tag_len();
        out.resize(out.len() + tag_len, 0);

        let packet = out.get_mut(offset..).ok_or(Error::Inconsistent)?;
        let (packet, tag) = packet.split_at_mut(PACKET_LENGTH_LEN + packet_length);
        self.key.seal(seqn, packet, tag)?;

        self.counters.record(PACKET_LENGTH_LEN + packet_length + tag_len);
        // Sequence numbers are on 32 bits and wrap.
        // https://tools.ietf.org/html/rfc4253#section-6.4
        self.seqn += Wrapping(1);

        match first {
            msg::NEWKEYS => self.switch_keys()?,
            msg::USERAUTH_SUCCESS => self.activate_delayed_compression(),
            _ => {}
        }
        Ok(seqn)
    }

    fn switch_keys(&mut self) -> Result<(), Error> {
        let pending = self.pending.take().ok_or_else(|| {
            debug!("NEWKEYS sent without new keys");
            Error::Inconsistent
        })?;
        self.key = pending.key;
        self.compression
            .install(pending.compressor, pending.delayed, self.authenticated);
        self.keyed = true;
        self.counters = Counters::new();
        if self.strict {
            self.seqn = Wrapping(0);
        }
        debug!("outbound keys changed, strict = {:?}", self.strict);
        Ok(())
    }
}

/// Inbound half of the codec. Bytes are pushed in with
/// [`Decoder::feed`] in chunks of any size, and complete packets come
/// out of [`Decoder::decode`].
pub struct Decoder {
    seqn: Wrapping<u32>,
    key: Box<dyn OpeningKey + Send>,
    pending: Option<PendingOpening>,
    compression: CompressionSlot<dyn Decompressor + Send>,
    authenticated: bool,
    keyed: bool,
    strict: bool,
    counters: Counters,
    buffer: BytesMut,
    /// Length of the packet being read, once known.
    packet_length: Option<usize>,
    decompressed: Vec<u8>,
}

impl std::fmt::Debug for Decoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decoder")
            .field("seqn", &self.seqn.0)
            .field("keyed", &self.keyed)
            .field("strict", &self.strict)
            .field("buffered", &self.buffer.len())
            .field("counters", &self.counters)
            .finish()
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder {
    pub fn new() -> Self {
        Decoder {
            seqn: Wrapping(0),
            key: Box::new(clear::Key),
            pending: None,
            compression: CompressionSlot {
                state: None,
                waiting: None,
            },
            authenticated: false,
            keyed: false,
            strict: false,
            counters: Counters::new(),
            buffer: BytesMut::new(),
            packet_length: None,
            decompressed: Vec::new(),
        }
    }

    /// Sequence number of the next packet.
    pub fn sequence_number(&self) -> u32 {
        self.seqn.0
    }

    pub(crate) fn set_sequence_number(&mut self, seqn: u32) {
        self.seqn = Wrapping(seqn)
    }

    pub fn set_strict(&mut self, strict: bool) {
        self.strict = strict
    }

    pub fn is_keyed(&self) -> bool {
        self.keyed
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn needs_rekey(&self, limits: &Limits) -> bool {
        self.keyed && self.counters.exceeds(limits.rekey_read_limit, limits.rekey_time_limit)
    }

    /// Keys to use from the packet after the next NEWKEYS.
    pub fn set_pending(
        &mut self,
        key: Box<dyn OpeningKey + Send>,
        compression: &Arc<dyn CompressionAlgorithm>,
    ) {
        self.pending = Some(PendingOpening {
            key,
            decompressor: compression.make_decompressor(),
            delayed: compression.is_delayed(),
        })
    }

    pub fn has_pending_keys(&self) -> bool {
        self.pending.is_some()
    }

    /// Bytes received but not decoded yet.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data)
    }

    /// The next complete packet, with its sequence number, or `None` if
    /// more bytes are needed.
    pub fn decode(&mut self) -> Result<Option<(u32, Bytes)>, Error> {
        let packet_length = match self.packet_length {
            Some(len) => len,
            None => {
                let first_len = self.key.packet_length_to_read_for_block_length();
                let Some(first) = self.buffer.get_mut(..first_len) else {
                    return Ok(None);
                };
                let len = self.key.decrypt_packet_length(self.seqn.0, first)? as usize;
                trace!("reading, seqn = {:?}, len = {len:?}", self.seqn.0);
                self.check_length(len)?;
                self.packet_length = Some(len);
                len
            }
        };

        let total = PACKET_LENGTH_LEN + packet_length + self.key.tag_len();
        if self.buffer.len() < total {
            return Ok(None);
        }
        let mut packet = self.buffer.split_to(total);
        self.packet_length = None;

        let seqn = self.seqn.0;
        // Sequence numbers are on 32 bits and wrap.
        // https://tools.ietf.org/html/rfc4253#section-6.4
        self.seqn += Wrapping(1);
        self.counters.record(total);
        if self.seqn.0 == 0 && !self.keyed {
            debug!("incoming sequence number wrapped before the first key exchange");
            return Err(Error::SequenceWrap);
        }

        let body = self.key.open(seqn, &mut packet)?;
        let padding_length = *body.first().ok_or(Error::PacketSize(0))? as usize;
        if padding_length < 4 {
            debug!("padding too short: {padding_length:?}");
            return Err(Error::PacketSize(packet_length));
        }
        let payload = body
            .len()
            .checked_sub(padding_length)
            .and_then(|end| body.get(PADDING_LENGTH_LEN..end))
            .ok_or(Error::PacketSize(packet_length))?;

        let payload = if let Some(ref mut d) = self.compression.state {
            d.decompress(payload, &mut self.decompressed)?;
            Bytes::copy_from_slice(&self.decompressed)
        } else {
            Bytes::copy_from_slice(payload)
        };

        match payload.first() {
            None => return Err(Error::PacketSize(0)),
            Some(&msg::NEWKEYS) => self.switch_keys()?,
            Some(&msg::USERAUTH_SUCCESS) => {
                self.authenticated = true;
                self.compression.activate();
            }
            _ => {}
        }
        Ok(Some((seqn, payload)))
    }

    fn check_length(&self, len: usize) -> Result<(), Error> {
        if len > MAXIMUM_PACKET_LEN {
            debug!("packet too long: {len:?}");
            return Err(Error::PacketSize(len));
        }
        if PACKET_LENGTH_LEN + len < MINIMUM_PACKET_LEN {
            debug!("packet too short: {len:?}");
            return Err(Error::PacketSize(len));
        }
        let covered = if self.key.length_is_separate() {
            len
        } else {
            PACKET_LENGTH_LEN + len
        };
        if covered % self.key.block_size().max(8) != 0 {
            debug!("packet length {len:?} not a multiple of the block size");
            return Err(Error::PacketSize(len));
        }
        Ok(())
    }

    fn switch_keys(&mut self) -> Result<(), Error> {
        let pending = self.pending.take().ok_or_else(|| {
            debug!("NEWKEYS received without new keys");
            Error::Inconsistent
        })?;
        self.key = pending.key;
        self.compression
            .install(pending.decompressor, pending.delayed, self.authenticated);
        self.keyed = true;
        self.counters = Counters::new();
        if self.strict {
            self.seqn = Wrapping(0);
        }
        debug!("inbound keys changed, strict = {:?}", self.strict);
        Ok(())
    }

    /// Drops any undecoded bytes, returning how many there were.
    pub fn discard(&mut self) -> usize {
        let n = self.buffer.remaining();
        self.buffer.clear();
        self.packet_length = None;
        n
    }
}

#[cfg(test)]
mod test {
    #![allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::panic)]
    use byteorder::{BigEndian, ByteOrder};

    use super::*;
    use crate::{cipher, compression, mac};

    fn read_u32(bytes: &[u8]) -> Option<u32> {
        bytes.get(..4).map(BigEndian::read_u32)
    }

    fn pair(
        cipher_name: &str,
        mac_name: &str,
        compression_name: &str,
    ) -> (Encoder, Decoder) {
        let c = cipher::builtin(cipher_name).unwrap();
        let m = mac::builtin(if c.needs_mac() { mac_name } else { mac::NONE }).unwrap();
        let z = compression::builtin(compression_name).unwrap();
        let key: Vec<u8> = (0..c.key_len()).map(|i| i as u8).collect();
        let nonce: Vec<u8> = (0..c.nonce_len()).map(|i| 0x80 | i as u8).collect();
        let mac_key: Vec<u8> = (0..m.key_len()).map(|i| 0x40 ^ i as u8).collect();

        let mut enc = Encoder::new();
        let mut dec = Decoder::new();
        enc.set_pending(
            c.make_sealing_key(&key, &nonce, &mac_key, m.as_ref()).unwrap(),
            &z,
        );
        dec.set_pending(
            c.make_opening_key(&key, &nonce, &mac_key, m.as_ref()).unwrap(),
            &z,
        );
        // Switch both sides through a cleartext NEWKEYS.
        let mut wire = Vec::new();
        enc.encode(&[msg::NEWKEYS], &mut wire).unwrap();
        dec.feed(&wire);
        let (_, p) = dec.decode().unwrap().unwrap();
        assert_eq!(&p[..], &[msg::NEWKEYS]);
        assert!(enc.is_keyed() && dec.is_keyed());
        (enc, dec)
    }

    fn payloads() -> Vec<Vec<u8>> {
        vec![
            vec![msg::IGNORE],
            vec![msg::CHANNEL_DATA, 0, 0, 0, 1, 0, 0, 0, 3, b'a', b'b', b'c'],
            (0..1000).map(|i| (i % 251) as u8).collect(),
            std::iter::once(msg::CHANNEL_DATA)
                .chain(std::iter::repeat(7).take(32768))
                .collect(),
        ]
    }

    #[test]
    fn test_all_ciphers_macs_and_compressions() {
        let _ = env_logger::try_init();
        for cipher_name in cipher::ALL_CIPHERS {
            for mac_name in mac::DEFAULT_ORDER {
                for compression_name in compression::ALL_COMPRESSION_ALGORITHMS {
                    let what = format!("{cipher_name} {mac_name} {compression_name}");
                    let (mut enc, mut dec) = pair(cipher_name, mac_name, compression_name);
                    // Starts delayed compression on both sides.
                    let mut payloads = payloads();
                    payloads.insert(0, vec![msg::USERAUTH_SUCCESS]);
                    for payload in payloads {
                        let mut wire = Vec::new();
                        let seqn = enc.encode(&payload, &mut wire).unwrap();
                        assert_eq!(seqn, dec.sequence_number());
                        // Packet length plus padding is block aligned.
                        let tag_len = wire.len() - 4 - read_u32(&wire).unwrap() as usize;
                        assert!(wire.len() - tag_len >= MINIMUM_PACKET_LEN);
                        dec.feed(&wire);
                        let (s, p) = dec.decode().unwrap().unwrap();
                        assert_eq!(s, seqn, "{what}");
                        assert_eq!(&p[..], &payload[..], "{what}");
                        assert_eq!(dec.buffered(), 0);
                    }
                }
            }
        }
    }

    #[test]
    fn test_byte_at_a_time() {
        for cipher_name in [
            cipher::CHACHA20_POLY1305,
            cipher::AES_256_GCM,
            cipher::AES_128_CTR,
            cipher::AES_256_CBC,
        ] {
            for mac_name in [mac::HMAC_SHA256, mac::HMAC_SHA512_ETM] {
                let (mut enc, mut dec) = pair(cipher_name, mac_name, compression::NONE);
                let mut wire = Vec::new();
                let payloads = payloads();
                for payload in payloads.iter() {
                    enc.encode(payload, &mut wire).unwrap();
                }
                let mut decoded = Vec::new();
                for byte in wire.iter() {
                    dec.feed(std::slice::from_ref(byte));
                    while let Some((_, p)) = dec.decode().unwrap() {
                        decoded.push(p.to_vec());
                    }
                }
                assert_eq!(decoded, payloads);
            }
        }
    }

    #[cfg(feature = "flate2")]
    #[test]
    fn test_compression() {
        let (mut enc, mut dec) = pair(cipher::AES_128_GCM, mac::NONE, compression::ZLIB);
        for payload in payloads() {
            let mut wire = Vec::new();
            enc.encode(&payload, &mut wire).unwrap();
            dec.feed(&wire);
            assert_eq!(&dec.decode().unwrap().unwrap().1[..], &payload[..]);
        }
    }

    #[cfg(feature = "flate2")]
    #[test]
    fn test_delayed_compression_starts_after_auth() {
        let (mut enc, mut dec) =
            pair(cipher::AES_128_CTR, mac::HMAC_SHA256, compression::ZLIB_LEGACY);
        let big = vec![msg::CHANNEL_DATA; 4096];
        let mut wire = Vec::new();
        enc.encode(&big, &mut wire).unwrap();
        assert!(wire.len() > big.len());
        dec.feed(&wire);
        assert_eq!(&dec.decode().unwrap().unwrap().1[..], &big[..]);

        let mut wire = Vec::new();
        enc.encode(&[msg::USERAUTH_SUCCESS], &mut wire).unwrap();
        dec.feed(&wire);
        dec.decode().unwrap().unwrap();

        let mut wire = Vec::new();
        enc.encode(&big, &mut wire).unwrap();
        assert!(wire.len() < big.len() / 4);
        dec.feed(&wire);
        assert_eq!(&dec.decode().unwrap().unwrap().1[..], &big[..]);
    }

    #[test]
    fn test_sequence_numbers() {
        let mut enc = Encoder::new();
        let mut dec = Decoder::new();
        let mut wire = Vec::new();
        for i in 0..5 {
            assert_eq!(enc.encode(&[msg::IGNORE], &mut wire).unwrap(), i);
        }
        dec.feed(&wire);
        for i in 0..5 {
            assert_eq!(dec.decode().unwrap().unwrap().0, i);
        }
        assert_eq!(dec.decode().unwrap(), None);
        assert_eq!(enc.counters().packets, 5);
    }

    #[test]
    fn test_strict_reset_on_newkeys() {
        let c = cipher::builtin(cipher::CHACHA20_POLY1305).unwrap();
        let none = mac::builtin(mac::NONE).unwrap();
        let z = compression::builtin(compression::NONE).unwrap();
        let key = [3; 64];
        let mut enc = Encoder::new();
        let mut dec = Decoder::new();
        enc.set_strict(true);
        dec.set_strict(true);
        let mut wire = Vec::new();
        enc.encode(&[msg::KEXINIT], &mut wire).unwrap();
        enc.encode(&[msg::KEX_ECDH_INIT], &mut wire).unwrap();
        enc.set_pending(c.make_sealing_key(&key, &[], &[], none.as_ref()).unwrap(), &z);
        dec.set_pending(c.make_opening_key(&key, &[], &[], none.as_ref()).unwrap(), &z);
        assert_eq!(enc.encode(&[msg::NEWKEYS], &mut wire).unwrap(), 2);
        assert_eq!(enc.sequence_number(), 0);
        assert_eq!(enc.encode(&[msg::SERVICE_REQUEST], &mut wire).unwrap(), 0);

        dec.feed(&wire);
        let seqns: Vec<u32> = std::iter::from_fn(|| dec.decode().unwrap().map(|(s, _)| s)).collect();
        assert_eq!(seqns, [0, 1, 2, 0]);
    }

    #[test]
    fn test_sequence_wrap_before_kex() {
        let mut enc = Encoder::new();
        enc.set_sequence_number(u32::MAX - 1);
        let mut wire = Vec::new();
        enc.encode(&[msg::IGNORE], &mut wire).unwrap();
        assert!(matches!(
            enc.encode(&[msg::IGNORE], &mut wire),
            Err(Error::SequenceWrap)
        ));

        let mut dec = Decoder::new();
        dec.set_sequence_number(u32::MAX - 1);
        dec.feed(&wire);
        assert_eq!(dec.decode().unwrap().unwrap().0, u32::MAX - 1);

        let mut dec = Decoder::new();
        dec.set_sequence_number(u32::MAX);
        dec.feed(&wire);
        assert!(matches!(dec.decode(), Err(Error::SequenceWrap)));
    }

    #[test]
    fn test_sequence_wraps_once_keyed() {
        let (mut enc, mut dec) = pair(cipher::AES_256_GCM, mac::NONE, compression::NONE);
        enc.set_sequence_number(u32::MAX);
        dec.set_sequence_number(u32::MAX);
        let mut wire = Vec::new();
        enc.encode(&[msg::IGNORE], &mut wire).unwrap();
        enc.encode(&[msg::IGNORE], &mut wire).unwrap();
        dec.feed(&wire);
        assert_eq!(dec.decode().unwrap().unwrap().0, u32::MAX);
        assert_eq!(dec.decode().unwrap().unwrap().0, 0);
    }

    #[test]
    fn test_corrupted_packets() {
        for (cipher_name, mac_name) in [
            (cipher::CHACHA20_POLY1305, mac::NONE),
            (cipher::AES_128_GCM, mac::NONE),
            (cipher::AES_128_CTR, mac::HMAC_SHA256),
            (cipher::AES_128_CTR, mac::HMAC_SHA256_ETM),
        ] {
            let (mut enc, mut dec) = pair(cipher_name, mac_name, compression::NONE);
            let mut wire = Vec::new();
            enc.encode(&[msg::IGNORE, 1, 2, 3, 4, 5, 6, 7, 8], &mut wire).unwrap();
            let last = wire.len() - 1;
            wire[last] ^= 0x20;
            dec.feed(&wire);
            assert!(
                matches!(
                    dec.decode(),
                    Err(Error::PacketAuth) | Err(Error::DecryptionError)
                ),
                "{cipher_name} {mac_name}"
            );
        }
    }

    #[test]
    fn test_bad_lengths() {
        // Too long.
        let mut dec = Decoder::new();
        dec.feed(&[0, 0x10, 0, 0, 4]);
        assert!(matches!(dec.decode(), Err(Error::PacketSize(_))));

        // Not a multiple of eight.
        let mut dec = Decoder::new();
        dec.feed(&[0, 0, 0, 13, 4]);
        assert!(matches!(dec.decode(), Err(Error::PacketSize(13))));

        // Too short.
        let mut dec = Decoder::new();
        dec.feed(&[0, 0, 0, 4, 4]);
        assert!(matches!(dec.decode(), Err(Error::PacketSize(4))));

        // Padding shorter than four bytes.
        let mut dec = Decoder::new();
        let mut packet = vec![0, 0, 0, 12, 3];
        packet.extend_from_slice(&[msg::IGNORE; 8]);
        packet.extend_from_slice(&[0; 3]);
        dec.feed(&packet);
        assert!(matches!(dec.decode(), Err(Error::PacketSize(12))));
    }

    #[test]
    fn test_newkeys_without_keys() {
        let mut enc = Encoder::new();
        let mut wire = Vec::new();
        assert!(matches!(
            enc.encode(&[msg::NEWKEYS], &mut wire),
            Err(Error::Inconsistent)
        ));
        let mut dec = Decoder::new();
        dec.feed(&wire);
        assert!(matches!(dec.decode(), Err(Error::Inconsistent)));
    }
}
