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

// http://cvsweb.openbsd.org/cgi-bin/cvsweb/src/usr.bin/ssh/PROTOCOL.chacha20poly1305?annotate=HEAD

use aes::cipher::{BlockSizeUser, StreamCipherSeek};
use byteorder::{BigEndian, ByteOrder};
use chacha20::cipher::{KeyInit, KeyIvInit, StreamCipher};
use chacha20::{ChaCha20Legacy, ChaCha20LegacyCore};
use generic_array::typenum::{Unsigned, U16, U32, U8};
use generic_array::GenericArray;
use poly1305::Poly1305;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use super::PACKET_LENGTH_LEN;
use crate::mac::MacAlgorithm;
use crate::Error;

pub struct SshChacha20Poly1305Cipher {}

type KeyLength = U32;
type NonceLength = U8;
type TagLength = U16;
type Key = GenericArray<u8, KeyLength>;
type Nonce = GenericArray<u8, NonceLength>;

/// The negotiated 64-byte key holds the payload key first and the
/// length key second.
fn split_keys(k: &[u8]) -> Result<Keys, Error> {
    let (k2, k1) = match (k.get(..KeyLength::USIZE), k.get(KeyLength::USIZE..)) {
        (Some(k2), Some(k1)) if k1.len() == KeyLength::USIZE => (k2, k1),
        _ => return Err(Error::Kex),
    };
    Ok(Keys {
        k1: Key::clone_from_slice(k1),
        k2: Key::clone_from_slice(k2),
    })
}

impl super::Cipher for SshChacha20Poly1305Cipher {
    fn key_len(&self) -> usize {
        KeyLength::USIZE * 2
    }

    fn make_opening_key(
        &self,
        k: &[u8],
        _: &[u8],
        _: &[u8],
        _: &dyn MacAlgorithm,
    ) -> Result<Box<dyn super::OpeningKey + Send>, Error> {
        Ok(Box::new(OpeningKey(split_keys(k)?)))
    }

    fn make_sealing_key(
        &self,
        k: &[u8],
        _: &[u8],
        _: &[u8],
        _: &dyn MacAlgorithm,
    ) -> Result<Box<dyn super::SealingKey + Send>, Error> {
        Ok(Box::new(SealingKey(split_keys(k)?)))
    }
}

struct Keys {
    /// Encrypts the length field.
    k1: Key,
    /// Encrypts the rest of the packet, and keys Poly1305.
    k2: Key,
}

impl Drop for Keys {
    fn drop(&mut self) {
        self.k1.as_mut_slice().zeroize();
        self.k2.as_mut_slice().zeroize();
    }
}

pub struct OpeningKey(Keys);

pub struct SealingKey(Keys);

fn make_counter(sequence_number: u32) -> Nonce {
    let mut nonce = Nonce::default();
    if let Some(low) = nonce.get_mut(NonceLength::USIZE - 4..) {
        BigEndian::write_u32(low, sequence_number);
    }
    nonce
}

fn payload_cipher(key: &Key, nonce: &Nonce) -> ChaCha20Legacy {
    let mut cipher = ChaCha20Legacy::new(key, nonce);
    // Block 0 is the Poly1305 key.
    cipher.seek(<ChaCha20LegacyCore as BlockSizeUser>::BlockSize::USIZE);
    cipher
}

impl super::OpeningKey for OpeningKey {
    fn decrypt_packet_length(&mut self, seqn: u32, first_bytes: &mut [u8]) -> Result<u32, Error> {
        // The tag covers the encrypted length, so decrypt a copy.
        let mut len = [0; PACKET_LENGTH_LEN];
        len.copy_from_slice(
            first_bytes
                .get(..PACKET_LENGTH_LEN)
                .ok_or(Error::PacketSize(first_bytes.len()))?,
        );
        let nonce = make_counter(seqn);
        ChaCha20Legacy::new(&self.0.k1, &nonce).apply_keystream(&mut len);
        Ok(BigEndian::read_u32(&len))
    }

    fn length_is_separate(&self) -> bool {
        true
    }

    fn tag_len(&self) -> usize {
        TagLength::USIZE
    }

    fn open<'a>(&mut self, seqn: u32, packet: &'a mut [u8]) -> Result<&'a [u8], Error> {
        let total = packet.len();
        let body_end = total
            .checked_sub(TagLength::USIZE)
            .filter(|&n| n >= PACKET_LENGTH_LEN)
            .ok_or(Error::PacketSize(total))?;
        let (body, tag) = packet.split_at_mut(body_end);
        let nonce = make_counter(seqn);
        let expected_tag = compute_poly1305(&nonce, &self.0.k2, body);
        if !bool::from(expected_tag.as_slice().ct_eq(tag)) {
            return Err(Error::PacketAuth);
        }
        let (_, rest) = body.split_at_mut(PACKET_LENGTH_LEN);
        payload_cipher(&self.0.k2, &nonce).apply_keystream(rest);
        Ok(rest)
    }
}

impl super::SealingKey for SealingKey {
    fn length_is_separate(&self) -> bool {
        true
    }

    // As explained in "SSH via CTR mode with stateful decryption" in
    // https://openvpn.net/papers/ssh-security.pdf, the padding doesn't need to
    // be random because we're doing stateful counter-mode encryption. Use
    // fixed padding to avoid PRNG overhead.
    fn fill_padding(&self, padding_out: &mut [u8]) {
        padding_out.fill(0);
    }

    fn tag_len(&self) -> usize {
        TagLength::USIZE
    }

    fn seal(&mut self, seqn: u32, packet: &mut [u8], tag_out: &mut [u8]) -> Result<(), Error> {
        let total = packet.len();
        if total < PACKET_LENGTH_LEN {
            return Err(Error::PacketSize(total));
        }
        let nonce = make_counter(seqn);
        {
            let (len, rest) = packet.split_at_mut(PACKET_LENGTH_LEN);
            ChaCha20Legacy::new(&self.0.k1, &nonce).apply_keystream(len);
            payload_cipher(&self.0.k2, &nonce).apply_keystream(rest);
        }
        let tag = compute_poly1305(&nonce, &self.0.k2, packet);
        tag_out
            .get_mut(..TagLength::USIZE)
            .ok_or(Error::Inconsistent)?
            .copy_from_slice(tag.as_slice());
        Ok(())
    }
}

fn compute_poly1305(nonce: &Nonce, key: &Key, data: &[u8]) -> poly1305::Tag {
    let mut cipher = ChaCha20Legacy::new(key, nonce);
    let mut poly_key = GenericArray::<u8, U32>::default();
    cipher.apply_keystream(&mut poly_key);
    let tag = Poly1305::new(&poly_key).compute_unpadded(data);
    poly_key.as_mut_slice().zeroize();
    tag
}
