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

// https://tools.ietf.org/html/rfc5647

use std::convert::TryInto;

#[cfg(feature = "aws-lc-rs")]
use aws_lc_rs::{
    aead::{
        Aad, Algorithm, BoundKey, Nonce as AeadNonce, NonceSequence, OpeningKey as AeadOpeningKey,
        SealingKey as AeadSealingKey, UnboundKey, NONCE_LEN,
    },
    error::Unspecified,
};
use byteorder::{BigEndian, ByteOrder};
#[cfg(all(not(feature = "aws-lc-rs"), feature = "ring"))]
use ring::{
    aead::{
        Aad, Algorithm, BoundKey, Nonce as AeadNonce, NonceSequence, OpeningKey as AeadOpeningKey,
        SealingKey as AeadSealingKey, UnboundKey, NONCE_LEN,
    },
    error::Unspecified,
};

use super::PACKET_LENGTH_LEN;
use crate::mac::MacAlgorithm;
use crate::Error;

pub struct GcmCipher(pub(crate) &'static Algorithm);

impl GcmCipher {
    fn keys(&self, k: &[u8], n: &[u8]) -> Result<(UnboundKey, Nonce), Error> {
        let key = UnboundKey::new(self.0, k).map_err(|_| Error::Kex)?;
        let nonce = Nonce(n.try_into().map_err(|_| Error::Kex)?);
        Ok((key, nonce))
    }
}

impl super::Cipher for GcmCipher {
    fn key_len(&self) -> usize {
        self.0.key_len()
    }

    fn nonce_len(&self) -> usize {
        self.0.nonce_len()
    }

    fn make_opening_key(
        &self,
        k: &[u8],
        n: &[u8],
        _: &[u8],
        _: &dyn MacAlgorithm,
    ) -> Result<Box<dyn super::OpeningKey + Send>, Error> {
        let (key, nonce) = self.keys(k, n)?;
        Ok(Box::new(OpeningKey(AeadOpeningKey::new(key, nonce))))
    }

    fn make_sealing_key(
        &self,
        k: &[u8],
        n: &[u8],
        _: &[u8],
        _: &dyn MacAlgorithm,
    ) -> Result<Box<dyn super::SealingKey + Send>, Error> {
        let (key, nonce) = self.keys(k, n)?;
        Ok(Box::new(SealingKey(AeadSealingKey::new(key, nonce))))
    }
}

pub struct OpeningKey<N: NonceSequence>(AeadOpeningKey<N>);

pub struct SealingKey<N: NonceSequence>(AeadSealingKey<N>);

/// A 4-byte fixed field followed by a 64-bit invocation counter,
/// incremented after each packet.
struct Nonce([u8; NONCE_LEN]);

impl NonceSequence for Nonce {
    fn advance(&mut self) -> Result<AeadNonce, Unspecified> {
        let current = self.0;
        let counter = self.0.get_mut(4..).ok_or(Unspecified)?;
        let next = BigEndian::read_u64(counter).wrapping_add(1);
        BigEndian::write_u64(counter, next);
        Ok(AeadNonce::assume_unique_for_key(current))
    }
}

fn split_length(packet: &mut [u8]) -> Result<([u8; PACKET_LENGTH_LEN], &mut [u8]), Error> {
    let total = packet.len();
    if total < PACKET_LENGTH_LEN {
        return Err(Error::PacketSize(total));
    }
    let (len, rest) = packet.split_at_mut(PACKET_LENGTH_LEN);
    let len = (&*len).try_into().map_err(|_| Error::PacketSize(total))?;
    Ok((len, rest))
}

impl<N: NonceSequence> super::OpeningKey for OpeningKey<N> {
    fn decrypt_packet_length(&mut self, _seqn: u32, first_bytes: &mut [u8]) -> Result<u32, Error> {
        // Sent in the clear, and authenticated as additional data.
        let len = first_bytes
            .get(..PACKET_LENGTH_LEN)
            .ok_or(Error::PacketSize(first_bytes.len()))?;
        Ok(BigEndian::read_u32(len))
    }

    fn block_size(&self) -> usize {
        16
    }

    fn length_is_separate(&self) -> bool {
        true
    }

    fn tag_len(&self) -> usize {
        self.0.algorithm().tag_len()
    }

    fn open<'a>(&mut self, _seqn: u32, packet: &'a mut [u8]) -> Result<&'a [u8], Error> {
        let (len, rest) = split_length(packet)?;
        let plaintext = self
            .0
            .open_in_place(Aad::from(&len), rest)
            .map_err(|_| Error::DecryptionError)?;
        Ok(plaintext)
    }
}

impl<N: NonceSequence> super::SealingKey for SealingKey<N> {
    fn block_size(&self) -> usize {
        16
    }

    fn length_is_separate(&self) -> bool {
        true
    }

    fn tag_len(&self) -> usize {
        self.0.algorithm().tag_len()
    }

    fn seal(&mut self, _seqn: u32, packet: &mut [u8], tag_out: &mut [u8]) -> Result<(), Error> {
        let (len, rest) = split_length(packet)?;
        let tag = self
            .0
            .seal_in_place_separate_tag(Aad::from(&len), rest)
            .map_err(|_| Error::Inconsistent)?;
        let tag = tag.as_ref();
        tag_out
            .get_mut(..tag.len())
            .ok_or(Error::Inconsistent)?
            .copy_from_slice(tag);
        Ok(())
    }
}
