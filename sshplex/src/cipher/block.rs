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

//! Counter and CBC modes, authenticated by a separately negotiated MAC.
//!
//! Without encrypt-then-MAC, the length is part of the first encrypted
//! block: the decoder decrypts that block in place to learn the length,
//! and [`OpeningKey::open`] continues with the rest of the packet. With
//! encrypt-then-MAC, the length is sent in the clear and the tag covers
//! the ciphertext.

use std::marker::PhantomData;

use aes::cipher::{IvSizeUser, KeyIvInit, KeySizeUser, StreamCipher};
use byteorder::{BigEndian, ByteOrder};
use log::debug;

use super::PACKET_LENGTH_LEN;
use crate::mac::{Mac, MacAlgorithm};
use crate::Error;

pub struct SshBlockCipher<C> {
    block_size: usize,
    cipher: PhantomData<fn() -> C>,
}

impl<C> SshBlockCipher<C> {
    pub fn new(block_size: usize) -> Self {
        SshBlockCipher {
            block_size,
            cipher: PhantomData,
        }
    }
}

fn new_cipher<C: KeyIvInit>(k: &[u8], n: &[u8]) -> Result<C, Error> {
    C::new_from_slices(k, n).map_err(|_| {
        debug!("wrong key or IV length: {} / {}", k.len(), n.len());
        Error::Kex
    })
}

impl<C> super::Cipher for SshBlockCipher<C>
where
    C: BlockStreamCipher + KeySizeUser + IvSizeUser + KeyIvInit + Send + 'static,
{
    fn key_len(&self) -> usize {
        C::key_size()
    }

    fn nonce_len(&self) -> usize {
        C::iv_size()
    }

    fn needs_mac(&self) -> bool {
        true
    }

    fn make_opening_key(
        &self,
        k: &[u8],
        n: &[u8],
        m: &[u8],
        mac: &dyn MacAlgorithm,
    ) -> Result<Box<dyn super::OpeningKey + Send>, Error> {
        Ok(Box::new(OpeningKey {
            cipher: new_cipher::<C>(k, n)?,
            mac: mac.make_mac(m)?,
            block_size: self.block_size,
        }))
    }

    fn make_sealing_key(
        &self,
        k: &[u8],
        n: &[u8],
        m: &[u8],
        mac: &dyn MacAlgorithm,
    ) -> Result<Box<dyn super::SealingKey + Send>, Error> {
        Ok(Box::new(SealingKey {
            cipher: new_cipher::<C>(k, n)?,
            mac: mac.make_mac(m)?,
            block_size: self.block_size,
        }))
    }
}

pub struct OpeningKey<C: BlockStreamCipher> {
    cipher: C,
    mac: Box<dyn Mac + Send>,
    block_size: usize,
}

pub struct SealingKey<C: BlockStreamCipher> {
    cipher: C,
    mac: Box<dyn Mac + Send>,
    block_size: usize,
}

impl<C: BlockStreamCipher> super::OpeningKey for OpeningKey<C> {
    fn packet_length_to_read_for_block_length(&self) -> usize {
        if self.mac.is_etm() {
            PACKET_LENGTH_LEN
        } else {
            self.block_size
        }
    }

    fn decrypt_packet_length(&mut self, _seqn: u32, first_bytes: &mut [u8]) -> Result<u32, Error> {
        let n = self.packet_length_to_read_for_block_length();
        let len = first_bytes.len();
        let first = first_bytes.get_mut(..n).ok_or(Error::PacketSize(len))?;
        if !self.mac.is_etm() {
            self.cipher.decrypt_data(first);
        }
        Ok(BigEndian::read_u32(first))
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn length_is_separate(&self) -> bool {
        self.mac.is_etm()
    }

    fn tag_len(&self) -> usize {
        self.mac.mac_len()
    }

    fn open<'a>(&mut self, seqn: u32, packet: &'a mut [u8]) -> Result<&'a [u8], Error> {
        let total = packet.len();
        let body_end = total
            .checked_sub(self.tag_len())
            .ok_or(Error::PacketSize(total))?;
        let (body, tag) = packet.split_at_mut(body_end);
        if self.mac.is_etm() {
            if !self.mac.verify(seqn, body, tag) {
                return Err(Error::PacketAuth);
            }
            let rest = body
                .get_mut(PACKET_LENGTH_LEN..)
                .ok_or(Error::PacketSize(total))?;
            self.cipher.decrypt_data(rest);
        } else {
            // The first block was decrypted along with the length.
            let rest = body
                .get_mut(self.block_size..)
                .ok_or(Error::PacketSize(total))?;
            self.cipher.decrypt_data(rest);
            if !self.mac.verify(seqn, body, tag) {
                return Err(Error::PacketAuth);
            }
        }
        body.get(PACKET_LENGTH_LEN..)
            .ok_or(Error::PacketSize(total))
    }
}

impl<C: BlockStreamCipher> super::SealingKey for SealingKey<C> {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn length_is_separate(&self) -> bool {
        self.mac.is_etm()
    }

    fn tag_len(&self) -> usize {
        self.mac.mac_len()
    }

    fn seal(&mut self, seqn: u32, packet: &mut [u8], tag_out: &mut [u8]) -> Result<(), Error> {
        if self.mac.is_etm() {
            let len = packet.len();
            let rest = packet
                .get_mut(PACKET_LENGTH_LEN..)
                .ok_or(Error::PacketSize(len))?;
            self.cipher.encrypt_data(rest);
            self.mac.compute(seqn, packet, tag_out);
        } else {
            self.mac.compute(seqn, packet, tag_out);
            self.cipher.encrypt_data(packet);
        }
        Ok(())
    }
}

pub trait BlockStreamCipher {
    fn encrypt_data(&mut self, data: &mut [u8]);
    fn decrypt_data(&mut self, data: &mut [u8]);
}

impl<T: StreamCipher> BlockStreamCipher for T {
    fn encrypt_data(&mut self, data: &mut [u8]) {
        self.apply_keystream(data);
    }

    fn decrypt_data(&mut self, data: &mut [u8]) {
        self.apply_keystream(data);
    }
}
