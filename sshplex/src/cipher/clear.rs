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

//! The state of both directions before the first NEWKEYS.

use byteorder::{BigEndian, ByteOrder};

use super::PACKET_LENGTH_LEN;
use crate::Error;

#[derive(Debug, Default)]
pub struct Key;

impl super::OpeningKey for Key {
    fn decrypt_packet_length(&mut self, _seqn: u32, first_bytes: &mut [u8]) -> Result<u32, Error> {
        let len = first_bytes
            .get(..PACKET_LENGTH_LEN)
            .ok_or(Error::PacketSize(first_bytes.len()))?;
        Ok(BigEndian::read_u32(len))
    }

    fn tag_len(&self) -> usize {
        0
    }

    fn open<'a>(&mut self, _seqn: u32, packet: &'a mut [u8]) -> Result<&'a [u8], Error> {
        packet
            .get(PACKET_LENGTH_LEN..)
            .ok_or(Error::PacketSize(packet.len()))
    }
}

impl super::SealingKey for Key {
    fn tag_len(&self) -> usize {
        0
    }

    fn seal(&mut self, _seqn: u32, _packet: &mut [u8], _tag_out: &mut [u8]) -> Result<(), Error> {
        Ok(())
    }
}
