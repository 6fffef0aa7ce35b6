use ssh_encoding::{Decode, Encode};

use crate::channels::ChannelKind;
use crate::{msg, ChannelOpenFailure, Error};

/// A `CHANNEL_OPEN` sent by the peer.
#[derive(Debug)]
pub(crate) struct OpenChannelMessage {
    pub kind: ChannelKind,
    pub sender_channel: u32,
    pub initial_window_size: u32,
    pub maximum_packet_size: u32,
}

impl OpenChannelMessage {
    /// `r` starts right after the message number.
    pub fn parse(r: &mut &[u8]) -> Result<Self, Error> {
        // https://tools.ietf.org/html/rfc4254#section-5.1
        let typ = String::decode(r)?;
        let sender_channel = u32::decode(r)?;
        let initial_window_size = u32::decode(r)?;
        let maximum_packet_size = u32::decode(r)?;
        let kind = ChannelKind::decode_extra(&typ, r)?;
        Ok(Self {
            kind,
            sender_channel,
            initial_window_size,
            maximum_packet_size,
        })
    }

    pub fn confirmation(
        &self,
        local_channel: u32,
        window_size: u32,
        packet_size: u32,
    ) -> Result<Vec<u8>, Error> {
        let mut buffer = Vec::new();
        msg::CHANNEL_OPEN_CONFIRMATION.encode(&mut buffer)?;
        self.sender_channel.encode(&mut buffer)?; // remote channel number.
        local_channel.encode(&mut buffer)?; // our channel number.
        window_size.encode(&mut buffer)?;
        packet_size.encode(&mut buffer)?;
        Ok(buffer)
    }

    pub fn failure(&self, reason: ChannelOpenFailure, message: &str) -> Result<Vec<u8>, Error> {
        open_failure(self.sender_channel, reason as u32, message)
    }
}

pub(crate) fn open_failure(recipient: u32, reason: u32, message: &str) -> Result<Vec<u8>, Error> {
    let mut buffer = Vec::new();
    msg::CHANNEL_OPEN_FAILURE.encode(&mut buffer)?;
    recipient.encode(&mut buffer)?;
    reason.encode(&mut buffer)?;
    message.encode(&mut buffer)?;
    "en".encode(&mut buffer)?;
    Ok(buffer)
}

#[derive(Debug)]
pub(crate) struct ChannelOpenConfirmation {
    pub recipient_channel: u32,
    pub sender_channel: u32,
    pub initial_window_size: u32,
    pub maximum_packet_size: u32,
}

impl ChannelOpenConfirmation {
    pub fn parse(r: &mut &[u8]) -> Result<Self, Error> {
        Ok(Self {
            recipient_channel: u32::decode(r)?,
            sender_channel: u32::decode(r)?,
            initial_window_size: u32::decode(r)?,
            maximum_packet_size: u32::decode(r)?,
        })
    }
}

#[derive(Debug)]
pub(crate) struct ChannelOpenFailureMessage {
    pub recipient_channel: u32,
    pub reason: ChannelOpenFailure,
    pub description: String,
}

impl ChannelOpenFailureMessage {
    pub fn parse(r: &mut &[u8]) -> Result<Self, Error> {
        let recipient_channel = u32::decode(r)?;
        let reason = ChannelOpenFailure::from_u32(u32::decode(r)?);
        let description = String::decode(r)?;
        // Language tag, often missing in the wild.
        let _ = String::decode(r);
        Ok(Self {
            recipient_channel,
            reason,
            description,
        })
    }
}

/// A message addressed to one of our channels, with only the
/// recipient parsed.
pub(crate) fn recipient(r: &mut &[u8]) -> Result<u32, Error> {
    Ok(u32::decode(r)?)
}
