use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use bytes::Bytes;
use log::trace;
use tokio::io::{AsyncRead, ReadBuf};

use crate::channels::{Inbound, Owner};

/// Reads a channel's data (or one type of extended data) as a byte
/// stream. Reaches end of file when the peer sends EOF or closes the
/// channel.
#[derive(Debug)]
pub struct ChannelReader {
    inbound: Arc<Inbound>,
    buffer: Option<Bytes>,
    ext: Option<u32>,
    _owner: Arc<Owner>,
}

impl ChannelReader {
    pub(crate) fn new(inbound: Arc<Inbound>, ext: Option<u32>, owner: Arc<Owner>) -> Self {
        Self {
            inbound,
            buffer: None,
            ext,
            _owner: owner,
        }
    }

    fn poll_next(&self, cx: &mut Context<'_>) -> Poll<Option<Bytes>> {
        let Some(target) = self.ext else {
            return self.inbound.poll_data(cx);
        };
        loop {
            match ready!(self.inbound.poll_extended(cx)) {
                Some((ext, data)) if ext == target => return Poll::Ready(Some(data)),
                Some((ext, data)) => {
                    trace!("dropping {} bytes of extended data {ext}", data.len())
                }
                None => return Poll::Ready(None),
            }
        }
    }
}

impl AsyncRead for ChannelReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let mut data = loop {
            match self.buffer.take() {
                Some(data) if !data.is_empty() => break data,
                _ => match ready!(self.poll_next(cx)) {
                    Some(data) => self.buffer = Some(data),
                    None => return Poll::Ready(Ok(())),
                },
            }
        };
        let readable = buf.remaining().min(data.len());
        buf.put_slice(&data.split_to(readable));
        if !data.is_empty() {
            self.buffer = Some(data);
        }
        Poll::Ready(Ok(()))
    }
}
