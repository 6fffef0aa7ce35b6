use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use futures::FutureExt;
use tokio::io::AsyncWrite;

use crate::channels::{ChannelRef, Owner};
use crate::Error;

type BoxedThreadsafeFuture<T> = Pin<Box<dyn Send + Future<Output = T>>>;

/// Writes to a channel as a byte stream. Each write sends at most one
/// packet, and waits for window when none is left.
pub struct ChannelWriter {
    channel: ChannelRef,
    ext: Option<u32>,
    send_fut: Option<BoxedThreadsafeFuture<Result<usize, Error>>>,
    eof_fut: Option<BoxedThreadsafeFuture<Result<(), Error>>>,
    _owner: Arc<Owner>,
}

impl std::fmt::Debug for ChannelWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelWriter")
            .field("channel", &self.channel)
            .field("ext", &self.ext)
            .finish()
    }
}

fn to_io_error(e: Error) -> io::Error {
    match e {
        Error::IO(e) => io::Error::new(e.kind(), e.to_string()),
        e => io::Error::new(io::ErrorKind::BrokenPipe, e),
    }
}

impl ChannelWriter {
    pub(crate) fn new(channel: ChannelRef, ext: Option<u32>, owner: Arc<Owner>) -> Self {
        Self {
            channel,
            ext,
            send_fut: None,
            eof_fut: None,
            _owner: owner,
        }
    }
}

impl AsyncWrite for ChannelWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, io::Error>> {
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }
        let this = self.get_mut();
        if this.send_fut.is_none() {
            // A write sends one packet at most, no need to copy more.
            let max = this.channel.core.state().remote_max_packet.max(1) as usize;
            let data = buf.get(..max.min(buf.len())).unwrap_or(buf).to_vec();
            let channel = this.channel.clone();
            let ext = this.ext;
            this.send_fut = Some(Box::pin(async move { channel.send_chunk(ext, &data).await }));
        }
        let Some(send_fut) = this.send_fut.as_mut() else {
            return Poll::Ready(Ok(0));
        };
        let r = ready!(send_fut.poll_unpin(cx));
        this.send_fut = None;
        Poll::Ready(r.map_err(to_io_error))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(), io::Error>> {
        let this = self.get_mut();
        if this.eof_fut.is_none() {
            let channel = this.channel.clone();
            this.eof_fut = Some(Box::pin(async move { channel.eof().await }));
        }
        let Some(eof_fut) = this.eof_fut.as_mut() else {
            return Poll::Ready(Ok(()));
        };
        let r = ready!(eof_fut.poll_unpin(cx));
        this.eof_fut = None;
        Poll::Ready(r.map_err(to_io_error))
    }
}
