use std::sync::Arc;

use log::{debug, warn};

use super::{Channel, ChannelKind};
use crate::client::Transport;
use crate::parsing::OpenChannelMessage;
use crate::{ChannelOpenFailure, Error};

/// Handles channels opened by the server, for one channel type. See
/// [`crate::client::Handle::register_opener`].
///
/// `open` runs on the connection's reader task: it should hand the
/// request over to another task rather than block.
pub trait ChannelOpener: Send + Sync {
    fn open(&self, request: ChannelOpenRequest);
}

impl<F> ChannelOpener for F
where
    F: Fn(ChannelOpenRequest) + Send + Sync,
{
    fn open(&self, request: ChannelOpenRequest) {
        self(request)
    }
}

/// A channel the server wants to open. It must be answered with
/// [`ChannelOpenRequest::confirm`] or [`ChannelOpenRequest::reject`];
/// dropping it rejects it.
pub struct ChannelOpenRequest {
    message: OpenChannelMessage,
    transport: Option<Arc<Transport>>,
}

impl std::fmt::Debug for ChannelOpenRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelOpenRequest")
            .field("kind", &self.message.kind)
            .field("sender_channel", &self.message.sender_channel)
            .finish()
    }
}

impl ChannelOpenRequest {
    pub(crate) fn new(message: OpenChannelMessage, transport: Arc<Transport>) -> Self {
        ChannelOpenRequest {
            message,
            transport: Some(transport),
        }
    }

    pub fn kind(&self) -> &ChannelKind {
        &self.message.kind
    }

    /// Accepts the channel and returns it.
    pub async fn confirm(mut self) -> Result<Channel, Error> {
        let transport = self.transport.take().ok_or(Error::Inconsistent)?;
        let connection = &transport.connection;
        let (core, inbound) = connection.allocate(self.message.kind.clone());
        core.set_remote(
            self.message.sender_channel,
            self.message.initial_window_size,
            self.message.maximum_packet_size,
        );
        core.opened.deliver(());
        let payload = self.message.confirmation(
            core.id.into(),
            transport.config.window_size,
            transport.config.maximum_packet_size,
        )?;
        if let Err(e) = transport.send(&payload).await {
            connection.release(core.id);
            return Err(e);
        }
        debug!(
            "confirmed {} channel {} (remote {})",
            self.message.kind.type_name(),
            core.id,
            self.message.sender_channel
        );
        Ok(Channel::new(core, inbound, transport))
    }

    pub async fn reject(mut self, reason: ChannelOpenFailure, message: &str) -> Result<(), Error> {
        let transport = self.transport.take().ok_or(Error::Inconsistent)?;
        transport
            .send(&self.message.failure(reason, message)?)
            .await
    }
}

impl Drop for ChannelOpenRequest {
    fn drop(&mut self) {
        let Some(transport) = self.transport.take() else {
            return;
        };
        debug!(
            "open request for {} dropped, rejecting",
            self.message.kind.type_name()
        );
        let payload = match self
            .message
            .failure(ChannelOpenFailure::AdministrativelyProhibited, "rejected")
        {
            Ok(payload) => payload,
            Err(e) => {
                warn!("could not reject channel open: {e:?}");
                return;
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let _ = transport.send(&payload).await;
                });
            }
            Err(_) => warn!("no runtime to reject channel open"),
        }
    }
}
