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
use std::convert::TryFrom;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use bytes::Bytes;
use log::{debug, info, trace, warn};
use crate::helpers::SshBool;
use ssh_encoding::{Decode, Encode};

use super::{lock, Transport};
use crate::codec::Decoder;
use crate::{msg, strict_kex_violation, Disconnect, Error};

/// Routes one packet from the server. Runs on the reader task, which
/// owns `decoder`.
pub(crate) async fn dispatch(
    t: &Arc<Transport>,
    seqn: u32,
    payload: &Bytes,
    decoder: &mut Decoder,
) -> Result<(), Error> {
    let msg = *payload.first().ok_or(Error::PacketSize(0))?;
    trace!("dispatching message {msg:?}, seqn = {seqn:?}");

    if msg::is_kex_msg(msg) {
        let mut kex = t.kex.lock().await;
        return kex.handle(t, seqn, payload, decoder).await;
    }

    if t.strict_kex.load(Ordering::Acquire)
        && t.peer_in_kex.load(Ordering::Acquire)
        && !msg::allowed_during_strict_kex(msg)
    {
        return Err(strict_kex_violation(msg, seqn));
    }

    if (msg::is_auth_msg(msg) || msg::is_connection_msg(msg)) && !decoder.is_keyed() {
        debug!("message {msg:?} before the first key exchange");
        return Err(Error::Inconsistent);
    }

    let mut r = payload.get(1..).unwrap_or_default();
    match msg {
        msg::DISCONNECT => {
            let reason = u32::decode(&mut r)?;
            let description = String::decode(&mut r)?;
            info!("server disconnected ({reason}): {description}");
            Err(Error::Disconnect {
                reason: Disconnect::try_from(reason).unwrap_or(Disconnect::Reserved),
                description,
            })
        }
        msg::IGNORE => {
            trace!("ignore message, {} bytes", payload.len());
            Ok(())
        }
        msg::DEBUG => {
            let always_display = bool::decode(&mut r).unwrap_or(false);
            let message = String::decode(&mut r).unwrap_or_default();
            if always_display {
                info!("server says: {message}");
            } else {
                debug!("server debug message: {message}");
            }
            Ok(())
        }
        msg::UNIMPLEMENTED => {
            let rejected = u32::decode(&mut r).unwrap_or_default();
            warn!("server did not implement our packet {rejected}");
            Ok(())
        }
        msg::SERVICE_ACCEPT => {
            let name = String::decode(&mut r).unwrap_or_default();
            let pending = lock(&t.service_requests).pop_front();
            match pending {
                Some(promise) => {
                    debug!("service accepted: {name}");
                    promise.deliver(());
                    Ok(())
                }
                None => {
                    debug!("unrequested service accept: {name}");
                    Err(Error::Inconsistent)
                }
            }
        }
        msg::EXT_INFO => {
            let count = u32::decode(&mut r)?;
            for _ in 0..count {
                let name = String::decode(&mut r)?;
                let _value = Vec::<u8>::decode(&mut r)?;
                debug!("server extension: {name}");
            }
            Ok(())
        }
        m if msg::is_auth_msg(m) => {
            if m == msg::USERAUTH_SUCCESS {
                t.writer.lock().await.encoder().activate_delayed_compression();
            }
            match lock(&t.auth_tx).as_ref() {
                Some(tx) => {
                    let _ = tx.send(payload.clone());
                }
                None => debug!("dropping authentication message {m:?}"),
            }
            Ok(())
        }
        msg::GLOBAL_REQUEST..=msg::REQUEST_FAILURE | msg::CHANNEL_OPEN..=msg::CHANNEL_FAILURE => {
            t.connection.handle(t, msg, payload).await
        }
        m => {
            debug!("unimplemented message {m:?}, seqn = {seqn:?}");
            let mut out = Vec::new();
            msg::UNIMPLEMENTED.encode(&mut out)?;
            seqn.encode(&mut out)?;
            t.send(&out).await
        }
    }
}
