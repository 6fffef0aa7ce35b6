use std::sync::Arc;
use std::time::Duration;

use ssh_encoding::{Decode, Encode};
use ssh_key::PublicKey;

use super::peer::{connect_to, pair, socket, Peer, PeerOptions};
use crate::client::{self, Config, GexParams, Handle, KexPhase};
use crate::helpers::encode_mpint;
use crate::kex::dh::groups::DH_GROUP14;
use crate::{cipher, kex, msg, Error, Limits, Preferred};

/// Runs a service request through the encrypted transport.
async fn service_roundtrip(handle: &Handle, peer: &mut Peer) {
    let h = handle.clone();
    let request = tokio::spawn(async move { h.request_service("ssh-userauth").await });
    let p = peer.expect(msg::SERVICE_REQUEST).await;
    let name = String::decode(&mut &p[1..]).unwrap();
    assert_eq!(name, "ssh-userauth");

    let mut accept = vec![msg::SERVICE_ACCEPT];
    name.encode(&mut accept).unwrap();
    peer.send(&accept).await;
    request.await.unwrap().unwrap();
}

fn all_kex_config() -> Config {
    Config {
        preferred: Preferred {
            kex: kex::registry(kex::ALL_KEX_ALGORITHMS),
            ..Default::default()
        },
        ..Default::default()
    }
}

#[tokio::test]
async fn test_every_kex_method() {
    let _ = env_logger::try_init();
    for &name in kex::ALL_KEX_ALGORITHMS {
        let options = PeerOptions {
            kex: vec![name],
            ..Default::default()
        };
        let (handle, mut peer) = pair(all_kex_config(), options).await;
        assert_eq!(handle.negotiated().unwrap().kex, name);
        assert_eq!(handle.session_id().as_deref(), peer.session_id());
        service_roundtrip(&handle, &mut peer).await;
    }
}

#[tokio::test]
async fn test_every_cipher() {
    let _ = env_logger::try_init();
    for &name in cipher::ALL_CIPHERS {
        let config = Config {
            preferred: Preferred {
                cipher: cipher::registry(&[name]),
                ..Default::default()
            },
            ..Default::default()
        };
        let (handle, mut peer) = pair(config, PeerOptions::default()).await;
        let negotiated = handle.negotiated().unwrap();
        assert_eq!(negotiated.cipher_client_to_server, name);
        assert_eq!(negotiated.cipher_server_to_client, name);
        service_roundtrip(&handle, &mut peer).await;
    }
}

#[cfg(feature = "flate2")]
#[tokio::test]
async fn test_compressed_transport() {
    let _ = env_logger::try_init();
    let config = Config {
        preferred: Preferred::compressed(),
        ..Default::default()
    };
    let (handle, mut peer) = pair(config, PeerOptions::default()).await;
    let negotiated = handle.negotiated().unwrap();
    assert_eq!(negotiated.compression_client_to_server, crate::compression::ZLIB);
    service_roundtrip(&handle, &mut peer).await;
    service_roundtrip(&handle, &mut peer).await;
}

#[tokio::test]
async fn test_strict_kex_resets_sequence_numbers() {
    let _ = env_logger::try_init();
    let (handle, mut peer) = pair(Config::default(), PeerOptions::default()).await;
    assert!(handle.negotiated().unwrap().strict_kex);
    let h = handle.clone();
    tokio::spawn(async move { h.request_service("ssh-userauth").await });
    let (seqn, p) = peer.recv().await.unwrap();
    assert_eq!(p[0], msg::SERVICE_REQUEST);
    assert_eq!(seqn, 0);
}

#[tokio::test]
async fn test_sequence_numbers_continue_without_strict_kex() {
    let _ = env_logger::try_init();
    let options = PeerOptions {
        strict: false,
        ..Default::default()
    };
    let (handle, mut peer) = pair(Config::default(), options).await;
    assert!(!handle.negotiated().unwrap().strict_kex);
    let h = handle.clone();
    tokio::spawn(async move { h.request_service("ssh-userauth").await });
    let (seqn, p) = peer.recv().await.unwrap();
    assert_eq!(p[0], msg::SERVICE_REQUEST);
    // KEXINIT, ECDH_INIT and NEWKEYS came first.
    assert_eq!(seqn, 3);
}

#[tokio::test]
async fn test_client_rekey() {
    let _ = env_logger::try_init();
    let (handle, mut peer) = pair(Config::default(), PeerOptions::default()).await;
    let session_id = handle.session_id();
    assert_eq!(handle.kex_phase().await, KexPhase::Done);

    let (rekeyed, ()) = tokio::join!(handle.rekey(), peer.kex());
    rekeyed.unwrap();
    assert_eq!(peer.exchanges, 2);
    assert_eq!(handle.session_id(), session_id);
    assert!(!handle.is_kex_ongoing());
    service_roundtrip(&handle, &mut peer).await;
}

#[tokio::test]
async fn test_server_rekey() {
    let _ = env_logger::try_init();
    let (handle, mut peer) = pair(Config::default(), PeerOptions::default()).await;
    let session_id = handle.session_id();

    peer.kex().await;
    service_roundtrip(&handle, &mut peer).await;
    assert_eq!(peer.exchanges, 2);
    assert_eq!(handle.session_id(), session_id);
    assert_eq!(handle.kex_phase().await, KexPhase::Done);
    assert!(!handle.is_kex_ongoing());
}

#[tokio::test]
async fn test_messages_wait_for_new_keys() {
    let _ = env_logger::try_init();
    let (handle, mut peer) = pair(Config::default(), PeerOptions::default()).await;

    let h = handle.clone();
    let rekey = tokio::spawn(async move { h.rekey().await });
    let theirs = peer.expect_kex(msg::KEXINIT).await;
    assert!(handle.is_kex_ongoing());
    assert_eq!(handle.kex_phase().await, KexPhase::ProposalSent);

    let h = handle.clone();
    let service = tokio::spawn(async move { h.request_service("ssh-userauth").await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(peer.try_recv(50).await.is_none());

    let ours = peer.send_kexinit().await;
    peer.run_kex(ours, theirs).await;
    rekey.await.unwrap().unwrap();

    let p = peer.expect(msg::SERVICE_REQUEST).await;
    let mut accept = vec![msg::SERVICE_ACCEPT];
    accept.extend_from_slice(&p[1..]);
    peer.send(&accept).await;
    service.await.unwrap().unwrap();

    let newkeys = peer.received.iter().rposition(|&m| m == msg::NEWKEYS).unwrap();
    let request = peer
        .received
        .iter()
        .rposition(|&m| m == msg::SERVICE_REQUEST)
        .unwrap();
    assert!(request > newkeys);
}

#[tokio::test]
async fn test_rekey_after_byte_limit() {
    let _ = env_logger::try_init();
    let config = Config {
        limits: Limits::new(2000, 1 << 30, Duration::from_secs(3600)),
        ..Default::default()
    };
    let (handle, mut peer) = pair(config, PeerOptions::default()).await;

    let h = handle.clone();
    let open = tokio::spawn(async move { h.channel_open_session().await });
    let id = peer.accept_channel(1 << 20, 32768).await;
    let channel = open.await.unwrap().unwrap();
    let send = tokio::spawn(async move { channel.data(&[0; 4000]).await });

    let theirs = peer.expect_kex(msg::KEXINIT).await;
    let ours = peer.send_kexinit().await;
    peer.run_kex(ours, theirs).await;
    send.await.unwrap().unwrap();
    assert_eq!(peer.exchanges, 2);

    let data = peer.expect(msg::CHANNEL_DATA).await;
    let mut r = &data[1..];
    assert_eq!(u32::decode(&mut r).unwrap(), id + super::peer::REMOTE_OFFSET);
    assert_eq!(Vec::<u8>::decode(&mut r).unwrap().len(), 4000);
}

#[tokio::test]
async fn test_rekey_after_time_limit() {
    let _ = env_logger::try_init();
    let config = Config {
        limits: Limits::new(1 << 30, 1 << 30, Duration::from_millis(500)),
        ..Default::default()
    };
    let (handle, mut peer) = pair(config, PeerOptions::default()).await;
    let theirs = peer.expect_kex(msg::KEXINIT).await;
    let ours = peer.send_kexinit().await;
    peer.run_kex(ours, theirs).await;
    service_roundtrip(&handle, &mut peer).await;
    assert_eq!(peer.exchanges, 2);
}

#[tokio::test]
async fn test_wrong_guess_is_ignored() {
    let _ = env_logger::try_init();
    let options = PeerOptions {
        kex: vec![kex::ECDH_SHA2_NISTP256, kex::CURVE25519],
        strict: false,
        wrong_guess: true,
    };
    let (handle, mut peer) = pair(Config::default(), options).await;
    let negotiated = handle.negotiated().unwrap();
    assert_eq!(negotiated.kex, kex::CURVE25519);
    assert!(negotiated.ignore_guessed);
    service_roundtrip(&handle, &mut peer).await;
}

#[tokio::test]
async fn test_wrong_guess_violates_strict_kex() {
    let _ = env_logger::try_init();
    let options = PeerOptions {
        kex: vec![kex::ECDH_SHA2_NISTP256, kex::CURVE25519],
        strict: true,
        wrong_guess: true,
    };
    let (io, mut peer) = socket(options);
    let client = tokio::spawn(client::connect_stream(
        Arc::new(Config::default()),
        io,
        "peer",
        22,
        |_: &str, _: u16, _: &PublicKey| true,
    ));
    peer.exchange_ids().await;
    peer.send_kexinit().await;

    let result = client.await.unwrap();
    assert!(matches!(
        result,
        Err(Error::StrictKeyExchangeViolation {
            message_type: msg::KEX_ECDH_INIT,
            sequence_number: 1
        })
    ));
    let packets = peer.drain().await;
    let last = packets.last().unwrap();
    assert_eq!(last[0], msg::DISCONNECT);
    assert_eq!(u32::decode(&mut &last[1..]).unwrap(), 2);
}

#[tokio::test]
async fn test_non_kex_message_during_rekey_violates_strict_kex() {
    let _ = env_logger::try_init();
    let (handle, mut peer) = pair(Config::default(), PeerOptions::default()).await;
    assert!(handle.negotiated().unwrap().strict_kex);

    peer.send_kexinit().await;
    let seqn = peer.next_seqn();
    // Sequence numbers restarted with the new keys.
    assert_eq!(seqn, 1);
    peer.send(&[msg::IGNORE, 0, 0, 0, 0]).await;

    assert!(matches!(
        handle.closed().await,
        Error::StrictKeyExchangeViolation {
            message_type: msg::IGNORE,
            sequence_number: 1
        }
    ));
    let packets = peer.drain().await;
    let last = packets.last().unwrap();
    assert_eq!(last[0], msg::DISCONNECT);
    assert_eq!(u32::decode(&mut &last[1..]).unwrap(), 2);
}

#[tokio::test]
async fn test_inbound_sequence_wrap_before_first_kex() {
    let _ = env_logger::try_init();
    let (io, mut peer) = socket(PeerOptions::default());
    let client = tokio::spawn(async move {
        let (transport, read, mut decoder) = client::open_transport(
            Arc::new(Config::default()),
            io,
            "peer",
            22,
            |_: &str, _: u16, _: &PublicKey| true,
        )
        .await?;
        decoder.set_sequence_number(u32::MAX);
        client::first_kex(transport, read, decoder).await
    });
    peer.exchange_ids().await;
    peer.send_kexinit().await;

    assert!(matches!(client.await.unwrap(), Err(Error::SequenceWrap)));
    let packets = peer.drain().await;
    assert_eq!(packets.len(), 2);
    assert_eq!(packets[0][0], msg::KEXINIT);
    assert_eq!(packets[1][0], msg::DISCONNECT);
    assert_eq!(u32::decode(&mut &packets[1][1..]).unwrap(), 2);
}

#[tokio::test]
async fn test_outbound_sequence_wrap_before_first_kex() {
    let _ = env_logger::try_init();
    let (io, mut peer) = socket(PeerOptions::default());
    let client = tokio::spawn(async move {
        let (transport, read, decoder) = client::open_transport(
            Arc::new(Config::default()),
            io,
            "peer",
            22,
            |_: &str, _: u16, _: &PublicKey| true,
        )
        .await?;
        // Room for our KEXINIT only.
        transport.set_outbound_sequence_number(u32::MAX - 1).await;
        client::first_kex(transport, read, decoder).await
    });
    peer.exchange_ids().await;
    let (_, kexinit) = peer.recv().await.unwrap();
    assert_eq!(kexinit[0], msg::KEXINIT);
    peer.send_kexinit().await;

    assert!(matches!(client.await.unwrap(), Err(Error::SequenceWrap)));
    // Not even a DISCONNECT can be sent without wrapping.
    assert!(peer.drain().await.is_empty());
}

#[tokio::test]
async fn test_verifier_sees_host_key() {
    let _ = env_logger::try_init();
    let (io, peer) = socket(PeerOptions::default());
    let expected = peer.public_key().clone();
    let verifier = move |host: &str, port: u16, key: &PublicKey| {
        host == "peer" && port == 22 && key == &expected
    };
    let (handle, _peer) = connect_to(Config::default(), io, peer, verifier).await;
    assert!(!handle.is_closed());
}

#[tokio::test]
async fn test_rejected_host_key() {
    let _ = env_logger::try_init();
    let (io, mut peer) = socket(PeerOptions::default());
    let client = tokio::spawn(client::connect_stream(
        Arc::new(Config::default()),
        io,
        "peer",
        22,
        |_: &str, _: u16, _: &PublicKey| false,
    ));
    peer.exchange_ids().await;
    let ours = peer.send_kexinit().await;
    let theirs = peer.expect_kex(msg::KEXINIT).await;
    peer.reply_kex(ours, theirs).await;

    assert!(matches!(client.await.unwrap(), Err(Error::UnknownKey)));
    let packets = peer.drain().await;
    let last = packets.last().unwrap();
    assert_eq!(last[0], msg::DISCONNECT);
    assert_eq!(u32::decode(&mut &last[1..]).unwrap(), 9);
}

#[tokio::test]
async fn test_gex_group_too_small() {
    let _ = env_logger::try_init();
    let config = Config {
        gex: GexParams::new(3072, 4096, 8192).unwrap(),
        ..all_kex_config()
    };
    let options = PeerOptions {
        kex: vec![kex::DH_GEX_SHA256],
        ..Default::default()
    };
    let (io, mut peer) = socket(options);
    let client = tokio::spawn(client::connect_stream(
        Arc::new(config),
        io,
        "peer",
        22,
        |_: &str, _: u16, _: &PublicKey| true,
    ));
    peer.exchange_ids().await;
    peer.send_kexinit().await;
    peer.expect_kex(msg::KEXINIT).await;

    let request = peer.expect_kex(msg::KEX_DH_GEX_REQUEST).await;
    let mut r = &request[1..];
    assert_eq!(u32::decode(&mut r).unwrap(), 3072);
    assert_eq!(u32::decode(&mut r).unwrap(), 4096);
    assert_eq!(u32::decode(&mut r).unwrap(), 8192);

    let mut group = vec![msg::KEX_DH_GEX_GROUP];
    encode_mpint(DH_GROUP14.prime(), &mut group).unwrap();
    encode_mpint(DH_GROUP14.generator(), &mut group).unwrap();
    peer.send(&group).await;

    assert!(matches!(client.await.unwrap(), Err(Error::KexInit)));
    let packets = peer.drain().await;
    let last = packets.last().unwrap();
    assert_eq!(last[0], msg::DISCONNECT);
    assert_eq!(u32::decode(&mut &last[1..]).unwrap(), 3);
}

#[tokio::test]
async fn test_invalid_gex_params() {
    assert!(matches!(
        GexParams::new(1024, 2048, 4096),
        Err(Error::InvalidConfig(_))
    ));
    assert!(matches!(
        GexParams::new(2048, 8192, 4096),
        Err(Error::InvalidConfig(_))
    ));

    // Also refused before anything is sent.
    let (io, _peer) = socket(PeerOptions::default());
    let config = Config {
        gex: GexParams {
            min_group_size: 4096,
            preferred_group_size: 2048,
            max_group_size: 8192,
        },
        ..Default::default()
    };
    let result = client::connect_stream(
        Arc::new(config),
        io,
        "peer",
        22,
        |_: &str, _: u16, _: &PublicKey| true,
    )
    .await;
    assert!(matches!(result, Err(Error::InvalidConfig(_))));
}
