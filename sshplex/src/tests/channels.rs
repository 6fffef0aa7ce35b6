use std::sync::Arc;
use std::time::Duration;

use crate::helpers::SshBool;
use ssh_encoding::{Decode, Encode};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::peer::{pair, Peer, PeerOptions, REMOTE_OFFSET};
use crate::client::{Config, Handle};
use crate::{
    msg, ChannelId, ChannelKind, ChannelMsg, ChannelOpenFailure, ChannelOpenRequest, Error,
    SessionChannel,
};

async fn open_session(
    handle: &Handle,
    peer: &mut Peer,
    window: u32,
    max_packet: u32,
) -> (SessionChannel, u32) {
    let h = handle.clone();
    let open = tokio::spawn(async move { h.channel_open_session().await });
    let id = peer.accept_channel(window, max_packet).await;
    (open.await.unwrap().unwrap(), id)
}

fn be32(n: u32) -> Vec<u8> {
    n.to_be_bytes().to_vec()
}

/// Waits until the client handled every packet sent so far.
async fn sync(handle: &Handle, peer: &mut Peer) {
    let h = handle.clone();
    let request = tokio::spawn(async move { h.global_request("sync@test", true, &[]).await });
    peer.expect(msg::GLOBAL_REQUEST).await;
    peer.send(&[msg::REQUEST_FAILURE]).await;
    assert!(matches!(request.await.unwrap(), Err(Error::RequestDenied)));
}

fn string(s: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    s.encode(&mut out).unwrap();
    out
}

/// The recipient and the data of a CHANNEL_DATA packet.
fn parse_data(p: &[u8]) -> (u32, Vec<u8>) {
    assert_eq!(p[0], msg::CHANNEL_DATA);
    let mut r = &p[1..];
    (u32::decode(&mut r).unwrap(), Vec::<u8>::decode(&mut r).unwrap())
}

#[tokio::test]
async fn test_exec_session() {
    let _ = env_logger::try_init();
    let (handle, mut peer) = pair(Config::default(), PeerOptions::default()).await;
    let (session, id) = open_session(&handle, &mut peer, 1 << 20, 32768).await;
    assert_eq!(session.id(), ChannelId(id));
    assert_eq!(session.kind(), &ChannelKind::Session);
    assert_eq!(session.max_packet_size(), 32768);
    assert_eq!(session.window_size(), 1 << 20);

    let exec = tokio::spawn(async move {
        session.exec(true, "uname -a").await.map(|()| session)
    });
    let request = peer.expect(msg::CHANNEL_REQUEST).await;
    let mut r = &request[1..];
    assert_eq!(u32::decode(&mut r).unwrap(), id + REMOTE_OFFSET);
    assert_eq!(String::decode(&mut r).unwrap(), "exec");
    assert!(bool::decode(&mut r).unwrap());
    assert_eq!(String::decode(&mut r).unwrap(), "uname -a");
    peer.send_channel(msg::CHANNEL_SUCCESS, id, &[]).await;
    let session = exec.await.unwrap().unwrap();

    peer.send_channel(msg::CHANNEL_DATA, id, &string(b"Linux\n")).await;
    let mut extended = be32(1u32);
    extended.extend_from_slice(&string(b"warning\n"));
    peer.send_channel(msg::CHANNEL_EXTENDED_DATA, id, &extended).await;
    let mut status = string(b"exit-status");
    false.encode(&mut status).unwrap();
    0u32.encode(&mut status).unwrap();
    peer.send_channel(msg::CHANNEL_REQUEST, id, &status).await;
    peer.send_channel(msg::CHANNEL_EOF, id, &[]).await;
    peer.send_channel(msg::CHANNEL_CLOSE, id, &[]).await;

    assert_eq!(session.recv_data().await.as_deref(), Some(&b"Linux\n"[..]));
    assert_eq!(session.recv_data().await, None);
    let (code, data) = session.recv_extended().await.unwrap();
    assert_eq!((code, &data[..]), (1, &b"warning\n"[..]));
    assert_eq!(
        session.wait().await,
        Some(ChannelMsg::ExitStatus { exit_status: 0 })
    );
    assert_eq!(session.wait().await, Some(ChannelMsg::Eof));
    assert_eq!(session.wait().await, Some(ChannelMsg::Close));
    assert_eq!(session.wait().await, None);

    let close = peer.expect(msg::CHANNEL_CLOSE).await;
    assert_eq!(u32::decode(&mut &close[1..]).unwrap(), id + REMOTE_OFFSET);
    assert!(session.is_closed());
    assert!(!handle.connection().contains(ChannelId(id)));
    assert!(matches!(session.data(b"late").await, Err(Error::ChannelClosed)));
}

#[tokio::test]
async fn test_client_close() {
    let _ = env_logger::try_init();
    let (handle, mut peer) = pair(Config::default(), PeerOptions::default()).await;
    let (session, id) = open_session(&handle, &mut peer, 1 << 20, 32768).await;

    session.eof().await.unwrap();
    session.close().await.unwrap();
    peer.expect(msg::CHANNEL_EOF).await;
    peer.expect(msg::CHANNEL_CLOSE).await;
    // Still allocated until the server's CLOSE.
    assert!(handle.connection().contains(ChannelId(id)));

    peer.send_channel(msg::CHANNEL_CLOSE, id, &[]).await;
    assert_eq!(session.wait().await, Some(ChannelMsg::Close));
    assert_eq!(session.wait().await, None);
    sync(&handle, &mut peer).await;
    assert!(!handle.connection().contains(ChannelId(id)));

    // The id is free again.
    let (again, reused) = open_session(&handle, &mut peer, 1 << 20, 32768).await;
    assert_eq!(reused, id);
    assert_eq!(again.id(), ChannelId(id));
}

#[tokio::test]
async fn test_dropped_channel_is_closed() {
    let _ = env_logger::try_init();
    let (handle, mut peer) = pair(Config::default(), PeerOptions::default()).await;
    let (session, id) = open_session(&handle, &mut peer, 1 << 20, 32768).await;

    // A reader keeps the channel open after the channel itself is gone.
    let reader = session.make_reader();
    drop(session);
    assert!(peer.try_recv(100).await.is_none());
    drop(reader);
    let close = peer.expect(msg::CHANNEL_CLOSE).await;
    assert_eq!(u32::decode(&mut &close[1..]).unwrap(), id + REMOTE_OFFSET);
    assert!(handle.connection().contains(ChannelId(id)));

    peer.send_channel(msg::CHANNEL_CLOSE, id, &[]).await;
    sync(&handle, &mut peer).await;
    assert!(!handle.connection().contains(ChannelId(id)));

    // A channel the server closed is not closed twice.
    let (again, reused) = open_session(&handle, &mut peer, 1 << 20, 32768).await;
    assert_eq!(reused, id);
    peer.send_channel(msg::CHANNEL_CLOSE, id, &[]).await;
    peer.expect(msg::CHANNEL_CLOSE).await;
    assert_eq!(again.wait().await, Some(ChannelMsg::Close));
    drop(again);
    assert!(peer.try_recv(100).await.is_none());
}

#[tokio::test]
async fn test_writes_wait_for_window() {
    let _ = env_logger::try_init();
    let (handle, mut peer) = pair(Config::default(), PeerOptions::default()).await;
    let (session, id) = open_session(&handle, &mut peer, 100, 1000).await;

    session.data(&[1; 60]).await.unwrap();
    assert_eq!(session.window_size(), 40);
    let session = Arc::new(session);
    let s = session.clone();
    let blocked = tokio::spawn(async move { s.data(&[2; 60]).await });

    let (_, first) = parse_data(&peer.expect(msg::CHANNEL_DATA).await);
    assert_eq!(first, [1; 60]);
    let (_, second) = parse_data(&peer.expect(msg::CHANNEL_DATA).await);
    assert_eq!(second, [2; 40]);
    assert!(peer.try_recv(100).await.is_none());
    assert!(!blocked.is_finished());

    peer.send_channel(msg::CHANNEL_WINDOW_ADJUST, id, &be32(100u32))
        .await;
    let (_, rest) = parse_data(&peer.expect(msg::CHANNEL_DATA).await);
    assert_eq!(rest, [2; 20]);
    blocked.await.unwrap().unwrap();
    assert_eq!(session.window_size(), 80);
    assert_eq!(
        session.wait().await,
        Some(ChannelMsg::WindowAdjusted { new_size: 100 })
    );
}

#[tokio::test]
async fn test_writes_split_at_max_packet() {
    let _ = env_logger::try_init();
    let (handle, mut peer) = pair(Config::default(), PeerOptions::default()).await;
    let (session, id) = open_session(&handle, &mut peer, 1 << 20, 16).await;

    let data: Vec<u8> = (0..40).collect();
    session.data(&data).await.unwrap();
    let mut received = Vec::new();
    for expected in [16, 16, 8] {
        let (recipient, chunk) = parse_data(&peer.expect(msg::CHANNEL_DATA).await);
        assert_eq!(recipient, id + REMOTE_OFFSET);
        assert_eq!(chunk.len(), expected);
        received.extend(chunk);
    }
    assert_eq!(received, data);
}

#[tokio::test]
async fn test_stream_io() {
    let _ = env_logger::try_init();
    let (handle, mut peer) = pair(Config::default(), PeerOptions::default()).await;
    let (session, id) = open_session(&handle, &mut peer, 1 << 20, 32768).await;

    let mut writer = session.make_writer();
    writer.write_all(b"to the server").await.unwrap();
    writer.shutdown().await.unwrap();
    let (_, data) = parse_data(&peer.expect(msg::CHANNEL_DATA).await);
    assert_eq!(data, b"to the server");
    peer.expect(msg::CHANNEL_EOF).await;

    peer.send_channel(msg::CHANNEL_DATA, id, &string(b"to ")).await;
    peer.send_channel(msg::CHANNEL_DATA, id, &string(b"the client")).await;
    peer.send_channel(msg::CHANNEL_EOF, id, &[]).await;
    let mut reader = session.make_reader();
    let mut received = Vec::new();
    reader.read_to_end(&mut received).await.unwrap();
    assert_eq!(received, b"to the client");
}

#[tokio::test]
async fn test_open_failure() {
    let _ = env_logger::try_init();
    let (handle, mut peer) = pair(Config::default(), PeerOptions::default()).await;

    let h = handle.clone();
    let open = tokio::spawn(async move {
        h.channel_open_direct_tcpip("localhost", 8080, "127.0.0.1", 4000)
            .await
    });
    let request = peer.expect(msg::CHANNEL_OPEN).await;
    let mut r = &request[1..];
    assert_eq!(String::decode(&mut r).unwrap(), "direct-tcpip");
    let id = u32::decode(&mut r).unwrap();
    assert_eq!(id, 0);
    u32::decode(&mut r).unwrap();
    u32::decode(&mut r).unwrap();
    assert_eq!(String::decode(&mut r).unwrap(), "localhost");
    assert_eq!(u32::decode(&mut r).unwrap(), 8080);
    assert_eq!(String::decode(&mut r).unwrap(), "127.0.0.1");
    assert_eq!(u32::decode(&mut r).unwrap(), 4000);

    let mut failure = be32(1u32);
    failure.extend_from_slice(&string(b"not allowed"));
    failure.extend_from_slice(&string(b"en"));
    peer.send_channel(msg::CHANNEL_OPEN_FAILURE, id, &failure).await;

    match open.await.unwrap() {
        Err(Error::ChannelOpenFailure { reason, message }) => {
            assert_eq!(reason, ChannelOpenFailure::AdministrativelyProhibited);
            assert_eq!(message, "not allowed");
        }
        other => panic!("unexpected {other:?}"),
    }
    sync(&handle, &mut peer).await;
    assert_eq!(handle.connection().len(), 0);

    let (session, reused) = open_session(&handle, &mut peer, 1 << 20, 32768).await;
    assert_eq!(reused, 0);
    assert_eq!(session.id(), ChannelId(0));
}

#[tokio::test]
async fn test_open_timeout_closes_late_channel() {
    let _ = env_logger::try_init();
    let config = Config {
        timeout: Some(Duration::from_secs(1)),
        ..Default::default()
    };
    let (handle, mut peer) = pair(config, PeerOptions::default()).await;

    let h = handle.clone();
    let open = tokio::spawn(async move { h.channel_open_session().await });
    let request = peer.expect(msg::CHANNEL_OPEN).await;
    let mut r = &request[1..];
    String::decode(&mut r).unwrap();
    let id = u32::decode(&mut r).unwrap();
    assert!(matches!(open.await.unwrap(), Err(Error::Timeout { .. })));
    // Reserved until the channel is closed on both sides.
    assert!(handle.connection().contains(ChannelId(id)));

    let mut confirmation = be32(id + REMOTE_OFFSET);
    confirmation.extend_from_slice(&be32(1024u32));
    confirmation.extend_from_slice(&be32(1024u32));
    peer.send_channel(msg::CHANNEL_OPEN_CONFIRMATION, id, &confirmation)
        .await;
    let close = peer.expect(msg::CHANNEL_CLOSE).await;
    assert_eq!(u32::decode(&mut &close[1..]).unwrap(), id + REMOTE_OFFSET);

    peer.send_channel(msg::CHANNEL_CLOSE, id, &[]).await;
    sync(&handle, &mut peer).await;
    assert!(!handle.connection().contains(ChannelId(id)));
}

#[tokio::test]
async fn test_dropped_open_is_abandoned() {
    let _ = env_logger::try_init();
    let (handle, mut peer) = pair(Config::default(), PeerOptions::default()).await;

    let h = handle.clone();
    let open = tokio::spawn(async move { h.channel_open_session().await });
    let request = peer.expect(msg::CHANNEL_OPEN).await;
    let mut r = &request[1..];
    String::decode(&mut r).unwrap();
    let id = u32::decode(&mut r).unwrap();
    open.abort();
    assert!(open.await.unwrap_err().is_cancelled());

    let mut confirmation = be32(id + REMOTE_OFFSET);
    confirmation.extend_from_slice(&be32(1024u32));
    confirmation.extend_from_slice(&be32(1024u32));
    peer.send_channel(msg::CHANNEL_OPEN_CONFIRMATION, id, &confirmation)
        .await;
    peer.expect(msg::CHANNEL_CLOSE).await;
}

#[tokio::test]
async fn test_unknown_channel_type_refused() {
    let _ = env_logger::try_init();
    let (_handle, mut peer) = pair(Config::default(), PeerOptions::default()).await;

    let mut open = vec![msg::CHANNEL_OPEN];
    "auth-agent@openssh.com".encode(&mut open).unwrap();
    7u32.encode(&mut open).unwrap();
    1024u32.encode(&mut open).unwrap();
    1024u32.encode(&mut open).unwrap();
    peer.send(&open).await;

    let failure = peer.expect(msg::CHANNEL_OPEN_FAILURE).await;
    let mut r = &failure[1..];
    assert_eq!(u32::decode(&mut r).unwrap(), 7);
    assert_eq!(u32::decode(&mut r).unwrap(), msg::SSH_OPEN_UNKNOWN_CHANNEL_TYPE);
}

#[tokio::test]
async fn test_opener_accepts_forwarded_channel() {
    let _ = env_logger::try_init();
    let (handle, mut peer) = pair(Config::default(), PeerOptions::default()).await;
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    handle.register_opener("forwarded-tcpip", move |request: ChannelOpenRequest| {
        let tx = tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(request.confirm().await);
        });
    });

    let mut open = vec![msg::CHANNEL_OPEN];
    "forwarded-tcpip".encode(&mut open).unwrap();
    5u32.encode(&mut open).unwrap();
    4096u32.encode(&mut open).unwrap();
    512u32.encode(&mut open).unwrap();
    "0.0.0.0".encode(&mut open).unwrap();
    2222u32.encode(&mut open).unwrap();
    "10.0.0.7".encode(&mut open).unwrap();
    50000u32.encode(&mut open).unwrap();
    peer.send(&open).await;

    let confirmation = peer.expect(msg::CHANNEL_OPEN_CONFIRMATION).await;
    let mut r = &confirmation[1..];
    assert_eq!(u32::decode(&mut r).unwrap(), 5);
    let id = u32::decode(&mut r).unwrap();

    let channel = rx.recv().await.unwrap().unwrap();
    assert_eq!(channel.id(), ChannelId(id));
    assert_eq!(channel.window_size(), 4096);
    assert_eq!(
        channel.kind(),
        &ChannelKind::ForwardedTcpip {
            connected_address: "0.0.0.0".into(),
            connected_port: 2222,
            originator_address: "10.0.0.7".into(),
            originator_port: 50000,
        }
    );

    channel.data(b"hello").await.unwrap();
    let (recipient, data) = parse_data(&peer.expect(msg::CHANNEL_DATA).await);
    assert_eq!(recipient, 5);
    assert_eq!(data, b"hello");
}

#[tokio::test]
async fn test_dropped_open_request_is_rejected() {
    let _ = env_logger::try_init();
    let (handle, mut peer) = pair(Config::default(), PeerOptions::default()).await;
    handle.register_opener("x11", |request: ChannelOpenRequest| drop(request));

    let mut open = vec![msg::CHANNEL_OPEN];
    "x11".encode(&mut open).unwrap();
    9u32.encode(&mut open).unwrap();
    4096u32.encode(&mut open).unwrap();
    512u32.encode(&mut open).unwrap();
    "127.0.0.1".encode(&mut open).unwrap();
    6010u32.encode(&mut open).unwrap();
    peer.send(&open).await;

    let failure = peer.expect(msg::CHANNEL_OPEN_FAILURE).await;
    let mut r = &failure[1..];
    assert_eq!(u32::decode(&mut r).unwrap(), 9);
    assert_eq!(
        u32::decode(&mut r).unwrap(),
        ChannelOpenFailure::AdministrativelyProhibited as u32
    );
}

#[tokio::test]
async fn test_request_denied() {
    let _ = env_logger::try_init();
    let (handle, mut peer) = pair(Config::default(), PeerOptions::default()).await;
    let (session, id) = open_session(&handle, &mut peer, 1 << 20, 32768).await;

    let session = Arc::new(session);
    let s = session.clone();
    let subsystem = tokio::spawn(async move { s.request_subsystem(true, "sftp").await });
    let request = peer.expect(msg::CHANNEL_REQUEST).await;
    let mut r = &request[1..];
    u32::decode(&mut r).unwrap();
    assert_eq!(String::decode(&mut r).unwrap(), "subsystem");
    peer.send_channel(msg::CHANNEL_FAILURE, id, &[]).await;
    assert!(matches!(
        subsystem.await.unwrap(),
        Err(Error::RequestDenied)
    ));

    // Requests without a reply return once sent.
    session.set_env(false, "LANG", "C").await.unwrap();
    peer.expect(msg::CHANNEL_REQUEST).await;
}

#[tokio::test]
async fn test_inbound_channel_requests() {
    let _ = env_logger::try_init();
    let (handle, mut peer) = pair(Config::default(), PeerOptions::default()).await;
    let (session, id) = open_session(&handle, &mut peer, 1 << 20, 32768).await;

    let mut keepalive = string(b"keepalive@openssh.com");
    true.encode(&mut keepalive).unwrap();
    peer.send_channel(msg::CHANNEL_REQUEST, id, &keepalive).await;
    let reply = peer.expect(msg::CHANNEL_SUCCESS).await;
    assert_eq!(u32::decode(&mut &reply[1..]).unwrap(), id + REMOTE_OFFSET);

    let mut unknown = string(b"frobnicate");
    true.encode(&mut unknown).unwrap();
    peer.send_channel(msg::CHANNEL_REQUEST, id, &unknown).await;
    peer.expect(msg::CHANNEL_FAILURE).await;

    let mut signal = string(b"exit-signal");
    false.encode(&mut signal).unwrap();
    "KILL".encode(&mut signal).unwrap();
    true.encode(&mut signal).unwrap();
    "killed".encode(&mut signal).unwrap();
    "en".encode(&mut signal).unwrap();
    peer.send_channel(msg::CHANNEL_REQUEST, id, &signal).await;
    assert_eq!(
        session.wait().await,
        Some(ChannelMsg::ExitSignal {
            signal_name: crate::Sig::KILL,
            core_dumped: true,
            error_message: "killed".into(),
            lang_tag: "en".into(),
        })
    );
}

#[tokio::test]
async fn test_local_window_refill() {
    let _ = env_logger::try_init();
    let config = Config {
        window_size: 1000,
        ..Default::default()
    };
    let (handle, mut peer) = pair(config, PeerOptions::default()).await;
    let (session, id) = open_session(&handle, &mut peer, 1 << 20, 32768).await;

    peer.send_channel(msg::CHANNEL_DATA, id, &string(&[0; 400]))
        .await;
    peer.send_channel(msg::CHANNEL_DATA, id, &string(&[0; 200]))
        .await;
    // Nothing was read yet, so no adjustment precedes the sync request.
    sync(&handle, &mut peer).await;

    assert_eq!(session.recv_data().await.unwrap().len(), 400);
    assert!(peer.try_recv(100).await.is_none());
    assert_eq!(session.recv_data().await.unwrap().len(), 200);
    let adjust = peer.expect(msg::CHANNEL_WINDOW_ADJUST).await;
    let mut r = &adjust[1..];
    assert_eq!(u32::decode(&mut r).unwrap(), id + REMOTE_OFFSET);
    assert_eq!(u32::decode(&mut r).unwrap(), 600);
}

#[tokio::test]
async fn test_unread_data_holds_back_the_window() {
    let _ = env_logger::try_init();
    let config = Config {
        window_size: 1000,
        ..Default::default()
    };
    let (handle, mut peer) = pair(config, PeerOptions::default()).await;
    let (session, id) = open_session(&handle, &mut peer, 1 << 20, 32768).await;

    for len in [400, 400, 200] {
        peer.send_channel(msg::CHANNEL_DATA, id, &string(&vec![7; len]))
            .await;
    }
    sync(&handle, &mut peer).await;
    assert!(peer.try_recv(100).await.is_none());

    let mut reader = session.make_reader();
    let mut buf = vec![0; 800];
    reader.read_exact(&mut buf).await.unwrap();
    assert!(buf.iter().all(|&b| b == 7));
    let adjust = peer.expect(msg::CHANNEL_WINDOW_ADJUST).await;
    let mut r = &adjust[1..];
    assert_eq!(u32::decode(&mut r).unwrap(), id + REMOTE_OFFSET);
    assert_eq!(u32::decode(&mut r).unwrap(), 800);

    // The granted window is usable in full.
    peer.send_channel(msg::CHANNEL_DATA, id, &string(&[8; 800]))
        .await;
    let mut rest = vec![0; 1000];
    reader.read_exact(&mut rest).await.unwrap();
    assert!(rest[..200].iter().all(|&b| b == 7));
    assert!(rest[200..].iter().all(|&b| b == 8));
    assert!(!handle.is_closed());
}

#[tokio::test]
async fn test_data_beyond_window_is_fatal() {
    let _ = env_logger::try_init();
    let config = Config {
        window_size: 100,
        ..Default::default()
    };
    let (handle, mut peer) = pair(config, PeerOptions::default()).await;
    let (session, id) = open_session(&handle, &mut peer, 1 << 20, 32768).await;

    peer.send_channel(msg::CHANNEL_DATA, id, &string(&[0; 101]))
        .await;
    assert!(matches!(handle.closed().await, Error::Inconsistent));
    assert!(matches!(session.data(b"x").await, Err(Error::Inconsistent)));
    let disconnect = peer.expect(msg::DISCONNECT).await;
    assert_eq!(u32::decode(&mut &disconnect[1..]).unwrap(), 2);
}

#[tokio::test]
async fn test_data_for_unknown_channel_is_fatal() {
    let _ = env_logger::try_init();
    let (handle, mut peer) = pair(Config::default(), PeerOptions::default()).await;
    peer.send_channel(msg::CHANNEL_DATA, 42, &string(b"lost")).await;
    assert!(matches!(handle.closed().await, Error::WrongChannel));
}

#[tokio::test]
async fn test_global_requests() {
    let _ = env_logger::try_init();
    let (handle, mut peer) = pair(Config::default(), PeerOptions::default()).await;

    let h = handle.clone();
    let forward = tokio::spawn(async move { h.tcpip_forward("127.0.0.1", 0).await });
    let request = peer.expect(msg::GLOBAL_REQUEST).await;
    let mut r = &request[1..];
    assert_eq!(String::decode(&mut r).unwrap(), "tcpip-forward");
    assert!(bool::decode(&mut r).unwrap());
    assert_eq!(String::decode(&mut r).unwrap(), "127.0.0.1");
    assert_eq!(u32::decode(&mut r).unwrap(), 0);
    let mut success = vec![msg::REQUEST_SUCCESS];
    2222u32.encode(&mut success).unwrap();
    peer.send(&success).await;
    assert_eq!(forward.await.unwrap().unwrap(), 2222);

    let h = handle.clone();
    let cancel = tokio::spawn(async move { h.cancel_tcpip_forward("127.0.0.1", 2222).await });
    peer.expect(msg::GLOBAL_REQUEST).await;
    peer.send(&[msg::REQUEST_FAILURE]).await;
    assert!(matches!(cancel.await.unwrap(), Err(Error::RequestDenied)));

    // Without a reply, nothing is waited for.
    assert!(handle
        .global_request("no-more-sessions@openssh.com", false, &[])
        .await
        .unwrap()
        .is_none());
    peer.expect(msg::GLOBAL_REQUEST).await;

    // The server's own requests are refused.
    let mut inbound = vec![msg::GLOBAL_REQUEST];
    "hostkeys-00@openssh.com".encode(&mut inbound).unwrap();
    true.encode(&mut inbound).unwrap();
    peer.send(&inbound).await;
    peer.expect(msg::REQUEST_FAILURE).await;
}

#[tokio::test]
async fn test_hangup_fails_channels() {
    let _ = env_logger::try_init();
    let (handle, mut peer) = pair(Config::default(), PeerOptions::default()).await;
    let (session, _id) = open_session(&handle, &mut peer, 1 << 20, 32768).await;

    let h = handle.clone();
    let open = tokio::spawn(async move { h.channel_open_session().await });
    peer.expect(msg::CHANNEL_OPEN).await;
    drop(peer);

    assert!(matches!(open.await.unwrap(), Err(Error::HUP)));
    assert_eq!(session.recv_data().await, None);
    assert_eq!(session.wait().await, None);
    assert!(matches!(session.data(b"x").await, Err(Error::HUP)));
    assert!(matches!(
        handle.channel_open_session().await,
        Err(Error::HUP)
    ));
}
