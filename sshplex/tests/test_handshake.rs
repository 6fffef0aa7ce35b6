#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

//! Handshake failures against a hand-written server, through the
//! public API only.

use std::sync::Arc;

use anyhow::Context;
use sshplex::codec::{Decoder, Encoder};
use sshplex::*;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// The server end of a connection, speaking the unencrypted transport.
struct RawServer {
    socket: TcpStream,
    encoder: Encoder,
    decoder: Decoder,
}

impl RawServer {
    /// Accepts one connection and sends `id`, followed by CRLF.
    async fn accept(listener: TcpListener, id: &[u8]) -> anyhow::Result<Self> {
        let (mut socket, _) = listener.accept().await?;
        socket.write_all(id).await?;
        socket.write_all(b"\r\n").await?;
        Ok(RawServer {
            socket,
            encoder: Encoder::new(),
            decoder: Decoder::new(),
        })
    }

    /// Reads the client's identification line.
    async fn read_id(&mut self) -> anyhow::Result<Vec<u8>> {
        let mut line = Vec::new();
        loop {
            let byte = self.socket.read_u8().await?;
            if byte == b'\n' {
                break;
            }
            line.push(byte);
        }
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Ok(line)
    }

    async fn send(&mut self, payload: &[u8]) -> anyhow::Result<()> {
        let mut out = Vec::new();
        self.encoder.encode(payload, &mut out)?;
        self.socket.write_all(&out).await?;
        Ok(())
    }

    /// The next packet, or `None` once the client closed the socket.
    async fn recv(&mut self) -> anyhow::Result<Option<Vec<u8>>> {
        let mut buffer = [0; 4096];
        loop {
            if let Some((_, payload)) = self.decoder.decode()? {
                return Ok(Some(payload.to_vec()));
            }
            let n = self.socket.read(&mut buffer).await?;
            if n == 0 {
                return Ok(None);
            }
            self.decoder.feed(&buffer[..n]);
        }
    }

    /// The reason code of the DISCONNECT the client sends last.
    async fn disconnect_reason(&mut self) -> anyhow::Result<u32> {
        while let Some(packet) = self.recv().await? {
            if packet.first() == Some(&1) {
                let code = packet.get(1..5).context("short disconnect")?;
                return Ok(u32::from_be_bytes(code.try_into()?));
            }
        }
        anyhow::bail!("no disconnect received")
    }
}

async fn listen() -> anyhow::Result<(TcpListener, u16)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    Ok((listener, port))
}

async fn connect(port: u16) -> Result<client::Handle, Error> {
    client::connect(
        Arc::new(client::Config::default()),
        ("127.0.0.1", port),
        |_: &str, _: u16, _: &ssh_key::PublicKey| true,
    )
    .await
}

/// A server KEXINIT offering the kex methods in `kex`.
fn server_kexinit(kex: &[&'static str], strict: bool) -> anyhow::Result<Vec<u8>> {
    let preferred = Preferred {
        kex: sshplex::kex::registry(kex),
        ..Default::default()
    };
    let mut proposal = Proposal::client(&preferred, false, false);
    if strict {
        proposal
            .kex
            .0
            .push(sshplex::kex::EXTENSION_OPENSSH_STRICT_KEX_AS_SERVER.to_string());
    }
    let mut payload = Vec::new();
    proposal.write(&mut payload)?;
    Ok(payload)
}

#[tokio::test]
async fn test_bad_version_string() -> anyhow::Result<()> {
    let _ = env_logger::try_init();
    let (listener, port) = listen().await?;
    let server = tokio::spawn(async move {
        let mut server = RawServer::accept(listener, b"Welcome\r\nSSH-1.5-ancient").await?;
        server.read_id().await
    });

    assert!(matches!(connect(port).await, Err(Error::Version)));
    let client_id = server.await??;
    assert!(client_id.starts_with(b"SSH-2.0-"));
    Ok(())
}

#[tokio::test]
async fn test_no_common_kex_algorithm() -> anyhow::Result<()> {
    let _ = env_logger::try_init();
    let (listener, port) = listen().await?;
    let server = tokio::spawn(async move {
        let mut server = RawServer::accept(listener, b"SSH-2.0-legacy").await?;
        server.read_id().await?;
        let kexinit = server.recv().await?.context("no kexinit")?;
        anyhow::ensure!(kexinit.first() == Some(&20), "expected a kexinit");
        server
            .send(&server_kexinit(&[sshplex::kex::DH_G1_SHA1], false)?)
            .await?;
        server.disconnect_reason().await
    });

    match connect(port).await {
        Err(Error::NoCommonAlgo { kind, theirs, .. }) => {
            assert_eq!(kind, AlgorithmKind::Kex);
            assert_eq!(theirs, vec![sshplex::kex::DH_G1_SHA1.to_string()]);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(server.await??, Disconnect::KeyExchangeFailed as u32);
    Ok(())
}

#[tokio::test]
async fn test_packet_before_strict_kexinit() -> anyhow::Result<()> {
    let _ = env_logger::try_init();
    let (listener, port) = listen().await?;
    let server = tokio::spawn(async move {
        let mut server = RawServer::accept(listener, b"SSH-2.0-strict").await?;
        server.read_id().await?;
        server.recv().await?.context("no kexinit")?;
        // IGNORE takes sequence number 0.
        server.send(&[2, 0, 0, 0, 0]).await?;
        server
            .send(&server_kexinit(&[sshplex::kex::CURVE25519], true)?)
            .await?;
        server.disconnect_reason().await
    });

    match connect(port).await {
        Err(Error::StrictKeyExchangeViolation {
            message_type,
            sequence_number,
        }) => {
            assert_eq!(message_type, 20);
            assert_eq!(sequence_number, 1);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(server.await??, Disconnect::ProtocolError as u32);
    Ok(())
}
