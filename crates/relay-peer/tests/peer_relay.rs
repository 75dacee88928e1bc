//! End-to-end tests: real `PeerSession`s talking through a real relay server
//! on `127.0.0.1:0`.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use relay_core::{encode_file_header, encode_user, RelayEvent};
use relay_peer::infrastructure::network::session::{PeerSession, SessionError, DISCONNECTED_NOTICE};
use relay_peer::infrastructure::storage::config::PeerSettings;
use relay_server::infrastructure::network::server::{RelayServer, ServerHandle};
use relay_server::infrastructure::storage::config::ServerSettings;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

const STEP: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(200);

// ── Helpers ───────────────────────────────────────────────────────────────────

struct Relay {
    addr: SocketAddr,
    handle: ServerHandle,
    events: mpsc::Receiver<RelayEvent>,
}

async fn start_relay() -> Relay {
    let settings = ServerSettings {
        bind_address: "127.0.0.1".to_string(),
        port: 0,
        ..ServerSettings::default()
    };
    let (server, events) = RelayServer::bind(&settings).await.unwrap();
    let addr = server.local_addr().unwrap();
    let handle = server.handle();
    tokio::spawn(server.run());
    Relay {
        addr,
        handle,
        events,
    }
}

impl Relay {
    async fn wait_for(&mut self, pred: impl Fn(&RelayEvent) -> bool) {
        loop {
            let event = timeout(STEP, self.events.recv())
                .await
                .expect("timed out waiting for server event")
                .expect("server event stream closed");
            if pred(&event) {
                return;
            }
        }
    }

    async fn wait_joined(&mut self, name: &str) {
        self.wait_for(|e| matches!(e, RelayEvent::PeerJoined { name: n } if n == name))
            .await;
    }
}

struct Peer {
    session: PeerSession,
    events: mpsc::Receiver<RelayEvent>,
    _downloads: tempfile::TempDir,
    download_dir: std::path::PathBuf,
}

async fn join(relay: &mut Relay, name: &str) -> Peer {
    let downloads = tempfile::tempdir().unwrap();
    let settings = PeerSettings {
        download_dir: Some(downloads.path().to_path_buf()),
        ..PeerSettings::default()
    };
    let (session, events) = PeerSession::connect(&relay.addr.to_string(), name, &settings)
        .await
        .unwrap();
    relay.wait_joined(name).await;
    Peer {
        session,
        events,
        download_dir: downloads.path().to_path_buf(),
        _downloads: downloads,
    }
}

impl Peer {
    /// Waits for the first event matching `pred`, skipping the others.
    async fn expect(&mut self, pred: impl Fn(&RelayEvent) -> bool) -> RelayEvent {
        loop {
            let event = timeout(STEP, self.events.recv())
                .await
                .expect("timed out waiting for peer event")
                .expect("peer event stream closed");
            if pred(&event) {
                return event;
            }
        }
    }

    /// Events that arrive within a short quiet period.
    async fn pending(&mut self) -> Vec<RelayEvent> {
        let mut events = Vec::new();
        while let Ok(Some(event)) = timeout(QUIET, self.events.recv()).await {
            events.push(event);
        }
        events
    }
}

fn sample_payload(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i * 7 % 256) as u8).collect()
}

fn is_file_received(event: &RelayEvent) -> bool {
    matches!(event, RelayEvent::FileReceived { .. })
}

fn stored_files(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}

// ── Scenarios ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_alice_chat_reaches_bob_without_echo() {
    // Arrange
    let mut relay = start_relay().await;
    let mut alice = join(&mut relay, "Alice").await;
    let mut bob = join(&mut relay, "Bob").await;
    alice
        .expect(|e| *e == RelayEvent::PeerJoined { name: "Bob".to_string() })
        .await;

    // Act
    alice.session.send_text("hi").await.unwrap();

    // Assert
    bob.expect(|e| {
        *e == RelayEvent::MessageReceived {
            sender_name: "Alice".to_string(),
            text: "hi".to_string(),
        }
    })
    .await;
    let echoed = alice
        .pending()
        .await
        .into_iter()
        .any(|e| matches!(e, RelayEvent::MessageReceived { .. }));
    assert!(!echoed, "Alice must not receive her own message");
}

#[tokio::test]
async fn test_unaligned_500k_upload_is_stored_byte_for_byte() {
    // Arrange – Alice is a raw socket so the payload goes out in 4 096-byte
    // writes that straddle the header.
    let mut relay = start_relay().await;
    let mut alice = TcpStream::connect(relay.addr).await.unwrap();
    alice.write_all(&encode_user("Alice").unwrap()).await.unwrap();
    relay.wait_joined("Alice").await;
    let mut bob = join(&mut relay, "Bob").await;
    let payload = sample_payload(500_000);

    // Act
    let mut stream = encode_file_header("report.pdf", payload.len() as u64, None).unwrap();
    stream.extend_from_slice(&payload);
    for chunk in stream.chunks(4096) {
        alice.write_all(chunk).await.unwrap();
    }

    // Assert
    let event = bob.expect(is_file_received).await;
    let RelayEvent::FileReceived {
        sender_name,
        file_name,
        local_path,
    } = event
    else {
        unreachable!()
    };
    assert_eq!(sender_name, "Alice");
    assert_eq!(file_name, "report.pdf");
    assert!(local_path.starts_with(&bob.download_dir));
    let stored = std::fs::read(&local_path).unwrap();
    assert_eq!(stored.len(), 500_000);
    assert_eq!(Sha256::digest(&stored), Sha256::digest(&payload));
}

#[tokio::test]
async fn test_send_file_reaches_every_other_peer() {
    // Arrange
    let mut relay = start_relay().await;
    let mut alice = join(&mut relay, "Alice").await;
    let mut bob = join(&mut relay, "Bob").await;
    let mut carol = join(&mut relay, "Carol").await;
    let source_dir = tempfile::tempdir().unwrap();
    let source = source_dir.path().join("photo.jpg");
    let content = sample_payload(123_457);
    std::fs::write(&source, &content).unwrap();

    // Act
    let sent = alice.session.send_file(&source).await.unwrap();

    // Assert
    assert_eq!(sent, 123_457);
    for peer in [&mut bob, &mut carol] {
        let RelayEvent::FileReceived {
            sender_name,
            local_path,
            ..
        } = peer.expect(is_file_received).await
        else {
            unreachable!()
        };
        assert_eq!(sender_name, "Alice");
        assert_eq!(std::fs::read(&local_path).unwrap(), content);
    }
    assert!(!alice.pending().await.iter().any(is_file_received));
    assert_eq!(stored_files(&alice.download_dir), 0);
}

#[tokio::test]
async fn test_sixth_peer_is_turned_away_and_five_keep_chatting() {
    // Arrange
    let mut relay = start_relay().await;
    let mut peers = Vec::new();
    for name in ["P1", "P2", "P3", "P4", "P5"] {
        peers.push(join(&mut relay, name).await);
    }

    // Act
    let downloads = tempfile::tempdir().unwrap();
    let settings = PeerSettings {
        download_dir: Some(downloads.path().to_path_buf()),
        ..PeerSettings::default()
    };
    let sixth = PeerSession::connect(&relay.addr.to_string(), "P6", &settings).await;

    // Assert – the connection is accepted by the OS and then dropped by the
    // relay; depending on timing the announcement write itself may fail.
    match sixth {
        Ok((session, mut events)) => {
            loop {
                let event = timeout(STEP, events.recv())
                    .await
                    .expect("sixth peer must be disconnected");
                match event {
                    Some(RelayEvent::Notice { text }) if text == DISCONNECTED_NOTICE => break,
                    Some(_) => continue,
                    None => break,
                }
            }
            assert!(!session.is_connected());
        }
        Err(e) => assert!(matches!(e, SessionError::Io(_) | SessionError::Closed)),
    }
    relay
        .wait_for(|e| matches!(e, RelayEvent::PeerRejected { .. }))
        .await;
    assert_eq!(relay.handle.connection_count(), 5);

    peers[0].session.send_text("still here").await.unwrap();
    for peer in &mut peers[1..] {
        peer.expect(|e| matches!(e, RelayEvent::MessageReceived { text, .. } if text == "still here"))
            .await;
    }
}

#[tokio::test]
async fn test_sender_vanishing_mid_transfer_leaves_others_working() {
    // Arrange
    let mut relay = start_relay().await;
    let mut alice = TcpStream::connect(relay.addr).await.unwrap();
    alice.write_all(&encode_user("Alice").unwrap()).await.unwrap();
    relay.wait_joined("Alice").await;
    let mut bob = join(&mut relay, "Bob").await;
    let mut carol = join(&mut relay, "Carol").await;

    // Act – Alice announces 1 000 bytes, sends 100 and disconnects.
    let mut partial = encode_file_header("cut.bin", 1000, None).unwrap();
    partial.extend_from_slice(&[5u8; 100]);
    alice.write_all(&partial).await.unwrap();
    alice.shutdown().await.unwrap();
    relay
        .wait_for(|e| *e == RelayEvent::PeerLeft { name: "Alice".to_string() })
        .await;

    // Assert
    for peer in [&mut bob, &mut carol] {
        peer.expect(|e| matches!(e, RelayEvent::Notice { text } if text == "Transfer of cut.bin from Alice was interrupted."))
            .await;
        peer.expect(|e| matches!(e, RelayEvent::Notice { text } if text == "Alice left."))
            .await;
    }
    assert_eq!(relay.handle.connection_count(), 2);

    bob.session.send_text("anyone there?").await.unwrap();
    carol
        .expect(|e| matches!(e, RelayEvent::MessageReceived { sender_name, .. } if sender_name == "Bob"))
        .await;
}

#[tokio::test]
async fn test_operator_chat_during_upload_reaches_peer_intact() {
    // Arrange
    let mut relay = start_relay().await;
    let alice = join(&mut relay, "Alice").await;
    let mut bob = join(&mut relay, "Bob").await;
    let source_dir = tempfile::tempdir().unwrap();
    let source = source_dir.path().join("big.bin");
    let content = sample_payload(600_000);
    std::fs::write(&source, &content).unwrap();

    // Act
    let handle = relay.handle.clone();
    let operator = tokio::spawn(async move {
        for i in 0..50 {
            handle.send_text(&format!("op {i}")).await.unwrap();
            tokio::task::yield_now().await;
        }
    });
    alice.session.send_file(&source).await.unwrap();
    operator.await.unwrap();

    // Assert
    let mut chats = 0;
    let mut file = None;
    while chats < 50 || file.is_none() {
        match bob.expect(|_| true).await {
            RelayEvent::MessageReceived { sender_name, text } => {
                assert_eq!(sender_name, "Server");
                assert_eq!(text, format!("op {chats}"));
                chats += 1;
            }
            RelayEvent::FileReceived { local_path, .. } => file = Some(local_path),
            RelayEvent::PeerJoined { .. } => {}
            other => panic!("unexpected event {other:?}"),
        }
    }
    let stored = std::fs::read(file.unwrap()).unwrap();
    assert_eq!(Sha256::digest(&stored), Sha256::digest(&content));
}

#[tokio::test]
async fn test_server_shutdown_disconnects_peers() {
    // Arrange
    let mut relay = start_relay().await;
    let mut alice = join(&mut relay, "Alice").await;

    // Act
    relay.handle.shutdown();

    // Assert
    alice
        .expect(|e| matches!(e, RelayEvent::Notice { text } if text == DISCONNECTED_NOTICE))
        .await;
    timeout(STEP, alice.session.disconnected()).await.unwrap();
    assert!(matches!(
        alice.session.send_text("hello?").await,
        Err(SessionError::Closed)
    ));
}
