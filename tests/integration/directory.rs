//! Integration tests for login, the directory snapshot, and room
//! membership lifecycle.
//!
//! Each test starts a real relay on a random port and drives it with raw
//! TCP clients speaking the framed, encrypted wire protocol.
//!
//! Verification command: `cargo test --test directory`

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;

use wirechat_proto::codec::{self, DEFAULT_MAX_FRAME_SIZE};
use wirechat_proto::crypto::FrameCipher;
use wirechat_proto::packet::{DEFAULT_ROOM, Packet, SYSTEM_SENDER};
use wirechat_relay::relay::start_server;

// =============================================================================
// Helpers
// =============================================================================

/// Starts a relay server on a random port for testing.
async fn start_relay() -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
    start_server("127.0.0.1:0")
        .await
        .expect("failed to start test relay")
}

/// A minimal protocol client over raw TCP.
struct TestClient {
    stream: TcpStream,
    cipher: FrameCipher,
}

impl TestClient {
    /// Connects and logs in, but does not consume the resulting
    /// directory broadcast.
    async fn login(addr: std::net::SocketAddr, username: &str) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let mut client = Self {
            stream,
            cipher: FrameCipher::default(),
        };
        client
            .send(&Packet::Login {
                username: username.to_string(),
            })
            .await;
        client
    }

    async fn send(&mut self, packet: &Packet) {
        codec::write_frame(&mut self.stream, packet, Some(&self.cipher))
            .await
            .unwrap();
    }

    /// Receives the next encrypted packet, failing on timeout or close.
    async fn recv(&mut self) -> Packet {
        timeout(
            Duration::from_secs(5),
            codec::read_frame(&mut self.stream, Some(&self.cipher), DEFAULT_MAX_FRAME_SIZE),
        )
        .await
        .expect("recv timed out")
        .expect("decode failed")
        .expect("stream closed")
    }

    /// Receives packets until a LIST_UPDATE arrives, returning its
    /// contents.
    async fn recv_list(&mut self) -> (Vec<String>, Vec<String>) {
        loop {
            if let Packet::ListUpdate { users, rooms } = self.recv().await {
                return (users, rooms);
            }
        }
    }

    /// Receives LIST_UPDATE packets until one matches the expected users.
    async fn recv_list_until_users(&mut self, expected: &[&str]) -> Vec<String> {
        loop {
            let (users, rooms) = self.recv_list().await;
            if users == expected {
                return rooms;
            }
        }
    }
}

// =============================================================================
// Directory snapshot tests
// =============================================================================

#[tokio::test]
async fn logins_appear_in_snapshot_exactly_once() {
    let (addr, _handle) = start_relay().await;

    let mut alice = TestClient::login(addr, "alice").await;
    let (users, rooms) = alice.recv_list().await;
    assert_eq!(users, vec!["alice"]);
    assert_eq!(rooms, vec![DEFAULT_ROOM]);

    let mut bob = TestClient::login(addr, "bob").await;
    let (users, _) = bob.recv_list().await;
    assert_eq!(users, vec!["alice", "bob"]);

    let mut carol = TestClient::login(addr, "carol").await;
    let (users, _) = carol.recv_list().await;
    assert_eq!(users, vec!["alice", "bob", "carol"]);

    // Earlier clients observed the same sequence of snapshots.
    alice.recv_list_until_users(&["alice", "bob", "carol"]).await;
    bob.recv_list_until_users(&["alice", "bob", "carol"]).await;
}

#[tokio::test]
async fn graceful_disconnect_removes_identity() {
    let (addr, _handle) = start_relay().await;

    let mut alice = TestClient::login(addr, "alice").await;
    alice.recv_list_until_users(&["alice"]).await;

    let bob = TestClient::login(addr, "bob").await;
    alice.recv_list_until_users(&["alice", "bob"]).await;

    drop(bob);
    alice.recv_list_until_users(&["alice"]).await;
}

#[tokio::test]
async fn departed_identity_is_out_of_room_member_sets() {
    let (addr, _handle) = start_relay().await;

    let mut alice = TestClient::login(addr, "alice").await;
    alice.recv_list_until_users(&["alice"]).await;
    let bob = TestClient::login(addr, "bob").await;
    alice.recv_list_until_users(&["alice", "bob"]).await;

    drop(bob);
    alice.recv_list_until_users(&["alice"]).await;

    // A room broadcast now reaches only alice herself; if bob's stale
    // membership lingered the router would log a miss, but more to the
    // point alice's own copy must still arrive.
    alice
        .send(&Packet::Message {
            text: "anyone there?".to_string(),
            to: None,
            from: None,
            is_private: false,
            room: None,
        })
        .await;
    match alice.recv().await {
        Packet::Message { text, from, room, .. } => {
            assert_eq!(text, "anyone there?");
            assert_eq!(from.as_deref(), Some("alice"));
            assert_eq!(room.as_deref(), Some(DEFAULT_ROOM));
        }
        other => panic!("expected Message, got {other:?}"),
    }
}

// =============================================================================
// Room join tests
// =============================================================================

#[tokio::test]
async fn room_join_creates_room_and_acknowledges() {
    let (addr, _handle) = start_relay().await;

    let mut alice = TestClient::login(addr, "alice").await;
    alice.recv_list_until_users(&["alice"]).await;

    alice
        .send(&Packet::RoomJoin {
            room: "Dev".to_string(),
            password: None,
        })
        .await;

    // Directory broadcast first, then the private system acknowledgment.
    let (users, rooms) = alice.recv_list().await;
    assert_eq!(users, vec!["alice"]);
    assert_eq!(rooms, vec!["Dev", DEFAULT_ROOM]);

    match alice.recv().await {
        Packet::Message { text, from, .. } => {
            assert_eq!(text, "Joined Dev");
            assert_eq!(from.as_deref(), Some(SYSTEM_SENDER));
        }
        other => panic!("expected system Message, got {other:?}"),
    }
}

#[tokio::test]
async fn room_join_with_password_is_accepted_unverified() {
    let (addr, _handle) = start_relay().await;

    let mut alice = TestClient::login(addr, "alice").await;
    alice.recv_list_until_users(&["alice"]).await;

    alice
        .send(&Packet::RoomJoin {
            room: "Vault".to_string(),
            password: Some("hunter2".to_string()),
        })
        .await;

    let (_, rooms) = alice.recv_list().await;
    assert!(rooms.contains(&"Vault".to_string()));
}

#[tokio::test]
async fn concurrent_joins_to_same_room_lose_nobody() {
    let (addr, _handle) = start_relay().await;
    const N: usize = 8;

    let mut clients = Vec::new();
    for i in 0..N {
        let mut client = TestClient::login(addr, &format!("user-{i}")).await;
        client.recv_list().await;
        clients.push(client);
    }

    // Fire all joins without waiting in between.
    for client in &mut clients {
        client
            .send(&Packet::RoomJoin {
                room: "warroom".to_string(),
                password: None,
            })
            .await;
    }

    // Every client sees its own join acknowledged.
    for client in &mut clients {
        loop {
            if let Packet::Message { text, from, .. } = client.recv().await {
                assert_eq!(from.as_deref(), Some(SYSTEM_SENDER));
                assert_eq!(text, "Joined warroom");
                break;
            }
        }
    }

    // A broadcast from one member reaches all N members, proving the
    // room holds exactly the expected membership with no lost updates.
    clients[0]
        .send(&Packet::Message {
            text: "status check".to_string(),
            to: None,
            from: None,
            is_private: false,
            room: None,
        })
        .await;

    for client in &mut clients {
        loop {
            if let Packet::Message { text, from, room, .. } = client.recv().await {
                if from.as_deref() == Some(SYSTEM_SENDER) {
                    continue;
                }
                assert_eq!(text, "status check");
                assert_eq!(from.as_deref(), Some("user-0"));
                assert_eq!(room.as_deref(), Some("warroom"));
                break;
            }
        }
    }
}

#[tokio::test]
async fn duplicate_login_keeps_single_directory_entry() {
    let (addr, _handle) = start_relay().await;

    let mut first = TestClient::login(addr, "alice").await;
    first.recv_list_until_users(&["alice"]).await;

    let mut second = TestClient::login(addr, "alice").await;
    let (users, _) = second.recv_list().await;
    assert_eq!(users, vec!["alice"]);

    // The evicted session observes end of stream.
    let result = timeout(
        Duration::from_secs(5),
        codec::read_frame(
            &mut first.stream,
            Some(&first.cipher),
            DEFAULT_MAX_FRAME_SIZE,
        ),
    )
    .await
    .expect("recv timed out")
    .expect("decode failed");
    assert!(result.is_none());

    // The surviving session still works.
    second
        .send(&Packet::Message {
            text: "still here".to_string(),
            to: None,
            from: None,
            is_private: false,
            room: None,
        })
        .await;
    match second.recv().await {
        Packet::Message { text, .. } => assert_eq!(text, "still here"),
        other => panic!("expected Message, got {other:?}"),
    }
}

#[tokio::test]
async fn evicted_session_commands_are_ignored() {
    let (addr, _handle) = start_relay().await;

    let mut first = TestClient::login(addr, "alice").await;
    first.recv_list_until_users(&["alice"]).await;

    let mut second = TestClient::login(addr, "alice").await;
    second.recv_list_until_users(&["alice"]).await;

    // The evicted socket can still write. Its commands must not act on
    // the identity, which now belongs to the second connection.
    first
        .send(&Packet::RoomJoin {
            room: "Hideout".to_string(),
            password: None,
        })
        .await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    // The live session is still in the default room: its own room
    // broadcast comes back tagged with it, not with the stale join.
    second
        .send(&Packet::Message {
            text: "where am i".to_string(),
            to: None,
            from: None,
            is_private: false,
            room: None,
        })
        .await;
    loop {
        match second.recv().await {
            Packet::Message { text, room, .. } => {
                assert_eq!(text, "where am i");
                assert_eq!(room.as_deref(), Some(DEFAULT_ROOM));
                break;
            }
            Packet::ListUpdate { rooms, .. } => {
                assert!(!rooms.contains(&"Hideout".to_string()));
            }
            other => panic!("expected Message, got {other:?}"),
        }
    }
}
