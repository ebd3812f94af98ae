//! Relay server core: shared state, TCP listener, and per-connection
//! handlers.
//!
//! One handler task owns each accepted socket. The handler decodes one
//! packet at a time, applies it to the shared [`Registry`], and hands
//! deliveries to the router. A dedicated writer task per connection drains
//! the outbound frame channel, so a slow receiver never blocks the sender
//! that is routing to it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::mpsc;
use wirechat_proto::codec::{self, DEFAULT_MAX_FRAME_SIZE};
use wirechat_proto::crypto::{CryptoError, FrameCipher};
use wirechat_proto::packet::{BROADCAST_RECIPIENT, DEFAULT_ROOM, Packet};

use crate::config::RelayConfig;
use crate::registry::Registry;
use crate::router;

/// Shared relay server state: the directory and the frame cipher.
pub struct RelayState {
    /// The single source of truth for identities and room memberships.
    pub registry: Registry,
    cipher: FrameCipher,
    max_frame_size: usize,
    next_conn_id: AtomicU64,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayState {
    /// Creates relay state with the built-in development key and default
    /// limits.
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: Registry::new(DEFAULT_ROOM),
            cipher: FrameCipher::default(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            next_conn_id: AtomicU64::new(1),
        }
    }

    /// Creates relay state from a resolved [`RelayConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKey`] if the configured frame key is
    /// not 64 hex characters.
    pub fn with_config(config: &RelayConfig) -> Result<Self, CryptoError> {
        let cipher = match config.frame_key.as_deref() {
            Some(hex) => FrameCipher::from_hex(hex)?,
            None => FrameCipher::default(),
        };
        Ok(Self {
            registry: Registry::new(&config.default_room),
            cipher,
            max_frame_size: config.max_frame_size,
            next_conn_id: AtomicU64::new(1),
        })
    }

    /// The pre-shared frame cipher for this server.
    #[must_use]
    pub const fn cipher(&self) -> &FrameCipher {
        &self.cipher
    }

    /// Drops every registered connection handle, closing all outbound
    /// channels. Connected clients observe end of stream. Useful for
    /// graceful shutdown and testing.
    pub async fn close_all_connections(&self) {
        tracing::info!("closing all connections");
        self.registry.drain_all().await;
    }

    fn take_conn_id(&self) -> u64 {
        self.next_conn_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// Handles one accepted TCP connection for its whole lifetime.
///
/// The connection lifecycle:
/// 1. Wait for a LOGIN packet; anything else closes the connection.
/// 2. Register the identity (evicting a duplicate login) and broadcast
///    the updated directory.
/// 3. Enter the packet loop, dispatching by command tag.
/// 4. On end of stream or any decode error, unregister and broadcast the
///    updated directory.
pub async fn handle_connection(stream: TcpStream, state: Arc<RelayState>) {
    let peer = stream.peer_addr().ok();
    let (mut read_half, mut write_half) = stream.into_split();

    let Some(username) = wait_for_login(&mut read_half, &state).await else {
        tracing::warn!(peer = ?peer, "connection closed before login");
        return;
    };

    let conn_id = state.take_conn_id();
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();

    if let Some(old_sender) = state.registry.register(&username, conn_id, tx).await {
        tracing::info!(user = %username, "duplicate login, evicting old session");
        drop(old_sender);
    }
    tracing::info!(user = %username, peer = ?peer, "logged in");

    // Writer task: drains the outbound channel until the registry entry
    // (the last sender) is dropped or the peer stops accepting writes.
    let writer_user = username.clone();
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if write_half.write_all(&frame).await.is_err() {
                tracing::debug!(user = %writer_user, "write failed, stopping writer");
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    router::broadcast_directory(&state.registry, state.cipher()).await;

    // Packet loop: strictly one packet at a time, in arrival order.
    loop {
        match codec::read_frame(
            &mut read_half,
            Some(state.cipher()),
            state.max_frame_size,
        )
        .await
        {
            Ok(Some(packet)) => {
                // A session evicted by a duplicate login must stop
                // acting under the shared name immediately.
                if !state.registry.owns(&username, conn_id).await {
                    tracing::info!(user = %username, "session evicted, closing");
                    break;
                }
                dispatch(&state, &username, packet).await;
            }
            Ok(None) => break,
            Err(e) => {
                // A protocol error leaves the stream out of alignment;
                // treat it exactly like a disconnect.
                tracing::warn!(user = %username, error = %e, "dropping connection");
                break;
            }
        }
    }

    if state.registry.unregister(&username, conn_id).await {
        router::broadcast_directory(&state.registry, state.cipher()).await;
    }
    // The registry entry held the last sender, so the writer drains its
    // channel and exits once the entry is gone (or already did, if this
    // session was evicted).
    let _ = writer.await;
    tracing::info!(user = %username, "disconnected");
}

/// Waits for the first packet on a new connection, expecting LOGIN.
///
/// Returns the claimed identity, or `None` if the stream closes, the
/// first packet decodes to anything else, or the name is empty.
async fn wait_for_login(read_half: &mut OwnedReadHalf, state: &RelayState) -> Option<String> {
    match codec::read_frame(read_half, Some(state.cipher()), state.max_frame_size).await {
        Ok(Some(Packet::Login { username })) => {
            if username.is_empty() {
                tracing::warn!("received LOGIN with empty username");
                return None;
            }
            Some(username)
        }
        Ok(Some(other)) => {
            tracing::warn!(tag = other.tag(), "expected LOGIN, got different packet");
            None
        }
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(error = %e, "failed to decode login packet");
            None
        }
    }
}

/// Applies one decoded packet from an active connection.
async fn dispatch(state: &Arc<RelayState>, username: &str, packet: Packet) {
    match packet {
        Packet::Login { username: claimed } => {
            tracing::warn!(
                user = %username,
                claimed = %claimed,
                "LOGIN on active connection ignored"
            );
        }
        Packet::Message { text, to, .. } => {
            handle_message(state, username, text, to).await;
        }
        Packet::RoomJoin { room, password } => {
            handle_room_join(state, username, &room, password.as_deref()).await;
        }
        Packet::File {
            filename,
            size,
            content,
            to,
            ..
        } => {
            handle_file(state, username, filename, size, content, to).await;
        }
        Packet::VideoFrame { target, frame, .. } => {
            let forwarded = Packet::VideoFrame {
                target: target.clone(),
                frame,
                sender: Some(username.to_string()),
            };
            // Unencrypted fast path; offline target drops the frame.
            router::deliver_to_identity(&state.registry, None, &forwarded, &target).await;
        }
        Packet::AudioChunk { target, chunk, .. } => {
            let forwarded = Packet::AudioChunk {
                target: target.clone(),
                chunk,
                sender: Some(username.to_string()),
            };
            router::deliver_to_identity(&state.registry, None, &forwarded, &target).await;
        }
        Packet::EndCall { target: Some(target) } => {
            let notice = Packet::EndCall { target: None };
            router::deliver_to_identity(&state.registry, Some(state.cipher()), &notice, &target)
                .await;
        }
        Packet::EndCall { target: None } => {
            tracing::debug!(user = %username, "END_CALL without target ignored");
        }
        Packet::ListUpdate { .. } => {
            tracing::warn!(user = %username, "server-only LIST_UPDATE from client ignored");
        }
    }
}

/// Routes a MESSAGE: room broadcast unless an explicit recipient other
/// than the broadcast marker is named.
async fn handle_message(
    state: &Arc<RelayState>,
    username: &str,
    text: String,
    to: Option<String>,
) {
    let private_target = to.filter(|t| t != BROADCAST_RECIPIENT);
    if let Some(target) = private_target {
        let packet = Packet::Message {
            text,
            to: Some(target.clone()),
            from: Some(username.to_string()),
            is_private: true,
            room: None,
        };
        // Echo a confirmation copy back to the sender only when the
        // target was reachable; an offline target is a silent miss.
        if router::deliver_to_identity(&state.registry, Some(state.cipher()), &packet, &target)
            .await
        {
            router::deliver_to_identity(&state.registry, Some(state.cipher()), &packet, username)
                .await;
        }
    } else {
        let Some(room) = state.registry.room_of(username).await else {
            return;
        };
        let packet = Packet::Message {
            text,
            to: None,
            from: Some(username.to_string()),
            is_private: false,
            room: Some(room),
        };
        router::deliver_to_own_room(&state.registry, state.cipher(), &packet, username, true)
            .await;
    }
}

/// Moves the sender into a room, then announces the new directory and
/// acknowledges the join to the sender alone.
async fn handle_room_join(
    state: &Arc<RelayState>,
    username: &str,
    room: &str,
    password: Option<&str>,
) {
    if password.is_some() {
        // Accepted but never verified; enforcement is a future hook.
        tracing::debug!(user = %username, room = %room, "room password ignored");
    }
    if !state.registry.join_room(username, room).await {
        return;
    }
    tracing::info!(user = %username, room = %room, "joined room");
    router::broadcast_directory(&state.registry, state.cipher()).await;

    let ack = Packet::system_message(format!("Joined {room}"));
    router::deliver_to_identity(&state.registry, Some(state.cipher()), &ack, username).await;
}

/// Routes a FILE to its named recipient, or to the rest of the sender's
/// room when unaddressed.
async fn handle_file(
    state: &Arc<RelayState>,
    username: &str,
    filename: String,
    size: u64,
    content: Vec<u8>,
    to: Option<String>,
) {
    let packet = Packet::File {
        filename,
        size,
        content,
        to: to.clone(),
        from: Some(username.to_string()),
    };
    if let Some(target) = to {
        router::deliver_to_identity(&state.registry, Some(state.cipher()), &packet, &target)
            .await;
    } else {
        router::deliver_to_own_room(&state.registry, state.cipher(), &packet, username, false)
            .await;
    }
}

/// Starts the relay server on the given address and returns the bound
/// address and the accept-loop join handle.
///
/// This is the primary entry point used by both `main.rs` and test code.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(RelayState::new())).await
}

/// Starts the relay server with a pre-configured [`RelayState`].
///
/// Use [`RelayState::with_config`] to build state from a resolved
/// [`RelayConfig`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<RelayState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    tracing::debug!(peer = %peer, "accepted connection");
                    let state = Arc::clone(&state);
                    tokio::spawn(handle_connection(stream, state));
                }
                Err(e) => {
                    // One failed accept must not take the listener down.
                    tracing::warn!(error = %e, "accept failed");
                }
            }
        }
    });

    Ok((bound_addr, handle))
}
