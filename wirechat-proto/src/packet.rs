//! Wire format packet types for the `WireChat` protocol.
//!
//! The protocol has a closed vocabulary of commands, modeled as one enum
//! variant per command so the dispatch in the relay is checked at compile
//! time. Fields that the server injects before forwarding (`from`,
//! `sender`, `room`) are `Option` and absent in the client-originated
//! form of the packet.

use serde::{Deserialize, Serialize};

/// Room every identity is placed in at login. Always exists, never deleted.
pub const DEFAULT_ROOM: &str = "General";

/// Recipient value that marks a message as a room broadcast rather than
/// a private message.
pub const BROADCAST_RECIPIENT: &str = "All";

/// Sender name used for server-generated system messages.
pub const SYSTEM_SENDER: &str = "System";

/// A protocol packet: command tag plus its payload.
///
/// Packets are transient — constructed, serialized, transmitted, and
/// discarded. The relay never stores them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Packet {
    /// Client claims a display name. Must be the first packet on a
    /// connection.
    Login {
        /// The display name the client wants to be known by.
        username: String,
    },

    /// A text message, either room-scoped or private.
    Message {
        /// The message text.
        text: String,
        /// Recipient: `None` or [`BROADCAST_RECIPIENT`] for a room
        /// broadcast, otherwise a target identity (private message).
        to: Option<String>,
        /// Sender identity, injected by the server before delivery.
        from: Option<String>,
        /// Whether this copy was delivered as a private message.
        is_private: bool,
        /// Room the message was broadcast in, set by the server on
        /// room-scoped deliveries.
        room: Option<String>,
    },

    /// Client switches to a room, creating it on first join.
    RoomJoin {
        /// Target room name.
        room: String,
        /// Accepted but not verified; enforcement is a future hook.
        password: Option<String>,
    },

    /// An inline file transfer.
    File {
        /// Original file name.
        filename: String,
        /// File size in bytes as reported by the sender.
        size: u64,
        /// The file contents.
        content: Vec<u8>,
        /// Target identity, or `None` to share with the sender's room.
        to: Option<String>,
        /// Sender identity, injected by the server before delivery.
        from: Option<String>,
    },

    /// One JPEG-encoded video frame of a call. Relayed best-effort on the
    /// unencrypted fast path.
    VideoFrame {
        /// Identity of the call partner.
        target: String,
        /// JPEG image bytes.
        frame: Vec<u8>,
        /// Sender identity, injected by the server before forwarding.
        sender: Option<String>,
    },

    /// One chunk of raw PCM call audio. Relayed best-effort on the
    /// unencrypted fast path.
    AudioChunk {
        /// Identity of the call partner.
        target: String,
        /// Raw PCM bytes.
        chunk: Vec<u8>,
        /// Sender identity, injected by the server before forwarding.
        sender: Option<String>,
    },

    /// Server-to-client directory snapshot, broadcast after every
    /// directory change.
    ListUpdate {
        /// All online identities, sorted.
        users: Vec<String>,
        /// All known room names, sorted.
        rooms: Vec<String>,
    },

    /// Call hang-up. Client-to-server carries the partner identity;
    /// the forwarded server-to-client copy carries no target.
    EndCall {
        /// Identity of the call partner to notify.
        target: Option<String>,
    },
}

impl Packet {
    /// Returns the command tag name, for logging.
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::Login { .. } => "LOGIN",
            Self::Message { .. } => "MESSAGE",
            Self::RoomJoin { .. } => "ROOM_JOIN",
            Self::File { .. } => "FILE",
            Self::VideoFrame { .. } => "VIDEO_FRAME",
            Self::AudioChunk { .. } => "AUDIO_CHUNK",
            Self::ListUpdate { .. } => "LIST_UPDATE",
            Self::EndCall { .. } => "END_CALL",
        }
    }

    /// Builds the system acknowledgment message sent to a connection
    /// that just joined a room.
    #[must_use]
    pub fn system_message(text: String) -> Self {
        Self::Message {
            text,
            to: None,
            from: Some(SYSTEM_SENDER.to_string()),
            is_private: false,
            room: None,
        }
    }
}
