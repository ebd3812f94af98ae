//! Directory and room registry for the relay server.
//!
//! The registry is the single shared mutable resource in the server: one
//! lock over the identity directory and the room membership sets. Every
//! mutation and every read that computes a routing target set happens
//! under that lock, so a broadcast can never iterate a room while another
//! handler is mutating it. The lock is never held across a network send —
//! delivery goes through per-connection channels.

use std::collections::{HashMap, HashSet};

use tokio::sync::{RwLock, mpsc};

/// Sender half of a connection's outbound frame channel. The registry
/// holds these as non-owning delivery handles; connection lifecycle stays
/// with the handler task.
pub type FrameSender = mpsc::UnboundedSender<Vec<u8>>;

/// Directory entry for one online identity.
#[derive(Debug)]
struct Entry {
    /// Identifies which connection registered this entry, so a stale
    /// handler's teardown cannot evict a replacement login.
    conn_id: u64,
    sender: FrameSender,
    room: String,
}

/// Mutable state guarded by the registry lock.
#[derive(Debug)]
struct Directory {
    users: HashMap<String, Entry>,
    rooms: HashMap<String, HashSet<String>>,
}

/// Shared directory of online identities and room memberships.
///
/// Constructed once at startup with the default room already present; the
/// default room is never deleted. Other rooms are created on first join
/// and persist even when empty.
#[derive(Debug)]
pub struct Registry {
    inner: RwLock<Directory>,
    default_room: String,
}

impl Registry {
    /// Creates an empty registry containing only the default room.
    #[must_use]
    pub fn new(default_room: &str) -> Self {
        let mut rooms = HashMap::new();
        rooms.insert(default_room.to_string(), HashSet::new());
        Self {
            inner: RwLock::new(Directory {
                users: HashMap::new(),
                rooms,
            }),
            default_room: default_room.to_string(),
        }
    }

    /// Name of the default room.
    #[must_use]
    pub fn default_room(&self) -> &str {
        &self.default_room
    }

    /// Registers an identity, placing it in the default room.
    ///
    /// A duplicate login evicts the old session: the previous sender is
    /// returned (dropping it closes the old connection's writer) and the
    /// identity is moved out of whatever room the old session occupied.
    pub async fn register(
        &self,
        username: &str,
        conn_id: u64,
        sender: FrameSender,
    ) -> Option<FrameSender> {
        let mut dir = self.inner.write().await;
        let evicted = dir.users.remove(username).map(|old| {
            if let Some(members) = dir.rooms.get_mut(&old.room) {
                members.remove(username);
            }
            old.sender
        });
        dir.users.insert(
            username.to_string(),
            Entry {
                conn_id,
                sender,
                room: self.default_room.clone(),
            },
        );
        dir.rooms
            .entry(self.default_room.clone())
            .or_default()
            .insert(username.to_string());
        evicted
    }

    /// Removes an identity from the directory and its current room.
    ///
    /// Only removes the entry if `conn_id` matches the registered
    /// connection, so teardown of an evicted session leaves its
    /// replacement untouched. Returns whether an entry was removed.
    /// Safe to call for identities that never registered.
    pub async fn unregister(&self, username: &str, conn_id: u64) -> bool {
        let mut dir = self.inner.write().await;
        match dir.users.get(username) {
            Some(entry) if entry.conn_id == conn_id => {}
            _ => return false,
        }
        if let Some(entry) = dir.users.remove(username)
            && let Some(members) = dir.rooms.get_mut(&entry.room)
        {
            members.remove(username);
        }
        true
    }

    /// Returns whether `conn_id` is the connection currently registered
    /// for the identity. An evicted session's handler checks this before
    /// acting, so a stale connection can never speak for its replacement.
    pub async fn owns(&self, username: &str, conn_id: u64) -> bool {
        let dir = self.inner.read().await;
        dir.users
            .get(username)
            .is_some_and(|e| e.conn_id == conn_id)
    }

    /// Moves an identity into a room, creating the room on first join.
    ///
    /// Returns `false` if the identity is not registered.
    pub async fn join_room(&self, username: &str, room: &str) -> bool {
        let mut dir = self.inner.write().await;
        let Some(current) = dir.users.get(username).map(|e| e.room.clone()) else {
            return false;
        };
        if let Some(members) = dir.rooms.get_mut(&current) {
            members.remove(username);
        }
        dir.rooms
            .entry(room.to_string())
            .or_default()
            .insert(username.to_string());
        if let Some(entry) = dir.users.get_mut(username) {
            entry.room = room.to_string();
        }
        true
    }

    /// Removes an identity from a room's member set without touching the
    /// directory. Removing a non-member is a no-op.
    pub async fn leave_room(&self, username: &str, room: &str) {
        let mut dir = self.inner.write().await;
        if let Some(members) = dir.rooms.get_mut(room) {
            members.remove(username);
        }
    }

    /// Returns the sorted lists of online identities and known room names.
    pub async fn snapshot(&self) -> (Vec<String>, Vec<String>) {
        let dir = self.inner.read().await;
        let mut users: Vec<String> = dir.users.keys().cloned().collect();
        let mut rooms: Vec<String> = dir.rooms.keys().cloned().collect();
        users.sort();
        rooms.sort();
        (users, rooms)
    }

    /// Returns the delivery handle for an identity, if online.
    pub async fn lookup(&self, username: &str) -> Option<FrameSender> {
        let dir = self.inner.read().await;
        dir.users.get(username).map(|e| e.sender.clone())
    }

    /// Returns the room an identity currently occupies, if online.
    pub async fn room_of(&self, username: &str) -> Option<String> {
        let dir = self.inner.read().await;
        dir.users.get(username).map(|e| e.room.clone())
    }

    /// Returns the sorted member names of a room. Unknown rooms are empty.
    pub async fn members_of(&self, room: &str) -> Vec<String> {
        let dir = self.inner.read().await;
        let mut members: Vec<String> = dir
            .rooms
            .get(room)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default();
        members.sort();
        members
    }

    /// Resolves the routing target set for a room broadcast from
    /// `username`: the sender's current room and the delivery handles of
    /// its members, snapshotted under a single lock acquisition.
    ///
    /// Returns `None` if the identity is not registered. With
    /// `include_self` false, the sender's own handle is left out.
    pub async fn room_targets_of(
        &self,
        username: &str,
        include_self: bool,
    ) -> Option<(String, Vec<FrameSender>)> {
        let dir = self.inner.read().await;
        let room = dir.users.get(username)?.room.clone();
        let targets = dir
            .rooms
            .get(&room)
            .map(|members| {
                members
                    .iter()
                    .filter(|member| include_self || member.as_str() != username)
                    .filter_map(|member| dir.users.get(member).map(|e| e.sender.clone()))
                    .collect()
            })
            .unwrap_or_default();
        Some((room, targets))
    }

    /// Returns delivery handles for every registered connection.
    pub async fn all_targets(&self) -> Vec<FrameSender> {
        let dir = self.inner.read().await;
        dir.users.values().map(|e| e.sender.clone()).collect()
    }

    /// Drops every directory entry and empties every room. Dropping the
    /// senders closes each connection's outbound channel, which shuts the
    /// connection down. Room names (and the default room) survive.
    pub async fn drain_all(&self) {
        let mut dir = self.inner.write().await;
        dir.users.clear();
        for members in dir.rooms.values_mut() {
            members.clear();
        }
    }
}
