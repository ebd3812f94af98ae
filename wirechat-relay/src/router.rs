//! Fan-out delivery of encoded frames to connection channels.
//!
//! Every send is best-effort: a target whose channel has closed (handler
//! mid-teardown) is logged and skipped, never surfaced to the original
//! sender. Target sets are snapshotted from the registry before sending,
//! so no registry lock is held during delivery.

use wirechat_proto::codec;
use wirechat_proto::crypto::FrameCipher;
use wirechat_proto::packet::Packet;

use crate::registry::{FrameSender, Registry};

/// Sends one encoded frame to each target, skipping closed channels.
///
/// Returns the number of targets the frame was handed to.
pub fn deliver(frame: &[u8], targets: &[FrameSender]) -> usize {
    let mut delivered = 0;
    for target in targets {
        if target.send(frame.to_vec()).is_err() {
            tracing::debug!("delivery target channel closed, skipping");
        } else {
            delivered += 1;
        }
    }
    delivered
}

/// Encodes a packet and sends it to a single identity, if online.
///
/// Offline targets and encode failures are routing misses: the packet is
/// dropped silently, with a log line as the only trace. Returns whether
/// the frame was handed to a live connection.
pub async fn deliver_to_identity(
    registry: &Registry,
    cipher: Option<&FrameCipher>,
    packet: &Packet,
    target: &str,
) -> bool {
    let Some(sender) = registry.lookup(target).await else {
        tracing::debug!(target = %target, tag = packet.tag(), "target offline, dropping packet");
        return false;
    };
    let frame = match codec::encode_framed(packet, cipher) {
        Ok(f) => f,
        Err(e) => {
            tracing::error!(error = %e, tag = packet.tag(), "failed to encode packet");
            return false;
        }
    };
    deliver(&frame, &[sender]) == 1
}

/// Encodes a packet and sends it to every current member of the sender's
/// room, snapshotting the member set before sending.
///
/// Returns the room name, or `None` if the sender is not registered.
pub async fn deliver_to_own_room(
    registry: &Registry,
    cipher: &FrameCipher,
    packet: &Packet,
    username: &str,
    include_self: bool,
) -> Option<String> {
    let (room, targets) = registry.room_targets_of(username, include_self).await?;
    match codec::encode_framed(packet, Some(cipher)) {
        Ok(frame) => {
            let delivered = deliver(&frame, &targets);
            tracing::debug!(
                room = %room,
                tag = packet.tag(),
                delivered = delivered,
                "room delivery"
            );
        }
        Err(e) => {
            tracing::error!(error = %e, tag = packet.tag(), "failed to encode packet");
        }
    }
    Some(room)
}

/// Builds a directory snapshot and sends a `LIST_UPDATE` to every
/// registered connection.
pub async fn broadcast_directory(registry: &Registry, cipher: &FrameCipher) {
    let (users, rooms) = registry.snapshot().await;
    let packet = Packet::ListUpdate { users, rooms };
    match codec::encode_framed(&packet, Some(cipher)) {
        Ok(frame) => {
            let targets = registry.all_targets().await;
            deliver(&frame, &targets);
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to encode directory snapshot");
        }
    }
}
