//! Command/status multicast dispatch loop (spec §4.10-§4.11): decodes each
//! incoming packet, posts it to an existing channel's inbox, or creates a
//! new one when the packet carries a full tuning request. Grounded on the
//! teacher's `MessageRouter::run_stack` dispatch loop, narrowed from a PDU
//! router to one TLV packet type.

use std::net::SocketAddrV4;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fcsdr_channel::{supervisor, ChannelCommand, ChannelTable};
use fcsdr_config::{ChannelPreset, DaemonConfig};
use fcsdr_proto::{MulticastTransport, Packet, PacketKind, Tag, Value};

/// Reads the `StreamId` field every command/status packet carries (spec
/// §4.10: first field in the TLV sequence, though this just searches by
/// tag rather than assuming position).
fn stream_id(packet: &Packet) -> Option<u32> {
    packet.fields.iter().find_map(|f| match (&f.tag, &f.value) {
        (Tag::StreamId, Value::Int(v)) => Some(*v as u32),
        _ => None,
    })
}

/// Runs until `running` clears, decoding command packets off the
/// command/status multicast group and dispatching them to the channel
/// table. Blocks in short increments so it notices shutdown promptly.
pub fn run(
    group: SocketAddrV4,
    presets: Vec<ChannelPreset>,
    table: Arc<ChannelTable>,
    ctx: Arc<supervisor::EngineContext>,
    audio: supervisor::AudioSink,
    running: Arc<AtomicBool>,
) {
    let transport = match MulticastTransport::join(group, Duration::from_millis(200)) {
        Ok(t) => t,
        Err(err) => {
            tracing::error!(%err, "cannot join command/status multicast group, dispatch thread exiting");
            return;
        }
    };

    while running.load(Ordering::SeqCst) {
        table.reap();
        let received = match transport.recv() {
            Ok(Some(r)) => r,
            Ok(None) => continue,
            Err(err) => {
                tracing::warn!(%err, "command/status socket read error");
                continue;
            }
        };

        let packet = match Packet::decode(&received.payload) {
            Ok(p) => p,
            Err(err) => {
                tracing::warn!(%err, from = %received.from, "dropped malformed command/status packet");
                continue;
            }
        };
        if packet.kind != PacketKind::Command {
            continue;
        }
        let Some(id) = stream_id(&packet) else {
            tracing::warn!(from = %received.from, "command packet missing StreamId, ignored");
            continue;
        };

        let command = ChannelCommand::from_packet(&packet, &presets);
        if let Some(handle) = table.get(id) {
            handle.post_command(command);
            continue;
        }

        // A miss with a demod kind present is a full tuning request (spec
        // §4.11); anything else (a status-only poll for a channel that
        // doesn't exist) is silently ignored.
        if command.requested_demod_kind.is_none() {
            continue;
        }
        if let Err(err) = supervisor::spawn_channel(id, command, Arc::clone(&ctx), Arc::clone(&table), Arc::clone(&audio)) {
            tracing::warn!(stream_id = id, %err, "failed to create channel");
        }
    }
}

pub fn command_group(cfg: &DaemonConfig) -> Option<SocketAddrV4> {
    cfg.net.command_mcast_addr.parse().ok()
}
