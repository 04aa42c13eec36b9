// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! One overlay mesh connection: handshake, a blocking read loop that
//! decodes frames into `Overlay::deliver` calls, and a background writer
//! thread that serializes outbound publishes onto the socket.

use std::net::TcpStream;
use std::sync::Arc;

use crossbeam::channel::{unbounded, Sender};
use hdds_sdn_core::overlay::{decode_topic_record, Overlay, PeerSink, Topic};
use hdds_sdn_core::topology::{Cid, WriterId};

use super::protocol::{read_frame, write_frame, Envelope};

/// Outbound `PeerSink` for one connected peer: publishes are handed to a
/// channel and written by a dedicated thread so a slow peer never blocks
/// the publisher (spec §4.4's best-effort contract).
pub struct TcpPeerSink {
    tx: Sender<(Topic, Vec<u8>)>,
}

impl PeerSink for TcpPeerSink {
    fn send(&self, topic: Topic, payload: &[u8]) {
        if self.tx.send((topic, payload.to_vec())).is_err() {
            log::debug!("[connection::TcpPeerSink] writer thread gone, dropping publish");
        }
    }
}

/// Performs the handshake on a fresh connection (write our `Hello` first,
/// then read theirs) and returns the peer's identity plus a registered
/// sink. Used identically whether the socket was dialed or accepted.
fn handshake(
    stream: &TcpStream,
    self_writer_id: WriterId,
    self_cid: Cid,
) -> std::io::Result<(WriterId, Cid)> {
    let mut write_half = stream.try_clone()?;
    write_frame(&mut write_half, &Envelope::Hello { writer_id: self_writer_id, cid: self_cid })?;

    let mut read_half = stream.try_clone()?;
    match read_frame(&mut read_half)? {
        Envelope::Hello { writer_id, cid } => Ok((writer_id, cid)),
        Envelope::Topic { .. } => Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "expected hello as first frame, got topic envelope",
        )),
    }
}

/// Runs one peer connection to completion: handshakes, registers a
/// `TcpPeerSink` with the overlay, spawns the writer thread, then blocks
/// reading frames until the socket closes or a frame fails to decode.
/// Always deregisters the peer on the way out, however it ends.
pub fn run_connection(stream: TcpStream, overlay: Arc<Overlay>, self_cid: Cid) -> std::io::Result<()> {
    stream.set_nodelay(true).ok();
    let (peer_writer_id, peer_cid) = handshake(&stream, overlay.self_writer_id(), self_cid)?;
    log::info!(
        "[connection::run_connection] peer {} (cid={}) connected",
        hex(peer_writer_id),
        peer_cid
    );

    let (tx, rx) = unbounded::<(Topic, Vec<u8>)>();
    overlay.register_peer(peer_writer_id, Arc::new(TcpPeerSink { tx }));
    overlay.notify_new_subscription();

    let mut writer_stream = stream.try_clone()?;
    let writer_handle = std::thread::Builder::new()
        .name(format!("mesh-writer-{}", hex(peer_writer_id)))
        .spawn(move || {
            for (topic, payload) in rx.iter() {
                if write_frame(&mut writer_stream, &Envelope::Topic { topic, payload }).is_err() {
                    break;
                }
            }
        })
        .expect("spawn mesh writer thread");

    let mut reader_stream = stream;
    let result = loop {
        match read_frame(&mut reader_stream) {
            Ok(Envelope::Topic { topic, payload }) => match decode_topic_record(topic, &payload) {
                Ok(record) => overlay.deliver(topic, record, peer_writer_id),
                Err(e) => log::debug!(
                    "[connection::run_connection] drop malformed {topic:?} record from {}: {e}",
                    hex(peer_writer_id)
                ),
            },
            Ok(Envelope::Hello { .. }) => {
                log::warn!("[connection::run_connection] unexpected hello mid-stream from {}", hex(peer_writer_id));
            }
            Err(e) => break Err(e),
        }
        if !overlay.is_active() {
            break Ok(());
        }
    };

    overlay.remove_peer(peer_writer_id);
    drop(writer_handle);
    log::info!("[connection::run_connection] peer {} disconnected", hex(peer_writer_id));
    result
}

fn hex(id: WriterId) -> String {
    id.iter().map(|b| format!("{b:02x}")).collect()
}
