// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Overlay mesh wire protocol.
//!
//! Every mesh connection carries a single outer length-prefixed frame
//! format; the first frame exchanged in both directions is a `Hello`
//! identifying the peer, every frame after that is a `Topic` envelope
//! wrapping one encoded record from `hdds_sdn_core::overlay::wire`.
//!
//! Wire format (all integers little-endian, matching the core crate's
//! record codec):
//! ```text
//! +----------------+------------------------------+
//! | Length (4B LE) | Envelope payload              |
//! +----------------+------------------------------+
//!
//! Envelope payload, Hello (kind = 0):
//! +------+-----------------+-----------+
//! | kind | writer_id (16B) | cid (2B)  |
//! +------+-----------------+-----------+
//!
//! Envelope payload, Topic (kind = 1):
//! +------+------------+------------------+
//! | kind | topic (1B) | record payload   |
//! +------+------------+------------------+
//! ```

use std::io::{self, Read, Write};

use hdds_sdn_core::overlay::Topic;
use hdds_sdn_core::topology::{Cid, WriterId};

const KIND_HELLO: u8 = 0;
const KIND_TOPIC: u8 = 1;

const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

fn topic_byte(topic: Topic) -> u8 {
    match topic {
        Topic::Switches => 0,
        Topic::Ports => 1,
        Topic::Links => 2,
        Topic::Hosts => 3,
    }
}

fn topic_from_byte(b: u8) -> io::Result<Topic> {
    match b {
        0 => Ok(Topic::Switches),
        1 => Ok(Topic::Ports),
        2 => Ok(Topic::Links),
        3 => Ok(Topic::Hosts),
        other => Err(io::Error::new(io::ErrorKind::InvalidData, format!("unknown topic byte {other}"))),
    }
}

/// One decoded mesh envelope.
#[derive(Debug, Clone)]
pub enum Envelope {
    /// First message on a freshly dialed or accepted connection, identifying
    /// the sender's overlay writer id and shard cid.
    Hello { writer_id: WriterId, cid: Cid },
    /// A topic record, still wire-encoded (the caller decodes it through
    /// `hdds_sdn_core::overlay::decode_topic_record`).
    Topic { topic: Topic, payload: Vec<u8> },
}

impl Envelope {
    fn encode(&self) -> Vec<u8> {
        match self {
            Envelope::Hello { writer_id, cid } => {
                let mut buf = Vec::with_capacity(1 + 16 + 2);
                buf.push(KIND_HELLO);
                buf.extend_from_slice(writer_id);
                buf.extend_from_slice(&cid.to_le_bytes());
                buf
            }
            Envelope::Topic { topic, payload } => {
                let mut buf = Vec::with_capacity(2 + payload.len());
                buf.push(KIND_TOPIC);
                buf.push(topic_byte(*topic));
                buf.extend_from_slice(payload);
                buf
            }
        }
    }

    fn decode(buf: &[u8]) -> io::Result<Self> {
        let Some(&kind) = buf.first() else {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "empty envelope"));
        };
        match kind {
            KIND_HELLO => {
                if buf.len() < 1 + 16 + 2 {
                    return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated hello"));
                }
                let mut writer_id = [0u8; 16];
                writer_id.copy_from_slice(&buf[1..17]);
                let cid = Cid::from_le_bytes([buf[17], buf[18]]);
                Ok(Envelope::Hello { writer_id, cid })
            }
            KIND_TOPIC => {
                if buf.len() < 2 {
                    return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated topic envelope"));
                }
                let topic = topic_from_byte(buf[1])?;
                Ok(Envelope::Topic { topic, payload: buf[2..].to_vec() })
            }
            other => Err(io::Error::new(io::ErrorKind::InvalidData, format!("unknown envelope kind {other}"))),
        }
    }
}

/// Writes one length-prefixed envelope frame.
pub fn write_frame<W: Write>(w: &mut W, envelope: &Envelope) -> io::Result<()> {
    let body = envelope.encode();
    let len = u32::try_from(body.len()).map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "frame too large"))?;
    w.write_all(&len.to_le_bytes())?;
    w.write_all(&body)?;
    w.flush()
}

/// Reads one length-prefixed envelope frame, blocking until it's complete.
pub fn read_frame<R: Read>(r: &mut R) -> io::Result<Envelope> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidData, format!("frame length {len} exceeds limit")));
    }
    let mut body = vec![0u8; len as usize];
    r.read_exact(&mut body)?;
    Envelope::decode(&body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_round_trips_through_a_frame() {
        let mut buf = Vec::new();
        let sent = Envelope::Hello { writer_id: [7u8; 16], cid: 3 };
        write_frame(&mut buf, &sent).unwrap();

        let mut cursor = &buf[..];
        let got = read_frame(&mut cursor).unwrap();
        match got {
            Envelope::Hello { writer_id, cid } => {
                assert_eq!(writer_id, [7u8; 16]);
                assert_eq!(cid, 3);
            }
            _ => panic!("expected hello"),
        }
    }

    #[test]
    fn topic_envelope_round_trips_with_payload() {
        let mut buf = Vec::new();
        let sent = Envelope::Topic { topic: Topic::Links, payload: vec![1, 2, 3, 4] };
        write_frame(&mut buf, &sent).unwrap();

        let mut cursor = &buf[..];
        let got = read_frame(&mut cursor).unwrap();
        match got {
            Envelope::Topic { topic: Topic::Links, payload } => assert_eq!(payload, vec![1, 2, 3, 4]),
            _ => panic!("expected links topic envelope"),
        }
    }

    #[test]
    fn oversized_length_prefix_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_FRAME_LEN + 1).to_le_bytes());
        let mut cursor = &buf[..];
        assert!(read_frame(&mut cursor).is_err());
    }
}
