// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fixed-width, little-endian wire records for the four overlay topics
//! (spec §6). Variable-length string fields (`name`, `hw_addr`, `mac`,
//! `ofp`, `ipv4`, `ipv6`) are carried as a one-byte length prefix followed
//! by UTF-8 bytes — the spec's byte tables fix every numeric field's width
//! but leave string encoding unstated; a length-prefix is the natural
//! choice given the rest of the framing is length-prefixed top to bottom
//! (see `discovery_server/protocol.rs`'s length-prefixed message framing).

use crate::error::OverlayError;
use crate::topology::WriterId;

type Result<T> = std::result::Result<T, OverlayError>;

fn write_str(buf: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    let len = bytes.len().min(u8::MAX as usize) as u8;
    buf.push(len);
    buf.extend_from_slice(&bytes[..len as usize]);
}

fn read_str(buf: &[u8], pos: &mut usize, topic: &'static str) -> Result<String> {
    let len = *buf.get(*pos).ok_or(OverlayError::Truncated { topic, have: buf.len(), want: *pos + 1 })? as usize;
    *pos += 1;
    let end = *pos + len;
    let slice = buf
        .get(*pos..end)
        .ok_or(OverlayError::Truncated { topic, have: buf.len(), want: end })?;
    *pos = end;
    Ok(String::from_utf8_lossy(slice).into_owned())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchOpWire {
    Leave = 0,
    Enter = 1,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchRecord {
    pub writer_id: WriterId,
    pub cid: i16,
    pub dpid: i64,
    pub port_count: i16,
    pub op: SwitchOpWire,
}

impl SwitchRecord {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(16 + 2 + 8 + 2 + 1);
        buf.extend_from_slice(&self.writer_id);
        buf.extend_from_slice(&self.cid.to_le_bytes());
        buf.extend_from_slice(&self.dpid.to_le_bytes());
        buf.extend_from_slice(&self.port_count.to_le_bytes());
        buf.push(self.op as u8);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        const WANT: usize = 16 + 2 + 8 + 2 + 1;
        if buf.len() < WANT {
            return Err(OverlayError::Truncated { topic: "switch", have: buf.len(), want: WANT });
        }
        let mut writer_id = [0u8; 16];
        writer_id.copy_from_slice(&buf[0..16]);
        let cid = i16::from_le_bytes(buf[16..18].try_into().unwrap());
        let dpid = i64::from_le_bytes(buf[18..26].try_into().unwrap());
        let port_count = i16::from_le_bytes(buf[26..28].try_into().unwrap());
        let op = match buf[28] {
            0 => SwitchOpWire::Leave,
            1 => SwitchOpWire::Enter,
            op => return Err(OverlayError::BadOp { topic: "switch", op }),
        };
        Ok(Self { writer_id, cid, dpid, port_count, op })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortOpWire {
    Delete = 0,
    Add = 1,
    Modify = 2,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PortRecord {
    pub dpid: i64,
    pub ofp: String,
    pub config: i16,
    pub state: i16,
    pub port_no: i16,
    pub hw_addr: String,
    pub name: String,
    pub is_live: bool,
    pub op: PortOpWire,
}

impl PortRecord {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(32);
        buf.extend_from_slice(&self.dpid.to_le_bytes());
        write_str(&mut buf, &self.ofp);
        buf.extend_from_slice(&self.config.to_le_bytes());
        buf.extend_from_slice(&self.state.to_le_bytes());
        buf.extend_from_slice(&self.port_no.to_le_bytes());
        write_str(&mut buf, &self.hw_addr);
        write_str(&mut buf, &self.name);
        buf.push(self.is_live as u8);
        buf.push(self.op as u8);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let topic = "port";
        let mut pos = 0usize;
        let need = |pos: usize, n: usize| -> Result<()> {
            if buf.len() < pos + n {
                Err(OverlayError::Truncated { topic, have: buf.len(), want: pos + n })
            } else {
                Ok(())
            }
        };
        need(pos, 8)?;
        let dpid = i64::from_le_bytes(buf[pos..pos + 8].try_into().unwrap());
        pos += 8;
        let ofp = read_str(buf, &mut pos, topic)?;
        need(pos, 2)?;
        let config = i16::from_le_bytes(buf[pos..pos + 2].try_into().unwrap());
        pos += 2;
        need(pos, 2)?;
        let state = i16::from_le_bytes(buf[pos..pos + 2].try_into().unwrap());
        pos += 2;
        need(pos, 2)?;
        let port_no = i16::from_le_bytes(buf[pos..pos + 2].try_into().unwrap());
        pos += 2;
        let hw_addr = read_str(buf, &mut pos, topic)?;
        let name = read_str(buf, &mut pos, topic)?;
        need(pos, 2)?;
        let is_live = buf[pos] != 0;
        let op = match buf[pos + 1] {
            0 => PortOpWire::Delete,
            1 => PortOpWire::Add,
            2 => PortOpWire::Modify,
            op => return Err(OverlayError::BadOp { topic, op }),
        };
        Ok(Self { dpid, ofp, config, state, port_no, hw_addr, name, is_live, op })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOpWire {
    Delete = 0,
    Add = 1,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkRecord {
    pub src_dpid: i64,
    pub src_port_no: i16,
    pub dst_dpid: i64,
    pub dst_port_no: i16,
    pub op: LinkOpWire,
}

impl LinkRecord {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + 2 + 8 + 2 + 1);
        buf.extend_from_slice(&self.src_dpid.to_le_bytes());
        buf.extend_from_slice(&self.src_port_no.to_le_bytes());
        buf.extend_from_slice(&self.dst_dpid.to_le_bytes());
        buf.extend_from_slice(&self.dst_port_no.to_le_bytes());
        buf.push(self.op as u8);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        const WANT: usize = 8 + 2 + 8 + 2 + 1;
        if buf.len() < WANT {
            return Err(OverlayError::Truncated { topic: "link", have: buf.len(), want: WANT });
        }
        let src_dpid = i64::from_le_bytes(buf[0..8].try_into().unwrap());
        let src_port_no = i16::from_le_bytes(buf[8..10].try_into().unwrap());
        let dst_dpid = i64::from_le_bytes(buf[10..18].try_into().unwrap());
        let dst_port_no = i16::from_le_bytes(buf[18..20].try_into().unwrap());
        let op = match buf[20] {
            0 => LinkOpWire::Delete,
            1 => LinkOpWire::Add,
            op => return Err(OverlayError::BadOp { topic: "link", op }),
        };
        Ok(Self { src_dpid, src_port_no, dst_dpid, dst_port_no, op })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostOpWire {
    Delete = 0,
    Add = 1,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HostRecord {
    pub dpid: i64,
    pub port_no: i16,
    pub mac: String,
    pub ipv4: String,
    pub ipv6: String,
    pub op: HostOpWire,
}

impl HostRecord {
    /// The heartbeat record per spec §4.4: `dpid=0, port_no=0,
    /// mac="00:00:00:00:00:00"`, published once per second on the hosts
    /// topic.
    pub fn heartbeat() -> Self {
        Self {
            dpid: 0,
            port_no: 0,
            mac: "00:00:00:00:00:00".to_string(),
            ipv4: String::new(),
            ipv6: String::new(),
            op: HostOpWire::Add,
        }
    }

    pub fn is_heartbeat(&self) -> bool {
        self.dpid == 0 && self.port_no == 0 && self.mac == "00:00:00:00:00:00"
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(32);
        buf.extend_from_slice(&self.dpid.to_le_bytes());
        buf.extend_from_slice(&self.port_no.to_le_bytes());
        write_str(&mut buf, &self.mac);
        write_str(&mut buf, &self.ipv4);
        write_str(&mut buf, &self.ipv6);
        buf.push(self.op as u8);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let topic = "host";
        let mut pos = 0usize;
        if buf.len() < 10 {
            return Err(OverlayError::Truncated { topic, have: buf.len(), want: 10 });
        }
        let dpid = i64::from_le_bytes(buf[0..8].try_into().unwrap());
        let port_no = i16::from_le_bytes(buf[8..10].try_into().unwrap());
        pos += 10;
        let mac = read_str(buf, &mut pos, topic)?;
        let ipv4 = read_str(buf, &mut pos, topic)?;
        let ipv6 = read_str(buf, &mut pos, topic)?;
        if buf.len() < pos + 1 {
            return Err(OverlayError::Truncated { topic, have: buf.len(), want: pos + 1 });
        }
        let op = match buf[pos] {
            0 => HostOpWire::Delete,
            1 => HostOpWire::Add,
            op => return Err(OverlayError::BadOp { topic, op }),
        };
        Ok(Self { dpid, port_no, mac, ipv4, ipv6, op })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn switch_record_roundtrip() {
        let rec = SwitchRecord {
            writer_id: [7; 16],
            cid: 3,
            dpid: 0x1122334455667788,
            port_count: 4,
            op: SwitchOpWire::Enter,
        };
        let encoded = rec.encode();
        assert_eq!(SwitchRecord::decode(&encoded).unwrap(), rec);
    }

    #[test]
    fn port_record_roundtrip() {
        let rec = PortRecord {
            dpid: 42,
            ofp: "OF13".into(),
            config: 0,
            state: 0,
            port_no: 2,
            hw_addr: "aa:bb:cc:dd:ee:ff".into(),
            name: "eth0".into(),
            is_live: true,
            op: PortOpWire::Add,
        };
        let encoded = rec.encode();
        assert_eq!(PortRecord::decode(&encoded).unwrap(), rec);
    }

    #[test]
    fn link_record_roundtrip() {
        let rec = LinkRecord { src_dpid: 1, src_port_no: 2, dst_dpid: 3, dst_port_no: 4, op: LinkOpWire::Add };
        let encoded = rec.encode();
        assert_eq!(LinkRecord::decode(&encoded).unwrap(), rec);
    }

    #[test]
    fn host_record_roundtrip() {
        let rec = HostRecord {
            dpid: 1,
            port_no: 3,
            mac: "11:22:33:44:55:66".into(),
            ipv4: "10.0.0.5".into(),
            ipv6: String::new(),
            op: HostOpWire::Add,
        };
        let encoded = rec.encode();
        assert_eq!(HostRecord::decode(&encoded).unwrap(), rec);
    }

    #[test]
    fn heartbeat_record_is_recognized() {
        let hb = HostRecord::heartbeat();
        assert!(hb.is_heartbeat());
        let decoded = HostRecord::decode(&hb.encode()).unwrap();
        assert!(decoded.is_heartbeat());
    }

    #[test]
    fn truncated_buffer_is_an_error_not_a_panic() {
        let rec = LinkRecord { src_dpid: 1, src_port_no: 2, dst_dpid: 3, dst_port_no: 4, op: LinkOpWire::Add };
        let encoded = rec.encode();
        assert!(LinkRecord::decode(&encoded[..5]).is_err());
    }
}
