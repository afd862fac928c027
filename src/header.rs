//! The fixed-layout message header carried by every data-connection
//! frame, plus the proxy-update frame payload format. Grounded on the
//! wire format described for the comm layer; encoded with `bytes` the
//! way the teacher already depends on it for HTTP body assembly, and
//! checksummed with the `crc` crate rather than a hand-rolled CRC32
//! table.

use bytes::{Buf, BufMut, BytesMut, IntoBuf, LittleEndian};
use crc::crc32;
use std::io;
use std::net::Ipv4Addr;

use error::{Error, Result};

pub const HEADER_LEN: usize = 32;
pub const PROTOCOL_VERSION: u16 = 1;

pub const FLAG_URGENT: u8 = 0b0000_0001;
pub const FLAG_PROXY_UPDATE: u8 = 0b0000_0010;
pub const FLAG_REQUEST: u8 = 0b0000_0100;
pub const FLAG_RESPONSE: u8 = 0b0000_1000;

/// The fixed 32-byte header that precedes every frame on a data
/// connection. The payload that follows is opaque to the core.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageHeader {
    pub version: u16,
    pub header_len: u8,
    pub flags: u8,
    pub total_len: u32,
    pub request_id: u32,
    pub command: u32,
    pub group_id: u32,
    pub group_seq: u32,
    pub timeout_ms: u32,
}

impl MessageHeader {
    pub fn new(command: u32, flags: u8, request_id: u32, payload_len: usize) -> MessageHeader {
        MessageHeader {
            version: PROTOCOL_VERSION,
            header_len: HEADER_LEN as u8,
            flags: flags,
            total_len: (HEADER_LEN + payload_len) as u32,
            request_id: request_id,
            command: command,
            group_id: 0,
            group_seq: 0,
            timeout_ms: 0,
        }
    }

    pub fn is_urgent(&self) -> bool {
        self.flags & FLAG_URGENT != 0
    }

    pub fn is_proxy_update(&self) -> bool {
        self.flags & FLAG_PROXY_UPDATE != 0
    }

    pub fn is_request(&self) -> bool {
        self.flags & FLAG_REQUEST != 0
    }

    pub fn is_response(&self) -> bool {
        self.flags & FLAG_RESPONSE != 0
    }

    pub fn payload_len(&self) -> usize {
        self.total_len as usize - self.header_len as usize
    }

    /// Encodes the header, computing the checksum over the header
    /// bytes with the checksum field zeroed, per the wire format.
    pub fn encode(&self, buf: &mut BytesMut) {
        let start = buf.len();
        buf.put_u16::<LittleEndian>(self.version);
        buf.put_u8(self.header_len);
        buf.put_u8(self.flags);
        buf.put_u32::<LittleEndian>(0); // checksum placeholder
        buf.put_u32::<LittleEndian>(self.total_len);
        buf.put_u32::<LittleEndian>(self.request_id);
        buf.put_u32::<LittleEndian>(self.command);
        buf.put_u32::<LittleEndian>(self.group_id);
        buf.put_u32::<LittleEndian>(self.group_seq);
        buf.put_u32::<LittleEndian>(self.timeout_ms);

        let checksum = crc32::checksum_ieee(&buf[start..start + HEADER_LEN]);
        let mut checksum_buf = BytesMut::with_capacity(4);
        checksum_buf.put_u32::<LittleEndian>(checksum);
        buf[start + 4..start + 8].copy_from_slice(&checksum_buf[..]);
    }

    /// Decodes a header from exactly `HEADER_LEN` bytes, verifying the
    /// checksum. Any mismatch is `Error::HeaderChecksumFailed`, never a
    /// panic -- a corrupted peer is a connection-fatal event, not a
    /// process-fatal one.
    pub fn decode(raw: &[u8]) -> Result<MessageHeader> {
        if raw.len() < HEADER_LEN {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "short header",
            )));
        }

        let on_wire_checksum = {
            let mut buf = (&raw[4..8]).into_buf();
            buf.get_u32::<LittleEndian>()
        };

        let mut zeroed = [0u8; HEADER_LEN];
        zeroed.copy_from_slice(&raw[..HEADER_LEN]);
        zeroed[4] = 0;
        zeroed[5] = 0;
        zeroed[6] = 0;
        zeroed[7] = 0;
        let computed = crc32::checksum_ieee(&zeroed);
        if computed != on_wire_checksum {
            return Err(Error::HeaderChecksumFailed);
        }

        let mut buf = raw.into_buf();
        let version = buf.get_u16::<LittleEndian>();
        let header_len = buf.get_u8();
        let flags = buf.get_u8();
        let _checksum = buf.get_u32::<LittleEndian>();
        let total_len = buf.get_u32::<LittleEndian>();
        let request_id = buf.get_u32::<LittleEndian>();
        let command = buf.get_u32::<LittleEndian>();
        let group_id = buf.get_u32::<LittleEndian>();
        let group_seq = buf.get_u32::<LittleEndian>();
        let timeout_ms = buf.get_u32::<LittleEndian>();

        Ok(MessageHeader {
            version,
            header_len,
            flags,
            total_len,
            request_id,
            command,
            group_id,
            group_seq,
            timeout_ms,
        })
    }
}

/// One entry of a proxy-update frame: a proxy name and the inet
/// address it currently resolves to. The sender includes a `"*"`
/// entry identifying itself, per the wire format.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProxyEntry {
    pub name: String,
    pub addr: Ipv4Addr,
    pub port: u16,
}

pub fn encode_proxy_update(entries: &[ProxyEntry]) -> BytesMut {
    let mut buf = BytesMut::new();
    buf.put_u16::<LittleEndian>(entries.len() as u16);
    for e in entries {
        let name = e.name.as_bytes();
        buf.put_u16::<LittleEndian>(name.len() as u16);
        buf.put_slice(name);
        buf.put_u32::<LittleEndian>(u32::from(e.addr));
        buf.put_u16::<LittleEndian>(e.port);
    }
    buf
}

pub fn decode_proxy_update(raw: &[u8]) -> Result<Vec<ProxyEntry>> {
    let mut buf = raw.into_buf();
    if buf.remaining() < 2 {
        return Err(Error::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "short proxy update",
        )));
    }
    let count = buf.get_u16::<LittleEndian>();
    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        if buf.remaining() < 2 {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "truncated proxy entry",
            )));
        }
        let name_len = buf.get_u16::<LittleEndian>() as usize;
        if buf.remaining() < name_len + 4 + 2 {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "truncated proxy entry",
            )));
        }
        let mut name_bytes = vec![0u8; name_len];
        buf.copy_to_slice(&mut name_bytes);
        let name = String::from_utf8_lossy(&name_bytes).into_owned();
        let addr = Ipv4Addr::from(buf.get_u32::<LittleEndian>());
        let port = buf.get_u16::<LittleEndian>();
        entries.push(ProxyEntry { name, addr, port });
    }
    Ok(entries)
}

/// Marker name used for the sender's own entry in a proxy update.
pub const SELF_MARKER: &'static str = "*";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let h = MessageHeader::new(0x10, FLAG_REQUEST, 1, 4);
        let mut buf = BytesMut::new();
        h.encode(&mut buf);
        let decoded = MessageHeader::decode(&buf).unwrap();
        assert_eq!(h, decoded);
    }

    #[test]
    fn corrupted_checksum_is_rejected() {
        let h = MessageHeader::new(0x10, FLAG_REQUEST, 1, 4);
        let mut buf = BytesMut::new();
        h.encode(&mut buf);
        // Flip one bit inside the header, leaving the checksum stale.
        buf[16] ^= 0x01;
        match MessageHeader::decode(&buf) {
            Err(Error::HeaderChecksumFailed) => {}
            other => panic!("expected checksum failure, got {:?}", other),
        }
    }

    #[test]
    fn proxy_update_round_trips() {
        let entries = vec![
            ProxyEntry {
                name: "rs-7".into(),
                addr: Ipv4Addr::new(10, 0, 0, 5),
                port: 38060,
            },
            ProxyEntry {
                name: SELF_MARKER.into(),
                addr: Ipv4Addr::new(10, 0, 0, 1),
                port: 11000,
            },
        ];
        let buf = encode_proxy_update(&entries);
        let decoded = decode_proxy_update(&buf).unwrap();
        assert_eq!(entries, decoded);
    }
}
