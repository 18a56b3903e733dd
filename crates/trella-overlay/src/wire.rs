//! The Gnutella wire codec.
//!
//! ## Packet layout
//!
//! ```text
//! off  0: guid[16]        random message id
//! off 16: type            PING 0x00, PONG 0x01, PUSH 0x40,
//!                         SEARCH 0x80, SEARCH_REPLY 0x81
//! off 17: ttl
//! off 18: hops
//! off 19: payload_len     LE32
//! off 23: payload
//! ```
//!
//! Multi-byte fields are little-endian (the historical Gnutella
//! convention); the reply's `ip` field alone carries the address as
//! network-order octets. `hops + ttl` is preserved by forwarders;
//! this node only originates and terminates, but honors the layout
//! to interoperate.

use std::net::Ipv4Addr;

use tokio::io::{AsyncRead, AsyncReadExt};
use trella_encoding::bytes::{get_u16_le, get_u32_le, put_u16_le, put_u32_le};

use crate::{OverlayError, Result};

/// Handshake banner sent by the connecting side.
pub const CONNECT_REQUEST: &[u8] = b"GNUTELLA CONNECT/0.4\n\n";

/// Handshake banner accepting a connection.
pub const CONNECT_RESPONSE: &[u8] = b"GNUTELLA OK\n\n";

/// Message id size.
pub const GUID_SIZE: usize = 16;

/// Fixed header size.
pub const HEADER_SIZE: usize = 23;

/// TTL on originated packets.
pub const DEFAULT_TTL: u8 = 7;

/// Sanity cap on payload length.
pub const MAX_PAYLOAD: u32 = 256 * 1024;

/// Packet type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Ping,
    Pong,
    Push,
    Search,
    SearchReply,
    Other(u8),
}

impl PacketKind {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => PacketKind::Ping,
            0x01 => PacketKind::Pong,
            0x40 => PacketKind::Push,
            0x80 => PacketKind::Search,
            0x81 => PacketKind::SearchReply,
            other => PacketKind::Other(other),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            PacketKind::Ping => 0x00,
            PacketKind::Pong => 0x01,
            PacketKind::Push => 0x40,
            PacketKind::Search => 0x80,
            PacketKind::SearchReply => 0x81,
            PacketKind::Other(other) => other,
        }
    }
}

/// One overlay packet: header plus payload.
#[derive(Debug, Clone)]
pub struct Packet {
    pub guid: [u8; GUID_SIZE],
    pub kind: PacketKind,
    pub ttl: u8,
    pub hops: u8,
    pub payload: Vec<u8>,
}

impl Packet {
    /// An originated packet with default TTL and zero hops.
    pub fn originate(guid: [u8; GUID_SIZE], kind: PacketKind, payload: Vec<u8>) -> Self {
        Self {
            guid,
            kind,
            ttl: DEFAULT_TTL,
            hops: 0,
            payload,
        }
    }

    /// Serialize for the wire.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![0u8; HEADER_SIZE + self.payload.len()];
        out[..GUID_SIZE].copy_from_slice(&self.guid);
        out[16] = self.kind.to_byte();
        out[17] = self.ttl;
        out[18] = self.hops;
        put_u32_le(&mut out[19..23], self.payload.len() as u32);
        out[HEADER_SIZE..].copy_from_slice(&self.payload);
        out
    }
}

/// Read one packet. `Ok(None)` means the peer closed cleanly at a
/// packet boundary.
pub async fn read_packet<R>(reader: &mut R) -> Result<Option<Packet>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_SIZE];
    let mut filled = 0;
    while filled < HEADER_SIZE {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(OverlayError::MalformedPacket("truncated header".into()));
        }
        filled += n;
    }

    let mut guid = [0u8; GUID_SIZE];
    guid.copy_from_slice(&header[..GUID_SIZE]);
    let kind = PacketKind::from_byte(header[16]);
    let ttl = header[17];
    let hops = header[18];
    let len = get_u32_le(&header[19..23]);
    if len > MAX_PAYLOAD {
        return Err(OverlayError::OversizedPayload(len));
    }

    let mut payload = vec![0u8; len as usize];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|_| OverlayError::MalformedPacket("truncated payload".into()))?;

    Ok(Some(Packet {
        guid,
        kind,
        ttl,
        hops,
        payload,
    }))
}

/// SEARCH payload: `speed LE16 | NUL-terminated query`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchPayload {
    pub speed: u16,
    pub query: String,
}

impl SearchPayload {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![0u8; 2 + self.query.len() + 1];
        put_u16_le(&mut out[..2], self.speed);
        out[2..2 + self.query.len()].copy_from_slice(self.query.as_bytes());
        out
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() < 3 {
            return Err(OverlayError::MalformedPacket("short search payload".into()));
        }
        let speed = get_u16_le(&payload[..2]);
        let text = &payload[2..];
        let end = text
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| OverlayError::MalformedPacket("unterminated query".into()))?;
        let query = String::from_utf8_lossy(&text[..end]).into_owned();
        Ok(Self { speed, query })
    }
}

/// One SEARCH-REPLY entry: `ref LE32 | size LE32 | name NUL`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyEntry {
    pub ref_id: u32,
    pub size: u32,
    pub name: String,
}

/// SEARCH-REPLY payload:
/// `count u8 | port LE16 | ip (network-order octets) | speed LE32 |
/// count entries | trailer guid[16]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyPayload {
    pub port: u16,
    pub ip: Ipv4Addr,
    pub speed: u32,
    pub entries: Vec<ReplyEntry>,
    pub trailer: [u8; GUID_SIZE],
}

impl ReplyPayload {
    pub fn encode(&self) -> Vec<u8> {
        let entry_bytes: usize = self.entries.iter().map(|e| 8 + e.name.len() + 1).sum();
        let mut out = vec![0u8; 11 + entry_bytes + GUID_SIZE];
        out[0] = self.entries.len() as u8;
        put_u16_le(&mut out[1..3], self.port);
        out[3..7].copy_from_slice(&self.ip.octets());
        put_u32_le(&mut out[7..11], self.speed);

        let mut at = 11;
        for entry in &self.entries {
            put_u32_le(&mut out[at..at + 4], entry.ref_id);
            put_u32_le(&mut out[at + 4..at + 8], entry.size);
            out[at + 8..at + 8 + entry.name.len()].copy_from_slice(entry.name.as_bytes());
            at += 8 + entry.name.len() + 1;
        }
        out[at..at + GUID_SIZE].copy_from_slice(&self.trailer);
        out
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() < 11 + GUID_SIZE {
            return Err(OverlayError::MalformedPacket("short reply payload".into()));
        }
        let count = payload[0] as usize;
        let port = get_u16_le(&payload[1..3]);
        let ip = Ipv4Addr::new(payload[3], payload[4], payload[5], payload[6]);
        let speed = get_u32_le(&payload[7..11]);

        let mut entries = Vec::with_capacity(count);
        let mut at = 11;
        for _ in 0..count {
            if at + 8 > payload.len() {
                return Err(OverlayError::MalformedPacket("truncated entry".into()));
            }
            let ref_id = get_u32_le(&payload[at..at + 4]);
            let size = get_u32_le(&payload[at + 4..at + 8]);
            let name_start = at + 8;
            let end = payload[name_start..]
                .iter()
                .position(|&b| b == 0)
                .ok_or_else(|| OverlayError::MalformedPacket("unterminated name".into()))?;
            let name = String::from_utf8_lossy(&payload[name_start..name_start + end]).into_owned();
            at = name_start + end + 1;
            entries.push(ReplyEntry { ref_id, size, name });
        }

        if at + GUID_SIZE > payload.len() {
            return Err(OverlayError::MalformedPacket("missing trailer".into()));
        }
        let mut trailer = [0u8; GUID_SIZE];
        trailer.copy_from_slice(&payload[at..at + GUID_SIZE]);

        Ok(Self {
            port,
            ip,
            speed,
            entries,
            trailer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_packet_header_layout() {
        let packet = Packet::originate([0xaa; GUID_SIZE], PacketKind::Search, vec![1, 2, 3]);
        let bytes = packet.encode();
        assert_eq!(bytes.len(), HEADER_SIZE + 3);
        assert_eq!(&bytes[..16], &[0xaa; 16]);
        assert_eq!(bytes[16], 0x80);
        assert_eq!(bytes[17], DEFAULT_TTL);
        assert_eq!(bytes[18], 0);
        assert_eq!(&bytes[19..23], &[3, 0, 0, 0]);
        assert_eq!(&bytes[23..], &[1, 2, 3]);
    }

    #[tokio::test]
    async fn test_packet_roundtrip() {
        let packet = Packet::originate([7; GUID_SIZE], PacketKind::SearchReply, vec![9; 40]);
        let bytes = packet.encode();
        let mut cursor = Cursor::new(bytes);
        let back = read_packet(&mut cursor)
            .await
            .expect("read")
            .expect("some packet");
        assert_eq!(back.guid, packet.guid);
        assert_eq!(back.kind, PacketKind::SearchReply);
        assert_eq!(back.payload, packet.payload);
    }

    #[tokio::test]
    async fn test_eof_at_boundary_is_none() {
        let mut cursor = Cursor::new(Vec::new());
        assert!(read_packet(&mut cursor).await.expect("read").is_none());
    }

    #[tokio::test]
    async fn test_truncated_header_is_error() {
        let mut cursor = Cursor::new(vec![0u8; 10]);
        assert!(read_packet(&mut cursor).await.is_err());
    }

    #[tokio::test]
    async fn test_oversized_payload_rejected() {
        let mut header = [0u8; HEADER_SIZE];
        header[19..23].copy_from_slice(&(MAX_PAYLOAD + 1).to_le_bytes());
        let mut cursor = Cursor::new(header.to_vec());
        assert!(matches!(
            read_packet(&mut cursor).await,
            Err(OverlayError::OversizedPayload(_))
        ));
    }

    #[test]
    fn test_search_payload_roundtrip() {
        let payload = SearchPayload {
            speed: 0,
            query: "alpha*".into(),
        };
        let bytes = payload.encode();
        assert_eq!(bytes[0], 0);
        assert_eq!(bytes[1], 0);
        assert_eq!(*bytes.last().expect("nul"), 0);
        assert_eq!(SearchPayload::decode(&bytes).expect("decode"), payload);
    }

    #[test]
    fn test_reply_payload_roundtrip() {
        let payload = ReplyPayload {
            port: 6346,
            ip: Ipv4Addr::new(192, 168, 1, 20),
            speed: 0,
            entries: vec![
                ReplyEntry {
                    ref_id: 3,
                    size: 14,
                    name: "alpha.txt".into(),
                },
                ReplyEntry {
                    ref_id: 9,
                    size: 16,
                    name: "key".into(),
                },
            ],
            trailer: [0x55; GUID_SIZE],
        };
        let bytes = payload.encode();
        assert_eq!(bytes[0], 2);
        // The ip travels as network-order octets.
        assert_eq!(&bytes[3..7], &[192, 168, 1, 20]);
        assert_eq!(ReplyPayload::decode(&bytes).expect("decode"), payload);
    }

    #[test]
    fn test_reply_decode_rejects_truncation() {
        let payload = ReplyPayload {
            port: 1,
            ip: Ipv4Addr::LOCALHOST,
            speed: 0,
            entries: vec![ReplyEntry {
                ref_id: 1,
                size: 2,
                name: "x".into(),
            }],
            trailer: [0; GUID_SIZE],
        };
        let bytes = payload.encode();
        assert!(ReplyPayload::decode(&bytes[..bytes.len() - 4]).is_err());
    }
}
