//! Time-sync plane UDP codec: PING/PONG frames carrying the four NTP-style
//! timestamps. Declared packed with native integer encoding rather than
//! network byte order — safe because both hub and node run little-endian in
//! practice. A port to a big-endian platform MUST byte-swap these fields to
//! match the show-plane convention; see SPEC_FULL.md §9.

use bytemuck::{Pod, Zeroable};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TsWireError {
    #[error("ts frame has wrong size: expected {expected}, got {actual}")]
    WrongSize { expected: usize, actual: usize },
    #[error("unsupported ts protocol version {0}")]
    InvalidProto(u8),
    #[error("unexpected ts frame type {0}")]
    InvalidType(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TsMsgType {
    Ping = 1,
    Pong = 2,
}

/// 24-byte PING frame.
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C, packed)]
pub struct TsPing {
    pub proto: u8,
    pub msg_type: u8,
    pub _reserved: u16,
    pub seq: u32,
    pub token_hash: u32,
    pub t1_us: u64,
}

/// 36-byte PONG frame.
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C, packed)]
pub struct TsPong {
    pub proto: u8,
    pub msg_type: u8,
    pub _reserved: u16,
    pub seq: u32,
    pub token_hash: u32,
    pub t1_us: u64,
    pub t2_us: u64,
    pub t3_us: u64,
}

impl TsPing {
    pub fn new(seq: u32, token_hash: u32, t1_us: u64) -> Self {
        Self {
            proto: crate::constants::PROTO_VER,
            msg_type: TsMsgType::Ping as u8,
            _reserved: 0,
            seq,
            token_hash,
            t1_us,
        }
    }

    pub fn to_bytes(&self) -> [u8; std::mem::size_of::<Self>()] {
        let mut buf = [0u8; std::mem::size_of::<Self>()];
        buf.copy_from_slice(bytemuck::bytes_of(self));
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, TsWireError> {
        let expected = std::mem::size_of::<Self>();
        if buf.len() != expected {
            return Err(TsWireError::WrongSize { expected, actual: buf.len() });
        }
        let frame: Self = *bytemuck::from_bytes(buf);
        if frame.proto != crate::constants::PROTO_VER {
            return Err(TsWireError::InvalidProto(frame.proto));
        }
        if frame.msg_type != TsMsgType::Ping as u8 {
            return Err(TsWireError::InvalidType(frame.msg_type));
        }
        Ok(frame)
    }
}

impl TsPong {
    pub fn reply_to(ping: &TsPing, t2_us: u64, t3_us: u64) -> Self {
        Self {
            proto: crate::constants::PROTO_VER,
            msg_type: TsMsgType::Pong as u8,
            _reserved: 0,
            seq: ping.seq,
            token_hash: ping.token_hash,
            t1_us: ping.t1_us,
            t2_us,
            t3_us,
        }
    }

    pub fn to_bytes(&self) -> [u8; std::mem::size_of::<Self>()] {
        let mut buf = [0u8; std::mem::size_of::<Self>()];
        buf.copy_from_slice(bytemuck::bytes_of(self));
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, TsWireError> {
        let expected = std::mem::size_of::<Self>();
        if buf.len() != expected {
            return Err(TsWireError::WrongSize { expected, actual: buf.len() });
        }
        let frame: Self = *bytemuck::from_bytes(buf);
        if frame.proto != crate::constants::PROTO_VER {
            return Err(TsWireError::InvalidProto(frame.proto));
        }
        if frame.msg_type != TsMsgType::Pong as u8 {
            return Err(TsWireError::InvalidType(frame.msg_type));
        }
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_is_24_bytes() {
        assert_eq!(std::mem::size_of::<TsPing>(), 24);
    }

    #[test]
    fn pong_is_36_bytes() {
        assert_eq!(std::mem::size_of::<TsPong>(), 36);
    }

    #[test]
    fn ping_round_trips() {
        let ping = TsPing::new(7, 0xCAFEBABE, 1_000_000);
        let bytes = ping.to_bytes();
        let back = TsPing::from_bytes(&bytes).unwrap();
        assert_eq!(back.seq, 7);
        assert_eq!({ back.token_hash }, 0xCAFEBABE);
        assert_eq!({ back.t1_us }, 1_000_000);
    }

    #[test]
    fn pong_echoes_ping_fields() {
        let ping = TsPing::new(9, 0x1234, 1_000_000);
        let pong = TsPong::reply_to(&ping, 1_000_500, 1_000_700);
        let bytes = pong.to_bytes();
        let back = TsPong::from_bytes(&bytes).unwrap();
        assert_eq!({ back.seq }, 9);
        assert_eq!({ back.t1_us }, 1_000_000);
        assert_eq!({ back.t2_us }, 1_000_500);
        assert_eq!({ back.t3_us }, 1_000_700);
    }

    #[test]
    fn rejects_wrong_size() {
        assert!(matches!(TsPing::from_bytes(&[0u8; 10]), Err(TsWireError::WrongSize { .. })));
    }
}
