//! Show-plane UDP codec: the 28-byte header plus its per-`msgType` payloads.
//!
//! This is the only module in the crate that touches raw show-plane bytes.
//! Wire order is network byte order (big-endian); see `tswire` for the
//! time-sync plane, which is little-endian by design.

use thiserror::Error;

pub const SHOW_HEADER_LEN: usize = 28;
pub const MAX_SHOW_PAYLOAD_LEN: usize = 512;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("packet shorter than the {SHOW_HEADER_LEN}-byte header")]
    TruncatedPacket,
    #[error("unsupported protocol version {0}")]
    InvalidProto(u8),
    #[error("unrecognised msgType {0}")]
    InvalidMsgType(u8),
    #[error("payloadLen {declared} does not match remaining bytes {actual}")]
    PayloadLenMismatch { declared: u16, actual: usize },
    #[error("payload exceeds max show payload size ({0} > {MAX_SHOW_PAYLOAD_LEN})")]
    Oversize(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ShowMsgType {
    ParamDelta = 1,
    BeatTick = 2,
    SceneChange = 3,
    Heartbeat = 4,
    Reserved = 5,
}

impl ShowMsgType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::ParamDelta),
            2 => Some(Self::BeatTick),
            3 => Some(Self::SceneChange),
            4 => Some(Self::Heartbeat),
            5 => Some(Self::Reserved),
            _ => None,
        }
    }
}

/// The 28-byte show-plane header, network byte order on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpShowHeader {
    pub proto: u8,
    pub msg_type: u8,
    pub payload_len: u16,
    pub seq: u32,
    pub token_hash: u32,
    pub hub_now_us: u64,
    pub apply_at_us: u64,
}

impl UdpShowHeader {
    pub fn to_bytes(&self) -> [u8; SHOW_HEADER_LEN] {
        let mut buf = [0u8; SHOW_HEADER_LEN];
        buf[0] = self.proto;
        buf[1] = self.msg_type;
        buf[2..4].copy_from_slice(&self.payload_len.to_be_bytes());
        buf[4..8].copy_from_slice(&self.seq.to_be_bytes());
        buf[8..12].copy_from_slice(&self.token_hash.to_be_bytes());
        buf[12..20].copy_from_slice(&self.hub_now_us.to_be_bytes());
        buf[20..28].copy_from_slice(&self.apply_at_us.to_be_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < SHOW_HEADER_LEN {
            return Err(WireError::TruncatedPacket);
        }
        Ok(Self {
            proto: buf[0],
            msg_type: buf[1],
            payload_len: u16::from_be_bytes([buf[2], buf[3]]),
            seq: u32::from_be_bytes(buf[4..8].try_into().unwrap()),
            token_hash: u32::from_be_bytes(buf[8..12].try_into().unwrap()),
            hub_now_us: u64::from_be_bytes(buf[12..20].try_into().unwrap()),
            apply_at_us: u64::from_be_bytes(buf[20..28].try_into().unwrap()),
        })
    }
}

/// Validate a received header against the declared packet length. Does not
/// check tokenHash — that's the caller's authentication concern.
pub fn validate_header(hdr: &UdpShowHeader, packet_len: usize) -> Result<ShowMsgType, WireError> {
    if hdr.proto != crate::constants::PROTO_VER {
        return Err(WireError::InvalidProto(hdr.proto));
    }
    let msg_type = ShowMsgType::from_u8(hdr.msg_type).ok_or(WireError::InvalidMsgType(hdr.msg_type))?;
    let remaining = packet_len.saturating_sub(SHOW_HEADER_LEN);
    if hdr.payload_len as usize != remaining {
        return Err(WireError::PayloadLenMismatch {
            declared: hdr.payload_len,
            actual: remaining,
        });
    }
    if remaining > MAX_SHOW_PAYLOAD_LEN {
        return Err(WireError::Oversize(remaining));
    }
    Ok(msg_type)
}

/// PARAM_DELTA payload, 8 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParamDeltaPayload {
    pub effect_id: u16,
    pub palette_id: u16,
    pub brightness: u8,
    pub speed: u8,
    pub hue: u16,
}

impl ParamDeltaPayload {
    pub const LEN: usize = 8;

    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut buf = [0u8; Self::LEN];
        buf[0..2].copy_from_slice(&self.effect_id.to_be_bytes());
        buf[2..4].copy_from_slice(&self.palette_id.to_be_bytes());
        buf[4] = self.brightness;
        buf[5] = self.speed;
        buf[6..8].copy_from_slice(&self.hue.to_be_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < Self::LEN {
            return Err(WireError::TruncatedPacket);
        }
        Ok(Self {
            effect_id: u16::from_be_bytes([buf[0], buf[1]]),
            palette_id: u16::from_be_bytes([buf[2], buf[3]]),
            brightness: buf[4],
            speed: buf[5],
            hue: u16::from_be_bytes([buf[6], buf[7]]),
        })
    }
}

/// SCENE_CHANGE payload, 4 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SceneChangePayload {
    pub effect_id: u16,
    pub palette_id: u16,
}

impl SceneChangePayload {
    pub const LEN: usize = 4;

    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut buf = [0u8; Self::LEN];
        buf[0..2].copy_from_slice(&self.effect_id.to_be_bytes());
        buf[2..4].copy_from_slice(&self.palette_id.to_be_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < Self::LEN {
            return Err(WireError::TruncatedPacket);
        }
        Ok(Self {
            effect_id: u16::from_be_bytes([buf[0], buf[1]]),
            palette_id: u16::from_be_bytes([buf[2], buf[3]]),
        })
    }
}

/// BEAT_TICK payload, 4 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BeatTickPayload {
    pub bpm_x100: u16,
    pub phase: u8,
    pub flags: u8,
}

impl BeatTickPayload {
    pub const LEN: usize = 4;

    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut buf = [0u8; Self::LEN];
        buf[0..2].copy_from_slice(&self.bpm_x100.to_be_bytes());
        buf[2] = self.phase;
        buf[3] = self.flags;
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < Self::LEN {
            return Err(WireError::TruncatedPacket);
        }
        Ok(Self {
            bpm_x100: u16::from_be_bytes([buf[0], buf[1]]),
            phase: buf[2],
            flags: buf[3],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> UdpShowHeader {
        UdpShowHeader {
            proto: 1,
            msg_type: ShowMsgType::ParamDelta as u8,
            payload_len: ParamDeltaPayload::LEN as u16,
            seq: 42,
            token_hash: 0xCAFEBABE,
            hub_now_us: 1_000_000,
            apply_at_us: 1_030_000,
        }
    }

    /// L1: Serialise(UDP header) then Deserialise reproduces the input byte-for-byte.
    #[test]
    fn header_round_trips_byte_for_byte() {
        let hdr = sample_header();
        let bytes = hdr.to_bytes();
        let back = UdpShowHeader::from_bytes(&bytes).unwrap();
        assert_eq!(hdr, back);
        assert_eq!(bytes.len(), SHOW_HEADER_LEN);
    }

    #[test]
    fn validate_header_accepts_matching_payload_len() {
        let hdr = sample_header();
        let packet_len = SHOW_HEADER_LEN + ParamDeltaPayload::LEN;
        assert_eq!(validate_header(&hdr, packet_len).unwrap(), ShowMsgType::ParamDelta);
    }

    #[test]
    fn validate_header_rejects_payload_len_mismatch() {
        let hdr = sample_header();
        let err = validate_header(&hdr, SHOW_HEADER_LEN).unwrap_err();
        assert!(matches!(err, WireError::PayloadLenMismatch { .. }));
    }

    #[test]
    fn validate_header_rejects_bad_proto() {
        let mut hdr = sample_header();
        hdr.proto = 9;
        let err = validate_header(&hdr, SHOW_HEADER_LEN + ParamDeltaPayload::LEN).unwrap_err();
        assert!(matches!(err, WireError::InvalidProto(9)));
    }

    #[test]
    fn validate_header_rejects_unknown_msg_type() {
        let mut hdr = sample_header();
        hdr.msg_type = 200;
        let err = validate_header(&hdr, SHOW_HEADER_LEN).unwrap_err();
        assert!(matches!(err, WireError::InvalidMsgType(200)));
    }

    #[test]
    fn from_bytes_rejects_truncated_packet() {
        let err = UdpShowHeader::from_bytes(&[0u8; 10]).unwrap_err();
        assert_eq!(err, WireError::TruncatedPacket);
    }

    #[test]
    fn param_delta_payload_round_trips() {
        let p = ParamDeltaPayload {
            effect_id: 7,
            palette_id: 3,
            brightness: 128,
            speed: 25,
            hue: 0,
        };
        let bytes = p.to_bytes();
        assert_eq!(ParamDeltaPayload::from_bytes(&bytes).unwrap(), p);
    }
}
