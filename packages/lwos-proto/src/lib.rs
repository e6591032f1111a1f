//! Shared wire types between the hub and node binaries: frozen protocol
//! constants, the token hash, the show-plane and time-sync UDP codecs, and
//! the control-plane JSON message shapes. Nothing in this crate touches a
//! socket; it only encodes and decodes bytes.

pub mod constants;
pub mod hash;
pub mod tswire;
pub mod ws;
pub mod wire;
