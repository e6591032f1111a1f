//! Node-side dedicated time-sync UDP client: PING sender + PONG receiver on
//! its own socket, isolated from the show-plane listener — mirrors the
//! hub's `ts_udp.rs` isolation rationale in the opposite direction. Pong
//! validation happens here; the resulting timestamps are handed to
//! `TimeSyncEstimator::process_pong` by the coordinator.

use std::net::SocketAddr;

use tokio::net::UdpSocket;
use tracing::debug;

use lwos_proto::tswire::{TsPing, TsPong};

pub struct AcceptedPong {
    pub t1_us: u64,
    pub t2_us: u64,
    pub t3_us: u64,
}

pub struct TsUdpClient {
    socket: UdpSocket,
    hub_addr: SocketAddr,
    seq: u32,
}

impl TsUdpClient {
    pub async fn bind(bind_ip: std::net::IpAddr, hub_addr: SocketAddr) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind((bind_ip, 0)).await?;
        Ok(Self { socket, hub_addr, seq: 0 })
    }

    /// Emit one PING carrying `t1_us` as the local send time. Callers gate
    /// the send rate themselves (250ms unlocked / 1s locked, §4.8) and must
    /// not call this while `token_hash == 0` (post-disconnect disarm).
    pub async fn send_ping(&mut self, token_hash: u32, t1_us: u64) {
        self.seq = self.seq.wrapping_add(1);
        let ping = TsPing::new(self.seq, token_hash, t1_us);
        if let Err(e) = self.socket.send_to(&ping.to_bytes(), self.hub_addr).await {
            debug!("ts_udp: send ping failed: {e}");
        }
    }

    /// Receive one datagram and validate it as a PONG matching `token_hash`.
    /// Awaits the next datagram; pairs naturally with `tokio::select!`.
    pub async fn recv_pong(&self, token_hash: u32) -> Option<AcceptedPong> {
        let mut buf = [0u8; 64];
        let (len, _src) = self.socket.recv_from(&mut buf).await.ok()?;
        let pong = match TsPong::from_bytes(&buf[..len]) {
            Ok(p) => p,
            Err(e) => {
                debug!("ts_udp: malformed pong: {e}");
                return None;
            }
        };
        if pong.token_hash != token_hash {
            debug!("ts_udp: pong token mismatch, dropping");
            return None;
        }
        Some(AcceptedPong { t1_us: pong.t1_us, t2_us: pong.t2_us, t3_us: pong.t3_us })
    }
}
