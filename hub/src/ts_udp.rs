//! Hub side of the dedicated time-sync UDP plane: reply to every PING with a
//! PONG carrying t1 (echoed), t2 (receive time, captured early) and t3 (send
//! time, captured as late as possible) — see SPEC_FULL.md §4.8/§6. Isolated
//! from the show-plane socket so fanout queueing never delays a sync sample.

use tokio::net::UdpSocket;
use tracing::debug;

use lwos_proto::tswire::{TsPing, TsPong};

use crate::clock::HubClock;
use crate::registry::NodeRegistry;

pub struct TsUdpResponder {
    socket: UdpSocket,
}

impl TsUdpResponder {
    pub async fn bind(bind_ip: std::net::IpAddr, port: u16) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind((bind_ip, port)).await?;
        Ok(Self { socket })
    }

    /// Process every pending datagram without blocking, replying to each
    /// valid PING. Returns once the socket has no more ready data.
    pub async fn drain(&self, clock: &HubClock, registry: &NodeRegistry) {
        let mut buf = [0u8; 64];
        loop {
            let (len, src) = match self.socket.try_recv_from(&mut buf) {
                Ok(v) => v,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return,
                Err(e) => {
                    debug!("ts_udp: recv error: {e}");
                    return;
                }
            };

            let t2_us = clock.now_us();
            let Ok(ping) = TsPing::from_bytes(&buf[..len]) else {
                debug!("ts_udp: malformed ping from {src}");
                continue;
            };

            let known = registry.all().iter().any(|n| n.token_hash == ping.token_hash && n.token_hash != 0);
            if !known {
                continue;
            }

            let t3_us = clock.now_us();
            let pong = TsPong::reply_to(&ping, t2_us, t3_us);
            if let Err(e) = self.socket.send_to(&pong.to_bytes(), src).await {
                debug!("ts_udp: send pong to {src} failed: {e}");
            }
        }
    }
}
