//! Operational configuration, layered CLI-over-TOML-over-default — same
//! pattern as the hub's `config.rs`. The wire constants in `lwos_proto`
//! remain frozen protocol and never appear here.

use std::net::IpAddr;
use std::path::PathBuf;

use clap::Parser;
use serde::Deserialize;

#[derive(Parser, Debug)]
#[command(author, version, about = "LightWave fleet node")]
pub struct Args {
    /// Optional TOML config file.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Overrides RUST_LOG.
    #[arg(long)]
    pub log: Option<String>,
    /// Local address to bind the show-plane and time-sync UDP sockets on.
    #[arg(long)]
    pub bind: Option<IpAddr>,
    /// Hub IP address (the isolated-link default is `lwos_proto::constants::HUB_IP`).
    #[arg(long)]
    pub hub_addr: Option<IpAddr>,
    /// Cosmetic node identifier folded into `hello.fw` for log readability;
    /// does not affect admission (the hub keys nodes by MAC).
    #[arg(long)]
    pub node_name: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    bind: Option<IpAddr>,
    hub_addr: Option<IpAddr>,
    node_name: Option<String>,
    log: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub bind_ip: IpAddr,
    pub hub_ip: IpAddr,
    pub hub_port: u16,
    pub node_name: String,
    pub log_directive: String,
}

impl NodeConfig {
    pub async fn load(args: Args) -> anyhow::Result<Self> {
        let file = match &args.config {
            Some(path) => {
                let text = tokio::fs::read_to_string(path).await?;
                toml::from_str::<FileConfig>(&text)?
            }
            None => FileConfig::default(),
        };

        let bind_ip = args.bind.or(file.bind).unwrap_or_else(|| "0.0.0.0".parse().unwrap());
        let hub_ip = args
            .hub_addr
            .or(file.hub_addr)
            .unwrap_or_else(|| lwos_proto::constants::HUB_IP.parse().unwrap());
        let node_name = args.node_name.or(file.node_name).unwrap_or_else(|| "lwos-node".to_string());
        let log_directive = args.log.or(file.log).unwrap_or_else(|| "lwos_node=info".to_string());

        Ok(Self { bind_ip, hub_ip, hub_port: lwos_proto::constants::HTTP_PORT, node_name, log_directive })
    }

    pub fn hub_ws_url(&self) -> String {
        format!("ws://{}:{}{}", self.hub_ip, self.hub_port, lwos_proto::constants::WS_PATH)
    }

    pub fn hub_http_base(&self) -> String {
        format!("http://{}:{}", self.hub_ip, self.hub_port)
    }
}
