//! Operational configuration, layered CLI-over-TOML-over-default. The wire
//! constants in `lwos_proto::constants` are frozen protocol and never appear
//! here — this only covers what a deployer may legitimately vary, per
//! SPEC_FULL.md §6's [AMBIENT] note.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use serde::Deserialize;

#[derive(Parser, Debug)]
#[command(author, version, about = "LightWave fleet hub")]
pub struct Args {
    /// Optional TOML config file.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Overrides RUST_LOG.
    #[arg(long)]
    pub log: Option<String>,
    /// HTTP/WS bind address (192.168.4.1:80 is not routable off the isolated link).
    #[arg(long)]
    pub bind: Option<SocketAddr>,
    /// Directory holding manifest.json and OTA binaries.
    #[arg(long)]
    pub ota_root: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    bind: Option<SocketAddr>,
    ota_root: Option<PathBuf>,
    log: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HubConfig {
    pub bind: SocketAddr,
    pub ota_root: PathBuf,
    pub log_directive: String,
}

impl HubConfig {
    pub async fn load(args: Args) -> anyhow::Result<Self> {
        let file = match &args.config {
            Some(path) => {
                let text = tokio::fs::read_to_string(path).await?;
                toml::from_str::<FileConfig>(&text)?
            }
            None => FileConfig::default(),
        };

        let bind = args
            .bind
            .or(file.bind)
            .unwrap_or_else(|| format!("{}:{}", lwos_proto::constants::HUB_IP, lwos_proto::constants::HTTP_PORT).parse().unwrap());
        let ota_root = args.ota_root.or(file.ota_root).unwrap_or_else(|| PathBuf::from("ota"));
        let log_directive = args.log.or(file.log).unwrap_or_else(|| "lwos_hub=info".to_string());

        Ok(Self { bind, ota_root, log_directive })
    }
}
