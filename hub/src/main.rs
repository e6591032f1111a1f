mod clock;
mod config;
mod control;
mod error;
mod ota;
mod registry;
mod state;
mod ts_udp;
mod udp_fanout;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use clock::HubClock;
use config::{Args, HubConfig};
use control::AppState;
use ota::dispatch::OtaDispatch;
use ota::repo::OtaRepo;
use registry::NodeRegistry;
use state::HubState;
use ts_udp::TsUdpResponder;
use udp_fanout::UdpFanout;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = HubConfig::load(args).await?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_directive.clone().into()),
        )
        .init();

    info!("LightWave fleet hub v{} starting, binding {}", env!("CARGO_PKG_VERSION"), config.bind);

    let clock = Arc::new(HubClock::new());
    let registry = Arc::new(NodeRegistry::new());
    let hub_state = Arc::new(HubState::new());
    let ota_repo = Arc::new(OtaRepo::load(&config.ota_root).await);
    let ota_dispatch = Arc::new(OtaDispatch::new());
    let fanout = Arc::new(UdpFanout::bind(config.bind.ip()).await?);

    let app_state = Arc::new(AppState::new(
        clock.clone(),
        registry.clone(),
        hub_state.clone(),
        ota_repo,
        ota_dispatch,
        fanout.clone(),
    ));

    let ts_responder = Arc::new(TsUdpResponder::bind(config.bind.ip(), lwos_proto::constants::TS_UDP_PORT).await?);

    spawn_udp_fanout_task(fanout, clock.clone(), registry.clone(), hub_state.clone());
    spawn_maintenance_task(app_state.clone(), ts_responder, registry.clone(), clock.clone());
    spawn_batch_task(app_state.clone());

    let app = control::router(app_state);
    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    info!("control plane listening on {}", config.bind);
    axum::serve(listener, app.into_make_service_with_connect_info::<std::net::SocketAddr>()).await?;

    Ok(())
}

/// 100Hz show-plane broadcaster (§4.6/§4.7). Its own task so a slow HTTP
/// handler or WS write can never delay a fanout tick.
fn spawn_udp_fanout_task(
    fanout: Arc<UdpFanout>,
    clock: Arc<HubClock>,
    registry: Arc<NodeRegistry>,
    hub_state: Arc<HubState>,
) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_micros(lwos_proto::constants::TICK_PERIOD_US));
        loop {
            interval.tick().await;
            fanout.tick(&clock, &registry, &hub_state).await;
        }
    });
}

/// 20Hz maintenance loop: TS listener poll, registry timeout sweep, OTA tick,
/// pending-join delivery (§4.6).
fn spawn_maintenance_task(
    app_state: Arc<AppState>,
    ts_responder: Arc<TsUdpResponder>,
    registry: Arc<NodeRegistry>,
    clock: Arc<HubClock>,
) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(50));
        loop {
            interval.tick().await;
            ts_responder.drain(&clock, &registry).await;
            registry.tick(clock.now_us() / 1000);
            control::tick_ota(&app_state).await;
            control::process_pending_joins(&app_state).await;
        }
    });
}

/// 50ms batch window broadcasting dirty global/zone deltas (§4.6).
fn spawn_batch_task(app_state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(50));
        loop {
            interval.tick().await;
            control::broadcast_batch(&app_state).await;
        }
    });
}
