//! Control-plane WebSocket plumbing: connecting to the hub, serialising
//! outbound `NodeToHub` messages, and dispatching inbound text between the
//! two hub→node message families (`HubToNodeCtrl` tagged `"t"`,
//! `HubToNodeBatch` tagged `"type"` — see `lwos_proto::ws`). The actual
//! event loop lives in `coordinator`; this module only owns the wire shape.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::SinkExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::warn;

use lwos_proto::ws::{HubToNodeBatch, HubToNodeCtrl};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub type WsSink = SplitSink<WsStream, WsMessage>;
pub type WsSource = SplitStream<WsStream>;

pub async fn connect(url: &str) -> anyhow::Result<(WsSink, WsSource)> {
    let (stream, _response) = tokio_tungstenite::connect_async(url).await?;
    let (sink, source) = futures_util::StreamExt::split(stream);
    Ok((sink, source))
}

pub async fn send_json(sink: &mut WsSink, msg: &impl serde::Serialize) {
    match serde_json::to_string(msg) {
        Ok(text) => {
            if let Err(e) = sink.send(WsMessage::Text(text)).await {
                warn!("ws_client: send failed: {e}");
            }
        }
        Err(e) => warn!("ws_client: failed to serialise outbound message: {e}"),
    }
}

pub enum HubMessage {
    Ctrl(HubToNodeCtrl),
    Batch(HubToNodeBatch),
}

/// The two hub→node families share no common tag, so dispatch tries `"t"`
/// first (the smaller, older family) and falls back to `"type"`.
pub fn parse_hub_message(text: &str) -> Option<HubMessage> {
    if let Ok(ctrl) = serde_json::from_str::<HubToNodeCtrl>(text) {
        return Some(HubMessage::Ctrl(ctrl));
    }
    if let Ok(batch) = serde_json::from_str::<HubToNodeBatch>(text) {
        return Some(HubMessage::Batch(batch));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_welcome_as_ctrl() {
        let text = r#"{"t":"welcome","proto":1,"nodeId":3,"token":"tok","udpPort":49152,"hubEpoch_us":0}"#;
        match parse_hub_message(text) {
            Some(HubMessage::Ctrl(HubToNodeCtrl::Welcome { node_id, .. })) => assert_eq!(node_id, 3),
            _ => panic!("expected welcome"),
        }
    }

    #[test]
    fn parses_parameters_set_as_batch() {
        let text = r#"{"type":"parameters.set","applyAt_us":1000,"brightness":200}"#;
        match parse_hub_message(text) {
            Some(HubMessage::Batch(HubToNodeBatch::ParametersSet { fields, .. })) => {
                assert_eq!(fields.brightness, Some(200));
            }
            _ => panic!("expected parameters.set"),
        }
    }

    #[test]
    fn unrecognised_message_returns_none() {
        assert!(parse_hub_message(r#"{"foo":"bar"}"#).is_none());
    }
}
