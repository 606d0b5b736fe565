//! Model websocket adapter
//!
//! Connects the realtime model websocket and pumps it into the channel pair
//! the bridge coordinator works against. The read and write pumps die with
//! their channels, so dropping the peer tears the socket down.

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;

use hvac_voice_config::ModelSettings;

use crate::bridge::ModelPeer;
use crate::error::BridgeError;
use crate::model::{ModelCommand, ModelEvent};

/// Open the model websocket and return its channel peer.
///
/// Honours the configured connect timeout; auth headers follow the realtime
/// API convention.
pub async fn connect_model_peer(settings: &ModelSettings) -> Result<ModelPeer, BridgeError> {
    let mut request = settings
        .ws_url
        .clone()
        .into_client_request()
        .map_err(|e| BridgeError::ModelConnect(format!("bad endpoint: {e}")))?;

    let headers = request.headers_mut();
    headers.insert(
        "Authorization",
        HeaderValue::from_str(&format!("Bearer {}", settings.api_key))
            .map_err(|e| BridgeError::ModelConnect(e.to_string()))?,
    );
    headers.insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

    let connect = tokio::time::timeout(
        std::time::Duration::from_secs(settings.connect_timeout_seconds),
        connect_async(request),
    );
    let (ws, _response) = match connect.await {
        Ok(Ok(ok)) => ok,
        Ok(Err(e)) => return Err(BridgeError::ModelConnect(e.to_string())),
        Err(_) => {
            return Err(BridgeError::ModelConnect(format!(
                "no connection within {}s",
                settings.connect_timeout_seconds
            )))
        }
    };
    tracing::info!(url = %settings.ws_url, "Model websocket connected");

    let (mut sink, mut stream) = ws.split();
    let (command_tx, mut command_rx) = mpsc::channel::<ModelCommand>(64);
    let (event_tx, event_rx) = mpsc::channel::<ModelEvent>(64);

    // Write pump: bridge commands → websocket
    tokio::spawn(async move {
        while let Some(command) = command_rx.recv().await {
            if sink.send(Message::Text(command.to_wire())).await.is_err() {
                tracing::debug!("Model write pump closed");
                break;
            }
        }
        let _ = sink.close().await;
    });

    // Read pump: websocket → classified events
    tokio::spawn(async move {
        while let Some(message) = stream.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    if event_tx.send(ModelEvent::parse(&text)).await.is_err() {
                        break;
                    }
                }
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
        tracing::debug!("Model read pump closed");
    });

    Ok(ModelPeer {
        events: event_rx,
        commands: command_tx,
    })
}
