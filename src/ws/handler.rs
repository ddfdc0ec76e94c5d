//! WebSocket upgrade handlers for players and map viewers

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::app::AppState;
use crate::ws::clients::WsSink;
use crate::ws::protocol::{ServerMsg, VIEWER_ID};
use crate::ws::session::SessionError;

/// Player WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Read-only map viewer upgrade handler
pub async fn map_ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_viewer(socket, state))
}

/// Hand an upgraded player connection to the session engine
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (ws_sink, ws_stream) = socket.split();

    let sink: WsSink = Box::pin(ws_sink.sink_map_err(|e| SessionError::Transport(e.to_string())));
    let stream = ws_stream.map(|frame| frame.map_err(|e| SessionError::Transport(e.to_string())));

    state.sessions.clone().run_session(sink, stream).await;
}

/// Stream game state to a viewer until either side goes away
async fn handle_viewer(socket: WebSocket, state: AppState) {
    info!("Map viewer connected");
    let (mut ws_sink, mut ws_stream) = socket.split();

    let config = state.sessions.viewer_config();
    if let Err(e) = send_msg(&mut ws_sink, &config).await {
        warn!(error = %e, "Failed to send viewer config");
        return;
    }

    let mut snapshot_rx = state.viewers.subscribe();
    loop {
        tokio::select! {
            msg = snapshot_rx.recv() => match msg {
                Ok(msg) => {
                    if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                        debug!(error = %e, "Viewer send failed");
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(lagged_count = n, "Viewer lagged, skipping {} snapshots", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            frame = ws_stream.next() => match frame {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(error = %e, "Viewer socket error");
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }

    info!("Map viewer disconnected");
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), SessionError> {
    let json = msg.encode(VIEWER_ID)?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| SessionError::Transport(e.to_string()))
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::time::Duration;

    use futures::{SinkExt, StreamExt};
    use serde_json::{json, Value};
    use tokio::net::TcpListener;
    use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

    use crate::app::AppState;
    use crate::config::Config;
    use crate::http::build_router;

    fn test_config() -> Config {
        Config {
            map_width: 120,
            map_height: 80,
            map_seed: Some(3),
            ..Config::default()
        }
    }

    async fn serve(state: AppState) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = build_router(state);
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    async fn next_json<S>(stream: &mut S) -> Value
    where
        S: futures::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), stream.next())
                .await
                .expect("timed out")
                .expect("stream ended")
                .unwrap();
            if let WsMessage::Text(text) = frame {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn player_registers_over_a_real_socket() {
        let state = AppState::new(test_config());
        let addr = serve(state.clone()).await;

        let (mut socket, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
        assert_eq!(next_json(&mut socket).await["type"], 0);

        let register = json!({"type": 16, "id": "", "payload": {"username": "alice", "success": false}});
        socket.send(WsMessage::Text(register.to_string())).await.unwrap();
        let config = next_json(&mut socket).await;
        assert_eq!(config["type"], 1);
        assert_eq!(config["payload"]["map_size_x"], 120);
        assert_eq!(config["payload"]["username"], "alice");
        assert!(state.sessions.handles.contains("alice"));

        socket.close(None).await.unwrap();
        for _ in 0..200 {
            if state.sessions.handles.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(state.sessions.handles.is_empty());
        assert_eq!(state.world.vehicle_count(), 0);
    }

    #[tokio::test]
    async fn viewer_gets_config_then_game_state() {
        let state = AppState::new(test_config());
        let addr = serve(state.clone()).await;

        let (mut viewer, _) = connect_async(format!("ws://{}/mapws", addr)).await.unwrap();
        let config = next_json(&mut viewer).await;
        assert_eq!(config["type"], 1);
        assert_eq!(config["id"], "viewer");
        assert_eq!(config["payload"]["map_size_y"], 80);

        // Stand in for one tick of the broadcast loop
        let mut builder = crate::game::snapshot::SnapshotBuilder::new();
        for _ in 0..200 {
            if state.viewers.receiver_count() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        crate::game::scheduler::broadcast_state(&state.sessions, &state.viewers, &mut builder).await;

        let frame = next_json(&mut viewer).await;
        assert_eq!(frame["type"], 2);
        assert_eq!(frame["id"], "viewer");
        assert!(frame["payload"]["tanks"].as_array().unwrap().is_empty());
    }
}
