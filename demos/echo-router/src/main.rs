//! Demo router with an echo backend behind it.
//!
//! Run with: cargo run -p echo-router
//!
//! Clients connect to ws://127.0.0.1:3000/socket. Simulate a server-hop
//! outage with:
//!
//! curl -X POST localhost:3000/server -H 'content-type: application/json' -d '{"alive":false}'

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use live_task_transport::{EchoServer, Packet};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, mpsc};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_BIND: &str = "127.0.0.1:3000";

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    backend: Arc<RwLock<EchoServer>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ServerSwitch {
    alive: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .init();

    let bind = std::env::var("LIVE_TASK_BIND").unwrap_or_else(|_| DEFAULT_BIND.to_string());
    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("invalid LIVE_TASK_BIND address: {bind}"))?;

    let state = AppState {
        backend: Arc::new(RwLock::new(EchoServer::new())),
    };

    let app = Router::new()
        .route("/socket", get(socket_handler))
        .route("/server", get(server_status).post(set_server))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("Router listening on ws://{addr}/socket");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn server_status(State(state): State<AppState>) -> Json<ServerSwitch> {
    Json(ServerSwitch {
        alive: state.backend.read().await.server_alive(),
    })
}

async fn set_server(
    State(state): State<AppState>,
    Json(switch): Json<ServerSwitch>,
) -> Json<ServerSwitch> {
    state.backend.write().await.set_server_alive(switch.alive);
    tracing::info!(alive = switch.alive, "server hop switched");
    Json(switch)
}

async fn socket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Packet>();

    let send_task = tokio::spawn(async move {
        while let Some(packet) = rx.recv().await {
            let frame = match packet.encode() {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::error!("Failed to serialize packet: {e}");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    let mut agent_id: Option<String> = None;
    while let Some(msg) = ws_receiver.next().await {
        let text = match msg {
            Ok(Message::Text(t)) => t.to_string(),
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s,
                Err(_) => continue,
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::error!("WebSocket error: {e}");
                break;
            }
        };

        let packet = match Packet::decode(&text) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::warn!("Invalid client packet: {e}");
                continue;
            }
        };
        if let Packet::Register { agent_id: id } = &packet {
            tracing::info!(agent_id = %id, "agent registering");
            agent_id = Some(id.clone());
        }

        let replies = state.backend.read().await.respond(packet);
        for reply in replies {
            if tx.send(reply).is_err() {
                break;
            }
        }
    }

    drop(tx);
    let _ = send_task.await;
    tracing::info!(agent_id = ?agent_id, "agent link closed");
}
