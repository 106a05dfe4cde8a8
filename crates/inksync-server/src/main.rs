//! InkSync WebSocket Relay Server
//!
//! Relays element operations and presence between clients joined to the
//! same project channel, and announces snapshot versions so lagging peers
//! know to reload.
//!
//! ## Protocol
//!
//! JSON text frames tagged by `type` (see `inksync_core::protocol`):
//! ```json
//! { "type": "join", "topic": "project:abc", "presence": { ... } }
//! { "type": "operation", "op": { "type": "element_update", ... } }
//! { "type": "saved", "version": 12 }
//! ```

mod rooms;

use axum::{
    Json, Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use inksync_core::protocol::{self, ClientMessage, ServerMessage};
use rooms::{RoomMessage, Rooms};
use serde::Serialize;
use std::{net::SocketAddr, sync::Arc};
use tokio::sync::broadcast;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, warn};
use uuid::Uuid;

const DEFAULT_ADDR: &str = "0.0.0.0:3030";

type Sender = SplitSink<WebSocket, Message>;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "inksync_server=info,tower_http=info".into()),
        )
        .init();

    let addr = bind_addr();
    let state = Arc::new(Rooms::new());

    let app = Router::new()
        .route("/", get(index))
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("InkSync relay server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}

/// Bind address from `INKSYNC_ADDR`, falling back to the default.
fn bind_addr() -> SocketAddr {
    let default = SocketAddr::from(([0, 0, 0, 0], 3030));
    match std::env::var("INKSYNC_ADDR") {
        Ok(raw) => raw.parse().unwrap_or_else(|e| {
            warn!("Ignoring INKSYNC_ADDR={:?} ({}), using {}", raw, e, DEFAULT_ADDR);
            default
        }),
        Err(_) => default,
    }
}

async fn index() -> &'static str {
    "InkSync Relay Server - Connect via WebSocket at /ws"
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    rooms: usize,
    peers: usize,
}

async fn health(State(state): State<Arc<Rooms>>) -> Json<Health> {
    Json(Health {
        status: "ok",
        rooms: state.room_count(),
        peers: state.peer_count(),
    })
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<Rooms>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn send_json(sender: &mut Sender, msg: &ServerMessage) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!("Failed to encode {:?}: {}", msg, e);
            true
        }
    }
}

/// Membership of one connection.
struct Membership {
    topic: String,
    user_id: String,
    rx: broadcast::Receiver<RoomMessage>,
}

/// Presence is per connection but `peer_left` names a user, so it is only
/// sent once the user's last connection in the room is gone.
fn leave(state: &Rooms, conn_id: &str, membership: Membership) {
    if let Some(left) = state.leave(&membership.topic, conn_id) {
        if left.user_gone {
            state.broadcast(
                &membership.topic,
                conn_id,
                ServerMessage::PeerLeft {
                    user_id: left.presence.user_id,
                },
            );
        }
    }
    info!("{} ({}) left {}", membership.user_id, conn_id, membership.topic);
}

async fn handle_socket(socket: WebSocket, state: Arc<Rooms>) {
    let conn_id = Uuid::new_v4().to_string();
    info!("New connection: {}", conn_id);

    let (mut sender, mut receiver) = socket.split();
    let mut membership: Option<Membership> = None;

    loop {
        tokio::select! {
            msg = receiver.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!("WebSocket error for {}: {}", conn_id, e);
                        break;
                    }
                };
                let client_msg = match protocol::decode_client(text.as_str()) {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!("Invalid message from {}: {}", conn_id, e);
                        let err = ServerMessage::Error { message: format!("Invalid message: {}", e) };
                        if !send_json(&mut sender, &err).await {
                            break;
                        }
                        continue;
                    }
                };

                match client_msg {
                    ClientMessage::Join { topic, presence } => {
                        if let Some(old) = membership.take() {
                            leave(&state, &conn_id, old);
                        }
                        let user_id = presence.user_id.clone();
                        let joined = state.join(&topic, &conn_id, presence.clone());
                        membership = Some(Membership {
                            topic: topic.clone(),
                            user_id: user_id.clone(),
                            rx: joined.rx,
                        });
                        let reply = ServerMessage::Joined {
                            topic: topic.clone(),
                            peers: joined.peers,
                            version: joined.version,
                        };
                        if !send_json(&mut sender, &reply).await {
                            break;
                        }
                        state.broadcast(&topic, &conn_id, ServerMessage::PeerJoined { presence });
                        info!("{} ({}) joined {}", user_id, conn_id, topic);
                    }
                    ClientMessage::Leave => {
                        if let Some(old) = membership.take() {
                            leave(&state, &conn_id, old);
                        }
                    }
                    ClientMessage::Operation { op } => {
                        let Some(m) = &membership else { continue };
                        debug!("{} from {} in {}", op.kind.type_name(), m.user_id, m.topic);
                        state.broadcast(&m.topic, &conn_id, ServerMessage::Operation {
                            from: m.user_id.clone(),
                            op,
                        });
                    }
                    ClientMessage::Presence { presence } => {
                        let Some(m) = &membership else { continue };
                        state.update_presence(&m.topic, &conn_id, presence.clone());
                        state.broadcast(&m.topic, &conn_id, ServerMessage::Presence { presence });
                    }
                    ClientMessage::Saved { version } => {
                        let Some(m) = &membership else { continue };
                        if state.record_version(&m.topic, version) {
                            info!("{} saved at version {}", m.topic, version);
                            state.broadcast(&m.topic, &conn_id, ServerMessage::VersionNotice { version });
                        }
                    }
                }
            }

            msg = async {
                match &mut membership {
                    Some(m) => match m.rx.recv().await {
                        Ok(msg) => Some(msg),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("{} lagged by {} messages", conn_id, skipped);
                            None
                        }
                        Err(broadcast::error::RecvError::Closed) => None,
                    },
                    None => std::future::pending::<Option<RoomMessage>>().await,
                }
            } => {
                if let Some((from, server_msg)) = msg {
                    // Don't echo back to sender
                    if from != conn_id && !send_json(&mut sender, &server_msg).await {
                        break;
                    }
                }
            }
        }
    }

    if let Some(m) = membership.take() {
        leave(&state, &conn_id, m);
    }
    info!("Connection closed: {}", conn_id);
}
