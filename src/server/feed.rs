//! WebSocket fan-out of the chat change feed.
//!
//! Viewers connect, identify themselves with a hello frame, then receive
//! every `ChatEvent` as a JSON text frame in commit order. There is no
//! replay: a reconnecting viewer must re-fetch the history over the
//! command protocol before trusting the feed again.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use log::{error, info};
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{tungstenite::Message, WebSocketStream};

use crate::server::chat::ChatFeed;
use crate::server::database::Database;
use crate::server::identity;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloMessage {
    pub message_type: String, // "hello"
    pub external_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloResponse {
    pub message_type: String, // "hello_response"
    pub success: bool,
    pub role_name: Option<String>,
    pub error: Option<String>,
}

pub async fn run_feed_listener(
    addr: &str,
    feed: Arc<ChatFeed>,
    db: Arc<Database>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("[FEED] Chat feed listening on {}", addr);

    while let Ok((stream, peer)) = listener.accept().await {
        info!("[FEED] New feed connection from {}", peer);
        let feed = feed.clone();
        let db = db.clone();

        tokio::spawn(async move {
            match tokio_tungstenite::accept_async(stream).await {
                Ok(ws_stream) => {
                    if let Err(e) = handle_viewer(ws_stream, feed, db).await {
                        error!("[FEED] Feed connection error ({}): {}", peer, e);
                    }
                }
                Err(e) => error!("[FEED] WebSocket handshake failed ({}): {}", peer, e),
            }
        });
    }

    Ok(())
}

async fn handle_viewer(
    ws_stream: WebSocketStream<TcpStream>,
    feed: Arc<ChatFeed>,
    db: Arc<Database>,
) -> anyhow::Result<()> {
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    // The viewer has 30 seconds to identify itself
    let hello = tokio::time::timeout(tokio::time::Duration::from_secs(30), ws_receiver.next()).await;
    let hello = match hello {
        Ok(Some(Ok(Message::Text(text)))) => match serde_json::from_str::<HelloMessage>(&text) {
            Ok(hello) if hello.message_type == "hello" => hello,
            _ => {
                let response = HelloResponse {
                    message_type: "hello_response".to_string(),
                    success: false,
                    role_name: None,
                    error: Some("expected a hello frame".to_string()),
                };
                let _ = ws_sender.send(Message::Text(serde_json::to_string(&response)?)).await;
                return Err(anyhow::anyhow!("invalid hello frame"));
            }
        },
        Ok(Some(Ok(Message::Close(_)))) | Ok(None) => return Ok(()),
        Ok(_) => return Err(anyhow::anyhow!("unexpected frame during hello")),
        Err(_) => {
            let response = HelloResponse {
                message_type: "hello_response".to_string(),
                success: false,
                role_name: None,
                error: Some("hello timeout".to_string()),
            };
            let _ = ws_sender.send(Message::Text(serde_json::to_string(&response)?)).await;
            return Err(anyhow::anyhow!("hello timeout"));
        }
    };

    let member = match identity::resolve(db.clone(), &hello.external_id).await {
        Ok(Some(member)) => member,
        Ok(None) => {
            let response = HelloResponse {
                message_type: "hello_response".to_string(),
                success: false,
                role_name: None,
                error: Some("identity not recognised, bind a role first".to_string()),
            };
            let _ = ws_sender.send(Message::Text(serde_json::to_string(&response)?)).await;
            return Err(anyhow::anyhow!("unresolved viewer identity"));
        }
        Err(e) => return Err(anyhow::anyhow!("identity lookup failed: {}", e)),
    };

    let response = HelloResponse {
        message_type: "hello_response".to_string(),
        success: true,
        role_name: Some(member.role_name.clone()),
        error: None,
    };
    ws_sender.send(Message::Text(serde_json::to_string(&response)?)).await?;
    info!("[FEED] Viewer authenticated as {}", member.role_name);

    let mut events = feed.subscribe();

    // Forward committed events until either side goes away. A lagging
    // receiver has missed events for good; close so the client knows to
    // re-fetch.
    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        let frame = serde_json::to_string(&event)?;
                        if ws_sender.send(Message::Text(frame)).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        info!("[FEED] Viewer {} lagged, dropped {} events, closing", member.role_name, missed);
                        let _ = ws_sender.send(Message::Close(None)).await;
                        break;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = ws_receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    // The feed is one-way; other frames are ignored
                    _ => {}
                }
            }
        }
    }

    info!("[FEED] Viewer {} disconnected", member.role_name);
    Ok(())
}
