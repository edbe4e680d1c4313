use std::sync::{Arc, OnceLock};
use std::time::Duration;

use hibernate_ws::core::{EngineError, HibernationConfig};
use hibernate_ws::hibernation::{
    EngineFuture, EventParams, ExecutionEngine, ExecutionHandle, HandleParts,
    HibernatableSocketEvent, HibernationClient, HibernationManager, HibernationManagerArgs,
    WebSocketHandle,
};
use hibernate_ws::transport::SocketTransport;
use hibernate_ws::transport::tungstenite::accept;
use kameo::actor::WeakActorRef;
use sonic_rs::{JsonValueTrait, json};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn usage() -> &'static str {
    "room_server\n\
  Chat rooms over hibernatable websockets. Connect to ws://<addr>/<room>;\n\
  every text message is broadcast to the room. All sockets are hibernated\n\
  periodically to show that connections survive eviction.\n\
\n\
USAGE:\n\
  cargo run --example room_server -- [--addr <host:port>] [--hibernate-secs <N>] [--timeout-ms <N>]\n\
\n\
DEFAULTS:\n\
  --addr            127.0.0.1:9001\n\
  --hibernate-secs  10\n\
  --timeout-ms      (none)\n\
"
}

fn parse_args() -> (String, u64, Option<u64>) {
    let mut addr = "127.0.0.1:9001".to_string();
    let mut hibernate_secs = 10;
    let mut timeout_ms = None;
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        let value = |it: &mut dyn Iterator<Item = String>| {
            it.next().unwrap_or_else(|| {
                eprintln!("{usage}", usage = usage());
                std::process::exit(2)
            })
        };
        match arg.as_str() {
            "--addr" => addr = value(&mut it),
            "--hibernate-secs" => {
                hibernate_secs = value(&mut it).parse().unwrap_or_else(|_| {
                    eprintln!("--hibernate-secs must be a number");
                    std::process::exit(2)
                })
            }
            "--timeout-ms" => {
                timeout_ms = Some(value(&mut it).parse().unwrap_or_else(|_| {
                    eprintln!("--timeout-ms must be a number");
                    std::process::exit(2)
                }))
            }
            "-h" | "--help" => {
                println!("{}", usage());
                std::process::exit(0)
            }
            other => {
                eprintln!("unknown arg: {other}\n\n{usage}", usage = usage());
                std::process::exit(2)
            }
        }
    }
    (addr, hibernate_secs, timeout_ms)
}

/// Broadcasts every text message to the sender's room.
///
/// The manager owns the engine, so the engine only keeps a weak ref back to it.
#[derive(Default)]
struct RoomEngine {
    manager: OnceLock<WeakActorRef<HibernationManager<RoomEngine>>>,
}

fn room_of(handle: &WebSocketHandle) -> Option<String> {
    handle
        .attachment()
        .and_then(|a| a.get("room").and_then(|r| r.as_str().map(str::to_string)))
}

impl ExecutionEngine for RoomEngine {
    type Handle = WebSocketHandle;

    fn build_handle(&self, parts: HandleParts) -> Self::Handle {
        WebSocketHandle::new(parts)
    }

    fn dispatch(&self, event: HibernatableSocketEvent<Self>) -> EngineFuture {
        let manager = self
            .manager
            .get()
            .and_then(WeakActorRef::upgrade)
            .map(HibernationClient::new);
        Box::pin(async move {
            let EventParams::Text(text) = event.params() else {
                info!(socket = %event.socket(), params = ?event.params(), "non-text event");
                return Ok(());
            };
            let Some(manager) = manager else {
                return Err(EngineError::new("room manager is not running"));
            };
            let me = event
                .web_socket()
                .await
                .map_err(|e| EngineError::new(e.to_string()))?;
            let Some(room) = room_of(&me) else {
                return Err(EngineError::new("socket has no room attachment"));
            };
            let peers = manager
                .get_web_sockets(Some(&room))
                .await
                .map_err(|e| EngineError::new(e.to_string()))?;
            let line = format!("[{room}] {}: {text}", event.socket());
            for peer in peers {
                if let Err(err) = peer.send_text(line.clone()).await {
                    warn!(socket = %peer.socket(), error = %err, "broadcast failed");
                }
            }
            Ok(())
        })
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let (addr, hibernate_secs, timeout_ms) = parse_args();

    let engine = Arc::new(RoomEngine::default());
    let mut config = HibernationConfig::default();
    if let Some(ms) = timeout_ms {
        config = config.with_event_timeout(Duration::from_millis(ms));
    }
    let manager = HibernationClient::spawn(
        HibernationManagerArgs::new(Arc::clone(&engine)).with_config(config),
    );
    let _ = engine.manager.set(manager.actor_ref().downgrade());

    let hibernator = manager.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(hibernate_secs));
        tick.tick().await;
        loop {
            tick.tick().await;
            match hibernator.hibernate_all().await {
                Ok(count) => info!(count, "hibernated idle sockets"),
                Err(err) => {
                    warn!(error = %err, "hibernate_all failed");
                    break;
                }
            }
        }
    });

    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "room server listening");
    loop {
        let (stream, peer_addr) = listener.accept().await?;
        let manager = manager.clone();
        tokio::spawn(async move {
            let socket = match accept(stream).await {
                Ok(socket) => socket,
                Err(err) => {
                    warn!(%peer_addr, error = %err, "websocket upgrade failed");
                    return;
                }
            };
            let url = socket.metadata().url.unwrap_or_default();
            let room = url
                .rsplit('/')
                .next()
                .filter(|r| !r.is_empty())
                .unwrap_or("lobby")
                .to_string();
            match manager.accept_web_socket(socket, [room.clone()]).await {
                Ok(accepted) => {
                    accepted.handle.set_attachment(Some(json!({ "room": room.as_str() })));
                    info!(socket = %accepted.socket, %room, "joined room");
                }
                Err(err) => warn!(%peer_addr, error = %err, "websocket rejected"),
            }
        });
    }
}
