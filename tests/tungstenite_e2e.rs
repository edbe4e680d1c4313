mod common;

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use hibernate_ws::core::HibernationConfig;
use hibernate_ws::hibernation::EventParams;
use hibernate_ws::transport::tungstenite::accept;
use tokio::net::TcpListener;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use common::{spawn_manager, wait_for_stats};

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn real_socket_survives_hibernation_and_reports_close() {
    let mut h = spawn_manager(HibernationConfig::default());
    h.engine.set_echo_text(true);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let manager = h.client.clone();
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let socket = accept(stream).await.unwrap();
        manager.accept_web_socket(socket, ["e2e"]).await.unwrap()
    });

    let mut request = format!("ws://{addr}/chat").into_client_request().unwrap();
    request
        .headers_mut()
        .insert("sec-websocket-protocol", "chat".parse().unwrap());
    let (mut ws, _) = connect_async(request).await.unwrap();
    let accepted = server.await.unwrap();

    assert_eq!(accepted.handle.url(), Some(format!("ws://{addr}/chat").as_str()));
    assert_eq!(accepted.handle.protocol(), Some("chat"));

    ws.send(Message::text("hello")).await.unwrap();
    let echoed = tokio::time::timeout(WAIT, ws.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(echoed, Message::text("hello"));

    assert_eq!(h.client.hibernate_all().await.unwrap(), 1);
    ws.send(Message::text("still here")).await.unwrap();
    let echoed = tokio::time::timeout(WAIT, ws.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(echoed, Message::text("still here"));

    ws.close(Some(CloseFrame {
        code: CloseCode::from(4000),
        reason: "bye".into(),
    }))
    .await
    .unwrap();

    let mut close = None;
    while let Some(event) = h.events.recv_timeout(WAIT).await {
        if event.params.is_close() {
            close = Some(event.params);
            break;
        }
    }
    assert_eq!(
        close,
        Some(EventParams::Close {
            code: 4000,
            reason: "bye".into(),
            was_clean: true,
        })
    );
    wait_for_stats(&h.client, WAIT, |s| s.sockets == 0 && s.tags == 0).await;
}
