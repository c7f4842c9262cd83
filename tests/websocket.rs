//! WebSocket upgrade, channel broadcast and session lifecycle.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use carillon::{Method, Server, WsRoute};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

mod common;

use common::{http_client, spawn_server, spawn_server_with_limit, test_config};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn next_text(ws: &mut Ws) -> String {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("read failed");
        match msg {
            Message::Text(text) => return text.as_str().to_string(),
            Message::Binary(data) => return String::from_utf8(data.to_vec()).unwrap(),
            _ => continue,
        }
    }
}

async fn wait_for<F: Fn() -> bool>(cond: F) {
    for _ in 0..100 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached");
}

fn chat_route() -> WsRoute {
    WsRoute::new()
        .on_begin(|ctx| {
            ctx.send(format!("joined {}", ctx.channel_size()));
        })
        .on_data(|ctx| {
            let text = ctx.text().into_owned();
            if text == "burst" {
                for i in 0..100 {
                    ctx.send(i.to_string());
                }
            } else {
                ctx.broadcast(text);
            }
        })
}

#[tokio::test]
async fn broadcast_reaches_every_member() {
    let mut server = Server::new(test_config());
    server.on_websocket("/chat/(\\w+)", chat_route()).unwrap();
    let srv = spawn_server(server).await;

    let (mut a, _) = connect_async(srv.ws_url("/chat/room")).await.unwrap();
    assert_eq!(next_text(&mut a).await, "joined 1");
    let (mut b, _) = connect_async(srv.ws_url("/chat/room")).await.unwrap();
    assert_eq!(next_text(&mut b).await, "joined 2");
    let (mut other, _) = connect_async(srv.ws_url("/chat/elsewhere")).await.unwrap();
    assert_eq!(next_text(&mut other).await, "joined 1");

    a.send(Message::text("hello room")).await.unwrap();
    assert_eq!(next_text(&mut a).await, "hello room");
    assert_eq!(next_text(&mut b).await, "hello room");

    other.send(Message::text("only me")).await.unwrap();
    assert_eq!(next_text(&mut other).await, "only me");

    // `b` must not have seen the other room's message.
    b.send(Message::text("ping")).await.unwrap();
    assert_eq!(next_text(&mut b).await, "ping");

    srv.stop().await;
}

#[tokio::test]
async fn sends_arrive_in_order() {
    let mut server = Server::new(test_config());
    server.on_websocket("/chat/(\\w+)", chat_route()).unwrap();
    let srv = spawn_server(server).await;

    let (mut ws, _) = connect_async(srv.ws_url("/chat/order")).await.unwrap();
    assert_eq!(next_text(&mut ws).await, "joined 1");

    ws.send(Message::text("burst")).await.unwrap();
    for i in 0..100 {
        assert_eq!(next_text(&mut ws).await, i.to_string());
    }

    srv.stop().await;
}

#[tokio::test]
async fn close_runs_end_callback_and_leaves_channel() {
    let ended = Arc::new(AtomicUsize::new(0));
    let disconnected = Arc::new(AtomicUsize::new(0));

    let mut server = Server::new(test_config());
    let counter = Arc::clone(&ended);
    server
        .on_websocket(
            "/chat/(\\w+)",
            chat_route().on_end(move |ctx| {
                assert_eq!(ctx.channel(), "/chat/lobby");
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();
    let counter = Arc::clone(&disconnected);
    server.on_websocket_disconnect(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let channels = Arc::clone(server.channels());
    let srv = spawn_server(server).await;

    let (mut a, _) = connect_async(srv.ws_url("/chat/lobby")).await.unwrap();
    next_text(&mut a).await;
    let (mut b, _) = connect_async(srv.ws_url("/chat/lobby")).await.unwrap();
    next_text(&mut b).await;
    assert_eq!(channels.size("/chat/lobby"), 2);

    a.close(None).await.unwrap();
    wait_for(|| ended.load(Ordering::SeqCst) == 1).await;
    wait_for(|| channels.size("/chat/lobby") == 1).await;
    assert_eq!(disconnected.load(Ordering::SeqCst), 1);

    // Abrupt drop without a close frame still ends the session.
    drop(b);
    wait_for(|| ended.load(Ordering::SeqCst) == 2).await;
    wait_for(|| channels.size("/chat/lobby") == 0).await;

    srv.stop().await;
}

#[tokio::test]
async fn captures_and_query_are_visible_to_callbacks() {
    let mut server = Server::new(test_config());
    server
        .on_websocket(
            "/chat/(\\w+)",
            WsRoute::new().on_begin(|ctx| {
                let greeting = format!(
                    "{} {} {}",
                    ctx.req.path[1],
                    ctx.req.param("nick").unwrap_or("anon"),
                    ctx.channel()
                );
                ctx.send(greeting);
            }),
        )
        .unwrap();
    let srv = spawn_server(server).await;

    let (mut ws, _) = connect_async(srv.ws_url("/chat/dev?nick=ada")).await.unwrap();
    assert_eq!(next_text(&mut ws).await, "dev ada /chat/dev");

    srv.stop().await;
}

#[tokio::test]
async fn unmatched_websocket_path_is_refused() {
    let mut server = Server::new(test_config());
    server.on_websocket("/chat/(\\w+)", chat_route()).unwrap();
    let srv = spawn_server(server).await;

    assert!(connect_async(srv.ws_url("/nowhere")).await.is_err());

    srv.stop().await;
}

#[tokio::test]
async fn http_handler_can_broadcast_into_channel() {
    let mut server = Server::new(test_config());
    server.on_websocket("/chat/(\\w+)", chat_route()).unwrap();
    server
        .on_http("/notify", Method::POST, |ctx| {
            let text = ctx.req.text().into_owned();
            let delivered = ctx
                .channels()
                .broadcast("/chat/news", Message::text(text));
            ctx.res.set_body(delivered.to_string());
            Ok(())
        })
        .unwrap();
    let srv = spawn_server(server).await;

    let (mut ws, _) = connect_async(srv.ws_url("/chat/news")).await.unwrap();
    next_text(&mut ws).await;

    let delivered = http_client()
        .post(srv.url("/notify"))
        .body("breaking")
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(delivered, "1");
    assert_eq!(next_text(&mut ws).await, "breaking");

    srv.stop().await;
}

#[tokio::test]
async fn shutdown_closes_open_sessions() {
    let mut server = Server::new(test_config());
    server.on_websocket("/chat/(\\w+)", chat_route()).unwrap();
    let srv = spawn_server(server).await;

    let (mut ws, _) = connect_async(srv.ws_url("/chat/bye")).await.unwrap();
    next_text(&mut ws).await;

    srv.stop().await;

    let end = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(end.is_ok());
}

#[tokio::test]
async fn first_registered_websocket_route_wins() {
    let mut server = Server::new(test_config());
    server
        .on_websocket(
            "/chat/admin",
            WsRoute::new().on_begin(|ctx| {
                ctx.send("admin");
            }),
        )
        .unwrap();
    server
        .on_websocket(
            "/chat/(\\w+)",
            WsRoute::new().on_begin(|ctx| {
                let room = format!("room {}", ctx.req.path[1]);
                ctx.send(room);
            }),
        )
        .unwrap();
    let srv = spawn_server(server).await;

    let (mut admin, _) = connect_async(srv.ws_url("/chat/admin")).await.unwrap();
    assert_eq!(next_text(&mut admin).await, "admin");
    let (mut dev, _) = connect_async(srv.ws_url("/chat/dev")).await.unwrap();
    assert_eq!(next_text(&mut dev).await, "room dev");

    srv.stop().await;
}

#[tokio::test]
async fn open_session_holds_its_connection_slot() {
    let mut server = Server::new(test_config());
    server.on_websocket("/chat/(\\w+)", chat_route()).unwrap();
    server
        .on_http("/", Method::GET, |ctx| {
            ctx.res.set_body("served");
            Ok(())
        })
        .unwrap();
    let srv = spawn_server_with_limit(server, 1).await;

    let (mut ws, _) = connect_async(srv.ws_url("/chat/solo")).await.unwrap();
    assert_eq!(next_text(&mut ws).await, "joined 1");

    // The kernel completes the handshake, but the server must not accept
    // while the session owns the only slot.
    let mut second = TcpStream::connect(srv.addr).await.unwrap();
    second
        .write_all(b"GET / HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut buf = [0u8; 64];
    let early = tokio::time::timeout(Duration::from_millis(500), second.read(&mut buf)).await;
    assert!(early.is_err(), "second connection served while the session held the slot");

    ws.close(None).await.unwrap();
    drop(ws);

    let mut out = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), second.read_to_end(&mut out))
        .await
        .expect("slot was not released after the session closed")
        .unwrap();
    let out = String::from_utf8_lossy(&out);
    assert!(out.starts_with("HTTP/1.1 200"));
    assert!(out.ends_with("served"));

    srv.stop().await;
}
