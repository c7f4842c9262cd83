//! Multi-room chat on top of carillon.
//!
//! ```text
//! cargo run --example chat
//! # browser: http://localhost:8080/
//! curl -d 'hello from curl' localhost:8080/say/lobby
//! ```

use carillon::observability::init_logging;
use carillon::{header, HandlerError, Method, Server, ServerConfig, WsRoute};
use serde_json::json;
use tokio_tungstenite::tungstenite::Message;

const PAGE: &str = r#"<!doctype html>
<title>carillon chat</title>
<input id="room" value="lobby"> <button onclick="join()">join</button>
<pre id="log"></pre>
<input id="line" size="60" onkeydown="if(event.key==='Enter'){ws.send(this.value);this.value=''}">
<script>
let ws;
function join() {
  if (ws) ws.close();
  ws = new WebSocket(`ws://${location.host}/room/${room.value}`);
  ws.onmessage = (e) => { log.textContent += e.data + "\n"; };
}
join();
</script>
"#;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig::default();
    init_logging(&config.observability.log_level);

    let mut server = Server::new(config);

    server.on_http("/", Method::GET, |ctx| {
        ctx.res.set_header(header::CONTENT_TYPE, "text/html; charset=utf-8");
        ctx.res.set_body(PAGE);
        Ok(())
    })?;

    server.on_http("/rooms", Method::GET, |ctx| {
        let rooms: Vec<_> = ctx
            .channels()
            .names()
            .into_iter()
            .map(|name| {
                let size = ctx.channels().size(&name);
                json!({ "room": name, "members": size })
            })
            .collect();
        let body = serde_json::to_string(&rooms).map_err(|e| HandlerError::Internal(e.to_string()))?;
        ctx.res.set_header(header::CONTENT_TYPE, "application/json");
        ctx.res.set_body(body);
        Ok(())
    })?;

    // Post into a room from plain HTTP.
    server.on_http("/say/([a-z0-9_-]+)", Method::POST, |ctx| {
        let channel = format!("/room/{}", ctx.req.path[1]);
        if !ctx.channels().contains(&channel) {
            return Err(HandlerError::Status(404));
        }
        let line = format!("[http] {}", ctx.req.text());
        let delivered = ctx.channels().broadcast(&channel, Message::text(line));
        ctx.res.set_body(format!("delivered to {}\n", delivered));
        Ok(())
    })?;

    server.on_websocket(
        "/room/([a-z0-9_-]+)",
        WsRoute::new()
            .on_begin(|ctx| {
                let nick = ctx.req.param("nick").unwrap_or("guest").to_string();
                ctx.broadcast(format!("* {}#{} joined ({} here)", nick, ctx.id(), ctx.channel_size()));
            })
            .on_data(|ctx| {
                // Binary frames are echoed to the sender only.
                if ctx.binary {
                    ctx.send_binary(ctx.msg.clone());
                    return;
                }
                let text = ctx.text().into_owned();
                if text == "/who" {
                    let rooms = ctx.channel_names().join(", ");
                    ctx.send(format!("* {} here, rooms: {}", ctx.channel_size(), rooms));
                } else if let Some(line) = text.strip_prefix("/lobby ") {
                    let delivered = ctx.broadcast_to("/room/lobby", format!("[{}] {}", ctx.channel(), line));
                    ctx.send(format!("* sent to {} in the lobby", delivered));
                } else {
                    ctx.broadcast(format!("{}: {}", ctx.id(), text));
                }
            })
            .on_end(|ctx| {
                ctx.broadcast(format!("* {} left", ctx.id()));
            }),
    )?;

    server.listen()?;
    Ok(())
}
