//! WebSocket proxy handling.
//!
//! # Responsibilities
//! - Detect WebSocket upgrade requests
//! - Establish WebSocket connection to the upstream before upgrading the client
//! - Complete upgrade handshake with client
//! - Bidirectional frame forwarding
//!
//! # Data Flow
//! ```text
//! Client ←──── WebSocket frames ────→ Gateway ←──── WebSocket frames ────→ Upstream
//! ```
//!
//! # Design Decisions
//! - Upstream failure is reported before the client is upgraded (502)
//! - Frame-level forwarding (no message buffering)
//! - Close frames propagated in both directions
//! - Every bridge is registered so shutdown can close it

use axum::body::Body;
use axum::extract::ws::{self, WebSocket, WebSocketUpgrade};
use axum::extract::FromRequestParts;
use axum::http::{header, HeaderMap, HeaderName, Request};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, client::IntoClientRequest};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::context::RequestContext;
use crate::http::server::AppState;
use crate::model::ServiceServer;
use crate::net::SocketGuard;
use crate::proxy::headers::{upstream_request_headers, Forwarded};
use crate::proxy::transport::bad_gateway;
use crate::routing::Host;

type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Handshake headers the websocket client library generates itself.
const HANDSHAKE_HEADERS: &[&str] = &[
    "host",
    "sec-websocket-key",
    "sec-websocket-version",
    "sec-websocket-extensions",
    "sec-websocket-accept",
];

/// Bridge an authorized upgrade request to `server`.
pub async fn proxy_websocket(
    state: &AppState,
    host: &Host,
    server: &ServiceServer,
    ctx: &RequestContext,
    request: Request<Body>,
) -> Response {
    let (mut parts, _body) = request.into_parts();

    let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, state).await {
        Ok(upgrade) => upgrade,
        Err(rejection) => return rejection.into_response(),
    };

    let scheme = if server.is_https() { "wss" } else { "ws" };
    let authority = server.base_url();
    let authority = authority
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(authority.as_str());
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|p| p.as_str())
        .unwrap_or("/");
    let url = format!("{}://{}{}", scheme, authority, path_and_query);

    let headers = upstream_request_headers(
        &parts.headers,
        &Forwarded {
            client_ip: ctx.client_ip,
            proto: ctx.scheme,
            port: ctx.port,
            host_override: host.domain.host.as_deref(),
        },
    );

    let (upstream, protocol) = match connect_upstream(&url, &headers).await {
        Ok(connected) => connected,
        Err(e) => {
            tracing::warn!(
                request_id = %ctx.request_id,
                upstream = %url,
                error = %e,
                "Websocket upstream connection failed"
            );
            return bad_gateway();
        }
    };

    let upgrade = match protocol {
        Some(protocol) => upgrade.protocols([protocol]),
        None => upgrade,
    };

    let guard = state.sockets.track();
    let request_id = ctx.request_id.clone();
    tracing::debug!(
        request_id = %request_id,
        connection_id = %guard.id(),
        upstream = %url,
        "Websocket bridge opened"
    );

    upgrade.on_upgrade(move |client| async move {
        bridge(client, upstream, guard).await;
        tracing::debug!(request_id = %request_id, "Websocket bridge closed");
    })
}

async fn connect_upstream(
    url: &str,
    headers: &HeaderMap,
) -> Result<(UpstreamSocket, Option<String>), tungstenite::Error> {
    let mut request = url.into_client_request()?;
    for (name, value) in headers {
        if HANDSHAKE_HEADERS.contains(&name.as_str()) {
            continue;
        }
        request.headers_mut().append(name.clone(), value.clone());
    }
    // Upstreams see the client's Host unless the domain overrides it.
    if let Some(host) = headers.get(header::HOST) {
        request
            .headers_mut()
            .insert(HeaderName::from_static("host"), host.clone());
    }

    let (socket, response) = tokio_tungstenite::connect_async(request).await?;
    let protocol = response
        .headers()
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    Ok((socket, protocol))
}

async fn bridge(client: WebSocket, upstream: UpstreamSocket, mut guard: SocketGuard) {
    let (mut client_tx, mut client_rx) = client.split();
    let (mut upstream_tx, mut upstream_rx) = upstream.split();

    loop {
        tokio::select! {
            msg = client_rx.next() => match msg {
                Some(Ok(msg)) => {
                    let closing = matches!(msg, ws::Message::Close(_));
                    if upstream_tx.send(to_upstream(msg)).await.is_err() || closing {
                        break;
                    }
                }
                _ => break,
            },
            msg = upstream_rx.next() => match msg {
                Some(Ok(msg)) => {
                    let closing = matches!(msg, tungstenite::Message::Close(_));
                    if let Some(msg) = to_client(msg) {
                        if client_tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                    if closing {
                        break;
                    }
                }
                _ => break,
            },
            _ = guard.closed() => {
                let _ = client_tx.send(ws::Message::Close(None)).await;
                let _ = upstream_tx.send(tungstenite::Message::Close(None)).await;
                break;
            }
        }
    }

    let _ = client_tx.close().await;
    let _ = upstream_tx.close().await;
}

fn to_upstream(msg: ws::Message) -> tungstenite::Message {
    match msg {
        ws::Message::Text(text) => tungstenite::Message::Text(text.as_str().into()),
        ws::Message::Binary(data) => tungstenite::Message::Binary(data),
        ws::Message::Ping(data) => tungstenite::Message::Ping(data),
        ws::Message::Pong(data) => tungstenite::Message::Pong(data),
        ws::Message::Close(frame) => {
            tungstenite::Message::Close(frame.map(|f| tungstenite::protocol::CloseFrame {
                code: f.code.into(),
                reason: f.reason.as_str().into(),
            }))
        }
    }
}

fn to_client(msg: tungstenite::Message) -> Option<ws::Message> {
    match msg {
        tungstenite::Message::Text(text) => Some(ws::Message::Text(text.as_str().into())),
        tungstenite::Message::Binary(data) => Some(ws::Message::Binary(data)),
        tungstenite::Message::Ping(data) => Some(ws::Message::Ping(data)),
        tungstenite::Message::Pong(data) => Some(ws::Message::Pong(data)),
        tungstenite::Message::Close(frame) => Some(ws::Message::Close(frame.map(|f| {
            ws::CloseFrame {
                code: f.code.into(),
                reason: f.reason.as_str().into(),
            }
        }))),
        tungstenite::Message::Frame(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_keep_their_payload() {
        match to_upstream(ws::Message::Text("hello".into())) {
            tungstenite::Message::Text(text) => assert_eq!(text.as_str(), "hello"),
            other => panic!("unexpected frame: {:?}", other),
        }

        let close = to_client(tungstenite::Message::Close(Some(
            tungstenite::protocol::CloseFrame {
                code: tungstenite::protocol::frame::coding::CloseCode::Normal,
                reason: "bye".into(),
            },
        )));
        match close {
            Some(ws::Message::Close(Some(frame))) => {
                assert_eq!(frame.code, 1000);
                assert_eq!(frame.reason.as_str(), "bye");
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }
}
