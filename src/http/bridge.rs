//! Bridges a single axum request onto the generic serving engine in
//! `crate::server`, grounded on `http/routes.rs` and `http/handlers.rs`.
//! One wildcard route is all that's needed: the resource tree already
//! knows how to route everything past this point.

use crate::path::Path;
use crate::server::address::is_private;
use crate::server::request::{Request, Type};
use crate::server::response::Response;
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response as AxumResponse};
use bytes::Bytes;
use futures_util::stream;
use futures_util::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

const BODY_CHANNEL_CAPACITY: usize = 32;

fn request_type(method: &Method) -> Option<Type> {
    match *method {
        Method::GET | Method::HEAD => Some(Type::Get),
        Method::POST => Some(Type::Post),
        Method::PUT => Some(Type::Put),
        Method::OPTIONS => Some(Type::Options),
        _ => None,
    }
}

pub async fn handle_dynamic_request(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    req: axum::extract::Request,
) -> AxumResponse {
    let method = req.method().clone();
    let raw_path = req.uri().path().to_string();

    let Some(typ) = request_type(&method) else {
        return (StatusCode::METHOD_NOT_ALLOWED, "unsupported method").into_response();
    };
    let path = match Path::parse(raw_path.trim_start_matches('/')) {
        Ok(p) => p,
        Err(e) => return (StatusCode::BAD_REQUEST, e).into_response(),
    };

    let private_networks = state.instance.private_networks().await;
    let is_public = !is_private(&peer.ip(), &private_networks);

    let (in_tx, in_rx) = mpsc::channel::<Bytes>(BODY_CHANNEL_CAPACITY);
    let body = req.into_body();
    tokio::spawn(async move {
        let mut incoming = body.into_data_stream();
        while let Some(frame) = incoming.next().await {
            let Ok(chunk) = frame else { break };
            if in_tx.send(chunk).await.is_err() {
                break;
            }
        }
    });

    let request = Request::new(path, typ, is_public, in_rx);
    let (out_tx, mut out_rx) = mpsc::channel::<Bytes>(BODY_CHANNEL_CAPACITY);
    let response = Arc::new(Response::new(out_tx));

    let server = state.instance.server().clone();
    let response_for_task = response.clone();
    let mut dispatch_task = tokio::spawn(async move {
        let _ = server.dispatch(&request, &response_for_task).await;
    });

    // Headers are frozen either once the first body byte is written, or
    // once dispatch finishes having written nothing at all. Race the two
    // so a long-lived stream (a live interleave GET) doesn't have to
    // finish before the client sees a status line.
    let first_chunk = tokio::select! {
        biased;
        chunk = out_rx.recv() => chunk,
        _ = &mut dispatch_task => out_rx.try_recv().ok(),
    };

    let status = response.status().await;
    let mime = response.mime().await;
    let headers = response.headers().await;
    let cache_kind = response.cache_kind().await;
    drop(response);

    let rest = ReceiverStream::new(out_rx).map(Ok::<_, std::io::Error>);
    let body_stream: futures_util::stream::BoxStream<'static, Result<Bytes, std::io::Error>> = match first_chunk {
        Some(chunk) => stream::once(async move { Ok(chunk) }).chain(rest).boxed(),
        None => rest.boxed(),
    };

    let mut builder = AxumResponse::builder()
        .status(StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR))
        .header(axum::http::header::CONTENT_TYPE, mime)
        .header(axum::http::header::CACHE_CONTROL, cache_kind.header_value());
    for (name, value) in headers {
        builder = builder.header(name, value);
    }
    builder
        .body(Body::from_stream(body_stream))
        .unwrap_or_else(|_| (StatusCode::INTERNAL_SERVER_ERROR, "response build failure").into_response())
}
