//! # `api`
//!
//! Plain HTTP/1 endpoints exposing the tracked instance state.
//!
//! - `GET /health`: `ok`
//! - `GET /status`: `Server State: <state>` as text
//! - `GET /state`: the full snapshot as JSON
//!
//! ```json
//! {
//!     "state": "running",
//!     "age_ms": 1250,
//!     "updated_at": "2025-01-01T00:00:00Z",
//!     "generation": 7,
//!     "stale": false
//! }
//! ```
//!
//! Reads never wait on the provider; a stale read schedules a refresh and
//! answers with what is cached.

use core::convert::Infallible;
use std::{
    io,
    net::SocketAddr,
};

use http_body_util::Full;
use hyper::{
    Method,
    Request,
    Response,
    StatusCode,
    body::Bytes,
    header,
};
use hyper_util::rt::TokioIo;
use instance_state::StateAccessor;
use tokio::net::{
    TcpListener,
    TcpStream,
};
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("failed to bind status server address: {addr}")]
    BindAddress {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

fn response(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, header::HeaderValue::from_static(content_type));
    response
}

/// Answers one request from the cached state.
#[tracing::instrument(
    level = "debug",
    skip_all,
    fields(method = %req.method(), path = %req.uri().path())
)]
pub async fn accept_request<B>(
    req: Request<B>,
    accessor: StateAccessor,
) -> Result<Response<Full<Bytes>>, Infallible> {
    if req.method() != Method::GET {
        return Ok(response(
            StatusCode::METHOD_NOT_ALLOWED,
            "text/plain",
            "method not allowed",
        ));
    }

    let reply = match req.uri().path() {
        "/health" => response(StatusCode::OK, "text/plain", "ok"),
        "/status" => {
            let state = accessor.get_state();
            response(
                StatusCode::OK,
                "text/plain; charset=utf-8",
                format!("Server State: {state}"),
            )
        }
        "/state" => match serde_json::to_vec(&accessor.snapshot()) {
            Ok(body) => response(StatusCode::OK, "application/json", body),
            Err(err) => {
                tracing::error!(error = ?err, "Failed to serialize state snapshot");
                response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "text/plain",
                    "failed to serialize state",
                )
            }
        },
        _ => response(StatusCode::NOT_FOUND, "text/plain", "not found"),
    };

    Ok(reply)
}

/// Serves connections until `cancel_token` fires.
pub async fn serve(
    listener: TcpListener,
    accessor: StateAccessor,
    cancel_token: CancellationToken,
) -> Result<(), ApiError> {
    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                tracing::info!("Status server received cancellation signal, shutting down...");
                break;
            }
            res = listener.accept() => {
                match res {
                    Ok((stream, socketaddr)) => {
                        serve_connection(socketaddr, accessor.clone(), stream);
                    }
                    Err(err) => {
                        tracing::error!(?err, "Error accepting connection");
                    }
                }
            }
        }
    }

    Ok(())
}

/// Binds `addr` for [`serve`].
pub async fn bind(addr: SocketAddr) -> Result<TcpListener, ApiError> {
    TcpListener::bind(addr).await.map_err(|source| {
        tracing::error!(bind_addr = %addr, error = ?source, "Failed to bind status server listener");
        ApiError::BindAddress { addr, source }
    })
}

fn serve_connection(socketaddr: SocketAddr, accessor: StateAccessor, stream: TcpStream) {
    tracing::debug!(client = %socketaddr, "Connection accepted");

    // Adapter exposing `tokio::io` traits as `hyper::rt` IO traits.
    let io = TokioIo::new(stream);

    tokio::task::spawn(async move {
        if let Err(err) = hyper::server::conn::http1::Builder::new()
            .serve_connection(
                io,
                hyper::service::service_fn(move |req| accept_request(req, accessor.clone())),
            )
            .await
        {
            tracing::error!(?err, "Error serving connection");
        }
    });
}
