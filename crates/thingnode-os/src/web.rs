use std::net::{Ipv4Addr, SocketAddr};

use thingnode::error::{ErrorKind as CoreErrorKind, Result as CoreResult};
use thingnode::network::http::{Method, Request, RequestId, Response};
use thingnode::network::services::WebServer;

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{Method as HttpMethod, StatusCode, Uri, header},
    response::{IntoResponse, Response as AxumResponse},
};

use hashbrown::HashMap;

use tokio_util::sync::CancellationToken;

use tracing::{debug, error, info};

use crate::error::Error;

// The number of requests waiting to be polled by the engine.
const REQUEST_CAPACITY: usize = 16;

// A request forwarded to the engine, together with the channel of its
// response.
struct Pending {
    method: Method,
    path: String,
    body: Vec<u8>,
    reply: flume::Sender<Response>,
}

/// An `HTTP` server built on `axum`.
///
/// Every request is forwarded to the engine, which polls it and answers
/// through [`WebServer::respond`]. The server must be started from within a
/// `tokio` runtime.
#[derive(Default)]
pub struct AxumServer {
    requests: Option<flume::Receiver<Pending>>,
    replies: HashMap<RequestId, flume::Sender<Response>>,
    next_id: RequestId,
    local_address: Option<SocketAddr>,
    cancellation_token: Option<CancellationToken>,
}

impl AxumServer {
    /// Creates an [`AxumServer`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the address the server is listening on.
    #[must_use]
    pub const fn local_address(&self) -> Option<SocketAddr> {
        self.local_address
    }
}

fn into_axum(response: &Response) -> AxumResponse {
    let headers = response.headers();
    let status =
        StatusCode::from_u16(headers.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    (
        status,
        [(header::CONTENT_TYPE, headers.content_type)],
        response.body().to_vec(),
    )
        .into_response()
}

async fn forward(
    State(sender): State<flume::Sender<Pending>>,
    method: HttpMethod,
    uri: Uri,
    body: Bytes,
) -> AxumResponse {
    let (reply, response) = flume::bounded(1);
    let pending = Pending {
        method: Method::from_name(method.as_str()),
        path: uri
            .path_and_query()
            .map_or_else(|| uri.path().to_string(), ToString::to_string),
        body: body.to_vec(),
        reply,
    };

    if sender.send_async(pending).await.is_err() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    match response.recv_async().await {
        Ok(response) => into_axum(&response),
        Err(_) => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

impl WebServer for AxumServer {
    fn start(&mut self, port: u16) -> CoreResult<()> {
        let into_core = |e: std::io::Error| Error::from(e).into_core(CoreErrorKind::Web);

        // Binding synchronously reports a busy port to the caller.
        let listener =
            std::net::TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).map_err(into_core)?;
        listener.set_nonblocking(true).map_err(into_core)?;
        let listener = tokio::net::TcpListener::from_std(listener).map_err(into_core)?;
        let local_address = listener.local_addr().map_err(into_core)?;

        let (sender, requests) = flume::bounded(REQUEST_CAPACITY);
        let router = Router::new().fallback(forward).with_state(sender);

        let cancellation_token = CancellationToken::new();
        let shutdown = cancellation_token.clone();
        drop(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
            {
                error!("HTTP server stopped: {e}");
            }
        }));

        info!("HTTP server listening on {local_address}");
        self.requests = Some(requests);
        self.local_address = Some(local_address);
        self.cancellation_token = Some(cancellation_token);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(cancellation_token) = self.cancellation_token.take() {
            info!("Stopping the HTTP server");
            cancellation_token.cancel();
        }
        self.requests = None;
        self.replies.clear();
        self.local_address = None;
    }

    fn is_running(&self) -> bool {
        self.cancellation_token.is_some()
    }

    fn poll(&mut self) -> Option<Request> {
        let pending = self.requests.as_ref()?.try_recv().ok()?;

        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        let _ = self.replies.insert(id, pending.reply);

        Some(Request {
            id,
            method: pending.method,
            path: pending.path,
            body: pending.body,
        })
    }

    fn respond(&mut self, request: RequestId, response: Response) {
        let Some(reply) = self.replies.remove(&request) else {
            debug!("No pending request with id {request}");
            return;
        };
        if reply.send(response).is_err() {
            debug!("Client of request {request} went away");
        }
    }
}
