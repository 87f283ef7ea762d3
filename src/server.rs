//! HTTP front end
//!
//! Routes:
//! - `GET /metrics`: Prometheus text exposition of the instance registry
//! - `GET /stats`: cache statistics as JSON
//! - `GET <path>`: download through the orchestrator
//! - `POST <path>`: upload the request body through the orchestrator
//!
//! Any other method gets 405. The `/metrics` and `/stats` paths shadow
//! files with those keys.

use crate::error::{EdgeError, Result};
use crate::orchestrator::RequestOrchestrator;
use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use prometheus::{Encoder, Registry, TextEncoder};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Body returned for a successful upload
pub const UPLOAD_OK_BODY: &str = "File uploaded successfully";

/// HTTP server over a [`RequestOrchestrator`]
pub struct EdgeServer {
    orchestrator: Arc<RequestOrchestrator>,
    registry: Registry,
}

impl EdgeServer {
    /// `registry` is what `/metrics` exposes
    pub fn new(orchestrator: Arc<RequestOrchestrator>, registry: Registry) -> Self {
        Self {
            orchestrator,
            registry,
        }
    }

    /// Accept connections on `listener` until `shutdown` flips to `true`
    ///
    /// Connections already accepted are served to completion in their own
    /// tasks. Accept errors are logged and do not stop the server.
    pub async fn run(self: Arc<Self>, listener: TcpListener, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let addr = listener
            .local_addr()
            .map_err(|e| EdgeError::HttpError(format!("Listener has no local address: {}", e)))?;
        info!("Listening on http://{}", addr);

        loop {
            let (stream, peer_addr) = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                        continue;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            };

            let io = TokioIo::new(stream);
            let server = Arc::clone(&self);

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let server = Arc::clone(&server);
                    async move { server.handle_request(req).await }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Connection error from {}: {}", peer_addr, err);
                }
            });
        }

        info!("Server stopped accepting connections");
        Ok(())
    }

    async fn handle_request(
        &self,
        req: Request<hyper::body::Incoming>,
    ) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        debug!("{} {}", method, path);

        let response = match (method, path.as_str()) {
            (Method::GET, "/metrics") => self.metrics_response(),
            (Method::GET, "/stats") => self.stats_response(),
            (Method::GET, _) => match self.orchestrator.download(&path).await {
                Ok(data) => {
                    let mut response = Response::new(Full::new(data));
                    response.headers_mut().insert(
                        CONTENT_TYPE,
                        HeaderValue::from_static("application/octet-stream"),
                    );
                    response
                }
                Err(e) => error_response(&path, e),
            },
            (Method::POST, _) => match req.into_body().collect().await {
                Ok(body) => match self.orchestrator.handle_post(&path, body.to_bytes()).await {
                    Ok(_) => text_response(StatusCode::OK, UPLOAD_OK_BODY.to_string()),
                    Err(e) => error_response(&path, e),
                },
                Err(e) => error_response(
                    &path,
                    EdgeError::HttpError(format!("Failed to read request body: {}", e)),
                ),
            },
            _ => text_response(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed".to_string()),
        };

        Ok(response)
    }

    fn metrics_response(&self) -> Response<Full<Bytes>> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            return error_response(
                "/metrics",
                EdgeError::InternalError(format!("Failed to encode metrics: {}", e)),
            );
        }

        let mut response = Response::new(Full::new(Bytes::from(buffer)));
        if let Ok(value) = HeaderValue::from_str(encoder.format_type()) {
            response.headers_mut().insert(CONTENT_TYPE, value);
        }
        response
    }

    fn stats_response(&self) -> Response<Full<Bytes>> {
        match serde_json::to_vec(&self.orchestrator.cache().stats()) {
            Ok(json) => {
                let mut response = Response::new(Full::new(Bytes::from(json)));
                response
                    .headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                response
            }
            Err(e) => error_response(
                "/stats",
                EdgeError::InternalError(format!("Failed to serialize stats: {}", e)),
            ),
        }
    }
}

fn text_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}

fn error_response(path: &str, err: EdgeError) -> Response<Full<Bytes>> {
    let status =
        StatusCode::from_u16(err.to_http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        error!(path = path, "Request failed: {}", err);
    } else {
        debug!(path = path, "Request rejected: {}", err);
    }
    text_response(status, err.to_string())
}
