//! HTTP server implementation
//!
//! hyper http1 with TokioIo, one task per connection. The server is thin
//! glue: health and status, the live event stream, and read access to the
//! cache.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::config::Args;
use crate::db::DocumentCache;
use crate::events::Broadcaster;
use crate::reconcile::ReconcilerSet;
use crate::routes;
use crate::space::SpaceRouter;
use crate::types::Result;

/// Response body; not `Sync` because event streams are not
pub type BoxBody = http_body_util::combinators::UnsyncBoxBody<Bytes, hyper::Error>;

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub cache: DocumentCache,
    pub broadcaster: Arc<Broadcaster>,
    pub reconcilers: Arc<ReconcilerSet>,
    pub router: Arc<SpaceRouter>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        args: Args,
        cache: DocumentCache,
        broadcaster: Arc<Broadcaster>,
        reconcilers: Arc<ReconcilerSet>,
        router: Arc<SpaceRouter>,
    ) -> Self {
        Self {
            args,
            cache,
            broadcaster,
            reconcilers,
            router,
            started_at: Utc::now(),
        }
    }
}

/// Bind the configured address and serve until shutdown
pub async fn run(state: Arc<AppState>, shutdown: watch::Receiver<bool>) -> Result<()> {
    let listener = TcpListener::bind(state.args.listen).await?;
    info!(listen = %state.args.listen, "Watchtower listening");
    serve(listener, state, shutdown).await
}

/// Serve connections from a bound listener until shutdown is signalled
///
/// Open connections (event streams included) are not drained; they end
/// when the process exits.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("HTTP server stopping");
                return Ok(());
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let state = Arc::clone(&state);
                    tokio::spawn(async move {
                        let io = TokioIo::new(stream);

                        let service = service_fn(move |req| {
                            let state = Arc::clone(&state);
                            async move { handle_request(state, addr, req).await }
                        });

                        if let Err(err) = http1::Builder::new()
                            .serve_connection(io, service)
                            .await
                        {
                            debug!("Error serving connection from {}: {:?}", addr, err);
                        }
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {:?}", e);
                }
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> std::result::Result<Response<BoxBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);

    debug!("[{}] {} {}", addr, method, path);

    let response = match (method, path.as_str()) {
        (Method::GET, "/health") | (Method::GET, "/healthz") => {
            to_boxed(routes::health_check(&state))
        }

        (Method::GET, "/status") => to_boxed(routes::status_check(&state)),

        // CORS preflight
        (Method::OPTIONS, _) => to_boxed(preflight_response()),

        // Live change records
        (Method::GET, "/events") => routes::handle_events(Arc::clone(&state)).await,

        // Cache reads: /api/cache/{collection}[/{id}]
        (Method::GET, p) if p.starts_with("/api/cache/") => {
            to_boxed(routes::handle_cache_request(&state, p, query.as_deref()))
        }

        // Manual trigger: /api/sync/{spaceId}
        (Method::POST, p) if p.starts_with("/api/sync/") => {
            to_boxed(routes::handle_sync_request(&state, p))
        }

        _ => to_boxed(not_found_response(&path)),
    };

    Ok(response)
}

/// Convert a Full<Bytes> body to BoxBody
pub(crate) fn to_boxed(response: Response<Full<Bytes>>) -> Response<BoxBody> {
    response.map(|body| body.map_err(|never| match never {}).boxed_unsync())
}

/// CORS preflight response
fn preflight_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Headers", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, OPTIONS")
        .body(Full::new(Bytes::new()))
        .unwrap()
}

/// Not found response
pub(crate) fn not_found_response(path: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "error": "Not Found",
        "path": path,
    });

    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}

/// Bad request response
pub(crate) fn bad_request_response(message: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "error": "Bad Request",
        "message": message
    });

    Response::builder()
        .status(StatusCode::BAD_REQUEST)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}
