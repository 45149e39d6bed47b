//! Helpers for testing the resolution service.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - When using a [`Server`] or [`MetadataServer`], make sure that the server is held until all
//!    requests to the server have been made. The server stops serving when dropped, and
//!    connections to it will fail. To avoid this, assign it to a variable:
//!    `let server = MetadataServer::new();`.
//!
//!  - Servers need a running `tokio` runtime. Do not combine them with paused test time, since
//!    client timeouts would then elapse instantly.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::extract;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router, middleware};
use serde_json::json;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;
use url::Url;

pub use tempfile::TempDir;

/// The 8-byte signature that starts every PNG file.
pub const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `tokenart` crates and mutes all
///    other logs (such as hyper or reqwest).
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new(
            "tokenart_service=trace,tokenart_sources=trace",
        ))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Creates a temporary directory.
///
/// The directory is deleted when the [`TempDir`] instance is dropped. Use it as a guard to
/// automatically clean up after tests.
pub fn tempdir() -> TempDir {
    TempDir::new().unwrap()
}

/// A test server that binds to a random port and serves a web app.
///
/// This server requires a `tokio` runtime and is supposed to be run in a `tokio::test`. It
/// automatically stops serving when dropped.
#[derive(Debug)]
pub struct Server {
    pub handle: tokio::task::JoinHandle<()>,
    pub socket: SocketAddr,
}

impl Server {
    /// Creates a new test server serving the given `router`.
    pub fn with_router(router: Router) -> Self {
        let listener = std::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();
        let listener = tokio::net::TcpListener::from_std(listener).unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { handle, socket }
    }

    /// Returns the socket address that this server listens on.
    pub fn addr(&self) -> SocketAddr {
        self.socket
    }

    /// Returns the port that this server listens on.
    pub fn port(&self) -> u16 {
        self.addr().port()
    }

    /// Returns a full URL pointing to the given path.
    ///
    /// This URL uses `localhost` as hostname.
    pub fn url(&self, path: &str) -> Url {
        let path = path.trim_start_matches('/');
        format!("http://localhost:{}/{}", self.port(), path)
            .parse()
            .unwrap()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// A server emulating metadata hosts and image gateways, counting the hits per path.
///
/// Routes:
///  - `/metadata/{scheme}/{rest}`: a document with `"image": "{scheme}://{rest}"`.
///  - `/image_url/{scheme}/{rest}`: a document with `"image_url": "{scheme}://{rest}"`.
///  - `/empty_document`: a document without any image.
///  - `/oversized`: a valid document of several kilobytes.
///  - `/chunked/{size}`: a document padded by `size` bytes, streamed without a content length.
///  - `/png/{name}`: a PNG image.
///  - `/garbage_data/{tail}`: the tail echoed back as plain text.
///  - `/respond_statuscode/{num}[/{tail}]`: an empty response with the given status.
///  - `/delay/{time}/{path}`: waits for the humantime duration, then redirects to `/{path}`.
pub struct MetadataServer {
    server: Server,
    hits: Arc<Mutex<BTreeMap<String, usize>>>,
}

impl MetadataServer {
    pub fn new() -> Self {
        let hits = Arc::new(Mutex::new(BTreeMap::new()));

        let hitcounter = {
            let hits = hits.clone();
            move |extract::OriginalUri(uri): extract::OriginalUri,
                  req: extract::Request,
                  next: middleware::Next| {
                let hits = hits.clone();
                async move {
                    {
                        let mut hits = hits.lock().unwrap();
                        let hits = hits.entry(uri.to_string()).or_default();
                        *hits += 1;
                    }

                    next.run(req).await
                }
            }
        };

        let router = Router::new()
            .route(
                "/metadata/:scheme/*rest",
                get(
                    |extract::Path((scheme, rest)): extract::Path<(String, String)>| async move {
                        Json(json!({ "name": "Token", "image": format!("{scheme}://{rest}") }))
                    },
                ),
            )
            .route(
                "/image_url/:scheme/*rest",
                get(
                    |extract::Path((scheme, rest)): extract::Path<(String, String)>| async move {
                        Json(json!({ "image_url": format!("{scheme}://{rest}") }))
                    },
                ),
            )
            .route(
                "/empty_document",
                get(|| async { Json(json!({ "name": "Token" })) }),
            )
            .route(
                "/oversized",
                get(|| async {
                    Json(json!({
                        "image": "ipfs://QmOversized",
                        "description": "x".repeat(4096),
                    }))
                }),
            )
            .route(
                "/chunked/:size",
                get(|extract::Path(size): extract::Path<usize>| async move {
                    let document = json!({
                        "image": "ipfs://QmChunked",
                        "description": "x".repeat(size),
                    })
                    .to_string();
                    let chunks: Vec<_> = document
                        .into_bytes()
                        .chunks(256)
                        .map(|chunk| Ok::<_, Infallible>(chunk.to_vec()))
                        .collect();
                    Body::from_stream(futures::stream::iter(chunks))
                }),
            )
            .route(
                "/png/*name",
                get(|| async { ([(header::CONTENT_TYPE, "image/png")], PNG_SIGNATURE) }),
            )
            .route(
                "/garbage_data/*tail",
                get(|extract::Path(tail): extract::Path<String>| async move { tail }),
            )
            .route(
                "/respond_statuscode/:num",
                get(|extract::Path(num): extract::Path<u16>| async move { status(num) }),
            )
            .route(
                "/respond_statuscode/:num/*tail",
                get(
                    |extract::Path((num, _)): extract::Path<(u16, String)>| async move {
                        status(num)
                    },
                ),
            )
            .route(
                "/delay/:time/*path",
                get(
                    |extract::Path((time, path)): extract::Path<(String, String)>| async move {
                        let duration = humantime::parse_duration(&time).unwrap();
                        tokio::time::sleep(duration).await;

                        (StatusCode::FOUND, [(header::LOCATION, format!("/{path}"))])
                    },
                ),
            )
            .layer(middleware::from_fn(hitcounter));

        let server = Server::with_router(router);

        Self { server, hits }
    }

    /// Returns the total number of requests since the last call, and resets the counters.
    pub fn accesses(&self) -> usize {
        let map = std::mem::take(&mut *self.hits.lock().unwrap());
        map.into_values().sum()
    }

    /// Returns the requests per path since the last call, and resets the counters.
    pub fn all_hits(&self) -> Vec<(String, usize)> {
        let map = std::mem::take(&mut *self.hits.lock().unwrap());
        map.into_iter().collect()
    }

    pub fn url(&self, path: &str) -> Url {
        self.server.url(path)
    }
}

impl Default for MetadataServer {
    fn default() -> Self {
        Self::new()
    }
}

fn status(num: u16) -> impl IntoResponse {
    StatusCode::from_u16(num).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}
