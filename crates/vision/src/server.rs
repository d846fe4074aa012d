//! Actix Web server exposing the MJPEG stream, status, and health endpoints.
//!
//! The server runs on a dedicated thread so the detection loop never shares a runtime
//! with HTTP handling. Handlers touch shared state only through the status store and
//! the frame publisher.

use actix_web::{
    App, HttpResponse, HttpServer,
    http::header,
    middleware::DefaultHeaders,
    web::{self, Bytes},
};
use anyhow::{Context, Result};
use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{error, info};

use crate::{
    publisher::{FramePublisher, MULTIPART_BOUNDARY},
    status::StatusStore,
    telemetry,
};

/// MJPEG responses never finish on their own, so graceful stop is kept short.
const SHUTDOWN_GRACE_SECS: u64 = 2;

/// Shared state backing HTTP handlers.
#[derive(Clone)]
pub struct ServerState {
    pub status: StatusStore,
    pub frames: FramePublisher,
    pub health: HealthInfo,
}

/// Static facts reported by the health endpoint.
#[derive(Clone, Debug, Serialize)]
pub struct HealthInfo {
    pub model: String,
    pub port: u16,
    pub video_source: serde_json::Value,
}

#[derive(Serialize)]
struct HealthResponse<'a> {
    status: &'static str,
    #[serde(flatten)]
    info: &'a HealthInfo,
}

/// Handle for the server thread.
pub struct StreamServer {
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl StreamServer {
    /// Signal the server to stop and block until the thread exits.
    pub fn stop(self) {
        if let Some(tx) = self.shutdown {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle {
            let _ = handle.join();
        }
    }
}

/// Register every route on an app or test service.
pub fn configure(state: ServerState) -> impl FnOnce(&mut web::ServiceConfig) {
    move |cfg| {
        cfg.app_data(web::Data::new(state))
            .route("/", web::get().to(index_handler))
            .route("/video", web::get().to(stream_handler))
            .route("/frame.jpg", web::get().to(frame_handler))
            .route("/api/detection-status", web::get().to(status_handler))
            .route("/api/health", web::get().to(health_handler))
            .route("/metrics", web::get().to(metrics_handler));
    }
}

fn cors_headers() -> DefaultHeaders {
    DefaultHeaders::new()
        .add((header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"))
        .add((header::ACCESS_CONTROL_ALLOW_HEADERS, "*"))
        .add((header::ACCESS_CONTROL_ALLOW_METHODS, "GET"))
}

/// Bind `0.0.0.0:port` and serve on a new thread.
///
/// Bind failures are reported before this returns, so a taken port is an
/// initialisation error rather than a silent background failure.
pub fn spawn_stream_server(state: ServerState, port: u16) -> Result<StreamServer> {
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let (ready_tx, ready_rx) = std::sync::mpsc::channel::<std::io::Result<()>>();

    let handle = telemetry::spawn_thread("stream-server", move || {
        let result = actix_web::rt::System::new().block_on(async move {
            let server = HttpServer::new(move || {
                App::new()
                    .wrap(cors_headers())
                    .configure(configure(state.clone()))
            })
            .workers(2)
            .shutdown_timeout(SHUTDOWN_GRACE_SECS)
            .bind(("0.0.0.0", port));
            let server = match server {
                Ok(server) => {
                    let _ = ready_tx.send(Ok(()));
                    server.run()
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                    return Ok(());
                }
            };

            let srv_handle = server.handle();
            actix_web::rt::spawn(async move {
                let _ = shutdown_rx.await;
                srv_handle.stop(true).await;
            });

            server.await
        });
        if let Err(err) = result {
            error!("HTTP server error: {err}");
        }
    })
    .context("Failed to spawn stream server thread")?;

    ready_rx
        .recv()
        .context("stream server thread exited before binding")?
        .with_context(|| format!("Failed to bind stream server on port {port}"))?;
    info!("Video stream at http://localhost:{port}/video");
    info!("API status at http://localhost:{port}/api/detection-status");

    Ok(StreamServer {
        shutdown: Some(shutdown_tx),
        handle: Some(handle),
    })
}

async fn index_handler() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; charset=utf-8")
        .body("Fire detection stream running")
}

/// Stream the annotated feed as multipart JPEG parts.
async fn stream_handler(state: web::Data<ServerState>) -> HttpResponse {
    let parts = state
        .frames
        .subscribe()
        .map(Ok::<Bytes, actix_web::Error>);

    HttpResponse::Ok()
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .insert_header((
            header::CONTENT_TYPE,
            format!("multipart/x-mixed-replace; boundary={MULTIPART_BOUNDARY}"),
        ))
        .streaming(parts)
}

/// Return the latest frame as a single JPEG.
async fn frame_handler(state: web::Data<ServerState>) -> HttpResponse {
    match state.frames.latest_jpeg() {
        Some(Ok(jpeg)) => HttpResponse::Ok().content_type("image/jpeg").body(jpeg),
        Some(Err(err)) => HttpResponse::InternalServerError().body(err.to_string()),
        None => HttpResponse::NoContent().finish(),
    }
}

async fn status_handler(state: web::Data<ServerState>) -> HttpResponse {
    HttpResponse::Ok().json(state.status.read())
}

async fn health_handler(state: web::Data<ServerState>) -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "running",
        info: &state.health,
    })
}

async fn metrics_handler() -> HttpResponse {
    match telemetry::prometheus_handle() {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::NotFound().body("metrics recorder not installed"),
    }
}
