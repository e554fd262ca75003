//! HTTP and WebSocket surface.
//!
//! Endpoints:
//! - POST /enroll        - enroll or update an identity from a photo batch
//! - POST /verify        - one-shot identification of a single image
//! - GET  /ws/attendance - kiosk streaming (frames in, results fanned out)
//! - GET  /healthcheck   - liveness probe

use std::sync::Arc;

use anyhow::Result;
use axum::{
    Json, Router,
    extract::State,
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use facegate_enroll::{
    EmbedError, Embedder, EnrollError, EnrollOptions, EnrollmentCoordinator,
};
use facegate_gallery::{Matcher, vecmath};
use facegate_stream::message::{Outbound, handshake_device_id};
use facegate_stream::FramePipeline;

/// Shared server state, built once at startup and handed to every
/// handler. No ambient singletons.
#[derive(Clone)]
pub struct AppState {
    pub matcher: Arc<Matcher>,
    pub coordinator: Arc<EnrollmentCoordinator>,
    pub embedder: Arc<dyn Embedder>,
    pub pipeline: Arc<FramePipeline>,
    pub match_threshold: f32,
}

/// Start serving on `addr`. Runs until the process is stopped.
pub async fn serve(addr: &str, state: AppState) -> Result<()> {
    let app = Router::new()
        .route("/enroll", post(enroll))
        .route("/verify", post(verify))
        .route("/ws/attendance", get(ws_attendance))
        .route("/healthcheck", get(healthcheck))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr, "facegated listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn healthcheck() -> impl IntoResponse {
    Json(json!({"success": true}))
}

// ---- enrollment ----

#[derive(Debug, Deserialize)]
struct EnrollImage {
    label: String,
    /// Base64-encoded image bytes.
    data: String,
}

#[derive(Debug, Deserialize)]
struct EnrollBody {
    id: String,
    images: Vec<EnrollImage>,
    allow_update: Option<bool>,
    prevent_duplicate: Option<bool>,
    duplicate_threshold: Option<f32>,
    enforce_consistency: Option<bool>,
    intra_threshold: Option<f32>,
}

async fn enroll(State(state): State<AppState>, Json(body): Json<EnrollBody>) -> Response {
    let defaults = EnrollOptions::default();
    let opts = EnrollOptions {
        allow_update: body.allow_update.unwrap_or(defaults.allow_update),
        prevent_duplicate: body.prevent_duplicate.unwrap_or(defaults.prevent_duplicate),
        duplicate_threshold: body
            .duplicate_threshold
            .unwrap_or(defaults.duplicate_threshold),
        enforce_consistency: body
            .enforce_consistency
            .unwrap_or(defaults.enforce_consistency),
        intra_threshold: body.intra_threshold.unwrap_or(defaults.intra_threshold),
    };

    // Undecodable payloads are skip notes, not a batch failure.
    let mut items = Vec::with_capacity(body.images.len());
    let mut pre_skipped = Vec::new();
    for img in body.images {
        match BASE64.decode(img.data.as_bytes()) {
            Ok(bytes) => items.push((img.label, bytes)),
            Err(e) => {
                warn!(id = %body.id, label = %img.label, "bad base64 in enrollment image");
                pre_skipped.push(json!({"label": img.label, "reason": format!("bad base64: {e}")}));
            }
        }
    }

    if items.is_empty() {
        return Json(json!({
            "status": "rejected",
            "reason": "no_usable_images",
            "skipped": pre_skipped,
        }))
        .into_response();
    }

    match state.coordinator.enroll(&body.id, &items, &opts).await {
        Ok(outcome) => {
            let mut skipped = pre_skipped;
            skipped.extend(
                outcome
                    .skipped
                    .iter()
                    .map(|s| json!({"label": s.label, "reason": s.reason})),
            );
            Json(json!({
                "status": "committed",
                "id": outcome.id,
                "created": outcome.created,
                "sample_count": outcome.sample_count,
                "skipped": skipped,
            }))
            .into_response()
        }
        Err(EnrollError::NoUsableImages) => Json(json!({
            "status": "rejected",
            "reason": "no_usable_images",
        }))
        .into_response(),
        Err(EnrollError::InconsistentSet { worst_label, min_score }) => Json(json!({
            "status": "inconsistent",
            "worst_label": worst_label,
            "min_score": min_score,
        }))
        .into_response(),
        Err(EnrollError::DuplicateFace { existing_id, score }) => Json(json!({
            "status": "duplicate",
            "existing_id": existing_id,
            "score": score,
        }))
        .into_response(),
        Err(EnrollError::AlreadyExists(id)) => (
            StatusCode::CONFLICT,
            Json(json!({"status": "rejected", "reason": "already_exists", "id": id})),
        )
            .into_response(),
        Err(e @ EnrollError::StoreUnavailable(_)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"status": "error", "reason": e.to_string()})),
        )
            .into_response(),
    }
}

// ---- verification ----

#[derive(Debug, Deserialize)]
struct VerifyBody {
    /// Base64-encoded image bytes.
    image: String,
    threshold: Option<f32>,
}

async fn verify(State(state): State<AppState>, Json(body): Json<VerifyBody>) -> Response {
    let threshold = body.threshold.unwrap_or(state.match_threshold);

    let bytes = match BASE64.decode(body.image.as_bytes()) {
        Ok(bytes) => bytes,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"success": false, "message": format!("bad base64: {e}")})),
            )
                .into_response();
        }
    };

    let descriptor = match state.embedder.embed(&bytes).await {
        Ok(raw) => vecmath::normalize(&raw),
        Err(EmbedError::NoFaceDetected) | Err(EmbedError::Decode(_)) => {
            // Ordinary negative outcome, not an error.
            return Json(json!({
                "success": false,
                "score": 0.0,
                "message": "No face detected",
            }))
            .into_response();
        }
        Err(e) => {
            return (
                StatusCode::BAD_GATEWAY,
                Json(json!({"success": false, "message": e.to_string()})),
            )
                .into_response();
        }
    };

    match state.matcher.find_best_match(&descriptor, None) {
        Ok((Some(identity_id), score)) if Matcher::accept(score, threshold) => {
            debug!(identity_id = %identity_id, score, "verification match");
            Json(json!({
                "success": true,
                "identity_id": identity_id,
                "score": vecmath::round4(score),
            }))
            .into_response()
        }
        Ok((Some(_), score)) => Json(json!({
            "success": false,
            "score": vecmath::round4(score),
            "message": "Face not recognized",
        }))
        .into_response(),
        // Empty gallery: a clean negative, never an error.
        Ok((None, _)) => Json(json!({"success": false, "score": 0.0})).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"success": false, "message": e.to_string()})),
        )
            .into_response(),
    }
}

// ---- streaming ----

async fn ws_attendance(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// One task per connection. The handshake message carries the device
/// id; after that, inbound frames run through the shared pipeline and
/// outbound messages flow through the registry's per-connection
/// channel. Dropping out of this function tears everything down, so a
/// disconnect cancels in-flight work before any partial broadcast.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();

    // First message must arrive before the connection joins a room.
    let device_id = loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => break handshake_device_id(&text),
            Some(Ok(Message::Close(_))) | None => return,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                debug!(error = %e, "websocket failed before handshake");
                return;
            }
        }
    };

    let (tx, mut rx) = mpsc::channel::<Outbound>(32);
    let handle = state.pipeline.registry().join(&device_id, tx);
    info!(device_id, "stream connected");

    // Write half: serialize outbound messages onto the socket.
    let write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "dropping unserializable outbound message");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    handle
        .reply(Outbound::Ack {
            device_id: device_id.clone(),
        })
        .await;

    // Read half: feed inbound messages to the pipeline until the
    // transport goes away.
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => state.pipeline.handle_message(&handle, &text).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(device_id, error = %e, "websocket transport error");
                break;
            }
        }
    }

    state.pipeline.registry().leave(&handle);
    write_task.abort();
    info!(device_id, "stream disconnected");
}
