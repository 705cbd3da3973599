use std::convert::Infallible;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::models::face::ActionResult;
use crate::pipeline::engine::EngineError;
use crate::pipeline::overlay::Overlay;
use crate::pipeline::recognize::Recognizer;
use crate::pipeline::reference::{validate_person_name, ReferenceError};
use crate::pipeline::video::{multipart_part, FfmpegCapture, FrameStream, VideoSource, BOUNDARY};
use crate::utils::path::{allowed_file, secure_filename, StagedUpload};
use crate::AppState;

const INDEX_HTML: &str = include_str!("../../static/index.html");
const APP_JS: &str = include_str!("../../static/app.js");
const STYLE_CSS: &str = include_str!("../../static/style.css");

fn embedded(content_type: &'static str, body: &'static str) -> Response {
    axum::http::Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from(body))
        .unwrap_or_else(|e| error_json(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

/// Browser front end for upload, live video and reference-set management.
pub async fn index() -> Response {
    embedded("text/html; charset=utf-8", INDEX_HTML)
}

pub async fn app_js() -> Response {
    embedded("text/javascript; charset=utf-8", APP_JS)
}

pub async fn style_css() -> Response {
    embedded("text/css; charset=utf-8", STYLE_CSS)
}

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") })))
}

fn error_json(status: StatusCode, message: impl Into<String>) -> Response {
    let message = message.into();
    warn!(status = status.as_u16(), %message, "request rejected");
    (status, Json(json!({ "error": message }))).into_response()
}

fn action_json(status: StatusCode, result: ActionResult) -> Response {
    (status, Json(result)).into_response()
}

fn multipart_error(e: MultipartError) -> Response {
    error_json(e.status(), e.body_text())
}

struct UploadedFile {
    filename: String,
    bytes: Bytes,
}

async fn read_file(field: Field<'_>) -> Result<UploadedFile, MultipartError> {
    let filename = field.file_name().unwrap_or_default().to_string();
    let bytes = field.bytes().await?;
    Ok(UploadedFile { filename, bytes })
}

/// Validate the client filename and stage the bytes under the upload dir.
fn stage(state: &AppState, file: &UploadedFile) -> Result<StagedUpload, Response> {
    let Some(name) = secure_filename(&file.filename).filter(|n| allowed_file(n)) else {
        return Err(error_json(StatusCode::BAD_REQUEST, "File type not allowed"));
    };
    StagedUpload::write(&state.config.upload_dir, &name, &file.bytes).map_err(|e| {
        tracing::error!(error = %e, "failed to stage upload");
        error_json(StatusCode::INTERNAL_SERVER_ERROR, format!("Error processing image: {e}"))
    })
}

pub async fn recognize_image(State(state): State<Arc<AppState>>, mut multipart: Multipart) -> Response {
    let mut file = None;
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) if field.name() == Some("file") => match read_file(field).await {
                Ok(f) => {
                    file = Some(f);
                    break;
                }
                Err(e) => return multipart_error(e),
            },
            Ok(Some(_)) => continue,
            Ok(None) => break,
            Err(e) => return multipart_error(e),
        }
    }

    let Some(file) = file else {
        return error_json(StatusCode::BAD_REQUEST, "No file provided");
    };
    if file.filename.is_empty() {
        return error_json(StatusCode::BAD_REQUEST, "No file selected");
    }
    let staged = match stage(&state, &file) {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    match state.engine.recognize(staged.path().to_path_buf()).await {
        Ok(report) => {
            info!(file = %file.filename, faces = report.faces.len(), "recognized upload");
            (StatusCode::OK, Json(report)).into_response()
        }
        Err(e) => error_json(StatusCode::INTERNAL_SERVER_ERROR, format!("Error processing image: {e}")),
    }
}

pub async fn add_face(State(state): State<Arc<AppState>>, mut multipart: Multipart) -> Response {
    let mut file = None;
    let mut name = None;
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => match field.name().map(str::to_owned).as_deref() {
                Some("file") => match read_file(field).await {
                    Ok(f) => file = Some(f),
                    Err(e) => return multipart_error(e),
                },
                Some("name") => match field.text().await {
                    Ok(text) => name = Some(text.trim().to_string()),
                    Err(e) => return multipart_error(e),
                },
                _ => {}
            },
            Ok(None) => break,
            Err(e) => return multipart_error(e),
        }
    }

    let (Some(file), Some(name)) = (file, name) else {
        return error_json(StatusCode::BAD_REQUEST, "Missing file or name");
    };
    if file.filename.is_empty() || name.is_empty() || validate_person_name(&name).is_err() {
        return error_json(StatusCode::BAD_REQUEST, "Invalid file or name");
    }
    let staged = match stage(&state, &file) {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    match state.engine.add_face(staged.path().to_path_buf(), name.clone()).await {
        Ok(report) => {
            info!(person = %name, faces = report.encoded, "face added");
            action_json(StatusCode::OK, ActionResult::ok(format!("Face added for {name}")))
        }
        Err(EngineError::Reference(e @ (ReferenceError::InvalidName(_) | ReferenceError::UnsupportedImage(_)))) => {
            action_json(StatusCode::BAD_REQUEST, ActionResult::fail(format!("Error adding face: {e}")))
        }
        Err(e) => action_json(StatusCode::INTERNAL_SERVER_ERROR, ActionResult::fail(format!("Error: {e}"))),
    }
}

pub async fn known_faces(State(state): State<Arc<AppState>>) -> Response {
    let reference = state.reference.clone();
    match tokio::task::spawn_blocking(move || reference.people()).await {
        Ok(Ok(faces)) => (StatusCode::OK, Json(json!({ "faces": faces }))).into_response(),
        Ok(Err(e)) => error_json(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        Err(e) => error_json(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

pub async fn delete_face(State(state): State<Arc<AppState>>, Path(name): Path<String>) -> Response {
    match state.engine.remove_face(name.clone()).await {
        Ok(_) => action_json(StatusCode::OK, ActionResult::ok(format!("Deleted {name}"))),
        Err(EngineError::Reference(ReferenceError::PersonNotFound(_) | ReferenceError::InvalidName(_))) => {
            action_json(StatusCode::NOT_FOUND, ActionResult::fail("Person not found"))
        }
        Err(e) => action_json(StatusCode::INTERNAL_SERVER_ERROR, ActionResult::fail(format!("Error: {e}"))),
    }
}

/// `multipart/x-mixed-replace` stream of annotated frames from the configured source.
///
/// Capture and recognition run on a blocking thread with their own detector and
/// a snapshot of the current model. When the client disconnects the next send
/// fails, the frame stream is dropped, and the decoder is stopped.
pub async fn video_feed(State(state): State<Arc<AppState>>) -> Response {
    let source: VideoSource = match state.config.video_source.parse() {
        Ok(s) => s,
        Err(e) => return error_json(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
    };
    let model = match state.engine.snapshot().await {
        Ok(m) => m,
        Err(e) => return error_json(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };

    let (ready_tx, ready_rx) = oneshot::channel::<Result<(), (StatusCode, String)>>();
    let (tx, rx) = mpsc::channel::<Bytes>(4);
    let detectors = state.detectors.clone();
    let font = state.config.font.clone();
    let unknown_distance = state.config.unknown_distance;

    tokio::task::spawn_blocking(move || {
        let capture = match FfmpegCapture::open(&source) {
            Ok(c) => c,
            Err(e) => {
                let _ = ready_tx.send(Err((StatusCode::SERVICE_UNAVAILABLE, e.to_string())));
                return;
            }
        };
        let detector = match detectors() {
            Ok(d) => d,
            Err(e) => {
                let _ = ready_tx.send(Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string())));
                return;
            }
        };
        let (width, height) = capture.dimensions();
        let recognizer = Recognizer::new(detector, model, unknown_distance);
        let stream = FrameStream::new(capture, recognizer, Overlay::load(font.as_deref()));
        if ready_tx.send(Ok(())).is_err() {
            return;
        }

        info!(%source, width, height, "video stream started");
        let mut sent = 0u64;
        for frame in stream {
            match frame {
                Ok(jpeg) => {
                    if tx.blocking_send(multipart_part(&jpeg)).is_err() {
                        info!(frames = sent, "video client disconnected");
                        return;
                    }
                    sent += 1;
                }
                Err(e) => {
                    warn!(error = %e, "video stream failed");
                    return;
                }
            }
        }
        info!(frames = sent, "video stream finished");
    });

    match ready_rx.await {
        Ok(Ok(())) => {}
        Ok(Err((status, message))) => return error_json(status, message),
        Err(_) => return error_json(StatusCode::INTERNAL_SERVER_ERROR, "video worker exited"),
    }

    let body = futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|part| (Ok::<_, Infallible>(part), rx))
    });
    axum::http::Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, format!("multipart/x-mixed-replace; boundary={BOUNDARY}"))
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(body))
        .unwrap_or_else(|e| error_json(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}
