use axum::extract::DefaultBodyLimit;
use axum::http::Method;
use axum::{routing::{get, post}, Router};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::api::handlers;
use crate::AppState;

/// Largest accepted request body (uploads).
pub const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods(vec![Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(vec![axum::http::header::CONTENT_TYPE, axum::http::header::ACCEPT]);

    Router::new()
        .route("/", get(handlers::index))
        .route("/static/app.js", get(handlers::app_js))
        .route("/static/style.css", get(handlers::style_css))
        .route("/health", get(handlers::health))
        .route("/recognize_image", post(handlers::recognize_image))
        .route("/video_feed", get(handlers::video_feed))
        .route("/add_face", post(handlers::add_face))
        .route("/known_faces", get(handlers::known_faces))
        .route("/delete_face/:name", post(handlers::delete_face).delete(handlers::delete_face))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .with_state(state)
}
