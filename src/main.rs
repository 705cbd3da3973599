use std::net::SocketAddr;

use anyhow::Context;
use faceid::api::routes;
use faceid::pipeline::detect::{seeta_factory, DetectParams};
use faceid::utils::config::Config;
use faceid::utils::logging;
use faceid::AppState;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    let cfg = Config::from_env();
    std::fs::create_dir_all(&cfg.upload_dir)
        .with_context(|| format!("creating upload dir {}", cfg.upload_dir.display()))?;

    let detectors = seeta_factory(cfg.detector_model.clone(), DetectParams::default());
    let port = cfg.port;
    let (state, report) = tokio::task::spawn_blocking(move || AppState::start(cfg, detectors))
        .await
        .context("engine startup panicked")?
        .context("starting recognition engine")?;
    info!(
        source = ?report.source,
        faces = report.encoded,
        skipped = report.skipped,
        people = report.people,
        "model ready"
    );

    let app = routes::router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("listening" = %addr);
    axum::serve(listener, app).await?;
    Ok(())
}
