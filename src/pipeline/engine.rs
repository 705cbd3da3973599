//! Dedicated OS thread that owns the detector and the current model.
//!
//! Detectors are not `Send`, and training must not interleave with
//! recognition, so every model-touching request from async handlers is
//! queued to this thread and answered over a oneshot channel.

use std::path::PathBuf;
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::models::face::RecognitionReport;
use crate::pipeline::cache::{CacheError, ModelCache};
use crate::pipeline::detect::{DetectorError, DetectorFactory};
use crate::pipeline::model::{load_or_train, FaceModel, LoadReport, ModelError};
use crate::pipeline::recognize::Recognizer;
use crate::pipeline::reference::{ReferenceError, ReferenceSet};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Reference(#[from] ReferenceError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

enum EngineRequest {
    Recognize {
        path: PathBuf,
        reply: oneshot::Sender<RecognitionReport>,
    },
    AddFace {
        path: PathBuf,
        name: String,
        reply: oneshot::Sender<Result<LoadReport, EngineError>>,
    },
    RemoveFace {
        name: String,
        reply: oneshot::Sender<Result<LoadReport, EngineError>>,
    },
    Reload {
        reply: oneshot::Sender<Result<LoadReport, EngineError>>,
    },
    Snapshot {
        reply: oneshot::Sender<Arc<FaceModel>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn call<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> EngineRequest) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx.send(build(reply_tx)).await.map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Recognize faces in the image at `path` with the current model.
    pub async fn recognize(&self, path: PathBuf) -> Result<RecognitionReport, EngineError> {
        self.call(|reply| EngineRequest::Recognize { path, reply }).await
    }

    /// Copy the image into the person's folder, invalidate the cache and retrain.
    pub async fn add_face(&self, path: PathBuf, name: String) -> Result<LoadReport, EngineError> {
        self.call(|reply| EngineRequest::AddFace { path, name, reply }).await?
    }

    /// Delete the person's folder, invalidate the cache and retrain.
    pub async fn remove_face(&self, name: String) -> Result<LoadReport, EngineError> {
        self.call(|reply| EngineRequest::RemoveFace { name, reply }).await?
    }

    pub async fn reload(&self) -> Result<LoadReport, EngineError> {
        self.call(|reply| EngineRequest::Reload { reply }).await?
    }

    /// The model currently in use, for consumers that run their own detector.
    pub async fn snapshot(&self) -> Result<Arc<FaceModel>, EngineError> {
        self.call(|reply| EngineRequest::Snapshot { reply }).await
    }
}

struct Engine {
    reference: ReferenceSet,
    cache: ModelCache,
    recognizer: Recognizer,
}

impl Engine {
    fn reload(&mut self) -> Result<LoadReport, EngineError> {
        let (model, report) = load_or_train(&self.reference, &self.cache, self.recognizer.detector_mut())?;
        self.recognizer.set_model(Arc::new(model));
        Ok(report)
    }

    fn add_face(&mut self, path: &std::path::Path, name: &str) -> Result<LoadReport, EngineError> {
        self.reference.add_image(path, name)?;
        self.cache.invalidate()?;
        self.reload()
    }

    fn remove_face(&mut self, name: &str) -> Result<LoadReport, EngineError> {
        self.reference.remove_person(name)?;
        self.cache.invalidate()?;
        self.reload()
    }

    fn handle(&mut self, req: EngineRequest) {
        match req {
            EngineRequest::Recognize { path, reply } => {
                let report = self.recognizer.recognize_path(&path);
                tracing::debug!(path = ?path, faces = report.faces.len(), "recognized image");
                let _ = reply.send(report);
            }
            EngineRequest::AddFace { path, name, reply } => {
                let result = self.add_face(&path, &name);
                if let Err(e) = &result {
                    tracing::warn!(person = %name, error = %e, "add face failed");
                }
                let _ = reply.send(result);
            }
            EngineRequest::RemoveFace { name, reply } => {
                let result = self.remove_face(&name);
                if let Err(e) = &result {
                    tracing::warn!(person = %name, error = %e, "remove face failed");
                }
                let _ = reply.send(result);
            }
            EngineRequest::Reload { reply } => {
                let _ = reply.send(self.reload());
            }
            EngineRequest::Snapshot { reply } => {
                let _ = reply.send(self.recognizer.model().clone());
            }
        }
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The detector is built and the model loaded (or trained) on that thread
/// before this returns, so startup failures surface here.
pub fn spawn_engine(
    reference: ReferenceSet,
    cache: ModelCache,
    detectors: DetectorFactory,
    unknown_distance: f64,
) -> Result<(EngineHandle, LoadReport), EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(16);
    let (init_tx, init_rx) = std_mpsc::sync_channel::<Result<LoadReport, EngineError>>(1);

    std::thread::Builder::new()
        .name("faceid-engine".into())
        .spawn(move || {
            let detector = match detectors() {
                Ok(d) => d,
                Err(e) => {
                    let _ = init_tx.send(Err(e.into()));
                    return;
                }
            };
            let recognizer = Recognizer::new(detector, Arc::new(FaceModel::empty()), unknown_distance);
            let mut engine = Engine { reference, cache, recognizer };
            match engine.reload() {
                Ok(report) => {
                    let _ = init_tx.send(Ok(report));
                }
                Err(e) => {
                    let _ = init_tx.send(Err(e));
                    return;
                }
            }

            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                engine.handle(req);
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    let report = init_rx.recv().map_err(|_| EngineError::ChannelClosed)??;
    Ok((EngineHandle { tx }, report))
}
