pub mod utils;
pub mod models;
pub mod pipeline;
pub mod api;

use std::sync::Arc;

use pipeline::cache::ModelCache;
use pipeline::detect::DetectorFactory;
use pipeline::engine::{spawn_engine, EngineError, EngineHandle};
use pipeline::model::LoadReport;
use pipeline::reference::ReferenceSet;
use utils::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub reference: ReferenceSet,
    pub engine: EngineHandle,
    /// Builds detectors for consumers outside the engine thread (video streams).
    pub detectors: DetectorFactory,
}

impl AppState {
    /// Open the reference set, start the engine and load (or train) the model.
    pub fn start(config: Config, detectors: DetectorFactory) -> Result<(Arc<Self>, LoadReport), EngineError> {
        let reference = ReferenceSet::open(&config.known_faces)?;
        let cache = ModelCache::new(&config.model_file, &config.labels_file);
        let (engine, report) = spawn_engine(reference.clone(), cache, detectors.clone(), config.unknown_distance)?;
        let state = Self {
            config,
            reference,
            engine,
            detectors,
        };
        Ok((Arc::new(state), report))
    }
}
