pub mod cache;
pub mod detect;
pub mod engine;
pub mod lbph;
pub mod model;
pub mod overlay;
pub mod recognize;
pub mod reference;
pub mod video;
