//! The weed-detection network: topology, parameters, and the forward pass.

mod cnn;
pub mod config;
pub mod params;

pub use cnn::{Cnn, Detection, ForwardState, PipelineStage, WeightSharing};
pub use config::{CnnConfig, MapDims, Stage};
pub use params::{InMemoryParams, ParamSource, PixelStats};
