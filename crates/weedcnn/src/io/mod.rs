//! On-disk parameter and topology formats.

pub mod json_params;

pub use json_params::{load_config, JsonParamDir};
