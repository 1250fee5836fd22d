//! Inference engine for the weed-spotting camera: strided tensors, SIMD conv/pool kernels, and a
//! fixed-topology CNN that turns a frame into a [`Detection`].

mod env;
pub mod error;
pub mod io;
pub mod model;
pub mod ops;
pub mod profiling;
pub mod tensor;

pub use env::{PARAMS_DIR_VAR, PROFILE_VAR};
pub use error::{CnnError, CnnResult, TensorError, TensorResult};
pub use model::{Cnn, CnnConfig, Detection, ForwardState, InMemoryParams, ParamSource, WeightSharing};
pub use tensor::{Shape, Tensor};
