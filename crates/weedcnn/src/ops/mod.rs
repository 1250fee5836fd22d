//! Numeric kernels over [`crate::tensor::Tensor`] views.
//!
//! Kernels validate shapes up front and report failures as [`crate::error::TensorError`]; none of
//! them allocate when handed pre-shaped destination views.

pub mod activation;
pub mod conv;
pub mod image;
pub mod linear;
pub mod pooling;
pub mod simd;

pub use activation::{leaky_relu, relu, sigmoid, softmax};
pub use conv::{
    convolution, convolution_fixed, convolution_prepadded, convolve_into, convolve_into_with_path,
    pad_into, ConvPath,
};
pub use image::{gaussian_blur_kernel, normalize, resize_by_blur, resize_into, rgb_to_chw};
pub use linear::Dense;
pub use pooling::{max_pool, max_pool_into, max_pool_with_indices};
