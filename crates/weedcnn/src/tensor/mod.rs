//! Tensor abstractions shared by every kernel.
//!
//! A [`Tensor`] is a row-major window over a reference-counted `f32` buffer. Slicing, reshaping
//! and cloning are zero-copy and produce aliases; writes through one alias are visible through
//! every other alias of the same region.

mod host_tensor;
pub mod nested;
pub mod shape;
mod storage;

pub use host_tensor::Tensor;
pub use nested::{Nested, Nested1, Nested2, Nested3, Nested4, Nested5};
pub use shape::Shape;
pub use storage::{ReadGuard, WriteGuard};
