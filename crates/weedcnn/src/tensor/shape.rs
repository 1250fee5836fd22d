//! Dimension bookkeeping: extents plus the row-major strides derived from them.

use crate::error::{TensorError, TensorResult};

/// Logical dimensions of a tensor together with their row-major strides.
///
/// Strides are never stored independently of the extents: `strides[i]` is always the product of
/// `dims[i + 1..]`, so a `Shape` cannot describe a non-contiguous layout.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Shape {
    dims: Vec<usize>,
    strides: Vec<usize>,
}

impl Shape {
    /// Builds a shape, rejecting rank 0, zero-sized extents and element counts past `usize::MAX`.
    pub fn new<D: Into<Vec<usize>>>(dims: D) -> TensorResult<Self> {
        let dims = dims.into();
        if dims.is_empty() {
            return Err(TensorError::invalid_shape(
                &dims,
                "shape must have at least one dimension",
            ));
        }
        if dims.contains(&0) {
            return Err(TensorError::invalid_shape(
                &dims,
                "every dimension must be positive",
            ));
        }
        let Some(strides) = row_major_strides(&dims) else {
            return Err(TensorError::invalid_shape(
                &dims,
                "element count overflows usize",
            ));
        };
        Ok(Shape { dims, strides })
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Total number of elements (`dims[0] * strides[0]`); zero for the unshaped default.
    pub fn num_elements(&self) -> usize {
        match (self.dims.first(), self.strides.first()) {
            (Some(d), Some(s)) => d * s,
            _ => 0,
        }
    }

    /// True for the placeholder produced by `Shape::default()`.
    pub fn is_unshaped(&self) -> bool {
        self.dims.is_empty()
    }

    /// Shape obtained by dropping the first `count` dimensions.
    pub(crate) fn drop_leading(&self, count: usize) -> Shape {
        Shape {
            dims: self.dims[count..].to_vec(),
            strides: self.strides[count..].to_vec(),
        }
    }

    /// Offset contributed by fixing the leading dimensions to `indices`.
    pub(crate) fn leading_offset(&self, indices: &[usize]) -> TensorResult<usize> {
        if indices.len() > self.rank() {
            return Err(TensorError::invalid_argument(format!(
                "{} indices provided for a rank-{} tensor",
                indices.len(),
                self.rank()
            )));
        }
        let mut offset = 0;
        for ((&index, &extent), &stride) in indices.iter().zip(&self.dims).zip(&self.strides) {
            if index >= extent {
                return Err(TensorError::OutOfBounds { index, extent });
            }
            offset += index * stride;
        }
        Ok(offset)
    }

    /// Flattens a full multi-index.
    pub fn flatten(&self, indices: &[usize]) -> TensorResult<usize> {
        if indices.len() != self.rank() {
            return Err(TensorError::RankMismatch {
                expected: self.rank(),
                actual: indices.len(),
            });
        }
        self.leading_offset(indices)
    }

    pub(crate) fn ensure_rank(&self, expected: usize) -> TensorResult<()> {
        if self.rank() != expected {
            return Err(TensorError::RankMismatch {
                expected,
                actual: self.rank(),
            });
        }
        Ok(())
    }

    pub(crate) fn ensure_same(&self, other: &Shape) -> TensorResult<()> {
        if self.rank() != other.rank() {
            return Err(TensorError::RankMismatch {
                expected: self.rank(),
                actual: other.rank(),
            });
        }
        if self.dims != other.dims {
            return Err(TensorError::shape_mismatch(&self.dims, &other.dims));
        }
        Ok(())
    }
}

/// `None` when the total element count does not fit in `usize`.
fn row_major_strides(dims: &[usize]) -> Option<Vec<usize>> {
    let mut strides = vec![0; dims.len()];
    let mut acc = 1usize;
    for (i, dim) in dims.iter().enumerate().rev() {
        strides[i] = acc;
        acc = acc.checked_mul(*dim)?;
    }
    Some(strides)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strides_are_row_major() {
        let shape = Shape::new(vec![5, 4, 6]).expect("shape");
        assert_eq!(shape.strides(), &[24, 6, 1]);
        assert_eq!(shape.num_elements(), 120);
    }

    #[test]
    fn zero_extent_is_rejected() {
        assert!(matches!(
            Shape::new(vec![2, 0]),
            Err(TensorError::InvalidShape { .. })
        ));
        assert!(Shape::new(Vec::new()).is_err());
    }

    #[test]
    fn overflowing_element_count_is_rejected() {
        assert!(matches!(
            Shape::new(vec![usize::MAX, 2]),
            Err(TensorError::InvalidShape { .. })
        ));
        assert!(matches!(
            Shape::new(vec![2, usize::MAX / 2 + 1, 1]),
            Err(TensorError::InvalidShape { .. })
        ));
        let widest = Shape::new(vec![usize::MAX]).expect("single extent fits");
        assert_eq!(widest.num_elements(), usize::MAX);
    }

    #[test]
    fn flatten_checks_arity_and_bounds() {
        let shape = Shape::new(vec![2, 3]).expect("shape");
        assert_eq!(shape.flatten(&[1, 2]).expect("flatten"), 5);
        assert_eq!(
            shape.flatten(&[1]),
            Err(TensorError::RankMismatch {
                expected: 2,
                actual: 1
            })
        );
        assert_eq!(
            shape.flatten(&[2, 0]),
            Err(TensorError::OutOfBounds {
                index: 2,
                extent: 2
            })
        );
    }
}
