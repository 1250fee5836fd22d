//! Conversion between tensors and nested `Vec` arrays.
//!
//! Parameter stores hand the engine plain nested arrays (`Vec<Vec<...<f32>>>`); the depth of the
//! nesting is the tensor rank and is checked at the type level through [`Nested::DEPTH`].

use crate::error::{TensorError, TensorResult};

use super::{Shape, Tensor};

pub type Nested1 = Vec<f32>;
pub type Nested2 = Vec<Nested1>;
pub type Nested3 = Vec<Nested2>;
pub type Nested4 = Vec<Nested3>;
pub type Nested5 = Vec<Nested4>;

/// A scalar or a (possibly nested) vector of scalars.
pub trait Nested: Sized {
    /// Nesting depth; `0` for a bare scalar.
    const DEPTH: usize;

    /// Extents inferred from the first element at every level.
    fn extents(&self) -> Vec<usize>;

    /// Appends all scalars in row-major order, rejecting ragged input.
    fn flatten_checked(&self, dims: &[usize], out: &mut Vec<f32>) -> TensorResult<()>;

    /// Rebuilds the nested value from a strided window of `data`.
    fn build(data: &[f32], dims: &[usize], strides: &[usize], offset: usize) -> Self;
}

impl Nested for f32 {
    const DEPTH: usize = 0;

    fn extents(&self) -> Vec<usize> {
        Vec::new()
    }

    fn flatten_checked(&self, _dims: &[usize], out: &mut Vec<f32>) -> TensorResult<()> {
        out.push(*self);
        Ok(())
    }

    fn build(data: &[f32], _dims: &[usize], _strides: &[usize], offset: usize) -> Self {
        data[offset]
    }
}

impl<T: Nested> Nested for Vec<T> {
    const DEPTH: usize = T::DEPTH + 1;

    fn extents(&self) -> Vec<usize> {
        let mut dims = vec![self.len()];
        if let Some(first) = self.first() {
            dims.extend(first.extents());
        }
        dims
    }

    fn flatten_checked(&self, dims: &[usize], out: &mut Vec<f32>) -> TensorResult<()> {
        if self.len() != dims[0] {
            return Err(TensorError::invalid_shape(
                dims,
                format!("ragged nested array: found a row of length {}", self.len()),
            ));
        }
        for item in self {
            item.flatten_checked(&dims[1..], out)?;
        }
        Ok(())
    }

    fn build(data: &[f32], dims: &[usize], strides: &[usize], offset: usize) -> Self {
        (0..dims[0])
            .map(|i| T::build(data, &dims[1..], &strides[1..], offset + i * strides[0]))
            .collect()
    }
}

impl Tensor {
    /// Builds a tensor whose rank equals the nesting depth of `values`.
    pub fn from_nested<N: Nested>(values: &N) -> TensorResult<Self> {
        let dims = values.extents();
        let shape = Shape::new(dims.clone())?;
        let mut data = Vec::with_capacity(shape.num_elements());
        values.flatten_checked(&dims, &mut data)?;
        Tensor::from_vec(dims, data)
    }

    /// Copies the tensor into a nested array of matching depth.
    pub fn to_nested<N: Nested>(&self) -> TensorResult<N> {
        if N::DEPTH != self.rank() {
            return Err(TensorError::RankMismatch {
                expected: self.rank(),
                actual: N::DEPTH,
            });
        }
        let data = self.read()?;
        Ok(N::build(&data, self.dims(), self.strides(), 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_round_trip_preserves_layout() {
        let values: Nested3 = vec![
            vec![vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]],
            vec![vec![7.0, 8.0], vec![9.0, 10.0], vec![11.0, 12.0]],
        ];
        let tensor = Tensor::from_nested(&values).expect("tensor from nested values");
        assert_eq!(tensor.dims(), &[2, 3, 2]);
        assert_eq!(tensor.get(&[1, 2, 0]).expect("read element"), 11.0);
        let back: Nested3 = tensor.to_nested().expect("nested export");
        assert_eq!(back, values);
    }

    #[test]
    fn view_converts_only_its_window() {
        let values: Nested2 = vec![vec![1.0, 2.0], vec![3.0, 4.0]];
        let tensor = Tensor::from_nested(&values).expect("tensor from nested values");
        let row: Nested1 = tensor.slice(&[1]).expect("slice view").to_nested().expect("nested export");
        assert_eq!(row, vec![3.0, 4.0]);
    }

    #[test]
    fn rank_mismatch_is_rejected() {
        let tensor = Tensor::zeros(vec![2, 2]).expect("zeroed tensor");
        assert_eq!(
            tensor.to_nested::<Nested3>(),
            Err(TensorError::RankMismatch {
                expected: 2,
                actual: 3
            })
        );
    }

    #[test]
    fn ragged_input_is_rejected() {
        let values: Nested2 = vec![vec![1.0, 2.0], vec![3.0]];
        assert!(matches!(
            Tensor::from_nested(&values),
            Err(TensorError::InvalidShape { .. })
        ));
    }
}
