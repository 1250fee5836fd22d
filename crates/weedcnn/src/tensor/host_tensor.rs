//! Strided host tensor whose views alias a shared buffer.

use rand::Rng;

use super::shape::Shape;
use super::storage::{ReadGuard, Storage, WriteGuard};
use crate::error::{TensorError, TensorResult};

/// Dense `f32` tensor viewing a window of a reference-counted buffer.
///
/// Cloning a tensor produces another alias of the same elements, not a copy; use
/// [`Tensor::deep_copy`] for an independent buffer. `Tensor::default()` is the unshaped
/// placeholder that [`Tensor::assign`] can later shape.
#[derive(Debug, Clone, Default)]
pub struct Tensor {
    storage: Option<Storage>,
    shape: Shape,
    offset: usize,
    bias: Option<Box<Tensor>>,
}

impl Tensor {
    /// Returns a zero-initialised tensor owning a fresh buffer.
    pub fn zeros<D: Into<Vec<usize>>>(dims: D) -> TensorResult<Self> {
        let shape = Shape::new(dims)?;
        let storage = Storage::zeroed(shape.num_elements());
        Ok(Tensor::from_parts(storage, shape, 0))
    }

    /// Constructs a tensor from raw values, validating the length against the shape.
    pub fn from_vec<D: Into<Vec<usize>>>(dims: D, data: Vec<f32>) -> TensorResult<Self> {
        let shape = Shape::new(dims)?;
        if data.len() != shape.num_elements() {
            return Err(TensorError::invalid_shape(
                shape.dims(),
                format!(
                    "data length {} does not match element count {}",
                    data.len(),
                    shape.num_elements()
                ),
            ));
        }
        Ok(Tensor::from_parts(Storage::from_vec(data), shape, 0))
    }

    /// Samples from `N(0, std^2)` using the Box-Muller transform.
    pub fn randn<D: Into<Vec<usize>>>(dims: D, std: f32, rng: &mut impl Rng) -> TensorResult<Self> {
        let shape = Shape::new(dims)?;
        let len = shape.num_elements();
        let mut values = Vec::with_capacity(len);
        while values.len() < len {
            let u1: f32 = rng.gen::<f32>().max(f32::MIN_POSITIVE);
            let u2: f32 = rng.gen::<f32>();
            let r = (-2.0 * u1.ln()).sqrt();
            let theta = 2.0 * std::f32::consts::PI * u2;
            values.push(r * theta.cos() * std);
            if values.len() < len {
                values.push(r * theta.sin() * std);
            }
        }
        Ok(Tensor::from_parts(Storage::from_vec(values), shape, 0))
    }

    fn from_parts(storage: Storage, shape: Shape, offset: usize) -> Self {
        debug_assert!(offset + shape.num_elements() <= storage.len());
        Tensor {
            storage: Some(storage),
            shape,
            offset,
            bias: None,
        }
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dims(&self) -> &[usize] {
        self.shape.dims()
    }

    pub fn strides(&self) -> &[usize] {
        self.shape.strides()
    }

    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    /// Number of elements covered by this view.
    pub fn len(&self) -> usize {
        self.shape.num_elements()
    }

    /// True only for the unshaped placeholder.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_unshaped(&self) -> bool {
        self.storage.is_none()
    }

    /// Element offset of this view inside its backing buffer.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn bias(&self) -> Option<&Tensor> {
        self.bias.as_deref()
    }

    /// Attaches an independent copy of `bias`.
    pub fn set_bias(&mut self, bias: &Tensor) -> TensorResult<()> {
        self.bias = Some(Box::new(bias.deep_copy()?));
        Ok(())
    }

    pub fn clear_bias(&mut self) {
        self.bias = None;
    }

    /// Reports whether two tensors view the same backing buffer.
    pub fn shares_storage(a: &Tensor, b: &Tensor) -> bool {
        match (&a.storage, &b.storage) {
            (Some(a), Some(b)) => Storage::ptr_eq(a, b),
            _ => false,
        }
    }

    fn storage(&self) -> TensorResult<&Storage> {
        self.storage
            .as_ref()
            .ok_or_else(|| TensorError::invalid_shape(&[], "tensor is unshaped"))
    }

    /// Borrows the elements of this view.
    pub fn read(&self) -> TensorResult<ReadGuard<'_>> {
        let range = self.offset..self.offset + self.len();
        self.storage()?.read(range)
    }

    /// Mutably borrows the elements of this view. Writes are visible through every alias.
    pub fn write(&mut self) -> TensorResult<WriteGuard<'_>> {
        let range = self.offset..self.offset + self.len();
        self.storage()?.write(range)
    }

    pub fn to_vec(&self) -> TensorResult<Vec<f32>> {
        Ok(self.read()?.to_vec())
    }

    /// Zero-copy view that fixes the leading dimensions to `indices`.
    ///
    /// Supplying one index per dimension yields a `[1]` view on that element. The bias is not
    /// carried over; see [`Tensor::slice_with_bias`].
    pub fn slice(&self, indices: &[usize]) -> TensorResult<Tensor> {
        let storage = self.storage()?.clone();
        let offset = self.offset + self.shape.leading_offset(indices)?;
        let shape = if indices.len() == self.rank() {
            Shape::new(vec![1])?
        } else {
            self.shape.drop_leading(indices.len())
        };
        Ok(Tensor::from_parts(storage, shape, offset))
    }

    /// Like [`Tensor::slice`], additionally slicing the bias with `bias_indices`.
    pub fn slice_with_bias(&self, indices: &[usize], bias_indices: &[usize]) -> TensorResult<Tensor> {
        if indices.len() >= self.rank() {
            return Err(TensorError::invalid_argument(format!(
                "slice_with_bias needs fewer than {} indices, got {}",
                self.rank(),
                indices.len()
            )));
        }
        let bias = self.bias.as_ref().ok_or(TensorError::MissingBias)?;
        let mut view = self.slice(indices)?;
        view.bias = Some(Box::new(bias.slice(bias_indices)?));
        Ok(view)
    }

    /// Zero-copy view of the same elements under a different shape.
    pub fn reshape<D: Into<Vec<usize>>>(&self, dims: D) -> TensorResult<Tensor> {
        let shape = Shape::new(dims)?;
        if shape.num_elements() != self.len() {
            return Err(TensorError::shape_mismatch(self.dims(), shape.dims()));
        }
        Ok(Tensor::from_parts(self.storage()?.clone(), shape, self.offset))
    }

    /// Flat position of a full multi-index within this view.
    pub fn flat_index(&self, indices: &[usize]) -> TensorResult<usize> {
        self.shape.flatten(indices)
    }

    pub fn get(&self, indices: &[usize]) -> TensorResult<f32> {
        let index = self.flat_index(indices)?;
        Ok(self.read()?[index])
    }

    pub fn set(&mut self, indices: &[usize], value: f32) -> TensorResult<()> {
        let index = self.flat_index(indices)?;
        self.write()?[index] = value;
        Ok(())
    }

    pub fn get_flat(&self, index: usize) -> TensorResult<f32> {
        self.check_flat(index)?;
        Ok(self.read()?[index])
    }

    pub fn set_flat(&mut self, index: usize, value: f32) -> TensorResult<()> {
        self.check_flat(index)?;
        self.write()?[index] = value;
        Ok(())
    }

    fn check_flat(&self, index: usize) -> TensorResult<()> {
        if index >= self.len() {
            return Err(TensorError::OutOfBounds {
                index,
                extent: self.len(),
            });
        }
        Ok(())
    }

    /// Copies the view (and its bias) into an independent buffer.
    pub fn deep_copy(&self) -> TensorResult<Tensor> {
        if self.is_unshaped() {
            return Ok(Tensor::default());
        }
        let mut copy = Tensor::from_vec(self.dims().to_vec(), self.to_vec()?)?;
        if let Some(bias) = &self.bias {
            copy.bias = Some(Box::new(bias.deep_copy()?));
        }
        Ok(copy)
    }

    /// Copies the elements of `src` into this view.
    ///
    /// An unshaped target adopts the source shape and allocates; otherwise the shapes must match.
    /// The bias is replaced by a deep copy of the source bias, or cleared.
    pub fn assign(&mut self, src: &Tensor) -> TensorResult<()> {
        if src.is_unshaped() {
            return Err(TensorError::invalid_shape(&[], "cannot assign from an unshaped tensor"));
        }
        if self.is_unshaped() {
            *self = src.deep_copy()?;
            return Ok(());
        }
        self.shape.ensure_same(&src.shape)?;
        if Tensor::shares_storage(self, src) {
            let values = src.to_vec()?;
            self.write()?.copy_from_slice(&values);
        } else {
            let values = src.read()?;
            self.write()?.copy_from_slice(&values);
        }
        self.bias = match &src.bias {
            Some(bias) => Some(Box::new(bias.deep_copy()?)),
            None => None,
        };
        Ok(())
    }

    /// Overwrites every element from a flat row-major slice of equal length.
    pub fn fill_from(&mut self, values: &[f32]) -> TensorResult<()> {
        if values.len() != self.len() {
            return Err(TensorError::shape_mismatch(&[self.len()], &[values.len()]));
        }
        self.write()?.copy_from_slice(values);
        Ok(())
    }

    pub fn fill(&mut self, value: f32) -> TensorResult<()> {
        self.write()?.fill(value);
        Ok(())
    }

    pub fn zero(&mut self) -> TensorResult<()> {
        self.fill(0.0)
    }

    /// Applies a unary function in place over every element of the view.
    pub fn map_inplace<F>(&mut self, mut f: F) -> TensorResult<()>
    where
        F: FnMut(f32) -> f32,
    {
        for v in self.write()?.iter_mut() {
            *v = f(*v);
        }
        Ok(())
    }
}
