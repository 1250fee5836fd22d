//! Fully connected layer `y = W x + b` over flat activations.

use crate::error::{TensorError, TensorResult};
use crate::ops::activation::leaky_relu;
use crate::ops::simd::dot;
use crate::tensor::Tensor;

/// Dense layer holding a `[out, in]` weight matrix whose bias (`[out]`) rides on the tensor.
#[derive(Debug, Clone)]
pub struct Dense {
    weight: Tensor,
}

impl Dense {
    /// Wraps a weight matrix, validating its rank and the bias length.
    pub fn new(weight: Tensor) -> TensorResult<Self> {
        weight.shape().ensure_rank(2)?;
        if let Some(bias) = weight.bias() {
            if bias.dims() != [weight.dims()[0]] {
                return Err(TensorError::shape_mismatch(&[weight.dims()[0]], bias.dims()));
            }
        }
        Ok(Self { weight })
    }

    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    pub fn in_features(&self) -> usize {
        self.weight.dims()[1]
    }

    pub fn out_features(&self) -> usize {
        self.weight.dims()[0]
    }

    /// Computes every neuron into `output`, applying leaky ReLU when `activate` is set.
    pub fn forward_into(&self, input: &Tensor, output: &mut Tensor, activate: bool) -> TensorResult<()> {
        if input.len() != self.in_features() {
            return Err(TensorError::shape_mismatch(&[self.in_features()], input.dims()));
        }
        if output.len() != self.out_features() {
            return Err(TensorError::shape_mismatch(&[self.out_features()], output.dims()));
        }
        let x = input.read()?;
        let w = self.weight.read()?;
        let bias = match self.weight.bias() {
            Some(bias) => Some(bias.read()?),
            None => None,
        };
        let mut y = output.write()?;
        for (neuron, (row, out)) in w
            .chunks_exact(self.in_features())
            .zip(y.iter_mut())
            .enumerate()
        {
            let b = bias.as_ref().map_or(0.0, |bias| bias[neuron]);
            let v = dot(row, &x) + b;
            *out = if activate { leaky_relu(v) } else { v };
        }
        Ok(())
    }

    /// Convenience wrapper returning a fresh `[out]` tensor.
    pub fn forward(&self, input: &Tensor, activate: bool) -> TensorResult<Tensor> {
        let mut output = Tensor::zeros(vec![self.out_features()])?;
        self.forward_into(input, &mut output, activate)?;
        Ok(output)
    }
}
