//! Non-overlapping 2-D max pooling with optional arg-max capture.

use crate::error::{TensorError, TensorResult};
use crate::tensor::Tensor;

/// Output dimensions `[H / sy, W / sx]`; remainder rows and columns are dropped.
pub fn pooled_dims(height: usize, width: usize, stride_x: usize, stride_y: usize) -> [usize; 2] {
    if stride_x == 0 || stride_y == 0 {
        return [0, 0];
    }
    [height / stride_y, width / stride_x]
}

fn check_window(map: &Tensor, stride_x: usize, stride_y: usize) -> TensorResult<[usize; 2]> {
    map.shape().ensure_rank(2)?;
    let (height, width) = (map.dims()[0], map.dims()[1]);
    if stride_x == 0 || stride_y == 0 {
        return Err(TensorError::invalid_argument("pooling strides must be positive"));
    }
    if stride_y > height || stride_x > width {
        return Err(TensorError::invalid_argument(format!(
            "pooling window {stride_y}x{stride_x} exceeds a {height}x{width} map"
        )));
    }
    Ok(pooled_dims(height, width, stride_x, stride_y))
}

/// Max-pools a `[H, W]` map with a fresh output.
pub fn max_pool(map: &Tensor, stride_x: usize, stride_y: usize) -> TensorResult<Tensor> {
    let dims = check_window(map, stride_x, stride_y)?;
    let mut out = Tensor::zeros(dims.to_vec())?;
    max_pool_into(map, stride_x, stride_y, &mut out, None)?;
    Ok(out)
}

/// Max-pools into a fresh output, recording in `indices` the flat position within `map` of each
/// output cell's maximum.
pub fn max_pool_with_indices(
    map: &Tensor,
    stride_x: usize,
    stride_y: usize,
    indices: &mut [usize],
) -> TensorResult<Tensor> {
    let dims = check_window(map, stride_x, stride_y)?;
    let mut out = Tensor::zeros(dims.to_vec())?;
    max_pool_into(map, stride_x, stride_y, &mut out, Some(indices))?;
    Ok(out)
}

/// Max-pools `map` into the pre-shaped view `dst`.
///
/// Cell `(oy, ox)` takes the maximum over rows `oy * sy .. oy * sy + sy` and columns
/// `ox * sx .. ox * sx + sx`; on ties the first maximum in row-major order wins.
pub fn max_pool_into(
    map: &Tensor,
    stride_x: usize,
    stride_y: usize,
    dst: &mut Tensor,
    indices: Option<&mut [usize]>,
) -> TensorResult<()> {
    let [out_h, out_w] = check_window(map, stride_x, stride_y)?;
    if dst.dims() != [out_h, out_w] {
        return Err(TensorError::shape_mismatch(&[out_h, out_w], dst.dims()));
    }
    let cells = out_h * out_w;
    if let Some(indices) = &indices {
        if indices.len() != cells {
            return Err(TensorError::invalid_argument(format!(
                "index buffer holds {} entries, pooling produces {cells}",
                indices.len()
            )));
        }
    }
    let width = map.dims()[1];

    let src = map.read()?;
    let mut out = dst.write()?;
    let mut indices = indices;
    for oy in 0..out_h {
        let top = oy * stride_y;
        for ox in 0..out_w {
            let left = ox * stride_x;
            let mut best_index = top * width + left;
            let mut best = src[best_index];
            for y in top..top + stride_y {
                let row = y * width;
                for index in row + left..row + left + stride_x {
                    if src[index] > best {
                        best = src[index];
                        best_index = index;
                    }
                }
            }
            let cell = oy * out_w + ox;
            out[cell] = best;
            if let Some(indices) = indices.as_deref_mut() {
                indices[cell] = best_index;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floor_division_drops_the_remainder() {
        let map = Tensor::from_vec(vec![5, 5], (0..25).map(|v| v as f32).collect()).expect("tensor from values");
        let out = max_pool(&map, 2, 2).expect("max pool");
        assert_eq!(out.dims(), &[2, 2]);
        assert_eq!(out.to_vec().expect("read back"), vec![6.0, 8.0, 16.0, 18.0]);
    }

    #[test]
    fn odd_strides_stay_in_bounds() {
        let map = Tensor::from_vec(vec![7, 7], (0..49).map(|v| v as f32).collect()).expect("tensor from values");
        let out = max_pool(&map, 3, 3).expect("max pool");
        assert_eq!(out.to_vec().expect("read back"), vec![16.0, 19.0, 37.0, 40.0]);
    }

    #[test]
    fn first_maximum_wins_ties() {
        let map = Tensor::from_vec(vec![2, 2], vec![1.0, 1.0, 1.0, 1.0]).expect("tensor from values");
        let mut indices = vec![usize::MAX; 1];
        max_pool_with_indices(&map, 2, 2, &mut indices).expect("indexed max pool");
        assert_eq!(indices, vec![0]);
    }

    #[test]
    fn invalid_windows_are_rejected() {
        let map = Tensor::zeros(vec![4, 4]).expect("zeroed tensor");
        assert!(matches!(
            max_pool(&map, 0, 1),
            Err(TensorError::InvalidArgument(_))
        ));
        assert!(matches!(
            max_pool(&map, 5, 1),
            Err(TensorError::InvalidArgument(_))
        ));
        let cube = Tensor::zeros(vec![1, 4, 4]).expect("zeroed tensor");
        assert!(matches!(
            max_pool(&cube, 2, 2),
            Err(TensorError::RankMismatch { .. })
        ));
        let mut short = vec![0; 3];
        assert!(max_pool_with_indices(&map, 2, 2, &mut short).is_err());
    }
}
