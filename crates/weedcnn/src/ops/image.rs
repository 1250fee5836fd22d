//! Frame preprocessing: Gaussian-blur downscaling, per-channel standardisation, and the
//! interleaved-RGB to planar conversion at the camera boundary.

use std::f32::consts::PI;

use tracing::warn;

use crate::error::{TensorError, TensorResult};
use crate::ops::conv::convolution_fixed;
use crate::tensor::Tensor;

/// Gaussian kernel of shape `[height, width]` with `σ = (width + height) / 8`, centred at
/// `(height / 2, width / 2)`.
pub fn gaussian_blur_kernel(width: usize, height: usize) -> TensorResult<Tensor> {
    let sigma = (width + height) as f32 / 8.0;
    let two_sigma_sq = 2.0 * sigma * sigma;
    let scale = 1.0 / (PI * two_sigma_sq);
    let (cx, cy) = ((width / 2) as f32, (height / 2) as f32);
    let mut values = Vec::with_capacity(width * height);
    for y in 0..height {
        for x in 0..width {
            let (dx, dy) = (x as f32 - cx, y as f32 - cy);
            values.push(scale * (-(dx * dx + dy * dy) / two_sigma_sq).exp());
        }
    }
    Tensor::from_vec(vec![height, width], values)
}

/// Odd blur extent covering a `stride`-wide step, kept within `extent`.
fn blur_extent(stride: usize, extent: usize) -> usize {
    let odd = stride | 1;
    if odd <= extent {
        odd
    } else {
        stride - 1
    }
}

fn resize_geometry(img: &Tensor, target: [usize; 3]) -> TensorResult<()> {
    img.shape().ensure_rank(3)?;
    if img.dims()[0] != target[0] {
        return Err(TensorError::invalid_argument(format!(
            "image has {} channels, expected {}",
            img.dims()[0],
            target[0]
        )));
    }
    if target.contains(&0) {
        return Err(TensorError::invalid_shape(&target, "resize target must be non-empty"));
    }
    Ok(())
}

/// Downscales `img` (`[C, H, W]`) to `target` by blurring each channel with a strided Gaussian.
///
/// Returns an alias of `img` when the spatial size already matches.
pub fn resize_by_blur(img: &Tensor, target: [usize; 3]) -> TensorResult<Tensor> {
    resize_geometry(img, target)?;
    if img.dims()[1..] == target[1..] {
        return Ok(img.clone());
    }
    let mut out = Tensor::zeros(target.to_vec())?;
    blur_channels_into(img, &mut out)?;
    Ok(out)
}

/// Writes the resized `img` into `dst`, whose shape is the target. `img` is never modified.
pub fn resize_into(img: &Tensor, dst: &mut Tensor) -> TensorResult<()> {
    dst.shape().ensure_rank(3)?;
    let target = [dst.dims()[0], dst.dims()[1], dst.dims()[2]];
    resize_geometry(img, target)?;
    if img.dims()[1..] == target[1..] {
        return dst.assign(img);
    }
    warn!(
        from = ?img.dims(),
        to = ?target,
        "input frame does not match the network input; blurring into a temporary"
    );
    blur_channels_into(img, dst)
}

fn blur_channels_into(img: &Tensor, dst: &mut Tensor) -> TensorResult<()> {
    let (channels, height, width) = (img.dims()[0], img.dims()[1], img.dims()[2]);
    let (target_h, target_w) = (dst.dims()[1], dst.dims()[2]);
    let stride_x = width.div_ceil(target_w);
    let stride_y = height.div_ceil(target_h);
    let blur = gaussian_blur_kernel(blur_extent(stride_x, width), blur_extent(stride_y, height))?;
    let kernel = blur.reshape(vec![1, blur.dims()[0], blur.dims()[1]])?;
    for c in 0..channels {
        let plane = img.slice(&[c])?.reshape(vec![1, height, width])?;
        let blurred = convolution_fixed(&plane, &kernel, stride_x, stride_y, target_w, target_h, false)?;
        dst.slice(&[c])?.assign(&blurred)?;
    }
    Ok(())
}

/// Standardises every channel in place: `v = (v - means[c]) / std_devs[c]`.
pub fn normalize(img: &mut Tensor, means: &[f32], std_devs: &[f32]) -> TensorResult<()> {
    img.shape().ensure_rank(3)?;
    let channels = img.dims()[0];
    if means.len() != channels || std_devs.len() != channels {
        return Err(TensorError::invalid_argument(format!(
            "{channels} channels but {} means and {} standard deviations",
            means.len(),
            std_devs.len()
        )));
    }
    let plane = img.dims()[1] * img.dims()[2];
    let mut data = img.write()?;
    for ((values, mean), std_dev) in data.chunks_exact_mut(plane).zip(means).zip(std_devs) {
        for v in values {
            *v = (*v - mean) / std_dev;
        }
    }
    Ok(())
}

/// Converts an interleaved 8-bit RGB frame into a planar `[3, height, width]` tensor.
pub fn rgb_to_chw(bytes: &[u8], height: usize, width: usize) -> TensorResult<Tensor> {
    let plane = height * width;
    if bytes.len() != plane * 3 {
        return Err(TensorError::invalid_argument(format!(
            "RGB frame of {height}x{width} needs {} bytes, got {}",
            plane * 3,
            bytes.len()
        )));
    }
    let mut values = vec![0.0; plane * 3];
    for (i, pixel) in bytes.chunks_exact(3).enumerate() {
        values[i] = f32::from(pixel[0]);
        values[plane + i] = f32::from(pixel[1]);
        values[2 * plane + i] = f32::from(pixel[2]);
    }
    Tensor::from_vec(vec![3, height, width], values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blur_kernel_peaks_at_the_centre() {
        let kernel = gaussian_blur_kernel(5, 3).expect("blur kernel");
        assert_eq!(kernel.dims(), &[3, 5]);
        let values = kernel.to_vec().expect("read back");
        let centre = kernel.get(&[1, 2]).expect("read element");
        assert!(values.iter().all(|&v| v <= centre && v > 0.0));
        let sigma: f32 = 1.0;
        let expected = 1.0 / (2.0 * PI * sigma * sigma);
        assert!((centre - expected).abs() < 1e-6);
    }

    #[test]
    fn matching_size_is_an_alias() {
        let img = Tensor::zeros(vec![3, 8, 8]).expect("zeroed tensor");
        let out = resize_by_blur(&img, [3, 8, 8]).expect("resize");
        assert!(Tensor::shares_storage(&img, &out));
    }

    #[test]
    fn downscaling_hits_the_target_shape() {
        let mut img = Tensor::zeros(vec![2, 12, 16]).expect("zeroed tensor");
        img.fill(1.0).expect("fill");
        let out = resize_by_blur(&img, [2, 4, 4]).expect("resize");
        assert_eq!(out.dims(), &[2, 4, 4]);
        assert!(out.to_vec().expect("read back").iter().all(|v| *v >= 0.0));
        assert!(out.get(&[1, 1, 1]).expect("read element") > 0.0);
    }

    #[test]
    fn channel_mismatch_is_rejected() {
        let img = Tensor::zeros(vec![1, 8, 8]).expect("zeroed tensor");
        assert!(matches!(
            resize_by_blur(&img, [3, 4, 4]),
            Err(TensorError::InvalidArgument(_))
        ));
    }

    #[test]
    fn normalize_standardises_each_channel() {
        let mut img = Tensor::from_vec(vec![2, 1, 2], vec![2.0, 4.0, 10.0, 20.0]).expect("tensor from values");
        normalize(&mut img, &[2.0, 10.0], &[2.0, 5.0]).expect("normalize");
        assert_eq!(img.to_vec().expect("read back"), vec![0.0, 1.0, 0.0, 2.0]);
        assert!(normalize(&mut img, &[0.0], &[1.0]).is_err());
    }

    #[test]
    fn rgb_frames_become_planar() {
        let frame = [1u8, 2, 3, 4, 5, 6];
        let tensor = rgb_to_chw(&frame, 1, 2).expect("frame to tensor");
        assert_eq!(tensor.dims(), &[3, 1, 2]);
        assert_eq!(tensor.to_vec().expect("read back"), vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
        assert!(rgb_to_chw(&frame, 2, 2).is_err());
    }
}
