//! Multi-channel 2-D convolution with a fused bias + leaky-ReLU epilogue.
//!
//! Every entry point reduces to [`convolve_into_with_path`]: the (already padded) image is read
//! channel by channel, each channel's contribution is accumulated into the destination map, and
//! only once all channels are summed is `leaky_relu(v + bias)` applied. Output position `(oy, ox)`
//! reads the window whose top-left corner sits at `(oy * sy, ox * sx)` of the padded image, so the
//! output extent along an axis is `ceil((padded - 2 * radius) / stride)`.

use crate::error::{TensorError, TensorResult};
use crate::ops::activation::leaky_relu;
use crate::ops::simd::{dot, F32x4, LANES};
use crate::tensor::Tensor;

/// Inner-loop strategy for one convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConvPath {
    /// Nine-tap unrolled 3x3 kernel, four output positions per vector.
    Unrolled3x3,
    /// Four-wide dot products along each kernel row; used for kernels at least four wide.
    WideRow,
    /// Any odd kernel; four output positions per vector with gathered lanes.
    Generic,
}

impl ConvPath {
    pub fn select(kernel_h: usize, kernel_w: usize) -> Self {
        if kernel_h == 3 && kernel_w == 3 {
            ConvPath::Unrolled3x3
        } else if kernel_w >= 4 {
            ConvPath::WideRow
        } else {
            ConvPath::Generic
        }
    }
}

/// Output extent along one axis for an odd kernel.
///
/// Returns zero when the (padded) input is smaller than the kernel.
pub fn output_extent(input: usize, kernel: usize, stride: usize, padding: bool) -> usize {
    let radius = kernel / 2;
    let padded = if padding { input + 2 * radius } else { input };
    if stride == 0 || padded < kernel {
        return 0;
    }
    (padded - 2 * radius).div_ceil(stride)
}

/// Dimensions of the scratch buffer [`pad_into`] expects for `image` and a `kernel_h x kernel_w`
/// kernel.
pub fn padded_dims(image_dims: &[usize], kernel_h: usize, kernel_w: usize) -> TensorResult<Vec<usize>> {
    if image_dims.len() != 3 {
        return Err(TensorError::RankMismatch {
            expected: 3,
            actual: image_dims.len(),
        });
    }
    Ok(vec![
        image_dims[0],
        image_dims[1] + 2 * (kernel_h / 2),
        image_dims[2] + 2 * (kernel_w / 2),
    ])
}

#[derive(Debug, Clone, Copy)]
struct Geometry {
    channels: usize,
    kernel_h: usize,
    kernel_w: usize,
    stride_x: usize,
    stride_y: usize,
    in_h: usize,
    in_w: usize,
    out_h: usize,
    out_w: usize,
}

impl Geometry {
    fn kernel_plane(&self) -> usize {
        self.kernel_h * self.kernel_w
    }

    fn image_plane(&self) -> usize {
        self.in_h * self.in_w
    }
}

fn geometry(image: &Tensor, kernel: &Tensor, stride_x: usize, stride_y: usize) -> TensorResult<Geometry> {
    image.shape().ensure_rank(3)?;
    kernel.shape().ensure_rank(3)?;
    let (img, ker) = (image.dims(), kernel.dims());
    if img[0] != ker[0] {
        return Err(TensorError::invalid_argument(format!(
            "image has {} channels but kernel has {}",
            img[0], ker[0]
        )));
    }
    if ker[1] % 2 == 0 || ker[2] % 2 == 0 {
        return Err(TensorError::invalid_argument(format!(
            "convolution requires odd kernel extents, got {}x{}",
            ker[1], ker[2]
        )));
    }
    if stride_x == 0 || stride_y == 0 {
        return Err(TensorError::invalid_argument("convolution strides must be positive"));
    }
    if img[1] < ker[1] || img[2] < ker[2] {
        return Err(TensorError::invalid_argument(format!(
            "kernel {}x{} does not fit a {}x{} image",
            ker[1], ker[2], img[1], img[2]
        )));
    }
    Ok(Geometry {
        channels: img[0],
        kernel_h: ker[1],
        kernel_w: ker[2],
        stride_x,
        stride_y,
        in_h: img[1],
        in_w: img[2],
        out_h: output_extent(img[1], ker[1], stride_y, false),
        out_w: output_extent(img[2], ker[2], stride_x, false),
    })
}

/// Scalar bias carried by a per-output-channel kernel; absent means zero.
fn kernel_bias(kernel: &Tensor) -> TensorResult<f32> {
    match kernel.bias() {
        None => Ok(0.0),
        Some(bias) if bias.len() == 1 => bias.get_flat(0),
        Some(bias) => Err(TensorError::invalid_argument(format!(
            "kernel bias must hold a single value, found {}",
            bias.len()
        ))),
    }
}

/// Convolves `image` (`[C, H, W]`) with `kernel` (`[C, kH, kW]`) into a fresh `[H', W']` map.
pub fn convolution(
    image: &Tensor,
    kernel: &Tensor,
    stride_x: usize,
    stride_y: usize,
    padding: bool,
) -> TensorResult<Tensor> {
    let padded = if padding {
        kernel.shape().ensure_rank(3)?;
        let dims = padded_dims(image.dims(), kernel.dims()[1], kernel.dims()[2])?;
        let mut scratch = Tensor::zeros(dims)?;
        pad_into(image, &mut scratch)?;
        scratch
    } else {
        image.clone()
    };
    let geo = geometry(&padded, kernel, stride_x, stride_y)?;
    let mut out = Tensor::zeros(vec![geo.out_h, geo.out_w])?;
    convolve_into(&padded, kernel, stride_x, stride_y, &mut out)?;
    Ok(out)
}

/// Copies `image` into the body of a pre-allocated `scratch` and zeroes its border.
///
/// The border width on each axis is half the extent difference, which must be even.
pub fn pad_into(image: &Tensor, scratch: &mut Tensor) -> TensorResult<()> {
    image.shape().ensure_rank(3)?;
    scratch.shape().ensure_rank(3)?;
    let (img, pad) = (image.dims(), scratch.dims());
    if img[0] != pad[0]
        || pad[1] < img[1]
        || pad[2] < img[2]
        || (pad[1] - img[1]) % 2 != 0
        || (pad[2] - img[2]) % 2 != 0
    {
        return Err(TensorError::shape_mismatch(pad, img));
    }
    let (channels, height, width) = (img[0], img[1], img[2]);
    let (padded_h, padded_w) = (pad[1], pad[2]);
    let radius_y = (padded_h - height) / 2;
    let radius_x = (padded_w - width) / 2;

    let src = image.read()?;
    let mut dst = scratch.write()?;
    for (src_plane, dst_plane) in src
        .chunks_exact(height * width)
        .zip(dst.chunks_exact_mut(padded_h * padded_w))
        .take(channels)
    {
        let (top, rest) = dst_plane.split_at_mut(radius_y * padded_w);
        top.fill(0.0);
        let (body, bottom) = rest.split_at_mut(height * padded_w);
        bottom.fill(0.0);
        for (src_row, dst_row) in src_plane.chunks_exact(width).zip(body.chunks_exact_mut(padded_w)) {
            dst_row[..radius_x].fill(0.0);
            dst_row[radius_x..radius_x + width].copy_from_slice(src_row);
            dst_row[radius_x + width..].fill(0.0);
        }
    }
    Ok(())
}

/// Pads `image` into the caller's `scratch` and convolves the result without further padding.
pub fn convolution_prepadded(
    image: &Tensor,
    scratch: &mut Tensor,
    kernel: &Tensor,
    stride_x: usize,
    stride_y: usize,
) -> TensorResult<Tensor> {
    kernel.shape().ensure_rank(3)?;
    let expected = padded_dims(image.dims(), kernel.dims()[1], kernel.dims()[2])?;
    if scratch.dims() != expected.as_slice() {
        return Err(TensorError::shape_mismatch(&expected, scratch.dims()));
    }
    pad_into(image, scratch)?;
    convolution(scratch, kernel, stride_x, stride_y, false)
}

/// Convolves an already padded image into `dst`, overwriting it.
pub fn convolve_into(
    padded: &Tensor,
    kernel: &Tensor,
    stride_x: usize,
    stride_y: usize,
    dst: &mut Tensor,
) -> TensorResult<()> {
    kernel.shape().ensure_rank(3)?;
    let path = ConvPath::select(kernel.dims()[1], kernel.dims()[2]);
    convolve_into_with_path(padded, kernel, stride_x, stride_y, dst, path)
}

/// [`convolve_into`] with an explicit inner-loop strategy.
pub fn convolve_into_with_path(
    padded: &Tensor,
    kernel: &Tensor,
    stride_x: usize,
    stride_y: usize,
    dst: &mut Tensor,
    path: ConvPath,
) -> TensorResult<()> {
    let geo = geometry(padded, kernel, stride_x, stride_y)?;
    if dst.dims() != [geo.out_h, geo.out_w] {
        return Err(TensorError::shape_mismatch(&[geo.out_h, geo.out_w], dst.dims()));
    }
    if path == ConvPath::Unrolled3x3 && (geo.kernel_h, geo.kernel_w) != (3, 3) {
        return Err(TensorError::invalid_argument(format!(
            "unrolled path needs a 3x3 kernel, got {}x{}",
            geo.kernel_h, geo.kernel_w
        )));
    }
    let bias = kernel_bias(kernel)?;

    let image = padded.read()?;
    let weights = kernel.read()?;
    let mut out = dst.write()?;
    out.fill(0.0);
    for (plane, taps) in image
        .chunks_exact(geo.image_plane())
        .zip(weights.chunks_exact(geo.kernel_plane()))
    {
        match path {
            ConvPath::Unrolled3x3 => accumulate_3x3(plane, taps, &geo, &mut out),
            ConvPath::WideRow => accumulate_wide_row(plane, taps, &geo, &mut out),
            ConvPath::Generic => accumulate_generic(plane, taps, &geo, &mut out),
        }
    }
    debug_assert_eq!(image.len(), geo.channels * geo.image_plane());
    for v in out.iter_mut() {
        *v = leaky_relu(*v + bias);
    }
    Ok(())
}

fn accumulate_3x3(plane: &[f32], taps: &[f32], geo: &Geometry, out: &mut [f32]) {
    let (sx, sy, w) = (geo.stride_x, geo.stride_y, geo.in_w);
    let k = [
        F32x4::splat(taps[0]),
        F32x4::splat(taps[1]),
        F32x4::splat(taps[2]),
        F32x4::splat(taps[3]),
        F32x4::splat(taps[4]),
        F32x4::splat(taps[5]),
        F32x4::splat(taps[6]),
        F32x4::splat(taps[7]),
        F32x4::splat(taps[8]),
    ];
    for (oy, out_row) in out.chunks_exact_mut(geo.out_w).enumerate() {
        let r0 = oy * sy * w;
        let r1 = r0 + w;
        let r2 = r1 + w;
        let mut ox = 0;
        while ox + LANES <= geo.out_w {
            let x = ox * sx;
            let mut acc = F32x4::load(&out_row[ox..]);
            acc = acc.mul_add(k[0], F32x4::gather(plane, r0 + x, sx));
            acc = acc.mul_add(k[1], F32x4::gather(plane, r0 + x + 1, sx));
            acc = acc.mul_add(k[2], F32x4::gather(plane, r0 + x + 2, sx));
            acc = acc.mul_add(k[3], F32x4::gather(plane, r1 + x, sx));
            acc = acc.mul_add(k[4], F32x4::gather(plane, r1 + x + 1, sx));
            acc = acc.mul_add(k[5], F32x4::gather(plane, r1 + x + 2, sx));
            acc = acc.mul_add(k[6], F32x4::gather(plane, r2 + x, sx));
            acc = acc.mul_add(k[7], F32x4::gather(plane, r2 + x + 1, sx));
            acc = acc.mul_add(k[8], F32x4::gather(plane, r2 + x + 2, sx));
            acc.store(&mut out_row[ox..]);
            ox += LANES;
        }
        for (ox, cell) in out_row.iter_mut().enumerate().skip(ox) {
            let x = ox * sx;
            *cell += taps[0] * plane[r0 + x]
                + taps[1] * plane[r0 + x + 1]
                + taps[2] * plane[r0 + x + 2]
                + taps[3] * plane[r1 + x]
                + taps[4] * plane[r1 + x + 1]
                + taps[5] * plane[r1 + x + 2]
                + taps[6] * plane[r2 + x]
                + taps[7] * plane[r2 + x + 1]
                + taps[8] * plane[r2 + x + 2];
        }
    }
}

fn accumulate_wide_row(plane: &[f32], taps: &[f32], geo: &Geometry, out: &mut [f32]) {
    let (kh, kw) = (geo.kernel_h, geo.kernel_w);
    for (oy, out_row) in out.chunks_exact_mut(geo.out_w).enumerate() {
        let top = oy * geo.stride_y;
        for (ox, cell) in out_row.iter_mut().enumerate() {
            let left = ox * geo.stride_x;
            let mut sum = 0.0;
            for j in 0..kh {
                let start = (top + j) * geo.in_w + left;
                sum += dot(&taps[j * kw..(j + 1) * kw], &plane[start..start + kw]);
            }
            *cell += sum;
        }
    }
}

fn accumulate_generic(plane: &[f32], taps: &[f32], geo: &Geometry, out: &mut [f32]) {
    let (kh, kw, sx) = (geo.kernel_h, geo.kernel_w, geo.stride_x);
    for (oy, out_row) in out.chunks_exact_mut(geo.out_w).enumerate() {
        let top = oy * geo.stride_y;
        let mut ox = 0;
        while ox + LANES <= geo.out_w {
            let mut acc = F32x4::load(&out_row[ox..]);
            for j in 0..kh {
                let row = (top + j) * geo.in_w + ox * sx;
                for i in 0..kw {
                    let tap = F32x4::splat(taps[j * kw + i]);
                    acc = acc.mul_add(tap, F32x4::gather(plane, row + i, sx));
                }
            }
            acc.store(&mut out_row[ox..]);
            ox += LANES;
        }
        for (ox, cell) in out_row.iter_mut().enumerate().skip(ox) {
            let mut sum = 0.0;
            for j in 0..kh {
                let row = (top + j) * geo.in_w + ox * sx;
                for i in 0..kw {
                    sum += taps[j * kw + i] * plane[row + i];
                }
            }
            *cell += sum;
        }
    }
}

/// Convolution whose result is copied into a zero-filled `[new_h, new_w]` map.
///
/// Rows and columns beyond the requested size are dropped.
pub fn convolution_fixed(
    image: &Tensor,
    kernel: &Tensor,
    stride_x: usize,
    stride_y: usize,
    new_w: usize,
    new_h: usize,
    padding: bool,
) -> TensorResult<Tensor> {
    let natural = convolution(image, kernel, stride_x, stride_y, padding)?;
    if natural.dims() == [new_h, new_w] {
        return Ok(natural);
    }
    let mut result = Tensor::zeros(vec![new_h, new_w])?;
    {
        let src = natural.read()?;
        let mut dst = result.write()?;
        let natural_w = natural.dims()[1];
        let cols = natural_w.min(new_w);
        for (src_row, dst_row) in src.chunks_exact(natural_w).zip(dst.chunks_exact_mut(new_w)) {
            dst_row[..cols].copy_from_slice(&src_row[..cols]);
        }
    }
    Ok(result)
}
