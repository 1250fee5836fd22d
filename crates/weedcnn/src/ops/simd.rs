//! Four-lane `f32` vectors for the conv and dense inner loops.
//!
//! SSE2 is part of the x86_64 baseline and NEON of the aarch64 baseline, so no runtime feature
//! detection is needed; every other target uses a plain `[f32; 4]`. All entry points take slices
//! and bounds-check before touching raw pointers.

#[cfg(target_arch = "aarch64")]
use std::arch::aarch64::*;
#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::*;
use std::fmt;

pub const LANES: usize = 4;

#[cfg(target_arch = "x86_64")]
type Lanes = __m128;
#[cfg(target_arch = "aarch64")]
type Lanes = float32x4_t;
#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
type Lanes = [f32; LANES];

/// Four `f32` lanes held in a native vector register where available.
#[derive(Clone, Copy)]
pub struct F32x4(Lanes);

impl F32x4 {
    #[inline(always)]
    pub fn zero() -> Self {
        Self::splat(0.0)
    }

    #[inline(always)]
    pub fn splat(value: f32) -> Self {
        #[cfg(target_arch = "x86_64")]
        // SAFETY: SSE2 is always available on x86_64.
        unsafe {
            F32x4(_mm_set1_ps(value))
        }
        #[cfg(target_arch = "aarch64")]
        // SAFETY: NEON is always available on aarch64.
        unsafe {
            F32x4(vdupq_n_f32(value))
        }
        #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
        {
            F32x4([value; LANES])
        }
    }

    #[inline(always)]
    pub fn from_array(values: [f32; LANES]) -> Self {
        #[cfg(target_arch = "x86_64")]
        // SAFETY: SSE2 is always available on x86_64.
        unsafe {
            F32x4(_mm_setr_ps(values[0], values[1], values[2], values[3]))
        }
        #[cfg(target_arch = "aarch64")]
        // SAFETY: the array provides four readable lanes.
        unsafe {
            F32x4(vld1q_f32(values.as_ptr()))
        }
        #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
        {
            F32x4(values)
        }
    }

    /// Loads the first four elements of `src`. Panics if `src` is shorter.
    #[inline(always)]
    pub fn load(src: &[f32]) -> Self {
        let src = &src[..LANES];
        #[cfg(target_arch = "x86_64")]
        // SAFETY: `src` holds at least four elements; the load is unaligned.
        unsafe {
            F32x4(_mm_loadu_ps(src.as_ptr()))
        }
        #[cfg(target_arch = "aarch64")]
        // SAFETY: `src` holds at least four elements.
        unsafe {
            F32x4(vld1q_f32(src.as_ptr()))
        }
        #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
        {
            F32x4([src[0], src[1], src[2], src[3]])
        }
    }

    /// Gathers `src[base]`, `src[base + step]`, ... into the four lanes.
    #[inline(always)]
    pub fn gather(src: &[f32], base: usize, step: usize) -> Self {
        if step == 1 {
            return Self::load(&src[base..]);
        }
        Self::from_array([
            src[base],
            src[base + step],
            src[base + 2 * step],
            src[base + 3 * step],
        ])
    }

    #[inline(always)]
    pub fn add(self, rhs: Self) -> Self {
        #[cfg(target_arch = "x86_64")]
        // SAFETY: SSE2 is always available on x86_64.
        unsafe {
            F32x4(_mm_add_ps(self.0, rhs.0))
        }
        #[cfg(target_arch = "aarch64")]
        // SAFETY: NEON is always available on aarch64.
        unsafe {
            F32x4(vaddq_f32(self.0, rhs.0))
        }
        #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
        {
            let (a, b) = (self.0, rhs.0);
            F32x4([a[0] + b[0], a[1] + b[1], a[2] + b[2], a[3] + b[3]])
        }
    }

    #[inline(always)]
    pub fn mul(self, rhs: Self) -> Self {
        #[cfg(target_arch = "x86_64")]
        // SAFETY: SSE2 is always available on x86_64.
        unsafe {
            F32x4(_mm_mul_ps(self.0, rhs.0))
        }
        #[cfg(target_arch = "aarch64")]
        // SAFETY: NEON is always available on aarch64.
        unsafe {
            F32x4(vmulq_f32(self.0, rhs.0))
        }
        #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
        {
            let (a, b) = (self.0, rhs.0);
            F32x4([a[0] * b[0], a[1] * b[1], a[2] * b[2], a[3] * b[3]])
        }
    }

    /// `self + a * b`, rounded after the multiply.
    #[inline(always)]
    pub fn mul_add(self, a: Self, b: Self) -> Self {
        self.add(a.mul(b))
    }

    #[inline(always)]
    pub fn to_array(self) -> [f32; LANES] {
        let mut out = [0.0; LANES];
        self.store(&mut out);
        out
    }

    /// Writes the lanes into the first four elements of `dst`. Panics if `dst` is shorter.
    #[inline(always)]
    pub fn store(self, dst: &mut [f32]) {
        let dst = &mut dst[..LANES];
        #[cfg(target_arch = "x86_64")]
        // SAFETY: `dst` holds at least four writable elements; the store is unaligned.
        unsafe {
            _mm_storeu_ps(dst.as_mut_ptr(), self.0)
        }
        #[cfg(target_arch = "aarch64")]
        // SAFETY: `dst` holds at least four writable elements.
        unsafe {
            vst1q_f32(dst.as_mut_ptr(), self.0)
        }
        #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
        {
            dst.copy_from_slice(&self.0)
        }
    }

    /// Horizontal sum of the four lanes.
    #[inline(always)]
    pub fn sum(self) -> f32 {
        #[cfg(target_arch = "aarch64")]
        // SAFETY: NEON is always available on aarch64.
        unsafe {
            vaddvq_f32(self.0)
        }
        #[cfg(not(target_arch = "aarch64"))]
        {
            let v = self.to_array();
            (v[0] + v[1]) + (v[2] + v[3])
        }
    }
}

impl fmt::Debug for F32x4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("F32x4").field(&self.to_array()).finish()
    }
}

/// Dot product over the common prefix of `a` and `b`: four-wide blocks plus a scalar tail.
#[inline]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    let n = a.len().min(b.len());
    let simd_end = n / LANES * LANES;
    let mut acc = F32x4::zero();
    for i in (0..simd_end).step_by(LANES) {
        acc = acc.mul_add(F32x4::load(&a[i..]), F32x4::load(&b[i..]));
    }
    let mut total = acc.sum();
    for i in simd_end..n {
        total += a[i] * b[i];
    }
    total
}
