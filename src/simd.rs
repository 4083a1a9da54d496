use crate::{compile::Arch, Error, Result};

/// Largest supported unrolling degree.
pub const MAX_UNROLL: usize = 8;

/// Longest `dot_i8` input whose sum cannot leave the `i32` range.
pub const MAX_DOT_I8_LEN: usize = (i32::MAX / (127 * 127)) as usize;

/// Dot products for a given architecture and unrolling degree.
///
/// Integer products are exact, so every combination returns the same value.
/// Floating point products differ only in summation order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Kernels {
    arch: Arch,
    unroll: usize,
}

impl Kernels {
    pub fn new(arch: Arch, unroll: usize) -> Result<Self> {
        if !(1..=MAX_UNROLL).contains(&unroll) {
            return Err(Error::Options(format!("unroll level must be between 1 and {MAX_UNROLL}, got {unroll}")));
        }

        if !arch.is_supported() {
            return Err(Error::UnsupportedArch(arch));
        }

        Ok(Self { arch, unroll })
    }

    pub fn arch(&self) -> Arch {
        self.arch
    }

    pub fn unroll(&self) -> usize {
        self.unroll
    }

    pub fn dot_f32(&self, a: &[f32], b: &[f32]) -> f32 {
        debug_assert_eq!(a.len(), b.len());

        match self.arch {
            Arch::General => dot_f32_base(a, b, self.unroll),
            Arch::Ssse3 => dot_f32_ssse3(a, b, self.unroll),
        }
    }

    /// Inputs must lie in `[-127, 127]` and be at most `MAX_DOT_I8_LEN` long.
    pub fn dot_i8(&self, a: &[i8], b: &[i8]) -> i32 {
        debug_assert_eq!(a.len(), b.len());
        debug_assert!(a.len() <= MAX_DOT_I8_LEN);

        match self.arch {
            Arch::General => dot_i8_base(a, b, self.unroll),
            Arch::Ssse3 => dot_i8_ssse3(a, b, self.unroll),
        }
    }
}

fn dot_f32_base(a: &[f32], b: &[f32], unroll: usize) -> f32 {
    let mut acc = [0.0; MAX_UNROLL];

    for (x, y) in a.chunks_exact(unroll).zip(b.chunks_exact(unroll)) {
        for ((lane, &i), &j) in acc.iter_mut().zip(x).zip(y) {
            *lane += i * j;
        }
    }

    let tail = a.len() - a.len() % unroll;
    let mut sum: f32 = acc[..unroll].iter().sum();
    for (&i, &j) in a[tail..].iter().zip(&b[tail..]) {
        sum += i * j;
    }

    sum
}

fn dot_i8_base(a: &[i8], b: &[i8], unroll: usize) -> i32 {
    let mut acc = [0i32; MAX_UNROLL];

    for (x, y) in a.chunks_exact(unroll).zip(b.chunks_exact(unroll)) {
        for ((lane, &i), &j) in acc.iter_mut().zip(x).zip(y) {
            *lane += i32::from(i) * i32::from(j);
        }
    }

    let tail = a.len() - a.len() % unroll;
    let mut sum: i32 = acc[..unroll].iter().sum();
    for (&i, &j) in a[tail..].iter().zip(&b[tail..]) {
        sum += i32::from(i) * i32::from(j);
    }

    sum
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub(crate) fn ssse3_detected() -> bool {
    is_x86_feature_detected!("ssse3")
}

#[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
pub(crate) fn ssse3_detected() -> bool {
    false
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
fn dot_f32_ssse3(a: &[f32], b: &[f32], unroll: usize) -> f32 {
    // Kernels::new only hands out Arch::Ssse3 after runtime detection
    unsafe { x86::dot_f32(a, b, unroll) }
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
fn dot_i8_ssse3(a: &[i8], b: &[i8], unroll: usize) -> i32 {
    unsafe { x86::dot_i8(a, b, unroll) }
}

#[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
fn dot_f32_ssse3(a: &[f32], b: &[f32], unroll: usize) -> f32 {
    dot_f32_base(a, b, unroll)
}

#[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
fn dot_i8_ssse3(a: &[i8], b: &[i8], unroll: usize) -> i32 {
    dot_i8_base(a, b, unroll)
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
mod x86 {
    #[cfg(target_arch = "x86")]
    use std::arch::x86::*;
    #[cfg(target_arch = "x86_64")]
    use std::arch::x86_64::*;

    use super::MAX_UNROLL;

    #[target_feature(enable = "ssse3")]
    pub unsafe fn dot_i8(a: &[i8], b: &[i8], unroll: usize) -> i32 {
        let len = a.len().min(b.len());
        let aptr = a.as_ptr();
        let bptr = b.as_ptr();
        let ones = _mm_set1_epi16(1);

        let mut acc = [_mm_setzero_si128(); MAX_UNROLL];
        let mut i = 0;

        while i + 16 * unroll <= len {
            for (j, lane) in acc.iter_mut().take(unroll).enumerate() {
                let x = _mm_loadu_si128(aptr.add(i + 16 * j).cast());
                let y = _mm_loadu_si128(bptr.add(i + 16 * j).cast());
                *lane = _mm_add_epi32(*lane, mul_add_i8(x, y, ones));
            }
            i += 16 * unroll;
        }

        while i + 16 <= len {
            let x = _mm_loadu_si128(aptr.add(i).cast());
            let y = _mm_loadu_si128(bptr.add(i).cast());
            acc[0] = _mm_add_epi32(acc[0], mul_add_i8(x, y, ones));
            i += 16;
        }

        let mut total = acc[0];
        for &lane in &acc[1..unroll] {
            total = _mm_add_epi32(total, lane);
        }

        let mut lanes = [0i32; 4];
        _mm_storeu_si128(lanes.as_mut_ptr().cast(), total);
        let mut sum: i32 = lanes.iter().sum();

        for k in i..len {
            sum += i32::from(a[k]) * i32::from(b[k]);
        }

        sum
    }

    /// Signed bytes multiplied pairwise, summed into four i32 lanes.
    #[inline]
    #[target_feature(enable = "ssse3")]
    unsafe fn mul_add_i8(x: __m128i, y: __m128i, ones: __m128i) -> __m128i {
        let ax = _mm_sign_epi8(x, x);
        let sy = _mm_sign_epi8(y, x);
        let dot = _mm_maddubs_epi16(ax, sy);
        _mm_madd_epi16(dot, ones)
    }

    #[target_feature(enable = "ssse3")]
    pub unsafe fn dot_f32(a: &[f32], b: &[f32], unroll: usize) -> f32 {
        let len = a.len().min(b.len());
        let aptr = a.as_ptr();
        let bptr = b.as_ptr();

        let mut acc = [_mm_setzero_ps(); MAX_UNROLL];
        let mut i = 0;

        while i + 4 * unroll <= len {
            for (j, lane) in acc.iter_mut().take(unroll).enumerate() {
                let x = _mm_loadu_ps(aptr.add(i + 4 * j));
                let y = _mm_loadu_ps(bptr.add(i + 4 * j));
                *lane = _mm_add_ps(*lane, _mm_mul_ps(x, y));
            }
            i += 4 * unroll;
        }

        while i + 4 <= len {
            let x = _mm_loadu_ps(aptr.add(i));
            let y = _mm_loadu_ps(bptr.add(i));
            acc[0] = _mm_add_ps(acc[0], _mm_mul_ps(x, y));
            i += 4;
        }

        let mut total = acc[0];
        for &lane in &acc[1..unroll] {
            total = _mm_add_ps(total, lane);
        }

        let mut lanes = [0f32; 4];
        _mm_storeu_ps(lanes.as_mut_ptr(), total);
        let mut sum: f32 = lanes.iter().sum();

        for k in i..len {
            sum += a[k] * b[k];
        }

        sum
    }
}
