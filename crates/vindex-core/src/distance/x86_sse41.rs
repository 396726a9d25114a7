//! SIMD-16 int8 kernels for x86_64 (spec §4.B).
//!
//! Processes 16 bytes per iteration: widen i8→i16 across the low and high
//! 8-byte halves of the 128-bit register, compute per-lane work, and fold
//! the result into 4×i32 accumulator lanes via a signed-i16 pairwise
//! multiply-add (`_mm_madd_epi16`), finishing with a horizontal add of the
//! 4 lanes. A scalar tail loop handles any remainder.

// SAFETY: every `unsafe fn` below requires SSE4.1, enforced by the caller in
// `dispatch.rs` via `is_x86_feature_detected!("sse4.1")` before the first
// call, and by `#[target_feature(enable = "sse4.1")]` on the function itself.
// All loads are unaligned (`_mm_loadu_si128`) and bounded by the loop count
// `len / 16`, which never reads past `a`/`b`'s length.
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

use std::arch::x86_64::*;

use super::scalar;

const LANE: usize = 16;

/// Widens the low 8 bytes of `v` (interpreted as signed i8) to 8×i16.
#[inline]
unsafe fn widen_low(v: __m128i) -> __m128i {
    _mm_cvtepi8_epi16(v)
}

/// Widens the high 8 bytes of `v` (interpreted as signed i8) to 8×i16.
#[inline]
unsafe fn widen_high(v: __m128i) -> __m128i {
    _mm_cvtepi8_epi16(_mm_srli_si128::<8>(v))
}

/// Horizontally adds the 4 i32 lanes of `v` into a scalar.
#[inline]
unsafe fn hsum_epi32(v: __m128i) -> i32 {
    let shuf = _mm_shuffle_epi32::<0b11_10_11_10>(v);
    let sums = _mm_add_epi32(v, shuf);
    let shuf2 = _mm_shuffle_epi32::<0b01_01_01_01>(sums);
    let total = _mm_add_epi32(sums, shuf2);
    _mm_cvtsi128_si32(total)
}

/// SIMD-16 squared L2 distance. Caller guarantees `a.len() == b.len()` and
/// that SSE4.1 is available.
///
/// # Safety
/// Caller must have verified `is_x86_feature_detected!("sse4.1")`.
#[target_feature(enable = "sse4.1")]
pub(super) unsafe fn l2_sq_i8(a: &[i8], b: &[i8]) -> i32 {
    let len = a.len();
    let chunks = len / LANE;
    let mut acc = _mm_setzero_si128();

    let a_ptr = a.as_ptr().cast::<u8>();
    let b_ptr = b.as_ptr().cast::<u8>();

    for i in 0..chunks {
        let offset = i * LANE;
        let va = _mm_loadu_si128(a_ptr.add(offset).cast());
        let vb = _mm_loadu_si128(b_ptr.add(offset).cast());

        let a_lo = widen_low(va);
        let a_hi = widen_high(va);
        let b_lo = widen_low(vb);
        let b_hi = widen_high(vb);

        let d_lo = _mm_sub_epi16(a_lo, b_lo);
        let d_hi = _mm_sub_epi16(a_hi, b_hi);

        acc = _mm_add_epi32(acc, _mm_madd_epi16(d_lo, d_lo));
        acc = _mm_add_epi32(acc, _mm_madd_epi16(d_hi, d_hi));
    }

    let mut total = hsum_epi32(acc);
    let tail = chunks * LANE;
    if tail < len {
        total += scalar::l2_sq_i8(&a[tail..], &b[tail..]);
    }
    total
}

/// SIMD-16 dot product. Caller guarantees `a.len() == b.len()` and that
/// SSE4.1 is available.
///
/// # Safety
/// Caller must have verified `is_x86_feature_detected!("sse4.1")`.
#[target_feature(enable = "sse4.1")]
pub(super) unsafe fn dot_i8(a: &[i8], b: &[i8]) -> i32 {
    let len = a.len();
    let chunks = len / LANE;
    let mut acc = _mm_setzero_si128();

    let a_ptr = a.as_ptr().cast::<u8>();
    let b_ptr = b.as_ptr().cast::<u8>();

    for i in 0..chunks {
        let offset = i * LANE;
        let va = _mm_loadu_si128(a_ptr.add(offset).cast());
        let vb = _mm_loadu_si128(b_ptr.add(offset).cast());

        let a_lo = widen_low(va);
        let a_hi = widen_high(va);
        let b_lo = widen_low(vb);
        let b_hi = widen_high(vb);

        acc = _mm_add_epi32(acc, _mm_madd_epi16(a_lo, b_lo));
        acc = _mm_add_epi32(acc, _mm_madd_epi16(a_hi, b_hi));
    }

    let mut total = hsum_epi32(acc);
    let tail = chunks * LANE;
    if tail < len {
        total += scalar::dot_i8(&a[tail..], &b[tail..]);
    }
    total
}
