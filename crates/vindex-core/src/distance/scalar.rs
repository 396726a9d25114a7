//! Scalar fallback implementations of the int8 distance metrics.
//!
//! Used on every non-x86_64 target, whenever the running CPU lacks SSE4.1,
//! and as the tail handler when `DIM` is not a multiple of 16 (disallowed by
//! §3 but handled defensively per §4.B).

/// Straight-loop squared L2 distance over two equal-length i8 slices.
#[inline]
pub(super) fn l2_sq_i8(a: &[i8], b: &[i8]) -> i32 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| {
            let d = i32::from(x) - i32::from(y);
            d * d
        })
        .sum()
}

/// Straight-loop dot product over two equal-length i8 slices.
#[inline]
pub(super) fn dot_i8(a: &[i8], b: &[i8]) -> i32 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| i32::from(x) * i32::from(y))
        .sum()
}
