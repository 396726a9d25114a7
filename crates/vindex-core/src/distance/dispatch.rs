//! Runtime selection between the SIMD-16 and scalar int8 distance kernels.

use super::scalar;

#[cfg(target_arch = "x86_64")]
use super::x86_sse41;
#[cfg(target_arch = "x86_64")]
use std::sync::atomic::{AtomicU8, Ordering};

#[cfg(target_arch = "x86_64")]
const UNKNOWN: u8 = 0;
#[cfg(target_arch = "x86_64")]
const AVAILABLE: u8 = 1;
#[cfg(target_arch = "x86_64")]
const UNAVAILABLE: u8 = 2;

#[cfg(target_arch = "x86_64")]
static SSE41_STATE: AtomicU8 = AtomicU8::new(UNKNOWN);

/// Returns whether the SIMD-16 kernel is usable on the current CPU.
///
/// Cached after the first call (`is_x86_feature_detected!` is not free)
/// using a relaxed atomic; the detection result cannot change within a
/// process's lifetime so a race between two first-callers is harmless —
/// both observe the same CPU.
#[inline]
#[must_use]
pub fn simd_available() -> bool {
    #[cfg(target_arch = "x86_64")]
    {
        match SSE41_STATE.load(Ordering::Relaxed) {
            AVAILABLE => true,
            UNAVAILABLE => false,
            _ => {
                let available = is_x86_feature_detected!("sse4.1");
                SSE41_STATE.store(
                    if available { AVAILABLE } else { UNAVAILABLE },
                    Ordering::Relaxed,
                );
                available
            }
        }
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        false
    }
}

/// Squared L2 distance between two equal-length i8 vectors.
///
/// # Panics
/// Panics if `a.len() != b.len()`.
#[inline]
#[must_use]
pub fn l2_sq_i8(a: &[i8], b: &[i8]) -> i32 {
    assert_eq!(a.len(), b.len(), "vector dimensions must match");
    #[cfg(target_arch = "x86_64")]
    {
        if simd_available() {
            // SAFETY: simd_available() just confirmed SSE4.1 support.
            return unsafe { x86_sse41::l2_sq_i8(a, b) };
        }
    }
    scalar::l2_sq_i8(a, b)
}

/// Dot product between two equal-length i8 vectors.
///
/// # Panics
/// Panics if `a.len() != b.len()`.
#[inline]
#[must_use]
pub fn dot_i8(a: &[i8], b: &[i8]) -> i32 {
    assert_eq!(a.len(), b.len(), "vector dimensions must match");
    #[cfg(target_arch = "x86_64")]
    {
        if simd_available() {
            // SAFETY: simd_available() just confirmed SSE4.1 support.
            return unsafe { x86_sse41::dot_i8(a, b) };
        }
    }
    scalar::dot_i8(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_vectors(dim: usize, seed: i32) -> (Vec<i8>, Vec<i8>) {
        let a: Vec<i8> = (0..dim)
            .map(|i| (((i as i32 * 7 + seed) % 255) - 127) as i8)
            .collect();
        let b: Vec<i8> = (0..dim)
            .map(|i| (((i as i32 * 13 + seed * 3) % 255) - 127) as i8)
            .collect();
        (a, b)
    }

    #[test]
    fn scalar_and_simd_agree_on_aligned_dims() {
        for dim in [4, 16, 32, 48, 128] {
            let (a, b) = sample_vectors(dim, 1);
            let scalar_l2 = scalar::l2_sq_i8(&a, &b);
            let scalar_dot = scalar::dot_i8(&a, &b);
            assert_eq!(l2_sq_i8(&a, &b), scalar_l2, "dim={dim}");
            assert_eq!(dot_i8(&a, &b), scalar_dot, "dim={dim}");
        }
    }

    #[test]
    fn scalar_and_simd_agree_on_ragged_tail() {
        // Not a multiple of 16; exercises the defensive tail loop.
        for dim in [1, 3, 17, 30, 33] {
            let (a, b) = sample_vectors(dim, 5);
            assert_eq!(l2_sq_i8(&a, &b), scalar::l2_sq_i8(&a, &b), "dim={dim}");
            assert_eq!(dot_i8(&a, &b), scalar::dot_i8(&a, &b), "dim={dim}");
        }
    }

    #[test]
    fn l2_sq_of_identical_vectors_is_zero() {
        let (a, _) = sample_vectors(64, 9);
        assert_eq!(l2_sq_i8(&a, &a), 0);
    }

    #[test]
    fn dot_of_onehot_vectors_is_zero_when_disjoint() {
        let mut a = vec![0i8; 16];
        let mut b = vec![0i8; 16];
        a[0] = 127;
        b[1] = 127;
        assert_eq!(dot_i8(&a, &b), 0);
        assert_eq!(l2_sq_i8(&a, &b), 127 * 127 * 2);
    }
}
