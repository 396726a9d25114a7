//! int8 distance kernels (spec component B).
//!
//! Two metrics operate directly on byte slices pulled from the i8 vector
//! store: squared L2 ([`l2_sq_i8`]) and dot product ([`dot_i8`]). Both
//! expose one entry point whose body picks between a SIMD-16 path and a
//! scalar fallback (§9 "SIMD feature gating"); the two paths are required to
//! agree bit-for-bit on identical inputs, which is exercised in
//! `dispatch::tests`.
//!
//! # Module structure
//!
//! - `scalar` — the straight-loop reference implementation, always compiled.
//! - `x86_sse41` — the 16-byte-per-iteration SIMD kernel (x86_64 only).
//! - `dispatch` — runtime feature detection and the public entry points.

mod dispatch;
mod scalar;

#[cfg(target_arch = "x86_64")]
mod x86_sse41;

pub use dispatch::{dot_i8, l2_sq_i8, simd_available};
