//! f32 → int8 quantization for the vector store (§3 "Vector store (i8)").
//!
//! The orchestrator normalizes host input to unit L2 length, then quantizes
//! each lane independently: clamp to `[-1, 1]`, scale to `[-127, 127]`, and
//! round to the nearest integer. This is deliberately simpler than a
//! per-vector min/max scalar quantization scheme — spec.md fixes the input
//! range at `[-1, 1]` so that quantized distances stay comparable across
//! vectors without per-vector scale/offset bookkeeping.

/// Scales a clamped `[-1, 1]` component to the `[-127, 127]` int8 range.
const SCALE: f32 = 127.0;

/// Quantizes a normalized f32 vector to int8 (§3).
///
/// Each component is clamped to `[-1, 1]` before scaling, so values outside
/// that range saturate rather than wrap.
#[must_use]
pub fn quantize_i8(vector: &[f32]) -> Vec<i8> {
    vector
        .iter()
        .map(|&v| (v.clamp(-1.0, 1.0) * SCALE).round() as i8)
        .collect()
}

/// Normalizes `vector` to unit L2 length in place. A zero vector is left
/// unchanged (there is no direction to normalize to).
pub fn normalize_l2(vector: &mut [f32]) {
    let norm_sq: f32 = vector.iter().map(|v| v * v).sum();
    if norm_sq <= f32::EPSILON {
        return;
    }
    let inv_norm = norm_sq.sqrt().recip();
    for v in vector {
        *v *= inv_norm;
    }
}

/// Exact f32 squared L2 distance, used for the re-rank pass (§4.F step 7).
#[must_use]
pub fn l2_sq_f32(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantize_clamps_and_rounds() {
        let q = quantize_i8(&[1.0, -1.0, 0.5, 2.0, -2.0]);
        assert_eq!(q, vec![127, -127, 64, 127, -127]);
    }

    #[test]
    fn normalize_produces_unit_vector() {
        let mut v = vec![3.0, 4.0];
        normalize_l2(&mut v);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn normalize_leaves_zero_vector_untouched() {
        let mut v = vec![0.0, 0.0];
        normalize_l2(&mut v);
        assert_eq!(v, vec![0.0, 0.0]);
    }

    #[test]
    fn l2_sq_f32_matches_manual_computation() {
        let d = l2_sq_f32(&[0.0, 0.0], &[3.0, 4.0]);
        assert!((d - 25.0).abs() < 1e-6);
    }
}
