//! Reference tensor operations (matvec, softmax, etc.)
//!
//! These are the plain sequential definitions every kernel provider must
//! reproduce. All operate in place on f32 slices.

use super::Tensor;

/// RMSNorm epsilon for Llama 3
pub const RMS_NORM_EPS: f32 = 1e-5;

/// Inverse RMS of `x`: `1 / sqrt(mean(x²) + eps)`
#[inline]
pub fn inv_rms(x: &[f32]) -> f32 {
    let mut ss = 0.0f32;
    for &v in x {
        ss += v * v;
    }
    1.0 / (ss / x.len() as f32 + RMS_NORM_EPS).sqrt()
}

/// RMS normalization in place: `x_i ← x_i * inv_rms * weight_i`
pub fn rms_norm(x: &mut [f32], weight: &[f32]) {
    let inv = inv_rms(x);
    for (v, &w) in x.iter_mut().zip(weight) {
        *v = *v * inv * w;
    }
}

/// Dot product of one matrix row with `x`, accumulated in column order
#[inline]
pub fn row_dot(matrix: &Tensor, row: usize, x: &[f32]) -> f32 {
    let cols = x.len();
    let offset = row * cols;
    let mut sum = 0.0f32;
    match matrix {
        Tensor::F32(m) => {
            for (w, &v) in m[offset..offset + cols].iter().zip(x) {
                sum += w * v;
            }
        }
        Tensor::F16(m) => {
            for (w, &v) in m[offset..offset + cols].iter().zip(x) {
                sum += w.to_f32() * v;
            }
        }
    }
    sum
}

/// Matrix-vector multiply `out = matrix · x`, matrix is `[out.len(), x.len()]`
pub fn matvec(matrix: &Tensor, x: &[f32], out: &mut [f32]) {
    debug_assert!(matrix.len() >= out.len() * x.len());
    for (row, y) in out.iter_mut().enumerate() {
        *y = row_dot(matrix, row, x);
    }
}

/// `(cos, sin)` of the rotation applied to channel pair `i` at `pos`
#[inline]
pub fn rope_angle(pos: usize, i: usize, head_dim: usize, theta: f32) -> (f32, f32) {
    let freq = (1.0 / (theta as f64).powf(i as f64 / head_dim as f64)) as f32;
    let angle = (pos as f32 * freq) as f64;
    (angle.cos() as f32, angle.sin() as f32)
}

/// Rotate paired channels of one head in place
#[inline]
pub fn rope_head(head: &mut [f32], pos: usize, theta: f32) {
    let head_dim = head.len();
    for i in (0..head_dim).step_by(2) {
        let (cos, sin) = rope_angle(pos, i, head_dim, theta);
        let v0 = head[i];
        let v1 = head[i + 1];
        head[i] = v0 * cos - v1 * sin;
        head[i + 1] = v0 * sin + v1 * cos;
    }
}

/// Apply Rotary Position Embeddings to `num_heads` contiguous heads
pub fn rope(v: &mut [f32], pos: usize, num_heads: usize, head_dim: usize, theta: f32) {
    for head in v[..num_heads * head_dim].chunks_exact_mut(head_dim) {
        rope_head(head, pos, theta);
    }
}

/// Scaled dot-product score of `query` against one cached key
#[inline]
pub fn score(query: &[f32], key: &[f32], scale: f32) -> f32 {
    let mut sum = 0.0f32;
    for (q, k) in query.iter().zip(key) {
        sum += q * k;
    }
    sum * scale
}

/// `scores[t] = dot(query, keys[t]) / sqrt(head_dim)` for `t < scores.len()`
pub fn attention_scores(query: &[f32], keys: &[f32], scores: &mut [f32]) {
    let head_dim = query.len();
    let scale = 1.0 / (head_dim as f32).sqrt();
    for (t, s) in scores.iter_mut().enumerate() {
        *s = score(query, &keys[t * head_dim..(t + 1) * head_dim], scale);
    }
}

/// Weighted value sum for output channel `i`, accumulated in position order
#[inline]
pub fn value_channel(scores: &[f32], values: &[f32], head_dim: usize, i: usize) -> f32 {
    let mut sum = 0.0f32;
    for (t, &p) in scores.iter().enumerate() {
        sum += p * values[t * head_dim + i];
    }
    sum
}

/// `out[i] = Σ_t scores[t] * values[t, i]`
pub fn attention_values(scores: &[f32], values: &[f32], out: &mut [f32]) {
    let head_dim = out.len();
    for (i, o) in out.iter_mut().enumerate() {
        *o = value_channel(scores, values, head_dim, i);
    }
}

/// Numerically stable softmax in place
pub fn softmax(x: &mut [f32]) {
    if x.is_empty() {
        return;
    }

    // Find max for numerical stability
    let max_val = x.iter().cloned().fold(f32::NEG_INFINITY, f32::max);

    let mut sum = 0.0f32;
    for v in x.iter_mut() {
        *v = (*v - max_val).exp();
        sum += *v;
    }

    let inv_sum = 1.0 / sum;
    for v in x.iter_mut() {
        *v *= inv_sum;
    }
}

/// SiLU (Swish) activation: `x / (1 + exp(-x))`
#[inline]
pub fn silu_scalar(x: f32) -> f32 {
    x / (1.0 + (-x).exp())
}

/// SiLU in place
pub fn silu(x: &mut [f32]) {
    for v in x.iter_mut() {
        *v = silu_scalar(*v);
    }
}

/// Element-wise multiply `a ← a * b`
pub fn mul(a: &mut [f32], b: &[f32]) {
    for (x, &y) in a.iter_mut().zip(b) {
        *x *= y;
    }
}

/// Element-wise add `a ← a + b`
pub fn add(a: &mut [f32], b: &[f32]) {
    for (x, &y) in a.iter_mut().zip(b) {
        *x += y;
    }
}

/// Index of the first maximum
pub fn argmax(values: &[f32]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate().skip(1) {
        if v > values[best] {
            best = i;
        }
    }
    best
}
