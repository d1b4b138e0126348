use std::cmp::Ordering;

use crate::{Error, Result};

pub const DEFAULT_TOP_K: usize = 5;

/// Cosine similarity in `[-1, 1]`. Zero-magnitude inputs score `0.0`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
	if a.len() != b.len() {
		return Err(Error::DimensionMismatch { expected: a.len(), actual: b.len() });
	}

	let mut dot = 0.0_f64;
	let mut norm_a = 0.0_f64;
	let mut norm_b = 0.0_f64;

	for (x, y) in a.iter().zip(b) {
		let (x, y) = (*x as f64, *y as f64);

		dot += x * y;
		norm_a += x * x;
		norm_b += y * y;
	}

	if norm_a == 0.0 || norm_b == 0.0 {
		return Ok(0.0);
	}

	Ok((dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0) as f32)
}

pub fn l2_norm(vec: &[f32]) -> f32 {
	vec.iter().map(|value| (*value as f64) * (*value as f64)).sum::<f64>().sqrt() as f32
}

/// Divides by the Euclidean norm. A zero vector is left as is.
pub fn l2_normalize(vec: &mut [f32]) {
	let norm = l2_norm(vec);

	if norm == 0.0 || !norm.is_finite() {
		return;
	}

	for value in vec.iter_mut() {
		*value /= norm;
	}
}

/// Window-mean reduction to `target_dim`, then L2 normalization.
///
/// Inputs already at or below `target_dim` are returned unchanged. Window `i` covers
/// `floor(i * ratio)..floor((i + 1) * ratio)` with `ratio = len / target_dim`; the last window
/// always ends at `len`. When the reduced vector has zero norm it is returned unnormalized.
pub fn reduce(vec: &[f32], target_dim: usize) -> Vec<f32> {
	if vec.len() <= target_dim {
		return vec.to_vec();
	}
	if target_dim == 0 {
		return Vec::new();
	}

	let len = vec.len();
	let ratio = len as f64 / target_dim as f64;
	let mut out = Vec::with_capacity(target_dim);

	for i in 0..target_dim {
		let start = (i as f64 * ratio).floor() as usize;
		let end = if i + 1 == target_dim {
			len
		} else {
			(((i + 1) as f64 * ratio).floor() as usize).clamp(start + 1, len)
		};
		let window = &vec[start..end];
		let sum: f64 = window.iter().map(|value| *value as f64).sum();

		out.push((sum / window.len() as f64) as f32);
	}

	l2_normalize(&mut out);

	out
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ranked<T> {
	pub item: T,
	pub score: f32,
}

/// Ranks candidates by descending cosine similarity to `query`, keeping at most `k`.
///
/// The sort is stable, so equal scores keep their input order.
pub fn top_k<T>(query: &[f32], candidates: Vec<(Vec<f32>, T)>, k: usize) -> Result<Vec<Ranked<T>>> {
	let mut scored = Vec::with_capacity(candidates.len());

	for (vec, item) in candidates {
		let score = cosine_similarity(query, &vec)?;

		scored.push(Ranked { item, score });
	}

	sort_descending(&mut scored);
	scored.truncate(k);

	Ok(scored)
}

pub fn sort_descending<T>(ranked: &mut [Ranked<T>]) {
	ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
}
