use std::{sync::Arc, time::Duration as StdDuration};

use time::Duration;
use tokio::time::timeout;

use crate::Result;
use fedmem_domain::text;
use fedmem_storage::CacheBackend;

pub const KEY_PREFIX: &str = "emb:";
pub const DEFAULT_TIMEOUT: StdDuration = StdDuration::from_millis(500);

const KEY_VERSION: &str = "v1";

/// Best-effort vector cache over a string backend.
///
/// Reads and writes never fail or stall the caller: backend errors, undecodable payloads, and
/// operations slower than the timeout are logged and behave as misses.
#[derive(Clone)]
pub struct EmbeddingCache {
	backend: Arc<dyn CacheBackend>,
	ttl: Duration,
	timeout: StdDuration,
}
impl EmbeddingCache {
	pub fn new(backend: Arc<dyn CacheBackend>, ttl: Duration) -> Self {
		Self { backend, ttl, timeout: DEFAULT_TIMEOUT }
	}

	pub fn with_timeout(mut self, timeout: StdDuration) -> Self {
		self.timeout = timeout;

		self
	}

	pub fn ttl(&self) -> Duration {
		self.ttl
	}

	pub fn timeout(&self) -> StdDuration {
		self.timeout
	}

	pub async fn get(&self, key: &str, dimensions: usize) -> Option<Vec<f32>> {
		let raw = match timeout(self.timeout, self.backend.get(key)).await {
			Ok(Ok(Some(raw))) => raw,
			Ok(Ok(None)) => return None,
			Ok(Err(err)) => {
				tracing::warn!(error = %err, cache_key = key, "Embedding cache read failed.");

				return None;
			},
			Err(_) => {
				tracing::warn!(
					cache_key = key,
					timeout_ms = self.timeout.as_millis() as u64,
					"Embedding cache read timed out."
				);

				return None;
			},
		};
		let vec: Vec<f32> = match serde_json::from_str(&raw) {
			Ok(vec) => vec,
			Err(err) => {
				tracing::warn!(error = %err, cache_key = key, "Embedding cache payload is invalid.");

				return None;
			},
		};

		if vec.len() != dimensions {
			tracing::warn!(
				cache_key = key,
				expected = dimensions,
				actual = vec.len(),
				"Cached embedding has the wrong dimension."
			);

			return None;
		}

		Some(vec)
	}

	pub async fn set(&self, key: &str, vec: &[f32]) {
		let payload = match serde_json::to_string(vec) {
			Ok(payload) => payload,
			Err(err) => {
				tracing::warn!(error = %err, cache_key = key, "Failed to encode embedding for cache.");

				return;
			},
		};

		match timeout(self.timeout, self.backend.set(key, payload, self.ttl)).await {
			Ok(Ok(())) => {},
			Ok(Err(err)) => {
				tracing::warn!(error = %err, cache_key = key, "Embedding cache write failed.");
			},
			Err(_) => {
				tracing::warn!(
					cache_key = key,
					timeout_ms = self.timeout.as_millis() as u64,
					"Embedding cache write timed out."
				);
			},
		}
	}

	/// Drops every entry written for `provider_id`.
	pub async fn clear(&self, provider_id: &str) -> Result<u64> {
		Ok(self.backend.delete_prefix(&provider_prefix(provider_id)).await?)
	}

	pub async fn clear_all(&self) -> Result<u64> {
		Ok(self.backend.delete_prefix(KEY_PREFIX).await?)
	}

	pub async fn purge_expired(&self) -> Result<u64> {
		Ok(self.backend.purge_expired().await?)
	}
}

/// `emb:v1:{provider_id}:{dimensions}:{content_hash}`.
pub fn cache_key(provider_id: &str, dimensions: usize, text: &str) -> String {
	format!("{}{dimensions}:{}", provider_prefix(provider_id), text::content_hash(text))
}

pub fn provider_prefix(provider_id: &str) -> String {
	format!("{KEY_PREFIX}{KEY_VERSION}:{provider_id}:")
}
