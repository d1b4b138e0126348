pub mod cache;

use std::{
	collections::{HashMap, HashSet},
	sync::Arc,
};

use futures::{StreamExt, TryStreamExt, stream};

use crate::{EmbeddingProvider, Error, Result};
use cache::EmbeddingCache;
use fedmem_config::Config;
use fedmem_domain::vector::{self, Ranked};
use fedmem_providers::embedding::check_shape;

pub use fedmem_domain::vector::DEFAULT_TOP_K;

/// Cache reads or writes in flight for one batch call. Each one is bounded by the cache timeout.
const CACHE_CONCURRENCY: usize = 32;

#[derive(Debug, Clone, Copy)]
pub struct EmbeddingSettings {
	pub full_dimensions: usize,
	pub compact_dimensions: usize,
	pub batch_size: usize,
	pub max_concurrency: usize,
}
impl EmbeddingSettings {
	pub fn from_config(cfg: &Config) -> Self {
		Self {
			full_dimensions: cfg.providers.embedding.dimensions as usize,
			compact_dimensions: cfg.embedding.compact_dimensions as usize,
			batch_size: cfg.embedding.batch_size as usize,
			max_concurrency: cfg.embedding.max_concurrency as usize,
		}
	}
}

/// Produces full and compact embeddings through the provider, with caching and batching.
pub struct EmbeddingService {
	provider: Arc<dyn EmbeddingProvider>,
	cache: Option<EmbeddingCache>,
	settings: EmbeddingSettings,
}
impl EmbeddingService {
	pub fn new(
		provider: Arc<dyn EmbeddingProvider>,
		cache: Option<EmbeddingCache>,
		settings: EmbeddingSettings,
	) -> Self {
		let settings = EmbeddingSettings {
			batch_size: settings.batch_size.max(1),
			max_concurrency: settings.max_concurrency.max(1),
			..settings
		};

		Self { provider, cache, settings }
	}

	pub fn provider_id(&self) -> &str {
		self.provider.provider_id()
	}

	pub fn full_dimensions(&self) -> usize {
		self.settings.full_dimensions
	}

	pub fn compact_dimensions(&self) -> usize {
		self.settings.compact_dimensions
	}

	pub fn cache(&self) -> Option<&EmbeddingCache> {
		self.cache.as_ref()
	}

	pub async fn generate_full(&self, text: &str) -> Result<Vec<f32>> {
		let mut vectors = self.generate_batch(&[text.to_string()]).await?;

		vectors.pop().ok_or_else(|| missing_vector(0))
	}

	pub async fn generate_compact(&self, text: &str) -> Result<Vec<f32>> {
		let full = self.generate_full(text).await?;

		Ok(self.reduce(&full))
	}

	/// Full and compact vectors for `text` from a single provider call.
	pub async fn generate_pair(&self, text: &str) -> Result<(Vec<f32>, Vec<f32>)> {
		let full = self.generate_full(text).await?;
		let compact = self.reduce(&full);

		Ok((full, compact))
	}

	/// Embeds every text, returning vectors in input order.
	///
	/// Cache lookups run concurrently and cached texts skip the provider. Uncached texts are
	/// deduplicated by their normalized form, split into chunks of at most `batch_size`, and sent
	/// with at most `max_concurrency` requests in flight. Each chunk is written back to the cache
	/// concurrently as soon as it arrives.
	pub async fn generate_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
		for text in texts {
			ensure_text(text)?;
		}

		let dimensions = self.settings.full_dimensions;
		let keys: Vec<String> = texts
			.iter()
			.map(|text| cache::cache_key(self.provider_id(), dimensions, text))
			.collect();
		let mut seen = HashSet::with_capacity(keys.len());
		let unique: Vec<usize> =
			(0..keys.len()).filter(|i| seen.insert(keys[*i].as_str())).collect();
		let lookups: Vec<Option<Vec<f32>>> =
			stream::iter(unique.iter().map(|i| self.cached(&keys[*i])))
				.buffered(CACHE_CONCURRENCY)
				.collect()
				.await;
		let mut resolved: HashMap<&str, Vec<f32>> = HashMap::with_capacity(keys.len());
		let mut misses = Vec::new();

		for (i, hit) in unique.into_iter().zip(lookups) {
			match hit {
				Some(vec) => {
					resolved.insert(keys[i].as_str(), vec);
				},
				None => misses.push(i),
			}
		}

		if !misses.is_empty() {
			let chunks: Vec<&[usize]> = misses.chunks(self.settings.batch_size).collect();
			let embedded: Vec<Vec<Vec<f32>>> = stream::iter(
				chunks.iter().map(|chunk| self.embed_chunk(texts, &keys, chunk)),
			)
			.buffered(self.settings.max_concurrency)
			.try_collect()
			.await?;

			tracing::debug!(
				requested = texts.len(),
				embedded = misses.len(),
				chunks = chunks.len(),
				"Embedding batch generated."
			);

			for (chunk, vectors) in chunks.iter().zip(embedded) {
				for (i, vec) in chunk.iter().zip(vectors) {
					resolved.insert(keys[*i].as_str(), vec);
				}
			}
		}

		keys.iter()
			.enumerate()
			.map(|(i, key)| resolved.get(key.as_str()).cloned().ok_or_else(|| missing_vector(i)))
			.collect()
	}

	/// One provider round trip. Batches larger than `batch_size` are refused.
	pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
		if texts.len() > self.settings.batch_size {
			return Err(Error::InvalidRequest {
				message: format!(
					"Embedding batch of {} texts exceeds batch_size {}.",
					texts.len(),
					self.settings.batch_size
				),
			});
		}

		for text in texts {
			ensure_text(text)?;
		}

		if texts.is_empty() {
			return Ok(Vec::new());
		}

		let vectors = self.provider.embed(texts).await.map_err(Error::EmbeddingGeneration)?;

		check_shape(&vectors, texts.len(), self.settings.full_dimensions)
			.map_err(Error::EmbeddingGeneration)?;

		Ok(vectors)
	}

	pub fn reduce(&self, full: &[f32]) -> Vec<f32> {
		vector::reduce(full, self.settings.compact_dimensions)
	}

	pub fn cosine_similarity(&self, a: &[f32], b: &[f32]) -> Result<f32> {
		Ok(vector::cosine_similarity(a, b)?)
	}

	pub fn top_k<T>(
		&self,
		query: &[f32],
		candidates: Vec<(Vec<f32>, T)>,
		k: usize,
	) -> Result<Vec<Ranked<T>>> {
		Ok(vector::top_k(query, candidates, k)?)
	}

	/// Invalidates every cached vector of the active provider.
	pub async fn clear_cache(&self) -> Result<u64> {
		match self.cache.as_ref() {
			Some(cache) => cache.clear(self.provider_id()).await,
			None => Ok(0),
		}
	}

	async fn cached(&self, key: &str) -> Option<Vec<f32>> {
		self.cache.as_ref()?.get(key, self.settings.full_dimensions).await
	}

	async fn embed_chunk(
		&self,
		texts: &[String],
		keys: &[String],
		chunk: &[usize],
	) -> Result<Vec<Vec<f32>>> {
		let batch: Vec<String> = chunk.iter().map(|i| texts[*i].clone()).collect();
		let vectors = self.embed_batch(&batch).await?;

		if let Some(cache) = self.cache.as_ref() {
			stream::iter(chunk.iter().zip(&vectors).map(|(i, vec)| cache.set(&keys[*i], vec)))
				.buffer_unordered(CACHE_CONCURRENCY)
				.collect::<Vec<()>>()
				.await;
		}

		Ok(vectors)
	}
}

fn ensure_text(text: &str) -> Result<()> {
	if text.trim().is_empty() {
		return Err(Error::InvalidRequest {
			message: "Embedding text must be non-empty.".to_string(),
		});
	}

	Ok(())
}

fn missing_vector(position: usize) -> Error {
	Error::EmbeddingGeneration(fedmem_providers::Error::InvalidResponse {
		message: format!("No embedding produced for input {position}."),
	})
}
