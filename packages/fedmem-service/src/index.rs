use std::{cmp::Ordering, sync::Arc};

use futures::{StreamExt, stream};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{EmbeddingService, Error, ModuleRegistry, Result};
use fedmem_domain::vector;
use fedmem_storage::{
	IndexStore,
	models::{IndexEntry, MemoryRecord},
};

#[derive(Debug, Clone, PartialEq)]
pub struct IndexPayload {
	pub title: String,
	pub summary: String,
	pub compact_embedding: Vec<f32>,
}

#[derive(Debug, Clone, Default)]
pub struct RouteOptions {
	/// Restricts routing to these modules. `None` searches all of them.
	pub modules: Option<Vec<String>>,
	pub limit: Option<u32>,
	pub min_score: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouteHit {
	pub entry: IndexEntry,
	pub score: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMemory {
	pub module_id: String,
	pub record: MemoryRecord,
	pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DanglingRef {
	pub module_id: String,
	pub remote_memory_id: Uuid,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
	/// In route order.
	pub memories: Vec<ResolvedMemory>,
	pub dangling: Vec<DanglingRef>,
}

/// Cross-module registry of compact embeddings.
pub struct CentralIndex {
	store: Arc<dyn IndexStore>,
	embedding: Arc<EmbeddingService>,
	default_limit: u32,
	default_min_score: f32,
	resolve_concurrency: usize,
}
impl CentralIndex {
	pub fn new(
		store: Arc<dyn IndexStore>,
		embedding: Arc<EmbeddingService>,
		cfg: &fedmem_config::Index,
	) -> Self {
		Self {
			store,
			embedding,
			default_limit: cfg.default_limit,
			default_min_score: cfg.default_min_score,
			resolve_concurrency: (cfg.resolve_concurrency as usize).max(1),
		}
	}

	pub async fn upsert_index(
		&self,
		owner_id: &str,
		module_id: &str,
		remote_memory_id: Uuid,
		payload: IndexPayload,
	) -> Result<()> {
		let expected = self.embedding.compact_dimensions();

		if payload.compact_embedding.len() != expected {
			return Err(Error::DimensionMismatch {
				expected,
				actual: payload.compact_embedding.len(),
			});
		}

		let now = OffsetDateTime::now_utc();
		let entry = IndexEntry {
			owner_id: owner_id.to_string(),
			module_id: module_id.to_string(),
			remote_memory_id,
			title: payload.title,
			summary: payload.summary,
			compact_embedding: payload.compact_embedding,
			last_accessed: None,
			created_at: now,
			updated_at: now,
		};

		Ok(self.store.upsert(&entry).await?)
	}

	pub async fn remove_index(
		&self,
		owner_id: &str,
		module_id: &str,
		remote_memory_id: Uuid,
	) -> Result<bool> {
		Ok(self.store.remove(owner_id, module_id, remote_memory_id).await?)
	}

	pub async fn entry(
		&self,
		owner_id: &str,
		module_id: &str,
		remote_memory_id: Uuid,
	) -> Result<Option<IndexEntry>> {
		Ok(self.store.get(owner_id, module_id, remote_memory_id).await?)
	}

	/// Compact vector for an already stored full embedding.
	pub fn reduce(&self, full: &[f32]) -> Vec<f32> {
		self.embedding.reduce(full)
	}

	/// Entries of one module, across owners unless `owner_id` is given.
	pub async fn module_entries(
		&self,
		module_id: &str,
		owner_id: Option<&str>,
	) -> Result<Vec<IndexEntry>> {
		Ok(self.store.list_module(module_id, owner_id).await?)
	}

	/// Embeds `query` once and ranks the owner's entries against it.
	pub async fn route(
		&self,
		owner_id: &str,
		query: &str,
		options: &RouteOptions,
	) -> Result<Vec<RouteHit>> {
		let compact = self.embedding.generate_compact(query).await?;

		self.route_vector(owner_id, &compact, options).await
	}

	/// Ranks by descending similarity. Equal scores put the more recently accessed entry first,
	/// and never-accessed entries last.
	pub async fn route_vector(
		&self,
		owner_id: &str,
		compact: &[f32],
		options: &RouteOptions,
	) -> Result<Vec<RouteHit>> {
		let expected = self.embedding.compact_dimensions();

		if compact.len() != expected {
			return Err(Error::DimensionMismatch { expected, actual: compact.len() });
		}

		let limit = options.limit.unwrap_or(self.default_limit) as usize;
		let min_score = options.min_score.unwrap_or(self.default_min_score);
		let entries = self.store.list(owner_id, options.modules.as_deref()).await?;
		let mut hits = Vec::with_capacity(entries.len());

		for entry in entries {
			if entry.owner_id != owner_id {
				continue;
			}

			let score = vector::cosine_similarity(compact, &entry.compact_embedding)?;

			if score >= min_score {
				hits.push(RouteHit { entry, score });
			}
		}

		hits.sort_by(|a, b| {
			b.score
				.partial_cmp(&a.score)
				.unwrap_or(Ordering::Equal)
				.then_with(|| recency_order(a.entry.last_accessed, b.entry.last_accessed))
		});
		hits.truncate(limit);

		Ok(hits)
	}

	/// Fetches each hit from its module, preserving order.
	///
	/// Hits whose module is not registered or whose record no longer exists are reported in
	/// [`Resolution::dangling`] instead of failing the call.
	pub async fn resolve(
		&self,
		registry: &ModuleRegistry,
		owner_id: &str,
		hits: &[RouteHit],
	) -> Result<Resolution> {
		let fetched: Vec<Result<Option<MemoryRecord>>> =
			stream::iter(hits.iter().map(|hit| async move {
				match registry.get(&hit.entry.module_id) {
					Some(module) => module.get(owner_id, hit.entry.remote_memory_id).await,
					None => Ok(None),
				}
			}))
			.buffered(self.resolve_concurrency)
			.collect()
			.await;
		let mut resolution = Resolution::default();

		for (hit, record) in hits.iter().zip(fetched) {
			match record? {
				Some(record) => resolution.memories.push(ResolvedMemory {
					module_id: hit.entry.module_id.clone(),
					record,
					score: hit.score,
				}),
				None => {
					tracing::debug!(
						module_id = hit.entry.module_id.as_str(),
						remote_memory_id = %hit.entry.remote_memory_id,
						"Dropping dangling index entry."
					);

					resolution.dangling.push(DanglingRef {
						module_id: hit.entry.module_id.clone(),
						remote_memory_id: hit.entry.remote_memory_id,
					});
				},
			}
		}

		if !resolution.memories.is_empty() {
			let keys: Vec<(String, Uuid)> = resolution
				.memories
				.iter()
				.map(|memory| (memory.module_id.clone(), memory.record.id))
				.collect();

			if let Err(err) = self.store.touch(owner_id, &keys, OffsetDateTime::now_utc()).await {
				tracing::warn!(error = %err, "Failed to refresh index entry access times.");
			}
		}

		Ok(resolution)
	}
}

fn recency_order(a: Option<OffsetDateTime>, b: Option<OffsetDateTime>) -> Ordering {
	match (a, b) {
		(Some(a), Some(b)) => b.cmp(&a),
		(Some(_), None) => Ordering::Less,
		(None, Some(_)) => Ordering::Greater,
		(None, None) => Ordering::Equal,
	}
}
