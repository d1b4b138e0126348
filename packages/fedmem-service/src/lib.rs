pub mod embedding;
pub mod index;
pub mod module;
pub mod profiles;
pub mod reconcile;
pub mod registry;

mod error;

pub use embedding::{EmbeddingService, EmbeddingSettings, cache::EmbeddingCache};
pub use error::{Error, Result};
pub use index::{
	CentralIndex, DanglingRef, IndexPayload, Resolution, ResolvedMemory, RouteHit, RouteOptions,
};
pub use module::{
	CategoryCount, IndexSummary, MetadataContext, Module, ModuleProfile, ModuleStats, RecordPatch,
	SearchOptions,
};
pub use reconcile::ReconcileReport;
pub use registry::ModuleRegistry;

use std::{future::Future, pin::Pin, sync::Arc, time::Duration as StdDuration};

use time::Duration;

use fedmem_config::{Config, EmbeddingProviderConfig};
use fedmem_providers::{embedding::EmbeddingClient, hashed};
use fedmem_storage::{
	CacheBackend, IndexStore, RecordStore,
	cache::PgCache,
	db::Db,
	index::PgIndexStore,
	memory::{MemoryCache, MemoryIndexStore, MemoryRecordStore},
	records::PgRecordStore,
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub const HASHED_PROVIDER_ID: &str = "hashed";

pub trait EmbeddingProvider
where
	Self: Send + Sync,
{
	/// Namespace for cache keys. Must not contain ':'.
	fn provider_id(&self) -> &str;

	fn embed<'a>(
		&'a self,
		texts: &'a [String],
	) -> BoxFuture<'a, fedmem_providers::Result<Vec<Vec<f32>>>>;
}

pub struct HttpEmbeddingProvider {
	provider_id: String,
	client: EmbeddingClient,
}
impl HttpEmbeddingProvider {
	pub fn new(cfg: &EmbeddingProviderConfig) -> fedmem_providers::Result<Self> {
		Ok(Self { provider_id: cfg.provider_id.clone(), client: EmbeddingClient::new(cfg)? })
	}
}

impl EmbeddingProvider for HttpEmbeddingProvider {
	fn provider_id(&self) -> &str {
		&self.provider_id
	}

	fn embed<'a>(
		&'a self,
		texts: &'a [String],
	) -> BoxFuture<'a, fedmem_providers::Result<Vec<Vec<f32>>>> {
		Box::pin(self.client.embed(texts))
	}
}

/// Offline provider used when no API key is configured.
pub struct HashedEmbeddingProvider {
	dimensions: usize,
}
impl HashedEmbeddingProvider {
	pub fn new(dimensions: usize) -> Self {
		Self { dimensions }
	}
}

impl EmbeddingProvider for HashedEmbeddingProvider {
	fn provider_id(&self) -> &str {
		HASHED_PROVIDER_ID
	}

	fn embed<'a>(
		&'a self,
		texts: &'a [String],
	) -> BoxFuture<'a, fedmem_providers::Result<Vec<Vec<f32>>>> {
		let vectors = hashed::embed_all(texts, self.dimensions);

		Box::pin(async move { Ok(vectors) })
	}
}

/// Picks the HTTP provider when an API key is configured and the hashed fallback otherwise.
pub fn provider_from_config(cfg: &EmbeddingProviderConfig) -> Result<Arc<dyn EmbeddingProvider>> {
	if cfg.api_key.as_deref().is_some_and(|key| !key.trim().is_empty()) {
		let provider = HttpEmbeddingProvider::new(cfg).map_err(|err| Error::InvalidRequest {
			message: format!("Embedding provider configuration is invalid: {err}"),
		})?;

		return Ok(Arc::new(provider));
	}

	tracing::warn!(
		provider_id = cfg.provider_id.as_str(),
		"No embedding API key configured. Using deterministic hashed embeddings."
	);

	Ok(Arc::new(HashedEmbeddingProvider::new(cfg.dimensions as usize)))
}

/// Storage implementations behind the module tables, the index, and the cache.
pub enum Backends {
	Postgres(Db),
	InMemory,
}
impl Backends {
	pub fn postgres(db: Db) -> Self {
		Self::Postgres(db)
	}

	pub fn in_memory() -> Self {
		Self::InMemory
	}

	fn record_store(&self, module_id: &str) -> Result<Arc<dyn RecordStore>> {
		match self {
			Self::Postgres(db) => Ok(Arc::new(PgRecordStore::new(db.pool.clone(), module_id)?)),
			Self::InMemory => Ok(Arc::new(MemoryRecordStore::new())),
		}
	}

	fn index_store(&self) -> Arc<dyn IndexStore> {
		match self {
			Self::Postgres(db) => Arc::new(PgIndexStore::new(db.pool.clone())),
			Self::InMemory => Arc::new(MemoryIndexStore::new()),
		}
	}

	fn cache_backend(&self, backend: &str) -> Result<Arc<dyn CacheBackend>> {
		match (backend, self) {
			("postgres", Self::Postgres(db)) => Ok(Arc::new(PgCache::new(db.pool.clone()))),
			("postgres", Self::InMemory) => Err(Error::InvalidRequest {
				message: "cache.backend = postgres requires the Postgres backends.".to_string(),
			}),
			_ => Ok(Arc::new(MemoryCache::new())),
		}
	}
}

/// The assembled embedding service, central index, and module registry.
pub struct FederatedMemory {
	pub embedding: Arc<EmbeddingService>,
	pub index: Arc<CentralIndex>,
	pub registry: ModuleRegistry,
	db: Option<Db>,
}
impl FederatedMemory {
	pub async fn init(cfg: &Config, backends: Backends) -> Result<Self> {
		let provider = provider_from_config(&cfg.providers.embedding)?;

		Self::with_provider(cfg, backends, provider).await
	}

	/// Like [`FederatedMemory::init`] with an explicit provider.
	pub async fn with_provider(
		cfg: &Config,
		backends: Backends,
		provider: Arc<dyn EmbeddingProvider>,
	) -> Result<Self> {
		if let Backends::Postgres(db) = &backends {
			let module_ids: Vec<&str> =
				cfg.modules.iter().map(|module| module.module_id.as_str()).collect();

			db.ensure_schema(
				cfg.providers.embedding.dimensions,
				cfg.embedding.compact_dimensions,
				&module_ids,
			)
			.await?;
		}

		let cache = if cfg.cache.enabled {
			let backend = backends.cache_backend(&cfg.cache.backend)?;

			Some(
				EmbeddingCache::new(backend, Duration::seconds(cfg.cache.ttl_seconds))
					.with_timeout(StdDuration::from_millis(cfg.cache.timeout_ms)),
			)
		} else {
			None
		};
		let embedding =
			Arc::new(EmbeddingService::new(provider, cache, EmbeddingSettings::from_config(cfg)));
		let index =
			Arc::new(CentralIndex::new(backends.index_store(), embedding.clone(), &cfg.index));
		let mut registry = ModuleRegistry::new();

		for module_cfg in &cfg.modules {
			let profile = profiles::for_kind(&module_cfg.kind)?;
			let store = backends.record_store(&module_cfg.module_id)?;
			let module = Module::new(
				module_cfg.module_id.clone(),
				profile,
				store,
				embedding.clone(),
				module_cfg.indexed.then(|| index.clone()),
			);

			registry.register(Arc::new(module))?;
		}

		tracing::info!(
			provider_id = embedding.provider_id(),
			modules = registry.len(),
			cache = cfg.cache.enabled,
			"Federated memory initialized."
		);

		let db = match backends {
			Backends::Postgres(db) => Some(db),
			Backends::InMemory => None,
		};

		Ok(Self { embedding, index, registry, db })
	}

	pub fn module(&self, module_id: &str) -> Result<&Arc<Module>> {
		self.registry.require(module_id)
	}

	/// Routes `query` through the central index and resolves the hits against their modules.
	pub async fn search(
		&self,
		owner_id: &str,
		query: &str,
		options: &RouteOptions,
	) -> Result<Resolution> {
		let hits = self.index.route(owner_id, query, options).await?;

		self.index.resolve(&self.registry, owner_id, &hits).await
	}

	pub async fn reconcile(&self, owner_id: Option<&str>) -> ReconcileReport {
		reconcile::reconcile(&self.registry, &self.index, owner_id).await
	}

	/// Clears the active provider's cache entries, or every embedding entry when `all` is set.
	pub async fn clear_cache(&self, all: bool) -> Result<u64> {
		match (self.embedding.cache(), all) {
			(Some(cache), true) => cache.clear_all().await,
			(Some(_), false) => self.embedding.clear_cache().await,
			(None, _) => Ok(0),
		}
	}

	pub async fn purge_cache(&self) -> Result<u64> {
		match self.embedding.cache() {
			Some(cache) => cache.purge_expired().await,
			None => Ok(0),
		}
	}

	pub async fn shutdown(self) {
		if let Some(db) = self.db {
			db.close().await;
		}
	}
}
