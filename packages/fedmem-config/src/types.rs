use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	pub providers: Providers,
	#[serde(default)]
	pub embedding: Embedding,
	#[serde(default)]
	pub cache: Cache,
	#[serde(default)]
	pub index: Index,
	#[serde(default)]
	pub modules: Vec<ModuleConfig>,
}

#[derive(Debug, Deserialize)]
pub struct Service {
	pub log_level: String,
}

#[derive(Debug, Deserialize)]
pub struct Storage {
	/// Optional. Without it every store runs in process memory.
	pub postgres: Option<Postgres>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Postgres {
	pub dsn: String,
	pub pool_max_conns: u32,
}

#[derive(Debug, Deserialize)]
pub struct Providers {
	pub embedding: EmbeddingProviderConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	/// Optional. When absent or blank the deterministic hashed provider is used.
	pub api_key: Option<String>,
	pub path: String,
	pub model: String,
	pub dimensions: u32,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Embedding {
	pub compact_dimensions: u32,
	/// Upper bound on texts per provider request.
	pub batch_size: u32,
	/// Upper bound on provider requests in flight for one batch call.
	pub max_concurrency: u32,
}
impl Default for Embedding {
	fn default() -> Self {
		Self { compact_dimensions: 512, batch_size: 100, max_concurrency: 4 }
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Cache {
	pub enabled: bool,
	/// One of "postgres" or "memory".
	pub backend: String,
	pub ttl_seconds: i64,
	/// Upper bound on a single cache read or write. Slower operations count as misses.
	pub timeout_ms: u64,
}
impl Default for Cache {
	fn default() -> Self {
		Self { enabled: true, backend: "memory".to_string(), ttl_seconds: 86_400, timeout_ms: 500 }
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Index {
	pub default_limit: u32,
	pub default_min_score: f32,
	pub resolve_concurrency: u32,
}
impl Default for Index {
	fn default() -> Self {
		Self { default_limit: 10, default_min_score: 0.0, resolve_concurrency: 8 }
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModuleConfig {
	pub module_id: String,
	/// One of "people", "technical", or "generic".
	pub kind: String,
	#[serde(default = "default_indexed")]
	pub indexed: bool,
}

fn default_indexed() -> bool {
	true
}
