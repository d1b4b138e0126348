mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Cache, Config, Embedding, EmbeddingProviderConfig, Index, ModuleConfig, Postgres, Providers,
	Service, Storage,
};

use std::{collections::HashSet, fs, path::Path};

pub const MODULE_KINDS: [&str; 3] = ["people", "technical", "generic"];
pub const CACHE_BACKENDS: [&str; 2] = ["postgres", "memory"];

const MAX_BATCH_SIZE: u32 = 2_048;
const MAX_MODULE_ID_CHARS: usize = 48;

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;

	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	let embedding = &cfg.providers.embedding;

	for (label, value) in [
		("providers.embedding.provider_id", &embedding.provider_id),
		("providers.embedding.model", &embedding.model),
	] {
		if value.trim().is_empty() {
			return Err(Error::Validation { message: format!("{label} must be non-empty.") });
		}
	}
	if embedding.provider_id.contains(':') {
		return Err(Error::Validation {
			message: "providers.embedding.provider_id must not contain ':'.".to_string(),
		});
	}
	if embedding.dimensions == 0 {
		return Err(Error::Validation {
			message: "providers.embedding.dimensions must be greater than zero.".to_string(),
		});
	}
	if embedding.timeout_ms == 0 {
		return Err(Error::Validation {
			message: "providers.embedding.timeout_ms must be greater than zero.".to_string(),
		});
	}
	if embedding.default_headers.values().any(|value| !value.is_string()) {
		return Err(Error::Validation {
			message: "providers.embedding.default_headers values must be strings.".to_string(),
		});
	}
	if cfg.embedding.compact_dimensions == 0 {
		return Err(Error::Validation {
			message: "embedding.compact_dimensions must be greater than zero.".to_string(),
		});
	}
	if cfg.embedding.compact_dimensions > embedding.dimensions {
		return Err(Error::Validation {
			message:
				"embedding.compact_dimensions must not exceed providers.embedding.dimensions."
					.to_string(),
		});
	}
	if cfg.embedding.batch_size == 0 || cfg.embedding.batch_size > MAX_BATCH_SIZE {
		return Err(Error::Validation {
			message: format!("embedding.batch_size must be in the range 1-{MAX_BATCH_SIZE}."),
		});
	}
	if cfg.embedding.max_concurrency == 0 {
		return Err(Error::Validation {
			message: "embedding.max_concurrency must be greater than zero.".to_string(),
		});
	}
	if !CACHE_BACKENDS.contains(&cfg.cache.backend.as_str()) {
		return Err(Error::Validation {
			message: "cache.backend must be one of postgres or memory.".to_string(),
		});
	}
	if cfg.cache.ttl_seconds <= 0 {
		return Err(Error::Validation {
			message: "cache.ttl_seconds must be greater than zero.".to_string(),
		});
	}
	if cfg.cache.timeout_ms == 0 {
		return Err(Error::Validation {
			message: "cache.timeout_ms must be greater than zero.".to_string(),
		});
	}
	if cfg.cache.enabled && cfg.cache.backend == "postgres" && cfg.storage.postgres.is_none() {
		return Err(Error::Validation {
			message: "cache.backend = postgres requires [storage.postgres].".to_string(),
		});
	}
	if cfg.index.default_limit == 0 {
		return Err(Error::Validation {
			message: "index.default_limit must be greater than zero.".to_string(),
		});
	}
	if !cfg.index.default_min_score.is_finite() {
		return Err(Error::Validation {
			message: "index.default_min_score must be a finite number.".to_string(),
		});
	}
	if !(-1.0..=1.0).contains(&cfg.index.default_min_score) {
		return Err(Error::Validation {
			message: "index.default_min_score must be in the range -1.0-1.0.".to_string(),
		});
	}
	if cfg.index.resolve_concurrency == 0 {
		return Err(Error::Validation {
			message: "index.resolve_concurrency must be greater than zero.".to_string(),
		});
	}

	if let Some(postgres) = cfg.storage.postgres.as_ref() {
		if postgres.dsn.trim().is_empty() {
			return Err(Error::Validation {
				message: "storage.postgres.dsn must be non-empty.".to_string(),
			});
		}
		if postgres.pool_max_conns == 0 {
			return Err(Error::Validation {
				message: "storage.postgres.pool_max_conns must be greater than zero.".to_string(),
			});
		}
	}

	let mut seen = HashSet::new();

	for module in &cfg.modules {
		if !is_valid_module_id(&module.module_id) {
			return Err(Error::Validation {
				message: format!(
					"modules.module_id {:?} must be 1-{MAX_MODULE_ID_CHARS} chars of a-z, 0-9, or '_', starting with a letter.",
					module.module_id
				),
			});
		}
		if !MODULE_KINDS.contains(&module.kind.as_str()) {
			return Err(Error::Validation {
				message: format!(
					"modules.kind for {} must be one of people, technical, or generic.",
					module.module_id
				),
			});
		}
		if !seen.insert(module.module_id.as_str()) {
			return Err(Error::Validation {
				message: format!("modules.module_id {} is declared twice.", module.module_id),
			});
		}
	}

	Ok(())
}

/// Module ids are interpolated into table names, so they are restricted to a safe identifier set.
pub fn is_valid_module_id(module_id: &str) -> bool {
	let mut chars = module_id.chars();
	let Some(first) = chars.next() else {
		return false;
	};

	module_id.len() <= MAX_MODULE_ID_CHARS
		&& first.is_ascii_lowercase()
		&& chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

fn normalize(cfg: &mut Config) {
	if cfg
		.providers
		.embedding
		.api_key
		.as_deref()
		.map(|key| key.trim().is_empty())
		.unwrap_or(false)
	{
		cfg.providers.embedding.api_key = None;
	}

	cfg.cache.backend = cfg.cache.backend.trim().to_ascii_lowercase();

	for module in &mut cfg.modules {
		module.kind = module.kind.trim().to_ascii_lowercase();
	}
}
