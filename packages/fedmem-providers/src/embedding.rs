use std::time::Duration;

use reqwest::{Client, header::HeaderMap};
use serde_json::Value;

use crate::{Error, Result};
use fedmem_config::EmbeddingProviderConfig;

/// OpenAI-compatible embedding client. Built once and shared across requests.
pub struct EmbeddingClient {
	client: Client,
	url: String,
	model: String,
	dimensions: u32,
	headers: HeaderMap,
}
impl EmbeddingClient {
	pub fn new(cfg: &EmbeddingProviderConfig) -> Result<Self> {
		let Some(api_key) = cfg.api_key.as_deref() else {
			return Err(Error::InvalidConfig {
				message: "Embedding provider api_key is required for the HTTP client.".to_string(),
			});
		};
		let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
		let headers = crate::auth_headers(api_key, &cfg.default_headers)?;

		Ok(Self {
			client,
			url: format!("{}{}", cfg.api_base.trim_end_matches('/'), cfg.path),
			model: cfg.model.clone(),
			dimensions: cfg.dimensions,
			headers,
		})
	}

	pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
		if texts.is_empty() {
			return Ok(Vec::new());
		}

		let body = serde_json::json!({
			"model": self.model,
			"input": texts,
			"dimensions": self.dimensions,
		});
		let res = self.client.post(&self.url).headers(self.headers.clone()).json(&body).send().await?;
		let json: Value = res.error_for_status()?.json().await?;
		let vectors = parse_embedding_response(json)?;

		check_shape(&vectors, texts.len(), self.dimensions as usize)?;

		Ok(vectors)
	}
}

pub fn parse_embedding_response(json: Value) -> Result<Vec<Vec<f32>>> {
	let data = json.get("data").and_then(|v| v.as_array()).ok_or_else(|| {
		Error::InvalidResponse { message: "Embedding response is missing data array.".to_string() }
	})?;
	let mut indexed: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());

	for (fallback_index, item) in data.iter().enumerate() {
		let index = item
			.get("index")
			.and_then(|v| v.as_u64())
			.map(|v| v as usize)
			.unwrap_or(fallback_index);
		let embedding = item.get("embedding").and_then(|v| v.as_array()).ok_or_else(|| {
			Error::InvalidResponse {
				message: "Embedding item missing embedding array.".to_string(),
			}
		})?;
		let mut vec = Vec::with_capacity(embedding.len());

		for value in embedding {
			let number = value.as_f64().ok_or_else(|| Error::InvalidResponse {
				message: "Embedding value must be numeric.".to_string(),
			})?;

			vec.push(number as f32);
		}

		indexed.push((index, vec));
	}

	indexed.sort_by_key(|(index, _)| *index);

	// Each input position must be answered exactly once.
	if let Some((position, (index, _))) =
		indexed.iter().enumerate().find(|(position, (index, _))| index != position)
	{
		return Err(Error::InvalidResponse {
			message: format!(
				"Embedding response index {index} does not match position {position} of {}.",
				indexed.len()
			),
		});
	}

	Ok(indexed.into_iter().map(|(_, vec)| vec).collect())
}

/// Rejects responses whose vector count or width does not match the request.
pub fn check_shape(vectors: &[Vec<f32>], expected_count: usize, dimensions: usize) -> Result<()> {
	if vectors.len() != expected_count {
		return Err(Error::InvalidResponse {
			message: format!(
				"Embedding provider returned {} vectors for {expected_count} inputs.",
				vectors.len()
			),
		});
	}

	if let Some(bad) = vectors.iter().find(|vec| vec.len() != dimensions) {
		return Err(Error::InvalidResponse {
			message: format!(
				"Embedding vector has {} dimensions, expected {dimensions}.",
				bad.len()
			),
		});
	}

	Ok(())
}
