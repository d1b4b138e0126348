use sqlx::PgPool;
use time::{Duration, OffsetDateTime};

use crate::{BoxFuture, CacheBackend, Result};

/// Cache rows in `embedding_cache`. Expired rows read as misses until purged.
pub struct PgCache {
	pool: PgPool,
}
impl PgCache {
	pub fn new(pool: PgPool) -> Self {
		Self { pool }
	}

	async fn get_payload(&self, key: &str) -> Result<Option<String>> {
		let now = OffsetDateTime::now_utc();
		let payload: Option<String> = sqlx::query_scalar(
			"\
UPDATE embedding_cache
SET last_accessed_at = $1, hit_count = hit_count + 1
WHERE cache_key = $2 AND expires_at > $1
RETURNING payload",
		)
		.bind(now)
		.bind(key)
		.fetch_optional(&self.pool)
		.await?;

		Ok(payload)
	}

	async fn store_payload(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
		let now = OffsetDateTime::now_utc();

		sqlx::query(
			"\
INSERT INTO embedding_cache (cache_key, payload, created_at, last_accessed_at, expires_at, hit_count)
VALUES ($1, $2, $3, $3, $4, 0)
ON CONFLICT (cache_key) DO UPDATE
SET
	payload = EXCLUDED.payload,
	last_accessed_at = EXCLUDED.last_accessed_at,
	expires_at = EXCLUDED.expires_at,
	hit_count = 0",
		)
		.bind(key)
		.bind(value)
		.bind(now)
		.bind(now + ttl)
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	async fn delete_by_prefix(&self, prefix: &str) -> Result<u64> {
		let result = sqlx::query("DELETE FROM embedding_cache WHERE starts_with(cache_key, $1)")
			.bind(prefix)
			.execute(&self.pool)
			.await?;

		Ok(result.rows_affected())
	}

	async fn purge(&self) -> Result<u64> {
		let result = sqlx::query("DELETE FROM embedding_cache WHERE expires_at <= $1")
			.bind(OffsetDateTime::now_utc())
			.execute(&self.pool)
			.await?;

		Ok(result.rows_affected())
	}
}

impl CacheBackend for PgCache {
	fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>> {
		Box::pin(self.get_payload(key))
	}

	fn set<'a>(&'a self, key: &'a str, value: String, ttl: Duration) -> BoxFuture<'a, Result<()>> {
		Box::pin(self.store_payload(key, value, ttl))
	}

	fn delete_prefix<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, Result<u64>> {
		Box::pin(self.delete_by_prefix(prefix))
	}

	fn purge_expired(&self) -> BoxFuture<'_, Result<u64>> {
		Box::pin(self.purge())
	}
}
