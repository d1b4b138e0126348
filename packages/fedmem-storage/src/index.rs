use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
	BoxFuture, IndexStore, Result,
	models::{IndexEntry, IndexEntryRow},
	vector,
};

const ENTRY_COLUMNS: &str = "\
owner_id,
	module_id,
	remote_memory_id,
	title,
	summary,
	compact_vec::text AS vec_text,
	last_accessed,
	created_at,
	updated_at";

pub struct PgIndexStore {
	pool: PgPool,
}
impl PgIndexStore {
	pub fn new(pool: PgPool) -> Self {
		Self { pool }
	}

	async fn upsert_entry(&self, entry: &IndexEntry) -> Result<()> {
		sqlx::query(
			"\
INSERT INTO memory_index_entries (
	owner_id,
	module_id,
	remote_memory_id,
	title,
	summary,
	compact_vec,
	last_accessed,
	created_at,
	updated_at
)
VALUES ($1, $2, $3, $4, $5, $6::text::vector, $7, $8, $9)
ON CONFLICT (owner_id, module_id, remote_memory_id) DO UPDATE
SET
	title = EXCLUDED.title,
	summary = EXCLUDED.summary,
	compact_vec = EXCLUDED.compact_vec,
	last_accessed = coalesce(EXCLUDED.last_accessed, memory_index_entries.last_accessed),
	updated_at = EXCLUDED.updated_at",
		)
		.bind(entry.owner_id.as_str())
		.bind(entry.module_id.as_str())
		.bind(entry.remote_memory_id)
		.bind(entry.title.as_str())
		.bind(entry.summary.as_str())
		.bind(vector::vector_to_pg(&entry.compact_embedding))
		.bind(entry.last_accessed)
		.bind(entry.created_at)
		.bind(entry.updated_at)
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	async fn remove_entry(
		&self,
		owner_id: &str,
		module_id: &str,
		remote_memory_id: Uuid,
	) -> Result<bool> {
		let result = sqlx::query(
			"\
DELETE FROM memory_index_entries
WHERE owner_id = $1 AND module_id = $2 AND remote_memory_id = $3",
		)
		.bind(owner_id)
		.bind(module_id)
		.bind(remote_memory_id)
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected() > 0)
	}

	async fn get_entry(
		&self,
		owner_id: &str,
		module_id: &str,
		remote_memory_id: Uuid,
	) -> Result<Option<IndexEntry>> {
		let sql = format!(
			"\
SELECT {ENTRY_COLUMNS}
FROM memory_index_entries
WHERE owner_id = $1 AND module_id = $2 AND remote_memory_id = $3"
		);
		let row: Option<IndexEntryRow> = sqlx::query_as(&sql)
			.bind(owner_id)
			.bind(module_id)
			.bind(remote_memory_id)
			.fetch_optional(&self.pool)
			.await?;

		row.map(IndexEntry::try_from).transpose()
	}

	async fn list_entries(
		&self,
		owner_id: &str,
		modules: Option<&[String]>,
	) -> Result<Vec<IndexEntry>> {
		let sql = format!(
			"\
SELECT {ENTRY_COLUMNS}
FROM memory_index_entries
WHERE owner_id = $1 AND ($2::text[] IS NULL OR module_id = ANY($2))
ORDER BY module_id ASC, remote_memory_id ASC"
		);
		let rows: Vec<IndexEntryRow> =
			sqlx::query_as(&sql).bind(owner_id).bind(modules).fetch_all(&self.pool).await?;

		rows.into_iter().map(IndexEntry::try_from).collect()
	}

	async fn list_module_entries(
		&self,
		module_id: &str,
		owner_id: Option<&str>,
	) -> Result<Vec<IndexEntry>> {
		let sql = format!(
			"\
SELECT {ENTRY_COLUMNS}
FROM memory_index_entries
WHERE module_id = $1 AND ($2::text IS NULL OR owner_id = $2)
ORDER BY owner_id ASC, remote_memory_id ASC"
		);
		let rows: Vec<IndexEntryRow> =
			sqlx::query_as(&sql).bind(module_id).bind(owner_id).fetch_all(&self.pool).await?;

		rows.into_iter().map(IndexEntry::try_from).collect()
	}

	async fn touch_entries(
		&self,
		owner_id: &str,
		keys: &[(String, Uuid)],
		at: OffsetDateTime,
	) -> Result<u64> {
		if keys.is_empty() {
			return Ok(0);
		}

		let module_ids: Vec<&str> = keys.iter().map(|(module_id, _)| module_id.as_str()).collect();
		let remote_ids: Vec<Uuid> = keys.iter().map(|(_, id)| *id).collect();
		let result = sqlx::query(
			"\
UPDATE memory_index_entries e
SET last_accessed = $1
FROM unnest($3::text[], $4::uuid[]) AS k(module_id, remote_memory_id)
WHERE e.owner_id = $2
	AND e.module_id = k.module_id
	AND e.remote_memory_id = k.remote_memory_id",
		)
		.bind(at)
		.bind(owner_id)
		.bind(module_ids.as_slice())
		.bind(remote_ids.as_slice())
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected())
	}
}

impl IndexStore for PgIndexStore {
	fn upsert<'a>(&'a self, entry: &'a IndexEntry) -> BoxFuture<'a, Result<()>> {
		Box::pin(self.upsert_entry(entry))
	}

	fn remove<'a>(
		&'a self,
		owner_id: &'a str,
		module_id: &'a str,
		remote_memory_id: Uuid,
	) -> BoxFuture<'a, Result<bool>> {
		Box::pin(self.remove_entry(owner_id, module_id, remote_memory_id))
	}

	fn get<'a>(
		&'a self,
		owner_id: &'a str,
		module_id: &'a str,
		remote_memory_id: Uuid,
	) -> BoxFuture<'a, Result<Option<IndexEntry>>> {
		Box::pin(self.get_entry(owner_id, module_id, remote_memory_id))
	}

	fn list<'a>(
		&'a self,
		owner_id: &'a str,
		modules: Option<&'a [String]>,
	) -> BoxFuture<'a, Result<Vec<IndexEntry>>> {
		Box::pin(self.list_entries(owner_id, modules))
	}

	fn list_module<'a>(
		&'a self,
		module_id: &'a str,
		owner_id: Option<&'a str>,
	) -> BoxFuture<'a, Result<Vec<IndexEntry>>> {
		Box::pin(self.list_module_entries(module_id, owner_id))
	}

	fn touch<'a>(
		&'a self,
		owner_id: &'a str,
		keys: &'a [(String, Uuid)],
		at: OffsetDateTime,
	) -> BoxFuture<'a, Result<u64>> {
		Box::pin(self.touch_entries(owner_id, keys, at))
	}
}
