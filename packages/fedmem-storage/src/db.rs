use sqlx::{PgPool, postgres::PgPoolOptions};

use crate::{Error, Result, schema};

const SCHEMA_LOCK_ID: i64 = 5_141_203;

pub struct Db {
	pub pool: PgPool,
}
impl Db {
	pub async fn connect(cfg: &fedmem_config::Postgres) -> Result<Self> {
		let pool =
			PgPoolOptions::new().max_connections(cfg.pool_max_conns).connect(&cfg.dsn).await?;

		Ok(Self { pool })
	}

	/// Creates the shared tables and one table per module. Safe to run concurrently and
	/// repeatedly.
	pub async fn ensure_schema(
		&self,
		vector_dim: u32,
		compact_dim: u32,
		module_ids: &[&str],
	) -> Result<()> {
		let mut sql = schema::render_schema(compact_dim);

		for module_id in module_ids {
			if !fedmem_config::is_valid_module_id(module_id) {
				return Err(Error::InvalidArgument(format!("Invalid module id {module_id:?}.")));
			}

			sql.push_str(&schema::render_module_table(module_id, vector_dim));
		}

		// The xact lock is released on commit or rollback.
		let mut tx = self.pool.begin().await?;

		sqlx::query("SELECT pg_advisory_xact_lock($1)").bind(SCHEMA_LOCK_ID).execute(&mut *tx).await?;

		for statement in schema::statements(&sql) {
			sqlx::query(statement).execute(&mut *tx).await?;
		}

		tx.commit().await?;

		tracing::debug!(modules = module_ids.len(), "Schema ensured.");

		Ok(())
	}

	pub async fn close(&self) {
		self.pool.close().await;
	}
}
