use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use fedmem_config::Config;
use fedmem_service::{Backends, FederatedMemory};
use fedmem_storage::db::Db;

#[derive(Debug, Parser)]
#[command(
	version = fedmem_cli::VERSION,
	rename_all = "kebab",
	styles = fedmem_cli::styles(),
)]
pub struct Args {
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: PathBuf,
	#[command(subcommand)]
	pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
	/// Create the shared tables and one table per configured module.
	InitSchema,
	/// Re-index records missing from the central index and prune orphaned entries.
	Reconcile {
		/// Only reconcile this owner's records.
		#[arg(long, value_name = "OWNER_ID")]
		owner: Option<String>,
	},
	/// Drop cached embeddings of the configured provider.
	ClearCache {
		/// Drop cached embeddings of every provider.
		#[arg(long)]
		all: bool,
	},
	/// Delete expired cache rows.
	PurgeCache,
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let config = fedmem_config::load(&args.config)?;

	init_tracing(&config);

	match args.command {
		Command::InitSchema => init_schema(&config).await,
		Command::Reconcile { owner } => {
			let memory = open(&config).await?;
			let report = memory.reconcile(owner.as_deref()).await;

			println!("{}", serde_json::to_string_pretty(&report)?);

			memory.shutdown().await;

			Ok(())
		},
		Command::ClearCache { all } => {
			let memory = open(&config).await?;
			let removed = memory.clear_cache(all).await?;

			tracing::info!(removed, all, "Embedding cache cleared.");
			memory.shutdown().await;

			Ok(())
		},
		Command::PurgeCache => {
			let memory = open(&config).await?;
			let removed = memory.purge_cache().await?;

			tracing::info!(removed, "Expired cache entries purged.");
			memory.shutdown().await;

			Ok(())
		},
	}
}

async fn init_schema(config: &Config) -> color_eyre::Result<()> {
	let Some(postgres) = config.storage.postgres.as_ref() else {
		return Err(color_eyre::eyre::eyre!("init-schema requires [storage.postgres]."));
	};
	let db = Db::connect(postgres).await?;
	let module_ids: Vec<&str> =
		config.modules.iter().map(|module| module.module_id.as_str()).collect();

	db.ensure_schema(
		config.providers.embedding.dimensions,
		config.embedding.compact_dimensions,
		&module_ids,
	)
	.await?;

	tracing::info!(modules = module_ids.len(), "Schema ready.");

	db.close().await;

	Ok(())
}

async fn open(config: &Config) -> color_eyre::Result<FederatedMemory> {
	let backends = match config.storage.postgres.as_ref() {
		Some(postgres) => Backends::postgres(Db::connect(postgres).await?),
		None => {
			tracing::warn!(
				"No [storage.postgres] configured. Maintenance runs against empty in-memory stores."
			);

			Backends::in_memory()
		},
	};

	Ok(FederatedMemory::init(config, backends).await?)
}

fn init_tracing(config: &Config) {
	let filter =
		EnvFilter::try_new(&config.service.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

	tracing_subscriber::fmt().with_env_filter(filter).init();
}
