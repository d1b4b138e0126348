//! Heals drift between module tables and the central index.
//!
//! A store whose index upsert failed leaves a record without an entry; a delete whose index
//! removal failed leaves an entry without a record. One sweep repairs both without calling the
//! embedding provider: missing entries are rebuilt from the stored full embedding.

use std::collections::HashSet;

use serde::Serialize;
use uuid::Uuid;

use crate::{CentralIndex, IndexPayload, Module, ModuleRegistry, Result, module::IndexSummary};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
	pub scanned: u64,
	pub reindexed: u64,
	pub pruned: u64,
	/// Records without a stored embedding.
	pub skipped: u64,
	pub errors: u64,
}

pub async fn reconcile(
	registry: &ModuleRegistry,
	index: &CentralIndex,
	owner_id: Option<&str>,
) -> ReconcileReport {
	let mut report = ReconcileReport::default();

	for module in registry.iter().filter(|module| module.is_indexed()) {
		if let Err(err) = reconcile_module(module, index, owner_id, &mut report).await {
			tracing::warn!(
				error = %err,
				module_id = module.module_id(),
				"Reconciliation of module failed."
			);

			report.errors += 1;
		}
	}

	tracing::info!(
		scanned = report.scanned,
		reindexed = report.reindexed,
		pruned = report.pruned,
		skipped = report.skipped,
		errors = report.errors,
		"Reconciliation finished."
	);

	report
}

async fn reconcile_module(
	module: &Module,
	index: &CentralIndex,
	owner_id: Option<&str>,
	report: &mut ReconcileReport,
) -> Result<()> {
	let module_id = module.module_id();
	let records = module.list_records(owner_id).await?;
	let entries = index.module_entries(module_id, owner_id).await?;
	let indexed: HashSet<(&str, Uuid)> =
		entries.iter().map(|entry| (entry.owner_id.as_str(), entry.remote_memory_id)).collect();
	let live: HashSet<(&str, Uuid)> =
		records.iter().map(|record| (record.owner_id.as_str(), record.id)).collect();

	report.scanned += records.len() as u64;

	for record in &records {
		if indexed.contains(&(record.owner_id.as_str(), record.id)) {
			continue;
		}

		let Some(full) = record.embedding.as_deref() else {
			report.skipped += 1;

			continue;
		};
		let IndexSummary { title, summary } = module.summarize(record);
		let payload = IndexPayload {
			title,
			summary,
			compact_embedding: index.reduce(full),
		};

		match index.upsert_index(&record.owner_id, module_id, record.id, payload).await {
			Ok(()) => report.reindexed += 1,
			Err(err) => {
				tracing::warn!(error = %err, module_id, record_id = %record.id, "Reindex failed.");

				report.errors += 1;
			},
		}
	}

	for entry in &entries {
		if live.contains(&(entry.owner_id.as_str(), entry.remote_memory_id)) {
			continue;
		}

		match index.remove_index(&entry.owner_id, module_id, entry.remote_memory_id).await {
			Ok(_) => report.pruned += 1,
			Err(err) => {
				tracing::warn!(
					error = %err,
					module_id,
					remote_memory_id = %entry.remote_memory_id,
					"Prune failed."
				);

				report.errors += 1;
			},
		}
	}

	Ok(())
}
