pub fn render_schema(compact_dim: u32) -> String {
	let init = include_str!("../../../sql/init.sql");
	let expanded = expand_includes(init);

	expanded.replace("<COMPACT_DIM>", &compact_dim.to_string())
}

/// DDL for one module table. `module_id` must already satisfy
/// `fedmem_config::is_valid_module_id`.
pub fn render_module_table(module_id: &str, vector_dim: u32) -> String {
	include_str!("../../../sql/tables/module_records.sql")
		.replace("<TABLE>", &table_name(module_id))
		.replace("<VECTOR_DIM>", &vector_dim.to_string())
}

pub fn table_name(module_id: &str) -> String {
	format!("memory_{module_id}")
}

/// Splits rendered DDL into executable statements.
pub fn statements(sql: &str) -> impl Iterator<Item = &str> {
	sql.split(';').map(str::trim).filter(|statement| !statement.is_empty())
}

fn expand_includes(sql: &str) -> String {
	let mut out = String::new();

	for line in sql.lines() {
		let trimmed = line.trim();

		if let Some(path) = trimmed.strip_prefix("\\ir ") {
			match path.trim() {
				"00_extensions.sql" => out.push_str(include_str!("../../../sql/00_extensions.sql")),
				"tables/001_memory_index_entries.sql" => out
					.push_str(include_str!("../../../sql/tables/001_memory_index_entries.sql")),
				"tables/002_embedding_cache.sql" =>
					out.push_str(include_str!("../../../sql/tables/002_embedding_cache.sql")),
				_ => out.push_str(line),
			}
		} else {
			out.push_str(line);
		}

		out.push('\n');
	}

	out
}
