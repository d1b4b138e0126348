use std::collections::BTreeSet;

use serde_json::{Map, Value};

use super::{labeled_fields, scalar_text};
use crate::module::{MetadataContext, ModuleProfile, metadata_str};

pub const DEFAULT_LANGUAGE: &str = "text";

/// Code snippets, runbooks, and other technical notes.
pub struct TechnicalProfile;
impl ModuleProfile for TechnicalProfile {
	fn kind(&self) -> &'static str {
		"technical"
	}

	fn default_type(&self) -> &'static str {
		"note"
	}

	fn enrich(&self, _content: &str, metadata: &mut Map<String, Value>, _ctx: &MetadataContext<'_>) {
		if metadata_str(metadata, "language").is_none() {
			metadata.insert("language".to_string(), Value::from(DEFAULT_LANGUAGE));
		}
		if let Some(tags) = metadata.get("tags").map(normalize_tags) {
			metadata.insert("tags".to_string(), Value::from(tags));
		}
	}

	/// Title, language, and tags on their own lines, followed by the description and the code.
	fn generate_content(&self, entity: &Value) -> String {
		let mut lines =
			labeled_fields(entity, &[("title", "Title"), ("language", "Language")]);

		if let Some(tags) = entity.get("tags").map(normalize_tags).filter(|tags| !tags.is_empty()) {
			lines.push(format!("Tags: {}", tags.join(", ")));
		}

		for key in ["description", "code"] {
			if let Some(text) = entity.get(key).and_then(scalar_text) {
				lines.push(text);
			}
		}

		lines.join("\n")
	}
}

/// Lower-cased, trimmed, de-duplicated, and sorted. Accepts an array or a comma-separated string.
pub fn normalize_tags(raw: &Value) -> Vec<String> {
	let tags: BTreeSet<String> = match raw {
		Value::Array(items) => items
			.iter()
			.filter_map(Value::as_str)
			.map(|tag| tag.trim().to_lowercase())
			.filter(|tag| !tag.is_empty())
			.collect(),
		Value::String(joined) => joined
			.split(',')
			.map(|tag| tag.trim().to_lowercase())
			.filter(|tag| !tag.is_empty())
			.collect(),
		_ => BTreeSet::new(),
	};

	tags.into_iter().collect()
}
