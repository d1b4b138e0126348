use serde_json::{Map, Value};

use super::scalar_text;
use crate::module::{MetadataContext, ModuleProfile};

/// Free-form memories with no derived fields.
pub struct GenericProfile;
impl ModuleProfile for GenericProfile {
	fn kind(&self) -> &'static str {
		"generic"
	}

	fn default_type(&self) -> &'static str {
		"memory"
	}

	fn enrich(&self, _content: &str, _metadata: &mut Map<String, Value>, _ctx: &MetadataContext<'_>) {}

	/// A string entity as is; otherwise `key: value` for every scalar field in key order.
	fn generate_content(&self, entity: &Value) -> String {
		match entity {
			Value::Object(fields) => {
				let mut keys: Vec<&String> = fields.keys().collect();

				keys.sort();

				keys.into_iter()
					.filter_map(|key| scalar_text(&fields[key]).map(|value| format!("{key}: {value}")))
					.collect::<Vec<_>>()
					.join(", ")
			},
			other => scalar_text(other).unwrap_or_default(),
		}
	}
}
