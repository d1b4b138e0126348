pub mod generic;
pub mod people;
pub mod technical;

pub use generic::GenericProfile;
pub use people::PeopleProfile;
pub use technical::TechnicalProfile;

use std::sync::Arc;

use serde_json::Value;

use crate::{Error, ModuleProfile, Result};

pub fn for_kind(kind: &str) -> Result<Arc<dyn ModuleProfile>> {
	match kind {
		"people" => Ok(Arc::new(PeopleProfile)),
		"technical" => Ok(Arc::new(TechnicalProfile)),
		"generic" => Ok(Arc::new(GenericProfile)),
		other => Err(Error::InvalidRequest { message: format!("Unknown module kind {other:?}.") }),
	}
}

/// `label: value` for every present, non-blank scalar field, in the order given.
fn labeled_fields(entity: &Value, fields: &[(&str, &str)]) -> Vec<String> {
	fields
		.iter()
		.filter_map(|(key, label)| scalar_text(entity.get(*key)?).map(|value| format!("{label}: {value}")))
		.collect()
}

fn scalar_text(value: &Value) -> Option<String> {
	let text = match value {
		Value::String(text) => text.trim().to_string(),
		Value::Number(number) => number.to_string(),
		Value::Bool(flag) => flag.to_string(),
		_ => return None,
	};

	if text.is_empty() { None } else { Some(text) }
}
