use serde_json::{Map, Value};
use time::{Date, OffsetDateTime, macros::format_description};

use super::{labeled_fields, scalar_text};
use crate::module::{IndexSummary, MetadataContext, ModuleProfile, default_summary, metadata_str};

pub const DEFAULT_STATUS: &str = "visitor";

/// Congregation members, visitors, and other contacts.
pub struct PeopleProfile;
impl ModuleProfile for PeopleProfile {
	fn kind(&self) -> &'static str {
		"people"
	}

	fn default_type(&self) -> &'static str {
		"person"
	}

	fn enrich(&self, _content: &str, metadata: &mut Map<String, Value>, ctx: &MetadataContext<'_>) {
		if let Some(full_name) = full_name(metadata) {
			metadata.insert("fullName".to_string(), Value::from(full_name));
		}
		if let Some(age) = metadata_str(metadata, "birthDate").and_then(|raw| age_at(raw, ctx.now)) {
			metadata.insert("age".to_string(), Value::from(age));
		}
		if metadata_str(metadata, "status").is_none() {
			metadata.insert("status".to_string(), Value::from(DEFAULT_STATUS));
		}
	}

	/// `Person: <name>, Status: <status>, ...` with absent fields skipped.
	fn generate_content(&self, entity: &Value) -> String {
		let mut parts = Vec::new();
		let name = [entity.get("firstName"), entity.get("lastName")]
			.into_iter()
			.flatten()
			.filter_map(scalar_text)
			.collect::<Vec<_>>()
			.join(" ");

		if !name.is_empty() {
			parts.push(format!("Person: {name}"));
		}

		parts.extend(labeled_fields(
			entity,
			&[
				("status", "Status"),
				("email", "Email"),
				("phone", "Phone"),
				("ministry", "Ministry"),
				("notes", "Notes"),
			],
		));

		parts.join(", ")
	}

	fn summarize(&self, content: &str, metadata: &Map<String, Value>) -> IndexSummary {
		let mut summary = default_summary(content, metadata);

		if let Some(name) = metadata_str(metadata, "fullName") {
			summary.title = fedmem_domain::text::truncate_chars(name, crate::module::TITLE_MAX_CHARS);
		}

		summary
	}
}

fn full_name(metadata: &Map<String, Value>) -> Option<String> {
	let parts: Vec<&str> = ["firstName", "lastName"]
		.into_iter()
		.filter_map(|key| metadata_str(metadata, key))
		.collect();

	if parts.is_empty() { None } else { Some(parts.join(" ")) }
}

/// Whole years between `birth_date` (`YYYY-MM-DD`) and `now`. Future or unparseable dates yield
/// `None`.
pub fn age_at(birth_date: &str, now: OffsetDateTime) -> Option<i64> {
	let birth = Date::parse(birth_date, format_description!("[year]-[month]-[day]")).ok()?;
	let today = now.date();
	let mut age = i64::from(today.year() - birth.year());

	if (today.month() as u8, today.day()) < (birth.month() as u8, birth.day()) {
		age -= 1;
	}

	(age >= 0).then_some(age)
}
