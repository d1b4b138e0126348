use unicode_normalization::UnicodeNormalization;

pub const CONTENT_HASH_HEX_CHARS: usize = 16;

/// NFC, trimmed, with every whitespace run collapsed to a single space.
pub fn normalize_text(text: &str) -> String {
	let composed: String = text.nfc().collect();

	composed.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// First 16 hex chars of the blake3 digest of the normalized text.
///
/// Truncation to 64 bits makes collisions possible in principle. They are an accepted risk for a
/// cache key and are not detected.
pub fn content_hash(text: &str) -> String {
	let digest = blake3::hash(normalize_text(text).as_bytes()).to_hex();

	digest[..CONTENT_HASH_HEX_CHARS].to_string()
}

/// Truncates on a char boundary, appending an ellipsis when anything was cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
	let mut chars = text.char_indices();

	match chars.nth(max_chars) {
		None => text.to_string(),
		Some((cut, _)) => {
			let mut out = text[..cut].trim_end().to_string();

			out.push('…');

			out
		},
	}
}

pub fn first_line(text: &str) -> &str {
	text.lines().map(str::trim).find(|line| !line.is_empty()).unwrap_or("")
}
