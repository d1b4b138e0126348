//! Offline pseudo-embeddings.
//!
//! Each lower-cased word is expanded through the blake3 extendable output into a fixed-width
//! vector; the word vectors are summed and L2-normalized. The result is a pure function of the
//! input text, and texts sharing words land closer together than unrelated texts.

const DOMAIN_TAG: &[u8] = b"fedmem.hashed-embedding.v1";

pub fn embed(text: &str, dimensions: usize) -> Vec<f32> {
	let mut out = vec![0.0_f32; dimensions];

	if dimensions == 0 {
		return out;
	}

	let mut words = 0_usize;

	for word in text.split(|c: char| !c.is_alphanumeric()).filter(|word| !word.is_empty()) {
		accumulate(&mut out, word.to_lowercase().as_bytes());

		words += 1;
	}

	if words == 0 {
		accumulate(&mut out, text.as_bytes());
	}

	let norm = out.iter().map(|value| value * value).sum::<f32>().sqrt();

	if norm > 0.0 {
		for value in &mut out {
			*value /= norm;
		}
	}

	out
}

pub fn embed_all(texts: &[String], dimensions: usize) -> Vec<Vec<f32>> {
	texts.iter().map(|text| embed(text, dimensions)).collect()
}

fn accumulate(out: &mut [f32], token: &[u8]) {
	let mut hasher = blake3::Hasher::new();

	hasher.update(DOMAIN_TAG);
	hasher.update(token);

	let mut reader = hasher.finalize_xof();
	let mut bytes = vec![0_u8; out.len() * 2];

	reader.fill(&mut bytes);

	for (slot, pair) in out.iter_mut().zip(bytes.chunks_exact(2)) {
		let raw = u16::from_le_bytes([pair[0], pair[1]]);

		*slot += (raw as f32 / u16::MAX as f32) * 2.0 - 1.0;
	}
}
