//! Random document id generation, grounded on the host codebase's own
//! `random_id()` helper: a fixed-length string drawn from a 62-character
//! alphanumeric alphabet using the process RNG.

use rand::RngExt;

const ID_LENGTH: usize = 16;
const ALPHABET: [u8; 62] = *b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Generates a 16-character alphanumeric id.
pub fn generate_id() -> String {
	let mut rng = rand::rng();
	(0..ID_LENGTH)
		.map(|_| {
			let idx = rng.random_range(0..ALPHABET.len());
			ALPHABET[idx] as char
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn generates_ids_of_the_spec_length() {
		let id = generate_id();
		assert_eq!(id.len(), ID_LENGTH);
		assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
	}

	#[test]
	fn generates_distinct_ids() {
		let a = generate_id();
		let b = generate_id();
		assert_ne!(a, b);
	}
}

// vim: ts=4
