//! Shared randomness source for `random`/`hash` variables (`§4.5`, `§5`).
//!
//! The source is process-global and shared across all requests and
//! threads, matching the original implementation's single generator: two
//! `random`/`hash` resolutions within the same request draw from the same
//! stream and are not reseeded per request (see the `§9` open question).

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};
use std::sync::{Mutex, OnceLock};

const RANDOM_UPPER_BOUND: u64 = 10_000_000_000; // 10^10

fn shared_rng() -> &'static Mutex<StdRng> {
    static RNG: OnceLock<Mutex<StdRng>> = OnceLock::new();
    RNG.get_or_init(|| Mutex::new(StdRng::from_entropy()))
}

/// A uniform integer in `[0, 10^10)`, rendered in base 10 (`§4.5 random`).
pub fn random_digits() -> u64 {
    let mut rng = shared_rng().lock().unwrap();
    rng.gen_range(0..RANDOM_UPPER_BOUND)
}

/// The lowercase hex SHA-256 of a freshly generated integer in the same
/// range as [`random_digits`] (`§4.5 hash`). Uses its own draw from the
/// shared generator -- it is not required to match any `random` variable
/// resolved in the same request.
pub fn random_hash() -> String {
    let value = random_digits();
    let digest = Sha256::digest(value.to_string().as_bytes());
    format!("{:x}", digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_digits_is_in_range() {
        for _ in 0..100 {
            assert!(random_digits() < RANDOM_UPPER_BOUND);
        }
    }

    #[test]
    fn random_hash_is_64_lowercase_hex_chars() {
        let hash = random_hash();
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash, hash.to_lowercase());
    }
}
