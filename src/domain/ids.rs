//! Opaque identifier generation.
//!
//! Entity ids are 21-character strings drawn from a URL-safe alphabet,
//! generated with [`rand`]'s OS-seeded RNG. Callers must not assume any
//! ordering or embedded metadata (no timestamp, no counter).

use rand::Rng;

const ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789_-";
const ID_LEN: usize = 21;

/// Generate a new opaque entity id.
pub fn generate() -> String {
    let mut rng = rand::rng();
    (0..ID_LEN)
        .map(|_| {
            let idx = rng.random_range(0..ALPHABET.len());
            ALPHABET[idx] as char
        })
        .collect()
}

/// Current time in integer milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_correct_length() {
        let id = generate();
        assert_eq!(id.chars().count(), ID_LEN);
    }

    #[test]
    fn generates_url_safe_alphabet() {
        let id = generate();
        assert!(id
            .bytes()
            .all(|b| ALPHABET.contains(&b)));
    }

    #[test]
    fn generates_distinct_ids() {
        let a = generate();
        let b = generate();
        assert_ne!(a, b);
    }
}
