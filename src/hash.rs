//! Deterministic content fingerprint used to dedup downloaded media by the
//! bytes actually on disk, not just by source URL.
//!
//! Fingerprint = MD5 of: 8-byte little-endian length || first 4096 bytes ||
//! middle 4096 bytes (only if len > 8192) || last 4096 bytes (only if
//! distinct from the middle window). Output is lowercase hex.

use md5::{Digest, Md5};

const WINDOW: usize = 4096;

pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update((bytes.len() as u64).to_le_bytes());

    if bytes.len() <= WINDOW {
        hasher.update(bytes);
    } else {
        let first = &bytes[..WINDOW];
        hasher.update(first);

        if bytes.len() > 2 * WINDOW {
            let mid_start = (bytes.len() - WINDOW) / 2;
            let middle = &bytes[mid_start..mid_start + WINDOW];
            hasher.update(middle);

            let last = &bytes[bytes.len() - WINDOW..];
            if last != middle {
                hasher.update(last);
            }
        } else {
            // len is in (WINDOW, 2*WINDOW]: there is no distinct middle
            // window to compare against, so fold the tail in directly
            // whenever it differs from the already-hashed head.
            let last = &bytes[bytes.len() - WINDOW..];
            if last != first {
                hasher.update(last);
            }
        }
    }

    let digest = hasher.finalize();
    hex_lower(&digest)
}

fn hex_lower(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_hashes_only_length_prefix() {
        let a = hash_bytes(&[]);
        let b = hash_bytes(&[]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn small_input_deterministic() {
        let data = vec![7u8; 100];
        assert_eq!(hash_bytes(&data), hash_bytes(&data));
    }

    #[test]
    fn single_bit_flip_changes_hash() {
        let mut data = vec![0u8; 20_000];
        for (i, b) in data.iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        let h1 = hash_bytes(&data);
        data[10_000] ^= 0x01;
        let h2 = hash_bytes(&data);
        assert_ne!(h1, h2);
    }

    #[test]
    fn large_input_is_deterministic_and_order_sensitive() {
        let mut data = vec![0u8; 50_000];
        for (i, b) in data.iter_mut().enumerate() {
            *b = (i % 200) as u8;
        }
        let h1 = hash_bytes(&data);
        let h2 = hash_bytes(&data);
        assert_eq!(h1, h2);

        let mut reordered = data.clone();
        reordered.swap(0, 49_999);
        assert_ne!(h1, hash_bytes(&reordered));
    }
}
