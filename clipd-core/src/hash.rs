//! Content digest used for change detection and history dedup
//!
//! A one-at-a-time 32-bit hash over the exact byte sequence. This is a
//! heuristic change detector, not a content-addressed store: collisions
//! are accepted, equal digests between successive probes are treated as
//! "unchanged".

/// Hash a byte buffer to a 32-bit digest
///
/// The digest of the empty sequence is 0. All arithmetic is wrapping.
pub fn hash_bytes(data: &[u8]) -> u32 {
    let mut h: u32 = 0;
    for &b in data {
        h = h.wrapping_add(u32::from(b));
        h = h.wrapping_add(h << 10);
        h ^= h >> 6;
    }
    h = h.wrapping_add(h << 3);
    h ^= h >> 11;
    h = h.wrapping_add(h << 15);
    h
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_zero() {
        assert_eq!(hash_bytes(b""), 0);
    }

    #[test]
    fn test_deterministic() {
        let data = b"the quick brown fox";
        assert_eq!(hash_bytes(data), hash_bytes(data));
    }

    #[test]
    fn test_single_byte_change_differs() {
        assert_ne!(hash_bytes(b"hello world"), hash_bytes(b"hello worle"));
        assert_ne!(hash_bytes(b"aello world"), hash_bytes(b"hello world"));
    }

    #[test]
    fn test_order_sensitive() {
        assert_ne!(hash_bytes(b"ab"), hash_bytes(b"ba"));
    }

    #[test]
    fn test_length_sensitive() {
        assert_ne!(hash_bytes(b"a"), hash_bytes(b"a\0"));
    }

    #[test]
    fn test_high_bytes() {
        // Bytes above 0x7f must contribute as unsigned values
        assert_ne!(hash_bytes(&[0xff, 0x00]), hash_bytes(&[0x00, 0xff]));
        assert_eq!(hash_bytes(&[0xff]), hash_bytes(&[0xff]));
    }
}
