//! 32-bit text fingerprint used as the first half of render cache keys.

/// Deterministic 32-bit fingerprint of `text`: the leading four bytes of its
/// blake3 digest, little endian.
pub fn fingerprint(text: &str) -> u32 {
    let digest = blake3::hash(text.as_bytes());
    let bytes = digest.as_bytes();
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_across_calls() {
        assert_eq!(fingerprint("Hello"), fingerprint("Hello"));
        assert_eq!(fingerprint(""), fingerprint(""));
    }

    #[test]
    fn distinguishes_texts() {
        assert_ne!(fingerprint("Text 1"), fingerprint("Text 2"));
        assert_ne!(fingerprint("Hello"), fingerprint("hello"));
    }
}
