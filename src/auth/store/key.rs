//! Cache key derivation.

use sha2::{Digest, Sha256};

/// Identifies one logical credential: who issued it, to which client, for which scopes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub issuer_url: String,
    pub client_id: String,
    /// Extra scopes in configured order. Order is significant.
    pub extra_scopes: Vec<String>,
}

impl CacheKey {
    pub fn new(
        issuer_url: impl Into<String>,
        client_id: impl Into<String>,
        extra_scopes: Vec<String>,
    ) -> Self {
        Self {
            issuer_url: issuer_url.into(),
            client_id: client_id.into(),
            extra_scopes,
        }
    }

    /// Lowercase hex SHA-256 of the canonical encoding. Safe to use as a filename.
    pub fn filename(&self) -> String {
        hex::encode(Sha256::digest(self.canonical_bytes()))
    }

    /// Length-prefixed encoding: every string is written as a big-endian u64
    /// byte length followed by its UTF-8 bytes, and the scope list is preceded
    /// by its element count. No two distinct keys share an encoding.
    fn canonical_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(
            32 + self.issuer_url.len()
                + self.client_id.len()
                + self.extra_scopes.iter().map(|s| s.len() + 8).sum::<usize>(),
        );
        write_field(&mut buf, self.issuer_url.as_bytes());
        write_field(&mut buf, self.client_id.as_bytes());
        buf.extend_from_slice(&(self.extra_scopes.len() as u64).to_be_bytes());
        for scope in &self.extra_scopes {
            write_field(&mut buf, scope.as_bytes());
        }
        buf
    }
}

fn write_field(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u64).to_be_bytes());
    buf.extend_from_slice(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn key(issuer: &str, client: &str, scopes: &[&str]) -> CacheKey {
        CacheKey::new(
            issuer,
            client,
            scopes.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[test]
    fn test_filename_is_lowercase_hex_sha256() {
        let name = key("https://issuer.example.com", "ic", &[]).filename();
        assert_eq!(name.len(), 64);
        assert!(name.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn test_filename_is_stable() {
        // Pinned so a change to the encoding (which would orphan existing caches) is noticed.
        let k = key("https://issuer.example.com", "ic", &["email"]);
        assert_eq!(k.filename(), k.clone().filename());
        let expected = {
            let mut buf = Vec::new();
            buf.extend_from_slice(&26u64.to_be_bytes());
            buf.extend_from_slice(b"https://issuer.example.com");
            buf.extend_from_slice(&2u64.to_be_bytes());
            buf.extend_from_slice(b"ic");
            buf.extend_from_slice(&1u64.to_be_bytes());
            buf.extend_from_slice(&5u64.to_be_bytes());
            buf.extend_from_slice(b"email");
            hex::encode(Sha256::digest(&buf))
        };
        assert_eq!(k.filename(), expected);
    }

    #[test]
    fn test_scope_order_is_significant() {
        let ab = key("https://i", "c", &["a", "b"]);
        let ba = key("https://i", "c", &["b", "a"]);
        assert_ne!(ab.filename(), ba.filename());
    }

    #[test]
    fn test_field_boundaries_are_unambiguous() {
        let left = key("https://ia", "b", &[]);
        let right = key("https://i", "ab", &[]);
        assert_ne!(left.filename(), right.filename());

        let joined = key("https://i", "c", &["ab"]);
        let split = key("https://i", "c", &["a", "b"]);
        assert_ne!(joined.filename(), split.filename());
    }

    proptest! {
        #[test]
        fn prop_distinct_keys_have_distinct_filenames(
            a in (".{0,12}", ".{0,8}", proptest::collection::vec(".{0,6}", 0..4)),
            b in (".{0,12}", ".{0,8}", proptest::collection::vec(".{0,6}", 0..4)),
        ) {
            let ka = CacheKey::new(a.0, a.1, a.2);
            let kb = CacheKey::new(b.0, b.1, b.2);
            prop_assume!(ka != kb);
            prop_assert_ne!(ka.filename(), kb.filename());
        }

        #[test]
        fn prop_reversed_scopes_are_distinct(
            scopes in proptest::collection::vec("[a-z]{1,6}", 2..5),
        ) {
            let mut reversed = scopes.clone();
            reversed.reverse();
            prop_assume!(reversed != scopes);
            let forward = CacheKey::new("https://i", "c", scopes);
            let backward = CacheKey::new("https://i", "c", reversed);
            prop_assert_ne!(forward.filename(), backward.filename());
        }
    }
}
