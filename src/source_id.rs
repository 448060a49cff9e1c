//! Source identity: a user-chosen name plus a random per-process hash

use crate::protocol::N_SOURCE_HASH;
use rand::Rng;

const HASH_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Identifies one broker process on the network for its lifetime.
///
/// The name is user-supplied and deliberately not unique; the hash is drawn
/// from a non-deterministic source at startup so two processes sharing a
/// name can still tell each other apart (and detect the clash).
#[derive(Debug, Clone)]
pub struct SourceId {
    name: String,
    hash: String,
}

impl SourceId {
    /// Create an identity with a fresh random hash.
    pub fn new(name: &str) -> Self {
        let mut rng = rand::rng();
        let hash = (0..N_SOURCE_HASH)
            .map(|_| HASH_ALPHABET[rng.random_range(0..HASH_ALPHABET.len())] as char)
            .collect();
        Self {
            name: name.to_string(),
            hash,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_alphanumeric_and_fixed_length() {
        let id = SourceId::new("EV3");
        assert_eq!(id.hash().len(), N_SOURCE_HASH);
        assert!(id.hash().bytes().all(|b| b.is_ascii_alphanumeric()));
        assert_eq!(id.name(), "EV3");
    }

    #[test]
    fn two_identities_differ() {
        // 62^8 possible hashes; a collision here means the generator is broken
        let a = SourceId::new("EV3");
        let b = SourceId::new("EV3");
        assert_ne!(a.hash(), b.hash());
    }
}
