//! Digests for deriving event type names

use sha2::{Digest, Sha256};
use std::fmt;

/// Length of the digest prefix used in event type names
pub const SHORT_LEN: usize = 16;

/// SHA256 checksum of a fieldset summary
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Checksum(String);

impl Checksum {
    /// Compute checksum from raw bytes
    pub fn from_bytes(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        Self(format!("{:x}", hash))
    }

    /// Compute checksum from a string
    pub fn of(content: &str) -> Self {
        Self::from_bytes(content.as_bytes())
    }

    /// Get the hex string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Leading hex characters, enough to tell summaries apart in names
    pub fn short(&self) -> &str {
        &self.0[..SHORT_LEN]
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_consistency() {
        let summary = "a:long,b:string";
        assert_eq!(Checksum::of(summary), Checksum::of(summary));
    }

    #[test]
    fn test_checksum_different_content() {
        assert_ne!(Checksum::of("a:long"), Checksum::of("a:double"));
    }

    #[test]
    fn test_short_prefix() {
        let checksum = Checksum::of("a:long");
        assert_eq!(checksum.short().len(), SHORT_LEN);
        assert!(checksum.as_str().starts_with(checksum.short()));
    }
}
