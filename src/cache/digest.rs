//! Key Digest Module
//!
//! Maps logical cache keys to the fixed-length identifiers used by the
//! persistent tier, and handles the size-variant key tag.

use std::fmt;

use sha2::{Digest as _, Sha256};

/// Leading marker of a size-variant tag, `#W<width>#H<height>`.
pub const SIZE_VARIANT_MARKER: &str = "#W";

/// Length of a digest in hex characters.
pub const DIGEST_LEN: usize = 64;

// == Digest ==
/// Lowercase hex SHA-256 of a logical cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest(String);

impl Digest {
    /// Computes the digest of a logical key.
    ///
    /// The key is used byte-exact. Size-variant tags must be stripped first,
    /// see [`normalize_key`].
    pub fn of(key: &str) -> Self {
        Self(hex::encode(Sha256::digest(key.as_bytes())))
    }

    /// Parses a digest previously produced by [`Digest::of`], e.g. a file name.
    pub fn parse(s: &str) -> Option<Self> {
        let valid = s.len() == DIGEST_LEN
            && s.bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Digest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// == Size Variant Keys ==
/// Strips a leading `#W<digits>#H<digits>` tag from `key`.
///
/// Differently sized requests for one resource share a single cache slot.
/// Keys without a well-formed tag are returned unchanged.
pub fn normalize_key(key: &str) -> &str {
    match split_size_variant(key) {
        Some((_, _, rest)) => rest,
        None => key,
    }
}

/// Builds a size-variant key for `key`.
pub fn size_variant_key(width: u32, height: u32, key: &str) -> String {
    format!("{SIZE_VARIANT_MARKER}{width}#H{height}{key}")
}

/// Splits a tagged key into `(width, height, logical key)`.
pub fn split_size_variant(key: &str) -> Option<(u32, u32, &str)> {
    let rest = key.strip_prefix(SIZE_VARIANT_MARKER)?;
    let (width, rest) = take_digits(rest)?;
    let rest = rest.strip_prefix("#H")?;
    let (height, rest) = take_digits(rest)?;
    Some((width, height, rest))
}

fn take_digits(s: &str) -> Option<(u32, &str)> {
    let end = s.bytes().take_while(u8::is_ascii_digit).count();
    if end == 0 {
        return None;
    }
    let value = s[..end].parse().ok()?;
    Some((value, &s[end..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_deterministic_and_fixed_length() {
        let a = Digest::of("https://example.com/items?page=1");
        let b = Digest::of("https://example.com/items?page=1");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), DIGEST_LEN);
        assert_ne!(a, Digest::of("https://example.com/items?page=2"));
    }

    #[test]
    fn test_digest_known_value() {
        assert_eq!(
            Digest::of("").as_str(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_digest_parse() {
        let digest = Digest::of("key");
        assert_eq!(Digest::parse(digest.as_str()), Some(digest));
        assert_eq!(Digest::parse("not-a-digest"), None);
        assert_eq!(Digest::parse(&"A".repeat(DIGEST_LEN)), None);
    }

    #[test]
    fn test_normalize_strips_size_variant() {
        assert_eq!(normalize_key("#W0#H0http://img/1.png"), "http://img/1.png");
        assert_eq!(normalize_key("#W320#H200http://img/1.png"), "http://img/1.png");
        assert_eq!(normalize_key("http://img/1.png"), "http://img/1.png");
    }

    #[test]
    fn test_normalize_keeps_malformed_tag() {
        assert_eq!(normalize_key("#Wx#H0key"), "#Wx#H0key");
        assert_eq!(normalize_key("#W10key"), "#W10key");
        assert_eq!(normalize_key("#W10#Hkey"), "#W10#Hkey");
    }

    #[test]
    fn test_size_variant_roundtrip() {
        let key = size_variant_key(64, 48, "http://img/a.jpg");
        assert_eq!(key, "#W64#H48http://img/a.jpg");
        assert_eq!(split_size_variant(&key), Some((64, 48, "http://img/a.jpg")));
    }
}
