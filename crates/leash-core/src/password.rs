//! Password hashing
//!
//! Stored hashes have the form `scheme:digest`, where `scheme` is an
//! identifier (`[A-Za-z_][A-Za-z0-9_]*`) and `digest` is lowercase hex. The
//! scheme is looked up in a closed table; stored data never selects code
//! beyond that table.
//!
//! `h` is the scheme of state documents written by the PHP service:
//! `sha1(rot13(p) + p)` followed by the first 24 hex chars of `md5(p)`.

use std::fmt;
use std::str::FromStr;

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use thiserror::Error;

use crate::token::constant_time_eq;

/// Supported password digest algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashScheme {
    Sha1,
    #[default]
    Sha256,
    Sha512,
    /// Unsalted scheme of older installations, kept so their users can log in
    #[serde(rename = "h")]
    Legacy,
}

impl HashScheme {
    /// Name written in front of the digest
    pub fn name(&self) -> &'static str {
        match self {
            HashScheme::Sha1 => "sha1",
            HashScheme::Sha256 => "sha256",
            HashScheme::Sha512 => "sha512",
            HashScheme::Legacy => "h",
        }
    }

    /// Hex digest of `password` under this scheme
    pub fn digest(&self, password: &str) -> String {
        match self {
            HashScheme::Sha1 => hex::encode(Sha1::digest(password.as_bytes())),
            HashScheme::Sha256 => hex::encode(Sha256::digest(password.as_bytes())),
            HashScheme::Sha512 => hex::encode(Sha512::digest(password.as_bytes())),
            HashScheme::Legacy => legacy_digest(password),
        }
    }

    /// Produce the stored `scheme:digest` form
    pub fn hash(&self, password: &str) -> String {
        format!("{}:{}", self.name(), self.digest(password))
    }
}

impl fmt::Display for HashScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashScheme {
    type Err = HashFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sha1" => Ok(HashScheme::Sha1),
            "sha256" => Ok(HashScheme::Sha256),
            "sha512" => Ok(HashScheme::Sha512),
            "h" => Ok(HashScheme::Legacy),
            other => Err(HashFormatError::UnsupportedScheme(other.to_string())),
        }
    }
}

fn legacy_digest(password: &str) -> String {
    let rotated: String = password.chars().map(rot13).collect();
    let mut sha = Sha1::new();
    sha.update(rotated.as_bytes());
    sha.update(password.as_bytes());

    let mut digest = hex::encode(sha.finalize());
    let md5 = hex::encode(Md5::digest(password.as_bytes()));
    digest.push_str(&md5[..24]);
    digest
}

fn rot13(c: char) -> char {
    match c {
        'a'..='z' => (((c as u8 - b'a') + 13) % 26 + b'a') as char,
        'A'..='Z' => (((c as u8 - b'A') + 13) % 26 + b'A') as char,
        _ => c,
    }
}

/// Why a stored hash could not be used
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HashFormatError {
    #[error("empty hash")]
    Empty,

    /// Not `identifier:digest`
    #[error("expected scheme:digest")]
    Malformed,

    /// Well-formed but the scheme is not in the table
    #[error("unsupported hash scheme '{0}'")]
    UnsupportedScheme(String),
}

/// A parsed `scheme:digest` pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredHash<'a> {
    pub scheme: HashScheme,
    pub digest: &'a str,
}

impl<'a> StoredHash<'a> {
    /// Parse a stored hash string
    pub fn parse(stored: &'a str) -> Result<Self, HashFormatError> {
        if stored.is_empty() {
            return Err(HashFormatError::Empty);
        }
        let (scheme, digest) = split_scheme(stored).ok_or(HashFormatError::Malformed)?;
        let scheme = scheme.parse::<HashScheme>()?;
        Ok(Self { scheme, digest })
    }

    /// Check a candidate password against this hash
    pub fn verify(&self, password: &str) -> bool {
        let candidate = self.scheme.digest(password);
        constant_time_eq(candidate.as_bytes(), self.digest.as_bytes())
    }
}

/// Whether `stored` has the `identifier:digest` shape, regardless of scheme
pub fn is_well_formed(stored: &str) -> bool {
    split_scheme(stored).is_some()
}

fn split_scheme(stored: &str) -> Option<(&str, &str)> {
    let (scheme, digest) = stored.split_once(':')?;
    let mut chars = scheme.chars();
    let first = chars.next()?;
    if !(first.is_ascii_alphabetic() || first == '_') {
        return None;
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    Some((scheme, digest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        for scheme in [
            HashScheme::Sha1,
            HashScheme::Sha256,
            HashScheme::Sha512,
            HashScheme::Legacy,
        ] {
            let stored = scheme.hash("hunter2");
            let parsed = StoredHash::parse(&stored).unwrap();
            assert_eq!(parsed.scheme, scheme);
            assert!(parsed.verify("hunter2"));
            assert!(!parsed.verify("hunter3"));
        }
    }

    #[test]
    fn test_known_digest() {
        assert_eq!(
            HashScheme::Sha256.hash("abc"),
            "sha256:ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_legacy_known_digest() {
        assert_eq!(
            HashScheme::Legacy.hash("secret"),
            "h:269d76868a01982f9bffdc345934cbfdcedbd7045ebe2294ecd0e0f08eab7690"
        );
        let stored = "h:3919f918c24a8c198ccd395827a5d5802a52b1db65a8e27d8879283831b664bd";
        let parsed = StoredHash::parse(stored).unwrap();
        assert_eq!(parsed.scheme, HashScheme::Legacy);
        assert!(parsed.verify("Hello, World!"));
        assert!(!parsed.verify("hello, world!"));
    }

    #[test]
    fn test_legacy_scheme_in_config() {
        let scheme: HashScheme = serde_json::from_str(r#""h""#).unwrap();
        assert_eq!(scheme, HashScheme::Legacy);
        assert_eq!(serde_json::to_string(&HashScheme::Legacy).unwrap(), r#""h""#);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(StoredHash::parse(""), Err(HashFormatError::Empty));
        assert_eq!(StoredHash::parse("nodigest"), Err(HashFormatError::Malformed));
        assert_eq!(StoredHash::parse("9abc:ff"), Err(HashFormatError::Malformed));
        assert_eq!(StoredHash::parse("sh-a:ff"), Err(HashFormatError::Malformed));
        assert_eq!(
            StoredHash::parse("md5:ff"),
            Err(HashFormatError::UnsupportedScheme("md5".into()))
        );
        assert_eq!(
            HashFormatError::UnsupportedScheme("md5".into()).to_string(),
            "unsupported hash scheme 'md5'"
        );
    }

    #[test]
    fn test_well_formed() {
        assert!(is_well_formed("h:abc"));
        assert!(is_well_formed("_x1:"));
        assert!(!is_well_formed(":abc"));
    }

    #[test]
    fn test_scheme_from_str() {
        assert_eq!("sha512".parse::<HashScheme>(), Ok(HashScheme::Sha512));
        assert!("md5".parse::<HashScheme>().is_err());
    }
}
