//! Namespaced template keys.
//!
//! Behavior factories are registered under a `namespace:path` key, e.g.
//! `arcade:duel` or `parkour:maps/tower`. Both halves are lowercase; the
//! namespace accepts `[a-z0-9._-]` and the path additionally accepts `/`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Namespace used when a key is written without one.
pub const DEFAULT_NAMESPACE: &str = "arcade";

/// Errors produced when parsing a [`TemplateKey`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    /// The namespace half was empty or contained an invalid character.
    #[error("invalid key namespace: {0:?}")]
    InvalidNamespace(String),
    /// The path half was empty or contained an invalid character.
    #[error("invalid key path: {0:?}")]
    InvalidPath(String),
}

/// Registry key naming a session kind.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TemplateKey {
    namespace: String,
    path: String,
}

impl TemplateKey {
    /// Build a key from its two halves, validating both.
    pub fn new(namespace: &str, path: &str) -> Result<Self, KeyError> {
        if namespace.is_empty() || !namespace.chars().all(is_namespace_char) {
            return Err(KeyError::InvalidNamespace(namespace.to_owned()));
        }
        if path.is_empty() || !path.chars().all(|c| is_namespace_char(c) || c == '/') {
            return Err(KeyError::InvalidPath(path.to_owned()));
        }
        Ok(Self {
            namespace: namespace.to_owned(),
            path: path.to_owned(),
        })
    }

    /// The namespace half.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The path half.
    pub fn path(&self) -> &str {
        &self.path
    }
}

fn is_namespace_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-')
}

impl FromStr for TemplateKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((namespace, path)) => Self::new(namespace, path),
            None => Self::new(DEFAULT_NAMESPACE, s),
        }
    }
}

impl fmt::Display for TemplateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.path)
    }
}

impl Serialize for TemplateKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TemplateKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
