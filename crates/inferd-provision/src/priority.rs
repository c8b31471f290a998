//! Backend priority resolution
//!
//! Turns a user-supplied backend list into a canonical [`BackendPriority`]:
//! trimmed, upper-cased, blanks dropped, duplicates removed keeping the first
//! occurrence. Names are not checked against the host's capabilities; the
//! engine's initialisation attempt is the authority on availability.

use crate::error::ConfigError;
use inferd_hardware::BackendKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Ordered, deduplicated, non-empty backend list
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct BackendPriority(Vec<BackendKind>);

impl BackendPriority {
    pub fn iter(&self) -> std::slice::Iter<'_, BackendKind> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[BackendKind] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, backend: &BackendKind) -> bool {
        self.0.contains(backend)
    }

    pub fn first(&self) -> &BackendKind {
        &self.0[0]
    }

    /// Comma-joined form used for the engine's priority hint, e.g. `NPU,GPU,CPU`.
    pub fn hint(&self) -> String {
        self.0
            .iter()
            .map(BackendKind::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for BackendPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hint())
    }
}

impl<'a> IntoIterator for &'a BackendPriority {
    type Item = &'a BackendKind;
    type IntoIter = std::slice::Iter<'a, BackendKind>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Resolve pre-split tokens into a priority sequence.
///
/// # Errors
/// [`ConfigError::EmptyPriority`] when no non-blank token remains.
pub fn resolve<I, S>(tokens: I) -> Result<BackendPriority, ConfigError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut resolved: Vec<BackendKind> = Vec::new();
    for token in tokens {
        let token = token.as_ref().trim();
        if token.is_empty() {
            continue;
        }
        let backend = BackendKind::parse(token);
        if !resolved.contains(&backend) {
            resolved.push(backend);
        }
    }

    if resolved.is_empty() {
        return Err(ConfigError::EmptyPriority);
    }
    Ok(BackendPriority(resolved))
}

/// Resolve a comma-delimited list such as `"npu, gpu,cpu"`.
pub fn resolve_str(raw: &str) -> Result<BackendPriority, ConfigError> {
    resolve(raw.split(','))
}

impl FromStr for BackendPriority {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        resolve_str(s)
    }
}

impl TryFrom<Vec<String>> for BackendPriority {
    type Error = ConfigError;

    fn try_from(value: Vec<String>) -> Result<Self, Self::Error> {
        resolve(value)
    }
}

impl From<BackendPriority> for Vec<String> {
    fn from(value: BackendPriority) -> Self {
        value.0.into_iter().map(String::from).collect()
    }
}
