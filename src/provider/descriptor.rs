// # Provider Descriptors
//
// Declarative identity of a pool provider: name, kind, and selection
// priority. Extension providers announce themselves through `*.provider`
// files in the configured libs directory, using the same key=value shape as
// the property files.

use crate::config::properties::parse_properties;
use crate::error::{OjpError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Pool kind a provider serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    Standard,
    Xa,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::Standard => f.write_str("standard"),
            ProviderKind::Xa => f.write_str("xa"),
        }
    }
}

/// Immutable identity of one provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub name: String,
    pub priority: i32,
    pub kind: ProviderKind,
}

impl ProviderDescriptor {
    pub fn new(name: impl Into<String>, priority: i32, kind: ProviderKind) -> Self {
        Self {
            name: name.into(),
            priority,
            kind,
        }
    }

    /// Parse a `*.provider` descriptor file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let props = parse_properties(&std::fs::read_to_string(path)?);
        let name = props
            .get("name")
            .cloned()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                OjpError::Config(format!("provider descriptor {} missing 'name'", path.display()))
            })?;
        let kind = match props.get("kind").map(String::as_str) {
            Some("standard") | None => ProviderKind::Standard,
            Some("xa") => ProviderKind::Xa,
            Some(other) => {
                return Err(OjpError::Config(format!(
                    "provider descriptor {}: unknown kind '{}'",
                    path.display(),
                    other
                )))
            }
        };
        let priority = props
            .get("priority")
            .and_then(|p| p.parse().ok())
            .unwrap_or(0);
        Ok(Self { name, priority, kind })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_file_parsing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hikari.provider");
        std::fs::write(&path, "name=HikariCP\nkind=standard\npriority=100\n").unwrap();

        let descriptor = ProviderDescriptor::from_file(&path).unwrap();
        assert_eq!(descriptor.name, "HikariCP");
        assert_eq!(descriptor.kind, ProviderKind::Standard);
        assert_eq!(descriptor.priority, 100);
    }

    #[test]
    fn test_descriptor_requires_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("anon.provider");
        std::fs::write(&path, "kind=xa\n").unwrap();
        assert!(ProviderDescriptor::from_file(&path).is_err());
    }
}
