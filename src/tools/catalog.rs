//! Mapping from tool name to `(package-spec, installer-kind)`, and the
//! seam (`UrlResolver`) a deployment plugs a real download catalog into.
//! The core only needs the contract — "given a tool name, return a URL and
//! archive-ness flag" — not the list of tools itself.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallerKind {
    Binary,
    PackageA, // npm-style ecosystem manager
    PackageB, // pip-style ecosystem manager
}

#[derive(Debug, Clone)]
pub struct ToolEntry {
    pub binary_name: String,
    pub package_spec: String,
    pub installer_kind: InstallerKind,
}

/// Resolves a tool name to a download URL and whether it's an archive.
/// Kept as a trait so the concrete catalog (which tools, which URLs) stays
/// a deployment concern rather than part of the core.
pub trait UrlResolver: Send + Sync {
    fn resolve(&self, tool_name: &str) -> Option<(String, bool)>;
}

#[derive(Debug, Default)]
pub struct ToolCatalog {
    entries: HashMap<String, ToolEntry>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `entry`; panics on a duplicate binary name, since the
    /// catalog is immutable at build time and a duplicate is a programming
    /// error, not a runtime condition.
    pub fn insert(&mut self, entry: ToolEntry) {
        assert!(
            !self.entries.contains_key(&entry.binary_name),
            "duplicate tool catalog entry: {}",
            entry.binary_name
        );
        self.entries.insert(entry.binary_name.clone(), entry);
    }

    pub fn get(&self, name: &str) -> Option<&ToolEntry> {
        self.entries.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// A small seed catalog covering the tools the function registry and
    /// shell executor reference by name elsewhere in this crate (`rg` for
    /// search, `tree` is handled separately since it's optional-external).
    pub fn seeded() -> Self {
        let mut catalog = Self::new();
        catalog.insert(ToolEntry {
            binary_name: "rg".to_string(),
            package_spec: "ripgrep".to_string(),
            installer_kind: InstallerKind::Binary,
        });
        catalog.insert(ToolEntry {
            binary_name: "jq".to_string(),
            package_spec: "jq".to_string(),
            installer_kind: InstallerKind::Binary,
        });
        catalog
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "duplicate tool catalog entry")]
    fn duplicate_binary_name_panics() {
        let mut catalog = ToolCatalog::new();
        let make = || ToolEntry {
            binary_name: "jq".into(),
            package_spec: "jq".into(),
            installer_kind: InstallerKind::Binary,
        };
        catalog.insert(make());
        catalog.insert(make());
    }

    #[test]
    fn seeded_catalog_contains_expected_names() {
        let catalog = ToolCatalog::seeded();
        let names: Vec<&str> = catalog.names().collect();
        assert!(names.contains(&"rg"));
        assert!(names.contains(&"jq"));
    }
}
