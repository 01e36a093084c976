// Raw template sources
// Author: kelexine (https://github.com/kelexine)

use crate::error::{Result, VaultError};
use crate::models::is_valid_template_id;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;

/// Where raw template text comes from.
pub trait TemplateSource: Send + Sync {
    /// Raw text of `template_id`, or `None` if the source does not have it.
    fn load(&self, template_id: &str) -> Result<Option<String>>;
}

/// Templates stored as `<template_id>.j2` files in one directory.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_of(&self, template_id: &str) -> PathBuf {
        self.root.join(format!("{}.j2", template_id))
    }
}

impl TemplateSource for DirectorySource {
    fn load(&self, template_id: &str) -> Result<Option<String>> {
        if !is_valid_template_id(template_id) {
            return Err(VaultError::InvalidRequest(format!(
                "invalid template id: {:?}",
                crate::utils::logging::truncate(template_id, 64)
            )));
        }
        match std::fs::read_to_string(self.path_of(template_id)) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Templates registered in memory.
#[derive(Debug, Default)]
pub struct InMemorySource {
    templates: RwLock<HashMap<String, String>>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, template_id: impl Into<String>, raw: impl Into<String>) -> Self {
        self.insert(template_id, raw);
        self
    }

    pub fn insert(&self, template_id: impl Into<String>, raw: impl Into<String>) {
        self.templates.write().insert(template_id.into(), raw.into());
    }

    pub fn remove(&self, template_id: &str) -> bool {
        self.templates.write().remove(template_id).is_some()
    }
}

impl TemplateSource for InMemorySource {
    fn load(&self, template_id: &str) -> Result<Option<String>> {
        Ok(self.templates.read().get(template_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_source_reads_j2_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("greeting.j2"), "Hello {{ name }}").unwrap();

        let source = DirectorySource::new(dir.path());
        assert_eq!(source.load("greeting").unwrap().as_deref(), Some("Hello {{ name }}"));
        assert!(source.load("missing").unwrap().is_none());
    }

    #[test]
    fn test_directory_source_rejects_traversal() {
        let source = DirectorySource::new("/tmp");
        assert!(source.load("../etc/passwd").is_err());
    }

    #[test]
    fn test_in_memory_source() {
        let source = InMemorySource::new().with("a", "A");
        assert_eq!(source.load("a").unwrap().as_deref(), Some("A"));
        assert!(source.remove("a"));
        assert!(source.load("a").unwrap().is_none());
    }
}
