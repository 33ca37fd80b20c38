use std::collections::HashMap;
use std::sync::RwLock;

/// Model name → resolved version id. Entries are never invalidated; a racing
/// second insert for the same model simply overwrites with an equivalent value.
#[derive(Debug, Default)]
pub struct VersionCache {
    versions: RwLock<HashMap<String, String>>,
}

impl VersionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, model: &str) -> Option<String> {
        self.versions
            .read()
            .ok()
            .and_then(|versions| versions.get(model).cloned())
    }

    pub fn insert(&self, model: &str, version: &str) {
        if let Ok(mut versions) = self.versions.write() {
            versions.insert(model.to_string(), version.to_string());
        }
    }

    pub fn len(&self) -> usize {
        self.versions.read().map(|v| v.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
