use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::metadata::TypeMetadata;

/// Process-wide memo of [`TypeMetadata`] keyed by internal name.
///
/// Entries are never replaced: when two threads resolve the same type
/// concurrently the first insert wins and the other result is discarded.
#[derive(Debug, Default)]
pub struct MetadataCache {
    entries: RwLock<HashMap<String, Arc<TypeMetadata>>>,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<TypeMetadata>> {
        self.entries.read().get(name).cloned()
    }

    /// Inserts `metadata` unless an entry for its name exists, returning the
    /// entry that is cached afterwards.
    pub fn insert_if_absent(&self, metadata: TypeMetadata) -> Arc<TypeMetadata> {
        let mut entries = self.entries.write();
        entries
            .entry(metadata.name.clone())
            .or_insert_with(|| Arc::new(metadata))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
