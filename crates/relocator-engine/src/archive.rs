//! The boundary with container traversal: entries in, outcomes out, and an
//! optional audit of every class that changed.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rayon::prelude::*;

use crate::error::RewriteError;
use crate::relocator::Relocator;

const CLASS_SUFFIX: &str = ".class";

/// One file found inside a container (a directory tree or an archive).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Display name of the enclosing container, for diagnostics.
    pub container: String,
    /// Path of the entry inside its container, `/` separated.
    pub name: String,
    pub bytes: Vec<u8>,
}

impl ArchiveEntry {
    pub fn new(container: impl Into<String>, name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            container: container.into(),
            name: name.into(),
            bytes,
        }
    }

    /// Internal class name for `.class` entries, with any multi-release
    /// `META-INF/versions/<n>/` prefix removed.
    pub fn class_name(&self) -> Option<&str> {
        let stem = self.name.strip_suffix(CLASS_SUFFIX)?;
        if let Some(versioned) = stem.strip_prefix("META-INF/versions/") {
            return versioned.split_once('/').map(|(_, name)| name);
        }
        (!stem.is_empty()).then_some(stem)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryOutcome {
    pub bytes: Vec<u8>,
    pub changed: bool,
}

/// Receives the final bytes of every module that was changed.
pub trait AuditSink: Send + Sync {
    fn record(&self, module_name: &str, final_bytes: &[u8]) -> io::Result<()>;
}

/// Writes changed classes to `<root>/<internal name>.class`.
#[derive(Debug, Clone)]
pub struct DumpDirectory {
    root: PathBuf,
}

impl DumpDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl AuditSink for DumpDirectory {
    fn record(&self, module_name: &str, final_bytes: &[u8]) -> io::Result<()> {
        let mut path = self.root.clone();
        for segment in module_name.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("refusing to dump suspicious module name {module_name:?}"),
                ));
            }
            path.push(segment);
        }
        let mut file_name = path.file_name().unwrap_or_default().to_os_string();
        file_name.push(CLASS_SUFFIX);
        path.set_file_name(file_name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, final_bytes)
    }
}

/// Relocates one entry. Non-class entries are returned unchanged.
pub fn process_entry(
    relocator: &Relocator,
    entry: &ArchiveEntry,
    audit: Option<&dyn AuditSink>,
) -> Result<EntryOutcome, RewriteError> {
    let Some(class_name) = entry.class_name() else {
        return Ok(EntryOutcome {
            bytes: entry.bytes.clone(),
            changed: false,
        });
    };
    let relocated = relocator.relocate(Some(class_name), &entry.bytes)?;
    if relocated.changed {
        if let Some(audit) = audit {
            if let Err(err) = audit.record(class_name, &relocated.bytes) {
                tracing::warn!(
                    target: "relocator.engine",
                    container = %entry.container,
                    module = %class_name,
                    error = %err,
                    "failed to record relocated module"
                );
            }
        }
    }
    Ok(EntryOutcome {
        changed: relocated.changed,
        bytes: relocated.bytes.into_owned(),
    })
}

/// [`process_entry`] over many entries in parallel, results in input order.
pub fn process_entries(
    relocator: &Relocator,
    entries: &[ArchiveEntry],
    audit: Option<&dyn AuditSink>,
) -> Vec<Result<EntryOutcome, RewriteError>> {
    entries
        .par_iter()
        .map(|entry| process_entry(relocator, entry, audit))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_names_of_entries() {
        let entry = |name: &str| ArchiveEntry::new("app.jar", name, Vec::new());
        assert_eq!(entry("demo/Main.class").class_name(), Some("demo/Main"));
        assert_eq!(
            entry("META-INF/versions/17/demo/Main.class").class_name(),
            Some("demo/Main")
        );
        assert_eq!(entry("META-INF/MANIFEST.MF").class_name(), None);
        assert_eq!(entry(".class").class_name(), None);
    }

    #[test]
    fn dump_directory_mirrors_packages() {
        let dir = tempfile::tempdir().unwrap();
        let dump = DumpDirectory::new(dir.path());
        dump.record("demo/web/Filter", b"\xCA\xFE").unwrap();
        let written = fs::read(dir.path().join("demo/web/Filter.class")).unwrap();
        assert_eq!(written, b"\xCA\xFE");
        assert!(dump.record("../escape", b"").is_err());
    }
}
