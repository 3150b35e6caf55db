use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use thiserror::Error;
use zip::ZipArchive;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),

    #[error("unsupported classpath entry {0}")]
    UnsupportedEntry(PathBuf),

    #[error("{0} has no jmods/, lib/ct.sym or rt.jar to read platform classes from")]
    UnsupportedJdk(PathBuf),

    #[error("could not discover a JDK installation (tried JAVA_HOME and `java` on PATH)")]
    JdkNotFound,
}

/// Somewhere raw class file bytes can be looked up by internal name.
///
/// Implementations must be cheap and local (memory, disk, an open archive);
/// `Ok(None)` means the class is not there.
pub trait ClassBytesSource: Send + Sync {
    fn class_bytes(&self, internal_name: &str) -> Result<Option<Vec<u8>>, SourceError>;
}

fn class_entry_name(internal_name: &str) -> String {
    format!("{internal_name}.class")
}

#[derive(Debug, Default, Clone)]
pub struct MemorySource {
    classes: HashMap<String, Vec<u8>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, internal_name: impl Into<String>, bytes: Vec<u8>) {
        self.classes.insert(internal_name.into(), bytes);
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl FromIterator<(String, Vec<u8>)> for MemorySource {
    fn from_iter<T: IntoIterator<Item = (String, Vec<u8>)>>(iter: T) -> Self {
        Self {
            classes: iter.into_iter().collect(),
        }
    }
}

impl ClassBytesSource for MemorySource {
    fn class_bytes(&self, internal_name: &str) -> Result<Option<Vec<u8>>, SourceError> {
        Ok(self.classes.get(internal_name).cloned())
    }
}

/// A directory tree laid out by package, as produced by `javac -d`.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ClassBytesSource for DirectorySource {
    fn class_bytes(&self, internal_name: &str) -> Result<Option<Vec<u8>>, SourceError> {
        if internal_name.split('/').any(|part| part == ".." || part.is_empty()) {
            return Ok(None);
        }
        match std::fs::read(self.root.join(class_entry_name(internal_name))) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

/// A jar kept open for the lifetime of the source.
pub struct JarSource {
    path: PathBuf,
    archive: Mutex<ZipArchive<File>>,
}

impl std::fmt::Debug for JarSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JarSource").field("path", &self.path).finish()
    }
}

impl JarSource {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SourceError> {
        let path = path.into();
        let file = File::open(&path)?;
        let archive = ZipArchive::new(file)?;
        Ok(Self {
            path,
            archive: Mutex::new(archive),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ClassBytesSource for JarSource {
    fn class_bytes(&self, internal_name: &str) -> Result<Option<Vec<u8>>, SourceError> {
        let mut archive = self.archive.lock();
        let entry_name = class_entry_name(internal_name);
        let res = match archive.by_name(&entry_name) {
            Ok(mut zf) => {
                let mut bytes = Vec::with_capacity(zf.size() as usize);
                zf.read_to_end(&mut bytes)?;
                Ok(Some(bytes))
            }
            Err(zip::result::ZipError::FileNotFound) => Ok(None),
            Err(e) => Err(e.into()),
        };
        res
    }
}

/// An ordered list of sources; the first one that has a class wins.
#[derive(Default)]
pub struct ClasspathSource {
    entries: Vec<Box<dyn ClassBytesSource>>,
}

impl ClasspathSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, source: impl ClassBytesSource + 'static) {
        self.entries.push(Box::new(source));
    }

    /// Builds a classpath from directories and `.jar`/`.zip` files.
    pub fn from_paths<I, P>(paths: I) -> Result<Self, SourceError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut classpath = Self::new();
        for path in paths {
            let path = path.as_ref();
            if path.is_dir() {
                classpath.push(DirectorySource::new(path));
                continue;
            }
            match path.extension().and_then(|ext| ext.to_str()) {
                Some(ext) if ext.eq_ignore_ascii_case("jar") || ext.eq_ignore_ascii_case("zip") => {
                    classpath.push(JarSource::open(path)?)
                }
                _ => return Err(SourceError::UnsupportedEntry(path.to_path_buf())),
            }
        }
        Ok(classpath)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ClassBytesSource for ClasspathSource {
    fn class_bytes(&self, internal_name: &str) -> Result<Option<Vec<u8>>, SourceError> {
        for entry in &self.entries {
            if let Some(bytes) = entry.class_bytes(internal_name)? {
                return Ok(Some(bytes));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    #[test]
    fn directory_source_reads_by_package_path() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("demo/pkg")).unwrap();
        std::fs::write(dir.path().join("demo/pkg/Thing.class"), b"bytes").unwrap();

        let source = DirectorySource::new(dir.path());
        assert_eq!(source.class_bytes("demo/pkg/Thing").unwrap(), Some(b"bytes".to_vec()));
        assert_eq!(source.class_bytes("demo/pkg/Missing").unwrap(), None);
        assert_eq!(source.class_bytes("../escape").unwrap(), None);
    }

    #[test]
    fn classpath_prefers_earlier_entries() {
        let dir = TempDir::new().unwrap();
        let jar_path = dir.path().join("lib.jar");
        {
            let file = File::create(&jar_path).unwrap();
            let mut zip = zip::ZipWriter::new(file);
            zip.start_file("demo/A.class", SimpleFileOptions::default()).unwrap();
            zip.write_all(b"from-jar").unwrap();
            zip.start_file("demo/B.class", SimpleFileOptions::default()).unwrap();
            zip.write_all(b"only-jar").unwrap();
            zip.finish().unwrap();
        }
        let classes = dir.path().join("classes");
        std::fs::create_dir_all(classes.join("demo")).unwrap();
        std::fs::write(classes.join("demo/A.class"), b"from-dir").unwrap();

        let classpath = ClasspathSource::from_paths([&classes, &jar_path]).unwrap();
        assert_eq!(classpath.len(), 2);
        assert_eq!(classpath.class_bytes("demo/A").unwrap(), Some(b"from-dir".to_vec()));
        assert_eq!(classpath.class_bytes("demo/B").unwrap(), Some(b"only-jar".to_vec()));
        assert_eq!(classpath.class_bytes("demo/C").unwrap(), None);
    }

    #[test]
    fn unsupported_classpath_entry_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"x").unwrap();
        assert!(matches!(
            ClasspathSource::from_paths([&path]),
            Err(SourceError::UnsupportedEntry(_))
        ));
    }
}
