use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Command;

use parking_lot::Mutex;
use zip::ZipArchive;

use crate::source::{ClassBytesSource, SourceError};

const JMOD_CLASSES_PREFIX: &str = "classes/";
const CT_SYM_PREFIX: &str = "META-INF/sym/";

/// Platform classes read straight out of a JDK installation.
///
/// Three layouts are understood, tried in this order:
/// 1. `jmods/*.jmod` (JDK 9+ with packaged modules)
/// 2. `lib/ct.sym` (the signature archive `javac --release` uses)
/// 3. `jre/lib/rt.jar` or `lib/rt.jar` (JDK 8 and earlier)
///
/// Entry names are indexed once when the source is opened; lookups afterwards
/// only touch the archive that owns the class.
pub struct JdkSource {
    root: PathBuf,
    archives: Vec<Mutex<ZipArchive<File>>>,
    index: HashMap<String, (usize, String)>,
}

impl std::fmt::Debug for JdkSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JdkSource")
            .field("root", &self.root)
            .field("archives", &self.archives.len())
            .field("classes", &self.index.len())
            .finish()
    }
}

impl JdkSource {
    /// Opens the JDK at `home`, which may also be its `jre/` directory.
    pub fn open(home: impl AsRef<Path>) -> Result<Self, SourceError> {
        let home = home.as_ref();
        let root = coerce_to_jdk_root(home.to_path_buf())
            .ok_or_else(|| SourceError::UnsupportedJdk(home.to_path_buf()))?;

        let jmods = root.join("jmods");
        if jmods.is_dir() {
            return Self::from_jmods(root, &jmods);
        }
        let ct_sym = root.join("lib").join("ct.sym");
        if ct_sym.is_file() {
            return Self::from_ct_sym(root, &ct_sym);
        }
        match rt_jar(&root) {
            Some(rt) => Self::from_rt_jar(root, &rt),
            None => Err(SourceError::UnsupportedJdk(root)),
        }
    }

    /// Finds a JDK through `JAVA_HOME`, then through `java` on `PATH`.
    pub fn discover() -> Result<Self, SourceError> {
        let root = discover_from_java_home()
            .or_else(discover_from_java_on_path)
            .ok_or(SourceError::JdkNotFound)?;
        Self::open(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    fn from_jmods(root: PathBuf, jmods_dir: &Path) -> Result<Self, SourceError> {
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(jmods_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some("jmod") {
                paths.push(path);
            }
        }
        // java.base first, so a class split across modules resolves to the base copy.
        paths.sort_by_key(|path| {
            let is_base = path.file_name() == Some(OsStr::new("java.base.jmod"));
            (!is_base, path.clone())
        });

        let mut source = Self::empty(root);
        for path in paths {
            let archive = ZipArchive::new(File::open(&path)?)?;
            let slot = source.archives.len();
            for name in archive.file_names() {
                let Some(internal) = name
                    .strip_prefix(JMOD_CLASSES_PREFIX)
                    .and_then(|rest| rest.strip_suffix(".class"))
                else {
                    continue;
                };
                source
                    .index
                    .entry(internal.to_string())
                    .or_insert_with(|| (slot, name.to_string()));
            }
            source.archives.push(Mutex::new(archive));
        }
        source.log_opened("jmods");
        Ok(source)
    }

    fn from_ct_sym(root: PathBuf, path: &Path) -> Result<Self, SourceError> {
        let archive = ZipArchive::new(File::open(path)?)?;

        // Each class may appear once per release group; the group reaching the
        // newest release wins.
        let mut newest: HashMap<String, (u8, String)> = HashMap::new();
        for name in archive.file_names() {
            let Some((releases, internal)) = parse_ct_sym_entry(name) else {
                continue;
            };
            let Some(latest) = releases.bytes().max() else {
                continue;
            };
            match newest.get(internal) {
                Some((seen, _)) if *seen >= latest => {}
                _ => {
                    newest.insert(internal.to_string(), (latest, name.to_string()));
                }
            }
        }

        let mut source = Self::empty(root);
        source.index = newest
            .into_iter()
            .map(|(internal, (_, name))| (internal, (0, name)))
            .collect();
        source.archives.push(Mutex::new(archive));
        source.log_opened("ct.sym");
        Ok(source)
    }

    fn from_rt_jar(root: PathBuf, path: &Path) -> Result<Self, SourceError> {
        let archive = ZipArchive::new(File::open(path)?)?;
        let mut source = Self::empty(root);
        source.index = archive
            .file_names()
            .filter_map(|name| {
                let internal = name.strip_suffix(".class")?;
                Some((internal.to_string(), (0, name.to_string())))
            })
            .collect();
        source.archives.push(Mutex::new(archive));
        source.log_opened("rt.jar");
        Ok(source)
    }

    fn empty(root: PathBuf) -> Self {
        Self {
            root,
            archives: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn log_opened(&self, layout: &str) {
        tracing::debug!(
            target: "relocator.hierarchy",
            root = %self.root.display(),
            layout,
            classes = self.index.len(),
            "opened JDK"
        );
    }
}

impl ClassBytesSource for JdkSource {
    fn class_bytes(&self, internal_name: &str) -> Result<Option<Vec<u8>>, SourceError> {
        let Some((slot, entry_name)) = self.index.get(internal_name) else {
            return Ok(None);
        };
        let Some(archive) = self.archives.get(*slot) else {
            return Ok(None);
        };
        let mut archive = archive.lock();
        let res = match archive.by_name(entry_name) {
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

/// Splits `[META-INF/sym/]<releases>/[<module>/]<internal>.sig` into the
/// release letters and the internal name.
fn parse_ct_sym_entry(name: &str) -> Option<(&str, &str)> {
    let name = name.strip_prefix(CT_SYM_PREFIX).unwrap_or(name);
    let stem = name
        .strip_suffix(".sig")
        .or_else(|| name.strip_suffix(".class"))?;
    let (releases, rest) = stem.split_once('/')?;
    if releases.is_empty() || !releases.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return None;
    }
    // Module directories always carry a dot; top-level packages never do.
    let internal = match rest.split_once('/') {
        Some((module, internal)) if module.contains('.') => internal,
        _ => rest,
    };
    if internal.ends_with("module-info") {
        return None;
    }
    Some((releases, internal))
}

fn rt_jar(root: &Path) -> Option<PathBuf> {
    [root.join("jre/lib/rt.jar"), root.join("lib/rt.jar")]
        .into_iter()
        .find(|path| path.is_file())
}

fn is_jdk_root(candidate: &Path) -> bool {
    candidate.join("jmods").is_dir()
        || candidate.join("lib").join("ct.sym").is_file()
        || rt_jar(candidate).is_some()
}

fn coerce_to_jdk_root(mut candidate: PathBuf) -> Option<PathBuf> {
    // `java.home` points at `$JDK/jre` on older installations.
    if is_jdk_root(&candidate) {
        return Some(candidate);
    }

    candidate.pop();
    if is_jdk_root(&candidate) {
        return Some(candidate);
    }

    None
}

fn discover_from_java_home() -> Option<PathBuf> {
    std::env::var_os("JAVA_HOME")
        .map(PathBuf::from)
        .and_then(coerce_to_jdk_root)
}

fn discover_from_java_on_path() -> Option<PathBuf> {
    discover_from_java_command().or_else(discover_from_java_symlink)
}

fn discover_from_java_command() -> Option<PathBuf> {
    let output = Command::new("java")
        .args(["-XshowSettings:properties", "-version"])
        .output()
        .ok()?;

    // HotSpot prints settings to stderr.
    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));

    let java_home = combined.lines().find_map(|line| {
        let (key, value) = line.trim().split_once('=')?;
        (key.trim() == "java.home").then(|| value.trim().to_string())
    })?;

    coerce_to_jdk_root(PathBuf::from(java_home))
}

fn discover_from_java_symlink() -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    let exe_name = if cfg!(windows) { "java.exe" } else { "java" };
    let java_bin = std::env::split_paths(&path_var)
        .map(|dir| dir.join(exe_name))
        .find(|candidate| candidate.is_file())?
        .canonicalize()
        .ok()?;
    coerce_to_jdk_root(java_bin.parent()?.parent()?.to_path_buf())
}
