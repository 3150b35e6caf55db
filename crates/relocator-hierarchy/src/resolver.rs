use std::borrow::Cow;
use std::collections::HashSet;
use std::sync::Arc;

use relocator_classfile::ClassHeader;

use crate::cache::MetadataCache;
use crate::metadata::TypeMetadata;
use crate::source::ClassBytesSource;
use crate::OBJECT;

/// Renaming applied to hierarchy data read from ancestor bytes.
///
/// Ancestors may still be compiled against names that the code being
/// rewritten no longer uses; the remapper lines the two up.
pub trait NameRemapper: Send + Sync {
    fn remap<'a>(&self, internal_name: &'a str) -> Cow<'a, str>;

    /// Other names under which the bytes of `internal_name` may be stored,
    /// tried in order when the name itself is not found.
    fn original_names(&self, _internal_name: &str) -> Vec<String> {
        Vec::new()
    }
}

/// Answers common ancestor queries from raw class headers.
///
/// The resolver never fails: types whose bytes cannot be found or parsed
/// are treated as direct subclasses of `java/lang/Object`. No lock is held
/// while walking the hierarchy, so concurrent queries only ever contend on
/// individual cache reads and inserts.
pub struct HierarchyResolver {
    cache: Arc<MetadataCache>,
    source: Arc<dyn ClassBytesSource>,
    remapper: Option<Arc<dyn NameRemapper>>,
}

impl HierarchyResolver {
    pub fn new(source: Arc<dyn ClassBytesSource>) -> Self {
        Self {
            cache: Arc::new(MetadataCache::new()),
            source,
            remapper: None,
        }
    }

    /// Shares an existing cache, e.g. across several resolvers in one session.
    pub fn with_cache(mut self, cache: Arc<MetadataCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_remapper(mut self, remapper: Arc<dyn NameRemapper>) -> Self {
        self.remapper = Some(remapper);
        self
    }

    pub fn cache(&self) -> &Arc<MetadataCache> {
        &self.cache
    }

    /// Offers metadata for a type known without a lookup, such as the class
    /// currently being rewritten. An existing entry is kept.
    pub fn seed(&self, metadata: TypeMetadata) -> Arc<TypeMetadata> {
        self.cache.insert_if_absent(metadata)
    }

    /// Cached metadata for `name`, resolving it from the source on first use.
    pub fn metadata(&self, name: &str) -> Arc<TypeMetadata> {
        if let Some(hit) = self.cache.get(name) {
            return hit;
        }
        let resolved = self.load(name);
        self.cache.insert_if_absent(resolved)
    }

    /// Nearest common supertype of two internal names, as a verifier merges
    /// them.
    pub fn common_ancestor(&self, a: &str, b: &str) -> String {
        if a == b {
            return a.to_string();
        }
        let meta_a = self.metadata(a);
        let meta_b = self.metadata(b);
        match (meta_a.is_interface, meta_b.is_interface) {
            (true, true) => self.common_interface(a, b),
            (true, false) | (false, true) => OBJECT.to_string(),
            (false, false) => self.common_superclass(a, b),
        }
    }

    fn common_interface(&self, a: &str, b: &str) -> String {
        let closure_a = self.interface_closure(a);
        let closure_b: HashSet<String> = self.interface_closure(b).into_iter().collect();
        closure_a
            .into_iter()
            .find(|name| closure_b.contains(name))
            .unwrap_or_else(|| OBJECT.to_string())
    }

    fn common_superclass(&self, a: &str, b: &str) -> String {
        let chain_a: HashSet<String> = self.superclass_chain(a).into_iter().collect();
        self.superclass_chain(b)
            .into_iter()
            .find(|name| chain_a.contains(name))
            .unwrap_or_else(|| OBJECT.to_string())
    }

    /// `name` followed by its superclasses, stopping at the root or at the
    /// first repeated name.
    fn superclass_chain(&self, name: &str) -> Vec<String> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut current = Some(name.to_string());
        while let Some(class) = current {
            if !seen.insert(class.clone()) {
                break;
            }
            current = self.metadata(&class).super_name.clone();
            chain.push(class);
        }
        chain
    }

    /// `name` and every interface it extends, depth first in declaration
    /// order, each listed once.
    fn interface_closure(&self, name: &str) -> Vec<String> {
        let mut closure = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![name.to_string()];
        while let Some(current) = stack.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            let metadata = self.metadata(&current);
            stack.extend(metadata.interfaces.iter().rev().cloned());
            closure.push(current);
        }
        closure
    }

    fn load(&self, name: &str) -> TypeMetadata {
        let mut candidates = vec![name.to_string()];
        if let Some(remapper) = &self.remapper {
            candidates.extend(remapper.original_names(name));
        }

        for candidate in &candidates {
            let bytes = match self.source.class_bytes(candidate) {
                Ok(Some(bytes)) => bytes,
                Ok(None) => continue,
                Err(err) => {
                    tracing::debug!(
                        target: "relocator.hierarchy",
                        class = %candidate,
                        error = %err,
                        "failed to read ancestor bytes"
                    );
                    continue;
                }
            };
            match ClassHeader::parse(&bytes) {
                Ok(header) => return self.remapped(name, &header),
                Err(err) => {
                    tracing::debug!(
                        target: "relocator.hierarchy",
                        class = %candidate,
                        error = %err,
                        "failed to parse ancestor header"
                    );
                }
            }
        }

        tracing::debug!(
            target: "relocator.hierarchy",
            class = %name,
            "ancestor unavailable; assuming a direct subclass of {OBJECT}"
        );
        TypeMetadata::fallback(name)
    }

    fn remapped(&self, name: &str, header: &ClassHeader) -> TypeMetadata {
        let mut metadata = TypeMetadata::from_header(header);
        // Keyed by the requested name even when found under an original one.
        metadata.name = name.to_string();
        if name == OBJECT {
            metadata.super_name = None;
        }
        if let Some(remapper) = &self.remapper {
            metadata.super_name = metadata
                .super_name
                .map(|s| remapper.remap(&s).into_owned());
            metadata.interfaces = metadata
                .interfaces
                .iter()
                .map(|i| remapper.remap(i).into_owned())
                .collect();
        }
        metadata
    }
}

impl std::fmt::Debug for HierarchyResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HierarchyResolver")
            .field("cached", &self.cache.len())
            .field("remapper", &self.remapper.is_some())
            .finish()
    }
}
