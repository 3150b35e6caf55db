//! Offline type hierarchy lookups for stack map frame computation.
//!
//! [`HierarchyResolver::common_ancestor`] answers the question a bytecode
//! verifier asks when two control flow paths merge, using only the headers
//! of class files found through a [`ClassBytesSource`]. Nothing is loaded or
//! executed, and unknown types degrade to a `java/lang/Object` parent.

mod cache;
mod jdk;
mod metadata;
mod resolver;
mod source;

pub use crate::cache::MetadataCache;
pub use crate::jdk::JdkSource;
pub use crate::metadata::TypeMetadata;
pub use crate::resolver::{HierarchyResolver, NameRemapper};
pub use crate::source::{
    ClassBytesSource, ClasspathSource, DirectorySource, JarSource, MemorySource, SourceError,
};

/// The root of every class hierarchy.
pub const OBJECT: &str = "java/lang/Object";
