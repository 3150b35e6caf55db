use std::sync::Arc;

use relocator_engine::{FrameStrategy, NameMapper, Relocation, Relocator, RelocatorOptions};
use relocator_hierarchy::{HierarchyResolver, MemorySource};

pub const MAX_INPUT_SIZE: usize = 256 * 1024;

/// A relocator with the servlet and validation renames, an empty classpath
/// and source-namespace skipping off so every parsed class is rewritten.
pub fn relocator(strategy: FrameStrategy) -> Relocator {
    let mapper = Arc::new(NameMapper::new([
        Relocation::new("javax/servlet", "jakarta/servlet"),
        Relocation::new("javax/validation", "jakarta/validation"),
    ]));
    let resolver = HierarchyResolver::new(Arc::new(MemorySource::new())).with_remapper(mapper.clone());
    Relocator::new(
        mapper,
        Arc::new(resolver),
        RelocatorOptions {
            strategy,
            skip_source_namespace: false,
        },
    )
}
