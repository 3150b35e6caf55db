//! Namespace relocation for JVM class files.
//!
//! A [`Relocator`] renames every reference to a source namespace (for
//! example `javax/servlet`) to its target (`jakarta/servlet`) across a class
//! file: header, members, signatures, annotations, code, bootstrap methods
//! and stack map frames. Classes without any such reference come back as the
//! original bytes.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use relocator_engine::{NameMapper, Relocation, Relocator, RelocatorOptions};
//! use relocator_hierarchy::{HierarchyResolver, MemorySource};
//!
//! let mapper = Arc::new(NameMapper::new([Relocation::new("javax/servlet", "jakarta/servlet")]));
//! let resolver = HierarchyResolver::new(Arc::new(MemorySource::new())).with_remapper(mapper.clone());
//! let relocator = Relocator::new(mapper, Arc::new(resolver), RelocatorOptions::default());
//! # let bytes: Vec<u8> = Vec::new();
//! let relocated = relocator.relocate(Some("demo/MyFilter"), &bytes)?;
//! # Ok::<(), relocator_engine::RewriteError>(())
//! ```

mod error;
mod frames;
mod mapper;
mod relocator;
mod rewrite;

pub mod archive;

pub use crate::error::RewriteError;
pub use crate::mapper::{NameMapper, Relocation};
pub use crate::relocator::{FrameStrategy, Relocated, Relocator, RelocatorOptions};
