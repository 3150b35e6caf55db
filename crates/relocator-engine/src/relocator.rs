use std::borrow::Cow;
use std::sync::Arc;

use rayon::prelude::*;
use relocator_classfile::{Attribute, ClassFile, ClassHeader};
use relocator_hierarchy::{HierarchyResolver, TypeMetadata};

use crate::error::RewriteError;
use crate::frames::FrameComputer;
use crate::mapper::NameMapper;
use crate::rewrite::Rewriter;

/// How `StackMapTable`s are produced for rewritten code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FrameStrategy {
    /// Recompute frames and maxima, merging types through the resolver.
    #[default]
    Safe,
    /// Keep the original frames with renamed types, and the original maxima.
    Fast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelocatorOptions {
    pub strategy: FrameStrategy,
    /// Leave classes that themselves live in a source namespace untouched.
    pub skip_source_namespace: bool,
}

impl Default for RelocatorOptions {
    fn default() -> Self {
        Self {
            strategy: FrameStrategy::Safe,
            skip_source_namespace: true,
        }
    }
}

/// Output of [`Relocator::relocate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relocated<'a> {
    /// The input itself when nothing changed.
    pub bytes: Cow<'a, [u8]>,
    pub changed: bool,
    /// Number of reference sites that were renamed.
    pub sites: usize,
}

impl<'a> Relocated<'a> {
    fn unchanged(bytes: &'a [u8]) -> Self {
        Self {
            bytes: Cow::Borrowed(bytes),
            changed: false,
            sites: 0,
        }
    }
}

/// Entry point: renames references in class files.
///
/// A `Relocator` is cheap to share between threads; all modules relocated
/// through it share the resolver's metadata cache.
#[derive(Debug, Clone)]
pub struct Relocator {
    mapper: Arc<NameMapper>,
    resolver: Arc<HierarchyResolver>,
    options: RelocatorOptions,
}

impl Relocator {
    pub fn new(
        mapper: Arc<NameMapper>,
        resolver: Arc<HierarchyResolver>,
        options: RelocatorOptions,
    ) -> Self {
        Self {
            mapper,
            resolver,
            options,
        }
    }

    pub fn mapper(&self) -> &NameMapper {
        &self.mapper
    }

    pub fn resolver(&self) -> &HierarchyResolver {
        &self.resolver
    }

    pub fn options(&self) -> RelocatorOptions {
        self.options
    }

    /// Relocates one class file. `name_hint` is the internal name the caller
    /// expects the class to have, used for logging and for the source
    /// namespace check without parsing the class.
    ///
    /// When no reference needs renaming the returned bytes borrow `bytes`.
    pub fn relocate<'a>(
        &self,
        name_hint: Option<&str>,
        bytes: &'a [u8],
    ) -> Result<Relocated<'a>, RewriteError> {
        let module = name_hint.unwrap_or("<unnamed>");
        let parse_error = |source| RewriteError::Parse {
            module: module.to_string(),
            source,
        };

        if self.options.skip_source_namespace {
            let own_name = match name_hint {
                Some(name) => Cow::Borrowed(name),
                None => Cow::Owned(ClassHeader::parse(bytes).map_err(parse_error)?.this_class),
            };
            if self.mapper.is_in_source_namespace(&own_name) {
                tracing::trace!(
                    target: "relocator.engine",
                    module = %own_name,
                    "skipping class in a source namespace"
                );
                return Ok(Relocated::unchanged(bytes));
            }
        }

        let class = ClassFile::parse(bytes).map_err(parse_error)?;
        let module = name_hint.unwrap_or(&class.this_class).to_string();
        let rewritten = Rewriter::new(&self.mapper, &module).rewrite(class);
        if rewritten.sites == 0 {
            return Ok(Relocated::unchanged(bytes));
        }

        let mut class = rewritten.class;
        if self.options.strategy == FrameStrategy::Safe {
            self.recompute_frames(&module, &mut class)?;
        }
        let output = class.to_bytes().map_err(|source| RewriteError::Encode {
            module: module.clone(),
            source,
        })?;

        tracing::debug!(
            target: "relocator.engine",
            module = %module,
            sites = rewritten.sites,
            "relocated module"
        );
        Ok(Relocated {
            bytes: Cow::Owned(output),
            changed: true,
            sites: rewritten.sites,
        })
    }

    /// Relocates independent modules in parallel. Results are in input order
    /// and a failure only affects its own module.
    pub fn relocate_batch<'a>(
        &self,
        modules: &[&'a [u8]],
    ) -> Vec<Result<Relocated<'a>, RewriteError>> {
        modules
            .par_iter()
            .map(|&bytes| self.relocate(None, bytes))
            .collect()
    }

    fn recompute_frames(&self, module: &str, class: &mut ClassFile) -> Result<(), RewriteError> {
        self.resolver.seed(TypeMetadata::from_header(&class.header()));
        let computer = FrameComputer::new(&self.resolver, &class.this_class, class.major_version);
        for method in &mut class.methods {
            for attribute in &mut method.attributes {
                let Attribute::Code(code) = attribute else {
                    continue;
                };
                if code.has_subroutines() {
                    tracing::debug!(
                        target: "relocator.engine",
                        module = %module,
                        method = %method.name,
                        "keeping original frames of code with subroutines"
                    );
                    continue;
                }
                computer
                    .compute(&method.name, &method.descriptor, method.access_flags, code)
                    .map_err(|err| RewriteError::FrameComputation {
                        module: module.to_string(),
                        method: format!("{}{}", method.name, method.descriptor),
                        reason: err.to_string(),
                    })?;
            }
        }
        Ok(())
    }
}
