//! Prefix substitution over internal (`a/b/C`) and display (`a.b.C`) names.

use std::borrow::Cow;

use relocator_hierarchy::NameRemapper;

/// One `source → target` namespace rename, stored in internal form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relocation {
    source: String,
    target: String,
}

impl Relocation {
    /// Accepts prefixes in either slash or dot form.
    pub fn new(source: impl AsRef<str>, target: impl AsRef<str>) -> Self {
        Self {
            source: source.as_ref().replace('.', "/"),
            target: target.as_ref().replace('.', "/"),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

/// An ordered relocation table.
///
/// Every pair is tried in table order against the result of the previous
/// one, so a descriptor mentioning two renamed namespaces gets both. Matching
/// is plain substring containment, which is what lets a single prefix reach
/// names embedded in descriptors and signatures.
#[derive(Debug, Clone, Default)]
pub struct NameMapper {
    relocations: Vec<Relocation>,
    dotted: Vec<(String, String)>,
}

impl NameMapper {
    pub fn new(relocations: impl IntoIterator<Item = Relocation>) -> Self {
        let relocations: Vec<Relocation> = relocations
            .into_iter()
            .filter(|r| !r.source.is_empty() && r.source != r.target)
            .collect();
        let dotted = relocations
            .iter()
            .map(|r| (r.source.replace('/', "."), r.target.replace('/', ".")))
            .collect();
        Self {
            relocations,
            dotted,
        }
    }

    pub fn relocations(&self) -> &[Relocation] {
        &self.relocations
    }

    pub fn is_empty(&self) -> bool {
        self.relocations.is_empty()
    }

    /// Maps an internal name, descriptor or signature. Returns
    /// `Cow::Owned` exactly when a substitution happened.
    pub fn map_binary<'a>(&self, name: &'a str) -> Cow<'a, str> {
        substitute(
            self.relocations
                .iter()
                .map(|r| (r.source.as_str(), r.target.as_str())),
            name,
        )
    }

    /// Maps a display name such as a string literal `"javax.servlet.Filter"`.
    pub fn map_dotted<'a>(&self, name: &'a str) -> Cow<'a, str> {
        substitute(
            self.dotted.iter().map(|(s, t)| (s.as_str(), t.as_str())),
            name,
        )
    }

    /// Whether a class with this internal name belongs to a renamed namespace.
    pub fn is_in_source_namespace(&self, internal_name: &str) -> bool {
        self.relocations
            .iter()
            .any(|r| internal_name.starts_with(r.source.as_str()))
    }
}

fn substitute<'a, 'p>(
    pairs: impl Iterator<Item = (&'p str, &'p str)>,
    input: &'a str,
) -> Cow<'a, str> {
    let mut current = Cow::Borrowed(input);
    for (source, target) in pairs {
        if current.contains(source) {
            current = Cow::Owned(current.replace(source, target));
        }
    }
    current
}

impl NameRemapper for NameMapper {
    fn remap<'a>(&self, internal_name: &'a str) -> Cow<'a, str> {
        self.map_binary(internal_name)
    }

    fn original_names(&self, internal_name: &str) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for relocation in &self.relocations {
            if internal_name.contains(relocation.target.as_str()) {
                let original = internal_name.replace(relocation.target.as_str(), &relocation.source);
                if !names.contains(&original) {
                    names.push(original);
                }
            }
        }
        names
    }
}
