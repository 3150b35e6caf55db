use relocator_classfile::ClassHeader;

use crate::OBJECT;

/// The structural facts about a type that hierarchy queries need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeMetadata {
    pub name: String,
    /// `None` only for `java/lang/Object`.
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub is_interface: bool,
}

impl TypeMetadata {
    /// Stand-in for a type whose bytes are unavailable: a plain class
    /// extending `java/lang/Object`.
    pub fn fallback(name: &str) -> Self {
        Self {
            name: name.to_string(),
            super_name: (name != OBJECT).then(|| OBJECT.to_string()),
            interfaces: Vec::new(),
            is_interface: false,
        }
    }

    pub fn from_header(header: &ClassHeader) -> Self {
        Self {
            name: header.this_class.clone(),
            super_name: header.super_class.clone(),
            interfaces: header.interfaces.clone(),
            is_interface: header.is_interface(),
        }
    }
}
