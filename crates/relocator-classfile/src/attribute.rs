use crate::annotation::{
    len_u16, parse_annotations, parse_type_annotations, Annotation, ElementValue, TypeAnnotation,
};
use crate::code::Code;
use crate::constant::Constant;
use crate::constant_pool::ConstantPool;
use crate::error::{Error, Result};
use crate::reader::{ByteWriter, Reader};
use crate::symbol_table::SymbolTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Visibility {
    Visible,
    Invisible,
}

impl Visibility {
    pub(crate) fn annotations_name(self) -> &'static str {
        match self {
            Visibility::Visible => "RuntimeVisibleAnnotations",
            Visibility::Invisible => "RuntimeInvisibleAnnotations",
        }
    }

    pub(crate) fn parameter_annotations_name(self) -> &'static str {
        match self {
            Visibility::Visible => "RuntimeVisibleParameterAnnotations",
            Visibility::Invisible => "RuntimeInvisibleParameterAnnotations",
        }
    }

    pub(crate) fn type_annotations_name(self) -> &'static str {
        match self {
            Visibility::Visible => "RuntimeVisibleTypeAnnotations",
            Visibility::Invisible => "RuntimeInvisibleTypeAnnotations",
        }
    }
}

/// An attribute this crate does not model; written back byte for byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAttribute {
    pub name: String,
    pub info: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordComponent {
    pub name: String,
    pub descriptor: String,
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InnerClass {
    pub inner_class: String,
    pub outer_class: Option<String>,
    pub inner_name: Option<String>,
    pub access_flags: u16,
}

/// Attributes of a class, field, method or record component.
#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    Signature(String),
    ConstantValue(Constant),
    Exceptions(Vec<String>),
    Annotations {
        visibility: Visibility,
        annotations: Vec<Annotation>,
    },
    ParameterAnnotations {
        visibility: Visibility,
        parameters: Vec<Vec<Annotation>>,
    },
    TypeAnnotations {
        visibility: Visibility,
        annotations: Vec<TypeAnnotation>,
    },
    AnnotationDefault(ElementValue),
    Record(Vec<RecordComponent>),
    InnerClasses(Vec<InnerClass>),
    EnclosingMethod {
        class: String,
        /// `(name, descriptor)` when enclosed by a method or constructor.
        method: Option<(String, String)>,
    },
    NestHost(String),
    NestMembers(Vec<String>),
    PermittedSubclasses(Vec<String>),
    Code(Box<Code>),
    /// Position of the class-level bootstrap method table; its content is
    /// regenerated from the symbol table when writing.
    BootstrapMethods,
    Unknown(RawAttribute),
}

pub(crate) fn parse_attributes(reader: &mut Reader<'_>, cp: &ConstantPool) -> Result<Vec<Attribute>> {
    let count = reader.read_u2()? as usize;
    let mut attributes = Vec::with_capacity(count);
    for _ in 0..count {
        let name_index = reader.read_u2()?;
        let length = reader.read_u4()? as usize;
        let info = reader.read_bytes(length)?;
        let name = cp.get_utf8(name_index)?;
        attributes.push(parse_attribute(name, info, cp)?);
    }
    Ok(attributes)
}

fn parse_attribute(name: &str, info: &[u8], cp: &ConstantPool) -> Result<Attribute> {
    let mut sub = Reader::new(info);
    let attribute = match name {
        "Signature" => Attribute::Signature(cp.get_utf8(sub.read_u2()?)?.to_string()),
        "ConstantValue" => Attribute::ConstantValue(cp.get_constant(sub.read_u2()?)?),
        "Exceptions" => Attribute::Exceptions(parse_class_list(&mut sub, cp)?),
        "RuntimeVisibleAnnotations" => Attribute::Annotations {
            visibility: Visibility::Visible,
            annotations: parse_annotations(&mut sub, cp)?,
        },
        "RuntimeInvisibleAnnotations" => Attribute::Annotations {
            visibility: Visibility::Invisible,
            annotations: parse_annotations(&mut sub, cp)?,
        },
        "RuntimeVisibleParameterAnnotations" | "RuntimeInvisibleParameterAnnotations" => {
            let visibility = if name.starts_with("RuntimeVisible") {
                Visibility::Visible
            } else {
                Visibility::Invisible
            };
            let count = sub.read_u1()? as usize;
            let mut parameters = Vec::with_capacity(count);
            for _ in 0..count {
                parameters.push(parse_annotations(&mut sub, cp)?);
            }
            Attribute::ParameterAnnotations {
                visibility,
                parameters,
            }
        }
        "RuntimeVisibleTypeAnnotations" => Attribute::TypeAnnotations {
            visibility: Visibility::Visible,
            annotations: parse_type_annotations(&mut sub, cp)?,
        },
        "RuntimeInvisibleTypeAnnotations" => Attribute::TypeAnnotations {
            visibility: Visibility::Invisible,
            annotations: parse_type_annotations(&mut sub, cp)?,
        },
        "AnnotationDefault" => Attribute::AnnotationDefault(ElementValue::parse(&mut sub, cp)?),
        "Record" => {
            let count = sub.read_u2()? as usize;
            let mut components = Vec::with_capacity(count);
            for _ in 0..count {
                let name = cp.get_utf8(sub.read_u2()?)?.to_string();
                let descriptor = cp.get_utf8(sub.read_u2()?)?.to_string();
                let attributes = parse_attributes(&mut sub, cp)?;
                components.push(RecordComponent {
                    name,
                    descriptor,
                    attributes,
                });
            }
            Attribute::Record(components)
        }
        "InnerClasses" => {
            let count = sub.read_u2()? as usize;
            let mut inners = Vec::with_capacity(count);
            for _ in 0..count {
                inners.push(InnerClass {
                    inner_class: cp.get_class_name(sub.read_u2()?)?,
                    outer_class: cp.get_optional_class_name(sub.read_u2()?)?,
                    inner_name: cp.get_optional_utf8(sub.read_u2()?)?,
                    access_flags: sub.read_u2()?,
                });
            }
            Attribute::InnerClasses(inners)
        }
        "EnclosingMethod" => {
            let class = cp.get_class_name(sub.read_u2()?)?;
            let method_index = sub.read_u2()?;
            let method = if method_index == 0 {
                None
            } else {
                Some(cp.get_name_and_type(method_index)?)
            };
            Attribute::EnclosingMethod { class, method }
        }
        "NestHost" => Attribute::NestHost(cp.get_class_name(sub.read_u2()?)?),
        "NestMembers" => Attribute::NestMembers(parse_class_list(&mut sub, cp)?),
        "PermittedSubclasses" => Attribute::PermittedSubclasses(parse_class_list(&mut sub, cp)?),
        "Code" => return Ok(Attribute::Code(Box::new(Code::parse(info, cp)?))),
        "BootstrapMethods" => return Ok(Attribute::BootstrapMethods),
        _ => {
            return Ok(Attribute::Unknown(RawAttribute {
                name: name.to_string(),
                info: info.to_vec(),
            }))
        }
    };
    sub.ensure_empty()
        .map_err(|_| Error::MalformedAttribute(static_name(name)))?;
    Ok(attribute)
}

fn static_name(name: &str) -> &'static str {
    match name {
        "Signature" => "Signature",
        "ConstantValue" => "ConstantValue",
        "Exceptions" => "Exceptions",
        "Record" => "Record",
        "InnerClasses" => "InnerClasses",
        "EnclosingMethod" => "EnclosingMethod",
        "NestHost" => "NestHost",
        "NestMembers" => "NestMembers",
        "PermittedSubclasses" => "PermittedSubclasses",
        "AnnotationDefault" => "AnnotationDefault",
        _ => "annotation",
    }
}

fn parse_class_list(reader: &mut Reader<'_>, cp: &ConstantPool) -> Result<Vec<String>> {
    let count = reader.read_u2()? as usize;
    let mut names = Vec::with_capacity(count);
    for _ in 0..count {
        names.push(cp.get_class_name(reader.read_u2()?)?);
    }
    Ok(names)
}

fn write_class_list(names: &[String], out: &mut ByteWriter, symbols: &mut SymbolTable) -> Result<()> {
    out.u2(len_u16(names.len())?);
    for name in names {
        out.u2(symbols.class(name)?);
    }
    Ok(())
}

pub(crate) fn write_annotations(
    annotations: &[Annotation],
    out: &mut ByteWriter,
    symbols: &mut SymbolTable,
) -> Result<()> {
    out.u2(len_u16(annotations.len())?);
    for annotation in annotations {
        annotation.write(out, symbols)?;
    }
    Ok(())
}

/// Writes a complete attribute list. `BootstrapMethods` placeholders are
/// rejected here; the class writer handles them.
pub(crate) fn write_attributes(
    attributes: &[Attribute],
    out: &mut ByteWriter,
    symbols: &mut SymbolTable,
) -> Result<()> {
    out.u2(len_u16(attributes.len())?);
    for attribute in attributes {
        let (name_index, body) = write_attribute(attribute, symbols)?;
        out.attribute(name_index, &body)?;
    }
    Ok(())
}

/// Encodes one attribute, returning its name index and body.
pub(crate) fn write_attribute(attribute: &Attribute, symbols: &mut SymbolTable) -> Result<(u16, Vec<u8>)> {
    let mut body = ByteWriter::new();
    let name = match attribute {
        Attribute::Signature(signature) => {
            body.u2(symbols.utf8(signature)?);
            "Signature"
        }
        Attribute::ConstantValue(constant) => {
            body.u2(symbols.constant(constant)?);
            "ConstantValue"
        }
        Attribute::Exceptions(names) => {
            write_class_list(names, &mut body, symbols)?;
            "Exceptions"
        }
        Attribute::Annotations {
            visibility,
            annotations,
        } => {
            write_annotations(annotations, &mut body, symbols)?;
            visibility.annotations_name()
        }
        Attribute::ParameterAnnotations {
            visibility,
            parameters,
        } => {
            body.u1(u8::try_from(parameters.len())
                .map_err(|_| Error::MalformedAttribute("parameter annotations"))?);
            for annotations in parameters {
                write_annotations(annotations, &mut body, symbols)?;
            }
            visibility.parameter_annotations_name()
        }
        Attribute::TypeAnnotations {
            visibility,
            annotations,
        } => {
            body.u2(len_u16(annotations.len())?);
            for annotation in annotations {
                annotation.write(&mut body, symbols, &|offset| offset)?;
            }
            visibility.type_annotations_name()
        }
        Attribute::AnnotationDefault(value) => {
            value.write(&mut body, symbols)?;
            "AnnotationDefault"
        }
        Attribute::Record(components) => {
            body.u2(len_u16(components.len())?);
            for component in components {
                body.u2(symbols.utf8(&component.name)?);
                body.u2(symbols.utf8(&component.descriptor)?);
                write_attributes(&component.attributes, &mut body, symbols)?;
            }
            "Record"
        }
        Attribute::InnerClasses(inners) => {
            body.u2(len_u16(inners.len())?);
            for inner in inners {
                body.u2(symbols.class(&inner.inner_class)?);
                match &inner.outer_class {
                    Some(outer) => body.u2(symbols.class(outer)?),
                    None => body.u2(0),
                }
                match &inner.inner_name {
                    Some(name) => body.u2(symbols.utf8(name)?),
                    None => body.u2(0),
                }
                body.u2(inner.access_flags);
            }
            "InnerClasses"
        }
        Attribute::EnclosingMethod { class, method } => {
            body.u2(symbols.class(class)?);
            match method {
                Some((name, descriptor)) => body.u2(symbols.name_and_type(name, descriptor)?),
                None => body.u2(0),
            }
            "EnclosingMethod"
        }
        Attribute::NestHost(host) => {
            body.u2(symbols.class(host)?);
            "NestHost"
        }
        Attribute::NestMembers(names) => {
            write_class_list(names, &mut body, symbols)?;
            "NestMembers"
        }
        Attribute::PermittedSubclasses(names) => {
            write_class_list(names, &mut body, symbols)?;
            "PermittedSubclasses"
        }
        Attribute::Code(code) => {
            body.bytes(&code.write(symbols)?);
            "Code"
        }
        Attribute::BootstrapMethods => {
            return Err(Error::Other("BootstrapMethods outside the class attribute list"))
        }
        Attribute::Unknown(raw) => {
            body.bytes(&raw.info);
            raw.name.as_str()
        }
    };
    let name_index = symbols.utf8(name)?;
    Ok((name_index, body.into_vec()))
}
