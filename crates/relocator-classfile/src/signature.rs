//! Generic signature grammars (JVMS 4.7.9.1).
//!
//! Class signatures are compound (type parameters, superclass and
//! interfaces); field and local variable signatures are a single reference
//! type; method signatures add parameters, a return type and throws clauses.

use std::fmt;

use crate::descriptor::BaseType;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassSignature {
    pub type_parameters: Vec<TypeParameter>,
    pub super_class: ClassTypeSignature,
    pub interfaces: Vec<ClassTypeSignature>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSignature {
    pub type_parameters: Vec<TypeParameter>,
    pub parameters: Vec<TypeSignature>,
    /// `None` for `void`.
    pub return_type: Option<TypeSignature>,
    pub throws: Vec<TypeSignature>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeParameter {
    pub name: String,
    pub class_bound: Option<TypeSignature>,
    pub interface_bounds: Vec<TypeSignature>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeSignature {
    Base(BaseType),
    Array(Box<TypeSignature>),
    Class(ClassTypeSignature),
    TypeVariable(String),
}

/// `Lpkg/Outer<..>.Inner<..>;`. The first segment carries the full internal
/// name, later segments carry simple inner class names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassTypeSignature {
    pub segments: Vec<SimpleClassTypeSignature>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleClassTypeSignature {
    pub name: String,
    pub type_arguments: Vec<TypeArgument>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeArgument {
    Any,
    Exact(TypeSignature),
    Extends(TypeSignature),
    Super(TypeSignature),
}

impl ClassTypeSignature {
    /// Internal name of the (possibly nested) class, `Outer$Inner` style.
    pub fn internal_name(&self) -> String {
        let mut name = String::new();
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                name.push('$');
            }
            name.push_str(&segment.name);
        }
        name
    }

    /// Visits every class name segment, outermost first, including those in
    /// type arguments.
    pub fn visit_class_names(&mut self, f: &mut impl FnMut(&mut String)) {
        for segment in &mut self.segments {
            f(&mut segment.name);
            for arg in &mut segment.type_arguments {
                match arg {
                    TypeArgument::Any => {}
                    TypeArgument::Exact(ty) | TypeArgument::Extends(ty) | TypeArgument::Super(ty) => {
                        ty.visit_class_names(f)
                    }
                }
            }
        }
    }
}

impl TypeSignature {
    pub fn visit_class_names(&mut self, f: &mut impl FnMut(&mut String)) {
        match self {
            TypeSignature::Base(_) | TypeSignature::TypeVariable(_) => {}
            TypeSignature::Array(component) => component.visit_class_names(f),
            TypeSignature::Class(class) => class.visit_class_names(f),
        }
    }
}

impl TypeParameter {
    fn visit_class_names(&mut self, f: &mut impl FnMut(&mut String)) {
        if let Some(bound) = &mut self.class_bound {
            bound.visit_class_names(f);
        }
        for bound in &mut self.interface_bounds {
            bound.visit_class_names(f);
        }
    }
}

impl ClassSignature {
    pub fn visit_class_names(&mut self, f: &mut impl FnMut(&mut String)) {
        for param in &mut self.type_parameters {
            param.visit_class_names(f);
        }
        self.super_class.visit_class_names(f);
        for iface in &mut self.interfaces {
            iface.visit_class_names(f);
        }
    }
}

impl MethodSignature {
    pub fn visit_class_names(&mut self, f: &mut impl FnMut(&mut String)) {
        for param in &mut self.type_parameters {
            param.visit_class_names(f);
        }
        for ty in &mut self.parameters {
            ty.visit_class_names(f);
        }
        if let Some(ret) = &mut self.return_type {
            ret.visit_class_names(f);
        }
        for ty in &mut self.throws {
            ty.visit_class_names(f);
        }
    }
}

pub fn parse_class_signature(signature: &str) -> Result<ClassSignature> {
    let mut parser = Parser::new(signature);
    let type_parameters = parser.type_parameters()?;
    let super_class = parser.class_type()?;
    let mut interfaces = Vec::new();
    while !parser.at_end() {
        interfaces.push(parser.class_type()?);
    }
    Ok(ClassSignature {
        type_parameters,
        super_class,
        interfaces,
    })
}

pub fn parse_method_signature(signature: &str) -> Result<MethodSignature> {
    let mut parser = Parser::new(signature);
    let type_parameters = parser.type_parameters()?;
    parser.expect(b'(')?;
    let mut parameters = Vec::new();
    while parser.peek()? != b')' {
        parameters.push(parser.type_signature()?);
    }
    parser.expect(b')')?;
    let return_type = if parser.peek()? == b'V' {
        parser.bump();
        None
    } else {
        Some(parser.type_signature()?)
    };
    let mut throws = Vec::new();
    while !parser.at_end() {
        parser.expect(b'^')?;
        let thrown = match parser.peek()? {
            b'L' | b'T' => parser.type_signature()?,
            _ => return Err(parser.error()),
        };
        throws.push(thrown);
    }
    Ok(MethodSignature {
        type_parameters,
        parameters,
        return_type,
        throws,
    })
}

/// Field, record component and local variable signatures: a single
/// reference type.
pub fn parse_field_signature(signature: &str) -> Result<TypeSignature> {
    let mut parser = Parser::new(signature);
    let ty = parser.type_signature()?;
    if !parser.at_end() {
        return Err(parser.error());
    }
    Ok(ty)
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn error(&self) -> Error {
        Error::InvalidSignature(self.input.to_string())
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn peek(&self) -> Result<u8> {
        self.input
            .as_bytes()
            .get(self.pos)
            .copied()
            .ok_or_else(|| self.error())
    }

    fn bump(&mut self) {
        self.pos += 1;
    }

    fn expect(&mut self, byte: u8) -> Result<()> {
        if self.peek()? != byte {
            return Err(self.error());
        }
        self.bump();
        Ok(())
    }

    /// Reads up to (not including) the first byte in `stops`.
    fn identifier(&mut self, stops: &[u8]) -> Result<&'a str> {
        let rest = &self.input[self.pos..];
        let len = rest
            .bytes()
            .position(|b| stops.contains(&b))
            .ok_or_else(|| self.error())?;
        if len == 0 {
            return Err(self.error());
        }
        self.pos += len;
        Ok(&rest[..len])
    }

    fn type_parameters(&mut self) -> Result<Vec<TypeParameter>> {
        let mut params = Vec::new();
        if self.at_end() || self.peek()? != b'<' {
            return Ok(params);
        }
        self.bump();
        while self.peek()? != b'>' {
            let name = self.identifier(b":")?.to_string();
            self.expect(b':')?;
            let class_bound = match self.peek()? {
                b':' => None,
                _ => Some(self.reference_type()?),
            };
            let mut interface_bounds = Vec::new();
            while self.peek()? == b':' {
                self.bump();
                interface_bounds.push(self.reference_type()?);
            }
            params.push(TypeParameter {
                name,
                class_bound,
                interface_bounds,
            });
        }
        self.bump();
        if params.is_empty() {
            return Err(self.error());
        }
        Ok(params)
    }

    fn reference_type(&mut self) -> Result<TypeSignature> {
        match self.peek()? {
            b'L' | b'T' | b'[' => self.type_signature(),
            _ => Err(self.error()),
        }
    }

    fn type_signature(&mut self) -> Result<TypeSignature> {
        let ty = match self.peek()? {
            b'B' => TypeSignature::Base(BaseType::Byte),
            b'C' => TypeSignature::Base(BaseType::Char),
            b'D' => TypeSignature::Base(BaseType::Double),
            b'F' => TypeSignature::Base(BaseType::Float),
            b'I' => TypeSignature::Base(BaseType::Int),
            b'J' => TypeSignature::Base(BaseType::Long),
            b'S' => TypeSignature::Base(BaseType::Short),
            b'Z' => TypeSignature::Base(BaseType::Boolean),
            b'[' => {
                self.bump();
                return Ok(TypeSignature::Array(Box::new(self.type_signature()?)));
            }
            b'T' => {
                self.bump();
                let name = self.identifier(b";")?.to_string();
                self.expect(b';')?;
                return Ok(TypeSignature::TypeVariable(name));
            }
            b'L' => return Ok(TypeSignature::Class(self.class_type()?)),
            _ => return Err(self.error()),
        };
        self.bump();
        Ok(ty)
    }

    fn class_type(&mut self) -> Result<ClassTypeSignature> {
        self.expect(b'L')?;
        let mut segments = Vec::new();
        loop {
            let name = self.identifier(b"<.;")?.to_string();
            let type_arguments = self.type_arguments()?;
            segments.push(SimpleClassTypeSignature {
                name,
                type_arguments,
            });
            match self.peek()? {
                b'.' => self.bump(),
                b';' => {
                    self.bump();
                    return Ok(ClassTypeSignature { segments });
                }
                _ => return Err(self.error()),
            }
        }
    }

    fn type_arguments(&mut self) -> Result<Vec<TypeArgument>> {
        let mut args = Vec::new();
        if self.peek()? != b'<' {
            return Ok(args);
        }
        self.bump();
        while self.peek()? != b'>' {
            let arg = match self.peek()? {
                b'*' => {
                    self.bump();
                    TypeArgument::Any
                }
                b'+' => {
                    self.bump();
                    TypeArgument::Extends(self.reference_type()?)
                }
                b'-' => {
                    self.bump();
                    TypeArgument::Super(self.reference_type()?)
                }
                _ => TypeArgument::Exact(self.reference_type()?),
            };
            args.push(arg);
        }
        self.bump();
        if args.is_empty() {
            return Err(self.error());
        }
        Ok(args)
    }
}

impl fmt::Display for TypeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeSignature::Base(base) => {
                let ch = match base {
                    BaseType::Byte => 'B',
                    BaseType::Char => 'C',
                    BaseType::Double => 'D',
                    BaseType::Float => 'F',
                    BaseType::Int => 'I',
                    BaseType::Long => 'J',
                    BaseType::Short => 'S',
                    BaseType::Boolean => 'Z',
                };
                write!(f, "{ch}")
            }
            TypeSignature::Array(component) => write!(f, "[{component}"),
            TypeSignature::Class(class) => write!(f, "{class}"),
            TypeSignature::TypeVariable(name) => write!(f, "T{name};"),
        }
    }
}

impl fmt::Display for ClassTypeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("L")?;
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            f.write_str(&segment.name)?;
            if !segment.type_arguments.is_empty() {
                f.write_str("<")?;
                for arg in &segment.type_arguments {
                    match arg {
                        TypeArgument::Any => f.write_str("*")?,
                        TypeArgument::Exact(ty) => write!(f, "{ty}")?,
                        TypeArgument::Extends(ty) => write!(f, "+{ty}")?,
                        TypeArgument::Super(ty) => write!(f, "-{ty}")?,
                    }
                }
                f.write_str(">")?;
            }
        }
        f.write_str(";")
    }
}

fn write_type_parameters(f: &mut fmt::Formatter<'_>, params: &[TypeParameter]) -> fmt::Result {
    if params.is_empty() {
        return Ok(());
    }
    f.write_str("<")?;
    for param in params {
        write!(f, "{}:", param.name)?;
        if let Some(bound) = &param.class_bound {
            write!(f, "{bound}")?;
        }
        for bound in &param.interface_bounds {
            write!(f, ":{bound}")?;
        }
    }
    f.write_str(">")
}

impl fmt::Display for ClassSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_type_parameters(f, &self.type_parameters)?;
        write!(f, "{}", self.super_class)?;
        for iface in &self.interfaces {
            write!(f, "{iface}")?;
        }
        Ok(())
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_type_parameters(f, &self.type_parameters)?;
        f.write_str("(")?;
        for param in &self.parameters {
            write!(f, "{param}")?;
        }
        f.write_str(")")?;
        match &self.return_type {
            Some(ret) => write!(f, "{ret}")?,
            None => f.write_str("V")?,
        }
        for thrown in &self.throws {
            write!(f, "^{thrown}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_signature_with_bounded_type_parameters() {
        let text = "<T:Ljava/lang/Object;:Ljavax/servlet/Filter;>Ljava/lang/Object;Ljava/util/Map<TT;Ljava/lang/String;>;";
        let sig = parse_class_signature(text).unwrap();
        assert_eq!(sig.type_parameters.len(), 1);
        assert_eq!(sig.type_parameters[0].interface_bounds.len(), 1);
        assert_eq!(sig.interfaces.len(), 1);
        assert_eq!(sig.to_string(), text);
    }

    #[test]
    fn interface_only_bound_has_no_class_bound() {
        let sig = parse_class_signature("<T::Ljava/lang/Comparable<TT;>;>Ljava/lang/Object;").unwrap();
        assert_eq!(sig.type_parameters[0].class_bound, None);
    }

    #[test]
    fn field_signature_with_inner_class_and_wildcards() {
        let text = "Ljava/util/Map<+Ljavax/servlet/Servlet;*>.Entry<-TK;[I>;";
        let ty = parse_field_signature(text).unwrap();
        let TypeSignature::Class(class) = &ty else {
            panic!("expected class type");
        };
        assert_eq!(class.internal_name(), "java/util/Map$Entry");
        assert_eq!(ty.to_string(), text);
    }

    #[test]
    fn method_signature_with_throws() {
        let text = "<E:Ljava/lang/Exception;>(Ljava/util/List<Ljavax/servlet/Filter;>;I)V^TE;^Ljavax/servlet/ServletException;";
        let mut sig = parse_method_signature(text).unwrap();
        assert_eq!(sig.throws.len(), 2);
        let mut names = Vec::new();
        sig.visit_class_names(&mut |name| names.push(name.clone()));
        assert_eq!(
            names,
            vec![
                "java/lang/Exception",
                "java/util/List",
                "javax/servlet/Filter",
                "javax/servlet/ServletException"
            ]
        );
        assert_eq!(sig.to_string(), text);
    }

    #[test]
    fn rejects_trailing_garbage_in_field_signature() {
        assert!(parse_field_signature("Ljava/lang/String;X").is_err());
        assert!(parse_field_signature("Ljava/util/List<>;").is_err());
    }
}
