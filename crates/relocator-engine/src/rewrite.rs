//! The reference-site pass: applies the [`NameMapper`] to every place in a
//! class file that can name a type.

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};

use relocator_classfile::{
    parse_class_signature, parse_field_signature, parse_method_signature, Annotation, Attribute,
    BootstrapMethod, ClassFile, Code, CodeAttribute, ConstValue, Constant, ElementValue, Handle,
    Insn, MemberRef, TargetInfo, TypeAnnotation, VerificationType, Visibility,
};

use crate::mapper::NameMapper;

/// Which generic signature grammar a `Signature` attribute follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignatureKind {
    Class,
    Method,
    /// Fields, record components and local variables.
    Field,
}

type TypeAnnotationKey = (u8, TargetInfo, Vec<(u8, u8)>, String);

/// Annotation descriptors already emitted on one owner: a class, a field, a
/// method, a record component or a code body. Visible and invisible
/// annotations share the sets.
#[derive(Debug, Default)]
struct EmittedAnnotations {
    declared: HashSet<String>,
    type_uses: HashSet<TypeAnnotationKey>,
    parameters: HashMap<usize, HashSet<String>>,
}

/// Result of rewriting one class.
#[derive(Debug)]
pub(crate) struct Rewritten {
    pub(crate) class: ClassFile,
    /// Number of reference sites whose value changed.
    pub(crate) sites: usize,
}

pub(crate) struct Rewriter<'m> {
    mapper: &'m NameMapper,
    module: String,
    sites: usize,
}

impl<'m> Rewriter<'m> {
    pub(crate) fn new(mapper: &'m NameMapper, module: &str) -> Self {
        Self {
            mapper,
            module: module.to_string(),
            sites: 0,
        }
    }

    pub(crate) fn rewrite(mut self, mut class: ClassFile) -> Rewritten {
        self.binary(&mut class.this_class);
        if let Some(super_class) = &mut class.super_class {
            self.binary(super_class);
        }
        for interface in &mut class.interfaces {
            self.binary(interface);
        }
        dedup_in_order(&mut class.interfaces);
        self.attributes(&mut class.attributes, SignatureKind::Class);

        for field in &mut class.fields {
            self.binary(&mut field.descriptor);
            self.attributes(&mut field.attributes, SignatureKind::Field);
        }
        for method in &mut class.methods {
            self.binary(&mut method.descriptor);
            self.attributes(&mut method.attributes, SignatureKind::Method);
        }

        Rewritten {
            class,
            sites: self.sites,
        }
    }

    fn binary(&mut self, value: &mut String) {
        if let Cow::Owned(mapped) = self.mapper.map_binary(value) {
            *value = mapped;
            self.sites += 1;
        }
    }

    fn dotted(&mut self, value: &mut String) {
        if let Cow::Owned(mapped) = self.mapper.map_dotted(value) {
            *value = mapped;
            self.sites += 1;
        }
    }

    fn signature(&mut self, signature: &mut String, kind: SignatureKind) {
        if !matches!(self.mapper.map_binary(signature), Cow::Owned(_)) {
            return;
        }
        let mapper = self.mapper;
        let mut map_name = |name: &mut String| {
            if let Cow::Owned(mapped) = mapper.map_binary(name) {
                *name = mapped;
            }
        };
        let rendered = match kind {
            SignatureKind::Class => parse_class_signature(signature).map(|mut parsed| {
                parsed.visit_class_names(&mut map_name);
                parsed.to_string()
            }),
            SignatureKind::Method => parse_method_signature(signature).map(|mut parsed| {
                parsed.visit_class_names(&mut map_name);
                parsed.to_string()
            }),
            SignatureKind::Field => parse_field_signature(signature).map(|mut parsed| {
                parsed.visit_class_names(&mut map_name);
                parsed.to_string()
            }),
        };
        match rendered {
            Ok(rendered) => {
                if rendered != *signature {
                    *signature = rendered;
                    self.sites += 1;
                }
            }
            Err(err) => {
                tracing::debug!(
                    target: "relocator.engine",
                    module = %self.module,
                    signature = %signature,
                    error = %err,
                    "unparsable signature; mapping it as plain text"
                );
                self.binary(signature);
            }
        }
    }

    fn attributes(&mut self, attributes: &mut Vec<Attribute>, kind: SignatureKind) {
        let mut emitted = EmittedAnnotations::default();
        let mut emptied = Vec::new();
        for index in visible_first(attributes.len(), |i| attribute_visibility(&attributes[i])) {
            if self.attribute(&mut attributes[index], kind, &mut emitted) {
                emptied.push(index);
            }
        }
        emptied.sort_unstable();
        for index in emptied.into_iter().rev() {
            attributes.remove(index);
        }
        debug_assert!(
            annotations_are_unique(attributes),
            "{}: an owner kept the same annotation twice",
            self.module
        );
    }

    /// Returns whether the attribute lost all of its annotations to
    /// deduplication and should be dropped.
    fn attribute(
        &mut self,
        attribute: &mut Attribute,
        kind: SignatureKind,
        emitted: &mut EmittedAnnotations,
    ) -> bool {
        match attribute {
            Attribute::Signature(signature) => self.signature(signature, kind),
            Attribute::ConstantValue(Constant::String(value)) => self.dotted(value),
            Attribute::ConstantValue(_) => {}
            Attribute::Exceptions(exceptions) => {
                for exception in exceptions.iter_mut() {
                    self.binary(exception);
                }
                dedup_in_order(exceptions);
            }
            Attribute::Annotations { annotations, .. } => {
                let before = annotations.len();
                self.annotations(annotations, &mut emitted.declared);
                return before > 0 && annotations.is_empty();
            }
            Attribute::ParameterAnnotations { parameters, .. } => {
                for (index, annotations) in parameters.iter_mut().enumerate() {
                    let seen = emitted.parameters.entry(index).or_default();
                    self.annotations(annotations, seen);
                }
            }
            Attribute::TypeAnnotations { annotations, .. } => {
                let before = annotations.len();
                self.type_annotations(annotations, &mut emitted.type_uses);
                return before > 0 && annotations.is_empty();
            }
            Attribute::AnnotationDefault(value) => self.element_value(value),
            Attribute::Record(components) => {
                for component in components {
                    self.binary(&mut component.descriptor);
                    self.attributes(&mut component.attributes, SignatureKind::Field);
                }
            }
            Attribute::InnerClasses(classes) => {
                for class in classes {
                    self.binary(&mut class.inner_class);
                    if let Some(outer) = &mut class.outer_class {
                        self.binary(outer);
                    }
                }
            }
            Attribute::EnclosingMethod { class, method } => {
                self.binary(class);
                if let Some((_, descriptor)) = method {
                    self.binary(descriptor);
                }
            }
            Attribute::NestHost(host) => self.binary(host),
            Attribute::NestMembers(classes) | Attribute::PermittedSubclasses(classes) => {
                for class in classes {
                    self.binary(class);
                }
            }
            Attribute::Code(code) => self.code(code),
            Attribute::BootstrapMethods | Attribute::Unknown(_) => {}
        }
        false
    }

    fn annotations(&mut self, annotations: &mut Vec<Annotation>, emitted: &mut HashSet<String>) {
        annotations.retain_mut(|annotation| {
            self.annotation(annotation);
            if emitted.insert(annotation.type_descriptor.clone()) {
                return true;
            }
            tracing::trace!(
                target: "relocator.engine",
                module = %self.module,
                annotation = %annotation.type_descriptor,
                "dropping annotation that collides after renaming"
            );
            false
        });
    }

    fn type_annotations(
        &mut self,
        annotations: &mut Vec<TypeAnnotation>,
        emitted: &mut HashSet<TypeAnnotationKey>,
    ) {
        annotations.retain_mut(|type_annotation| {
            self.annotation(&mut type_annotation.annotation);
            let key = (
                type_annotation.target_type,
                type_annotation.target.clone(),
                type_annotation.target_path.clone(),
                type_annotation.annotation.type_descriptor.clone(),
            );
            if emitted.insert(key) {
                return true;
            }
            tracing::trace!(
                target: "relocator.engine",
                module = %self.module,
                annotation = %type_annotation.annotation.type_descriptor,
                "dropping type annotation that collides after renaming"
            );
            false
        });
    }

    fn annotation(&mut self, annotation: &mut Annotation) {
        self.binary(&mut annotation.type_descriptor);
        for (_, value) in &mut annotation.elements {
            self.element_value(value);
        }
    }

    fn element_value(&mut self, value: &mut ElementValue) {
        match value {
            ElementValue::Const(ConstValue::String(text)) => self.dotted(text),
            ElementValue::Const(_) => {}
            ElementValue::Enum {
                type_descriptor, ..
            } => self.binary(type_descriptor),
            ElementValue::Class(descriptor) => self.binary(descriptor),
            ElementValue::Annotation(nested) => self.annotation(nested),
            ElementValue::Array(values) => {
                for value in values {
                    self.element_value(value);
                }
            }
        }
    }

    fn code(&mut self, code: &mut Code) {
        for instruction in &mut code.instructions {
            self.instruction(&mut instruction.insn);
        }
        for handler in &mut code.exception_table {
            if let Some(catch_type) = &mut handler.catch_type {
                self.binary(catch_type);
            }
        }

        let mut emitted = HashSet::new();
        let attributes = &mut code.attributes;
        let order = visible_first(attributes.len(), |i| match &attributes[i] {
            CodeAttribute::TypeAnnotations { visibility, .. } => Some(*visibility),
            _ => None,
        });
        for index in order {
            match &mut attributes[index] {
                CodeAttribute::StackMapTable(frames) => {
                    for frame in frames {
                        frame.visit_types_mut(&mut |ty| {
                            if let VerificationType::Object(name) = ty {
                                self.binary(name);
                            }
                        });
                    }
                }
                CodeAttribute::LocalVariableTable(variables) => {
                    for variable in variables {
                        self.binary(&mut variable.descriptor);
                    }
                }
                CodeAttribute::LocalVariableTypeTable(variables) => {
                    for variable in variables {
                        self.signature(&mut variable.descriptor, SignatureKind::Field);
                    }
                }
                CodeAttribute::TypeAnnotations { annotations, .. } => {
                    self.type_annotations(annotations, &mut emitted);
                }
                CodeAttribute::LineNumberTable(_) | CodeAttribute::Unknown(_) => {}
            }
        }
        code.attributes.retain(|attribute| {
            !matches!(attribute, CodeAttribute::TypeAnnotations { annotations, .. } if annotations.is_empty())
        });
    }

    fn instruction(&mut self, insn: &mut Insn) {
        match insn {
            Insn::Type { class, .. } | Insn::MultiANewArray { class, .. } => self.binary(class),
            Insn::Field { field: member, .. } | Insn::Method { method: member, .. } => {
                self.member(member)
            }
            Insn::Ldc { constant, .. } => self.constant(constant),
            Insn::InvokeDynamic {
                descriptor,
                bootstrap,
                ..
            } => {
                self.binary(descriptor);
                self.bootstrap(bootstrap);
            }
            _ => {}
        }
    }

    fn member(&mut self, member: &mut MemberRef) {
        self.binary(&mut member.owner);
        self.binary(&mut member.descriptor);
    }

    fn handle(&mut self, handle: &mut Handle) {
        self.binary(&mut handle.owner);
        self.binary(&mut handle.descriptor);
    }

    /// Loadable constants, recursing through dynamic constants.
    fn constant(&mut self, constant: &mut Constant) {
        match constant {
            Constant::String(text) => self.dotted(text),
            Constant::Class(name) | Constant::MethodType(name) => self.binary(name),
            Constant::MethodHandle(handle) => self.handle(handle),
            Constant::Dynamic(dynamic) => {
                self.binary(&mut dynamic.descriptor);
                self.bootstrap(&mut dynamic.bootstrap);
            }
            Constant::Integer(_) | Constant::Float(_) | Constant::Long(_) | Constant::Double(_) => {}
        }
    }

    fn bootstrap(&mut self, bootstrap: &mut BootstrapMethod) {
        self.handle(&mut bootstrap.method);
        for argument in &mut bootstrap.arguments {
            self.constant(argument);
        }
    }
}

fn attribute_visibility(attribute: &Attribute) -> Option<Visibility> {
    match attribute {
        Attribute::Annotations { visibility, .. }
        | Attribute::ParameterAnnotations { visibility, .. }
        | Attribute::TypeAnnotations { visibility, .. } => Some(*visibility),
        _ => None,
    }
}

/// Attribute indices with visible annotation attributes ahead of invisible
/// ones, otherwise in declaration order.
fn visible_first(len: usize, visibility: impl Fn(usize) -> Option<Visibility>) -> Vec<usize> {
    let mut order: Vec<usize> = (0..len).collect();
    order.sort_by_key(|&i| match visibility(i) {
        Some(Visibility::Visible) => 0,
        Some(Visibility::Invisible) => 1,
        None => 2,
    });
    order
}

/// No descriptor appears twice on one owner, counting visible and invisible
/// attributes together and parameters per index.
fn annotations_are_unique(attributes: &[Attribute]) -> bool {
    let mut declared = HashSet::new();
    let mut by_parameter = HashSet::new();
    attributes.iter().all(|attribute| match attribute {
        Attribute::Annotations { annotations, .. } => annotations
            .iter()
            .all(|a| declared.insert(a.type_descriptor.as_str())),
        Attribute::ParameterAnnotations { parameters, .. } => {
            parameters.iter().enumerate().all(|(index, annotations)| {
                annotations
                    .iter()
                    .all(|a| by_parameter.insert((index, a.type_descriptor.as_str())))
            })
        }
        _ => true,
    })
}

fn dedup_in_order(names: &mut Vec<String>) {
    let mut seen = HashSet::new();
    names.retain(|name| seen.insert(name.clone()));
}

#[cfg(test)]
mod tests {
    use relocator_classfile::{access, Member};

    use super::*;
    use crate::mapper::Relocation;

    fn mapper() -> NameMapper {
        NameMapper::new([Relocation::new("javax/servlet", "jakarta/servlet")])
    }

    fn annotation(descriptor: &str) -> Annotation {
        Annotation {
            type_descriptor: descriptor.to_string(),
            elements: Vec::new(),
        }
    }

    #[test]
    fn owners_never_keep_a_descriptor_twice() {
        let repeated = vec![
            Attribute::Annotations {
                visibility: Visibility::Visible,
                annotations: vec![annotation("Ljakarta/servlet/A;")],
            },
            Attribute::Annotations {
                visibility: Visibility::Invisible,
                annotations: vec![annotation("Ljakarta/servlet/A;")],
            },
        ];
        assert!(!annotations_are_unique(&repeated));

        let mut class = ClassFile::new(52, access::PUBLIC, "demo/Marked", Some("java/lang/Object"));
        class.attributes = vec![
            Attribute::Annotations {
                visibility: Visibility::Invisible,
                annotations: vec![
                    annotation("Ljavax/servlet/A;"),
                    annotation("Ljakarta/servlet/B;"),
                ],
            },
            Attribute::Annotations {
                visibility: Visibility::Visible,
                annotations: vec![
                    annotation("Ljakarta/servlet/A;"),
                    annotation("Ljavax/servlet/B;"),
                ],
            },
        ];
        let mapper = mapper();
        let rewritten = Rewriter::new(&mapper, "demo/Marked").rewrite(class);
        assert!(annotations_are_unique(&rewritten.class.attributes));
        assert_eq!(
            rewritten.class.attributes,
            vec![Attribute::Annotations {
                visibility: Visibility::Visible,
                annotations: vec![
                    annotation("Ljakarta/servlet/A;"),
                    annotation("Ljakarta/servlet/B;"),
                ],
            }]
        );
    }

    #[test]
    fn rewrites_header_and_dedups_interfaces() {
        let mut class = ClassFile::new(
            52,
            access::PUBLIC,
            "demo/Filter",
            Some("javax/servlet/GenericFilter"),
        );
        class.interfaces = vec![
            "javax/servlet/Filter".to_string(),
            "jakarta/servlet/Filter".to_string(),
            "java/io/Serializable".to_string(),
        ];
        let mapper = mapper();
        let rewritten = Rewriter::new(&mapper, "demo/Filter").rewrite(class);
        assert_eq!(
            rewritten.class.super_class.as_deref(),
            Some("jakarta/servlet/GenericFilter")
        );
        assert_eq!(
            rewritten.class.interfaces,
            vec!["jakarta/servlet/Filter", "java/io/Serializable"]
        );
        assert_eq!(rewritten.sites, 2);
    }

    #[test]
    fn signatures_use_their_own_grammar() {
        let mut class = ClassFile::new(52, access::PUBLIC, "demo/Holder", Some("java/lang/Object"));
        class.attributes.push(Attribute::Signature(
            "<T:Ljavax/servlet/ServletRequest;>Ljava/lang/Object;Ljava/util/function/Supplier<TT;>;"
                .to_string(),
        ));
        class.fields.push(Member {
            access_flags: access::PRIVATE,
            name: "requests".to_string(),
            descriptor: "Ljava/util/List;".to_string(),
            attributes: vec![Attribute::Signature(
                "Ljava/util/List<+Ljavax/servlet/ServletRequest;>;".to_string(),
            )],
        });
        let mapper = mapper();
        let rewritten = Rewriter::new(&mapper, "demo/Holder").rewrite(class);
        assert_eq!(
            rewritten.class.attributes,
            vec![Attribute::Signature(
                "<T:Ljakarta/servlet/ServletRequest;>Ljava/lang/Object;Ljava/util/function/Supplier<TT;>;"
                    .to_string()
            )]
        );
        assert_eq!(
            rewritten.class.fields[0].attributes,
            vec![Attribute::Signature(
                "Ljava/util/List<+Ljakarta/servlet/ServletRequest;>;".to_string()
            )]
        );
    }

    #[test]
    fn malformed_signatures_fall_back_to_text_mapping() {
        let mut class = ClassFile::new(52, access::PUBLIC, "demo/Broken", Some("java/lang/Object"));
        class
            .attributes
            .push(Attribute::Signature("Ljavax/servlet/Filter".to_string()));
        let mapper = mapper();
        let rewritten = Rewriter::new(&mapper, "demo/Broken").rewrite(class);
        assert_eq!(
            rewritten.class.attributes,
            vec![Attribute::Signature("Ljakarta/servlet/Filter".to_string())]
        );
    }

    #[test]
    fn visible_annotation_wins_over_invisible_duplicate() {
        let mut class = ClassFile::new(52, access::PUBLIC, "demo/Annotated", Some("java/lang/Object"));
        class.attributes.push(Attribute::Annotations {
            visibility: Visibility::Invisible,
            annotations: vec![annotation("Ljavax/servlet/annotation/WebFilter;")],
        });
        class.attributes.push(Attribute::Annotations {
            visibility: Visibility::Visible,
            annotations: vec![annotation("Ljakarta/servlet/annotation/WebFilter;")],
        });
        let mapper = mapper();
        let rewritten = Rewriter::new(&mapper, "demo/Annotated").rewrite(class);
        assert_eq!(
            rewritten.class.attributes,
            vec![Attribute::Annotations {
                visibility: Visibility::Visible,
                annotations: vec![annotation("Ljakarta/servlet/annotation/WebFilter;")],
            }]
        );
    }

    #[test]
    fn parameter_annotations_dedup_per_index() {
        let mut method = Member {
            access_flags: access::PUBLIC,
            name: "handle".to_string(),
            descriptor: "(Ljava/lang/String;Ljava/lang/String;)V".to_string(),
            attributes: Vec::new(),
        };
        method.attributes.push(Attribute::ParameterAnnotations {
            visibility: Visibility::Visible,
            parameters: vec![
                vec![
                    annotation("Ljavax/servlet/Marker;"),
                    annotation("Ljakarta/servlet/Marker;"),
                ],
                vec![annotation("Ljakarta/servlet/Marker;")],
            ],
        });
        let mut class = ClassFile::new(52, access::PUBLIC, "demo/Params", Some("java/lang/Object"));
        class.methods.push(method);
        let mapper = mapper();
        let rewritten = Rewriter::new(&mapper, "demo/Params").rewrite(class);
        let Attribute::ParameterAnnotations { parameters, .. } =
            &rewritten.class.methods[0].attributes[0]
        else {
            panic!("parameter annotations removed");
        };
        assert_eq!(parameters[0], vec![annotation("Ljakarta/servlet/Marker;")]);
        assert_eq!(parameters[1], vec![annotation("Ljakarta/servlet/Marker;")]);
    }

    #[test]
    fn element_values_use_the_matching_form() {
        let method = Member {
            access_flags: access::PUBLIC | access::ABSTRACT,
            name: "value".to_string(),
            descriptor: "()Ljava/lang/Class;".to_string(),
            attributes: vec![Attribute::AnnotationDefault(ElementValue::Array(vec![
                ElementValue::Class("Ljavax/servlet/Servlet;".to_string()),
                ElementValue::Const(ConstValue::String("javax.servlet.Servlet".to_string())),
                ElementValue::Enum {
                    type_descriptor: "Ljavax/servlet/DispatcherType;".to_string(),
                    const_name: "REQUEST".to_string(),
                },
            ]))],
        };
        let flags = access::PUBLIC | access::INTERFACE | access::ANNOTATION | access::ABSTRACT;
        let mut class = ClassFile::new(52, flags, "demo/Config", Some("java/lang/Object"));
        class.methods.push(method);
        let mapper = mapper();
        let rewritten = Rewriter::new(&mapper, "demo/Config").rewrite(class);
        assert_eq!(
            rewritten.class.methods[0].attributes,
            vec![Attribute::AnnotationDefault(ElementValue::Array(vec![
                ElementValue::Class("Ljakarta/servlet/Servlet;".to_string()),
                ElementValue::Const(ConstValue::String("jakarta.servlet.Servlet".to_string())),
                ElementValue::Enum {
                    type_descriptor: "Ljakarta/servlet/DispatcherType;".to_string(),
                    const_name: "REQUEST".to_string(),
                },
            ]))]
        );
        assert_eq!(rewritten.sites, 3);
    }

    #[test]
    fn untouched_class_counts_no_sites() {
        let mut class = ClassFile::new(52, access::PUBLIC, "demo/Plain", Some("java/lang/Object"));
        class.attributes.push(Attribute::NestMembers(vec!["demo/Plain$Inner".to_string()]));
        let mapper = mapper();
        let rewritten = Rewriter::new(&mapper, "demo/Plain").rewrite(class);
        assert_eq!(rewritten.sites, 0);
    }
}
