use std::borrow::Cow;
use std::sync::Arc;

use pretty_assertions::assert_eq;
use relocator_classfile::opcodes::*;
use relocator_classfile::{
    access, handle_kind, Annotation, Attribute, BootstrapMethod, ClassFile, Code, CodeAttribute,
    ConstValue, Constant, ConstantDynamic, ElementValue, ExceptionHandler, FrameKind, Handle, Insn,
    Instruction, Member, MemberRef, StackMapFrame, VerificationType, Visibility, SURROGATE_ESCAPE,
};
use relocator_engine::{
    FrameStrategy, NameMapper, Relocation, Relocator, RelocatorOptions, RewriteError,
};
use relocator_hierarchy::{HierarchyResolver, MemorySource, OBJECT};

fn mapper() -> Arc<NameMapper> {
    Arc::new(NameMapper::new([
        Relocation::new("javax/servlet", "jakarta/servlet"),
        Relocation::new("javax/validation", "jakarta/validation"),
    ]))
}

fn relocator_with(source: MemorySource, options: RelocatorOptions) -> Relocator {
    let mapper = mapper();
    let resolver = HierarchyResolver::new(Arc::new(source)).with_remapper(mapper.clone());
    Relocator::new(mapper, Arc::new(resolver), options)
}

fn relocator() -> Relocator {
    relocator_with(MemorySource::new(), RelocatorOptions::default())
}

fn object(name: &str) -> VerificationType {
    VerificationType::Object(name.to_string())
}

fn code(max_stack: u16, max_locals: u16, instructions: Vec<(u32, Insn)>, code_length: u32) -> Code {
    Code {
        max_stack,
        max_locals,
        instructions: instructions
            .into_iter()
            .map(|(offset, insn)| Instruction { offset, insn })
            .collect(),
        code_length,
        exception_table: Vec::new(),
        attributes: Vec::new(),
    }
}

fn static_method(name: &str, descriptor: &str, code: Code) -> Member {
    Member {
        access_flags: access::PUBLIC | access::STATIC,
        name: name.to_string(),
        descriptor: descriptor.to_string(),
        attributes: vec![Attribute::Code(Box::new(code))],
    }
}

fn class(name: &str) -> ClassFile {
    ClassFile::new(61, access::PUBLIC | access::SUPER, name, Some(OBJECT))
}

fn checkcast(class: &str) -> Insn {
    Insn::Type {
        opcode: CHECKCAST,
        class: class.to_string(),
    }
}

/// `flag ? (A) null : (B) null`, merging two reference types at offset 15.
fn choose(a: &str, b: &str) -> Code {
    code(
        1,
        1,
        vec![
            (0, Insn::Simple(ILOAD_0)),
            (1, Insn::Jump { opcode: IFEQ, target: 11 }),
            (4, Insn::Simple(ACONST_NULL)),
            (5, checkcast(a)),
            (8, Insn::Jump { opcode: GOTO, target: 15 }),
            (11, Insn::Simple(ACONST_NULL)),
            (12, checkcast(b)),
            (15, Insn::Simple(ARETURN)),
        ],
        16,
    )
}

fn annotation(descriptor: &str, message: &str) -> Annotation {
    Annotation {
        type_descriptor: descriptor.to_string(),
        elements: vec![(
            "message".to_string(),
            ElementValue::Const(ConstValue::String(message.to_string())),
        )],
    }
}

fn bootstrap(owner: &str, arguments: Vec<Constant>) -> BootstrapMethod {
    BootstrapMethod {
        method: Handle {
            kind: handle_kind::INVOKE_STATIC,
            owner: owner.to_string(),
            name: "bootstrap".to_string(),
            descriptor: "(Ljava/lang/invoke/MethodHandles$Lookup;Ljava/lang/String;Ljava/lang/Class;)Ljava/lang/Object;"
                .to_string(),
            is_interface: false,
        },
        arguments,
    }
}

fn dynamic(owner: &str, arguments: Vec<Constant>) -> Constant {
    Constant::Dynamic(Box::new(ConstantDynamic {
        name: "value".to_string(),
        descriptor: "Ljava/lang/Object;".to_string(),
        bootstrap: bootstrap(owner, arguments),
    }))
}

fn method_code<'a>(class: &'a ClassFile, name: &str) -> &'a Code {
    class
        .methods
        .iter()
        .find(|method| method.name == name)
        .and_then(Member::code)
        .unwrap()
}

#[test]
fn classes_without_source_references_pass_through() {
    let mut plain = class("demo/Plain");
    plain.attributes.push(Attribute::Annotations {
        visibility: Visibility::Visible,
        annotations: vec![annotation("Ljava/lang/Deprecated;", "jakarta.servlet.Filter")],
    });
    plain
        .methods
        .push(static_method("pick", "(Z)Ljava/lang/Object;", choose("java/lang/String", "java/lang/Integer")));
    let bytes = plain.to_bytes().unwrap();

    let relocated = relocator().relocate(Some("demo/Plain"), &bytes).unwrap();
    assert!(!relocated.changed);
    assert_eq!(relocated.sites, 0);
    assert!(matches!(relocated.bytes, Cow::Borrowed(_)));
    assert_eq!(relocated.bytes.as_ref(), bytes.as_slice());
}

#[test]
fn relocation_is_idempotent() {
    let mut filter = class("demo/AuditFilter");
    filter.interfaces.push("javax/servlet/Filter".to_string());
    filter.methods.push(static_method(
        "fail",
        "()Ljava/lang/Object;",
        code(
            4,
            4,
            vec![
                (
                    0,
                    Insn::Type {
                        opcode: NEW,
                        class: "javax/servlet/ServletException".to_string(),
                    },
                ),
                (3, Insn::Simple(DUP)),
                (
                    4,
                    Insn::Method {
                        opcode: INVOKESPECIAL,
                        method: MemberRef {
                            owner: "javax/servlet/ServletException".to_string(),
                            name: "<init>".to_string(),
                            descriptor: "()V".to_string(),
                        },
                        is_interface: false,
                    },
                ),
                (7, Insn::Simple(ARETURN)),
            ],
            8,
        ),
    ));
    let bytes = filter.to_bytes().unwrap();

    let relocator = relocator();
    let once = relocator.relocate(Some("demo/AuditFilter"), &bytes).unwrap();
    assert!(once.changed);
    assert_eq!(once.sites, 3);
    let twice = relocator.relocate(Some("demo/AuditFilter"), &once.bytes).unwrap();
    assert!(!twice.changed);
    assert_eq!(twice.bytes.as_ref(), once.bytes.as_ref());

    let parsed = ClassFile::parse(&once.bytes).unwrap();
    assert_eq!(parsed.interfaces, vec!["jakarta/servlet/Filter".to_string()]);
    let code = method_code(&parsed, "fail");
    assert_eq!((code.max_stack, code.max_locals), (2, 0));
    assert_eq!(
        code.instructions[0].insn,
        Insn::Type {
            opcode: NEW,
            class: "jakarta/servlet/ServletException".to_string(),
        }
    );
}

#[test]
fn first_declared_annotation_wins_after_collision() {
    let mut bean = class("demo/Bean");
    bean.fields.push(Member {
        access_flags: access::PRIVATE,
        name: "name".to_string(),
        descriptor: "Ljava/lang/String;".to_string(),
        attributes: vec![Attribute::Annotations {
            visibility: Visibility::Visible,
            annotations: vec![
                annotation("Ljavax/validation/constraints/NotNull;", "declared first"),
                annotation("Ljakarta/validation/constraints/NotNull;", "declared second"),
            ],
        }],
    });
    let bytes = bean.to_bytes().unwrap();

    let relocated = relocator().relocate(Some("demo/Bean"), &bytes).unwrap();
    assert!(relocated.changed);
    let parsed = ClassFile::parse(&relocated.bytes).unwrap();
    assert_eq!(
        parsed.fields[0].attributes,
        vec![Attribute::Annotations {
            visibility: Visibility::Visible,
            annotations: vec![annotation(
                "Ljakarta/validation/constraints/NotNull;",
                "declared first"
            )],
        }]
    );
}

#[test]
fn nested_dynamic_constants_are_rewritten_at_every_level() {
    let level3 = dynamic("javax/servlet/Level3", vec![Constant::Class("javax/servlet/Leaf".to_string())]);
    let level2 = dynamic("javax/servlet/Level2", vec![level3]);
    let level1 = dynamic("javax/servlet/Level1", vec![level2, Constant::String("javax.servlet.Name".to_string())]);
    let mut indy = class("demo/Indy");
    indy.methods.push(static_method(
        "make",
        "(Z)Ljava/lang/Object;",
        code(
            2,
            1,
            vec![
                (0, Insn::Simple(ILOAD_0)),
                (1, Insn::Jump { opcode: IFEQ, target: 12 }),
                (
                    4,
                    Insn::InvokeDynamic {
                        name: "make".to_string(),
                        descriptor: "()Ljavax/servlet/Servlet;".to_string(),
                        bootstrap: bootstrap("javax/servlet/Bootstraps", vec![level1]),
                    },
                ),
                (9, Insn::Jump { opcode: GOTO, target: 16 }),
                (12, Insn::Simple(ACONST_NULL)),
                (13, checkcast("javax/servlet/ServletConfig")),
                (16, Insn::Simple(ARETURN)),
            ],
            17,
        ),
    ));
    let bytes = indy.to_bytes().unwrap();

    let relocated = relocator().relocate(Some("demo/Indy"), &bytes).unwrap();
    let parsed = ClassFile::parse(&relocated.bytes).unwrap();
    let code = method_code(&parsed, "make");

    let Insn::InvokeDynamic { descriptor, bootstrap: outer, .. } = &code.instructions[2].insn else {
        panic!("expected invokedynamic, got {:?}", code.instructions[2].insn);
    };
    assert_eq!(descriptor, "()Ljakarta/servlet/Servlet;");
    assert_eq!(outer.method.owner, "jakarta/servlet/Bootstraps");

    let mut owners = Vec::new();
    let mut current = &outer.arguments[0];
    while let Constant::Dynamic(nested) = current {
        owners.push(nested.bootstrap.method.owner.clone());
        current = &nested.bootstrap.arguments[0];
    }
    assert_eq!(
        owners,
        vec!["jakarta/servlet/Level1", "jakarta/servlet/Level2", "jakarta/servlet/Level3"]
    );
    assert_eq!(current, &Constant::Class("jakarta/servlet/Leaf".to_string()));
    let Constant::Dynamic(level1) = &outer.arguments[0] else {
        unreachable!();
    };
    assert_eq!(
        level1.bootstrap.arguments[1],
        Constant::String("jakarta.servlet.Name".to_string())
    );

    // The servlet types are not available, yet the merge still resolves.
    assert_eq!(
        code.stack_map_table().unwrap(),
        &[
            StackMapFrame {
                offset: 12,
                kind: FrameKind::Same,
            },
            StackMapFrame {
                offset: 16,
                kind: FrameKind::SameLocals1StackItem(object(OBJECT)),
            },
        ][..]
    );
}

#[test]
fn safe_frames_merge_through_relocated_ancestors() {
    let mut source = MemorySource::new();
    let mut generic = ClassFile::new(52, access::PUBLIC | access::ABSTRACT, "javax/servlet/GenericServlet", Some(OBJECT));
    generic.interfaces.push("javax/servlet/Servlet".to_string());
    source.insert("javax/servlet/GenericServlet", generic.to_bytes().unwrap());
    let http = ClassFile::new(
        52,
        access::PUBLIC | access::ABSTRACT,
        "javax/servlet/http/HttpServlet",
        Some("javax/servlet/GenericServlet"),
    );
    source.insert("javax/servlet/http/HttpServlet", http.to_bytes().unwrap());
    let relocator = relocator_with(source, RelocatorOptions::default());

    let mut servlets = class("demo/Servlets");
    servlets.methods.push(static_method(
        "pick",
        "(Z)Ljava/lang/Object;",
        choose("javax/servlet/http/HttpServlet", "javax/servlet/GenericServlet"),
    ));
    let bytes = servlets.to_bytes().unwrap();

    let relocated = relocator.relocate(Some("demo/Servlets"), &bytes).unwrap();
    let parsed = ClassFile::parse(&relocated.bytes).unwrap();
    let code = method_code(&parsed, "pick");
    assert_eq!(
        code.stack_map_table().unwrap(),
        &[
            StackMapFrame {
                offset: 11,
                kind: FrameKind::Same,
            },
            StackMapFrame {
                offset: 15,
                kind: FrameKind::SameLocals1StackItem(object("jakarta/servlet/GenericServlet")),
            },
        ][..]
    );
    assert_eq!((code.max_stack, code.max_locals), (1, 1));
}

#[test]
fn fast_strategy_keeps_original_frames_and_maxima() {
    let mut body = choose("javax/servlet/ServletRequest", "javax/servlet/ServletRequest");
    body.max_stack = 7;
    body.max_locals = 3;
    body.attributes.push(CodeAttribute::StackMapTable(vec![
        StackMapFrame {
            offset: 11,
            kind: FrameKind::Same,
        },
        StackMapFrame {
            offset: 15,
            kind: FrameKind::SameLocals1StackItem(object("javax/servlet/ServletRequest")),
        },
    ]));
    let mut requests = class("demo/Requests");
    requests
        .methods
        .push(static_method("pick", "(Z)Ljava/lang/Object;", body));
    let bytes = requests.to_bytes().unwrap();

    let options = RelocatorOptions {
        strategy: FrameStrategy::Fast,
        ..RelocatorOptions::default()
    };
    let relocated = relocator_with(MemorySource::new(), options)
        .relocate(Some("demo/Requests"), &bytes)
        .unwrap();
    let parsed = ClassFile::parse(&relocated.bytes).unwrap();
    let code = method_code(&parsed, "pick");
    assert_eq!((code.max_stack, code.max_locals), (7, 3));
    assert_eq!(
        code.stack_map_table().unwrap()[1],
        StackMapFrame {
            offset: 15,
            kind: FrameKind::SameLocals1StackItem(object("jakarta/servlet/ServletRequest")),
        }
    );
}

#[test]
fn unreachable_code_becomes_nops_and_leaves_the_exception_table() {
    let mut body = code(
        5,
        5,
        vec![
            (0, Insn::Simple(ACONST_NULL)),
            (1, checkcast("javax/servlet/Filter")),
            (4, Insn::Simple(ARETURN)),
            (5, Insn::Simple(ICONST_0)),
            (6, Insn::Simple(POP)),
            (7, Insn::Simple(ACONST_NULL)),
            (8, Insn::Simple(ARETURN)),
            (9, Insn::Simple(ARETURN)),
        ],
        10,
    );
    body.exception_table.push(ExceptionHandler {
        start: 0,
        end: 9,
        handler: 9,
        catch_type: None,
    });
    let mut guarded = class("demo/Guarded");
    guarded
        .methods
        .push(static_method("filter", "()Ljava/lang/Object;", body));
    let bytes = guarded.to_bytes().unwrap();

    let relocated = relocator().relocate(Some("demo/Guarded"), &bytes).unwrap();
    let parsed = ClassFile::parse(&relocated.bytes).unwrap();
    let code = method_code(&parsed, "filter");
    let opcodes: Vec<u8> = code.instructions.iter().map(|i| i.insn.opcode()).collect();
    assert_eq!(
        opcodes,
        vec![ACONST_NULL, CHECKCAST, ARETURN, NOP, NOP, NOP, ATHROW, ARETURN]
    );
    assert_eq!(
        code.exception_table,
        vec![ExceptionHandler {
            start: 0,
            end: 5,
            handler: 9,
            catch_type: None,
        }]
    );
    let throwable = object("java/lang/Throwable");
    assert_eq!(
        code.stack_map_table().unwrap(),
        &[
            StackMapFrame {
                offset: 5,
                kind: FrameKind::SameLocals1StackItem(throwable.clone()),
            },
            StackMapFrame {
                offset: 9,
                kind: FrameKind::SameLocals1StackItem(throwable),
            },
        ][..]
    );
    assert_eq!((code.max_stack, code.max_locals), (1, 0));
}

#[test]
fn source_namespace_classes_are_skipped_on_request() {
    let mut library = class("javax/servlet/GenericServlet");
    library.interfaces.push("javax/servlet/Servlet".to_string());
    let bytes = library.to_bytes().unwrap();

    let skipped = relocator()
        .relocate(Some("javax/servlet/GenericServlet"), &bytes)
        .unwrap();
    assert!(!skipped.changed);

    let skipped_without_hint = relocator().relocate(None, &bytes).unwrap();
    assert!(!skipped_without_hint.changed);

    let options = RelocatorOptions {
        skip_source_namespace: false,
        ..RelocatorOptions::default()
    };
    let relocated = relocator_with(MemorySource::new(), options)
        .relocate(None, &bytes)
        .unwrap();
    assert!(relocated.changed);
    let parsed = ClassFile::parse(&relocated.bytes).unwrap();
    assert_eq!(parsed.this_class, "jakarta/servlet/GenericServlet");
    assert_eq!(parsed.interfaces, vec!["jakarta/servlet/Servlet".to_string()]);
}

#[test]
fn batch_keeps_input_order_and_isolates_failures() {
    let mut filter = class("demo/Filter");
    filter.interfaces.push("javax/servlet/Filter".to_string());
    let changed = filter.to_bytes().unwrap();
    let untouched = class("demo/Untouched").to_bytes().unwrap();
    let garbage = vec![0xCA, 0xFE, 0xBA];

    let relocator = relocator();
    let results = relocator.relocate_batch(&[changed.as_slice(), garbage.as_slice(), untouched.as_slice()]);
    assert_eq!(results.len(), 3);
    assert!(results[0].as_ref().unwrap().changed);
    assert!(matches!(results[1], Err(RewriteError::Parse { .. })));
    let unchanged = results[2].as_ref().unwrap();
    assert!(!unchanged.changed);
    assert_eq!(unchanged.bytes.as_ref(), untouched.as_slice());
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

#[test]
fn unpaired_surrogates_survive_string_mapping() {
    // The text javac writes for "\uDC00javax.servlet.Filter".
    let lone = char::from_u32(SURROGATE_ESCAPE + (0xDC00 - 0xD800)).unwrap();
    let mut constants = class("demo/Constants");
    constants.fields.push(Member {
        access_flags: access::PUBLIC | access::STATIC | access::FINAL,
        name: "MIXED".to_string(),
        descriptor: "Ljava/lang/String;".to_string(),
        attributes: vec![Attribute::ConstantValue(Constant::String(format!(
            "{lone}javax.servlet.Filter"
        )))],
    });
    let bytes = constants.to_bytes().unwrap();
    let mut before = vec![0xED, 0xB0, 0x80];
    before.extend_from_slice(b"javax.servlet.Filter");
    assert!(contains(&bytes, &before));

    let relocated = relocator().relocate(Some("demo/Constants"), &bytes).unwrap();
    assert!(relocated.changed);
    let mut after = vec![0xED, 0xB0, 0x80];
    after.extend_from_slice(b"jakarta.servlet.Filter");
    assert!(contains(&relocated.bytes, &after));

    let parsed = ClassFile::parse(&relocated.bytes).unwrap();
    assert_eq!(
        parsed.fields[0].attributes,
        vec![Attribute::ConstantValue(Constant::String(format!(
            "{lone}jakarta.servlet.Filter"
        )))]
    );
}
