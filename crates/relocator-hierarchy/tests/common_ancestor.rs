use std::borrow::Cow;
use std::sync::Arc;

use pretty_assertions::assert_eq;
use relocator_classfile::{access, ClassFile};
use relocator_hierarchy::{HierarchyResolver, MemorySource, NameRemapper, TypeMetadata, OBJECT};

fn class_bytes(name: &str, super_name: Option<&str>, interfaces: &[&str], is_interface: bool) -> Vec<u8> {
    let flags = if is_interface {
        access::PUBLIC | access::INTERFACE | access::ABSTRACT
    } else {
        access::PUBLIC | access::SUPER
    };
    let mut class = ClassFile::new(52, flags, name, super_name);
    class.interfaces = interfaces.iter().map(|i| i.to_string()).collect();
    class.to_bytes().unwrap()
}

#[derive(Default)]
struct Hierarchy(MemorySource);

impl Hierarchy {
    fn class(mut self, name: &str, super_name: &str, interfaces: &[&str]) -> Self {
        self.0.insert(name, class_bytes(name, Some(super_name), interfaces, false));
        self
    }

    fn interface(mut self, name: &str, extends: &[&str]) -> Self {
        self.0.insert(name, class_bytes(name, Some(OBJECT), extends, true));
        self
    }

    fn resolver(self) -> HierarchyResolver {
        HierarchyResolver::new(Arc::new(self.0))
    }
}

#[test]
fn identical_names_short_circuit() {
    let resolver = Hierarchy::default().resolver();
    assert_eq!(resolver.common_ancestor("demo/Missing", "demo/Missing"), "demo/Missing");
    assert!(resolver.cache().is_empty());
}

#[test]
fn interfaces_meet_at_shared_superinterface() {
    let resolver = Hierarchy::default()
        .interface("demo/Root", &[])
        .interface("demo/Middle", &["demo/Root"])
        .interface("demo/Left", &["demo/Middle"])
        .interface("demo/Right", &["demo/Other", "demo/Root"])
        .interface("demo/Other", &[])
        .resolver();

    assert_eq!(resolver.common_ancestor("demo/Left", "demo/Right"), "demo/Root");
    assert_eq!(resolver.common_ancestor("demo/Left", "demo/Middle"), "demo/Middle");
    assert_eq!(resolver.common_ancestor("demo/Left", "demo/Other"), OBJECT);
}

#[test]
fn interface_closure_prefers_declaration_order() {
    let resolver = Hierarchy::default()
        .interface("demo/First", &[])
        .interface("demo/Second", &[])
        .interface("demo/A", &["demo/First", "demo/Second"])
        .interface("demo/B", &["demo/Second", "demo/First"])
        .resolver();

    assert_eq!(resolver.common_ancestor("demo/A", "demo/B"), "demo/First");
    assert_eq!(resolver.common_ancestor("demo/B", "demo/A"), "demo/Second");
}

#[test]
fn classes_sharing_only_the_root() {
    let resolver = Hierarchy::default()
        .class("demo/Base", OBJECT, &[])
        .class("demo/Left", "demo/Base", &[])
        .class("demo/Unrelated", OBJECT, &[])
        .resolver();

    assert_eq!(resolver.common_ancestor("demo/Left", "demo/Unrelated"), OBJECT);
}

#[test]
fn classes_meet_at_nearest_superclass() {
    let resolver = Hierarchy::default()
        .class("demo/Base", OBJECT, &[])
        .class("demo/Mid", "demo/Base", &[])
        .class("demo/Left", "demo/Mid", &[])
        .class("demo/Right", "demo/Mid", &[])
        .class("demo/Far", "demo/Base", &[])
        .resolver();

    assert_eq!(resolver.common_ancestor("demo/Left", "demo/Right"), "demo/Mid");
    assert_eq!(resolver.common_ancestor("demo/Left", "demo/Far"), "demo/Base");
    assert_eq!(resolver.common_ancestor("demo/Base", "demo/Left"), "demo/Base");
}

#[test]
fn interface_and_class_meet_at_object() {
    let resolver = Hierarchy::default()
        .interface("demo/Api", &[])
        .class("demo/Impl", OBJECT, &["demo/Api"])
        .resolver();

    assert_eq!(resolver.common_ancestor("demo/Api", "demo/Impl"), OBJECT);
    assert_eq!(resolver.common_ancestor("demo/Impl", "demo/Api"), OBJECT);
}

#[test]
fn missing_ancestors_fall_back_to_object() {
    let resolver = Hierarchy::default()
        .class("demo/Left", "lib/Missing", &[])
        .class("demo/Right", "lib/Missing", &[])
        .resolver();

    assert_eq!(resolver.common_ancestor("demo/Left", "demo/Right"), "lib/Missing");
    assert_eq!(resolver.common_ancestor("lib/Gone", "lib/AlsoGone"), OBJECT);
    assert_eq!(*resolver.metadata("lib/Gone"), TypeMetadata::fallback("lib/Gone"));
}

#[test]
fn cyclic_hierarchy_terminates() {
    let resolver = Hierarchy::default()
        .class("demo/A", "demo/B", &[])
        .class("demo/B", "demo/A", &[])
        .interface("demo/I", &["demo/J"])
        .interface("demo/J", &["demo/I"])
        .resolver();

    assert_eq!(resolver.common_ancestor("demo/A", "demo/C"), OBJECT);
    assert_eq!(resolver.common_ancestor("demo/I", "demo/K"), OBJECT);
    assert_eq!(resolver.common_ancestor("demo/I", "demo/J"), "demo/I");
}

#[test]
fn seeded_metadata_takes_precedence() {
    let resolver = Hierarchy::default().resolver();
    resolver.seed(TypeMetadata {
        name: "demo/Self".to_string(),
        super_name: Some("demo/Parent".to_string()),
        interfaces: Vec::new(),
        is_interface: false,
    });
    resolver.seed(TypeMetadata {
        name: "demo/Sibling".to_string(),
        super_name: Some("demo/Parent".to_string()),
        interfaces: Vec::new(),
        is_interface: false,
    });
    assert_eq!(resolver.common_ancestor("demo/Self", "demo/Sibling"), "demo/Parent");
}

struct Jakarta;

impl NameRemapper for Jakarta {
    fn remap<'a>(&self, internal_name: &'a str) -> Cow<'a, str> {
        if internal_name.contains("javax/servlet") {
            Cow::Owned(internal_name.replace("javax/servlet", "jakarta/servlet"))
        } else {
            Cow::Borrowed(internal_name)
        }
    }

    fn original_names(&self, internal_name: &str) -> Vec<String> {
        if internal_name.contains("jakarta/servlet") {
            vec![internal_name.replace("jakarta/servlet", "javax/servlet")]
        } else {
            Vec::new()
        }
    }
}

#[test]
fn ancestors_compiled_against_source_names_are_remapped() {
    let resolver = Hierarchy::default()
        .class("javax/servlet/GenericServlet", OBJECT, &[])
        .class("javax/servlet/http/HttpServlet", "javax/servlet/GenericServlet", &[])
        .class("demo/MyServlet", "jakarta/servlet/http/HttpServlet", &[])
        .class("demo/OtherServlet", "jakarta/servlet/GenericServlet", &[])
        .resolver()
        .with_remapper(Arc::new(Jakarta));

    assert_eq!(
        resolver.common_ancestor("demo/MyServlet", "demo/OtherServlet"),
        "jakarta/servlet/GenericServlet"
    );
    let http = resolver.metadata("jakarta/servlet/http/HttpServlet");
    assert_eq!(http.super_name.as_deref(), Some("jakarta/servlet/GenericServlet"));
}

#[test]
fn concurrent_queries_agree() {
    let resolver = Hierarchy::default()
        .class("demo/Base", OBJECT, &[])
        .class("demo/Left", "demo/Base", &[])
        .class("demo/Right", "demo/Base", &[])
        .resolver();

    let answers: Vec<String> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| scope.spawn(|| resolver.common_ancestor("demo/Left", "demo/Right")))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert!(answers.iter().all(|answer| answer == "demo/Base"));
    assert_eq!(resolver.cache().len(), 4);
}
