//! Reading and writing JVM class files.
//!
//! [`ClassFile::parse`] decodes a class into an owned model whose constant
//! pool references are symbolic; [`ClassFile::to_bytes`] encodes it again on
//! top of the original constant pool. [`ClassHeader::parse`] stops after the
//! interface list and is cheap enough for hierarchy lookups.

#![forbid(unsafe_code)]

mod annotation;
mod attribute;
mod classfile;
mod code;
mod constant;
mod constant_pool;
mod descriptor;
mod error;
mod frame;
mod mutf8;
pub mod opcodes;
mod reader;
mod signature;
mod symbol_table;

pub use crate::annotation::{
    Annotation, ConstValue, ElementValue, LocalVarTarget, TargetInfo, TypeAnnotation,
};
pub use crate::attribute::{Attribute, InnerClass, RawAttribute, RecordComponent, Visibility};
pub use crate::classfile::{access, ClassFile, ClassHeader, Member, MAGIC};
pub use crate::code::{
    Code, CodeAttribute, ExceptionHandler, Insn, Instruction, LineNumber, LocalVariable,
    MAX_CODE_LENGTH,
};
pub use crate::constant::{handle_kind, BootstrapMethod, Constant, ConstantDynamic, Handle, MemberRef};
pub use crate::descriptor::{
    descriptor_to_internal_name, parse_field_descriptor, parse_method_descriptor, BaseType,
    FieldType, MethodDescriptor, ReturnType,
};
pub use crate::error::{Error, Result};
pub use crate::frame::{FrameKind, StackMapFrame, VerificationType};
pub use crate::mutf8::SURROGATE_ESCAPE;
pub use crate::signature::{
    parse_class_signature, parse_field_signature, parse_method_signature, ClassSignature,
    ClassTypeSignature, MethodSignature, SimpleClassTypeSignature, TypeArgument, TypeParameter,
    TypeSignature,
};
