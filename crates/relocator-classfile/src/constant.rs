//! Symbolic views of constant pool structures referenced from code and
//! attributes. Rewriting works on these values, never on pool indices.

/// `CONSTANT_MethodHandle` reference kinds.
pub mod handle_kind {
    pub const GET_FIELD: u8 = 1;
    pub const GET_STATIC: u8 = 2;
    pub const PUT_FIELD: u8 = 3;
    pub const PUT_STATIC: u8 = 4;
    pub const INVOKE_VIRTUAL: u8 = 5;
    pub const INVOKE_STATIC: u8 = 6;
    pub const INVOKE_SPECIAL: u8 = 7;
    pub const NEW_INVOKE_SPECIAL: u8 = 8;
    pub const INVOKE_INTERFACE: u8 = 9;

    pub fn is_field(kind: u8) -> bool {
        (GET_FIELD..=PUT_STATIC).contains(&kind)
    }
}

/// A loadable constant: the operand of `ldc`, a `ConstantValue` or a
/// bootstrap argument.
///
/// Floating point values keep their raw IEEE bits so NaN payloads survive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Constant {
    Integer(i32),
    Float(u32),
    Long(i64),
    Double(u64),
    String(String),
    Class(String),
    MethodType(String),
    MethodHandle(Handle),
    Dynamic(Box<ConstantDynamic>),
}

impl Constant {
    /// Whether the constant occupies two operand stack slots.
    pub fn is_wide(&self) -> bool {
        match self {
            Constant::Long(_) | Constant::Double(_) => true,
            Constant::Dynamic(dynamic) => matches!(dynamic.descriptor.as_str(), "J" | "D"),
            _ => false,
        }
    }
}

/// `CONSTANT_Fieldref`, `CONSTANT_Methodref` or `CONSTANT_InterfaceMethodref`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberRef {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Handle {
    pub kind: u8,
    pub owner: String,
    pub name: String,
    pub descriptor: String,
    /// The handle refers to a `CONSTANT_InterfaceMethodref`.
    pub is_interface: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConstantDynamic {
    pub name: String,
    pub descriptor: String,
    pub bootstrap: BootstrapMethod,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BootstrapMethod {
    pub method: Handle,
    pub arguments: Vec<Constant>,
}
