use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("{0} trailing bytes after structure")]
    TrailingBytes(usize),
    #[error("invalid classfile magic: 0x{0:08x}")]
    InvalidMagic(u32),
    #[error("invalid constant pool index: {0}")]
    InvalidConstantPoolIndex(u16),
    #[error("invalid constant pool tag: {0}")]
    InvalidConstantPoolTag(u8),
    #[error("constant pool type mismatch at index {index}: expected {expected}, found {found}")]
    ConstantPoolTypeMismatch {
        index: u16,
        expected: &'static str,
        found: &'static str,
    },
    #[error("invalid modified UTF-8 in constant pool")]
    InvalidModifiedUtf8,
    #[error("invalid bootstrap method index: {0}")]
    InvalidBootstrapMethodIndex(u16),
    #[error("dynamic constant nesting at index {0} is too deep or cyclic")]
    DynamicConstantCycle(u16),
    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
    #[error("malformed {0} attribute")]
    MalformedAttribute(&'static str),
    #[error("invalid opcode 0x{opcode:02x} at offset {offset}")]
    InvalidOpcode { offset: u32, opcode: u8 },
    #[error("instruction at offset {offset} refers to invalid code offset {target}")]
    InvalidCodeOffset { offset: u32, target: i64 },
    #[error("constant pool exceeds 65535 entries")]
    ConstantPoolOverflow,
    #[error("bootstrap method table exceeds 65535 entries")]
    BootstrapTableOverflow,
    #[error("branch at offset {offset} cannot reach {target} with a 16-bit offset")]
    BranchOffsetOverflow { offset: u32, target: u32 },
    #[error("code attribute too large: {0} bytes")]
    CodeTooLarge(usize),
    #[error("{0}")]
    Other(&'static str),
}
