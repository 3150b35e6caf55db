use crate::constant::{BootstrapMethod, Constant, ConstantDynamic, Handle, MemberRef};
use crate::error::{Error, Result};
use crate::mutf8;
use crate::reader::Reader;

pub(crate) mod tag {
    pub const UTF8: u8 = 1;
    pub const INTEGER: u8 = 3;
    pub const FLOAT: u8 = 4;
    pub const LONG: u8 = 5;
    pub const DOUBLE: u8 = 6;
    pub const CLASS: u8 = 7;
    pub const STRING: u8 = 8;
    pub const FIELDREF: u8 = 9;
    pub const METHODREF: u8 = 10;
    pub const INTERFACE_METHODREF: u8 = 11;
    pub const NAME_AND_TYPE: u8 = 12;
    pub const METHOD_HANDLE: u8 = 15;
    pub const METHOD_TYPE: u8 = 16;
    pub const DYNAMIC: u8 = 17;
    pub const INVOKE_DYNAMIC: u8 = 18;
    pub const MODULE: u8 = 19;
    pub const PACKAGE: u8 = 20;
}

/// Nested dynamic constants deeper than this are treated as cyclic.
const MAX_DYNAMIC_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CpInfo {
    /// Index 0 and the slot following a long or double.
    Unusable,
    Utf8 { text: String, exact: bool },
    Integer(i32),
    Float(u32),
    Long(i64),
    Double(u64),
    Class(u16),
    String(u16),
    FieldRef { class: u16, name_and_type: u16 },
    MethodRef { class: u16, name_and_type: u16 },
    InterfaceMethodRef { class: u16, name_and_type: u16 },
    NameAndType { name: u16, descriptor: u16 },
    MethodHandle { kind: u8, reference: u16 },
    MethodType(u16),
    Dynamic { bootstrap: u16, name_and_type: u16 },
    InvokeDynamic { bootstrap: u16, name_and_type: u16 },
    Module(u16),
    Package(u16),
}

impl CpInfo {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            CpInfo::Unusable => "Unusable",
            CpInfo::Utf8 { .. } => "Utf8",
            CpInfo::Integer(_) => "Integer",
            CpInfo::Float(_) => "Float",
            CpInfo::Long(_) => "Long",
            CpInfo::Double(_) => "Double",
            CpInfo::Class(_) => "Class",
            CpInfo::String(_) => "String",
            CpInfo::FieldRef { .. } => "Fieldref",
            CpInfo::MethodRef { .. } => "Methodref",
            CpInfo::InterfaceMethodRef { .. } => "InterfaceMethodref",
            CpInfo::NameAndType { .. } => "NameAndType",
            CpInfo::MethodHandle { .. } => "MethodHandle",
            CpInfo::MethodType(_) => "MethodType",
            CpInfo::Dynamic { .. } => "Dynamic",
            CpInfo::InvokeDynamic { .. } => "InvokeDynamic",
            CpInfo::Module(_) => "Module",
            CpInfo::Package(_) => "Package",
        }
    }
}

/// One `bootstrap_methods` entry as stored in the class file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct RawBootstrapMethod {
    pub(crate) method_ref: u16,
    pub(crate) arguments: Vec<u16>,
}

#[derive(Debug, Clone)]
pub(crate) struct ConstantPool {
    entries: Vec<CpInfo>,
    /// The pool exactly as it appeared in the input, without the count.
    raw: Vec<u8>,
    bootstrap_methods: Vec<RawBootstrapMethod>,
}

impl ConstantPool {
    pub(crate) fn empty() -> Self {
        Self {
            entries: vec![CpInfo::Unusable],
            raw: Vec::new(),
            bootstrap_methods: Vec::new(),
        }
    }

    pub(crate) fn parse(reader: &mut Reader<'_>) -> Result<Self> {
        let count = reader.read_u2()? as usize;
        let start = reader.position();
        let mut entries = Vec::with_capacity(count);
        entries.push(CpInfo::Unusable);

        while entries.len() < count {
            let tag = reader.read_u1()?;
            let info = match tag {
                tag::UTF8 => {
                    let len = reader.read_u2()? as usize;
                    let decoded = mutf8::decode(reader.read_bytes(len)?)?;
                    CpInfo::Utf8 {
                        text: decoded.text,
                        exact: decoded.exact,
                    }
                }
                tag::INTEGER => CpInfo::Integer(reader.read_i4()?),
                tag::FLOAT => CpInfo::Float(reader.read_u4()?),
                tag::LONG => CpInfo::Long(reader.read_u8()? as i64),
                tag::DOUBLE => CpInfo::Double(reader.read_u8()?),
                tag::CLASS => CpInfo::Class(reader.read_u2()?),
                tag::STRING => CpInfo::String(reader.read_u2()?),
                tag::FIELDREF => CpInfo::FieldRef {
                    class: reader.read_u2()?,
                    name_and_type: reader.read_u2()?,
                },
                tag::METHODREF => CpInfo::MethodRef {
                    class: reader.read_u2()?,
                    name_and_type: reader.read_u2()?,
                },
                tag::INTERFACE_METHODREF => CpInfo::InterfaceMethodRef {
                    class: reader.read_u2()?,
                    name_and_type: reader.read_u2()?,
                },
                tag::NAME_AND_TYPE => CpInfo::NameAndType {
                    name: reader.read_u2()?,
                    descriptor: reader.read_u2()?,
                },
                tag::METHOD_HANDLE => CpInfo::MethodHandle {
                    kind: reader.read_u1()?,
                    reference: reader.read_u2()?,
                },
                tag::METHOD_TYPE => CpInfo::MethodType(reader.read_u2()?),
                tag::DYNAMIC => CpInfo::Dynamic {
                    bootstrap: reader.read_u2()?,
                    name_and_type: reader.read_u2()?,
                },
                tag::INVOKE_DYNAMIC => CpInfo::InvokeDynamic {
                    bootstrap: reader.read_u2()?,
                    name_and_type: reader.read_u2()?,
                },
                tag::MODULE => CpInfo::Module(reader.read_u2()?),
                tag::PACKAGE => CpInfo::Package(reader.read_u2()?),
                other => return Err(Error::InvalidConstantPoolTag(other)),
            };

            let wide = matches!(info, CpInfo::Long(_) | CpInfo::Double(_));
            entries.push(info);
            if wide {
                entries.push(CpInfo::Unusable);
            }
        }
        if entries.len() > count.max(1) {
            return Err(Error::Other("long or double constant overruns the constant pool"));
        }

        Ok(Self {
            entries,
            raw: reader.consumed_since(start).to_vec(),
            bootstrap_methods: Vec::new(),
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn entries(&self) -> &[CpInfo] {
        &self.entries
    }

    pub(crate) fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub(crate) fn bootstrap_methods(&self) -> &[RawBootstrapMethod] {
        &self.bootstrap_methods
    }

    pub(crate) fn set_bootstrap_methods(&mut self, table: Vec<RawBootstrapMethod>) {
        self.bootstrap_methods = table;
    }

    pub(crate) fn get(&self, index: u16) -> Result<&CpInfo> {
        match self.entries.get(index as usize) {
            None | Some(CpInfo::Unusable) => Err(Error::InvalidConstantPoolIndex(index)),
            Some(info) => Ok(info),
        }
    }

    pub(crate) fn get_utf8(&self, index: u16) -> Result<&str> {
        match self.get(index)? {
            CpInfo::Utf8 { text, .. } => Ok(text),
            other => Err(mismatch(index, "Utf8", other)),
        }
    }

    pub(crate) fn get_optional_utf8(&self, index: u16) -> Result<Option<String>> {
        if index == 0 {
            return Ok(None);
        }
        self.get_utf8(index).map(|s| Some(s.to_string()))
    }

    pub(crate) fn get_class_name(&self, index: u16) -> Result<String> {
        match self.get(index)? {
            CpInfo::Class(name_index) => Ok(self.get_utf8(*name_index)?.to_string()),
            other => Err(mismatch(index, "Class", other)),
        }
    }

    pub(crate) fn get_optional_class_name(&self, index: u16) -> Result<Option<String>> {
        if index == 0 {
            return Ok(None);
        }
        self.get_class_name(index).map(Some)
    }

    pub(crate) fn get_string_constant(&self, index: u16) -> Result<String> {
        match self.get(index)? {
            CpInfo::String(utf8) => Ok(self.get_utf8(*utf8)?.to_string()),
            other => Err(mismatch(index, "String", other)),
        }
    }

    pub(crate) fn get_integer(&self, index: u16) -> Result<i32> {
        match self.get(index)? {
            CpInfo::Integer(value) => Ok(*value),
            other => Err(mismatch(index, "Integer", other)),
        }
    }

    pub(crate) fn get_name_and_type(&self, index: u16) -> Result<(String, String)> {
        match self.get(index)? {
            CpInfo::NameAndType { name, descriptor } => Ok((
                self.get_utf8(*name)?.to_string(),
                self.get_utf8(*descriptor)?.to_string(),
            )),
            other => Err(mismatch(index, "NameAndType", other)),
        }
    }

    /// Resolves a field or method reference; the flag reports an
    /// `InterfaceMethodref`.
    pub(crate) fn get_member_ref(&self, index: u16) -> Result<(MemberRef, bool)> {
        let (class, name_and_type, is_interface) = match self.get(index)? {
            CpInfo::FieldRef {
                class,
                name_and_type,
            }
            | CpInfo::MethodRef {
                class,
                name_and_type,
            } => (*class, *name_and_type, false),
            CpInfo::InterfaceMethodRef {
                class,
                name_and_type,
            } => (*class, *name_and_type, true),
            other => return Err(mismatch(index, "Fieldref or Methodref", other)),
        };
        let owner = self.get_class_name(class)?;
        let (name, descriptor) = self.get_name_and_type(name_and_type)?;
        Ok((
            MemberRef {
                owner,
                name,
                descriptor,
            },
            is_interface,
        ))
    }

    pub(crate) fn get_handle(&self, index: u16) -> Result<Handle> {
        match self.get(index)? {
            CpInfo::MethodHandle { kind, reference } => {
                let (member, is_interface) = self.get_member_ref(*reference)?;
                Ok(Handle {
                    kind: *kind,
                    owner: member.owner,
                    name: member.name,
                    descriptor: member.descriptor,
                    is_interface,
                })
            }
            other => Err(mismatch(index, "MethodHandle", other)),
        }
    }

    /// Resolves a loadable constant, following nested dynamic constants
    /// through the bootstrap method table.
    pub(crate) fn get_constant(&self, index: u16) -> Result<Constant> {
        self.constant_at_depth(index, 0)
    }

    /// Resolves the operands of an `invokedynamic` constant.
    pub(crate) fn get_invoke_dynamic(&self, index: u16) -> Result<(String, String, BootstrapMethod)> {
        match self.get(index)? {
            CpInfo::InvokeDynamic {
                bootstrap,
                name_and_type,
            } => {
                let (name, descriptor) = self.get_name_and_type(*name_and_type)?;
                let bootstrap = self.bootstrap_method(*bootstrap, 0)?;
                Ok((name, descriptor, bootstrap))
            }
            other => Err(mismatch(index, "InvokeDynamic", other)),
        }
    }

    fn constant_at_depth(&self, index: u16, depth: usize) -> Result<Constant> {
        let constant = match self.get(index)? {
            CpInfo::Integer(v) => Constant::Integer(*v),
            CpInfo::Float(v) => Constant::Float(*v),
            CpInfo::Long(v) => Constant::Long(*v),
            CpInfo::Double(v) => Constant::Double(*v),
            CpInfo::String(utf8) => Constant::String(self.get_utf8(*utf8)?.to_string()),
            CpInfo::Class(utf8) => Constant::Class(self.get_utf8(*utf8)?.to_string()),
            CpInfo::MethodType(utf8) => Constant::MethodType(self.get_utf8(*utf8)?.to_string()),
            CpInfo::MethodHandle { .. } => Constant::MethodHandle(self.get_handle(index)?),
            CpInfo::Dynamic {
                bootstrap,
                name_and_type,
            } => {
                if depth >= MAX_DYNAMIC_DEPTH {
                    return Err(Error::DynamicConstantCycle(index));
                }
                let (name, descriptor) = self.get_name_and_type(*name_and_type)?;
                let bootstrap = self.bootstrap_method(*bootstrap, depth + 1)?;
                Constant::Dynamic(Box::new(ConstantDynamic {
                    name,
                    descriptor,
                    bootstrap,
                }))
            }
            other => return Err(mismatch(index, "loadable constant", other)),
        };
        Ok(constant)
    }

    fn bootstrap_method(&self, bootstrap: u16, depth: usize) -> Result<BootstrapMethod> {
        let raw = self
            .bootstrap_methods
            .get(bootstrap as usize)
            .ok_or(Error::InvalidBootstrapMethodIndex(bootstrap))?;
        let method = self.get_handle(raw.method_ref)?;
        let arguments = raw
            .arguments
            .iter()
            .map(|&arg| self.constant_at_depth(arg, depth))
            .collect::<Result<Vec<_>>>()?;
        Ok(BootstrapMethod { method, arguments })
    }
}

fn mismatch(index: u16, expected: &'static str, found: &CpInfo) -> Error {
    Error::ConstantPoolTypeMismatch {
        index,
        expected,
        found: found.kind(),
    }
}
