use crate::constant::Constant;
use crate::constant_pool::{ConstantPool, CpInfo};
use crate::error::{Error, Result};
use crate::reader::{ByteWriter, Reader};
use crate::symbol_table::SymbolTable;

#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub type_descriptor: String,
    pub elements: Vec<(String, ElementValue)>,
}

impl Annotation {
    pub(crate) fn parse(reader: &mut Reader<'_>, cp: &ConstantPool) -> Result<Self> {
        let type_index = reader.read_u2()?;
        let type_descriptor = cp.get_utf8(type_index)?.to_string();

        let num_element_value_pairs = reader.read_u2()? as usize;
        let mut elements = Vec::with_capacity(num_element_value_pairs);
        for _ in 0..num_element_value_pairs {
            let element_name_index = reader.read_u2()?;
            let name = cp.get_utf8(element_name_index)?.to_string();
            let value = ElementValue::parse(reader, cp)?;
            elements.push((name, value));
        }

        Ok(Self {
            type_descriptor,
            elements,
        })
    }

    pub(crate) fn write(&self, out: &mut ByteWriter, symbols: &mut SymbolTable) -> Result<()> {
        out.u2(symbols.utf8(&self.type_descriptor)?);
        out.u2(len_u16(self.elements.len())?);
        for (name, value) in &self.elements {
            out.u2(symbols.utf8(name)?);
            value.write(out, symbols)?;
        }
        Ok(())
    }

    /// Internal name of the annotation interface, if the descriptor is a
    /// class type.
    pub fn type_internal_name(&self) -> Option<&str> {
        crate::descriptor::descriptor_to_internal_name(&self.type_descriptor)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ElementValue {
    Const(ConstValue),
    Enum {
        type_descriptor: String,
        const_name: String,
    },
    /// Return descriptor of a class literal, e.g. `Ljava/lang/String;` or `V`.
    Class(String),
    Annotation(Box<Annotation>),
    Array(Vec<ElementValue>),
}

impl ElementValue {
    pub(crate) fn parse(reader: &mut Reader<'_>, cp: &ConstantPool) -> Result<Self> {
        let tag = reader.read_u1()?;
        match tag {
            b'B' | b'C' | b'I' | b'S' | b'Z' => {
                let value = cp.get_integer(reader.read_u2()?)?;
                let cv = match tag {
                    b'B' => ConstValue::Byte(value as i8),
                    b'C' => ConstValue::Char(value as u16),
                    b'I' => ConstValue::Int(value),
                    b'S' => ConstValue::Short(value as i16),
                    _ => ConstValue::Boolean(value != 0),
                };
                Ok(ElementValue::Const(cv))
            }
            b'D' => {
                let idx = reader.read_u2()?;
                match cp.get(idx)? {
                    CpInfo::Double(bits) => Ok(ElementValue::Const(ConstValue::Double(f64::from_bits(*bits)))),
                    other => Err(Error::ConstantPoolTypeMismatch {
                        index: idx,
                        expected: "Double",
                        found: other.kind(),
                    }),
                }
            }
            b'F' => {
                let idx = reader.read_u2()?;
                match cp.get(idx)? {
                    CpInfo::Float(bits) => Ok(ElementValue::Const(ConstValue::Float(f32::from_bits(*bits)))),
                    other => Err(Error::ConstantPoolTypeMismatch {
                        index: idx,
                        expected: "Float",
                        found: other.kind(),
                    }),
                }
            }
            b'J' => {
                let idx = reader.read_u2()?;
                match cp.get(idx)? {
                    CpInfo::Long(v) => Ok(ElementValue::Const(ConstValue::Long(*v))),
                    other => Err(Error::ConstantPoolTypeMismatch {
                        index: idx,
                        expected: "Long",
                        found: other.kind(),
                    }),
                }
            }
            b's' => {
                let value = cp.get_utf8(reader.read_u2()?)?.to_string();
                Ok(ElementValue::Const(ConstValue::String(value)))
            }
            b'e' => {
                let type_name_index = reader.read_u2()?;
                let const_name_index = reader.read_u2()?;
                Ok(ElementValue::Enum {
                    type_descriptor: cp.get_utf8(type_name_index)?.to_string(),
                    const_name: cp.get_utf8(const_name_index)?.to_string(),
                })
            }
            b'c' => {
                let class_info_index = reader.read_u2()?;
                Ok(ElementValue::Class(cp.get_utf8(class_info_index)?.to_string()))
            }
            b'@' => Ok(ElementValue::Annotation(Box::new(Annotation::parse(reader, cp)?))),
            b'[' => {
                let num_values = reader.read_u2()? as usize;
                let mut values = Vec::with_capacity(num_values);
                for _ in 0..num_values {
                    values.push(ElementValue::parse(reader, cp)?);
                }
                Ok(ElementValue::Array(values))
            }
            _ => Err(Error::MalformedAttribute("annotation element_value")),
        }
    }

    pub(crate) fn write(&self, out: &mut ByteWriter, symbols: &mut SymbolTable) -> Result<()> {
        match self {
            ElementValue::Const(value) => {
                let (tag, index) = match value {
                    ConstValue::Byte(v) => (b'B', symbols.constant(&Constant::Integer(*v as i32))?),
                    ConstValue::Char(v) => (b'C', symbols.constant(&Constant::Integer(*v as i32))?),
                    ConstValue::Short(v) => (b'S', symbols.constant(&Constant::Integer(*v as i32))?),
                    ConstValue::Int(v) => (b'I', symbols.constant(&Constant::Integer(*v))?),
                    ConstValue::Boolean(v) => (b'Z', symbols.constant(&Constant::Integer(*v as i32))?),
                    ConstValue::Long(v) => (b'J', symbols.constant(&Constant::Long(*v))?),
                    ConstValue::Float(v) => (b'F', symbols.constant(&Constant::Float(v.to_bits()))?),
                    ConstValue::Double(v) => (b'D', symbols.constant(&Constant::Double(v.to_bits()))?),
                    ConstValue::String(v) => (b's', symbols.utf8(v)?),
                };
                out.u1(tag);
                out.u2(index);
            }
            ElementValue::Enum {
                type_descriptor,
                const_name,
            } => {
                out.u1(b'e');
                out.u2(symbols.utf8(type_descriptor)?);
                out.u2(symbols.utf8(const_name)?);
            }
            ElementValue::Class(descriptor) => {
                out.u1(b'c');
                out.u2(symbols.utf8(descriptor)?);
            }
            ElementValue::Annotation(annotation) => {
                out.u1(b'@');
                annotation.write(out, symbols)?;
            }
            ElementValue::Array(values) => {
                out.u1(b'[');
                out.u2(len_u16(values.len())?);
                for value in values {
                    value.write(out, symbols)?;
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConstValue {
    Byte(i8),
    /// UTF-16 code unit; may be an unpaired surrogate.
    Char(u16),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Boolean(bool),
    String(String),
}

/// `type_annotation` structure (JVMS 4.7.20).
#[derive(Debug, Clone, PartialEq)]
pub struct TypeAnnotation {
    pub target_type: u8,
    pub target: TargetInfo,
    /// `(type_path_kind, type_argument_index)` steps.
    pub target_path: Vec<(u8, u8)>,
    pub annotation: Annotation,
}

/// Code offsets are kept as read; the code writer relocates them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TargetInfo {
    TypeParameter { index: u8 },
    Supertype { index: u16 },
    TypeParameterBound { type_parameter: u8, bound: u8 },
    Empty,
    FormalParameter { index: u8 },
    Throws { index: u16 },
    LocalVar(Vec<LocalVarTarget>),
    Catch { exception_table_index: u16 },
    Offset(u32),
    TypeArgument { offset: u32, index: u8 },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocalVarTarget {
    pub start: u32,
    pub length: u32,
    pub index: u16,
}

impl TypeAnnotation {
    pub(crate) fn parse(reader: &mut Reader<'_>, cp: &ConstantPool) -> Result<Self> {
        let target_type = reader.read_u1()?;
        let target = match target_type {
            0x00 | 0x01 => TargetInfo::TypeParameter {
                index: reader.read_u1()?,
            },
            0x10 => TargetInfo::Supertype {
                index: reader.read_u2()?,
            },
            0x11 | 0x12 => TargetInfo::TypeParameterBound {
                type_parameter: reader.read_u1()?,
                bound: reader.read_u1()?,
            },
            0x13..=0x15 => TargetInfo::Empty,
            0x16 => TargetInfo::FormalParameter {
                index: reader.read_u1()?,
            },
            0x17 => TargetInfo::Throws {
                index: reader.read_u2()?,
            },
            0x40 | 0x41 => {
                let count = reader.read_u2()? as usize;
                let mut table = Vec::with_capacity(count);
                for _ in 0..count {
                    table.push(LocalVarTarget {
                        start: reader.read_u2()? as u32,
                        length: reader.read_u2()? as u32,
                        index: reader.read_u2()?,
                    });
                }
                TargetInfo::LocalVar(table)
            }
            0x42 => TargetInfo::Catch {
                exception_table_index: reader.read_u2()?,
            },
            0x43..=0x46 => TargetInfo::Offset(reader.read_u2()? as u32),
            0x47..=0x4B => TargetInfo::TypeArgument {
                offset: reader.read_u2()? as u32,
                index: reader.read_u1()?,
            },
            _ => return Err(Error::MalformedAttribute("type annotation target")),
        };

        let path_length = reader.read_u1()? as usize;
        let mut target_path = Vec::with_capacity(path_length);
        for _ in 0..path_length {
            target_path.push((reader.read_u1()?, reader.read_u1()?));
        }
        let annotation = Annotation::parse(reader, cp)?;
        Ok(Self {
            target_type,
            target,
            target_path,
            annotation,
        })
    }

    /// Writes the annotation, relocating code offsets through `offset`.
    pub(crate) fn write(
        &self,
        out: &mut ByteWriter,
        symbols: &mut SymbolTable,
        offset: &dyn Fn(u32) -> u32,
    ) -> Result<()> {
        out.u1(self.target_type);
        match &self.target {
            TargetInfo::TypeParameter { index } | TargetInfo::FormalParameter { index } => {
                out.u1(*index)
            }
            TargetInfo::Supertype { index } | TargetInfo::Throws { index } => out.u2(*index),
            TargetInfo::TypeParameterBound {
                type_parameter,
                bound,
            } => {
                out.u1(*type_parameter);
                out.u1(*bound);
            }
            TargetInfo::Empty => {}
            TargetInfo::LocalVar(table) => {
                out.u2(len_u16(table.len())?);
                for entry in table {
                    let start = offset(entry.start);
                    let end = offset(entry.start + entry.length);
                    out.u2(code_offset(start)?);
                    out.u2(code_offset(end.saturating_sub(start))?);
                    out.u2(entry.index);
                }
            }
            TargetInfo::Catch {
                exception_table_index,
            } => out.u2(*exception_table_index),
            TargetInfo::Offset(at) => out.u2(code_offset(offset(*at))?),
            TargetInfo::TypeArgument { offset: at, index } => {
                out.u2(code_offset(offset(*at))?);
                out.u1(*index);
            }
        }
        out.u1(u8::try_from(self.target_path.len()).map_err(|_| Error::MalformedAttribute("type_path"))?);
        for (kind, index) in &self.target_path {
            out.u1(*kind);
            out.u1(*index);
        }
        self.annotation.write(out, symbols)
    }
}

pub(crate) fn parse_annotations(reader: &mut Reader<'_>, cp: &ConstantPool) -> Result<Vec<Annotation>> {
    let count = reader.read_u2()? as usize;
    let mut annotations = Vec::with_capacity(count);
    for _ in 0..count {
        annotations.push(Annotation::parse(reader, cp)?);
    }
    Ok(annotations)
}

pub(crate) fn parse_type_annotations(
    reader: &mut Reader<'_>,
    cp: &ConstantPool,
) -> Result<Vec<TypeAnnotation>> {
    let count = reader.read_u2()? as usize;
    let mut annotations = Vec::with_capacity(count);
    for _ in 0..count {
        annotations.push(TypeAnnotation::parse(reader, cp)?);
    }
    Ok(annotations)
}

pub(crate) fn len_u16(len: usize) -> Result<u16> {
    u16::try_from(len).map_err(|_| Error::Other("table exceeds 65535 entries"))
}

fn code_offset(offset: u32) -> Result<u16> {
    u16::try_from(offset).map_err(|_| Error::CodeTooLarge(offset as usize))
}
