//! `Code` attribute bodies: decoded instructions, exception table and the
//! offset-bearing code attributes.

use std::collections::HashSet;

use crate::annotation::{len_u16, parse_type_annotations, TypeAnnotation};
use crate::attribute::{RawAttribute, Visibility};
use crate::constant::{BootstrapMethod, Constant, MemberRef};
use crate::constant_pool::ConstantPool;
use crate::descriptor::parse_method_descriptor;
use crate::error::{Error, Result};
use crate::frame::{parse_stack_map_table, write_stack_map_table, StackMapFrame};
use crate::opcodes::*;
use crate::reader::{ByteWriter, Reader};
use crate::symbol_table::SymbolTable;

/// Largest legal `code_length`.
pub const MAX_CODE_LENGTH: usize = 65535;

#[derive(Debug, Clone, PartialEq)]
pub struct Code {
    pub max_stack: u16,
    pub max_locals: u16,
    pub instructions: Vec<Instruction>,
    /// Length of the original bytecode; the offset just past the last
    /// instruction.
    pub code_length: u32,
    pub exception_table: Vec<ExceptionHandler>,
    pub attributes: Vec<CodeAttribute>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Offset in the bytecode this instruction was read from.
    pub offset: u32,
    pub insn: Insn,
}

/// A decoded instruction. Jump targets are absolute offsets in the original
/// bytecode; constant pool operands are symbolic.
#[derive(Debug, Clone, PartialEq)]
pub enum Insn {
    /// Any instruction without operands, including `xload_<n>`.
    Simple(u8),
    /// `bipush` or `sipush`.
    Push { opcode: u8, value: i16 },
    /// `ldc`, `ldc_w` or `ldc2_w`.
    Ldc { opcode: u8, constant: Constant },
    /// Local variable access with an explicit index, including `ret`.
    Var { opcode: u8, index: u16, wide: bool },
    Iinc { index: u16, delta: i16, wide: bool },
    Jump { opcode: u8, target: u32 },
    TableSwitch {
        default: u32,
        low: i32,
        high: i32,
        targets: Vec<u32>,
    },
    LookupSwitch { default: u32, pairs: Vec<(i32, u32)> },
    /// `new`, `anewarray`, `checkcast` or `instanceof`.
    Type { opcode: u8, class: String },
    Field { opcode: u8, field: MemberRef },
    Method {
        opcode: u8,
        method: MemberRef,
        is_interface: bool,
    },
    InvokeDynamic {
        name: String,
        descriptor: String,
        bootstrap: BootstrapMethod,
    },
    NewArray(u8),
    MultiANewArray { class: String, dimensions: u8 },
}

impl Insn {
    pub fn opcode(&self) -> u8 {
        match self {
            Insn::Simple(op) => *op,
            Insn::Push { opcode, .. }
            | Insn::Ldc { opcode, .. }
            | Insn::Var { opcode, .. }
            | Insn::Jump { opcode, .. }
            | Insn::Type { opcode, .. }
            | Insn::Field { opcode, .. }
            | Insn::Method { opcode, .. } => *opcode,
            Insn::Iinc { .. } => IINC,
            Insn::TableSwitch { .. } => TABLESWITCH,
            Insn::LookupSwitch { .. } => LOOKUPSWITCH,
            Insn::InvokeDynamic { .. } => INVOKEDYNAMIC,
            Insn::NewArray(_) => NEWARRAY,
            Insn::MultiANewArray { .. } => MULTIANEWARRAY,
        }
    }

    /// Every offset this instruction may transfer control to.
    pub fn branch_targets(&self) -> Vec<u32> {
        match self {
            Insn::Jump { target, .. } => vec![*target],
            Insn::TableSwitch {
                default, targets, ..
            } => std::iter::once(*default).chain(targets.iter().copied()).collect(),
            Insn::LookupSwitch { default, pairs } => std::iter::once(*default)
                .chain(pairs.iter().map(|(_, target)| *target))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Whether control never falls through to the next instruction.
    pub fn ends_block(&self) -> bool {
        match self {
            Insn::Simple(op) => matches!(*op, IRETURN..=RETURN | ATHROW),
            Insn::Jump { opcode, .. } => matches!(*opcode, GOTO | GOTO_W),
            Insn::Var { opcode, .. } => *opcode == RET,
            Insn::TableSwitch { .. } | Insn::LookupSwitch { .. } => true,
            _ => false,
        }
    }

    pub fn is_subroutine(&self) -> bool {
        match self {
            Insn::Jump { opcode, .. } => matches!(*opcode, JSR | JSR_W),
            Insn::Var { opcode, .. } => *opcode == RET,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionHandler {
    pub start: u32,
    pub end: u32,
    pub handler: u32,
    /// `None` catches everything (`finally`).
    pub catch_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineNumber {
    pub start: u32,
    pub line: u16,
}

/// Entry of `LocalVariableTable` or `LocalVariableTypeTable`; for the latter
/// `descriptor` holds the generic signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariable {
    pub start: u32,
    pub length: u32,
    pub name: String,
    pub descriptor: String,
    pub index: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CodeAttribute {
    StackMapTable(Vec<StackMapFrame>),
    LineNumberTable(Vec<LineNumber>),
    LocalVariableTable(Vec<LocalVariable>),
    LocalVariableTypeTable(Vec<LocalVariable>),
    TypeAnnotations {
        visibility: Visibility,
        annotations: Vec<TypeAnnotation>,
    },
    Unknown(RawAttribute),
}

impl Code {
    pub(crate) fn parse(info: &[u8], cp: &ConstantPool) -> Result<Self> {
        let mut reader = Reader::new(info);
        let max_stack = reader.read_u2()?;
        let max_locals = reader.read_u2()?;
        let code_length = reader.read_u4()? as usize;
        if code_length == 0 || code_length > MAX_CODE_LENGTH {
            return Err(Error::MalformedAttribute("Code"));
        }
        let bytecode = reader.read_bytes(code_length)?;
        let instructions = parse_instructions(bytecode, cp)?;
        let code_length = code_length as u32;

        let boundaries: HashSet<u32> = instructions.iter().map(|i| i.offset).collect();
        for instruction in &instructions {
            for target in instruction.insn.branch_targets() {
                if !boundaries.contains(&target) {
                    return Err(Error::InvalidCodeOffset {
                        offset: instruction.offset,
                        target: target as i64,
                    });
                }
            }
        }

        let handler_count = reader.read_u2()? as usize;
        let mut exception_table = Vec::with_capacity(handler_count);
        for _ in 0..handler_count {
            let start = reader.read_u2()? as u32;
            let end = reader.read_u2()? as u32;
            let handler = reader.read_u2()? as u32;
            let catch_type = cp.get_optional_class_name(reader.read_u2()?)?;
            let valid = boundaries.contains(&start)
                && boundaries.contains(&handler)
                && (end == code_length || boundaries.contains(&end))
                && start < end;
            if !valid {
                return Err(Error::MalformedAttribute("Code exception_table"));
            }
            exception_table.push(ExceptionHandler {
                start,
                end,
                handler,
                catch_type,
            });
        }

        let attributes_count = reader.read_u2()? as usize;
        let mut attributes = Vec::with_capacity(attributes_count);
        for _ in 0..attributes_count {
            let name_index = reader.read_u2()?;
            let length = reader.read_u4()? as usize;
            let body = reader.read_bytes(length)?;
            let name = cp.get_utf8(name_index)?;
            attributes.push(parse_code_attribute(name, body, cp)?);
        }
        reader.ensure_empty()?;

        Ok(Self {
            max_stack,
            max_locals,
            instructions,
            code_length,
            exception_table,
            attributes,
        })
    }

    pub fn stack_map_table(&self) -> Option<&[StackMapFrame]> {
        self.attributes.iter().find_map(|attr| match attr {
            CodeAttribute::StackMapTable(frames) => Some(frames.as_slice()),
            _ => None,
        })
    }

    pub fn has_subroutines(&self) -> bool {
        self.instructions.iter().any(|i| i.insn.is_subroutine())
    }

    /// Replaces (or removes, for an empty list) the `StackMapTable`.
    pub fn set_stack_map_table(&mut self, frames: Vec<StackMapFrame>) {
        let position = self
            .attributes
            .iter()
            .position(|attr| matches!(attr, CodeAttribute::StackMapTable(_)));
        match (position, frames.is_empty()) {
            (Some(at), true) => {
                self.attributes.remove(at);
            }
            (Some(at), false) => self.attributes[at] = CodeAttribute::StackMapTable(frames),
            (None, true) => {}
            (None, false) => self.attributes.insert(0, CodeAttribute::StackMapTable(frames)),
        }
    }

    /// Old-offset end of the instruction at `index`.
    pub fn instruction_end(&self, index: usize) -> u32 {
        self.instructions
            .get(index + 1)
            .map(|next| next.offset)
            .unwrap_or(self.code_length)
    }

    pub(crate) fn write(&self, symbols: &mut SymbolTable) -> Result<Vec<u8>> {
        let operands = self
            .instructions
            .iter()
            .map(|instruction| intern_operand(&instruction.insn, symbols))
            .collect::<Result<Vec<_>>>()?;

        let layout = Layout::compute(self, &operands)?;
        let offset = |old: u32| layout.map(old);

        let mut bytecode = ByteWriter::new();
        for ((instruction, operand), &at) in self
            .instructions
            .iter()
            .zip(&operands)
            .zip(&layout.starts)
        {
            emit_instruction(&mut bytecode, instruction, *operand, at, &offset)?;
        }
        debug_assert_eq!(bytecode.len() as u32, layout.code_length);

        let mut out = ByteWriter::new();
        out.u2(self.max_stack);
        out.u2(self.max_locals);
        out.u4(layout.code_length);
        out.bytes(bytecode.as_slice());

        out.u2(len_u16(self.exception_table.len())?);
        for handler in &self.exception_table {
            out.u2(offset_u16(offset(handler.start))?);
            out.u2(offset_u16(offset(handler.end))?);
            out.u2(offset_u16(offset(handler.handler))?);
            match &handler.catch_type {
                Some(class) => out.u2(symbols.class(class)?),
                None => out.u2(0),
            }
        }

        out.u2(len_u16(self.attributes.len())?);
        for attribute in &self.attributes {
            let mut body = ByteWriter::new();
            let name = match attribute {
                CodeAttribute::StackMapTable(frames) => {
                    write_stack_map_table(frames, &mut body, symbols, &offset)?;
                    "StackMapTable"
                }
                CodeAttribute::LineNumberTable(lines) => {
                    body.u2(len_u16(lines.len())?);
                    for line in lines {
                        body.u2(offset_u16(offset(line.start))?);
                        body.u2(line.line);
                    }
                    "LineNumberTable"
                }
                CodeAttribute::LocalVariableTable(vars) => {
                    write_local_variables(vars, &mut body, symbols, &offset)?;
                    "LocalVariableTable"
                }
                CodeAttribute::LocalVariableTypeTable(vars) => {
                    write_local_variables(vars, &mut body, symbols, &offset)?;
                    "LocalVariableTypeTable"
                }
                CodeAttribute::TypeAnnotations {
                    visibility,
                    annotations,
                } => {
                    body.u2(len_u16(annotations.len())?);
                    for annotation in annotations {
                        annotation.write(&mut body, symbols, &offset)?;
                    }
                    visibility.type_annotations_name()
                }
                CodeAttribute::Unknown(raw) => {
                    body.bytes(&raw.info);
                    raw.name.as_str()
                }
            };
            let name_index = symbols.utf8(name)?;
            out.attribute(name_index, body.as_slice())?;
        }
        Ok(out.into_vec())
    }
}

fn parse_code_attribute(name: &str, body: &[u8], cp: &ConstantPool) -> Result<CodeAttribute> {
    let mut reader = Reader::new(body);
    let attribute = match name {
        "StackMapTable" => CodeAttribute::StackMapTable(parse_stack_map_table(&mut reader, cp)?),
        "LineNumberTable" => {
            let count = reader.read_u2()? as usize;
            let mut lines = Vec::with_capacity(count);
            for _ in 0..count {
                lines.push(LineNumber {
                    start: reader.read_u2()? as u32,
                    line: reader.read_u2()?,
                });
            }
            CodeAttribute::LineNumberTable(lines)
        }
        "LocalVariableTable" => CodeAttribute::LocalVariableTable(parse_local_variables(&mut reader, cp)?),
        "LocalVariableTypeTable" => {
            CodeAttribute::LocalVariableTypeTable(parse_local_variables(&mut reader, cp)?)
        }
        "RuntimeVisibleTypeAnnotations" => CodeAttribute::TypeAnnotations {
            visibility: Visibility::Visible,
            annotations: parse_type_annotations(&mut reader, cp)?,
        },
        "RuntimeInvisibleTypeAnnotations" => CodeAttribute::TypeAnnotations {
            visibility: Visibility::Invisible,
            annotations: parse_type_annotations(&mut reader, cp)?,
        },
        _ => {
            return Ok(CodeAttribute::Unknown(RawAttribute {
                name: name.to_string(),
                info: body.to_vec(),
            }))
        }
    };
    reader.ensure_empty()?;
    Ok(attribute)
}

fn parse_local_variables(reader: &mut Reader<'_>, cp: &ConstantPool) -> Result<Vec<LocalVariable>> {
    let count = reader.read_u2()? as usize;
    let mut vars = Vec::with_capacity(count);
    for _ in 0..count {
        vars.push(LocalVariable {
            start: reader.read_u2()? as u32,
            length: reader.read_u2()? as u32,
            name: cp.get_utf8(reader.read_u2()?)?.to_string(),
            descriptor: cp.get_utf8(reader.read_u2()?)?.to_string(),
            index: reader.read_u2()?,
        });
    }
    Ok(vars)
}

fn write_local_variables(
    vars: &[LocalVariable],
    out: &mut ByteWriter,
    symbols: &mut SymbolTable,
    offset: &dyn Fn(u32) -> u32,
) -> Result<()> {
    out.u2(len_u16(vars.len())?);
    for var in vars {
        let start = offset(var.start);
        let end = offset(var.start + var.length);
        out.u2(offset_u16(start)?);
        out.u2(offset_u16(end.saturating_sub(start))?);
        out.u2(symbols.utf8(&var.name)?);
        out.u2(symbols.utf8(&var.descriptor)?);
        out.u2(var.index);
    }
    Ok(())
}

fn parse_instructions(code: &[u8], cp: &ConstantPool) -> Result<Vec<Instruction>> {
    let mut reader = Reader::new(code);
    let mut instructions = Vec::new();
    while reader.remaining() > 0 {
        let offset = reader.position() as u32;
        let opcode = reader.read_u1()?;
        let target = |reader: &mut Reader<'_>, wide: bool| -> Result<u32> {
            let delta = if wide {
                reader.read_i4()? as i64
            } else {
                reader.read_i2()? as i64
            };
            let target = offset as i64 + delta;
            if target < 0 || target >= code.len() as i64 {
                return Err(Error::InvalidCodeOffset { offset, target });
            }
            Ok(target as u32)
        };

        let insn = match opcode {
            NOP..=DCONST_1 => Insn::Simple(opcode),
            BIPUSH => Insn::Push {
                opcode,
                value: reader.read_i1()? as i16,
            },
            SIPUSH => Insn::Push {
                opcode,
                value: reader.read_i2()?,
            },
            LDC => Insn::Ldc {
                opcode,
                constant: cp.get_constant(reader.read_u1()? as u16)?,
            },
            LDC_W | LDC2_W => Insn::Ldc {
                opcode,
                constant: cp.get_constant(reader.read_u2()?)?,
            },
            ILOAD..=ALOAD | ISTORE..=ASTORE | RET => Insn::Var {
                opcode,
                index: reader.read_u1()? as u16,
                wide: false,
            },
            ILOAD_0..=SALOAD | ISTORE_0..=LXOR => Insn::Simple(opcode),
            IINC => Insn::Iinc {
                index: reader.read_u1()? as u16,
                delta: reader.read_i1()? as i16,
                wide: false,
            },
            I2L..=DCMPG => Insn::Simple(opcode),
            IFEQ..=JSR | IFNULL | IFNONNULL => Insn::Jump {
                opcode,
                target: target(&mut reader, false)?,
            },
            GOTO_W | JSR_W => Insn::Jump {
                opcode,
                target: target(&mut reader, true)?,
            },
            TABLESWITCH => {
                skip_padding(&mut reader)?;
                let default = target(&mut reader, true)?;
                let low = reader.read_i4()?;
                let high = reader.read_i4()?;
                if high < low {
                    return Err(Error::MalformedAttribute("Code tableswitch"));
                }
                let count = (high as i64 - low as i64 + 1) as usize;
                if count > reader.remaining() / 4 {
                    return Err(Error::UnexpectedEof);
                }
                let mut targets = Vec::with_capacity(count);
                for _ in 0..count {
                    targets.push(target(&mut reader, true)?);
                }
                Insn::TableSwitch {
                    default,
                    low,
                    high,
                    targets,
                }
            }
            LOOKUPSWITCH => {
                skip_padding(&mut reader)?;
                let default = target(&mut reader, true)?;
                let npairs = reader.read_i4()?;
                if npairs < 0 || npairs as usize > reader.remaining() / 8 {
                    return Err(Error::MalformedAttribute("Code lookupswitch"));
                }
                let mut pairs = Vec::with_capacity(npairs as usize);
                for _ in 0..npairs {
                    let key = reader.read_i4()?;
                    pairs.push((key, target(&mut reader, true)?));
                }
                Insn::LookupSwitch { default, pairs }
            }
            IRETURN..=RETURN | ARRAYLENGTH | ATHROW | MONITORENTER | MONITOREXIT => {
                Insn::Simple(opcode)
            }
            GETSTATIC..=PUTFIELD => Insn::Field {
                opcode,
                field: cp.get_member_ref(reader.read_u2()?)?.0,
            },
            INVOKEVIRTUAL..=INVOKESTATIC => {
                let (method, is_interface) = cp.get_member_ref(reader.read_u2()?)?;
                Insn::Method {
                    opcode,
                    method,
                    is_interface,
                }
            }
            INVOKEINTERFACE => {
                let (method, _) = cp.get_member_ref(reader.read_u2()?)?;
                reader.skip(2)?;
                Insn::Method {
                    opcode,
                    method,
                    is_interface: true,
                }
            }
            INVOKEDYNAMIC => {
                let (name, descriptor, bootstrap) = cp.get_invoke_dynamic(reader.read_u2()?)?;
                reader.skip(2)?;
                Insn::InvokeDynamic {
                    name,
                    descriptor,
                    bootstrap,
                }
            }
            NEW | ANEWARRAY | CHECKCAST | INSTANCEOF => Insn::Type {
                opcode,
                class: cp.get_class_name(reader.read_u2()?)?,
            },
            NEWARRAY => Insn::NewArray(reader.read_u1()?),
            WIDE => {
                let modified = reader.read_u1()?;
                match modified {
                    ILOAD..=ALOAD | ISTORE..=ASTORE | RET => Insn::Var {
                        opcode: modified,
                        index: reader.read_u2()?,
                        wide: true,
                    },
                    IINC => Insn::Iinc {
                        index: reader.read_u2()?,
                        delta: reader.read_i2()?,
                        wide: true,
                    },
                    _ => {
                        return Err(Error::InvalidOpcode {
                            offset,
                            opcode: modified,
                        })
                    }
                }
            }
            MULTIANEWARRAY => Insn::MultiANewArray {
                class: cp.get_class_name(reader.read_u2()?)?,
                dimensions: reader.read_u1()?,
            },
            _ => return Err(Error::InvalidOpcode { offset, opcode }),
        };
        instructions.push(Instruction { offset, insn });
    }
    Ok(instructions)
}

fn skip_padding(reader: &mut Reader<'_>) -> Result<()> {
    let pad = (4 - reader.position() % 4) % 4;
    reader.skip(pad)
}

fn switch_padding(offset: u32) -> u32 {
    (4 - (offset + 1) % 4) % 4
}

fn intern_operand(insn: &Insn, symbols: &mut SymbolTable) -> Result<Option<u16>> {
    let index = match insn {
        Insn::Ldc { constant, .. } => symbols.constant(constant)?,
        Insn::Type { class, .. } | Insn::MultiANewArray { class, .. } => symbols.class(class)?,
        Insn::Field { field, .. } => symbols.field_ref(field)?,
        Insn::Method {
            method,
            is_interface,
            ..
        } => symbols.method_ref(method, *is_interface)?,
        Insn::InvokeDynamic {
            name,
            descriptor,
            bootstrap,
        } => symbols.invoke_dynamic(name, descriptor, bootstrap)?,
        _ => return Ok(None),
    };
    Ok(Some(index))
}

fn encoded_size(insn: &Insn, operand: Option<u16>, at: u32) -> u32 {
    match insn {
        Insn::Simple(_) => 1,
        Insn::Push { opcode, .. } => {
            if *opcode == BIPUSH {
                2
            } else {
                3
            }
        }
        Insn::Ldc { opcode, .. } => {
            if *opcode == LDC && operand.unwrap_or(0) <= u8::MAX as u16 {
                2
            } else {
                3
            }
        }
        Insn::Var { wide, .. } => {
            if *wide {
                4
            } else {
                2
            }
        }
        Insn::Iinc { wide, .. } => {
            if *wide {
                6
            } else {
                3
            }
        }
        Insn::Jump { opcode, .. } => {
            if matches!(*opcode, GOTO_W | JSR_W) {
                5
            } else {
                3
            }
        }
        Insn::TableSwitch { targets, .. } => 1 + switch_padding(at) + 12 + 4 * targets.len() as u32,
        Insn::LookupSwitch { pairs, .. } => 1 + switch_padding(at) + 8 + 8 * pairs.len() as u32,
        Insn::Type { .. } | Insn::Field { .. } => 3,
        Insn::Method { opcode, .. } => {
            if *opcode == INVOKEINTERFACE {
                5
            } else {
                3
            }
        }
        Insn::InvokeDynamic { .. } => 5,
        Insn::NewArray(_) => 2,
        Insn::MultiANewArray { .. } => 4,
    }
}

/// New positions of every instruction plus an old-to-new offset map.
struct Layout {
    starts: Vec<u32>,
    /// Indexed by old offset, `code_length + 1` entries.
    map: Vec<u32>,
    code_length: u32,
}

impl Layout {
    fn compute(code: &Code, operands: &[Option<u16>]) -> Result<Self> {
        let mut starts = Vec::with_capacity(code.instructions.len());
        let mut sizes = Vec::with_capacity(code.instructions.len());
        let mut at = 0u32;
        for (instruction, operand) in code.instructions.iter().zip(operands) {
            let size = encoded_size(&instruction.insn, *operand, at);
            starts.push(at);
            sizes.push(size);
            at += size;
        }
        if at as usize > MAX_CODE_LENGTH {
            return Err(Error::CodeTooLarge(at as usize));
        }

        let mut map = vec![0u32; code.code_length as usize + 1];
        for (index, instruction) in code.instructions.iter().enumerate() {
            let old_start = instruction.offset;
            let old_end = code.instruction_end(index);
            for old in old_start..old_end {
                let inside = (old - old_start).min(sizes[index].saturating_sub(1));
                map[old as usize] = starts[index] + inside;
            }
        }
        map[code.code_length as usize] = at;

        Ok(Self {
            starts,
            map,
            code_length: at,
        })
    }

    fn map(&self, old: u32) -> u32 {
        self.map
            .get(old as usize)
            .copied()
            .unwrap_or(self.code_length)
    }
}

fn offset_u16(offset: u32) -> Result<u16> {
    u16::try_from(offset).map_err(|_| Error::CodeTooLarge(offset as usize))
}

fn emit_instruction(
    out: &mut ByteWriter,
    instruction: &Instruction,
    operand: Option<u16>,
    at: u32,
    offset: &dyn Fn(u32) -> u32,
) -> Result<()> {
    let relative = |target: u32| offset(target) as i64 - at as i64;
    let operand = || operand.ok_or(Error::Other("missing constant pool operand"));
    match &instruction.insn {
        Insn::Simple(op) => out.u1(*op),
        Insn::Push { opcode, value } => {
            out.u1(*opcode);
            if *opcode == BIPUSH {
                out.u1(*value as u8);
            } else {
                out.u2(*value as u16);
            }
        }
        Insn::Ldc { opcode, .. } => {
            let index = operand()?;
            if *opcode == LDC && index <= u8::MAX as u16 {
                out.u1(LDC);
                out.u1(index as u8);
            } else {
                out.u1(if *opcode == LDC { LDC_W } else { *opcode });
                out.u2(index);
            }
        }
        Insn::Var {
            opcode,
            index,
            wide,
        } => {
            if *wide {
                out.u1(WIDE);
                out.u1(*opcode);
                out.u2(*index);
            } else {
                out.u1(*opcode);
                out.u1(*index as u8);
            }
        }
        Insn::Iinc { index, delta, wide } => {
            if *wide {
                out.u1(WIDE);
                out.u1(IINC);
                out.u2(*index);
                out.u2(*delta as u16);
            } else {
                out.u1(IINC);
                out.u1(*index as u8);
                out.u1(*delta as u8);
            }
        }
        Insn::Jump { opcode, target } => {
            out.u1(*opcode);
            let delta = relative(*target);
            if matches!(*opcode, GOTO_W | JSR_W) {
                out.i4(delta as i32);
            } else {
                let short = i16::try_from(delta).map_err(|_| Error::BranchOffsetOverflow {
                    offset: at,
                    target: offset(*target),
                })?;
                out.u2(short as u16);
            }
        }
        Insn::TableSwitch {
            default,
            low,
            high,
            targets,
        } => {
            out.u1(TABLESWITCH);
            for _ in 0..switch_padding(at) {
                out.u1(0);
            }
            out.i4(relative(*default) as i32);
            out.i4(*low);
            out.i4(*high);
            for target in targets {
                out.i4(relative(*target) as i32);
            }
        }
        Insn::LookupSwitch { default, pairs } => {
            out.u1(LOOKUPSWITCH);
            for _ in 0..switch_padding(at) {
                out.u1(0);
            }
            out.i4(relative(*default) as i32);
            out.i4(pairs.len() as i32);
            for (key, target) in pairs {
                out.i4(*key);
                out.i4(relative(*target) as i32);
            }
        }
        Insn::Type { opcode, .. } | Insn::Field { opcode, .. } => {
            out.u1(*opcode);
            out.u2(operand()?);
        }
        Insn::Method { opcode, method, .. } => {
            out.u1(*opcode);
            out.u2(operand()?);
            if *opcode == INVOKEINTERFACE {
                let descriptor = parse_method_descriptor(&method.descriptor)?;
                let count = u8::try_from(descriptor.param_slots() + 1)
                    .map_err(|_| Error::InvalidDescriptor(method.descriptor.clone()))?;
                out.u1(count);
                out.u1(0);
            }
        }
        Insn::InvokeDynamic { .. } => {
            out.u1(INVOKEDYNAMIC);
            out.u2(operand()?);
            out.u2(0);
        }
        Insn::NewArray(atype) => {
            out.u1(NEWARRAY);
            out.u1(*atype);
        }
        Insn::MultiANewArray { dimensions, .. } => {
            out.u1(MULTIANEWARRAY);
            out.u2(operand()?);
            out.u1(*dimensions);
        }
    }
    Ok(())
}
