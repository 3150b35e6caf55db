//! `StackMapTable` frames.
//!
//! Frames are stored with absolute code offsets in their compressed form, so
//! re-emitting an unchanged table only needs the offsets relocated.

use crate::annotation::len_u16;
use crate::constant_pool::ConstantPool;
use crate::error::{Error, Result};
use crate::reader::{ByteWriter, Reader};
use crate::symbol_table::SymbolTable;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VerificationType {
    Top,
    Integer,
    Float,
    Double,
    Long,
    Null,
    UninitializedThis,
    /// Internal name, or a descriptor for array types.
    Object(String),
    /// Created by the `new` instruction at this code offset.
    Uninitialized(u32),
}

impl VerificationType {
    pub fn is_wide(&self) -> bool {
        matches!(self, VerificationType::Long | VerificationType::Double)
    }

    fn parse(reader: &mut Reader<'_>, cp: &ConstantPool) -> Result<Self> {
        Ok(match reader.read_u1()? {
            0 => VerificationType::Top,
            1 => VerificationType::Integer,
            2 => VerificationType::Float,
            3 => VerificationType::Double,
            4 => VerificationType::Long,
            5 => VerificationType::Null,
            6 => VerificationType::UninitializedThis,
            7 => VerificationType::Object(cp.get_class_name(reader.read_u2()?)?),
            8 => VerificationType::Uninitialized(reader.read_u2()? as u32),
            _ => return Err(Error::MalformedAttribute("StackMapTable")),
        })
    }

    fn write(
        &self,
        out: &mut ByteWriter,
        symbols: &mut SymbolTable,
        offset: &dyn Fn(u32) -> u32,
    ) -> Result<()> {
        match self {
            VerificationType::Top => out.u1(0),
            VerificationType::Integer => out.u1(1),
            VerificationType::Float => out.u1(2),
            VerificationType::Double => out.u1(3),
            VerificationType::Long => out.u1(4),
            VerificationType::Null => out.u1(5),
            VerificationType::UninitializedThis => out.u1(6),
            VerificationType::Object(name) => {
                out.u1(7);
                out.u2(symbols.class(name)?);
            }
            VerificationType::Uninitialized(at) => {
                out.u1(8);
                out.u2(
                    u16::try_from(offset(*at)).map_err(|_| Error::CodeTooLarge(*at as usize))?,
                );
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameKind {
    Same,
    SameLocals1StackItem(VerificationType),
    Chop(u8),
    Append(Vec<VerificationType>),
    Full {
        locals: Vec<VerificationType>,
        stack: Vec<VerificationType>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackMapFrame {
    pub offset: u32,
    pub kind: FrameKind,
}

impl StackMapFrame {
    /// Picks the smallest encoding describing `(locals, stack)` relative to
    /// the previous frame's locals. Locals use the frame layout where long
    /// and double take a single entry.
    pub fn compress(
        offset: u32,
        previous_locals: &[VerificationType],
        locals: &[VerificationType],
        stack: &[VerificationType],
    ) -> Self {
        let kind = match stack.len() {
            0 if locals == previous_locals => FrameKind::Same,
            1 if locals == previous_locals => FrameKind::SameLocals1StackItem(stack[0].clone()),
            0 if locals.len() < previous_locals.len()
                && previous_locals.len() - locals.len() <= 3
                && previous_locals.starts_with(locals) =>
            {
                FrameKind::Chop((previous_locals.len() - locals.len()) as u8)
            }
            0 if locals.len() > previous_locals.len()
                && locals.len() - previous_locals.len() <= 3
                && locals.starts_with(previous_locals) =>
            {
                FrameKind::Append(locals[previous_locals.len()..].to_vec())
            }
            _ => FrameKind::Full {
                locals: locals.to_vec(),
                stack: stack.to_vec(),
            },
        };
        Self { offset, kind }
    }

    pub fn visit_types_mut(&mut self, f: &mut impl FnMut(&mut VerificationType)) {
        match &mut self.kind {
            FrameKind::Same | FrameKind::Chop(_) => {}
            FrameKind::SameLocals1StackItem(ty) => f(ty),
            FrameKind::Append(types) => types.iter_mut().for_each(f),
            FrameKind::Full { locals, stack } => {
                locals.iter_mut().for_each(&mut *f);
                stack.iter_mut().for_each(f);
            }
        }
    }
}

pub(crate) fn parse_stack_map_table(
    reader: &mut Reader<'_>,
    cp: &ConstantPool,
) -> Result<Vec<StackMapFrame>> {
    let count = reader.read_u2()? as usize;
    let mut frames = Vec::with_capacity(count);
    let mut previous: Option<u32> = None;
    for _ in 0..count {
        let frame_type = reader.read_u1()?;
        let (delta, kind) = match frame_type {
            0..=63 => (frame_type as u32, FrameKind::Same),
            64..=127 => (
                (frame_type - 64) as u32,
                FrameKind::SameLocals1StackItem(VerificationType::parse(reader, cp)?),
            ),
            247 => {
                let delta = reader.read_u2()? as u32;
                (
                    delta,
                    FrameKind::SameLocals1StackItem(VerificationType::parse(reader, cp)?),
                )
            }
            248..=250 => (reader.read_u2()? as u32, FrameKind::Chop(251 - frame_type)),
            251 => (reader.read_u2()? as u32, FrameKind::Same),
            252..=254 => {
                let delta = reader.read_u2()? as u32;
                let mut locals = Vec::with_capacity((frame_type - 251) as usize);
                for _ in 251..frame_type {
                    locals.push(VerificationType::parse(reader, cp)?);
                }
                (delta, FrameKind::Append(locals))
            }
            255 => {
                let delta = reader.read_u2()? as u32;
                let locals = parse_types(reader, cp)?;
                let stack = parse_types(reader, cp)?;
                (delta, FrameKind::Full { locals, stack })
            }
            _ => return Err(Error::MalformedAttribute("StackMapTable")),
        };
        let offset = match previous {
            None => delta,
            Some(prev) => prev + delta + 1,
        };
        previous = Some(offset);
        frames.push(StackMapFrame { offset, kind });
    }
    Ok(frames)
}

fn parse_types(reader: &mut Reader<'_>, cp: &ConstantPool) -> Result<Vec<VerificationType>> {
    let count = reader.read_u2()? as usize;
    let mut types = Vec::with_capacity(count);
    for _ in 0..count {
        types.push(VerificationType::parse(reader, cp)?);
    }
    Ok(types)
}

/// Writes the `StackMapTable` body. Frames must be sorted by offset and
/// distinct after relocation.
pub(crate) fn write_stack_map_table(
    frames: &[StackMapFrame],
    out: &mut ByteWriter,
    symbols: &mut SymbolTable,
    offset: &dyn Fn(u32) -> u32,
) -> Result<()> {
    out.u2(len_u16(frames.len())?);
    let mut previous: Option<u32> = None;
    for frame in frames {
        let at = offset(frame.offset);
        let delta = match previous {
            None => at,
            Some(prev) if at > prev => at - prev - 1,
            Some(_) => return Err(Error::MalformedAttribute("StackMapTable")),
        };
        previous = Some(at);
        let delta16 = u16::try_from(delta).map_err(|_| Error::CodeTooLarge(at as usize))?;

        match &frame.kind {
            FrameKind::Same if delta < 64 => out.u1(delta as u8),
            FrameKind::Same => {
                out.u1(251);
                out.u2(delta16);
            }
            FrameKind::SameLocals1StackItem(ty) => {
                if delta < 64 {
                    out.u1(64 + delta as u8);
                } else {
                    out.u1(247);
                    out.u2(delta16);
                }
                ty.write(out, symbols, offset)?;
            }
            FrameKind::Chop(k) => {
                out.u1(251 - k);
                out.u2(delta16);
            }
            FrameKind::Append(types) => {
                out.u1(251 + types.len() as u8);
                out.u2(delta16);
                for ty in types {
                    ty.write(out, symbols, offset)?;
                }
            }
            FrameKind::Full { locals, stack } => {
                out.u1(255);
                out.u2(delta16);
                out.u2(len_u16(locals.len())?);
                for ty in locals {
                    ty.write(out, symbols, offset)?;
                }
                out.u2(len_u16(stack.len())?);
                for ty in stack {
                    ty.write(out, symbols, offset)?;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use VerificationType::*;

    #[test]
    fn compress_picks_smallest_encoding() {
        let base = vec![Object("a/B".to_string()), Integer];
        assert_eq!(StackMapFrame::compress(3, &base, &base, &[]).kind, FrameKind::Same);
        assert_eq!(
            StackMapFrame::compress(3, &base, &base, &[Null]).kind,
            FrameKind::SameLocals1StackItem(Null)
        );
        assert_eq!(StackMapFrame::compress(3, &base, &base[..1], &[]).kind, FrameKind::Chop(1));
        let mut grown = base.clone();
        grown.push(Long);
        assert_eq!(
            StackMapFrame::compress(3, &base, &grown, &[]).kind,
            FrameKind::Append(vec![Long])
        );
        assert!(matches!(
            StackMapFrame::compress(3, &base, &[Float], &[Integer, Integer]).kind,
            FrameKind::Full { .. }
        ));
    }
}
