use crate::attribute::{parse_attributes, write_attribute, write_attributes, Attribute};
use crate::annotation::len_u16;
use crate::code::Code;
use crate::constant_pool::{ConstantPool, RawBootstrapMethod};
use crate::error::{Error, Result};
use crate::reader::{ByteWriter, Reader};
use crate::symbol_table::SymbolTable;

pub const MAGIC: u32 = 0xCAFEBABE;

pub mod access {
    pub const PUBLIC: u16 = 0x0001;
    pub const PRIVATE: u16 = 0x0002;
    pub const PROTECTED: u16 = 0x0004;
    pub const STATIC: u16 = 0x0008;
    pub const FINAL: u16 = 0x0010;
    pub const SUPER: u16 = 0x0020;
    pub const INTERFACE: u16 = 0x0200;
    pub const ABSTRACT: u16 = 0x0400;
    pub const ANNOTATION: u16 = 0x2000;
    pub const ENUM: u16 = 0x4000;
    pub const MODULE: u16 = 0x8000;
}

/// A fully decoded class file.
///
/// The original constant pool is retained so that writing keeps every
/// original index valid; new entries are appended after it.
#[derive(Debug, Clone)]
pub struct ClassFile {
    pub minor_version: u16,
    pub major_version: u16,
    pub access_flags: u16,
    pub this_class: String,
    pub super_class: Option<String>,
    pub interfaces: Vec<String>,
    pub fields: Vec<Member>,
    pub methods: Vec<Member>,
    pub attributes: Vec<Attribute>,
    constant_pool: ConstantPool,
}

/// A field or method.
#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub access_flags: u16,
    pub name: String,
    pub descriptor: String,
    pub attributes: Vec<Attribute>,
}

impl Member {
    pub fn code(&self) -> Option<&Code> {
        self.attributes.iter().find_map(|attr| match attr {
            Attribute::Code(code) => Some(code.as_ref()),
            _ => None,
        })
    }

    pub fn code_mut(&mut self) -> Option<&mut Code> {
        self.attributes.iter_mut().find_map(|attr| match attr {
            Attribute::Code(code) => Some(code.as_mut()),
            _ => None,
        })
    }

    pub fn is_static(&self) -> bool {
        self.access_flags & access::STATIC != 0
    }
}

/// The structural header of a class: enough to walk the type hierarchy
/// without decoding members or attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassHeader {
    pub minor_version: u16,
    pub major_version: u16,
    pub access_flags: u16,
    pub this_class: String,
    pub super_class: Option<String>,
    pub interfaces: Vec<String>,
}

impl ClassHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);
        let (header, _) = parse_header(&mut reader)?;
        Ok(header)
    }

    pub fn is_interface(&self) -> bool {
        self.access_flags & access::INTERFACE != 0
    }
}

fn parse_header(reader: &mut Reader<'_>) -> Result<(ClassHeader, ConstantPool)> {
    let magic = reader.read_u4()?;
    if magic != MAGIC {
        return Err(Error::InvalidMagic(magic));
    }

    let minor_version = reader.read_u2()?;
    let major_version = reader.read_u2()?;
    let cp = ConstantPool::parse(reader)?;

    let access_flags = reader.read_u2()?;
    let this_class = cp.get_class_name(reader.read_u2()?)?;
    let super_class = cp.get_optional_class_name(reader.read_u2()?)?;

    let interfaces_count = reader.read_u2()? as usize;
    let mut interfaces = Vec::with_capacity(interfaces_count);
    for _ in 0..interfaces_count {
        interfaces.push(cp.get_class_name(reader.read_u2()?)?);
    }

    let header = ClassHeader {
        minor_version,
        major_version,
        access_flags,
        this_class,
        super_class,
        interfaces,
    };
    Ok((header, cp))
}

/// Member skeleton: attributes are decoded once the bootstrap method table
/// is known.
struct RawMember<'a> {
    access_flags: u16,
    name: String,
    descriptor: String,
    attributes: &'a [u8],
}

impl ClassFile {
    /// Starts an empty class with no members or attributes.
    pub fn new(
        major_version: u16,
        access_flags: u16,
        this_class: impl Into<String>,
        super_class: Option<&str>,
    ) -> Self {
        Self {
            minor_version: 0,
            major_version,
            access_flags,
            this_class: this_class.into(),
            super_class: super_class.map(str::to_string),
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            attributes: Vec::new(),
            constant_pool: ConstantPool::empty(),
        }
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);
        let (header, mut cp) = parse_header(&mut reader)?;

        let fields = parse_raw_members(&mut reader, &cp)?;
        let methods = parse_raw_members(&mut reader, &cp)?;

        let attributes_start = reader.position();
        skip_attributes(&mut reader)?;
        reader.ensure_empty()?;
        let class_attributes = &bytes[attributes_start..];

        cp.set_bootstrap_methods(find_bootstrap_methods(class_attributes, &cp)?);

        let fields = fields
            .into_iter()
            .map(|member| decode_member(member, &cp))
            .collect::<Result<Vec<_>>>()?;
        let methods = methods
            .into_iter()
            .map(|member| decode_member(member, &cp))
            .collect::<Result<Vec<_>>>()?;
        let attributes = parse_attributes(&mut Reader::new(class_attributes), &cp)?;

        Ok(Self {
            minor_version: header.minor_version,
            major_version: header.major_version,
            access_flags: header.access_flags,
            this_class: header.this_class,
            super_class: header.super_class,
            interfaces: header.interfaces,
            fields,
            methods,
            attributes,
            constant_pool: cp,
        })
    }

    pub fn header(&self) -> ClassHeader {
        ClassHeader {
            minor_version: self.minor_version,
            major_version: self.major_version,
            access_flags: self.access_flags,
            this_class: self.this_class.clone(),
            super_class: self.super_class.clone(),
            interfaces: self.interfaces.clone(),
        }
    }

    pub fn is_interface(&self) -> bool {
        self.access_flags & access::INTERFACE != 0
    }

    /// Serializes the class. Constant pool entries and bootstrap methods of
    /// the parsed input are kept at their original indices.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut symbols = SymbolTable::from_pool(&self.constant_pool);

        let mut body = ByteWriter::new();
        body.u2(self.access_flags);
        body.u2(symbols.class(&self.this_class)?);
        match &self.super_class {
            Some(name) => body.u2(symbols.class(name)?),
            None => body.u2(0),
        }
        body.u2(len_u16(self.interfaces.len())?);
        for name in &self.interfaces {
            body.u2(symbols.class(name)?);
        }
        for members in [&self.fields, &self.methods] {
            body.u2(len_u16(members.len())?);
            for member in members {
                body.u2(member.access_flags);
                body.u2(symbols.utf8(&member.name)?);
                body.u2(symbols.utf8(&member.descriptor)?);
                write_attributes(&member.attributes, &mut body, &mut symbols)?;
            }
        }

        // Everything that may add bootstrap methods is encoded before the
        // table itself.
        let mut encoded = Vec::with_capacity(self.attributes.len() + 1);
        for attribute in &self.attributes {
            match attribute {
                Attribute::BootstrapMethods => encoded.push(None),
                other => encoded.push(Some(write_attribute(other, &mut symbols)?)),
            }
        }
        let has_placeholder = encoded.iter().any(Option::is_none);
        if !has_placeholder && !symbols.bootstrap_methods().is_empty() {
            encoded.push(None);
        }
        let bootstrap = if encoded.iter().any(Option::is_none) {
            let name_index = symbols.utf8("BootstrapMethods")?;
            Some((name_index, encode_bootstrap_methods(symbols.bootstrap_methods())?))
        } else {
            None
        };

        body.u2(len_u16(encoded.len())?);
        for entry in &encoded {
            match (entry, &bootstrap) {
                (Some((name_index, info)), _) | (None, Some((name_index, info))) => {
                    body.attribute(*name_index, info)?
                }
                (None, None) => {}
            }
        }

        let mut out = ByteWriter::new();
        out.u4(MAGIC);
        out.u2(self.minor_version);
        out.u2(self.major_version);
        out.u2(symbols.count());
        out.bytes(symbols.pool_bytes());
        out.bytes(body.as_slice());
        Ok(out.into_vec())
    }
}

fn parse_raw_members<'a>(reader: &mut Reader<'a>, cp: &ConstantPool) -> Result<Vec<RawMember<'a>>> {
    let count = reader.read_u2()? as usize;
    let mut members = Vec::with_capacity(count);
    for _ in 0..count {
        let access_flags = reader.read_u2()?;
        let name = cp.get_utf8(reader.read_u2()?)?.to_string();
        let descriptor = cp.get_utf8(reader.read_u2()?)?.to_string();
        let start = reader.position();
        skip_attributes(reader)?;
        members.push(RawMember {
            access_flags,
            name,
            descriptor,
            attributes: reader.consumed_since(start),
        });
    }
    Ok(members)
}

fn decode_member(member: RawMember<'_>, cp: &ConstantPool) -> Result<Member> {
    Ok(Member {
        access_flags: member.access_flags,
        name: member.name,
        descriptor: member.descriptor,
        attributes: parse_attributes(&mut Reader::new(member.attributes), cp)?,
    })
}

fn skip_attributes(reader: &mut Reader<'_>) -> Result<()> {
    let count = reader.read_u2()?;
    for _ in 0..count {
        reader.skip(2)?;
        let length = reader.read_u4()? as usize;
        reader.skip(length)?;
    }
    Ok(())
}

fn find_bootstrap_methods(attributes: &[u8], cp: &ConstantPool) -> Result<Vec<RawBootstrapMethod>> {
    let mut reader = Reader::new(attributes);
    let count = reader.read_u2()?;
    for _ in 0..count {
        let name_index = reader.read_u2()?;
        let length = reader.read_u4()? as usize;
        let info = reader.read_bytes(length)?;
        if cp.get_utf8(name_index)? != "BootstrapMethods" {
            continue;
        }
        let mut sub = Reader::new(info);
        let num = sub.read_u2()? as usize;
        let mut table = Vec::with_capacity(num);
        for _ in 0..num {
            let method_ref = sub.read_u2()?;
            let argc = sub.read_u2()? as usize;
            let mut arguments = Vec::with_capacity(argc);
            for _ in 0..argc {
                arguments.push(sub.read_u2()?);
            }
            table.push(RawBootstrapMethod {
                method_ref,
                arguments,
            });
        }
        sub.ensure_empty()
            .map_err(|_| Error::MalformedAttribute("BootstrapMethods"))?;
        return Ok(table);
    }
    Ok(Vec::new())
}

fn encode_bootstrap_methods(table: &[RawBootstrapMethod]) -> Result<Vec<u8>> {
    let mut out = ByteWriter::new();
    out.u2(len_u16(table.len())?);
    for method in table {
        out.u2(method.method_ref);
        out.u2(len_u16(method.arguments.len())?);
        for &arg in &method.arguments {
            out.u2(arg);
        }
    }
    Ok(out.into_vec())
}
