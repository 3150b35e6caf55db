//! Constant pool builder used when writing a class file.
//!
//! The table starts as a verbatim copy of the parsed pool and bootstrap
//! method table, so every index from the input stays valid. New entries are
//! appended only for values that do not already exist.

use std::collections::HashMap;

use crate::constant::{handle_kind, BootstrapMethod, Constant, Handle, MemberRef};
use crate::constant_pool::{tag, ConstantPool, CpInfo, RawBootstrapMethod};
use crate::error::{Error, Result};
use crate::mutf8;
use crate::reader::ByteWriter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Key {
    Integer(i32),
    Float(u32),
    Long(i64),
    Double(u64),
    Class(u16),
    String(u16),
    FieldRef(u16, u16),
    MethodRef(u16, u16),
    InterfaceMethodRef(u16, u16),
    NameAndType(u16, u16),
    MethodHandle(u8, u16),
    MethodType(u16),
    Dynamic(u16, u16),
    InvokeDynamic(u16, u16),
}

#[derive(Debug)]
pub(crate) struct SymbolTable {
    pool: ByteWriter,
    next_index: u32,
    utf8: HashMap<String, u16>,
    entries: HashMap<Key, u16>,
    bootstrap_methods: Vec<RawBootstrapMethod>,
    bootstrap_index: HashMap<RawBootstrapMethod, u16>,
}

impl SymbolTable {
    pub(crate) fn from_pool(cp: &ConstantPool) -> Self {
        let mut pool = ByteWriter::new();
        pool.bytes(cp.raw());

        let mut utf8 = HashMap::new();
        let mut inexact = Vec::new();
        let mut entries = HashMap::new();
        for (index, info) in cp.entries().iter().enumerate() {
            let index = index as u16;
            let key = match info {
                CpInfo::Utf8 { text, exact: true } => {
                    utf8.entry(text.clone()).or_insert(index);
                    continue;
                }
                CpInfo::Utf8 { text, exact: false } => {
                    inexact.push((text.clone(), index));
                    continue;
                }
                CpInfo::Unusable | CpInfo::Module(_) | CpInfo::Package(_) => continue,
                CpInfo::Integer(v) => Key::Integer(*v),
                CpInfo::Float(v) => Key::Float(*v),
                CpInfo::Long(v) => Key::Long(*v),
                CpInfo::Double(v) => Key::Double(*v),
                CpInfo::Class(n) => Key::Class(*n),
                CpInfo::String(n) => Key::String(*n),
                CpInfo::FieldRef {
                    class,
                    name_and_type,
                } => Key::FieldRef(*class, *name_and_type),
                CpInfo::MethodRef {
                    class,
                    name_and_type,
                } => Key::MethodRef(*class, *name_and_type),
                CpInfo::InterfaceMethodRef {
                    class,
                    name_and_type,
                } => Key::InterfaceMethodRef(*class, *name_and_type),
                CpInfo::NameAndType { name, descriptor } => Key::NameAndType(*name, *descriptor),
                CpInfo::MethodHandle { kind, reference } => Key::MethodHandle(*kind, *reference),
                CpInfo::MethodType(n) => Key::MethodType(*n),
                CpInfo::Dynamic {
                    bootstrap,
                    name_and_type,
                } => Key::Dynamic(*bootstrap, *name_and_type),
                CpInfo::InvokeDynamic {
                    bootstrap,
                    name_and_type,
                } => Key::InvokeDynamic(*bootstrap, *name_and_type),
            };
            entries.entry(key).or_insert(index);
        }
        // Inexact text only matches itself when no exact entry claims it, so
        // unchanged strings with raw NULs or overlong forms keep their original
        // bytes.
        for (text, index) in inexact {
            utf8.entry(text).or_insert(index);
        }

        let bootstrap_methods = cp.bootstrap_methods().to_vec();
        let mut bootstrap_index = HashMap::new();
        for (index, method) in bootstrap_methods.iter().enumerate() {
            bootstrap_index.entry(method.clone()).or_insert(index as u16);
        }

        Self {
            pool,
            next_index: cp.len().max(1) as u32,
            utf8,
            entries,
            bootstrap_methods,
            bootstrap_index,
        }
    }

    /// Value of `constant_pool_count`.
    pub(crate) fn count(&self) -> u16 {
        self.next_index as u16
    }

    pub(crate) fn pool_bytes(&self) -> &[u8] {
        self.pool.as_slice()
    }

    pub(crate) fn bootstrap_methods(&self) -> &[RawBootstrapMethod] {
        &self.bootstrap_methods
    }

    pub(crate) fn utf8(&mut self, text: &str) -> Result<u16> {
        if let Some(&index) = self.utf8.get(text) {
            return Ok(index);
        }
        let encoded = mutf8::encode(text);
        let len = u16::try_from(encoded.len()).map_err(|_| Error::Other("string constant too long"))?;
        let index = self.reserve(1)?;
        self.pool.u1(tag::UTF8);
        self.pool.u2(len);
        self.pool.bytes(&encoded);
        self.utf8.insert(text.to_string(), index);
        Ok(index)
    }

    pub(crate) fn class(&mut self, internal_name: &str) -> Result<u16> {
        let name = self.utf8(internal_name)?;
        self.entry(Key::Class(name))
    }

    pub(crate) fn string(&mut self, value: &str) -> Result<u16> {
        let utf8 = self.utf8(value)?;
        self.entry(Key::String(utf8))
    }

    pub(crate) fn name_and_type(&mut self, name: &str, descriptor: &str) -> Result<u16> {
        let name = self.utf8(name)?;
        let descriptor = self.utf8(descriptor)?;
        self.entry(Key::NameAndType(name, descriptor))
    }

    pub(crate) fn field_ref(&mut self, member: &MemberRef) -> Result<u16> {
        let (class, nat) = self.member_parts(member)?;
        self.entry(Key::FieldRef(class, nat))
    }

    pub(crate) fn method_ref(&mut self, member: &MemberRef, is_interface: bool) -> Result<u16> {
        let (class, nat) = self.member_parts(member)?;
        if is_interface {
            self.entry(Key::InterfaceMethodRef(class, nat))
        } else {
            self.entry(Key::MethodRef(class, nat))
        }
    }

    pub(crate) fn handle(&mut self, handle: &Handle) -> Result<u16> {
        let member = MemberRef {
            owner: handle.owner.clone(),
            name: handle.name.clone(),
            descriptor: handle.descriptor.clone(),
        };
        let reference = if handle_kind::is_field(handle.kind) {
            self.field_ref(&member)?
        } else {
            self.method_ref(&member, handle.is_interface)?
        };
        self.entry(Key::MethodHandle(handle.kind, reference))
    }

    pub(crate) fn constant(&mut self, constant: &Constant) -> Result<u16> {
        match constant {
            Constant::Integer(v) => self.entry(Key::Integer(*v)),
            Constant::Float(v) => self.entry(Key::Float(*v)),
            Constant::Long(v) => self.entry(Key::Long(*v)),
            Constant::Double(v) => self.entry(Key::Double(*v)),
            Constant::String(v) => self.string(v),
            Constant::Class(name) => self.class(name),
            Constant::MethodType(descriptor) => {
                let descriptor = self.utf8(descriptor)?;
                self.entry(Key::MethodType(descriptor))
            }
            Constant::MethodHandle(handle) => self.handle(handle),
            Constant::Dynamic(dynamic) => {
                let bootstrap = self.bootstrap_method(&dynamic.bootstrap)?;
                let nat = self.name_and_type(&dynamic.name, &dynamic.descriptor)?;
                self.entry(Key::Dynamic(bootstrap, nat))
            }
        }
    }

    pub(crate) fn invoke_dynamic(
        &mut self,
        name: &str,
        descriptor: &str,
        bootstrap: &BootstrapMethod,
    ) -> Result<u16> {
        let bootstrap = self.bootstrap_method(bootstrap)?;
        let nat = self.name_and_type(name, descriptor)?;
        self.entry(Key::InvokeDynamic(bootstrap, nat))
    }

    pub(crate) fn bootstrap_method(&mut self, method: &BootstrapMethod) -> Result<u16> {
        let method_ref = self.handle(&method.method)?;
        let arguments = method
            .arguments
            .iter()
            .map(|arg| self.constant(arg))
            .collect::<Result<Vec<_>>>()?;
        let raw = RawBootstrapMethod {
            method_ref,
            arguments,
        };
        if let Some(&index) = self.bootstrap_index.get(&raw) {
            return Ok(index);
        }
        let index = u16::try_from(self.bootstrap_methods.len())
            .map_err(|_| Error::BootstrapTableOverflow)?;
        self.bootstrap_methods.push(raw.clone());
        self.bootstrap_index.insert(raw, index);
        Ok(index)
    }

    fn member_parts(&mut self, member: &MemberRef) -> Result<(u16, u16)> {
        let class = self.class(&member.owner)?;
        let nat = self.name_and_type(&member.name, &member.descriptor)?;
        Ok((class, nat))
    }

    fn entry(&mut self, key: Key) -> Result<u16> {
        if let Some(&index) = self.entries.get(&key) {
            return Ok(index);
        }
        let slots = match key {
            Key::Long(_) | Key::Double(_) => 2,
            _ => 1,
        };
        let index = self.reserve(slots)?;
        let pool = &mut self.pool;
        match key {
            Key::Integer(v) => {
                pool.u1(tag::INTEGER);
                pool.i4(v);
            }
            Key::Float(v) => {
                pool.u1(tag::FLOAT);
                pool.u4(v);
            }
            Key::Long(v) => {
                pool.u1(tag::LONG);
                pool.u8(v as u64);
            }
            Key::Double(v) => {
                pool.u1(tag::DOUBLE);
                pool.u8(v);
            }
            Key::Class(n) => {
                pool.u1(tag::CLASS);
                pool.u2(n);
            }
            Key::String(n) => {
                pool.u1(tag::STRING);
                pool.u2(n);
            }
            Key::FieldRef(a, b) => {
                pool.u1(tag::FIELDREF);
                pool.u2(a);
                pool.u2(b);
            }
            Key::MethodRef(a, b) => {
                pool.u1(tag::METHODREF);
                pool.u2(a);
                pool.u2(b);
            }
            Key::InterfaceMethodRef(a, b) => {
                pool.u1(tag::INTERFACE_METHODREF);
                pool.u2(a);
                pool.u2(b);
            }
            Key::NameAndType(a, b) => {
                pool.u1(tag::NAME_AND_TYPE);
                pool.u2(a);
                pool.u2(b);
            }
            Key::MethodHandle(kind, reference) => {
                pool.u1(tag::METHOD_HANDLE);
                pool.u1(kind);
                pool.u2(reference);
            }
            Key::MethodType(n) => {
                pool.u1(tag::METHOD_TYPE);
                pool.u2(n);
            }
            Key::Dynamic(a, b) => {
                pool.u1(tag::DYNAMIC);
                pool.u2(a);
                pool.u2(b);
            }
            Key::InvokeDynamic(a, b) => {
                pool.u1(tag::INVOKE_DYNAMIC);
                pool.u2(a);
                pool.u2(b);
            }
        }
        self.entries.insert(key, index);
        Ok(index)
    }

    fn reserve(&mut self, slots: u32) -> Result<u16> {
        let index = self.next_index;
        if index + slots > u16::MAX as u32 {
            return Err(Error::ConstantPoolOverflow);
        }
        self.next_index += slots;
        Ok(index as u16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::Reader;

    fn pool_of(bytes: &[u8]) -> ConstantPool {
        ConstantPool::parse(&mut Reader::new(bytes)).unwrap()
    }

    #[test]
    fn reuses_seeded_entries() {
        // count = 3: #1 Utf8 "a/B", #2 Class #1
        let bytes = [0, 3, 1, 0, 3, b'a', b'/', b'B', 7, 0, 1];
        let cp = pool_of(&bytes);
        let mut table = SymbolTable::from_pool(&cp);
        assert_eq!(table.class("a/B").unwrap(), 2);
        assert_eq!(table.count(), 3);
        assert_eq!(table.pool_bytes(), &bytes[2..]);
    }

    #[test]
    fn appends_new_entries_after_seeded_pool() {
        let bytes = [0, 3, 1, 0, 3, b'a', b'/', b'B', 7, 0, 1];
        let cp = pool_of(&bytes);
        let mut table = SymbolTable::from_pool(&cp);
        assert_eq!(table.class("c/D").unwrap(), 4);
        assert_eq!(table.constant(&Constant::Long(7)).unwrap(), 5);
        assert_eq!(table.count(), 7);
        assert_eq!(table.constant(&Constant::Integer(1)).unwrap(), 7);
    }

    #[test]
    fn identical_bootstrap_methods_share_an_index() {
        let cp = pool_of(&[0, 1]);
        let mut table = SymbolTable::from_pool(&cp);
        let method = BootstrapMethod {
            method: Handle {
                kind: handle_kind::INVOKE_STATIC,
                owner: "a/Bsm".to_string(),
                name: "bsm".to_string(),
                descriptor: "()V".to_string(),
                is_interface: false,
            },
            arguments: vec![Constant::String("x".to_string())],
        };
        assert_eq!(table.bootstrap_method(&method).unwrap(), 0);
        assert_eq!(table.bootstrap_method(&method).unwrap(), 0);
        assert_eq!(table.bootstrap_methods().len(), 1);
    }
}
