//! The class file constant pool.
//!
//! Entries are kept in their on-disk form (UTF-8 entries as raw modified
//! UTF-8 bytes) so that a pool which is only appended to serializes back to
//! the exact original prefix.

use std::borrow::Cow;

use crate::bytes::{ByteReader, PutBytes};
use crate::error::ClassFileError;

const TAG_UTF8: u8 = 1;
const TAG_INTEGER: u8 = 3;
const TAG_FLOAT: u8 = 4;
const TAG_LONG: u8 = 5;
const TAG_DOUBLE: u8 = 6;
const TAG_CLASS: u8 = 7;
const TAG_STRING: u8 = 8;
const TAG_FIELDREF: u8 = 9;
const TAG_METHODREF: u8 = 10;
const TAG_INTERFACE_METHODREF: u8 = 11;
const TAG_NAME_AND_TYPE: u8 = 12;
const TAG_METHOD_HANDLE: u8 = 15;
const TAG_METHOD_TYPE: u8 = 16;
const TAG_DYNAMIC: u8 = 17;
const TAG_INVOKE_DYNAMIC: u8 = 18;
const TAG_MODULE: u8 = 19;
const TAG_PACKAGE: u8 = 20;

/// One constant pool slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constant {
    /// Modified UTF-8 bytes.
    Utf8(Vec<u8>),
    /// Raw 32-bit integer.
    Integer(u32),
    /// Raw 32-bit float bits.
    Float(u32),
    /// Raw 64-bit long.
    Long(u64),
    /// Raw 64-bit double bits.
    Double(u64),
    /// Class reference: name index.
    Class(u16),
    /// String literal: UTF-8 index.
    String(u16),
    /// Field reference: class index, name-and-type index.
    Fieldref(u16, u16),
    /// Method reference: class index, name-and-type index.
    Methodref(u16, u16),
    /// Interface method reference: class index, name-and-type index.
    InterfaceMethodref(u16, u16),
    /// Name index, descriptor index.
    NameAndType(u16, u16),
    /// Reference kind, reference index.
    MethodHandle(u8, u16),
    /// Descriptor index.
    MethodType(u16),
    /// Bootstrap method index, name-and-type index.
    Dynamic(u16, u16),
    /// Bootstrap method index, name-and-type index.
    InvokeDynamic(u16, u16),
    /// Module name index.
    Module(u16),
    /// Package name index.
    Package(u16),
    /// Slot 0, and the slot after every long or double.
    Unusable,
}

/// A resolved field or method reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRef<'a> {
    /// Internal name of the declaring class.
    pub owner: Cow<'a, str>,
    /// Member name.
    pub name: Cow<'a, str>,
    /// Member descriptor.
    pub descriptor: Cow<'a, str>,
}

/// The constant pool of one class file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstantPool {
    entries: Vec<Constant>,
}

impl ConstantPool {
    /// Creates a pool containing only the reserved slot 0.
    pub fn new() -> Self {
        Self {
            entries: vec![Constant::Unusable],
        }
    }

    pub(crate) fn parse(r: &mut ByteReader<'_>) -> Result<Self, ClassFileError> {
        let count = r.u16()?;
        let mut entries = Vec::with_capacity(count as usize);
        entries.push(Constant::Unusable);
        let mut index = 1u16;
        while index < count {
            let tag = r.u8()?;
            let constant = match tag {
                TAG_UTF8 => {
                    let len = r.u16()? as usize;
                    Constant::Utf8(r.bytes(len)?.to_vec())
                }
                TAG_INTEGER => Constant::Integer(r.u32()?),
                TAG_FLOAT => Constant::Float(r.u32()?),
                TAG_LONG => Constant::Long(r.u64()?),
                TAG_DOUBLE => Constant::Double(r.u64()?),
                TAG_CLASS => Constant::Class(r.u16()?),
                TAG_STRING => Constant::String(r.u16()?),
                TAG_FIELDREF => Constant::Fieldref(r.u16()?, r.u16()?),
                TAG_METHODREF => Constant::Methodref(r.u16()?, r.u16()?),
                TAG_INTERFACE_METHODREF => Constant::InterfaceMethodref(r.u16()?, r.u16()?),
                TAG_NAME_AND_TYPE => Constant::NameAndType(r.u16()?, r.u16()?),
                TAG_METHOD_HANDLE => Constant::MethodHandle(r.u8()?, r.u16()?),
                TAG_METHOD_TYPE => Constant::MethodType(r.u16()?),
                TAG_DYNAMIC => Constant::Dynamic(r.u16()?, r.u16()?),
                TAG_INVOKE_DYNAMIC => Constant::InvokeDynamic(r.u16()?, r.u16()?),
                TAG_MODULE => Constant::Module(r.u16()?),
                TAG_PACKAGE => Constant::Package(r.u16()?),
                _ => return Err(ClassFileError::BadConstantTag { tag, index }),
            };
            let wide = matches!(constant, Constant::Long(_) | Constant::Double(_));
            entries.push(constant);
            index += 1;
            if wide {
                entries.push(Constant::Unusable);
                index += 1;
            }
        }
        Ok(Self { entries })
    }

    pub(crate) fn write(&self, out: &mut Vec<u8>) {
        out.put_u16(self.entries.len() as u16);
        for constant in &self.entries[1..] {
            match constant {
                Constant::Utf8(bytes) => {
                    out.put_u8(TAG_UTF8);
                    out.put_u16(bytes.len() as u16);
                    out.extend_from_slice(bytes);
                }
                Constant::Integer(v) => {
                    out.put_u8(TAG_INTEGER);
                    out.put_u32(*v);
                }
                Constant::Float(v) => {
                    out.put_u8(TAG_FLOAT);
                    out.put_u32(*v);
                }
                Constant::Long(v) => {
                    out.put_u8(TAG_LONG);
                    out.put_u64(*v);
                }
                Constant::Double(v) => {
                    out.put_u8(TAG_DOUBLE);
                    out.put_u64(*v);
                }
                Constant::Class(i) => put_ref(out, TAG_CLASS, *i),
                Constant::String(i) => put_ref(out, TAG_STRING, *i),
                Constant::Fieldref(a, b) => put_pair(out, TAG_FIELDREF, *a, *b),
                Constant::Methodref(a, b) => put_pair(out, TAG_METHODREF, *a, *b),
                Constant::InterfaceMethodref(a, b) => {
                    put_pair(out, TAG_INTERFACE_METHODREF, *a, *b)
                }
                Constant::NameAndType(a, b) => put_pair(out, TAG_NAME_AND_TYPE, *a, *b),
                Constant::MethodHandle(kind, i) => {
                    out.put_u8(TAG_METHOD_HANDLE);
                    out.put_u8(*kind);
                    out.put_u16(*i);
                }
                Constant::MethodType(i) => put_ref(out, TAG_METHOD_TYPE, *i),
                Constant::Dynamic(a, b) => put_pair(out, TAG_DYNAMIC, *a, *b),
                Constant::InvokeDynamic(a, b) => put_pair(out, TAG_INVOKE_DYNAMIC, *a, *b),
                Constant::Module(i) => put_ref(out, TAG_MODULE, *i),
                Constant::Package(i) => put_ref(out, TAG_PACKAGE, *i),
                Constant::Unusable => {}
            }
        }
    }

    /// Number of slots, including slot 0. This is the on-disk `constant_pool_count`.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the pool holds no usable entries.
    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    /// Returns the entry at `index`, if the slot exists.
    pub fn get(&self, index: u16) -> Option<&Constant> {
        self.entries.get(index as usize)
    }

    /// Decodes the UTF-8 entry at `index`.
    pub fn utf8(&self, index: u16) -> Result<Cow<'_, str>, ClassFileError> {
        match self.get(index) {
            Some(Constant::Utf8(bytes)) => Ok(decode_modified_utf8(bytes)),
            _ => Err(ClassFileError::BadConstantIndex {
                index,
                expected: "Utf8",
            }),
        }
    }

    /// Resolves a `Class` entry to its internal name.
    pub fn class_name(&self, index: u16) -> Result<Cow<'_, str>, ClassFileError> {
        match self.get(index) {
            Some(Constant::Class(name)) => self.utf8(*name),
            _ => Err(ClassFileError::BadConstantIndex {
                index,
                expected: "Class",
            }),
        }
    }

    /// Resolves a `NameAndType` entry to `(name, descriptor)`.
    pub fn name_and_type(
        &self,
        index: u16,
    ) -> Result<(Cow<'_, str>, Cow<'_, str>), ClassFileError> {
        match self.get(index) {
            Some(Constant::NameAndType(name, desc)) => Ok((self.utf8(*name)?, self.utf8(*desc)?)),
            _ => Err(ClassFileError::BadConstantIndex {
                index,
                expected: "NameAndType",
            }),
        }
    }

    /// Resolves a field, method, or interface method reference.
    pub fn member_ref(&self, index: u16) -> Result<MemberRef<'_>, ClassFileError> {
        match self.get(index) {
            Some(
                Constant::Fieldref(class, nat)
                | Constant::Methodref(class, nat)
                | Constant::InterfaceMethodref(class, nat),
            ) => {
                let (name, descriptor) = self.name_and_type(*nat)?;
                Ok(MemberRef {
                    owner: self.class_name(*class)?,
                    name,
                    descriptor,
                })
            }
            _ => Err(ClassFileError::BadConstantIndex {
                index,
                expected: "member reference",
            }),
        }
    }

    /// Resolves the descriptor of an `InvokeDynamic` or `Dynamic` entry.
    pub fn dynamic_descriptor(&self, index: u16) -> Result<Cow<'_, str>, ClassFileError> {
        match self.get(index) {
            Some(Constant::InvokeDynamic(_, nat) | Constant::Dynamic(_, nat)) => {
                Ok(self.name_and_type(*nat)?.1)
            }
            _ => Err(ClassFileError::BadConstantIndex {
                index,
                expected: "InvokeDynamic",
            }),
        }
    }

    /// Returns the index of a UTF-8 entry, appending it if absent.
    pub fn utf8_index(&mut self, value: &str) -> Result<u16, ClassFileError> {
        let encoded = encode_modified_utf8(value);
        if let Some(i) = self.position(|c| matches!(c, Constant::Utf8(b) if *b == encoded)) {
            return Ok(i);
        }
        self.push(Constant::Utf8(encoded))
    }

    /// Returns the index of a `Class` entry, appending it if absent.
    pub fn class_index(&mut self, name: &str) -> Result<u16, ClassFileError> {
        let name_index = self.utf8_index(name)?;
        self.find_or_push(Constant::Class(name_index))
    }

    /// Returns the index of a `String` entry, appending it if absent.
    pub fn string_index(&mut self, value: &str) -> Result<u16, ClassFileError> {
        let utf8 = self.utf8_index(value)?;
        self.find_or_push(Constant::String(utf8))
    }

    /// Returns the index of a `Methodref` entry, appending it if absent.
    pub fn methodref_index(
        &mut self,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<u16, ClassFileError> {
        let class = self.class_index(owner)?;
        let name = self.utf8_index(name)?;
        let descriptor = self.utf8_index(descriptor)?;
        let nat = self.find_or_push(Constant::NameAndType(name, descriptor))?;
        self.find_or_push(Constant::Methodref(class, nat))
    }

    fn position(&self, pred: impl Fn(&Constant) -> bool) -> Option<u16> {
        self.entries
            .iter()
            .position(|c| pred(c))
            .map(|i| i as u16)
    }

    fn find_or_push(&mut self, constant: Constant) -> Result<u16, ClassFileError> {
        match self.position(|c| *c == constant) {
            Some(i) => Ok(i),
            None => self.push(constant),
        }
    }

    fn push(&mut self, constant: Constant) -> Result<u16, ClassFileError> {
        if self.entries.len() >= u16::MAX as usize {
            return Err(ClassFileError::ConstantPoolOverflow);
        }
        self.entries.push(constant);
        Ok((self.entries.len() - 1) as u16)
    }
}

impl Default for ConstantPool {
    fn default() -> Self {
        Self::new()
    }
}

fn put_ref(out: &mut Vec<u8>, tag: u8, index: u16) {
    out.put_u8(tag);
    out.put_u16(index);
}

fn put_pair(out: &mut Vec<u8>, tag: u8, a: u16, b: u16) {
    out.put_u8(tag);
    out.put_u16(a);
    out.put_u16(b);
}

/// Decodes JVM modified UTF-8.
///
/// Plain UTF-8 is returned borrowed. Otherwise the bytes are decoded as
/// UTF-16 code units (which is how `0xC0 0x80` and surrogate pairs are
/// encoded) and malformed sequences become U+FFFD.
pub fn decode_modified_utf8(bytes: &[u8]) -> Cow<'_, str> {
    if let Ok(s) = std::str::from_utf8(bytes) {
        return Cow::Borrowed(s);
    }
    let mut units = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        let (unit, len) = if b < 0x80 {
            (b as u16, 1)
        } else if b & 0xE0 == 0xC0 && i + 1 < bytes.len() {
            (((b as u16 & 0x1F) << 6) | (bytes[i + 1] as u16 & 0x3F), 2)
        } else if b & 0xF0 == 0xE0 && i + 2 < bytes.len() {
            (
                ((b as u16 & 0x0F) << 12)
                    | ((bytes[i + 1] as u16 & 0x3F) << 6)
                    | (bytes[i + 2] as u16 & 0x3F),
                3,
            )
        } else {
            (0xFFFD, 1)
        };
        units.push(unit);
        i += len;
    }
    Cow::Owned(String::from_utf16_lossy(&units))
}

/// Encodes a string as JVM modified UTF-8.
pub fn encode_modified_utf8(value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len());
    for ch in value.chars() {
        let code = ch as u32;
        if code == 0 {
            out.extend_from_slice(&[0xC0, 0x80]);
        } else if code < 0x10000 {
            let mut buf = [0u8; 4];
            out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
        } else {
            let mut buf = [0u16; 2];
            for unit in ch.encode_utf16(&mut buf) {
                let u = *unit;
                out.push(0xE0 | (u >> 12) as u8);
                out.push(0x80 | ((u >> 6) & 0x3F) as u8);
                out.push(0x80 | (u & 0x3F) as u8);
            }
        }
    }
    out
}
