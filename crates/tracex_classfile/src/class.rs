//! Top-level class file structure.

use std::borrow::Cow;

use crate::bytes::{ByteReader, PutBytes};
use crate::constant_pool::ConstantPool;
use crate::error::ClassFileError;

const MAGIC: u32 = 0xCAFE_BABE;

/// A raw attribute: name index plus undecoded payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Constant pool index of the attribute name.
    pub name_index: u16,
    /// Attribute payload.
    pub info: Vec<u8>,
}

impl Attribute {
    fn parse(r: &mut ByteReader<'_>) -> Result<Self, ClassFileError> {
        let name_index = r.u16()?;
        let len = r.u32()? as usize;
        Ok(Self {
            name_index,
            info: r.bytes(len)?.to_vec(),
        })
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.put_u16(self.name_index);
        out.put_u32(self.info.len() as u32);
        out.extend_from_slice(&self.info);
    }
}

pub(crate) fn parse_attributes(r: &mut ByteReader<'_>) -> Result<Vec<Attribute>, ClassFileError> {
    let count = r.u16()?;
    (0..count).map(|_| Attribute::parse(r)).collect()
}

pub(crate) fn write_attributes(attributes: &[Attribute], out: &mut Vec<u8>) {
    out.put_u16(attributes.len() as u16);
    for attribute in attributes {
        attribute.write(out);
    }
}

/// Finds the position of the attribute called `name`.
pub(crate) fn find_attribute(
    attributes: &[Attribute],
    pool: &ConstantPool,
    name: &str,
) -> Option<usize> {
    attributes
        .iter()
        .position(|a| pool.utf8(a.name_index).is_ok_and(|n| n == name))
}

/// A field or method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    /// Access flags.
    pub access_flags: u16,
    /// Constant pool index of the name.
    pub name_index: u16,
    /// Constant pool index of the descriptor.
    pub descriptor_index: u16,
    /// Member attributes, including `Code` for methods with a body.
    pub attributes: Vec<Attribute>,
}

impl Member {
    fn parse(r: &mut ByteReader<'_>) -> Result<Self, ClassFileError> {
        Ok(Self {
            access_flags: r.u16()?,
            name_index: r.u16()?,
            descriptor_index: r.u16()?,
            attributes: parse_attributes(r)?,
        })
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.put_u16(self.access_flags);
        out.put_u16(self.name_index);
        out.put_u16(self.descriptor_index);
        write_attributes(&self.attributes, out);
    }

    /// Member name.
    pub fn name<'p>(&self, pool: &'p ConstantPool) -> Result<Cow<'p, str>, ClassFileError> {
        pool.utf8(self.name_index)
    }

    /// Member descriptor.
    pub fn descriptor<'p>(&self, pool: &'p ConstantPool) -> Result<Cow<'p, str>, ClassFileError> {
        pool.utf8(self.descriptor_index)
    }

    /// Index of the attribute called `name`, if present.
    pub fn attribute_index(&self, pool: &ConstantPool, name: &str) -> Option<usize> {
        find_attribute(&self.attributes, pool, name)
    }
}

/// A parsed class file.
///
/// Only the constant pool and method `Code` attributes are decoded further;
/// everything else is carried as raw attributes and written back verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassFile {
    /// Minor version.
    pub minor_version: u16,
    /// Major version. Stack map frames are required from 50 on.
    pub major_version: u16,
    /// Constant pool.
    pub constant_pool: ConstantPool,
    /// Class access flags.
    pub access_flags: u16,
    /// `Class` index of this class.
    pub this_class: u16,
    /// `Class` index of the superclass, 0 for `java/lang/Object`.
    pub super_class: u16,
    /// `Class` indices of implemented interfaces.
    pub interfaces: Vec<u16>,
    /// Fields.
    pub fields: Vec<Member>,
    /// Methods.
    pub methods: Vec<Member>,
    /// Class attributes.
    pub attributes: Vec<Attribute>,
}

impl ClassFile {
    /// Parses a complete class file. Trailing bytes are an error.
    pub fn parse(data: &[u8]) -> Result<Self, ClassFileError> {
        let mut r = ByteReader::new(data);
        let magic = r.u32()?;
        if magic != MAGIC {
            return Err(ClassFileError::BadMagic(magic));
        }
        let minor_version = r.u16()?;
        let major_version = r.u16()?;
        let constant_pool = ConstantPool::parse(&mut r)?;
        let access_flags = r.u16()?;
        let this_class = r.u16()?;
        let super_class = r.u16()?;
        let interface_count = r.u16()?;
        let interfaces = (0..interface_count)
            .map(|_| r.u16())
            .collect::<Result<_, _>>()?;
        let field_count = r.u16()?;
        let fields = (0..field_count)
            .map(|_| Member::parse(&mut r))
            .collect::<Result<_, _>>()?;
        let method_count = r.u16()?;
        let methods = (0..method_count)
            .map(|_| Member::parse(&mut r))
            .collect::<Result<_, _>>()?;
        let attributes = parse_attributes(&mut r)?;
        if r.remaining() > 0 {
            return Err(ClassFileError::TrailingBytes(r.remaining()));
        }

        let class = Self {
            minor_version,
            major_version,
            constant_pool,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        };
        class.name()?;
        Ok(class)
    }

    /// Serializes the class file.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.put_u32(MAGIC);
        out.put_u16(self.minor_version);
        out.put_u16(self.major_version);
        self.constant_pool.write(&mut out);
        out.put_u16(self.access_flags);
        out.put_u16(self.this_class);
        out.put_u16(self.super_class);
        out.put_u16(self.interfaces.len() as u16);
        for interface in &self.interfaces {
            out.put_u16(*interface);
        }
        out.put_u16(self.fields.len() as u16);
        for field in &self.fields {
            field.write(&mut out);
        }
        out.put_u16(self.methods.len() as u16);
        for method in &self.methods {
            method.write(&mut out);
        }
        write_attributes(&self.attributes, &mut out);
        out
    }

    /// Internal (`/`-separated) name of this class.
    pub fn name(&self) -> Result<Cow<'_, str>, ClassFileError> {
        self.constant_pool.class_name(self.this_class)
    }

    /// Internal name of the superclass, `None` for `java/lang/Object`.
    pub fn super_name(&self) -> Result<Option<Cow<'_, str>>, ClassFileError> {
        if self.super_class == 0 {
            return Ok(None);
        }
        self.constant_pool.class_name(self.super_class).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ClassBuilder, MethodCode};

    #[test]
    fn parse_and_write_are_inverse() {
        let mut b = ClassBuilder::new("com/app/Foo");
        b.method(
            0x0001,
            "bar",
            "()V",
            MethodCode::new(0, 1, vec![0xB1]),
        );
        let bytes = b.build();
        let class = ClassFile::parse(&bytes).unwrap();
        assert_eq!(class.name().unwrap(), "com/app/Foo");
        assert_eq!(class.super_name().unwrap().as_deref(), Some("java/lang/Object"));
        assert_eq!(class.methods.len(), 1);
        assert_eq!(class.methods[0].name(&class.constant_pool).unwrap(), "bar");
        assert!(class.methods[0]
            .attribute_index(&class.constant_pool, "Code")
            .is_some());
        assert_eq!(class.to_bytes(), bytes);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let err = ClassFile::parse(&[0xDE, 0xAD, 0xBE, 0xEF, 0, 0, 0, 52]).unwrap_err();
        assert!(matches!(err, ClassFileError::BadMagic(0xDEADBEEF)));
    }

    #[test]
    fn truncated_input_is_rejected() {
        let bytes = ClassBuilder::new("A").build();
        let err = ClassFile::parse(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err, ClassFileError::Truncated { .. }));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut bytes = ClassBuilder::new("A").build();
        bytes.extend_from_slice(&[0, 0]);
        assert!(matches!(
            ClassFile::parse(&bytes),
            Err(ClassFileError::TrailingBytes(2))
        ));
    }
}
