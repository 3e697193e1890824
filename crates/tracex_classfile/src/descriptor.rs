//! Method and field descriptor parsing.

use crate::error::ClassFileError;

/// A parsed method descriptor such as `(ILjava/lang/String;)V`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor<'a> {
    /// Parameter field descriptors in declaration order.
    pub params: Vec<&'a str>,
    /// Return descriptor, `V` for void.
    pub ret: &'a str,
}

impl<'a> MethodDescriptor<'a> {
    /// Parses a method descriptor.
    pub fn parse(desc: &'a str) -> Result<Self, ClassFileError> {
        let bad = || ClassFileError::BadDescriptor(desc.to_string());
        let inner = desc.strip_prefix('(').ok_or_else(bad)?;
        let close = inner.find(')').ok_or_else(bad)?;
        let (mut rest, ret) = (&inner[..close], &inner[close + 1..]);

        let mut params = Vec::new();
        while !rest.is_empty() {
            let len = field_len(rest).ok_or_else(bad)?;
            params.push(&rest[..len]);
            rest = &rest[len..];
        }
        if ret != "V" && field_len(ret) != Some(ret.len()) {
            return Err(bad());
        }
        Ok(Self { params, ret })
    }

    /// Operand stack slots taken by the arguments, excluding `this`.
    pub fn arg_slots(&self) -> u16 {
        self.params.iter().map(|p| field_slots(p)).sum()
    }

    /// Operand stack slots pushed by the return value.
    pub fn ret_slots(&self) -> u16 {
        if self.ret == "V" {
            0
        } else {
            field_slots(self.ret)
        }
    }
}

/// Slots taken by a value of this field type: 2 for `J`/`D`, otherwise 1.
pub fn field_slots(desc: &str) -> u16 {
    match desc.as_bytes().first() {
        Some(b'J' | b'D') => 2,
        _ => 1,
    }
}

/// Length of the first field descriptor in `s`, if well formed.
fn field_len(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut i = 0;
    while bytes.get(i) == Some(&b'[') {
        i += 1;
    }
    match bytes.get(i)? {
        b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' => Some(i + 1),
        b'L' => {
            let end = s[i..].find(';')?;
            if end == 1 {
                return None;
            }
            Some(i + end + 1)
        }
        _ => None,
    }
}
