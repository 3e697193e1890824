//! `StackMapTable` expansion and compression.
//!
//! Frames are expanded to full `{locals, stack}` states keyed by label so
//! they can be relocated with the instructions, then re-compressed against
//! the new offsets. Local lists hold one entry per verification type, so a
//! `long` or `double` is a single entry covering two slots.

use crate::bytes::{ByteReader, PutBytes};
use crate::code::{Decoded, Label};
use crate::constant_pool::ConstantPool;
use crate::descriptor::MethodDescriptor;
use crate::error::ClassFileError;

/// `ACC_STATIC`.
const ACC_STATIC: u16 = 0x0008;

/// One verification type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationType {
    /// `top`.
    Top,
    /// `int`, `short`, `char`, `byte`, `boolean`.
    Integer,
    /// `float`.
    Float,
    /// `double`.
    Double,
    /// `long`.
    Long,
    /// `null`.
    Null,
    /// `this` before the superclass constructor has run.
    UninitializedThis,
    /// An initialized reference of the given `Class` index.
    Object(u16),
    /// The result of the `new` instruction at the label, before `<init>`.
    Uninitialized(Label),
}

impl VerificationType {
    fn parse(r: &mut ByteReader<'_>, code: &Decoded) -> Result<Self, ClassFileError> {
        Ok(match r.u8()? {
            0 => Self::Top,
            1 => Self::Integer,
            2 => Self::Float,
            3 => Self::Double,
            4 => Self::Long,
            5 => Self::Null,
            6 => Self::UninitializedThis,
            7 => Self::Object(r.u16()?),
            8 => Self::Uninitialized(code.label_at(r.u16()? as u32)?),
            tag => {
                return Err(ClassFileError::code(format!(
                    "unknown verification type tag {tag}"
                )))
            }
        })
    }

    fn write(&self, out: &mut Vec<u8>, offsets: &[u32]) {
        match self {
            Self::Top => out.put_u8(0),
            Self::Integer => out.put_u8(1),
            Self::Float => out.put_u8(2),
            Self::Double => out.put_u8(3),
            Self::Long => out.put_u8(4),
            Self::Null => out.put_u8(5),
            Self::UninitializedThis => out.put_u8(6),
            Self::Object(index) => {
                out.put_u8(7);
                out.put_u16(*index);
            }
            Self::Uninitialized(label) => {
                out.put_u8(8);
                out.put_u16(offsets[*label] as u16);
            }
        }
    }
}

/// The verifier state at one instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The instruction this frame describes.
    pub label: Label,
    /// Local variable types.
    pub locals: Vec<VerificationType>,
    /// Operand stack types, bottom first.
    pub stack: Vec<VerificationType>,
}

/// Derives the implicit frame at method entry from the method signature.
pub fn initial_locals(
    pool: &mut ConstantPool,
    class_name: &str,
    method_name: &str,
    descriptor: &str,
    access_flags: u16,
) -> Result<Vec<VerificationType>, ClassFileError> {
    let mut locals = Vec::new();
    if access_flags & ACC_STATIC == 0 {
        if method_name == "<init>" && class_name != "java/lang/Object" {
            locals.push(VerificationType::UninitializedThis);
        } else {
            locals.push(VerificationType::Object(pool.class_index(class_name)?));
        }
    }
    let parsed = MethodDescriptor::parse(descriptor)?;
    for param in parsed.params {
        locals.push(match param.as_bytes()[0] {
            b'Z' | b'B' | b'C' | b'S' | b'I' => VerificationType::Integer,
            b'F' => VerificationType::Float,
            b'J' => VerificationType::Long,
            b'D' => VerificationType::Double,
            b'L' => VerificationType::Object(pool.class_index(&param[1..param.len() - 1])?),
            _ => VerificationType::Object(pool.class_index(param)?),
        });
    }
    Ok(locals)
}

/// Expands a `StackMapTable` payload.
pub fn decode_frames(
    info: &[u8],
    initial: &[VerificationType],
    code: &Decoded,
) -> Result<Vec<Frame>, ClassFileError> {
    let mut r = ByteReader::new(info);
    let count = r.u16()?;
    let mut frames = Vec::with_capacity(count as usize);
    let mut locals = initial.to_vec();
    let mut offset: i64 = -1;

    for _ in 0..count {
        let frame_type = r.u8()?;
        let (delta, stack) = match frame_type {
            0..=63 => (frame_type as u16, Vec::new()),
            64..=127 => (
                frame_type as u16 - 64,
                vec![VerificationType::parse(&mut r, code)?],
            ),
            247 => {
                let delta = r.u16()?;
                (delta, vec![VerificationType::parse(&mut r, code)?])
            }
            248..=250 => {
                let k = (251 - frame_type) as usize;
                if k > locals.len() {
                    return Err(ClassFileError::code("chop frame removes too many locals"));
                }
                locals.truncate(locals.len() - k);
                (r.u16()?, Vec::new())
            }
            251 => (r.u16()?, Vec::new()),
            252..=254 => {
                let delta = r.u16()?;
                for _ in 0..frame_type - 251 {
                    locals.push(VerificationType::parse(&mut r, code)?);
                }
                (delta, Vec::new())
            }
            255 => {
                let delta = r.u16()?;
                let local_count = r.u16()?;
                locals = (0..local_count)
                    .map(|_| VerificationType::parse(&mut r, code))
                    .collect::<Result<_, _>>()?;
                let stack_count = r.u16()?;
                let stack = (0..stack_count)
                    .map(|_| VerificationType::parse(&mut r, code))
                    .collect::<Result<_, _>>()?;
                (delta, stack)
            }
            reserved => {
                return Err(ClassFileError::code(format!(
                    "reserved stack map frame type {reserved}"
                )))
            }
        };
        offset += delta as i64 + 1;
        let label = code.label_at(offset as u32)?;
        frames.push(Frame {
            label,
            locals: locals.clone(),
            stack,
        });
    }
    if r.remaining() > 0 {
        return Err(ClassFileError::code("trailing bytes in StackMapTable"));
    }
    Ok(frames)
}

/// Compresses frames against new instruction offsets.
///
/// Frames must be sorted by label and describe distinct instructions.
pub fn encode_frames(frames: &[Frame], initial: &[VerificationType], offsets: &[u32]) -> Vec<u8> {
    let mut out = Vec::new();
    out.put_u16(frames.len() as u16);
    let mut prev_locals = initial;
    let mut prev_offset: i64 = -1;

    for frame in frames {
        let offset = offsets[frame.label] as i64;
        let delta = (offset - prev_offset - 1) as u16;
        let same_locals = frame.locals == prev_locals;
        let grown = frame.locals.len() as i64 - prev_locals.len() as i64;

        if same_locals && frame.stack.is_empty() {
            if delta < 64 {
                out.put_u8(delta as u8);
            } else {
                out.put_u8(251);
                out.put_u16(delta);
            }
        } else if same_locals && frame.stack.len() == 1 {
            if delta < 64 {
                out.put_u8(64 + delta as u8);
            } else {
                out.put_u8(247);
                out.put_u16(delta);
            }
            frame.stack[0].write(&mut out, offsets);
        } else if frame.stack.is_empty()
            && (1..=3).contains(&grown)
            && frame.locals.starts_with(prev_locals)
        {
            out.put_u8(251 + grown as u8);
            out.put_u16(delta);
            for local in &frame.locals[prev_locals.len()..] {
                local.write(&mut out, offsets);
            }
        } else if frame.stack.is_empty()
            && (-3..=-1).contains(&grown)
            && prev_locals.starts_with(&frame.locals)
        {
            out.put_u8((251 + grown) as u8);
            out.put_u16(delta);
        } else {
            out.put_u8(255);
            out.put_u16(delta);
            out.put_u16(frame.locals.len() as u16);
            for local in &frame.locals {
                local.write(&mut out, offsets);
            }
            out.put_u16(frame.stack.len() as u16);
            for item in &frame.stack {
                item.write(&mut out, offsets);
            }
        }
        prev_locals = &frame.locals;
        prev_offset = offset;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::decode;
    use VerificationType::*;

    fn nops(n: usize) -> Decoded {
        let mut code = vec![0x00; n];
        code.push(0xB1);
        decode(&code).unwrap()
    }

    #[test]
    fn initial_locals_from_signature() {
        let mut pool = ConstantPool::new();
        let locals =
            initial_locals(&mut pool, "a/B", "f", "(IJLjava/lang/String;[I)V", 0).unwrap();
        let string = pool.class_index("java/lang/String").unwrap();
        let array = pool.class_index("[I").unwrap();
        let this = pool.class_index("a/B").unwrap();
        assert_eq!(
            locals,
            vec![Object(this), Integer, Long, Object(string), Object(array)]
        );

        let ctor = initial_locals(&mut pool, "a/B", "<init>", "()V", 0).unwrap();
        assert_eq!(ctor, vec![UninitializedThis]);
        let statics = initial_locals(&mut pool, "a/B", "g", "(F)V", ACC_STATIC).unwrap();
        assert_eq!(statics, vec![Float]);
    }

    #[test]
    fn compressed_forms_roundtrip() {
        let code = nops(200);
        let initial = vec![Object(3), Integer];
        let frames = vec![
            // same
            Frame { label: 5, locals: initial.clone(), stack: vec![] },
            // same_locals_1_stack_item
            Frame { label: 6, locals: initial.clone(), stack: vec![Object(9)] },
            // append 2
            Frame { label: 10, locals: vec![Object(3), Integer, Long, Float], stack: vec![] },
            // chop 1
            Frame { label: 12, locals: vec![Object(3), Integer, Long], stack: vec![] },
            // same_frame_extended
            Frame { label: 100, locals: vec![Object(3), Integer, Long], stack: vec![] },
            // full
            Frame { label: 110, locals: vec![], stack: vec![Null, Integer] },
            // same_locals_1_stack_item_extended
            Frame { label: 199, locals: vec![], stack: vec![Uninitialized(20)] },
        ];
        let bytes = encode_frames(&frames, &initial, &code.offsets);
        assert_eq!(bytes[2], 5);
        assert_eq!(bytes[3], 64);
        let back = decode_frames(&bytes, &initial, &code).unwrap();
        assert_eq!(back, frames);
    }

    #[test]
    fn relocation_follows_offsets() {
        let code = nops(10);
        let initial = vec![];
        let frames = vec![Frame { label: 4, locals: vec![], stack: vec![] }];
        let bytes = encode_frames(&frames, &initial, &code.offsets);
        assert_eq!(bytes, vec![0, 1, 4]);

        // Same frame after two instructions were inserted in front.
        let shifted: Vec<u32> = code.offsets.iter().map(|o| o + 2).collect();
        let bytes = encode_frames(&frames, &initial, &shifted);
        assert_eq!(bytes, vec![0, 1, 6]);
    }

    #[test]
    fn reserved_frame_type_is_rejected() {
        let code = nops(1);
        assert!(decode_frames(&[0, 1, 200], &[], &code).is_err());
    }

    #[test]
    fn frame_off_boundary_is_rejected() {
        // ldc_w occupies bytes 0..3; a frame at 1 is inside it.
        let code = decode(&[0x13, 0x00, 0x01, 0xB1]).unwrap();
        assert!(decode_frames(&[0, 1, 1], &[], &code).is_err());
    }
}
