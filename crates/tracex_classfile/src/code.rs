//! `Code` attributes and the label-based instruction stream.
//!
//! Instructions refer to each other by [`Label`], an index into the
//! instruction list, never by byte offset. Rewriting therefore only moves
//! list elements; byte offsets, branch widths and switch padding are
//! recomputed by [`layout`] afterwards.

use crate::bytes::{ByteReader, PutBytes};
use crate::class::{parse_attributes, write_attributes, Attribute};
use crate::error::ClassFileError;
use crate::opcodes::{
    self, GOTO, GOTO_W, IINC, JSR, JSR_W, LOOKUPSWITCH, TABLESWITCH, WIDE,
};

/// Largest code array the class file format allows.
const MAX_CODE_LEN: u32 = 65535;

/// An instruction index. The value equal to the instruction count means
/// "end of code" and is only valid as an exclusive range end.
pub type Label = usize;

/// One decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// Any instruction whose operands hold no code offsets. `wide` is kept
    /// as opcode `0xC4` with the modified opcode as the first operand byte.
    Plain {
        /// Opcode.
        opcode: u8,
        /// Raw operand bytes.
        operands: Vec<u8>,
    },
    /// Conditional and unconditional branches, including `jsr`.
    Branch {
        /// Opcode.
        opcode: u8,
        /// Branch target.
        target: Label,
    },
    /// `tableswitch`.
    TableSwitch {
        /// Default target.
        default: Label,
        /// Lowest key.
        low: i32,
        /// Targets for `low..=low + targets.len() - 1`.
        targets: Vec<Label>,
    },
    /// `lookupswitch`.
    LookupSwitch {
        /// Default target.
        default: Label,
        /// Sorted key/target pairs.
        pairs: Vec<(i32, Label)>,
    },
}

impl Instruction {
    /// A zero-operand instruction.
    pub fn simple(opcode: u8) -> Self {
        Self::Plain {
            opcode,
            operands: Vec::new(),
        }
    }

    /// An instruction with a single constant pool index operand.
    pub fn with_index(opcode: u8, index: u16) -> Self {
        Self::Plain {
            opcode,
            operands: index.to_be_bytes().to_vec(),
        }
    }

    /// The opcode.
    pub fn opcode(&self) -> u8 {
        match self {
            Self::Plain { opcode, .. } | Self::Branch { opcode, .. } => *opcode,
            Self::TableSwitch { .. } => TABLESWITCH,
            Self::LookupSwitch { .. } => LOOKUPSWITCH,
        }
    }

    /// First two operand bytes as a big-endian index, for `ldc_w`, field
    /// and method instructions.
    pub fn index_operand(&self) -> Option<u16> {
        match self {
            Self::Plain { operands, .. } if operands.len() >= 2 => {
                Some(u16::from_be_bytes([operands[0], operands[1]]))
            }
            _ => None,
        }
    }

    /// Execution never continues to the next instruction.
    pub fn ends_block(&self) -> bool {
        match self {
            Self::Plain { opcode, operands } => {
                opcodes::is_return(*opcode)
                    || *opcode == opcodes::ATHROW
                    || *opcode == opcodes::RET
                    || (*opcode == WIDE && operands.first() == Some(&opcodes::RET))
            }
            Self::Branch { opcode, .. } => *opcode == GOTO || *opcode == GOTO_W,
            Self::TableSwitch { .. } | Self::LookupSwitch { .. } => true,
        }
    }

    /// Every label this instruction can jump to, excluding fall-through.
    pub fn targets(&self) -> Vec<Label> {
        match self {
            Self::Plain { .. } => Vec::new(),
            Self::Branch { target, .. } => vec![*target],
            Self::TableSwitch {
                default, targets, ..
            } => std::iter::once(*default).chain(targets.iter().copied()).collect(),
            Self::LookupSwitch { default, pairs } => std::iter::once(*default)
                .chain(pairs.iter().map(|(_, t)| *t))
                .collect(),
        }
    }

    /// Rewrites every target through `f`.
    pub fn map_targets(&mut self, mut f: impl FnMut(Label) -> Label) {
        match self {
            Self::Plain { .. } => {}
            Self::Branch { target, .. } => *target = f(*target),
            Self::TableSwitch {
                default, targets, ..
            } => {
                *default = f(*default);
                for t in targets.iter_mut() {
                    *t = f(*t);
                }
            }
            Self::LookupSwitch { default, pairs } => {
                *default = f(*default);
                for (_, t) in pairs.iter_mut() {
                    *t = f(*t);
                }
            }
        }
    }

    /// Encoded size at byte offset `at`. Only switches depend on `at`.
    fn size(&self, at: u32) -> u32 {
        match self {
            Self::Plain { operands, .. } => 1 + operands.len() as u32,
            Self::Branch { opcode, .. } => {
                if opcodes::is_long_branch(*opcode) {
                    5
                } else {
                    3
                }
            }
            Self::TableSwitch { targets, .. } => 1 + pad(at) + 12 + 4 * targets.len() as u32,
            Self::LookupSwitch { pairs, .. } => 1 + pad(at) + 8 + 8 * pairs.len() as u32,
        }
    }
}

/// Padding after a switch opcode at `at` so the operands are 4-byte aligned.
fn pad(at: u32) -> u32 {
    3 - at % 4
}

/// One `exception_table` row in byte offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionHandler {
    /// First covered byte offset.
    pub start_pc: u16,
    /// Exclusive end of the covered range.
    pub end_pc: u16,
    /// Handler entry offset.
    pub handler_pc: u16,
    /// `Class` index of the caught type, 0 for any.
    pub catch_type: u16,
}

/// An exception handler expressed in labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handler {
    /// First covered instruction.
    pub start: Label,
    /// Exclusive end of the covered range.
    pub end: Label,
    /// Handler entry.
    pub handler: Label,
    /// `Class` index of the caught type, 0 for any.
    pub catch_type: u16,
}

/// A decoded `Code` attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeAttribute {
    /// Maximum operand stack depth.
    pub max_stack: u16,
    /// Number of local variable slots.
    pub max_locals: u16,
    /// Raw bytecode.
    pub code: Vec<u8>,
    /// Exception table in declaration (priority) order.
    pub exception_table: Vec<ExceptionHandler>,
    /// Nested attributes such as `LineNumberTable` and `StackMapTable`.
    pub attributes: Vec<Attribute>,
}

impl CodeAttribute {
    /// Parses the payload of a `Code` attribute.
    pub fn parse(info: &[u8]) -> Result<Self, ClassFileError> {
        let mut r = ByteReader::new(info);
        let max_stack = r.u16()?;
        let max_locals = r.u16()?;
        let code_len = r.u32()? as usize;
        let code = r.bytes(code_len)?.to_vec();
        let handler_count = r.u16()?;
        let exception_table = (0..handler_count)
            .map(|_| {
                Ok(ExceptionHandler {
                    start_pc: r.u16()?,
                    end_pc: r.u16()?,
                    handler_pc: r.u16()?,
                    catch_type: r.u16()?,
                })
            })
            .collect::<Result<_, ClassFileError>>()?;
        let attributes = parse_attributes(&mut r)?;
        if r.remaining() > 0 {
            return Err(ClassFileError::code("trailing bytes in Code attribute"));
        }
        Ok(Self {
            max_stack,
            max_locals,
            code,
            exception_table,
            attributes,
        })
    }

    /// Serializes the attribute payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.code.len() + 32);
        out.put_u16(self.max_stack);
        out.put_u16(self.max_locals);
        out.put_u32(self.code.len() as u32);
        out.extend_from_slice(&self.code);
        out.put_u16(self.exception_table.len() as u16);
        for h in &self.exception_table {
            out.put_u16(h.start_pc);
            out.put_u16(h.end_pc);
            out.put_u16(h.handler_pc);
            out.put_u16(h.catch_type);
        }
        write_attributes(&self.attributes, &mut out);
        out
    }
}

/// An instruction stream together with the byte offsets it was decoded from.
#[derive(Debug, Clone)]
pub struct Decoded {
    /// Instructions with label targets.
    pub instructions: Vec<Instruction>,
    /// Byte offset of each instruction, plus the code length at the end.
    pub offsets: Vec<u32>,
}

impl Decoded {
    /// Label of the instruction starting at `offset`. The code length maps
    /// to the end label.
    pub fn label_at(&self, offset: u32) -> Result<Label, ClassFileError> {
        self.offsets.binary_search(&offset).map_err(|_| {
            ClassFileError::code(format!("offset {offset} is not an instruction boundary"))
        })
    }

    /// Converts the exception table to labels.
    pub fn handlers(&self, table: &[ExceptionHandler]) -> Result<Vec<Handler>, ClassFileError> {
        table
            .iter()
            .map(|h| {
                Ok(Handler {
                    start: self.label_at(h.start_pc as u32)?,
                    end: self.label_at(h.end_pc as u32)?,
                    handler: self.label_at(h.handler_pc as u32)?,
                    catch_type: h.catch_type,
                })
            })
            .collect()
    }
}

/// Decodes bytecode into labelled instructions.
pub fn decode(code: &[u8]) -> Result<Decoded, ClassFileError> {
    // Targets are collected as absolute offsets first and turned into
    // labels once every instruction boundary is known.
    let mut raw = Vec::new();
    let mut offsets = Vec::new();
    let mut pos = 0usize;
    while pos < code.len() {
        let at = pos as u32;
        let opcode = code[pos];
        let mut r = ByteReader::new(&code[pos + 1..]);
        let rel = |delta: i32| -> Result<u32, ClassFileError> {
            let target = at as i64 + delta as i64;
            if target < 0 || target > code.len() as i64 {
                return Err(ClassFileError::code(format!(
                    "branch at {at} targets {target}, outside code"
                )));
            }
            Ok(target as u32)
        };
        let insn = if opcodes::is_short_branch(opcode) {
            Instruction::Branch {
                opcode,
                target: rel(r.i16()? as i32)? as Label,
            }
        } else if opcodes::is_long_branch(opcode) {
            Instruction::Branch {
                opcode,
                target: rel(r.i32()?)? as Label,
            }
        } else if opcode == TABLESWITCH {
            r.skip(pad(at) as usize)?;
            let default = rel(r.i32()?)? as Label;
            let low = r.i32()?;
            let high = r.i32()?;
            if high < low {
                return Err(ClassFileError::code(format!(
                    "tableswitch at {at} has high {high} below low {low}"
                )));
            }
            let count = (high as i64 - low as i64 + 1) as usize;
            if count > code.len() {
                return Err(ClassFileError::Truncated { offset: code.len() });
            }
            let targets = (0..count)
                .map(|_| Ok(rel(r.i32()?)? as Label))
                .collect::<Result<_, ClassFileError>>()?;
            Instruction::TableSwitch {
                default,
                low,
                targets,
            }
        } else if opcode == LOOKUPSWITCH {
            r.skip(pad(at) as usize)?;
            let default = rel(r.i32()?)? as Label;
            let count = r.i32()?;
            if count < 0 || count as usize > code.len() {
                return Err(ClassFileError::code(format!(
                    "lookupswitch at {at} has {count} pairs"
                )));
            }
            let pairs = (0..count)
                .map(|_| Ok((r.i32()?, rel(r.i32()?)? as Label)))
                .collect::<Result<_, ClassFileError>>()?;
            Instruction::LookupSwitch { default, pairs }
        } else if opcode == WIDE {
            let inner = r.u8()?;
            let len = if inner == IINC { 5 } else { 3 };
            let valid = matches!(inner, 0x15..=0x19 | 0x36..=0x3A | opcodes::RET | IINC);
            if !valid {
                return Err(ClassFileError::code(format!(
                    "wide at {at} modifies opcode {inner:#04x}"
                )));
            }
            Instruction::Plain {
                opcode,
                operands: code
                    .get(pos + 1..pos + 1 + len)
                    .ok_or(ClassFileError::Truncated { offset: code.len() })?
                    .to_vec(),
            }
        } else {
            let len = opcodes::operand_len(opcode).ok_or_else(|| {
                ClassFileError::code(format!("unknown opcode {opcode:#04x} at {at}"))
            })?;
            Instruction::Plain {
                opcode,
                operands: r.bytes(len)?.to_vec(),
            }
        };
        pos += insn.size(at) as usize;
        if pos > code.len() {
            return Err(ClassFileError::Truncated { offset: code.len() });
        }
        offsets.push(at);
        raw.push(insn);
    }
    offsets.push(code.len() as u32);

    let mut decoded = Decoded {
        instructions: Vec::with_capacity(raw.len()),
        offsets,
    };
    for mut insn in raw {
        let mut bad = None;
        insn.map_targets(|offset| match decoded.label_at(offset as u32) {
            Ok(label) => label,
            Err(e) => {
                bad.get_or_insert(e);
                0
            }
        });
        if let Some(e) = bad {
            return Err(e);
        }
        decoded.instructions.push(insn);
    }
    Ok(decoded)
}

/// Assigns byte offsets, widening `goto`/`jsr` whose offsets overflow.
///
/// Returns one offset per instruction plus the total code length.
pub fn layout(instructions: &mut [Instruction]) -> Result<Vec<u32>, ClassFileError> {
    loop {
        let mut offsets = Vec::with_capacity(instructions.len() + 1);
        let mut at = 0u32;
        for insn in instructions.iter() {
            offsets.push(at);
            at += insn.size(at);
        }
        offsets.push(at);
        if at > MAX_CODE_LEN {
            return Err(ClassFileError::too_large(format!(
                "code length {at} exceeds {MAX_CODE_LEN}"
            )));
        }

        let mut widened = false;
        for (i, insn) in instructions.iter_mut().enumerate() {
            if let Instruction::Branch { opcode, target } = insn {
                if !opcodes::is_short_branch(*opcode) {
                    continue;
                }
                let delta = offsets[*target] as i64 - offsets[i] as i64;
                if i16::try_from(delta).is_ok() {
                    continue;
                }
                *opcode = match *opcode {
                    GOTO => GOTO_W,
                    JSR => JSR_W,
                    other => {
                        return Err(ClassFileError::too_large(format!(
                            "conditional branch {other:#04x} spans {delta} bytes"
                        )))
                    }
                };
                widened = true;
            }
        }
        if !widened {
            return Ok(offsets);
        }
    }
}

/// Encodes instructions at the offsets produced by [`layout`].
pub fn encode(instructions: &[Instruction], offsets: &[u32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(offsets.last().copied().unwrap_or(0) as usize);
    for (i, insn) in instructions.iter().enumerate() {
        let at = offsets[i];
        let rel = |target: Label| (offsets[target] as i64 - at as i64) as i32;
        out.put_u8(insn.opcode());
        match insn {
            Instruction::Plain { operands, .. } => out.extend_from_slice(operands),
            Instruction::Branch { opcode, target } => {
                if opcodes::is_long_branch(*opcode) {
                    out.put_i32(rel(*target));
                } else {
                    out.put_i16(rel(*target) as i16);
                }
            }
            Instruction::TableSwitch {
                default,
                low,
                targets,
            } => {
                out.resize(out.len() + pad(at) as usize, 0);
                out.put_i32(rel(*default));
                out.put_i32(*low);
                out.put_i32(*low + targets.len() as i32 - 1);
                for t in targets {
                    out.put_i32(rel(*t));
                }
            }
            Instruction::LookupSwitch { default, pairs } => {
                out.resize(out.len() + pad(at) as usize, 0);
                out.put_i32(rel(*default));
                out.put_i32(pairs.len() as i32);
                for (key, t) in pairs {
                    out.put_i32(*key);
                    out.put_i32(rel(*t));
                }
            }
        }
    }
    out
}
