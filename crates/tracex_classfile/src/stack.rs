//! Operand stack replay.
//!
//! `max_stack` is recomputed by propagating stack depths over the control
//! flow graph: fall-through, branch and switch edges, subroutine calls, and
//! an edge from every covered instruction to its exception handlers.

use crate::code::{Handler, Instruction, Label};
use crate::constant_pool::ConstantPool;
use crate::descriptor::{field_slots, MethodDescriptor};
use crate::error::ClassFileError;
use crate::opcodes::{self, JSR, JSR_W, WIDE};

/// Slots popped and pushed by one instruction.
pub(crate) fn stack_effect(
    insn: &Instruction,
    pool: &ConstantPool,
) -> Result<(u16, u16), ClassFileError> {
    let opcode = insn.opcode();
    let effect = match opcode {
        0x00 => (0, 0),
        0x01..=0x08 => (0, 1),
        0x09 | 0x0A => (0, 2),
        0x0B..=0x0D => (0, 1),
        0x0E | 0x0F => (0, 2),
        0x10..=0x13 => (0, 1),
        0x14 => (0, 2),
        0x15..=0x2D => load_effect(opcode),
        0x2E | 0x30 | 0x32..=0x35 => (2, 1),
        0x2F | 0x31 => (2, 2),
        0x36..=0x4E => store_effect(opcode),
        0x4F | 0x51 | 0x53..=0x56 => (3, 0),
        0x50 | 0x52 => (4, 0),
        0x57 => (1, 0),
        0x58 => (2, 0),
        0x59 => (1, 2),
        0x5A => (2, 3),
        0x5B => (3, 4),
        0x5C => (2, 4),
        0x5D => (3, 5),
        0x5E => (4, 6),
        0x5F => (2, 2),
        // add, sub, mul, div, rem in i/l/f/d order
        0x60..=0x73 => {
            if (opcode - 0x60) % 2 == 1 {
                (4, 2)
            } else {
                (2, 1)
            }
        }
        0x74..=0x77 => {
            if (opcode - 0x74) % 2 == 1 {
                (2, 2)
            } else {
                (1, 1)
            }
        }
        0x78..=0x7D => {
            if (opcode - 0x78) % 2 == 1 {
                (3, 2)
            } else {
                (2, 1)
            }
        }
        0x7E..=0x83 => {
            if (opcode - 0x7E) % 2 == 1 {
                (4, 2)
            } else {
                (2, 1)
            }
        }
        opcodes::IINC => (0, 0),
        0x85 => (1, 2),
        0x86 => (1, 1),
        0x87 => (1, 2),
        0x88 | 0x89 => (2, 1),
        0x8A => (2, 2),
        0x8B => (1, 1),
        0x8C | 0x8D => (1, 2),
        0x8E | 0x90 => (2, 1),
        0x8F => (2, 2),
        0x91..=0x93 => (1, 1),
        0x94 => (4, 1),
        0x95 | 0x96 => (2, 1),
        0x97 | 0x98 => (4, 1),
        0x99..=0x9E => (1, 0),
        0x9F..=0xA6 => (2, 0),
        opcodes::GOTO | opcodes::GOTO_W | opcodes::RET => (0, 0),
        JSR | JSR_W => (0, 1),
        opcodes::TABLESWITCH | opcodes::LOOKUPSWITCH => (1, 0),
        0xAC | 0xAE | 0xB0 => (1, 0),
        0xAD | 0xAF => (2, 0),
        opcodes::RETURN => (0, 0),
        0xB2..=0xB5 => field_effect(opcode, insn, pool)?,
        0xB6..=0xBA => invoke_effect(opcode, insn, pool)?,
        opcodes::NEW => (0, 1),
        0xBC..=0xBE => (1, 1),
        opcodes::ATHROW => (1, 0),
        0xC0 | 0xC1 => (1, 1),
        0xC2 | 0xC3 => (1, 0),
        WIDE => match insn {
            Instruction::Plain { operands, .. } => match operands.first() {
                Some(&inner @ 0x15..=0x19) => load_effect(inner),
                Some(&inner @ 0x36..=0x3A) => store_effect(inner),
                _ => (0, 0),
            },
            _ => (0, 0),
        },
        0xC5 => match insn {
            Instruction::Plain { operands, .. } if operands.len() == 3 => (operands[2] as u16, 1),
            _ => return Err(ClassFileError::code("multianewarray without dimensions")),
        },
        opcodes::IFNULL | opcodes::IFNONNULL => (1, 0),
        other => {
            return Err(ClassFileError::code(format!(
                "no stack effect for opcode {other:#04x}"
            )))
        }
    };
    Ok(effect)
}

/// `xload`, `xload_n`: pushes 2 slots for long and double.
fn load_effect(opcode: u8) -> (u16, u16) {
    let kind = if opcode <= 0x19 {
        opcode - 0x15
    } else {
        (opcode - 0x1A) / 4
    };
    (0, if kind == 1 || kind == 3 { 2 } else { 1 })
}

/// `xstore`, `xstore_n`: pops 2 slots for long and double.
fn store_effect(opcode: u8) -> (u16, u16) {
    let kind = if opcode <= 0x3A {
        opcode - 0x36
    } else {
        (opcode - 0x3B) / 4
    };
    (if kind == 1 || kind == 3 { 2 } else { 1 }, 0)
}

fn operand_index(insn: &Instruction) -> Result<u16, ClassFileError> {
    insn.index_operand()
        .ok_or_else(|| ClassFileError::code("missing constant pool operand"))
}

fn field_effect(
    opcode: u8,
    insn: &Instruction,
    pool: &ConstantPool,
) -> Result<(u16, u16), ClassFileError> {
    let field = pool.member_ref(operand_index(insn)?)?;
    let size = field_slots(&field.descriptor);
    Ok(match opcode {
        0xB2 => (0, size),
        0xB3 => (size, 0),
        0xB4 => (1, size),
        _ => (1 + size, 0),
    })
}

fn invoke_effect(
    opcode: u8,
    insn: &Instruction,
    pool: &ConstantPool,
) -> Result<(u16, u16), ClassFileError> {
    let index = operand_index(insn)?;
    let descriptor = if opcode == 0xBA {
        pool.dynamic_descriptor(index)?
    } else {
        pool.member_ref(index)?.descriptor
    };
    let parsed = MethodDescriptor::parse(&descriptor)?;
    let receiver = u16::from(opcode != opcodes::INVOKESTATIC && opcode != 0xBA);
    Ok((parsed.arg_slots() + receiver, parsed.ret_slots()))
}

/// Computes the maximum operand stack depth reachable in `instructions`.
///
/// Unreachable code is ignored. Every handler entry starts with the thrown
/// exception on the stack.
pub fn max_stack(
    instructions: &[Instruction],
    handlers: &[Handler],
    pool: &ConstantPool,
) -> Result<u16, ClassFileError> {
    let n = instructions.len();
    let mut depth: Vec<Option<u16>> = vec![None; n];
    let mut work: Vec<(Label, u16)> = Vec::new();
    let mut max = 0u16;

    if n > 0 {
        work.push((0, 0));
    }
    for h in handlers {
        if h.start < h.end {
            work.push((h.handler, 1));
            max = max.max(1);
        }
    }

    while let Some((at, d)) = work.pop() {
        if at >= n {
            return Err(ClassFileError::code("execution falls off the end of code"));
        }
        match depth[at] {
            Some(seen) if seen == d => continue,
            Some(seen) => {
                return Err(ClassFileError::code(format!(
                    "inconsistent stack depth at instruction {at}: {seen} vs {d}"
                )))
            }
            None => depth[at] = Some(d),
        }

        let insn = &instructions[at];
        let (pop, push) = stack_effect(insn, pool)?;
        if d < pop {
            return Err(ClassFileError::code(format!(
                "stack underflow at instruction {at}"
            )));
        }
        let after = d - pop + push;
        max = max.max(after);

        let opcode = insn.opcode();
        if opcode == JSR || opcode == JSR_W {
            // The subroutine sees the return address; the caller resumes
            // without it once the subroutine returns.
            for t in insn.targets() {
                work.push((t, after));
            }
            work.push((at + 1, d));
            continue;
        }
        for t in insn.targets() {
            work.push((t, after));
        }
        if !insn.ends_block() {
            work.push((at + 1, after));
        }
    }
    Ok(max)
}
