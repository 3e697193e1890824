//! Opcode constants and fixed operand lengths.

pub(crate) const LDC: u8 = 0x12;
pub(crate) const LDC_W: u8 = 0x13;
pub(crate) const IINC: u8 = 0x84;
pub(crate) const IFEQ: u8 = 0x99;
pub(crate) const GOTO: u8 = 0xA7;
pub(crate) const JSR: u8 = 0xA8;
pub(crate) const RET: u8 = 0xA9;
pub(crate) const TABLESWITCH: u8 = 0xAA;
pub(crate) const LOOKUPSWITCH: u8 = 0xAB;
pub(crate) const IRETURN: u8 = 0xAC;
pub(crate) const RETURN: u8 = 0xB1;
pub(crate) const INVOKESPECIAL: u8 = 0xB7;
pub(crate) const INVOKESTATIC: u8 = 0xB8;
pub(crate) const NEW: u8 = 0xBB;
pub(crate) const ATHROW: u8 = 0xBF;
pub(crate) const WIDE: u8 = 0xC4;
pub(crate) const IFNULL: u8 = 0xC6;
pub(crate) const IFNONNULL: u8 = 0xC7;
pub(crate) const GOTO_W: u8 = 0xC8;
pub(crate) const JSR_W: u8 = 0xC9;

/// Returns `true` for the six `*return` opcodes.
pub(crate) fn is_return(opcode: u8) -> bool {
    (IRETURN..=RETURN).contains(&opcode)
}

/// Branches with a 16-bit offset.
pub(crate) fn is_short_branch(opcode: u8) -> bool {
    (IFEQ..=JSR).contains(&opcode) || opcode == IFNULL || opcode == IFNONNULL
}

/// Branches with a 32-bit offset.
pub(crate) fn is_long_branch(opcode: u8) -> bool {
    opcode == GOTO_W || opcode == JSR_W
}

/// Operand byte count for opcodes whose length does not depend on position.
///
/// Branches, switches and `wide` are handled by the decoder and return
/// `None` here, as do unassigned and reserved opcodes.
pub(crate) fn operand_len(opcode: u8) -> Option<usize> {
    let len = match opcode {
        0x00..=0x0F => 0,
        0x10 => 1,
        0x11 => 2,
        LDC => 1,
        LDC_W | 0x14 => 2,
        0x15..=0x19 => 1,
        0x1A..=0x35 => 0,
        0x36..=0x3A => 1,
        0x3B..=0x83 => 0,
        IINC => 2,
        0x85..=0x98 => 0,
        RET => 1,
        IRETURN..=RETURN => 0,
        0xB2..=0xB8 => 2,
        0xB9 | 0xBA => 4,
        NEW => 2,
        0xBC => 1,
        0xBD => 2,
        0xBE | ATHROW => 0,
        0xC0 | 0xC1 => 2,
        0xC2 | 0xC3 => 0,
        0xC5 => 3,
        _ => return None,
    };
    Some(len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_control_flow() {
        assert!(is_return(0xB0));
        assert!(!is_return(ATHROW));
        assert!(is_short_branch(GOTO));
        assert!(is_short_branch(IFNONNULL));
        assert!(!is_short_branch(GOTO_W));
        assert!(is_long_branch(JSR_W));
    }

    #[test]
    fn operand_lengths() {
        assert_eq!(operand_len(0x00), Some(0));
        assert_eq!(operand_len(0x10), Some(1));
        assert_eq!(operand_len(INVOKESTATIC), Some(2));
        assert_eq!(operand_len(0xB9), Some(4));
        assert_eq!(operand_len(0xC5), Some(3));
        assert_eq!(operand_len(TABLESWITCH), None);
        assert_eq!(operand_len(WIDE), None);
        assert_eq!(operand_len(0xCA), None);
    }
}
