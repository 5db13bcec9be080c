//! Bytecode instruction set

/// Bytecode opcode
///
/// Stack-based VM with explicit byte values for persistence.
/// Operands are encoded inline after the opcode byte, big-endian.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    // ===== Constants (0x01-0x0F) =====
    /// Push constant from pool [u16 index]
    Constant = 0x01,
    Null = 0x02,
    True = 0x03,
    False = 0x04,

    // ===== Variables (0x10-0x1F) =====
    /// Load frame-relative slot [u16 slot]
    GetLocal = 0x10,
    /// Store TOS into frame-relative slot without popping [u16 slot]
    SetLocal = 0x11,
    /// Load global slot [u16 slot]
    GetGlobal = 0x12,
    /// Store TOS into global slot without popping [u16 slot]
    SetGlobal = 0x13,

    // ===== Arithmetic (0x20-0x2F) =====
    /// Checked for integers; concatenates strings
    Add = 0x20,
    Sub = 0x21,
    Mul = 0x22,
    Div = 0x23,
    Mod = 0x24,
    Negate = 0x25,

    // ===== Comparison (0x30-0x3F) =====
    Equal = 0x30,
    NotEqual = 0x31,
    Less = 0x32,
    LessEqual = 0x33,
    Greater = 0x34,
    GreaterEqual = 0x35,

    // ===== Logical (0x40-0x4F) =====
    Not = 0x40,

    // ===== Control flow (0x50-0x5F) =====
    /// Forward jump [i16 offset]
    Jump = 0x50,
    /// Pop condition, jump if false [i16 offset]
    JumpIfFalse = 0x51,
    /// Backward jump [u16 distance]
    Loop = 0x52,

    // ===== Functions (0x60-0x6F) =====
    /// Call script function [u16 function index][u8 arg count]
    Call = 0x60,
    /// Return TOS to the caller
    Return = 0x61,
    /// Call linked host function [u16 native index][u8 arg count]
    CallNative = 0x62,

    // ===== Arrays (0x70-0x7F) =====
    /// Create array from the top [u16 count] stack values
    Array = 0x70,
    /// Pop index, pop array, push array[index]
    GetIndex = 0x71,
    /// Pop value, pop index, assign into the array in a local slot [u16 slot]
    SetLocalIndex = 0x72,
    /// Pop value, pop index, assign into the array in a global slot [u16 slot]
    SetGlobalIndex = 0x73,

    // ===== Stack manipulation (0x80-0x8F) =====
    Pop = 0x80,
    Dup = 0x81,

    // ===== Special (0xF0-0xFF) =====
    Halt = 0xFF,
}

impl Opcode {
    /// Number of operand bytes following the opcode
    pub fn operand_width(self) -> usize {
        match self {
            Opcode::Constant
            | Opcode::GetLocal
            | Opcode::SetLocal
            | Opcode::GetGlobal
            | Opcode::SetGlobal
            | Opcode::SetLocalIndex
            | Opcode::SetGlobalIndex
            | Opcode::Jump
            | Opcode::JumpIfFalse
            | Opcode::Loop
            | Opcode::Array => 2,
            Opcode::Call | Opcode::CallNative => 3,
            _ => 0,
        }
    }
}

impl TryFrom<u8> for Opcode {
    type Error = ();

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            0x01 => Ok(Opcode::Constant),
            0x02 => Ok(Opcode::Null),
            0x03 => Ok(Opcode::True),
            0x04 => Ok(Opcode::False),
            0x10 => Ok(Opcode::GetLocal),
            0x11 => Ok(Opcode::SetLocal),
            0x12 => Ok(Opcode::GetGlobal),
            0x13 => Ok(Opcode::SetGlobal),
            0x20 => Ok(Opcode::Add),
            0x21 => Ok(Opcode::Sub),
            0x22 => Ok(Opcode::Mul),
            0x23 => Ok(Opcode::Div),
            0x24 => Ok(Opcode::Mod),
            0x25 => Ok(Opcode::Negate),
            0x30 => Ok(Opcode::Equal),
            0x31 => Ok(Opcode::NotEqual),
            0x32 => Ok(Opcode::Less),
            0x33 => Ok(Opcode::LessEqual),
            0x34 => Ok(Opcode::Greater),
            0x35 => Ok(Opcode::GreaterEqual),
            0x40 => Ok(Opcode::Not),
            0x50 => Ok(Opcode::Jump),
            0x51 => Ok(Opcode::JumpIfFalse),
            0x52 => Ok(Opcode::Loop),
            0x60 => Ok(Opcode::Call),
            0x61 => Ok(Opcode::Return),
            0x62 => Ok(Opcode::CallNative),
            0x70 => Ok(Opcode::Array),
            0x71 => Ok(Opcode::GetIndex),
            0x72 => Ok(Opcode::SetLocalIndex),
            0x73 => Ok(Opcode::SetGlobalIndex),
            0x80 => Ok(Opcode::Pop),
            0x81 => Ok(Opcode::Dup),
            0xFF => Ok(Opcode::Halt),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_opcode_decodes_to_itself() {
        for byte in 0u8..=255 {
            if let Ok(op) = Opcode::try_from(byte) {
                assert_eq!(op as u8, byte);
            }
        }
    }

    #[test]
    fn test_unknown_byte_is_rejected() {
        assert!(Opcode::try_from(0x99).is_err());
    }
}
