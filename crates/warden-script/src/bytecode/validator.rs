//! Bytecode validator
//!
//! Structural checks over an [`Executable`] before the VM trusts it:
//! 1. **Decode pass**: every byte is a known opcode with its full operands
//! 2. **Jump targets**: every destination is in bounds and on an opcode boundary
//! 3. **Table refs**: constant, global, local, function and native indices exist
//! 4. **Layout**: function entry offsets land on opcode boundaries and the
//!    stream ends with `Return` or `Halt`
//!
//! The compiler runs this over its own output, and the compile cache runs it
//! over every executable loaded from disk.

use crate::bytecode::{Executable, Opcode};
use std::collections::HashSet;
use std::fmt;

/// A validation error with the byte offset where it was detected
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub offset: usize,
    pub kind: ValidationErrorKind,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "offset {:#06x}: {}", self.offset, self.kind)
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationErrorKind {
    UnknownOpcode(u8),
    TruncatedInstruction { opcode: Opcode },
    JumpOutOfBounds { target: i64, len: usize },
    JumpMisaligned { target: usize },
    ConstantOutOfBounds { index: usize, pool_size: usize },
    GlobalOutOfBounds { index: usize, count: usize },
    LocalOutOfBounds { slot: usize, local_count: usize },
    FunctionOutOfBounds { index: usize, count: usize },
    NativeOutOfBounds { index: usize, count: usize },
    ArgumentCountMismatch { function: String, expected: u8, found: u8 },
    MisalignedFunction { name: String },
    MissingScriptBody,
    MissingTerminator,
}

impl fmt::Display for ValidationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownOpcode(b) => write!(f, "unknown opcode {:#04x}", b),
            Self::TruncatedInstruction { opcode } => {
                write!(f, "instruction {:?} is missing operand bytes", opcode)
            }
            Self::JumpOutOfBounds { target, len } => {
                write!(f, "jump target {} is out of bounds (len={})", target, len)
            }
            Self::JumpMisaligned { target } => {
                write!(f, "jump target {} is not an opcode boundary", target)
            }
            Self::ConstantOutOfBounds { index, pool_size } => {
                write!(f, "constant {} out of bounds (pool size={})", index, pool_size)
            }
            Self::GlobalOutOfBounds { index, count } => {
                write!(f, "global slot {} out of bounds (count={})", index, count)
            }
            Self::LocalOutOfBounds { slot, local_count } => {
                write!(f, "local slot {} out of bounds (frame size={})", slot, local_count)
            }
            Self::FunctionOutOfBounds { index, count } => {
                write!(f, "function {} out of bounds (count={})", index, count)
            }
            Self::NativeOutOfBounds { index, count } => {
                write!(f, "native {} out of bounds (count={})", index, count)
            }
            Self::ArgumentCountMismatch {
                function,
                expected,
                found,
            } => write!(
                f,
                "call to '{}' passes {} argument(s), expected {}",
                function, found, expected
            ),
            Self::MisalignedFunction { name } => {
                write!(f, "function '{}' does not start on an opcode boundary", name)
            }
            Self::MissingScriptBody => write!(f, "function table has no script body"),
            Self::MissingTerminator => write!(f, "bytecode does not end with Return or Halt"),
        }
    }
}

struct Decoded {
    offset: usize,
    opcode: Opcode,
    /// First operand (u16 or i16 reinterpreted), 0 when absent
    operand: u16,
    /// Second operand (u8 argument count for calls)
    extra: u8,
}

/// Validate `executable`, collecting every error found
pub fn validate(executable: &Executable) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let decoded = decode(&executable.bytecode.instructions, &mut errors);
    let boundaries: HashSet<usize> = decoded.iter().map(|d| d.offset).collect();

    check_layout(executable, &decoded, &boundaries, &mut errors);
    check_jumps(executable, &decoded, &boundaries, &mut errors);
    check_refs(executable, &decoded, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn decode(code: &[u8], errors: &mut Vec<ValidationError>) -> Vec<Decoded> {
    let mut decoded = Vec::new();
    let mut ip = 0;
    while ip < code.len() {
        let offset = ip;
        let Ok(opcode) = Opcode::try_from(code[ip]) else {
            errors.push(ValidationError {
                offset,
                kind: ValidationErrorKind::UnknownOpcode(code[ip]),
            });
            ip += 1;
            continue;
        };
        let width = opcode.operand_width();
        if ip + 1 + width > code.len() {
            errors.push(ValidationError {
                offset,
                kind: ValidationErrorKind::TruncatedInstruction { opcode },
            });
            break;
        }
        let operand = if width >= 2 {
            u16::from_be_bytes([code[ip + 1], code[ip + 2]])
        } else {
            0
        };
        let extra = if width == 3 { code[ip + 3] } else { 0 };
        decoded.push(Decoded {
            offset,
            opcode,
            operand,
            extra,
        });
        ip += 1 + width;
    }
    decoded
}

fn check_layout(
    executable: &Executable,
    decoded: &[Decoded],
    boundaries: &HashSet<usize>,
    errors: &mut Vec<ValidationError>,
) {
    if executable.functions.is_empty() {
        errors.push(ValidationError {
            offset: 0,
            kind: ValidationErrorKind::MissingScriptBody,
        });
    }
    for func in &executable.functions {
        if !boundaries.contains(&func.offset) {
            errors.push(ValidationError {
                offset: func.offset,
                kind: ValidationErrorKind::MisalignedFunction {
                    name: func.name.clone(),
                },
            });
        }
    }
    match decoded.last() {
        Some(last) if matches!(last.opcode, Opcode::Return | Opcode::Halt) => {}
        last => errors.push(ValidationError {
            offset: last.map(|d| d.offset).unwrap_or(0),
            kind: ValidationErrorKind::MissingTerminator,
        }),
    }
}

fn check_jumps(
    executable: &Executable,
    decoded: &[Decoded],
    boundaries: &HashSet<usize>,
    errors: &mut Vec<ValidationError>,
) {
    let len = executable.bytecode.instructions.len();
    for instr in decoded {
        let after = (instr.offset + 3) as i64;
        let target = match instr.opcode {
            Opcode::Jump | Opcode::JumpIfFalse => after + instr.operand as i16 as i64,
            Opcode::Loop => after - instr.operand as i64,
            _ => continue,
        };
        if target < 0 || target >= len as i64 {
            errors.push(ValidationError {
                offset: instr.offset,
                kind: ValidationErrorKind::JumpOutOfBounds { target, len },
            });
        } else if !boundaries.contains(&(target as usize)) {
            errors.push(ValidationError {
                offset: instr.offset,
                kind: ValidationErrorKind::JumpMisaligned {
                    target: target as usize,
                },
            });
        }
    }
}

fn check_refs(executable: &Executable, decoded: &[Decoded], errors: &mut Vec<ValidationError>) {
    // Function bodies are laid out back to back; each instruction belongs to
    // the function with the greatest entry offset at or before it.
    let mut regions: Vec<(usize, usize)> = executable
        .functions
        .iter()
        .map(|f| (f.offset, f.local_count as usize))
        .collect();
    regions.sort_unstable();

    for instr in decoded {
        let index = instr.operand as usize;
        let kind = match instr.opcode {
            Opcode::Constant if index >= executable.bytecode.constants.len() => {
                Some(ValidationErrorKind::ConstantOutOfBounds {
                    index,
                    pool_size: executable.bytecode.constants.len(),
                })
            }
            Opcode::GetGlobal | Opcode::SetGlobal | Opcode::SetGlobalIndex
                if index >= executable.globals.len() =>
            {
                Some(ValidationErrorKind::GlobalOutOfBounds {
                    index,
                    count: executable.globals.len(),
                })
            }
            Opcode::GetLocal | Opcode::SetLocal | Opcode::SetLocalIndex => {
                let frame = regions
                    .iter()
                    .rev()
                    .find(|(start, _)| *start <= instr.offset)
                    .map(|(_, count)| *count)
                    .unwrap_or(0);
                (index >= frame).then_some(ValidationErrorKind::LocalOutOfBounds {
                    slot: index,
                    local_count: frame,
                })
            }
            Opcode::Call => match executable.functions.get(index) {
                None => Some(ValidationErrorKind::FunctionOutOfBounds {
                    index,
                    count: executable.functions.len(),
                }),
                Some(func) if func.arity != instr.extra => {
                    Some(ValidationErrorKind::ArgumentCountMismatch {
                        function: func.name.clone(),
                        expected: func.arity,
                        found: instr.extra,
                    })
                }
                Some(_) => None,
            },
            Opcode::CallNative if index >= executable.natives.len() => {
                Some(ValidationErrorKind::NativeOutOfBounds {
                    index,
                    count: executable.natives.len(),
                })
            }
            _ => None,
        };
        if let Some(kind) = kind {
            errors.push(ValidationError {
                offset: instr.offset,
                kind,
            });
        }
    }
}
