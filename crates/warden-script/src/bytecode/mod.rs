//! Bytecode container and compiled executable
//!
//! An [`Executable`] is one flat instruction stream shared by every function
//! of a script, plus the tables the VM needs to run it: the function table,
//! the host functions it must link against, and the global slot names.

mod opcode;
pub mod validator;

pub use opcode::Opcode;
pub use validator::{validate, ValidationError, ValidationErrorKind};

use crate::span::Span;
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// Current bytecode format version
///
/// Persisted executables with a different version are discarded.
pub const BYTECODE_VERSION: u16 = 2;

/// Name of the implicit function holding top-level script code
pub const SCRIPT_ENTRY: &str = "<script>";

/// Maps an instruction offset to its source span
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugSpan {
    pub instruction_offset: usize,
    pub span: Span,
}

/// Constant pool entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    Int(i64),
    Float(f64),
    String(String),
}

impl Constant {
    pub fn to_value(&self) -> Value {
        match self {
            Constant::Int(n) => Value::Int(*n),
            Constant::Float(x) => Value::Float(*x),
            Constant::String(s) => Value::string(s),
        }
    }
}

/// Raw instructions, constant pool and debug information
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Bytecode {
    pub instructions: Vec<u8>,
    pub constants: Vec<Constant>,
    pub debug_info: Vec<DebugSpan>,
}

impl Bytecode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit an opcode and track debug information
    pub fn emit(&mut self, opcode: Opcode, span: Span) {
        self.debug_info.push(DebugSpan {
            instruction_offset: self.instructions.len(),
            span,
        });
        self.instructions.push(opcode as u8);
    }

    pub fn emit_u8(&mut self, byte: u8) {
        self.instructions.push(byte);
    }

    /// Emit a u16 operand (big-endian)
    pub fn emit_u16(&mut self, value: u16) {
        self.instructions.extend_from_slice(&value.to_be_bytes());
    }

    /// Emit an i16 operand (big-endian, signed)
    pub fn emit_i16(&mut self, value: i16) {
        self.emit_u16(value as u16);
    }

    /// Add a constant to the pool, reusing an identical entry
    ///
    /// Returns `None` when the pool is full.
    pub fn add_constant(&mut self, constant: Constant) -> Option<u16> {
        if let Some(existing) = self.constants.iter().position(|c| *c == constant) {
            return u16::try_from(existing).ok();
        }
        let index = u16::try_from(self.constants.len()).ok()?;
        self.constants.push(constant);
        Some(index)
    }

    pub fn current_offset(&self) -> usize {
        self.instructions.len()
    }

    /// Patch the i16 operand at `offset` to jump to the current position
    ///
    /// Returns false if the distance does not fit in the operand.
    pub fn patch_jump(&mut self, offset: usize) -> bool {
        let Ok(jump) = i16::try_from(self.instructions.len() - offset - 2) else {
            return false;
        };
        let [hi, lo] = jump.to_be_bytes();
        self.instructions[offset] = hi;
        self.instructions[offset + 1] = lo;
        true
    }

    pub fn read_u16(&self, offset: usize) -> Option<u16> {
        let bytes = self.instructions.get(offset..offset + 2)?;
        Some(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    /// Source span of the instruction starting at or before `offset`
    pub fn span_at(&self, offset: usize) -> Option<Span> {
        let index = self
            .debug_info
            .partition_point(|d| d.instruction_offset <= offset);
        index
            .checked_sub(1)
            .map(|i| self.debug_info[i].span)
    }
}

/// Function table entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionInfo {
    pub name: String,
    pub arity: u8,
    /// Slots reserved in the frame, parameters included
    pub local_count: u16,
    /// Offset of the first instruction of the body
    pub offset: usize,
}

/// Compiled, linkable script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Executable {
    pub bytecode: Bytecode,
    /// Function 0 is always the top-level script body
    pub functions: Vec<FunctionInfo>,
    /// Host function names referenced by `CallNative`, in index order
    pub natives: Vec<String>,
    /// Global slot names, in slot order
    pub globals: Vec<String>,
}

impl Executable {
    pub fn function_index(&self, name: &str) -> Option<usize> {
        self.functions.iter().position(|f| f.name == name)
    }

    /// True if `entry` names the script body or a script function
    pub fn has_entry(&self, entry: &str) -> bool {
        is_script_entry(entry) || self.function_index(entry).is_some()
    }

    pub fn global_slot(&self, name: &str) -> Option<usize> {
        self.globals.iter().position(|g| g == name)
    }
}

/// True for the entry names that select the top-level script body
pub fn is_script_entry(entry: &str) -> bool {
    entry.is_empty() || entry == SCRIPT_ENTRY
}
