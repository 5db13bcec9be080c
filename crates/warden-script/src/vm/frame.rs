//! Call frames

/// Bytes charged against the stack ceiling for each active frame
pub const FRAME_BYTES: u64 = 64;

/// One activation of a script function
///
/// ```text
/// [main locals][temps] | [arg0][arg1][local2][temps]
///  ^                      ^
///  main stack_base = 0    callee stack_base
/// ```
///
/// Local slot N lives at `stack[stack_base + N]`; parameters occupy the
/// first `arity` slots.
#[derive(Debug, Clone)]
pub struct CallFrame {
    /// Index into the executable's function table
    pub function: usize,
    /// Instruction to resume in the caller
    pub return_ip: usize,
    pub stack_base: usize,
    pub local_count: usize,
}
