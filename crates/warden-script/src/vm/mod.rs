//! Stack-based virtual machine
//!
//! Executes validated bytecode with a value stack and explicit call frames.
//! Script recursion never recurses on the native stack; call depth is bounded
//! by a byte budget instead.
//! - Integer arithmetic is checked; float arithmetic rejects NaN and infinity
//! - Conditions must be `bool`
//! - The deadline and cancel flag are polled every [`INTERRUPT_CHECK_INTERVAL`]
//!   instructions and after every host call
//! - Strings and arrays the script holds are charged to the memory meter and
//!   released when dropped; indexed assignment mutates unshared arrays in place

mod frame;

pub use frame::{CallFrame, FRAME_BYTES};

use crate::bytecode::{is_script_entry, Executable, Opcode};
use crate::host::{HostApi, NativeContext, NativeFn};
use crate::span::Span;
use crate::value::{RuntimeError, Value, ValueArray, ValueString};
use std::cmp::Ordering;
use std::sync::Arc;

/// Instructions executed between deadline/cancel checks
pub const INTERRUPT_CHECK_INTERVAL: u32 = 256;

const VALUE_BYTES: u64 = std::mem::size_of::<Value>() as u64;

/// Virtual machine for one execution of one executable
pub struct Vm {
    executable: Arc<Executable>,
    natives: Vec<NativeFn>,
    ctx: NativeContext,
    max_stack_bytes: u64,
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    globals: Vec<Value>,
    ip: usize,
    /// Offset of the instruction currently executing, for error spans
    instruction_start: usize,
    until_interrupt_check: u32,
}

impl Vm {
    /// Link `executable` against `host`
    ///
    /// Fails if a host function the executable references is not registered.
    pub fn new(
        executable: Arc<Executable>,
        host: &HostApi,
        ctx: NativeContext,
        max_stack_bytes: u64,
    ) -> Result<Self, RuntimeError> {
        let natives = executable
            .natives
            .iter()
            .map(|name| {
                host.get(name)
                    .cloned()
                    .ok_or_else(|| RuntimeError::UnknownFunction {
                        name: name.clone(),
                        span: Span::dummy(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let globals = vec![Value::Null; executable.globals.len()];
        Ok(Self {
            executable,
            natives,
            ctx,
            max_stack_bytes,
            stack: Vec::with_capacity(256),
            frames: Vec::new(),
            globals,
            ip: 0,
            instruction_start: 0,
            until_interrupt_check: 0,
        })
    }

    pub fn context(&self) -> &NativeContext {
        &self.ctx
    }

    /// Value of a global after execution, by name
    pub fn global(&self, name: &str) -> Option<&Value> {
        self.executable
            .global_slot(name)
            .and_then(|slot| self.globals.get(slot))
    }

    /// Run the script from `entry`
    ///
    /// The script body entry (`""` or `"<script>"`) sees `args` as an array
    /// in the `args` global. A named entry runs the body first, to initialize
    /// globals, then calls the function with `args` as its parameters.
    pub fn run_entry(&mut self, entry: &str, mut args: Vec<Value>) -> Result<Value, RuntimeError> {
        self.ctx.check_interrupt()?;
        for arg in &mut args {
            arg.track(self.ctx.meter())?;
        }

        if is_script_entry(entry) {
            self.set_args_global(args)?;
            return self.run_function(0, Vec::new());
        }

        let index = self
            .executable
            .function_index(entry)
            .filter(|&index| index != 0)
            .ok_or_else(|| RuntimeError::UnknownFunction {
                name: entry.to_string(),
                span: Span::dummy(),
            })?;
        let arity = self.executable.functions[index].arity as usize;
        if args.len() != arity {
            return Err(RuntimeError::ArityMismatch {
                name: entry.to_string(),
                expected: arity,
                found: args.len(),
                span: Span::dummy(),
            });
        }

        self.set_args_global(args.clone())?;
        self.run_function(0, Vec::new())?;
        self.run_function(index, args)
    }

    fn set_args_global(&mut self, args: Vec<Value>) -> Result<(), RuntimeError> {
        let args = ValueArray::charged(args, self.ctx.meter())?;
        if let Some(slot) = self.globals.first_mut() {
            *slot = Value::Array(args);
        }
        Ok(())
    }

    /// Call function `index` with `args` and run until it returns
    fn run_function(&mut self, index: usize, args: Vec<Value>) -> Result<Value, RuntimeError> {
        let base_depth = self.frames.len();
        let resume_ip = self.ip;
        self.stack.extend(args);
        self.push_frame(index, resume_ip)?;
        let result = self.execute(base_depth);
        if result.is_err() {
            self.frames.truncate(base_depth);
        }
        result
    }

    fn push_frame(&mut self, index: usize, return_ip: usize) -> Result<(), RuntimeError> {
        let function = self
            .executable
            .functions
            .get(index)
            .ok_or_else(|| RuntimeError::UnknownFunction {
                name: format!("#{}", index),
                span: self.current_span(),
            })?;
        let arity = function.arity as usize;
        let local_count = (function.local_count as usize).max(arity);
        let offset = function.offset;

        let used = (self.frames.len() as u64 + 1)
            .saturating_mul(FRAME_BYTES)
            .saturating_add((self.stack.len() + local_count - arity) as u64 * VALUE_BYTES);
        if used > self.max_stack_bytes {
            return Err(RuntimeError::StackOverflow {
                depth: self.frames.len() + 1,
                limit: self.max_stack_bytes,
                span: self.current_span(),
            });
        }

        let stack_base = self
            .stack
            .len()
            .checked_sub(arity)
            .ok_or(RuntimeError::StackUnderflow {
                span: self.current_span(),
            })?;
        self.stack.resize(stack_base + local_count, Value::Null);
        self.frames.push(CallFrame {
            function: index,
            return_ip,
            stack_base,
            local_count,
        });
        self.ip = offset;
        Ok(())
    }

    fn execute(&mut self, base_depth: usize) -> Result<Value, RuntimeError> {
        loop {
            if self.until_interrupt_check == 0 {
                self.ctx.check_interrupt()?;
                self.until_interrupt_check = INTERRUPT_CHECK_INTERVAL;
            }
            self.until_interrupt_check -= 1;

            self.instruction_start = self.ip;
            let opcode = self.read_opcode()?;

            match opcode {
                // ===== Constants =====
                Opcode::Constant => {
                    let index = self.read_u16()? as usize;
                    let mut value = self
                        .executable
                        .bytecode
                        .constants
                        .get(index)
                        .map(|c| c.to_value())
                        .ok_or(RuntimeError::UnknownOpcode {
                            span: self.current_span(),
                        })?;
                    value.track(self.ctx.meter())?;
                    self.stack.push(value);
                }
                Opcode::Null => self.stack.push(Value::Null),
                Opcode::True => self.stack.push(Value::Bool(true)),
                Opcode::False => self.stack.push(Value::Bool(false)),

                // ===== Variables =====
                Opcode::GetLocal => {
                    let slot = self.local_slot()?;
                    let value = self.stack[slot].clone();
                    self.stack.push(value);
                }
                Opcode::SetLocal => {
                    let slot = self.local_slot()?;
                    let value = self.peek()?.clone();
                    self.stack[slot] = value;
                }
                Opcode::GetGlobal => {
                    let slot = self.global_slot()?;
                    let value = self.globals[slot].clone();
                    self.stack.push(value);
                }
                Opcode::SetGlobal => {
                    let slot = self.global_slot()?;
                    let value = self.peek()?.clone();
                    self.globals[slot] = value;
                }

                // ===== Arithmetic =====
                Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Mod => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    let result = self.arithmetic(opcode, a, b)?;
                    self.stack.push(result);
                }
                Opcode::Negate => {
                    let value = match self.pop()? {
                        Value::Int(n) => Value::Int(n.checked_neg().ok_or(
                            RuntimeError::IntegerOverflow {
                                span: self.current_span(),
                            },
                        )?),
                        Value::Float(x) => Value::Float(-x),
                        other => {
                            return Err(self.type_error(format!("cannot negate {}", other.type_name())))
                        }
                    };
                    self.stack.push(value);
                }

                // ===== Comparison =====
                Opcode::Equal => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.stack.push(Value::Bool(values_equal(&a, &b)));
                }
                Opcode::NotEqual => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.stack.push(Value::Bool(!values_equal(&a, &b)));
                }
                Opcode::Less | Opcode::LessEqual | Opcode::Greater | Opcode::GreaterEqual => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    let ordering = self.compare(&a, &b)?;
                    let result = match opcode {
                        Opcode::Less => ordering == Ordering::Less,
                        Opcode::LessEqual => ordering != Ordering::Greater,
                        Opcode::Greater => ordering == Ordering::Greater,
                        _ => ordering != Ordering::Less,
                    };
                    self.stack.push(Value::Bool(result));
                }

                // ===== Logical =====
                Opcode::Not => {
                    let value = self.pop_bool()?;
                    self.stack.push(Value::Bool(!value));
                }

                // ===== Control flow =====
                Opcode::Jump => {
                    let offset = self.read_i16()?;
                    self.jump_relative(offset as isize);
                }
                Opcode::JumpIfFalse => {
                    let offset = self.read_i16()?;
                    if !self.pop_bool()? {
                        self.jump_relative(offset as isize);
                    }
                }
                Opcode::Loop => {
                    let distance = self.read_u16()? as usize;
                    self.ip = self.ip.checked_sub(distance).ok_or(RuntimeError::UnknownOpcode {
                        span: self.current_span(),
                    })?;
                }

                // ===== Functions =====
                Opcode::Call => {
                    let index = self.read_u16()? as usize;
                    let _argc = self.read_u8()?;
                    let return_ip = self.ip;
                    self.push_frame(index, return_ip)?;
                }
                Opcode::Return => {
                    let result = self.pop()?;
                    let frame = self.frames.pop().ok_or(RuntimeError::StackUnderflow {
                        span: self.current_span(),
                    })?;
                    self.stack.truncate(frame.stack_base);
                    self.ip = frame.return_ip;
                    if self.frames.len() <= base_depth {
                        return Ok(result);
                    }
                    self.stack.push(result);
                }
                Opcode::CallNative => {
                    let index = self.read_u16()? as usize;
                    let argc = self.read_u8()? as usize;
                    let split = self.stack.len().checked_sub(argc).ok_or(
                        RuntimeError::StackUnderflow {
                            span: self.current_span(),
                        },
                    )?;
                    let args = self.stack.split_off(split);
                    let native = self
                        .natives
                        .get(index)
                        .cloned()
                        .ok_or_else(|| RuntimeError::UnknownFunction {
                            name: format!("#{}", index),
                            span: self.current_span(),
                        })?;
                    let span = self.current_span();
                    let mut result = native(&self.ctx, &args).map_err(|e| e.at(span))?;
                    // Host calls may block; do not wait for the next poll
                    self.ctx.check_interrupt()?;
                    result.track(self.ctx.meter())?;
                    self.stack.push(result);
                }

                // ===== Arrays =====
                Opcode::Array => {
                    let count = self.read_u16()? as usize;
                    let split = self.stack.len().checked_sub(count).ok_or(
                        RuntimeError::StackUnderflow {
                            span: self.current_span(),
                        },
                    )?;
                    let elements = self.stack.split_off(split);
                    let array = ValueArray::charged(elements, self.ctx.meter())?;
                    self.stack.push(Value::Array(array));
                }
                Opcode::GetIndex => {
                    let index = self.pop()?;
                    let target = self.pop()?;
                    let value = match &target {
                        Value::Array(arr) => {
                            let i = self.array_index(&index, arr.len())?;
                            arr.as_slice()[i].clone()
                        }
                        other => {
                            return Err(
                                self.type_error(format!("cannot index into {}", other.type_name()))
                            )
                        }
                    };
                    self.stack.push(value);
                }
                Opcode::SetLocalIndex => {
                    let value = self.pop()?;
                    let index = self.pop()?;
                    let slot = self.local_slot()?;
                    let mut target = std::mem::take(&mut self.stack[slot]);
                    let stored = self.store_index(&mut target, &index, value);
                    self.stack[slot] = target;
                    stored?;
                }
                Opcode::SetGlobalIndex => {
                    let value = self.pop()?;
                    let index = self.pop()?;
                    let slot = self.global_slot()?;
                    let mut target = std::mem::take(&mut self.globals[slot]);
                    let stored = self.store_index(&mut target, &index, value);
                    self.globals[slot] = target;
                    stored?;
                }

                // ===== Stack manipulation =====
                Opcode::Pop => {
                    self.pop()?;
                }
                Opcode::Dup => {
                    let value = self.peek()?.clone();
                    self.stack.push(value);
                }

                Opcode::Halt => {
                    let result = self.stack.pop().unwrap_or(Value::Null);
                    self.frames.truncate(base_depth);
                    return Ok(result);
                }
            }
        }
    }

    // ===== Operations =====

    fn arithmetic(&self, opcode: Opcode, a: Value, b: Value) -> Result<Value, RuntimeError> {
        let span = self.current_span();
        match (&a, &b) {
            (Value::Int(x), Value::Int(y)) => {
                let (x, y) = (*x, *y);
                if matches!(opcode, Opcode::Div | Opcode::Mod) && y == 0 {
                    return Err(RuntimeError::DivideByZero { span });
                }
                let result = match opcode {
                    Opcode::Add => x.checked_add(y),
                    Opcode::Sub => x.checked_sub(y),
                    Opcode::Mul => x.checked_mul(y),
                    Opcode::Div => x.checked_div(y),
                    _ => x.checked_rem(y),
                };
                result
                    .map(Value::Int)
                    .ok_or(RuntimeError::IntegerOverflow { span })
            }
            (Value::String(x), Value::String(y)) if opcode == Opcode::Add => {
                self.ctx.reserve((x.len() + y.len()) as u64)?;
                let mut joined = String::with_capacity(x.len() + y.len());
                joined.push_str(x);
                joined.push_str(y);
                Ok(Value::String(ValueString::charged(joined, self.ctx.meter())?))
            }
            _ => {
                let (Some(x), Some(y)) = (as_number(&a), as_number(&b)) else {
                    return Err(self.type_error(format!(
                        "unsupported operand types for {:?}: {} and {}",
                        opcode,
                        a.type_name(),
                        b.type_name()
                    )));
                };
                if matches!(opcode, Opcode::Div | Opcode::Mod) && y == 0.0 {
                    return Err(RuntimeError::DivideByZero { span });
                }
                let result = match opcode {
                    Opcode::Add => x + y,
                    Opcode::Sub => x - y,
                    Opcode::Mul => x * y,
                    Opcode::Div => x / y,
                    _ => x % y,
                };
                if result.is_finite() {
                    Ok(Value::Float(result))
                } else {
                    Err(RuntimeError::InvalidNumericResult { span })
                }
            }
        }
    }

    fn compare(&self, a: &Value, b: &Value) -> Result<Ordering, RuntimeError> {
        match (a, b) {
            (Value::Int(x), Value::Int(y)) => Ok(x.cmp(y)),
            (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
            _ => match (as_number(a), as_number(b)) {
                (Some(x), Some(y)) => x
                    .partial_cmp(&y)
                    .ok_or(RuntimeError::InvalidNumericResult {
                        span: self.current_span(),
                    }),
                _ => Err(self.type_error(format!(
                    "cannot compare {} with {}",
                    a.type_name(),
                    b.type_name()
                ))),
            },
        }
    }

    fn array_index(&self, index: &Value, len: usize) -> Result<usize, RuntimeError> {
        let Value::Int(i) = index else {
            return Err(RuntimeError::InvalidIndex {
                found: index.type_name().to_string(),
                span: self.current_span(),
            });
        };
        usize::try_from(*i)
            .ok()
            .filter(|&i| i < len)
            .ok_or(RuntimeError::OutOfBounds {
                index: *i,
                len,
                span: self.current_span(),
            })
    }

    /// Assign `target[index] = value`, copying `target` only if it is shared
    fn store_index(&self, target: &mut Value, index: &Value, value: Value) -> Result<(), RuntimeError> {
        let type_name = target.type_name();
        let Value::Array(arr) = target else {
            return Err(self.type_error(format!("cannot assign into {}", type_name)));
        };
        let i = self.array_index(index, arr.len())?;
        arr.make_mut(self.ctx.meter())?[i] = value;
        Ok(())
    }

    fn jump_relative(&mut self, offset: isize) {
        self.ip = self.ip.wrapping_add_signed(offset);
    }

    // ===== Stack and operand helpers =====

    fn pop(&mut self) -> Result<Value, RuntimeError> {
        self.stack.pop().ok_or(RuntimeError::StackUnderflow {
            span: self.current_span(),
        })
    }

    fn peek(&self) -> Result<&Value, RuntimeError> {
        self.stack.last().ok_or(RuntimeError::StackUnderflow {
            span: self.current_span(),
        })
    }

    fn pop_bool(&mut self) -> Result<bool, RuntimeError> {
        match self.pop()? {
            Value::Bool(b) => Ok(b),
            other => Err(self.type_error(format!(
                "condition must be bool, found {}",
                other.type_name()
            ))),
        }
    }

    fn local_slot(&mut self) -> Result<usize, RuntimeError> {
        let slot = self.read_u16()? as usize;
        let frame = self.frames.last().ok_or(RuntimeError::StackUnderflow {
            span: self.current_span(),
        })?;
        let absolute = frame.stack_base + slot;
        if slot >= frame.local_count || absolute >= self.stack.len() {
            return Err(RuntimeError::StackUnderflow {
                span: self.current_span(),
            });
        }
        Ok(absolute)
    }

    fn global_slot(&mut self) -> Result<usize, RuntimeError> {
        let slot = self.read_u16()? as usize;
        if slot >= self.globals.len() {
            return Err(RuntimeError::UnknownOpcode {
                span: self.current_span(),
            });
        }
        Ok(slot)
    }

    fn read_opcode(&mut self) -> Result<Opcode, RuntimeError> {
        let byte = self.read_u8()?;
        Opcode::try_from(byte).map_err(|_| RuntimeError::UnknownOpcode {
            span: self.current_span(),
        })
    }

    fn read_u8(&mut self) -> Result<u8, RuntimeError> {
        let byte = self
            .executable
            .bytecode
            .instructions
            .get(self.ip)
            .copied()
            .ok_or(RuntimeError::UnknownOpcode {
                span: self.current_span(),
            })?;
        self.ip += 1;
        Ok(byte)
    }

    fn read_u16(&mut self) -> Result<u16, RuntimeError> {
        let hi = self.read_u8()?;
        let lo = self.read_u8()?;
        Ok(u16::from_be_bytes([hi, lo]))
    }

    fn read_i16(&mut self) -> Result<i16, RuntimeError> {
        Ok(self.read_u16()? as i16)
    }

    fn current_span(&self) -> Span {
        self.executable
            .bytecode
            .span_at(self.instruction_start)
            .unwrap_or_else(Span::dummy)
    }

    fn type_error(&self, msg: String) -> RuntimeError {
        RuntimeError::TypeError {
            msg,
            span: self.current_span(),
        }
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Int(n) => Some(*n as f64),
        Value::Float(x) => Some(*x),
        _ => None,
    }
}

/// Structural equality; ints and floats compare numerically
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => (*x as f64) == *y,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile_source;
    use crate::host::{CancelToken, MemoryMeter};
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use std::time::{Duration, Instant};

    const STACK: u64 = 256 * 1024;

    fn run_with(
        source: &str,
        entry: &str,
        args: Vec<Value>,
        ctx: NativeContext,
    ) -> Result<Value, RuntimeError> {
        let host = HostApi::with_stdlib();
        let exe = compile_source(source, &host).unwrap();
        let mut vm = Vm::new(Arc::new(exe), &host, ctx, STACK)?;
        vm.run_entry(entry, args)
    }

    fn run(source: &str) -> Result<Value, RuntimeError> {
        run_with(source, "", Vec::new(), NativeContext::unbounded("test"))
    }

    #[rstest]
    #[case::add("return 2 + 2;", Value::Int(4))]
    #[case::precedence("return 2 + 3 * 4;", Value::Int(14))]
    #[case::mixed_numeric("return 1 + 0.5;", Value::Float(1.5))]
    #[case::modulo("return 7 % 3;", Value::Int(1))]
    #[case::concat("return \"a\" + \"b\";", Value::string("ab"))]
    #[case::compare_strings("return \"a\" < \"b\";", Value::Bool(true))]
    #[case::int_float_equal("return 1 == 1.0;", Value::Bool(true))]
    #[case::and_short_circuit("return false && 1 / 0 == 0;", Value::Bool(false))]
    #[case::or("return false || true;", Value::Bool(true))]
    #[case::no_return("let x = 1;", Value::Null)]
    fn test_expression_results(#[case] source: &str, #[case] expected: Value) {
        assert_eq!(run(source).unwrap(), expected);
    }

    #[test]
    fn test_factorial() {
        let source = "fn factorial(n) { if n <= 1 { return 1; } return n * factorial(n - 1); }
                      return factorial(10);";
        assert_eq!(run(source).unwrap(), Value::Int(3628800));
    }

    #[test]
    fn test_while_with_break_and_continue() {
        let source = "var i = 0; var sum = 0;
                      while true {
                          i += 1;
                          if i > 10 { break; }
                          if i % 2 == 0 { continue; }
                          sum += i;
                      }
                      return sum;";
        assert_eq!(run(source).unwrap(), Value::Int(25));
    }

    #[test]
    fn test_array_assignment_is_copy_on_write() {
        let source = "var a = [1, 2, 3]; let b = a; a[0] = 9; return [a[0], b[0]];";
        assert_eq!(
            run(source).unwrap(),
            Value::array(vec![Value::Int(9), Value::Int(1)])
        );
    }

    #[test]
    fn test_named_entry_receives_args_and_sees_globals() {
        let source = "let base = 100; fn add(a, b) { return base + a + b; }";
        let result = run_with(
            source,
            "add",
            vec![Value::Int(1), Value::Int(2)],
            NativeContext::unbounded("t"),
        );
        assert_eq!(result.unwrap(), Value::Int(103));
    }

    #[test]
    fn test_script_entry_sees_args_global() {
        let result = run_with(
            "return args[1];",
            "<script>",
            vec![Value::Int(1), Value::string("two")],
            NativeContext::unbounded("t"),
        );
        assert_eq!(result.unwrap(), Value::string("two"));
    }

    #[test]
    fn test_named_entry_arity_checked() {
        let result = run_with("fn f(a) { return a; }", "f", vec![], NativeContext::unbounded("t"));
        assert!(matches!(result, Err(RuntimeError::ArityMismatch { expected: 1, found: 0, .. })));
    }

    #[test]
    fn test_unknown_entry() {
        let result = run_with("return 1;", "main", vec![], NativeContext::unbounded("t"));
        assert!(matches!(result, Err(RuntimeError::UnknownFunction { .. })));
    }

    #[rstest]
    #[case::overflow("return 9223372036854775807 + 1;")]
    #[case::negate_min("let m = -9223372036854775807 - 1; return -m;")]
    fn test_integer_overflow_faults(#[case] source: &str) {
        assert!(matches!(run(source), Err(RuntimeError::IntegerOverflow { .. })));
    }

    #[test]
    fn test_divide_by_zero() {
        assert!(matches!(run("return 1 / 0;"), Err(RuntimeError::DivideByZero { .. })));
    }

    #[test]
    fn test_condition_must_be_bool() {
        assert!(matches!(run("if 1 { }"), Err(RuntimeError::TypeError { .. })));
    }

    #[test]
    fn test_out_of_bounds_has_span() {
        let err = run("let xs = [1];\nreturn xs[5];").unwrap_err();
        let RuntimeError::OutOfBounds { index, len, span } = err else {
            panic!("unexpected {:?}", err);
        };
        assert_eq!((index, len), (5, 1));
        assert!(!span.is_empty());
    }

    #[test]
    fn test_unbounded_recursion_hits_stack_ceiling() {
        let err = run("fn down(n) { return down(n + 1); } return down(0);").unwrap_err();
        let RuntimeError::StackOverflow { depth, limit, .. } = err else {
            panic!("unexpected {:?}", err);
        };
        assert_eq!(limit, STACK);
        assert!(depth > 100);
    }

    #[test]
    fn test_infinite_loop_hits_deadline() {
        let ctx = NativeContext::new(
            "t",
            Some(Instant::now() + Duration::from_millis(20)),
            CancelToken::new(),
            MemoryMeter::unlimited(),
        );
        let result = run_with("while true { }", "", vec![], ctx);
        assert_eq!(result, Err(RuntimeError::DeadlineExceeded));
    }

    #[test]
    fn test_cancelled_before_start() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let ctx = NativeContext::new("t", None, cancel, MemoryMeter::unlimited());
        assert_eq!(run_with("return 1;", "", vec![], ctx), Err(RuntimeError::Cancelled));
    }

    #[test]
    fn test_growing_string_hits_memory_ceiling() {
        let ctx = NativeContext::new("t", None, CancelToken::new(), MemoryMeter::new(4096));
        let result = run_with(
            "var s = \"x\"; while true { s = s + s; }",
            "",
            vec![],
            ctx,
        );
        assert!(matches!(result, Err(RuntimeError::MemoryLimitExceeded { limit: 4096, .. })));
    }

    #[test]
    fn test_filling_an_array_in_place_is_charged_once() {
        let meter = MemoryMeter::new(64 * 1024);
        let ctx = NativeContext::new("t", None, CancelToken::new(), meter.clone());
        let source = "var xs = array.new(1000, 0);
                      var i = 0;
                      while i < 1000 { xs[i] = i; i += 1; }
                      return xs[999];";
        assert_eq!(run_with(source, "", vec![], ctx), Ok(Value::Int(999)));
        assert!(meter.peak() < 2 * 1000 * VALUE_BYTES);
    }

    #[test]
    fn test_local_array_is_filled_in_place() {
        let meter = MemoryMeter::new(64 * 1024);
        let ctx = NativeContext::new("t", None, CancelToken::new(), meter.clone());
        let source = "fn fill(n) {
                          var xs = array.new(n, null);
                          var i = 0;
                          while i < n { xs[i] = i * 2; i += 1; }
                          return xs;
                      }
                      return array.len(fill(2000));";
        assert_eq!(run_with(source, "", vec![], ctx), Ok(Value::Int(2000)));
    }

    #[test]
    fn test_dropped_strings_are_released() {
        let meter = MemoryMeter::new(8 * 1024);
        let ctx = NativeContext::new("t", None, CancelToken::new(), meter.clone());
        let source = "var s = \"\"; var i = 0;
                      while i < 3000 { s = s + \"x\"; i += 1; }
                      return string.len(s);";
        assert_eq!(run_with(source, "", vec![], ctx), Ok(Value::Int(3000)));
        assert_eq!(meter.used(), 0);
    }

    #[test]
    fn test_live_values_stay_charged_until_the_vm_drops() {
        let host = HostApi::with_stdlib();
        let exe = compile_source("var keep = array.new(10, 0);", &host).unwrap();
        let meter = MemoryMeter::unlimited();
        let ctx = NativeContext::new("t", None, CancelToken::new(), meter.clone());
        let mut vm = Vm::new(Arc::new(exe), &host, ctx, STACK).unwrap();
        vm.run_entry("", vec![]).unwrap();
        // keep plus the empty args array
        assert_eq!(meter.used(), 10 * VALUE_BYTES);
        drop(vm);
        assert_eq!(meter.used(), 0);
    }

    #[test]
    fn test_missing_host_function_fails_link() {
        let host = HostApi::with_stdlib();
        let exe = compile_source("return math.abs(-1);", &host).unwrap();
        let result = Vm::new(Arc::new(exe), &HostApi::new(), NativeContext::unbounded("t"), STACK);
        assert!(matches!(result, Err(RuntimeError::UnknownFunction { .. })));
    }

    #[test]
    fn test_globals_visible_after_run() {
        let host = HostApi::new();
        let exe = compile_source("var n = 1; n += 41;", &host).unwrap();
        let mut vm = Vm::new(Arc::new(exe), &host, NativeContext::unbounded("t"), STACK).unwrap();
        vm.run_entry("", vec![]).unwrap();
        assert_eq!(vm.global("n"), Some(&Value::Int(42)));
    }
}
