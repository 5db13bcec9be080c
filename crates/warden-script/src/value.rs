//! Runtime values and runtime errors

use crate::diagnostic::{codes, Diagnostic};
use crate::host::{HeapCharge, MemoryMeter};
use crate::span::Span;
use serde::ser::{Serialize, SerializeSeq, Serializer};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

const SLOT_BYTES: u64 = std::mem::size_of::<Value>() as u64;

fn slot_bytes(len: usize) -> u64 {
    (len as u64).saturating_mul(SLOT_BYTES)
}

#[derive(Default)]
struct ArrayData {
    items: Vec<Value>,
    charge: Option<HeapCharge>,
}

// A copy is new storage and carries no charge until it is tracked
impl Clone for ArrayData {
    fn clone(&self) -> Self {
        Self {
            items: self.items.clone(),
            charge: None,
        }
    }
}

/// Copy-on-write array
///
/// Clones share storage; the first mutation of a shared array copies it.
/// Storage created by the VM holds a [`HeapCharge`] for its slots.
#[derive(Clone, Default)]
pub struct ValueArray(Arc<ArrayData>);

impl ValueArray {
    pub fn new() -> Self {
        Self::default()
    }

    /// Array whose slots are charged to `meter`; `items` must already be tracked
    pub fn charged(items: Vec<Value>, meter: &MemoryMeter) -> Result<Self, RuntimeError> {
        let charge = meter.charge(slot_bytes(items.len()))?;
        Ok(Self(Arc::new(ArrayData {
            items,
            charge: Some(charge),
        })))
    }

    pub fn len(&self) -> usize {
        self.0.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.items.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.0.items.iter()
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.0.items
    }

    /// True if another value currently shares this storage
    pub fn is_shared(&self) -> bool {
        Arc::strong_count(&self.0) > 1
    }

    /// Mutable access, copying the storage first if it is shared
    ///
    /// A copy is charged to `meter`; unshared storage is mutated in place.
    pub fn make_mut(&mut self, meter: &MemoryMeter) -> Result<&mut Vec<Value>, RuntimeError> {
        if Arc::get_mut(&mut self.0).is_none() {
            *self = Self::charged(self.0.items.clone(), meter)?;
        }
        Ok(&mut Arc::make_mut(&mut self.0).items)
    }

    fn track(&mut self, meter: &MemoryMeter) -> Result<(), RuntimeError> {
        // Shared storage is owned elsewhere
        let Some(data) = Arc::get_mut(&mut self.0) else {
            return Ok(());
        };
        if data.charge.is_some() {
            return Ok(());
        }
        for item in &mut data.items {
            item.track(meter)?;
        }
        data.charge = Some(meter.charge(slot_bytes(data.items.len()))?);
        Ok(())
    }
}

impl PartialEq for ValueArray {
    fn eq(&self, other: &Self) -> bool {
        self.0.items == other.0.items
    }
}

impl fmt::Debug for ValueArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl From<Vec<Value>> for ValueArray {
    fn from(items: Vec<Value>) -> Self {
        Self(Arc::new(ArrayData {
            items,
            charge: None,
        }))
    }
}

struct StringData {
    text: Box<str>,
    charge: Option<HeapCharge>,
}

/// Immutable shared string
#[derive(Clone)]
pub struct ValueString(Arc<StringData>);

impl ValueString {
    /// String whose bytes are charged to `meter`
    pub fn charged(text: String, meter: &MemoryMeter) -> Result<Self, RuntimeError> {
        let charge = meter.charge(text.len() as u64)?;
        Ok(Self(Arc::new(StringData {
            text: text.into_boxed_str(),
            charge: Some(charge),
        })))
    }

    pub fn as_str(&self) -> &str {
        &self.0.text
    }

    fn track(&mut self, meter: &MemoryMeter) -> Result<(), RuntimeError> {
        let Some(data) = Arc::get_mut(&mut self.0) else {
            return Ok(());
        };
        if data.charge.is_none() {
            data.charge = Some(meter.charge(data.text.len() as u64)?);
        }
        Ok(())
    }
}

impl std::ops::Deref for ValueString {
    type Target = str;

    fn deref(&self) -> &str {
        self.as_str()
    }
}

impl PartialEq for ValueString {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for ValueString {}

impl PartialOrd for ValueString {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ValueString {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.as_str().cmp(other.as_str())
    }
}

impl fmt::Debug for ValueString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl fmt::Display for ValueString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for ValueString {
    fn from(text: &str) -> Self {
        Self(Arc::new(StringData {
            text: Box::from(text),
            charge: None,
        }))
    }
}

impl From<String> for ValueString {
    fn from(text: String) -> Self {
        Self(Arc::new(StringData {
            text: text.into_boxed_str(),
            charge: None,
        }))
    }
}

/// Runtime value
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(ValueString),
    Array(ValueArray),
}

impl Value {
    pub fn string(s: impl AsRef<str>) -> Self {
        Value::String(ValueString::from(s.as_ref()))
    }

    pub fn array(values: Vec<Value>) -> Self {
        Value::Array(ValueArray::from(values))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Array(_) => "array",
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Heap bytes this value's own storage is charged for
    pub fn heap_size(&self) -> u64 {
        match self {
            Value::String(s) => s.len() as u64,
            Value::Array(arr) => slot_bytes(arr.len()),
            _ => 0,
        }
    }

    /// Charge uncharged storage this value owns alone to `meter`
    ///
    /// The VM calls this on every value that enters the script from outside:
    /// host function results, constants and entry arguments.
    pub fn track(&mut self, meter: &MemoryMeter) -> Result<(), RuntimeError> {
        match self {
            Value::String(s) => s.track(meter),
            Value::Array(arr) => arr.track(meter),
            _ => Ok(()),
        }
    }

    /// Convert to a JSON value for host-facing output
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(n) => serde_json::Value::from(*n),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.to_string()),
            Value::Array(arr) => serde_json::Value::Array(arr.iter().map(Value::to_json).collect()),
        }
    }

    /// Convert a JSON value into a script value (objects are rejected)
    pub fn from_json(json: &serde_json::Value) -> Option<Value> {
        Some(match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64()?),
            },
            serde_json::Value::String(s) => Value::string(s),
            serde_json::Value::Array(items) => Value::array(
                items
                    .iter()
                    .map(Value::from_json)
                    .collect::<Option<Vec<_>>>()?,
            ),
            serde_json::Value::Object(_) => return None,
        })
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => write!(f, "{}", s),
            Value::Array(arr) => {
                write!(f, "[")?;
                for (i, item) in arr.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(n) => serializer.serialize_i64(*n),
            Value::Float(x) => serializer.serialize_f64(*x),
            Value::String(s) => serializer.serialize_str(s),
            Value::Array(arr) => {
                let mut seq = serializer.serialize_seq(Some(arr.len()))?;
                for item in arr.iter() {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
        }
    }
}

/// Runtime errors raised by the VM and by host functions
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    #[error("Type error: {msg}")]
    TypeError { msg: String, span: Span },

    #[error("Division by zero")]
    DivideByZero { span: Span },

    #[error("Integer overflow")]
    IntegerOverflow { span: Span },

    /// NaN or infinity produced by float arithmetic
    #[error("Invalid numeric result")]
    InvalidNumericResult { span: Span },

    #[error("Array index {index} out of bounds for length {len}")]
    OutOfBounds { index: i64, len: usize, span: Span },

    #[error("Invalid index: expected int, found {found}")]
    InvalidIndex { found: String, span: Span },

    #[error("Unknown opcode")]
    UnknownOpcode { span: Span },

    #[error("Stack underflow")]
    StackUnderflow { span: Span },

    #[error("Unknown function: {name}")]
    UnknownFunction { name: String, span: Span },

    #[error("Function '{name}' expects {expected} argument(s), got {found}")]
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
        span: Span,
    },

    #[error("{msg}")]
    InvalidNativeArgument { msg: String, span: Span },

    /// Script call stack exceeded its byte budget
    #[error("Stack overflow: call depth {depth} exceeds the stack ceiling of {limit} bytes")]
    StackOverflow { depth: usize, limit: u64, span: Span },

    #[error("Memory limit exceeded: {requested} more bytes requested with {used} of {limit} bytes in use")]
    MemoryLimitExceeded { requested: u64, used: u64, limit: u64 },

    #[error("Execution deadline exceeded")]
    DeadlineExceeded,

    #[error("Execution cancelled")]
    Cancelled,

    /// Host-side failure reported by a native function
    #[error("Host error: {msg}")]
    HostError { msg: String, span: Span },
}

impl RuntimeError {
    pub fn span(&self) -> Span {
        match self {
            RuntimeError::TypeError { span, .. }
            | RuntimeError::DivideByZero { span }
            | RuntimeError::IntegerOverflow { span }
            | RuntimeError::InvalidNumericResult { span }
            | RuntimeError::OutOfBounds { span, .. }
            | RuntimeError::InvalidIndex { span, .. }
            | RuntimeError::UnknownOpcode { span }
            | RuntimeError::StackUnderflow { span }
            | RuntimeError::UnknownFunction { span, .. }
            | RuntimeError::ArityMismatch { span, .. }
            | RuntimeError::InvalidNativeArgument { span, .. }
            | RuntimeError::StackOverflow { span, .. }
            | RuntimeError::HostError { span, .. } => *span,
            RuntimeError::MemoryLimitExceeded { .. }
            | RuntimeError::DeadlineExceeded
            | RuntimeError::Cancelled => Span::dummy(),
        }
    }

    /// Replace a placeholder span with the span of the faulting instruction
    pub fn at(self, at: Span) -> Self {
        if !self.span().is_empty() {
            return self;
        }
        match self {
            RuntimeError::TypeError { msg, .. } => RuntimeError::TypeError { msg, span: at },
            RuntimeError::InvalidNativeArgument { msg, .. } => {
                RuntimeError::InvalidNativeArgument { msg, span: at }
            }
            RuntimeError::OutOfBounds { index, len, .. } => {
                RuntimeError::OutOfBounds { index, len, span: at }
            }
            RuntimeError::InvalidIndex { found, .. } => RuntimeError::InvalidIndex { found, span: at },
            RuntimeError::HostError { msg, .. } => RuntimeError::HostError { msg, span: at },
            RuntimeError::ArityMismatch {
                name,
                expected,
                found,
                ..
            } => RuntimeError::ArityMismatch {
                name,
                expected,
                found,
                span: at,
            },
            RuntimeError::IntegerOverflow { .. } => RuntimeError::IntegerOverflow { span: at },
            RuntimeError::DivideByZero { .. } => RuntimeError::DivideByZero { span: at },
            RuntimeError::InvalidNumericResult { .. } => {
                RuntimeError::InvalidNumericResult { span: at }
            }
            other => other,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            RuntimeError::StackOverflow { .. } => codes::STACK_OVERFLOW,
            RuntimeError::MemoryLimitExceeded { .. } => codes::MEMORY_LIMIT,
            RuntimeError::DeadlineExceeded => codes::DEADLINE_EXCEEDED,
            RuntimeError::Cancelled => codes::CANCELLED,
            RuntimeError::IntegerOverflow { .. } => codes::INTEGER_OVERFLOW,
            _ => codes::RUNTIME_FAULT,
        }
    }

    pub fn to_diagnostic(&self) -> Diagnostic {
        Diagnostic::error_with_code(self.code(), self.to_string(), self.span())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_array_copy_on_write() {
        let original = ValueArray::from(vec![Value::Int(1), Value::Int(2)]);
        let mut copy = original.clone();
        assert!(copy.is_shared());
        let meter = MemoryMeter::unlimited();
        copy.make_mut(&meter).unwrap()[0] = Value::Int(9);
        assert_eq!(original.get(0), Some(&Value::Int(1)));
        assert_eq!(copy.get(0), Some(&Value::Int(9)));
        assert!(!copy.is_shared());
        assert_eq!(meter.used(), 2 * SLOT_BYTES);
    }

    #[test]
    fn test_unshared_array_mutates_in_place_without_charge() {
        let meter = MemoryMeter::unlimited();
        let mut arr = ValueArray::charged(vec![Value::Null; 8], &meter).unwrap();
        let held = meter.used();
        for i in 0..8 {
            arr.make_mut(&meter).unwrap()[i] = Value::Int(i as i64);
        }
        assert_eq!(meter.used(), held);
        drop(arr);
        assert_eq!(meter.used(), 0);
    }

    #[test]
    fn test_track_charges_nested_storage_once() {
        let meter = MemoryMeter::unlimited();
        let mut value = Value::array(vec![Value::string("abcd"), Value::array(vec![Value::Null])]);
        value.track(&meter).unwrap();
        let expected = 2 * SLOT_BYTES + 4 + SLOT_BYTES;
        assert_eq!(meter.used(), expected);
        value.track(&meter).unwrap();
        assert_eq!(meter.used(), expected);
        drop(value);
        assert_eq!(meter.used(), 0);
    }

    #[test]
    fn test_shared_string_released_with_last_reference() {
        let meter = MemoryMeter::unlimited();
        let s = ValueString::charged("hello".to_string(), &meter).unwrap();
        let other = s.clone();
        drop(s);
        assert_eq!(meter.used(), 5);
        drop(other);
        assert_eq!(meter.used(), 0);
    }

    #[test]
    fn test_display_nested_array() {
        let value = Value::array(vec![Value::Int(1), Value::string("a"), Value::array(vec![])]);
        assert_eq!(value.to_string(), "[1, a, []]");
    }

    #[test]
    fn test_json_round_trip_of_args() {
        let json = serde_json::json!([1, 2.5, "x", null, [true]]);
        let value = Value::from_json(&json).unwrap();
        assert_eq!(value.to_json(), json);
        assert_eq!(serde_json::to_value(&value).unwrap(), json);
    }

    #[test]
    fn test_objects_are_not_script_values() {
        assert_eq!(Value::from_json(&serde_json::json!({"a": 1})), None);
    }

    #[test]
    fn test_at_fills_placeholder_span_only() {
        let placeholder = RuntimeError::TypeError {
            msg: "x".into(),
            span: Span::dummy(),
        };
        assert_eq!(placeholder.at(Span::new(3, 5)).span(), Span::new(3, 5));

        let located = RuntimeError::DivideByZero { span: Span::new(1, 2) };
        assert_eq!(located.at(Span::new(3, 5)).span(), Span::new(1, 2));
    }

    #[test]
    fn test_heap_size_counts_slots() {
        let value = Value::array(vec![Value::Null; 4]);
        assert_eq!(value.heap_size(), 4 * std::mem::size_of::<Value>() as u64);
        assert_eq!(Value::string("abc").heap_size(), 3);
    }
}
