//! Built-in host namespaces
//!
//! Every function here is pure or allocation-metered; none performs I/O.

use crate::host::{HostApi, NativeContext};
use crate::span::Span;
use crate::value::{RuntimeError, Value};

const VALUE_SIZE: u64 = std::mem::size_of::<Value>() as u64;

pub fn register(host: &mut HostApi) {
    // math
    host.register("math.abs", math_abs);
    host.register("math.min", |_, args| math_pick(args, "math.min", true));
    host.register("math.max", |_, args| math_pick(args, "math.max", false));
    host.register("math.pow", math_pow);
    host.register("math.sqrt", math_sqrt);
    host.register("math.floor", math_floor);

    // string
    host.register("string.len", string_len);
    host.register("string.upper", |ctx, args| {
        let s = expect_str(args, 0, "string.upper")?;
        ctx.reserve(s.len() as u64)?;
        Ok(Value::string(s.to_uppercase()))
    });
    host.register("string.lower", |ctx, args| {
        let s = expect_str(args, 0, "string.lower")?;
        ctx.reserve(s.len() as u64)?;
        Ok(Value::string(s.to_lowercase()))
    });
    host.register("string.from", string_from);
    host.register("string.concat", string_concat);

    // array
    host.register("array.new", array_new);
    host.register("array.len", array_len);
    host.register("array.push", array_push);

    // log
    host.register("log.info", |ctx, args| {
        expect_arity(args, 1, "log.info")?;
        tracing::info!(target: "warden::script", script_id = ctx.script_id(), "{}", args[0]);
        Ok(Value::Null)
    });
    host.register("log.warn", |ctx, args| {
        expect_arity(args, 1, "log.warn")?;
        tracing::warn!(target: "warden::script", script_id = ctx.script_id(), "{}", args[0]);
        Ok(Value::Null)
    });

    // time
    host.register("time.elapsed_ms", |ctx, args| {
        expect_arity(args, 0, "time.elapsed_ms")?;
        Ok(Value::Int(
            i64::try_from(ctx.elapsed().as_millis()).unwrap_or(i64::MAX),
        ))
    });
}

// ===== Argument helpers =====

fn invalid(msg: String) -> RuntimeError {
    RuntimeError::InvalidNativeArgument {
        msg,
        span: Span::dummy(),
    }
}

fn expect_arity(args: &[Value], expected: usize, name: &str) -> Result<(), RuntimeError> {
    if args.len() != expected {
        return Err(RuntimeError::ArityMismatch {
            name: name.to_string(),
            expected,
            found: args.len(),
            span: Span::dummy(),
        });
    }
    Ok(())
}

fn expect_str<'a>(args: &'a [Value], index: usize, name: &str) -> Result<&'a str, RuntimeError> {
    match args.get(index) {
        Some(Value::String(s)) => Ok(s.as_str()),
        Some(other) => Err(invalid(format!(
            "{}: argument {} must be a string, found {}",
            name,
            index + 1,
            other.type_name()
        ))),
        None => Err(invalid(format!("{}: missing argument {}", name, index + 1))),
    }
}

fn expect_int(args: &[Value], index: usize, name: &str) -> Result<i64, RuntimeError> {
    match args.get(index) {
        Some(Value::Int(n)) => Ok(*n),
        Some(other) => Err(invalid(format!(
            "{}: argument {} must be an int, found {}",
            name,
            index + 1,
            other.type_name()
        ))),
        None => Err(invalid(format!("{}: missing argument {}", name, index + 1))),
    }
}

fn as_float(value: &Value, name: &str) -> Result<f64, RuntimeError> {
    match value {
        Value::Int(n) => Ok(*n as f64),
        Value::Float(x) => Ok(*x),
        other => Err(invalid(format!(
            "{}: expected a number, found {}",
            name,
            other.type_name()
        ))),
    }
}

fn finite(x: f64) -> Result<Value, RuntimeError> {
    if x.is_finite() {
        Ok(Value::Float(x))
    } else {
        Err(RuntimeError::InvalidNumericResult { span: Span::dummy() })
    }
}

// ===== math =====

fn math_abs(_: &NativeContext, args: &[Value]) -> Result<Value, RuntimeError> {
    expect_arity(args, 1, "math.abs")?;
    match &args[0] {
        Value::Int(n) => n
            .checked_abs()
            .map(Value::Int)
            .ok_or(RuntimeError::IntegerOverflow { span: Span::dummy() }),
        other => finite(as_float(other, "math.abs")?.abs()),
    }
}

fn math_pick(args: &[Value], name: &str, smaller: bool) -> Result<Value, RuntimeError> {
    expect_arity(args, 2, name)?;
    match (&args[0], &args[1]) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(if smaller { *a.min(b) } else { *a.max(b) })),
        (a, b) => {
            let (a, b) = (as_float(a, name)?, as_float(b, name)?);
            finite(if smaller { a.min(b) } else { a.max(b) })
        }
    }
}

fn math_pow(_: &NativeContext, args: &[Value]) -> Result<Value, RuntimeError> {
    expect_arity(args, 2, "math.pow")?;
    match (&args[0], &args[1]) {
        (Value::Int(base), Value::Int(exp)) => {
            let exp = u32::try_from(*exp)
                .map_err(|_| invalid("math.pow: integer exponent must be non-negative".into()))?;
            base.checked_pow(exp)
                .map(Value::Int)
                .ok_or(RuntimeError::IntegerOverflow { span: Span::dummy() })
        }
        (a, b) => finite(as_float(a, "math.pow")?.powf(as_float(b, "math.pow")?)),
    }
}

fn math_sqrt(_: &NativeContext, args: &[Value]) -> Result<Value, RuntimeError> {
    expect_arity(args, 1, "math.sqrt")?;
    finite(as_float(&args[0], "math.sqrt")?.sqrt())
}

fn math_floor(_: &NativeContext, args: &[Value]) -> Result<Value, RuntimeError> {
    expect_arity(args, 1, "math.floor")?;
    match &args[0] {
        Value::Int(n) => Ok(Value::Int(*n)),
        other => {
            let x = as_float(other, "math.floor")?.floor();
            if x.is_finite() && x >= i64::MIN as f64 && x < i64::MAX as f64 {
                Ok(Value::Int(x as i64))
            } else {
                Err(RuntimeError::IntegerOverflow { span: Span::dummy() })
            }
        }
    }
}

// ===== string =====

fn string_len(_: &NativeContext, args: &[Value]) -> Result<Value, RuntimeError> {
    expect_arity(args, 1, "string.len")?;
    let s = expect_str(args, 0, "string.len")?;
    Ok(Value::Int(s.chars().count() as i64))
}

fn string_from(ctx: &NativeContext, args: &[Value]) -> Result<Value, RuntimeError> {
    expect_arity(args, 1, "string.from")?;
    if let Value::String(_) = &args[0] {
        return Ok(args[0].clone());
    }
    let text = args[0].to_string();
    ctx.reserve(text.len() as u64)?;
    Ok(Value::string(text))
}

fn string_concat(ctx: &NativeContext, args: &[Value]) -> Result<Value, RuntimeError> {
    expect_arity(args, 2, "string.concat")?;
    let a = expect_str(args, 0, "string.concat")?;
    let b = expect_str(args, 1, "string.concat")?;
    ctx.reserve((a.len() + b.len()) as u64)?;
    let mut out = String::with_capacity(a.len() + b.len());
    out.push_str(a);
    out.push_str(b);
    Ok(Value::string(out))
}

// ===== array =====

fn array_new(ctx: &NativeContext, args: &[Value]) -> Result<Value, RuntimeError> {
    expect_arity(args, 2, "array.new")?;
    let len = expect_int(args, 0, "array.new")?;
    let len = usize::try_from(len)
        .map_err(|_| invalid("array.new: length must be non-negative".into()))?;
    let bytes = (len as u64).saturating_mul(VALUE_SIZE);
    ctx.reserve(bytes)?;
    Ok(Value::array(vec![args[1].clone(); len]))
}

fn array_len(_: &NativeContext, args: &[Value]) -> Result<Value, RuntimeError> {
    expect_arity(args, 1, "array.len")?;
    match &args[0] {
        Value::Array(arr) => Ok(Value::Int(arr.len() as i64)),
        other => Err(invalid(format!(
            "array.len: expected an array, found {}",
            other.type_name()
        ))),
    }
}

/// Returns a new array; the argument is left untouched
fn array_push(ctx: &NativeContext, args: &[Value]) -> Result<Value, RuntimeError> {
    expect_arity(args, 2, "array.push")?;
    match &args[0] {
        Value::Array(arr) => {
            ctx.reserve((arr.len() as u64 + 1).saturating_mul(VALUE_SIZE))?;
            let mut items = arr.as_slice().to_vec();
            items.push(args[1].clone());
            Ok(Value::array(items))
        }
        other => Err(invalid(format!(
            "array.push: expected an array, found {}",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryMeter;
    use crate::host::CancelToken;
    use rstest::rstest;

    fn call(name: &str, args: &[Value]) -> Result<Value, RuntimeError> {
        let host = HostApi::with_stdlib();
        let ctx = NativeContext::unbounded("test");
        (host.get(name).unwrap())(&ctx, args)
    }

    #[rstest]
    #[case::abs_int("math.abs", vec![Value::Int(-4)], Value::Int(4))]
    #[case::min_mixed("math.min", vec![Value::Int(2), Value::Float(1.5)], Value::Float(1.5))]
    #[case::max_int("math.max", vec![Value::Int(2), Value::Int(9)], Value::Int(9))]
    #[case::pow_int("math.pow", vec![Value::Int(2), Value::Int(10)], Value::Int(1024))]
    #[case::floor("math.floor", vec![Value::Float(2.7)], Value::Int(2))]
    #[case::len_chars("string.len", vec![Value::string("héllo")], Value::Int(5))]
    #[case::upper("string.upper", vec![Value::string("ab")], Value::string("AB"))]
    #[case::from_int("string.from", vec![Value::Int(42)], Value::string("42"))]
    #[case::concat("string.concat", vec![Value::string("a"), Value::string("b")], Value::string("ab"))]
    #[case::array_len("array.len", vec![Value::array(vec![Value::Null; 3])], Value::Int(3))]
    fn test_stdlib_values(#[case] name: &str, #[case] args: Vec<Value>, #[case] expected: Value) {
        assert_eq!(call(name, &args).unwrap(), expected);
    }

    #[test]
    fn test_abs_min_int_overflows() {
        assert!(matches!(
            call("math.abs", &[Value::Int(i64::MIN)]),
            Err(RuntimeError::IntegerOverflow { .. })
        ));
    }

    #[test]
    fn test_pow_overflow_is_a_fault() {
        assert!(matches!(
            call("math.pow", &[Value::Int(10), Value::Int(40)]),
            Err(RuntimeError::IntegerOverflow { .. })
        ));
    }

    #[test]
    fn test_sqrt_of_negative_is_invalid() {
        assert!(matches!(
            call("math.sqrt", &[Value::Int(-1)]),
            Err(RuntimeError::InvalidNumericResult { .. })
        ));
    }

    #[test]
    fn test_array_new_reserves_before_allocating() {
        let host = HostApi::with_stdlib();
        let ctx = NativeContext::new("t", None, CancelToken::new(), MemoryMeter::new(1024));
        let result = (host.get("array.new").unwrap())(&ctx, &[Value::Int(1 << 40), Value::Int(0)]);
        assert!(matches!(result, Err(RuntimeError::MemoryLimitExceeded { .. })));
    }

    #[test]
    fn test_array_push_leaves_original() {
        let original = Value::array(vec![Value::Int(1)]);
        let pushed = call("array.push", &[original.clone(), Value::Int(2)]).unwrap();
        assert_eq!(pushed, Value::array(vec![Value::Int(1), Value::Int(2)]));
        assert_eq!(original, Value::array(vec![Value::Int(1)]));
    }

    #[test]
    fn test_wrong_arity_is_reported() {
        assert!(matches!(
            call("math.abs", &[]),
            Err(RuntimeError::ArityMismatch { expected: 1, found: 0, .. })
        ));
    }
}
