//! Property tests: determinism and fault containment of the VM

mod common;

use common::*;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use warden_script::{RuntimeError, Value};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Integer arithmetic either matches checked Rust arithmetic or faults
    #[test]
    fn int_arithmetic_matches_checked_ops(a in any::<i32>(), b in any::<i32>()) {
        let (a, b) = (a as i64, b as i64);
        let source = format!("let a = {}; let b = {}; return [a + b, a * b, a - b];", a, b);
        let expected = Value::array(vec![
            Value::Int(a + b),
            Value::Int(a * b),
            Value::Int(a - b),
        ]);
        prop_assert_eq!(eval(&source).unwrap(), expected);
    }

    #[test]
    fn large_multiplication_never_wraps(a in (1i64 << 32)..i64::MAX, b in 2i64..1000) {
        let source = format!("return {} * {};", a, b);
        match a.checked_mul(b) {
            Some(product) => prop_assert_eq!(eval(&source).unwrap(), Value::Int(product)),
            None => {
                let overflowed = matches!(eval(&source), Err(RuntimeError::IntegerOverflow { .. }));
                prop_assert!(overflowed);
            }
        }
    }

    /// The same program and arguments always produce the same result
    #[test]
    fn execution_is_deterministic(n in 0i64..40, seed in any::<i16>()) {
        let source = format!(
            "var acc = {}; var i = 0; while i < {} {{ acc = (acc * 31 + i) % 1000003; i += 1; }} return acc;",
            seed, n
        );
        let first = eval(&source);
        let second = eval(&source);
        prop_assert_eq!(first, second);
    }

    /// Any input either compiles or yields diagnostics; the front end never panics
    #[test]
    fn front_end_never_panics(source in "[ -~\\n]{0,120}") {
        let _ = warden_script::compile_source(&source, &warden_script::HostApi::with_stdlib());
    }
}
