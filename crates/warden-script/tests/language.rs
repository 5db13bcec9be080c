//! End-to-end language behaviour: source in, value out

mod common;

use common::*;
use pretty_assertions::assert_eq;
use rstest::rstest;
use warden_script::diagnostic::codes;
use warden_script::{RuntimeError, Value};

// ============================================================================
// Evaluation
// ============================================================================

#[rstest]
#[case::arithmetic("return 2 + 2;", Value::Int(4))]
#[case::grouping("return (1 + 2) * 3;", Value::Int(9))]
#[case::unary("return -(3 - 5);", Value::Int(2))]
#[case::float_division("return 1.0 / 4;", Value::Float(0.25))]
#[case::not("return !(1 < 2);", Value::Bool(false))]
#[case::string_concat("let s = \"war\"; return s + \"den\";", Value::string("warden"))]
#[case::string_escape("return \"a\\tb\";", Value::string("a\tb"))]
#[case::array_index("let xs = [10, 20, 30]; return xs[2];", Value::Int(30))]
#[case::nested_array("let m = [[1, 2], [3, 4]]; return m[1][0];", Value::Int(3))]
#[case::null_equality("return null == null;", Value::Bool(true))]
#[case::array_equality("return [1, \"a\"] == [1, \"a\"];", Value::Bool(true))]
#[case::else_if("let n = 5; if n < 3 { return 1; } else if n < 10 { return 2; } else { return 3; }", Value::Int(2))]
fn test_evaluates(#[case] source: &str, #[case] expected: Value) {
    assert_eval(source, expected);
}

#[test]
fn test_factorial_of_ten() {
    assert_eval(
        r#"
        fn factorial(n: int) -> int {
            if n <= 1 { return 1; }
            return n * factorial(n - 1);
        }
        return factorial(10);
        "#,
        Value::Int(3628800),
    );
}

#[test]
fn test_mutual_recursion() {
    assert_eval(
        r#"
        fn is_even(n) { if n == 0 { return true; } return is_odd(n - 1); }
        fn is_odd(n) { if n == 0 { return false; } return is_even(n - 1); }
        return is_even(10);
        "#,
        Value::Bool(true),
    );
}

#[test]
fn test_block_scoping_shadows() {
    assert_eval(
        r#"
        let x = 1;
        var seen = 0;
        {
            let x = 2;
            seen = x;
        }
        return seen * 10 + x;
        "#,
        Value::Int(21),
    );
}

#[test]
fn test_host_namespaces_are_callable() {
    assert_eval(
        r#"
        let xs = array.push(array.new(2, 0), 5);
        return string.upper(string.from(array.len(xs) + math.max(1, 2)));
        "#,
        Value::string("5"),
    );
}

#[test]
fn test_named_entry_point() {
    let result = eval_entry(
        "fn greet(name) { return \"hi \" + name; }",
        "greet",
        vec![Value::string("ada")],
    );
    assert_eq!(result, Ok(Value::string("hi ada")));
}

#[test]
fn test_runtime_fault_carries_location() {
    let err = eval("let xs = [];\nreturn xs[0];").unwrap_err();
    assert!(matches!(err, RuntimeError::OutOfBounds { index: 0, len: 0, .. }));
    let diagnostic = err
        .to_diagnostic()
        .located_in("let xs = [];\nreturn xs[0];");
    assert_eq!(diagnostic.code, codes::RUNTIME_FAULT);
    assert_eq!(diagnostic.line, 2);
}

// ============================================================================
// Compile errors
// ============================================================================

#[rstest]
#[case::syntax("let = 1;", codes::SYNTAX_ERROR)]
#[case::lexer("let s = \"open;", codes::UNTERMINATED_STRING)]
#[case::undefined("return y;", codes::UNDEFINED_VARIABLE)]
#[case::unknown_namespace("return net.http.get(\"http://x\");", codes::UNKNOWN_FUNCTION)]
#[case::arity("fn f(a, b) { return a; } return f(1);", codes::ARITY_MISMATCH)]
#[case::nested_fn("fn f() { fn g() {} }", codes::MISPLACED_ITEM)]
fn test_compile_errors(#[case] source: &str, #[case] code: &str) {
    assert_compile_error(source, code);
}

#[test]
fn test_deep_nesting_is_rejected_not_crashed() {
    let source = format!("return {}1{};", "(".repeat(5000), ")".repeat(5000));
    assert_compile_error(&source, codes::NESTING_TOO_DEEP);
}
