//! Shared helpers for Warden Script integration tests

#![allow(dead_code)]

use std::sync::Arc;
use warden_script::{compile_source, Diagnostic, HostApi, NativeContext, RuntimeError, Value, Vm};

use pretty_assertions::assert_eq;

/// Stack ceiling used by the helpers
pub const TEST_STACK_BYTES: u64 = 256 * 1024;

/// Compile and run the script body with the standard host namespaces
pub fn eval(source: &str) -> Result<Value, RuntimeError> {
    eval_entry(source, "", Vec::new())
}

pub fn eval_entry(source: &str, entry: &str, args: Vec<Value>) -> Result<Value, RuntimeError> {
    let host = HostApi::with_stdlib();
    let exe = compile_source(source, &host)
        .unwrap_or_else(|errors| panic!("compile failed: {:?}", errors));
    let mut vm = Vm::new(
        Arc::new(exe),
        &host,
        NativeContext::unbounded("test"),
        TEST_STACK_BYTES,
    )?;
    vm.run_entry(entry, args)
}

/// Assert that source code evaluates to `expected`
pub fn assert_eval(source: &str, expected: Value) {
    match eval(source) {
        Ok(value) => assert_eq!(value, expected, "source: {}", source),
        Err(err) => panic!("Expected {:?}, got error {:?}", expected, err),
    }
}

/// Compile and return the diagnostics, panicking if compilation succeeds
pub fn compile_errors(source: &str) -> Vec<Diagnostic> {
    match compile_source(source, &HostApi::with_stdlib()) {
        Ok(_) => panic!("Expected compile errors for: {}", source),
        Err(diagnostics) => diagnostics,
    }
}

/// Assert that compilation fails with the given diagnostic code first
pub fn assert_compile_error(source: &str, code: &str) {
    let diagnostics = compile_errors(source);
    assert_eq!(
        diagnostics.first().map(|d| d.code.as_str()),
        Some(code),
        "diagnostics: {:?}",
        diagnostics
    );
}
