//! Warden Script - the scripting language hosted by the Warden sandbox
//!
//! This library provides:
//! - Lexical analysis and parsing to an AST
//! - Compilation to a flat, validated bytecode format
//! - A stack VM with a stack byte budget, a memory meter and cooperative
//!   deadline/cancel checks
//! - The host API through which scripts reach namespaced native functions

/// Warden Script version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod ast;
pub mod bytecode;
pub mod compiler;
pub mod diagnostic;
pub mod host;
pub mod lexer;
pub mod parser;
pub mod span;
pub mod token;
pub mod value;
pub mod vm;

pub use ast::Program;
pub use bytecode::{Bytecode, Executable, Opcode, BYTECODE_VERSION, SCRIPT_ENTRY};
pub use compiler::{compile_source, Compiler};
pub use diagnostic::{has_errors, sort_diagnostics, Diagnostic, DiagnosticLevel, DIAG_VERSION};
pub use host::{CancelToken, HeapCharge, HostApi, MemoryMeter, NativeContext, NativeFn};
pub use lexer::Lexer;
pub use parser::Parser;
pub use span::Span;
pub use token::{Token, TokenKind};
pub use value::{RuntimeError, Value, ValueArray, ValueString};
pub use vm::Vm;

/// Lex and parse `source`
///
/// Diagnostics from both phases are returned together; the program is only
/// meaningful when the list is empty.
pub fn parse_source(source: &str) -> (Program, Vec<Diagnostic>) {
    let (tokens, mut diagnostics) = Lexer::new(source).tokenize();
    let (program, parse_diagnostics) = Parser::new(tokens).parse();
    diagnostics.extend(parse_diagnostics);
    (program, diagnostics)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smoke() {
        assert_eq!(VERSION, "0.1.0");
    }

    #[test]
    fn test_parse_source_collects_lexer_and_parser_errors() {
        let (_, diagnostics) = parse_source("let x = 1 & 2;\nlet = ;");
        assert!(diagnostics.len() >= 2);
        assert!(has_errors(&diagnostics));
    }
}
