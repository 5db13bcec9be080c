//! AST to bytecode compiler
//!
//! - Expressions leave their result on the stack
//! - Statements leave the stack as they found it
//! - Function and host calls are resolved statically; an unresolvable call
//!   is a compile error, never a runtime lookup
//! - Top-level `let`/`var` declarations are globals; everything declared in
//!   a block or function body is a frame-relative local slot

mod expr;
mod stmt;

use crate::ast::*;
use crate::bytecode::{self, Bytecode, Executable, FunctionInfo, Opcode, SCRIPT_ENTRY};
use crate::diagnostic::{codes, Diagnostic};
use crate::host::{library_key, HostApi};
use crate::span::Span;
use std::collections::HashMap;

/// Global slot always bound to the caller's arguments
pub const ARGS_GLOBAL: &str = "args";

/// Loop context for break/continue
#[derive(Debug, Clone)]
pub(super) struct LoopContext {
    pub(super) start_offset: usize,
    pub(super) break_jumps: Vec<usize>,
}

/// `extern fn` binding
#[derive(Debug, Clone)]
pub(super) struct ExternBinding {
    pub(super) native: u16,
    pub(super) arity: usize,
}

/// Compiler state
pub struct Compiler<'h> {
    pub(super) host: &'h HostApi,
    pub(super) bytecode: Bytecode,
    pub(super) functions: Vec<FunctionInfo>,
    pub(super) function_index: HashMap<String, usize>,
    pub(super) externs: HashMap<String, ExternBinding>,
    pub(super) natives: Vec<String>,
    pub(super) native_index: HashMap<String, u16>,
    pub(super) globals: Vec<String>,
    pub(super) global_index: HashMap<String, u16>,
    /// Block scopes of the function being compiled, innermost last
    pub(super) scopes: Vec<HashMap<String, u16>>,
    /// Slots allocated so far in the function being compiled
    pub(super) local_count: u16,
    pub(super) loops: Vec<LoopContext>,
    pub(super) diagnostics: Vec<Diagnostic>,
}

impl<'h> Compiler<'h> {
    /// Create a compiler that resolves host calls against `host`
    pub fn new(host: &'h HostApi) -> Self {
        Self {
            host,
            bytecode: Bytecode::new(),
            functions: Vec::new(),
            function_index: HashMap::new(),
            externs: HashMap::new(),
            natives: Vec::new(),
            native_index: HashMap::new(),
            globals: Vec::new(),
            global_index: HashMap::new(),
            scopes: Vec::new(),
            local_count: 0,
            loops: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Compile a program to an executable
    pub fn compile(mut self, program: &Program) -> Result<Executable, Vec<Diagnostic>> {
        self.declare_functions(program);
        self.declare_externs(program);
        self.declare_globals(program);

        // Script body first, at offset 0
        for item in &program.items {
            if let Item::Statement(stmt) = item {
                self.compile_stmt(stmt);
            }
        }
        self.emit_implicit_return();
        self.functions[0].local_count = self.local_count;

        for func in program.functions() {
            self.compile_function(func);
        }

        if !self.diagnostics.is_empty() {
            return Err(self.diagnostics);
        }

        let executable = Executable {
            bytecode: self.bytecode,
            functions: self.functions,
            natives: self.natives,
            globals: self.globals,
        };

        // The compiler must never hand the VM malformed code
        if let Err(errors) = bytecode::validate(&executable) {
            return Err(errors
                .into_iter()
                .map(|e| {
                    Diagnostic::error_with_code(
                        codes::INVALID_BYTECODE,
                        format!("Internal compiler error: {}", e),
                        Span::dummy(),
                    )
                })
                .collect());
        }

        Ok(executable)
    }

    // === Declarations ===

    fn declare_functions(&mut self, program: &Program) {
        self.functions.push(FunctionInfo {
            name: SCRIPT_ENTRY.to_string(),
            arity: 0,
            local_count: 0,
            offset: 0,
        });

        for func in program.functions() {
            let name = &func.name.name;
            if self.function_index.contains_key(name) {
                self.error(
                    codes::DUPLICATE_FUNCTION,
                    format!("Function '{}' is defined more than once", name),
                    func.name.span,
                );
                continue;
            }
            let Ok(arity) = u8::try_from(func.params.len()) else {
                self.error(
                    codes::PROGRAM_TOO_LARGE,
                    format!("Function '{}' has more than 255 parameters", name),
                    func.span,
                );
                continue;
            };
            self.function_index.insert(name.clone(), self.functions.len());
            self.functions.push(FunctionInfo {
                name: name.clone(),
                arity,
                local_count: arity as u16,
                offset: 0,
            });
        }
    }

    fn declare_externs(&mut self, program: &Program) {
        for decl in program.externs() {
            let name = &decl.name.name;
            if self.function_index.contains_key(name) || self.externs.contains_key(name) {
                self.error(
                    codes::DUPLICATE_FUNCTION,
                    format!("Function '{}' is defined more than once", name),
                    decl.name.span,
                );
                continue;
            }
            let key = library_key(&decl.library, name);
            if !self.host.contains(&key) {
                self.error(
                    codes::UNKNOWN_FUNCTION,
                    format!(
                        "Native library '{}' does not provide '{}'",
                        decl.library, name
                    ),
                    decl.span,
                );
                continue;
            }
            if let Some(native) = self.native_slot(&key, decl.span) {
                self.externs.insert(
                    name.clone(),
                    ExternBinding {
                        native,
                        arity: decl.params.len(),
                    },
                );
            }
        }
    }

    fn declare_globals(&mut self, program: &Program) {
        self.global_slot(ARGS_GLOBAL);
        for item in &program.items {
            if let Item::Statement(Stmt::VarDecl(decl)) = item {
                self.global_slot(&decl.name.name);
            }
        }
    }

    fn compile_function(&mut self, func: &FunctionDecl) {
        let Some(&index) = self.function_index.get(&func.name.name) else {
            return;
        };
        // Duplicates were reported during declaration; compile only the first
        if self.functions[index].offset != 0 {
            return;
        }
        self.functions[index].offset = self.bytecode.current_offset();
        self.local_count = 0;
        self.scopes.clear();
        self.scopes.push(HashMap::new());
        for param in &func.params {
            self.declare_local(&param.name);
        }
        self.compile_block_statements(&func.body);
        self.emit_implicit_return();
        self.functions[index].local_count = self.local_count;
        self.scopes.clear();
    }

    // === Scopes and slots ===

    pub(super) fn begin_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    pub(super) fn end_scope(&mut self) {
        self.scopes.pop();
    }

    /// Allocate a new local slot for `ident` in the innermost scope
    pub(super) fn declare_local(&mut self, ident: &Identifier) -> Option<u16> {
        let slot = self.local_count;
        let Some(next) = slot.checked_add(1) else {
            self.error(
                codes::PROGRAM_TOO_LARGE,
                "Too many local variables in one function",
                ident.span,
            );
            return None;
        };
        self.local_count = next;
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(ident.name.clone(), slot);
        }
        Some(slot)
    }

    pub(super) fn resolve_local(&self, name: &str) -> Option<u16> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).copied())
    }

    pub(super) fn resolve_global(&self, name: &str) -> Option<u16> {
        self.global_index.get(name).copied()
    }

    /// True if `name` is bound to a script value (local or global)
    pub(super) fn is_variable(&self, name: &str) -> bool {
        self.resolve_local(name).is_some() || self.resolve_global(name).is_some()
    }

    fn global_slot(&mut self, name: &str) -> Option<u16> {
        if let Some(&slot) = self.global_index.get(name) {
            return Some(slot);
        }
        let slot = u16::try_from(self.globals.len()).ok()?;
        self.globals.push(name.to_string());
        self.global_index.insert(name.to_string(), slot);
        Some(slot)
    }

    pub(super) fn native_slot(&mut self, name: &str, span: Span) -> Option<u16> {
        if let Some(&slot) = self.native_index.get(name) {
            return Some(slot);
        }
        let Ok(slot) = u16::try_from(self.natives.len()) else {
            self.error(codes::PROGRAM_TOO_LARGE, "Too many distinct host functions", span);
            return None;
        };
        self.natives.push(name.to_string());
        self.native_index.insert(name.to_string(), slot);
        Some(slot)
    }

    // === Emission helpers ===

    fn emit_implicit_return(&mut self) {
        self.bytecode.emit(Opcode::Null, Span::dummy());
        self.bytecode.emit(Opcode::Return, Span::dummy());
    }

    /// Emit a forward jump with a placeholder operand, returning the operand offset
    pub(super) fn emit_jump(&mut self, opcode: Opcode, span: Span) -> usize {
        self.bytecode.emit(opcode, span);
        let operand = self.bytecode.current_offset();
        self.bytecode.emit_i16(0);
        operand
    }

    pub(super) fn patch_jump(&mut self, operand: usize, span: Span) {
        if !self.bytecode.patch_jump(operand) {
            self.error(codes::PROGRAM_TOO_LARGE, "Jump distance too large", span);
        }
    }

    /// Emit a backward jump to `target`
    pub(super) fn emit_loop(&mut self, target: usize, span: Span) {
        self.bytecode.emit(Opcode::Loop, span);
        let distance = self.bytecode.current_offset() + 2 - target;
        match u16::try_from(distance) {
            Ok(distance) => self.bytecode.emit_u16(distance),
            Err(_) => {
                self.bytecode.emit_u16(0);
                self.error(codes::PROGRAM_TOO_LARGE, "Loop body too large", span);
            }
        }
    }

    pub(super) fn emit_constant(&mut self, constant: bytecode::Constant, span: Span) {
        match self.bytecode.add_constant(constant) {
            Some(index) => {
                self.bytecode.emit(Opcode::Constant, span);
                self.bytecode.emit_u16(index);
            }
            None => self.error(codes::PROGRAM_TOO_LARGE, "Too many constants", span),
        }
    }

    pub(super) fn error(&mut self, code: &str, message: impl Into<String>, span: Span) {
        self.diagnostics
            .push(Diagnostic::error_with_code(code, message, span));
    }
}

/// Lex, parse and compile `source` against `host`
pub fn compile_source(source: &str, host: &HostApi) -> Result<Executable, Vec<Diagnostic>> {
    let (program, diagnostics) = crate::parse_source(source);
    if !diagnostics.is_empty() {
        return Err(diagnostics);
    }
    Compiler::new(host).compile(&program)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn compile(source: &str) -> Result<Executable, Vec<Diagnostic>> {
        compile_source(source, &HostApi::with_stdlib())
    }

    fn error_codes(source: &str) -> Vec<String> {
        compile(source)
            .err()
            .unwrap_or_default()
            .into_iter()
            .map(|d| d.code)
            .collect()
    }

    #[test]
    fn test_script_body_is_function_zero() {
        let exe = compile("fn f() { return 1; } return f();").unwrap();
        assert_eq!(exe.functions[0].name, SCRIPT_ENTRY);
        assert_eq!(exe.functions[0].offset, 0);
        assert_eq!(exe.functions[1].name, "f");
        assert!(exe.functions[1].offset > 0);
    }

    #[test]
    fn test_top_level_lets_are_globals() {
        let exe = compile("let a = 1; var b = 2; { let c = 3; }").unwrap();
        assert_eq!(exe.globals, vec!["args", "a", "b"]);
        assert_eq!(exe.functions[0].local_count, 1);
    }

    #[test]
    fn test_params_and_locals_share_the_frame() {
        let exe = compile("fn f(a, b) { let c = a; { let d = b; } return c; }").unwrap();
        let f = &exe.functions[exe.function_index("f").unwrap()];
        assert_eq!(f.arity, 2);
        assert_eq!(f.local_count, 4);
    }

    #[test]
    fn test_host_calls_are_linked_by_name() {
        let exe = compile("let a = math.abs(-1); let b = math.abs(2); return string.len(\"x\");")
            .unwrap();
        assert_eq!(exe.natives, vec!["math.abs", "string.len"]);
    }

    #[test]
    fn test_undefined_variable() {
        assert_eq!(error_codes("return missing;"), vec![codes::UNDEFINED_VARIABLE]);
    }

    #[test]
    fn test_unknown_host_function() {
        assert_eq!(error_codes("net.http.get(\"x\");"), vec![codes::UNKNOWN_FUNCTION]);
    }

    #[test]
    fn test_arity_is_checked_for_script_functions() {
        assert_eq!(
            error_codes("fn f(a) { return a; } return f(1, 2);"),
            vec![codes::ARITY_MISMATCH]
        );
    }

    #[test]
    fn test_duplicate_function() {
        assert_eq!(
            error_codes("fn f() {} fn f() {}"),
            vec![codes::DUPLICATE_FUNCTION]
        );
    }

    #[test]
    fn test_break_outside_loop() {
        assert_eq!(error_codes("break;"), vec![codes::LOOP_CONTROL_OUTSIDE_LOOP]);
    }

    #[test]
    fn test_member_access_on_variable() {
        assert_eq!(
            error_codes("let xs = [1]; return xs.len();"),
            vec![codes::MEMBER_ACCESS_ON_VALUE]
        );
    }

    #[test]
    fn test_function_locals_not_visible_to_other_functions() {
        assert_eq!(
            error_codes("fn a() { let hidden = 1; } fn b() { return hidden; }"),
            vec![codes::UNDEFINED_VARIABLE]
        );
    }

    #[test]
    fn test_functions_see_globals() {
        assert!(compile("let limit = 3; fn f() { return limit; } return f();").is_ok());
    }

    #[test]
    fn test_extern_requires_host_library() {
        assert_eq!(
            error_codes("extern fn hash(s) from \"crypto\"; return hash(\"a\");"),
            vec![codes::UNKNOWN_FUNCTION, codes::UNKNOWN_FUNCTION]
        );

        let mut host = HostApi::new();
        host.register_library_fn("crypto", "hash", |_, _| Ok(crate::Value::Int(7)));
        let exe = compile_source("extern fn hash(s) from \"crypto\"; return hash(\"a\");", &host)
            .unwrap();
        assert_eq!(exe.natives, vec!["crypto::hash"]);
    }

    #[test]
    fn test_compiled_output_passes_validation() {
        let exe = compile(
            "fn fact(n) { if n <= 1 { return 1; } return n * fact(n - 1); }
             var i = 0;
             while i < 10 { if i == 5 { break; } i += 1; }
             return fact(i) && true || false;",
        )
        .unwrap();
        assert_eq!(bytecode::validate(&exe), Ok(()));
    }
}
