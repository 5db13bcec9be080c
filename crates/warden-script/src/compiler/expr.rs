//! Expression compilation

use super::Compiler;
use crate::ast::*;
use crate::bytecode::{Constant, Opcode};
use crate::diagnostic::codes;
use crate::span::Span;

/// What a call expression resolved to
enum CallTarget {
    Script { index: u16, arity: usize },
    Native { index: u16, arity: Option<usize> },
}

impl<'h> Compiler<'h> {
    pub(super) fn compile_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Literal(lit, span) => self.compile_literal(lit, *span),
            Expr::Identifier(ident) => self.emit_get_variable(ident),
            Expr::Array(arr) => self.compile_array(arr),
            Expr::Unary(unary) => {
                self.compile_expr(&unary.expr);
                let opcode = match unary.op {
                    UnaryOp::Negate => Opcode::Negate,
                    UnaryOp::Not => Opcode::Not,
                };
                self.bytecode.emit(opcode, unary.span);
            }
            Expr::Binary(binary) => self.compile_binary(binary),
            Expr::Call(call) => self.compile_call(call),
            Expr::Index(index) => {
                self.compile_expr(&index.target);
                self.compile_expr(&index.index);
                self.bytecode.emit(Opcode::GetIndex, index.span);
            }
            Expr::Member(member) => {
                let message = match member.target.dotted_path() {
                    Some(path) => format!(
                        "'{}.{}' is not a value; host namespaces can only be called",
                        join_path(&path),
                        member.member.name
                    ),
                    None => "Values have no members".to_string(),
                };
                self.error(codes::MEMBER_ACCESS_ON_VALUE, message, member.span);
                self.bytecode.emit(Opcode::Null, member.span);
            }
            Expr::Group(group) => self.compile_expr(&group.expr),
        }
    }

    fn compile_literal(&mut self, lit: &Literal, span: Span) {
        match lit {
            Literal::Int(n) => self.emit_constant(Constant::Int(*n), span),
            Literal::Float(x) => self.emit_constant(Constant::Float(*x), span),
            Literal::String(s) => self.emit_constant(Constant::String(s.clone()), span),
            Literal::Bool(true) => self.bytecode.emit(Opcode::True, span),
            Literal::Bool(false) => self.bytecode.emit(Opcode::False, span),
            Literal::Null => self.bytecode.emit(Opcode::Null, span),
        }
    }

    fn compile_array(&mut self, arr: &ArrayLiteral) {
        for element in &arr.elements {
            self.compile_expr(element);
        }
        match u16::try_from(arr.elements.len()) {
            Ok(count) => {
                self.bytecode.emit(Opcode::Array, arr.span);
                self.bytecode.emit_u16(count);
            }
            Err(_) => self.error(codes::PROGRAM_TOO_LARGE, "Array literal too long", arr.span),
        }
    }

    fn compile_binary(&mut self, binary: &BinaryExpr) {
        match binary.op {
            BinaryOp::And => {
                // a && b  =>  a; JumpIfFalse F; b; Jump E; F: False; E:
                self.compile_expr(&binary.left);
                let short = self.emit_jump(Opcode::JumpIfFalse, binary.span);
                self.compile_expr(&binary.right);
                let end = self.emit_jump(Opcode::Jump, binary.span);
                self.patch_jump(short, binary.span);
                self.bytecode.emit(Opcode::False, binary.span);
                self.patch_jump(end, binary.span);
            }
            BinaryOp::Or => {
                // a || b  =>  a; JumpIfFalse R; True; Jump E; R: b; E:
                self.compile_expr(&binary.left);
                let right = self.emit_jump(Opcode::JumpIfFalse, binary.span);
                self.bytecode.emit(Opcode::True, binary.span);
                let end = self.emit_jump(Opcode::Jump, binary.span);
                self.patch_jump(right, binary.span);
                self.compile_expr(&binary.right);
                self.patch_jump(end, binary.span);
            }
            op => {
                self.compile_expr(&binary.left);
                self.compile_expr(&binary.right);
                self.emit_binary_op(op, binary.span);
            }
        }
    }

    /// Emit the opcode for a non-short-circuit binary operator
    pub(super) fn emit_binary_op(&mut self, op: BinaryOp, span: Span) {
        let opcode = match op {
            BinaryOp::Add => Opcode::Add,
            BinaryOp::Sub => Opcode::Sub,
            BinaryOp::Mul => Opcode::Mul,
            BinaryOp::Div => Opcode::Div,
            BinaryOp::Mod => Opcode::Mod,
            BinaryOp::Eq => Opcode::Equal,
            BinaryOp::Ne => Opcode::NotEqual,
            BinaryOp::Lt => Opcode::Less,
            BinaryOp::Le => Opcode::LessEqual,
            BinaryOp::Gt => Opcode::Greater,
            BinaryOp::Ge => Opcode::GreaterEqual,
            BinaryOp::And | BinaryOp::Or => {
                self.error(
                    codes::INVALID_ASSIGNMENT,
                    "Logical operators cannot be used in compound assignment",
                    span,
                );
                return;
            }
        };
        self.bytecode.emit(opcode, span);
    }

    fn compile_call(&mut self, call: &CallExpr) {
        let Some(target) = self.resolve_call(call) else {
            // Still compile the arguments so their own errors surface
            for arg in &call.args {
                self.compile_expr(arg);
            }
            return;
        };

        let Ok(argc) = u8::try_from(call.args.len()) else {
            self.error(
                codes::PROGRAM_TOO_LARGE,
                "Too many arguments in one call",
                call.span,
            );
            return;
        };

        for arg in &call.args {
            self.compile_expr(arg);
        }

        match target {
            CallTarget::Script { index, arity } => {
                if arity != call.args.len() {
                    self.error(
                        codes::ARITY_MISMATCH,
                        format!(
                            "Function expects {} argument(s), found {}",
                            arity,
                            call.args.len()
                        ),
                        call.span,
                    );
                    return;
                }
                self.bytecode.emit(Opcode::Call, call.span);
                self.bytecode.emit_u16(index);
                self.bytecode.emit_u8(argc);
            }
            CallTarget::Native { index, arity } => {
                if let Some(arity) = arity.filter(|&a| a != call.args.len()) {
                    self.error(
                        codes::ARITY_MISMATCH,
                        format!(
                            "Extern function expects {} argument(s), found {}",
                            arity,
                            call.args.len()
                        ),
                        call.span,
                    );
                    return;
                }
                self.bytecode.emit(Opcode::CallNative, call.span);
                self.bytecode.emit_u16(index);
                self.bytecode.emit_u8(argc);
            }
        }
    }

    /// Resolve a callee to a script function or a linked host function
    fn resolve_call(&mut self, call: &CallExpr) -> Option<CallTarget> {
        let Some(path) = call.callee.dotted_path() else {
            self.error(
                codes::UNKNOWN_FUNCTION,
                "Only named functions can be called",
                call.callee.span(),
            );
            return None;
        };
        let root = path[0];

        if path.len() == 1 {
            if self.is_variable(&root.name) {
                self.error(
                    codes::UNKNOWN_FUNCTION,
                    format!("'{}' is a variable, not a function", root.name),
                    root.span,
                );
                return None;
            }
            if let Some(&index) = self.function_index.get(&root.name) {
                let arity = self.functions[index].arity as usize;
                return match u16::try_from(index) {
                    Ok(index) => Some(CallTarget::Script { index, arity }),
                    Err(_) => {
                        self.error(codes::PROGRAM_TOO_LARGE, "Too many functions", call.span);
                        None
                    }
                };
            }
            if let Some(binding) = self.externs.get(&root.name) {
                return Some(CallTarget::Native {
                    index: binding.native,
                    arity: Some(binding.arity),
                });
            }
        } else if self.is_variable(&root.name) || self.function_index.contains_key(&root.name) {
            self.error(
                codes::MEMBER_ACCESS_ON_VALUE,
                format!("'{}' has no members", root.name),
                call.callee.span(),
            );
            return None;
        }

        let name = join_path(&path);
        if !self.host.contains(&name) {
            self.error(
                codes::UNKNOWN_FUNCTION,
                format!("Unknown function '{}'", name),
                call.callee.span(),
            );
            return None;
        }
        let index = self.native_slot(&name, call.span)?;
        Some(CallTarget::Native { index, arity: None })
    }
}

#[cfg(test)]
mod tests {
    use crate::bytecode::Opcode;
    use crate::compiler::compile_source;
    use crate::diagnostic::codes;
    use crate::host::HostApi;
    use rstest::rstest;

    #[rstest]
    #[case::call_a_variable("let f = 1; f();", codes::UNKNOWN_FUNCTION)]
    #[case::call_an_index("let xs = [1]; xs[0]();", codes::UNKNOWN_FUNCTION)]
    #[case::member_read("let x = math.pi;", codes::MEMBER_ACCESS_ON_VALUE)]
    #[case::function_member("fn f() {} f.x();", codes::MEMBER_ACCESS_ON_VALUE)]
    #[case::function_as_value("fn f() {} let g = f;", codes::UNDEFINED_VARIABLE)]
    fn test_rejected_expressions(#[case] source: &str, #[case] code: &str) {
        let errors = compile_source(source, &HostApi::with_stdlib()).unwrap_err();
        assert_eq!(errors[0].code, code, "{:?}", errors);
    }

    #[test]
    fn test_and_short_circuits_to_false() {
        let exe = compile_source("return false && true;", &HostApi::new()).unwrap();
        let code = &exe.bytecode.instructions;
        assert_eq!(code[0], Opcode::False as u8);
        assert_eq!(code[1], Opcode::JumpIfFalse as u8);
        // JumpIfFalse skips `True; Jump +1` and lands on the pushed False
        assert_eq!(&code[2..4], &[0, 4]);
        assert_eq!(code[8], Opcode::False as u8);
    }

    #[test]
    fn test_host_call_is_native() {
        let exe = compile_source("return math.max(1, 2);", &HostApi::with_stdlib()).unwrap();
        let code = &exe.bytecode.instructions;
        assert!(code.contains(&(Opcode::CallNative as u8)));
        assert!(!code.contains(&(Opcode::Call as u8)));
    }
}
