//! Statement compilation

use super::{Compiler, LoopContext};
use crate::ast::*;
use crate::bytecode::Opcode;
use crate::diagnostic::codes;
use crate::span::Span;

impl<'h> Compiler<'h> {
    pub(super) fn compile_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::VarDecl(decl) => self.compile_var_decl(decl),
            Stmt::Assign(assign) => self.compile_assign(assign),
            Stmt::CompoundAssign(assign) => self.compile_compound_assign(assign),
            Stmt::If(if_stmt) => self.compile_if(if_stmt),
            Stmt::While(while_stmt) => self.compile_while(while_stmt),
            Stmt::Return(ret) => {
                match &ret.value {
                    Some(value) => self.compile_expr(value),
                    None => self.bytecode.emit(Opcode::Null, ret.span),
                }
                self.bytecode.emit(Opcode::Return, ret.span);
            }
            Stmt::Break(span) => {
                if self.loops.is_empty() {
                    self.error(
                        codes::LOOP_CONTROL_OUTSIDE_LOOP,
                        "'break' outside of a loop",
                        *span,
                    );
                    return;
                }
                let jump = self.emit_jump(Opcode::Jump, *span);
                if let Some(ctx) = self.loops.last_mut() {
                    ctx.break_jumps.push(jump);
                }
            }
            Stmt::Continue(span) => {
                let Some(start) = self.loops.last().map(|ctx| ctx.start_offset) else {
                    self.error(
                        codes::LOOP_CONTROL_OUTSIDE_LOOP,
                        "'continue' outside of a loop",
                        *span,
                    );
                    return;
                };
                self.emit_loop(start, *span);
            }
            Stmt::Block(block) | Stmt::Unsafe(block) => self.compile_block(block),
            Stmt::Expr(expr_stmt) => {
                self.compile_expr(&expr_stmt.expr);
                self.bytecode.emit(Opcode::Pop, expr_stmt.span);
            }
        }
    }

    /// Compile a block in its own scope
    pub(super) fn compile_block(&mut self, block: &Block) {
        self.begin_scope();
        self.compile_block_statements(block);
        self.end_scope();
    }

    /// Compile a block's statements in the current scope
    pub(super) fn compile_block_statements(&mut self, block: &Block) {
        for stmt in &block.statements {
            self.compile_stmt(stmt);
        }
    }

    fn compile_var_decl(&mut self, decl: &VarDecl) {
        // The initializer cannot see the name being declared
        self.compile_expr(&decl.init);

        if self.scopes.is_empty() {
            match self.resolve_global(&decl.name.name) {
                Some(slot) => {
                    self.bytecode.emit(Opcode::SetGlobal, decl.span);
                    self.bytecode.emit_u16(slot);
                }
                None => return,
            }
        } else {
            let Some(slot) = self.declare_local(&decl.name) else {
                return;
            };
            self.bytecode.emit(Opcode::SetLocal, decl.span);
            self.bytecode.emit_u16(slot);
        }
        self.bytecode.emit(Opcode::Pop, decl.span);
    }

    fn compile_assign(&mut self, assign: &Assign) {
        match &assign.target {
            AssignTarget::Name(ident) => {
                self.compile_expr(&assign.value);
                self.emit_set_variable(ident);
                self.bytecode.emit(Opcode::Pop, assign.span);
            }
            AssignTarget::Index {
                target,
                index,
                span,
            } => {
                self.compile_expr(index);
                self.compile_expr(&assign.value);
                self.emit_set_index(target, *span);
            }
        }
    }

    /// Pop value and index, store into the array held by a variable in place
    fn emit_set_index(&mut self, ident: &Identifier, span: Span) {
        if let Some(slot) = self.resolve_local(&ident.name) {
            self.bytecode.emit(Opcode::SetLocalIndex, span);
            self.bytecode.emit_u16(slot);
        } else if let Some(slot) = self.resolve_global(&ident.name) {
            self.bytecode.emit(Opcode::SetGlobalIndex, span);
            self.bytecode.emit_u16(slot);
        } else {
            self.report_unresolved(ident);
            self.bytecode.emit(Opcode::Pop, span);
            self.bytecode.emit(Opcode::Pop, span);
        }
    }

    fn compile_compound_assign(&mut self, assign: &CompoundAssign) {
        self.emit_get_variable(&assign.target);
        self.compile_expr(&assign.value);
        self.emit_binary_op(assign.op, assign.span);
        self.emit_set_variable(&assign.target);
        self.bytecode.emit(Opcode::Pop, assign.span);
    }

    fn compile_if(&mut self, if_stmt: &IfStmt) {
        self.compile_expr(&if_stmt.cond);
        let else_jump = self.emit_jump(Opcode::JumpIfFalse, if_stmt.span);
        self.compile_block(&if_stmt.then_block);

        match &if_stmt.else_block {
            Some(else_block) => {
                let end_jump = self.emit_jump(Opcode::Jump, if_stmt.span);
                self.patch_jump(else_jump, if_stmt.span);
                self.compile_block(else_block);
                self.patch_jump(end_jump, if_stmt.span);
            }
            None => self.patch_jump(else_jump, if_stmt.span),
        }
    }

    fn compile_while(&mut self, while_stmt: &WhileStmt) {
        let start_offset = self.bytecode.current_offset();
        self.compile_expr(&while_stmt.cond);
        let exit_jump = self.emit_jump(Opcode::JumpIfFalse, while_stmt.span);

        self.loops.push(LoopContext {
            start_offset,
            break_jumps: Vec::new(),
        });
        self.compile_block(&while_stmt.body);
        self.emit_loop(start_offset, while_stmt.span);
        self.patch_jump(exit_jump, while_stmt.span);

        if let Some(ctx) = self.loops.pop() {
            for jump in ctx.break_jumps {
                self.patch_jump(jump, while_stmt.span);
            }
        }
    }

    /// Push the current value of a variable
    pub(super) fn emit_get_variable(&mut self, ident: &Identifier) {
        if let Some(slot) = self.resolve_local(&ident.name) {
            self.bytecode.emit(Opcode::GetLocal, ident.span);
            self.bytecode.emit_u16(slot);
        } else if let Some(slot) = self.resolve_global(&ident.name) {
            self.bytecode.emit(Opcode::GetGlobal, ident.span);
            self.bytecode.emit_u16(slot);
        } else {
            self.report_unresolved(ident);
            // Keep the stack shape consistent for the rest of the function
            self.bytecode.emit(Opcode::Null, ident.span);
        }
    }

    /// Store TOS into a variable, leaving it on the stack
    fn emit_set_variable(&mut self, ident: &Identifier) {
        if let Some(slot) = self.resolve_local(&ident.name) {
            self.bytecode.emit(Opcode::SetLocal, ident.span);
            self.bytecode.emit_u16(slot);
        } else if let Some(slot) = self.resolve_global(&ident.name) {
            self.bytecode.emit(Opcode::SetGlobal, ident.span);
            self.bytecode.emit_u16(slot);
        } else {
            self.report_unresolved(ident);
        }
    }

    pub(super) fn report_unresolved(&mut self, ident: &Identifier) {
        if self.function_index.contains_key(&ident.name) || self.externs.contains_key(&ident.name)
        {
            self.error(
                codes::UNDEFINED_VARIABLE,
                format!("'{}' is a function and cannot be used as a value", ident.name),
                ident.span,
            );
        } else {
            self.error(
                codes::UNDEFINED_VARIABLE,
                format!("Undefined variable '{}'", ident.name),
                ident.span,
            );
        }
    }
}
