//! Statement parsing

use crate::ast::*;
use crate::diagnostic::codes;
use crate::parser::Parser;
use crate::token::TokenKind;

impl Parser {
    pub(super) fn parse_statement(&mut self) -> Result<Stmt, ()> {
        match self.peek().kind {
            TokenKind::Let | TokenKind::Var => self.parse_var_decl(),
            TokenKind::If => Ok(Stmt::If(self.parse_if()?)),
            TokenKind::While => self.parse_while(),
            TokenKind::Return => self.parse_return(),
            TokenKind::Break => {
                let span = self.advance().span;
                self.consume(TokenKind::Semicolon, "Expected ';' after 'break'")?;
                Ok(Stmt::Break(span))
            }
            TokenKind::Continue => {
                let span = self.advance().span;
                self.consume(TokenKind::Semicolon, "Expected ';' after 'continue'")?;
                Ok(Stmt::Continue(span))
            }
            TokenKind::LeftBrace => Ok(Stmt::Block(self.parse_block()?)),
            TokenKind::Unsafe => {
                self.advance();
                Ok(Stmt::Unsafe(self.parse_block()?))
            }
            TokenKind::Fn | TokenKind::Import | TokenKind::Extern => {
                let token = self.peek().clone();
                self.error_at(
                    codes::MISPLACED_ITEM,
                    &format!("'{}' declarations are only allowed at the top level", token.lexeme),
                    token.span,
                );
                Err(())
            }
            _ => self.parse_expression_statement(),
        }
    }

    pub(super) fn parse_block(&mut self) -> Result<Block, ()> {
        let start = self
            .consume(TokenKind::LeftBrace, "Expected '{'")?
            .span;
        self.enter()?;
        let mut statements = Vec::new();
        while !self.check(TokenKind::RightBrace) && !self.is_at_end() {
            statements.push(self.parse_statement()?);
        }
        let end = self.consume(TokenKind::RightBrace, "Expected '}'")?.span;
        self.leave();
        Ok(Block {
            statements,
            span: start.merge(end),
        })
    }

    fn parse_var_decl(&mut self) -> Result<Stmt, ()> {
        let keyword = self.advance().clone();
        let name = self.parse_identifier_node("a variable name")?;
        let type_ref = if self.match_token(TokenKind::Colon) {
            Some(self.parse_type_ref()?)
        } else {
            None
        };
        self.consume(TokenKind::Equal, "Expected '=' in variable declaration")?;
        let init = self.parse_expression()?;
        let end = self
            .consume(TokenKind::Semicolon, "Expected ';' after variable declaration")?
            .span;
        Ok(Stmt::VarDecl(VarDecl {
            mutable: keyword.kind == TokenKind::Var,
            name,
            type_ref,
            init,
            span: keyword.span.merge(end),
        }))
    }

    fn parse_if(&mut self) -> Result<IfStmt, ()> {
        let start = self.advance().span;
        let cond = self.parse_expression()?;
        let then_block = self.parse_block()?;
        let mut span = start.merge(then_block.span);

        let else_block = if self.match_token(TokenKind::Else) {
            let block = if self.check(TokenKind::If) {
                self.enter()?;
                let nested = self.parse_if()?;
                self.leave();
                let nested_span = nested.span;
                Block {
                    statements: vec![Stmt::If(nested)],
                    span: nested_span,
                }
            } else {
                self.parse_block()?
            };
            span = span.merge(block.span);
            Some(block)
        } else {
            None
        };

        Ok(IfStmt {
            cond,
            then_block,
            else_block,
            span,
        })
    }

    fn parse_while(&mut self) -> Result<Stmt, ()> {
        let start = self.advance().span;
        let cond = self.parse_expression()?;
        let body = self.parse_block()?;
        let span = start.merge(body.span);
        Ok(Stmt::While(WhileStmt { cond, body, span }))
    }

    fn parse_return(&mut self) -> Result<Stmt, ()> {
        let start = self.advance().span;
        let value = if self.check(TokenKind::Semicolon) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        let end = self
            .consume(TokenKind::Semicolon, "Expected ';' after return")?
            .span;
        Ok(Stmt::Return(ReturnStmt {
            value,
            span: start.merge(end),
        }))
    }

    /// Expression statement, assignment or compound assignment
    fn parse_expression_statement(&mut self) -> Result<Stmt, ()> {
        let expr = self.parse_expression()?;

        let compound = match self.peek().kind {
            TokenKind::PlusEqual => Some(BinaryOp::Add),
            TokenKind::MinusEqual => Some(BinaryOp::Sub),
            TokenKind::StarEqual => Some(BinaryOp::Mul),
            TokenKind::SlashEqual => Some(BinaryOp::Div),
            TokenKind::PercentEqual => Some(BinaryOp::Mod),
            _ => None,
        };

        if self.match_token(TokenKind::Equal) {
            let target = self.assign_target(expr)?;
            let value = self.parse_expression()?;
            let end = self
                .consume(TokenKind::Semicolon, "Expected ';' after assignment")?
                .span;
            let span = target.root().span.merge(end);
            return Ok(Stmt::Assign(Assign {
                target,
                value,
                span,
            }));
        }

        if let Some(op) = compound {
            self.advance();
            let target = match expr {
                Expr::Identifier(ident) => ident,
                other => {
                    self.error_at(
                        codes::INVALID_ASSIGNMENT,
                        "Compound assignment target must be a variable",
                        other.span(),
                    );
                    return Err(());
                }
            };
            let value = self.parse_expression()?;
            let end = self
                .consume(TokenKind::Semicolon, "Expected ';' after assignment")?
                .span;
            let span = target.span.merge(end);
            return Ok(Stmt::CompoundAssign(CompoundAssign {
                target,
                op,
                value,
                span,
            }));
        }

        let end = self
            .consume(TokenKind::Semicolon, "Expected ';' after expression")?
            .span;
        let span = expr.span().merge(end);
        Ok(Stmt::Expr(ExprStmt { expr, span }))
    }

    fn assign_target(&mut self, expr: Expr) -> Result<AssignTarget, ()> {
        match expr {
            Expr::Identifier(ident) => Ok(AssignTarget::Name(ident)),
            Expr::Index(IndexExpr {
                target,
                index,
                span,
            }) => match *target {
                Expr::Identifier(ident) => Ok(AssignTarget::Index {
                    target: ident,
                    index,
                    span,
                }),
                other => {
                    self.error_at(
                        codes::INVALID_ASSIGNMENT,
                        "Only `name[index]` element assignments are supported",
                        other.span(),
                    );
                    Err(())
                }
            },
            other => {
                self.error_at(
                    codes::INVALID_ASSIGNMENT,
                    "Invalid assignment target",
                    other.span(),
                );
                Err(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::*;
    use crate::diagnostic::codes;
    use crate::lexer::Lexer;
    use crate::parser::Parser;
    use pretty_assertions::assert_eq;

    fn parse(source: &str) -> (Program, Vec<crate::diagnostic::Diagnostic>) {
        let (tokens, _) = Lexer::new(source).tokenize();
        Parser::new(tokens).parse()
    }

    #[test]
    fn test_else_if_chain_nests() {
        let (program, diags) = parse("if a { } else if b { } else { }");
        assert!(diags.is_empty());
        match &program.items[0] {
            Item::Statement(Stmt::If(stmt)) => {
                let else_block = stmt.else_block.as_ref().unwrap();
                assert!(matches!(else_block.statements[0], Stmt::If(_)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_index_assignment_target() {
        let (program, diags) = parse("xs[0] = 5;");
        assert!(diags.is_empty());
        match &program.items[0] {
            Item::Statement(Stmt::Assign(assign)) => {
                assert_eq!(assign.target.root().name, "xs");
                assert!(matches!(assign.target, AssignTarget::Index { .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_compound_assignment() {
        let (program, diags) = parse("total += 3;");
        assert!(diags.is_empty());
        assert!(matches!(
            &program.items[0],
            Item::Statement(Stmt::CompoundAssign(CompoundAssign { op: BinaryOp::Add, .. }))
        ));
    }

    #[test]
    fn test_call_is_not_assignable() {
        let (_, diags) = parse("f() = 1;");
        assert_eq!(diags[0].code, codes::INVALID_ASSIGNMENT);
    }

    #[test]
    fn test_nested_function_is_rejected() {
        let (_, diags) = parse("fn outer() { fn inner() {} }");
        assert!(diags.iter().any(|d| d.code == codes::MISPLACED_ITEM));
    }

    #[test]
    fn test_unsafe_block() {
        let (program, diags) = parse("unsafe { let x = 1; }");
        assert!(diags.is_empty());
        assert!(matches!(&program.items[0], Item::Statement(Stmt::Unsafe(_))));
    }

    #[test]
    fn test_deeply_nested_blocks_are_rejected() {
        let source = format!("{}{}", "{".repeat(300), "}".repeat(300));
        let (_, diags) = parse(&source);
        assert!(diags.iter().any(|d| d.code == codes::NESTING_TOO_DEEP));
    }
}
