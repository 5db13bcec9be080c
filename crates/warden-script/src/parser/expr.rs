//! Expression parsing (Pratt parsing)

use crate::ast::*;
use crate::parser::{Parser, Precedence};
use crate::token::TokenKind;

impl Parser {
    pub(super) fn parse_expression(&mut self) -> Result<Expr, ()> {
        self.parse_precedence(Precedence::Lowest)
    }

    /// Parse expression with given precedence
    ///
    /// Every applied infix operator counts as one nesting level because it
    /// deepens the left spine of the tree.
    pub(super) fn parse_precedence(&mut self, precedence: Precedence) -> Result<Expr, ()> {
        self.enter()?;
        let mut left = self.parse_prefix()?;
        let mut chained = 0;

        while precedence < self.current_precedence() {
            self.enter()?;
            chained += 1;
            left = self.parse_infix(left)?;
        }

        self.depth -= chained;
        self.leave();
        Ok(left)
    }

    fn parse_prefix(&mut self) -> Result<Expr, ()> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Int => {
                self.advance();
                match token.lexeme.parse::<i64>() {
                    Ok(n) => Ok(Expr::Literal(Literal::Int(n), token.span)),
                    Err(_) => {
                        self.error("Invalid integer literal");
                        Err(())
                    }
                }
            }
            TokenKind::Float => {
                self.advance();
                match token.lexeme.parse::<f64>() {
                    Ok(n) => Ok(Expr::Literal(Literal::Float(n), token.span)),
                    Err(_) => {
                        self.error("Invalid float literal");
                        Err(())
                    }
                }
            }
            TokenKind::String => {
                self.advance();
                Ok(Expr::Literal(Literal::String(token.lexeme), token.span))
            }
            TokenKind::True | TokenKind::False => {
                self.advance();
                Ok(Expr::Literal(
                    Literal::Bool(token.kind == TokenKind::True),
                    token.span,
                ))
            }
            TokenKind::Null => {
                self.advance();
                Ok(Expr::Literal(Literal::Null, token.span))
            }
            TokenKind::Identifier => {
                self.advance();
                Ok(Expr::Identifier(Identifier {
                    name: token.lexeme,
                    span: token.span,
                }))
            }
            TokenKind::LeftParen => self.parse_group(),
            TokenKind::LeftBracket => self.parse_array_literal(),
            TokenKind::Minus | TokenKind::Bang => self.parse_unary(),
            _ => {
                self.error("Expected expression");
                Err(())
            }
        }
    }

    fn parse_infix(&mut self, left: Expr) -> Result<Expr, ()> {
        match self.peek().kind {
            TokenKind::LeftParen => self.parse_call(left),
            TokenKind::LeftBracket => self.parse_index(left),
            TokenKind::Dot => self.parse_member(left),
            _ => self.parse_binary(left),
        }
    }

    pub(super) fn current_precedence(&self) -> Precedence {
        match self.peek().kind {
            TokenKind::PipePipe => Precedence::Or,
            TokenKind::AmpAmp => Precedence::And,
            TokenKind::EqualEqual | TokenKind::BangEqual => Precedence::Equality,
            TokenKind::Less
            | TokenKind::LessEqual
            | TokenKind::Greater
            | TokenKind::GreaterEqual => Precedence::Comparison,
            TokenKind::Plus | TokenKind::Minus => Precedence::Term,
            TokenKind::Star | TokenKind::Slash | TokenKind::Percent => Precedence::Factor,
            TokenKind::LeftParen | TokenKind::LeftBracket | TokenKind::Dot => Precedence::Call,
            _ => Precedence::Lowest,
        }
    }

    fn parse_binary(&mut self, left: Expr) -> Result<Expr, ()> {
        let precedence = self.current_precedence();
        let kind = self.advance().kind;
        let op = match kind {
            TokenKind::Plus => BinaryOp::Add,
            TokenKind::Minus => BinaryOp::Sub,
            TokenKind::Star => BinaryOp::Mul,
            TokenKind::Slash => BinaryOp::Div,
            TokenKind::Percent => BinaryOp::Mod,
            TokenKind::EqualEqual => BinaryOp::Eq,
            TokenKind::BangEqual => BinaryOp::Ne,
            TokenKind::Less => BinaryOp::Lt,
            TokenKind::LessEqual => BinaryOp::Le,
            TokenKind::Greater => BinaryOp::Gt,
            TokenKind::GreaterEqual => BinaryOp::Ge,
            TokenKind::AmpAmp => BinaryOp::And,
            TokenKind::PipePipe => BinaryOp::Or,
            _ => {
                self.error("Expected binary operator");
                return Err(());
            }
        };
        let right = self.parse_precedence(precedence)?;
        let span = left.span().merge(right.span());
        Ok(Expr::Binary(BinaryExpr {
            op,
            left: Box::new(left),
            right: Box::new(right),
            span,
        }))
    }

    fn parse_unary(&mut self) -> Result<Expr, ()> {
        let op_token = self.advance().clone();
        let op = if op_token.kind == TokenKind::Minus {
            UnaryOp::Negate
        } else {
            UnaryOp::Not
        };
        let expr = self.parse_precedence(Precedence::Unary)?;
        let span = op_token.span.merge(expr.span());
        Ok(Expr::Unary(UnaryExpr {
            op,
            expr: Box::new(expr),
            span,
        }))
    }

    fn parse_group(&mut self) -> Result<Expr, ()> {
        let start = self.advance().span;
        let expr = self.parse_expression()?;
        let end = self
            .consume(TokenKind::RightParen, "Expected ')' after expression")?
            .span;
        Ok(Expr::Group(GroupExpr {
            expr: Box::new(expr),
            span: start.merge(end),
        }))
    }

    fn parse_array_literal(&mut self) -> Result<Expr, ()> {
        let start = self.advance().span;
        let elements = self.parse_comma_list(TokenKind::RightBracket)?;
        let end = self
            .consume(TokenKind::RightBracket, "Expected ']' after array elements")?
            .span;
        Ok(Expr::Array(ArrayLiteral {
            elements,
            span: start.merge(end),
        }))
    }

    fn parse_call(&mut self, callee: Expr) -> Result<Expr, ()> {
        self.advance();
        let args = self.parse_comma_list(TokenKind::RightParen)?;
        let end = self
            .consume(TokenKind::RightParen, "Expected ')' after arguments")?
            .span;
        let span = callee.span().merge(end);
        Ok(Expr::Call(CallExpr {
            callee: Box::new(callee),
            args,
            span,
        }))
    }

    fn parse_index(&mut self, target: Expr) -> Result<Expr, ()> {
        self.advance();
        let index = self.parse_expression()?;
        let end = self
            .consume(TokenKind::RightBracket, "Expected ']' after index")?
            .span;
        let span = target.span().merge(end);
        Ok(Expr::Index(IndexExpr {
            target: Box::new(target),
            index: Box::new(index),
            span,
        }))
    }

    fn parse_member(&mut self, target: Expr) -> Result<Expr, ()> {
        self.advance();
        let member = self.parse_identifier_node("a member name after '.'")?;
        let span = target.span().merge(member.span);
        Ok(Expr::Member(MemberExpr {
            target: Box::new(target),
            member,
            span,
        }))
    }

    /// Comma-separated expressions up to (not including) `close`
    fn parse_comma_list(&mut self, close: TokenKind) -> Result<Vec<Expr>, ()> {
        let mut items = Vec::new();
        if self.check(close) {
            return Ok(items);
        }
        loop {
            items.push(self.parse_expression()?);
            if !self.match_token(TokenKind::Comma) || self.check(close) {
                break;
            }
        }
        Ok(items)
    }
}
