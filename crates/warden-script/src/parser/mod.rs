//! Parsing (tokens to AST)
//!
//! Pratt parsing for expressions and recursive descent for statements.
//! Nesting depth is capped so that hostile, deeply nested input produces a
//! diagnostic instead of exhausting the host's native stack during parsing,
//! validation or compilation.

mod expr;
mod stmt;

use crate::ast::*;
use crate::diagnostic::{codes, Diagnostic};
use crate::span::Span;
use crate::token::{Token, TokenKind};

/// Maximum nesting of expressions and blocks
pub const MAX_NESTING_DEPTH: usize = 200;

/// Parser state for building AST from tokens
pub struct Parser {
    pub(super) tokens: Vec<Token>,
    pub(super) current: usize,
    pub(super) diagnostics: Vec<Diagnostic>,
    pub(super) depth: usize,
}

/// Operator precedence levels for Pratt parsing
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(super) enum Precedence {
    Lowest,
    Or,         // ||
    And,        // &&
    Equality,   // == !=
    Comparison, // < <= > >=
    Term,       // + -
    Factor,     // * / %
    Unary,      // ! -
    Call,       // () [] .
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            current: 0,
            diagnostics: Vec::new(),
            depth: 0,
        }
    }

    /// Parse tokens into an AST
    pub fn parse(&mut self) -> (Program, Vec<Diagnostic>) {
        let mut items = Vec::new();

        while !self.is_at_end() {
            self.depth = 0;
            match self.parse_item() {
                Ok(item) => items.push(item),
                Err(_) => self.synchronize(),
            }
        }

        (Program { items }, std::mem::take(&mut self.diagnostics))
    }

    // === Top-level parsing ===

    fn parse_item(&mut self) -> Result<Item, ()> {
        match self.peek().kind {
            TokenKind::Import => Ok(Item::Import(self.parse_import()?)),
            TokenKind::Extern => Ok(Item::Extern(self.parse_extern()?)),
            TokenKind::Fn => Ok(Item::Function(self.parse_function()?)),
            _ => Ok(Item::Statement(self.parse_statement()?)),
        }
    }

    /// `import a.b.c;`
    fn parse_import(&mut self) -> Result<ImportDecl, ()> {
        let start = self.consume(TokenKind::Import, "Expected 'import'")?.span;
        let mut path = vec![self.parse_identifier_node("a namespace name")?];
        while self.match_token(TokenKind::Dot) {
            path.push(self.parse_identifier_node("a namespace segment")?);
        }
        let end = self
            .consume(TokenKind::Semicolon, "Expected ';' after import")?
            .span;
        Ok(ImportDecl {
            path,
            span: start.merge(end),
        })
    }

    fn parse_function(&mut self) -> Result<FunctionDecl, ()> {
        let start = self.consume(TokenKind::Fn, "Expected 'fn'")?.span;
        let name = self.parse_identifier_node("a function name")?;
        let params = self.parse_params()?;
        let return_type = self.parse_return_type()?;
        let body = self.parse_block()?;
        let span = start.merge(body.span);
        Ok(FunctionDecl {
            name,
            params,
            return_type,
            body,
            span,
        })
    }

    /// `extern fn name(params) -> T from "library";`
    fn parse_extern(&mut self) -> Result<ExternDecl, ()> {
        let start = self.consume(TokenKind::Extern, "Expected 'extern'")?.span;
        self.consume(TokenKind::Fn, "Expected 'fn' after 'extern'")?;
        let name = self.parse_identifier_node("an extern function name")?;
        let params = self.parse_params()?;
        let return_type = self.parse_return_type()?;
        self.consume(TokenKind::From, "Expected 'from' before the library name")?;
        let library = self
            .consume(TokenKind::String, "Expected a library name string")?
            .lexeme
            .clone();
        let end = self
            .consume(TokenKind::Semicolon, "Expected ';' after extern declaration")?
            .span;
        Ok(ExternDecl {
            name,
            params,
            return_type,
            library,
            span: start.merge(end),
        })
    }

    fn parse_params(&mut self) -> Result<Vec<Param>, ()> {
        self.consume(TokenKind::LeftParen, "Expected '(' after function name")?;
        let mut params = Vec::new();
        if !self.check(TokenKind::RightParen) {
            loop {
                let name = self.parse_identifier_node("a parameter name")?;
                let type_ref = if self.match_token(TokenKind::Colon) {
                    Some(self.parse_type_ref()?)
                } else {
                    None
                };
                params.push(Param { name, type_ref });
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expected ')' after parameters")?;
        Ok(params)
    }

    fn parse_return_type(&mut self) -> Result<Option<TypeRef>, ()> {
        if self.match_token(TokenKind::Arrow) {
            Ok(Some(self.parse_type_ref()?))
        } else {
            Ok(None)
        }
    }

    /// `name` or `name[]`, with `null` accepted as a type name
    pub(super) fn parse_type_ref(&mut self) -> Result<TypeRef, ()> {
        let token = self.peek().clone();
        if !matches!(token.kind, TokenKind::Identifier | TokenKind::Null) {
            self.error("Expected a type name");
            return Err(());
        }
        self.advance();
        let mut name = token.lexeme;
        let mut span = token.span;
        while self.match_token(TokenKind::LeftBracket) {
            span = span.merge(self.consume(TokenKind::RightBracket, "Expected ']' in array type")?.span);
            name.push_str("[]");
        }
        Ok(TypeRef { name, span })
    }

    // === Nesting guard ===

    pub(super) fn enter(&mut self) -> Result<(), ()> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            let span = self.peek().span;
            self.diagnostics.push(
                Diagnostic::error_with_code(
                    codes::NESTING_TOO_DEEP,
                    format!("Nesting exceeds the maximum depth of {}", MAX_NESTING_DEPTH),
                    span,
                )
                .with_label("nested too deeply")
                .with_help("split the expression or block into smaller pieces"),
            );
            return Err(());
        }
        Ok(())
    }

    pub(super) fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    // === Token helpers ===

    pub(super) fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        &self.tokens[self.current - 1]
    }

    pub(super) fn peek(&self) -> &Token {
        &self.tokens[self.current.min(self.tokens.len() - 1)]
    }

    pub(super) fn previous_span(&self) -> Span {
        self.tokens[self.current.saturating_sub(1)].span
    }

    pub(super) fn check(&self, kind: TokenKind) -> bool {
        !self.is_at_end() && self.peek().kind == kind
    }

    pub(super) fn match_token(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub(super) fn consume(&mut self, kind: TokenKind, message: &str) -> Result<&Token, ()> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            self.error(message);
            Err(())
        }
    }

    pub(super) fn parse_identifier_node(&mut self, context: &str) -> Result<Identifier, ()> {
        let token = self.peek();
        if token.kind == TokenKind::Identifier {
            let ident = Identifier {
                name: token.lexeme.clone(),
                span: token.span,
            };
            self.advance();
            return Ok(ident);
        }
        let message = if TokenKind::is_keyword(&token.lexeme).is_some() {
            format!("Cannot use reserved keyword '{}' as {}", token.lexeme, context)
        } else {
            format!("Expected {}", context)
        };
        self.error(&message);
        Err(())
    }

    pub(super) fn is_at_end(&self) -> bool {
        self.current >= self.tokens.len() || self.tokens[self.current].kind == TokenKind::Eof
    }

    pub(super) fn error(&mut self, message: &str) {
        let token = self.peek();
        // Lexer errors are already reported
        if token.kind == TokenKind::Error {
            return;
        }
        let found = token.kind.as_str();
        let span = token.span;
        self.diagnostics.push(
            Diagnostic::error_with_code(codes::SYNTAX_ERROR, message, span)
                .with_label(format!("found {}", found)),
        );
    }

    pub(super) fn error_at(&mut self, code: &str, message: &str, span: Span) {
        self.diagnostics
            .push(Diagnostic::error_with_code(code, message, span));
    }

    /// Skip tokens until a likely statement boundary
    pub(super) fn synchronize(&mut self) {
        self.advance();
        while !self.is_at_end() {
            if self.tokens[self.current - 1].kind == TokenKind::Semicolon {
                return;
            }
            match self.peek().kind {
                TokenKind::Fn
                | TokenKind::Let
                | TokenKind::Var
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Return
                | TokenKind::Import
                | TokenKind::Extern => return,
                _ => {
                    self.advance();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use pretty_assertions::assert_eq;

    fn parse(source: &str) -> (Program, Vec<Diagnostic>) {
        let (tokens, lex_diags) = Lexer::new(source).tokenize();
        assert!(lex_diags.is_empty(), "lexer diagnostics: {:?}", lex_diags);
        Parser::new(tokens).parse()
    }

    #[test]
    fn test_parse_import_path() {
        let (program, diags) = parse("import net.http;");
        assert!(diags.is_empty());
        match &program.items[0] {
            Item::Import(import) => assert_eq!(import.dotted(), "net.http"),
            other => panic!("expected import, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_function_with_types() {
        let (program, diags) = parse("fn add(a: int, b: int) -> int { return a + b; }");
        assert!(diags.is_empty());
        let func = program.functions().next().unwrap();
        assert_eq!(func.name.name, "add");
        assert_eq!(func.params.len(), 2);
        assert_eq!(func.return_type.as_ref().unwrap().name, "int");
    }

    #[test]
    fn test_parse_extern() {
        let (program, diags) = parse("extern fn hash(s: string) -> int from \"crypto\";");
        assert!(diags.is_empty());
        let decl = program.externs().next().unwrap();
        assert_eq!(decl.name.name, "hash");
        assert_eq!(decl.library, "crypto");
    }

    #[test]
    fn test_recovers_after_error() {
        let (program, diags) = parse("let = 5; let ok = 1;");
        assert_eq!(diags.len(), 1);
        assert_eq!(program.items.len(), 1);
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let source = format!("return {}1{};", "(".repeat(500), ")".repeat(500));
        let (_, diags) = parse(&source);
        assert!(diags.iter().any(|d| d.code == codes::NESTING_TOO_DEEP));
    }

    #[test]
    fn test_long_operator_chain_is_rejected() {
        let source = format!("return 1{};", " + 1".repeat(1000));
        let (_, diags) = parse(&source);
        assert!(diags.iter().any(|d| d.code == codes::NESTING_TOO_DEEP));
    }

    #[test]
    fn test_keyword_as_name_reports() {
        let (_, diags) = parse("let while = 1;");
        assert!(diags[0].message.contains("reserved keyword 'while'"));
    }
}
