//! Lexical analysis (tokenization)
//!
//! Converts script source into a token stream with byte-offset spans.
//! Errors never abort scanning: an `Error` token is produced and a
//! diagnostic recorded so the parser can keep going.

use crate::diagnostic::{codes, Diagnostic};
use crate::span::Span;
use crate::token::{Token, TokenKind};

mod literals;

/// Lexer state for tokenizing source code
pub struct Lexer {
    /// Characters of source code paired with their byte offsets
    pub(super) chars: Vec<(usize, char)>,
    /// Total byte length of the source
    pub(super) source_len: usize,
    /// Current position in `chars`
    pub(super) current: usize,
    /// Position in `chars` where the current token starts
    pub(super) start: usize,
    pub(super) diagnostics: Vec<Diagnostic>,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Self {
            chars: source.char_indices().collect(),
            source_len: source.len(),
            current: 0,
            start: 0,
            diagnostics: Vec::new(),
        }
    }

    /// Tokenize the source code, returning tokens and any diagnostics
    pub fn tokenize(&mut self) -> (Vec<Token>, Vec<Diagnostic>) {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token();
            let is_eof = token.kind == TokenKind::Eof;
            tokens.push(token);
            if is_eof {
                break;
            }
        }
        (tokens, std::mem::take(&mut self.diagnostics))
    }

    fn next_token(&mut self) -> Token {
        self.skip_whitespace_and_comments();
        self.start = self.current;

        if self.is_at_end() {
            return self.make_token(TokenKind::Eof, "");
        }

        let c = self.advance();
        match c {
            '(' => self.make_token(TokenKind::LeftParen, "("),
            ')' => self.make_token(TokenKind::RightParen, ")"),
            '{' => self.make_token(TokenKind::LeftBrace, "{"),
            '}' => self.make_token(TokenKind::RightBrace, "}"),
            '[' => self.make_token(TokenKind::LeftBracket, "["),
            ']' => self.make_token(TokenKind::RightBracket, "]"),
            ';' => self.make_token(TokenKind::Semicolon, ";"),
            ',' => self.make_token(TokenKind::Comma, ","),
            ':' => self.make_token(TokenKind::Colon, ":"),
            '.' => self.make_token(TokenKind::Dot, "."),

            '+' => self.compound('=', TokenKind::PlusEqual, TokenKind::Plus),
            '*' => self.compound('=', TokenKind::StarEqual, TokenKind::Star),
            '/' => self.compound('=', TokenKind::SlashEqual, TokenKind::Slash),
            '%' => self.compound('=', TokenKind::PercentEqual, TokenKind::Percent),
            '=' => self.compound('=', TokenKind::EqualEqual, TokenKind::Equal),
            '!' => self.compound('=', TokenKind::BangEqual, TokenKind::Bang),
            '<' => self.compound('=', TokenKind::LessEqual, TokenKind::Less),
            '>' => self.compound('=', TokenKind::GreaterEqual, TokenKind::Greater),
            '-' => {
                if self.match_char('=') {
                    self.make_token(TokenKind::MinusEqual, "-=")
                } else if self.match_char('>') {
                    self.make_token(TokenKind::Arrow, "->")
                } else {
                    self.make_token(TokenKind::Minus, "-")
                }
            }
            '&' if self.match_char('&') => self.make_token(TokenKind::AmpAmp, "&&"),
            '|' if self.match_char('|') => self.make_token(TokenKind::PipePipe, "||"),

            '"' => self.string(),
            c if c.is_ascii_digit() => self.number(),
            c if c.is_alphabetic() || c == '_' => self.identifier(),

            _ => self.error_token(
                codes::UNEXPECTED_CHARACTER,
                format!("Unexpected character '{}'", c),
            ),
        }
    }

    fn compound(&mut self, second: char, matched: TokenKind, single: TokenKind) -> Token {
        if self.match_char(second) {
            self.make_token(matched, matched.as_str())
        } else {
            self.make_token(single, single.as_str())
        }
    }

    fn skip_whitespace_and_comments(&mut self) {
        while !self.is_at_end() {
            match self.peek() {
                ' ' | '\r' | '\t' | '\n' => {
                    self.advance();
                }
                '/' if self.peek_next() == Some('/') => {
                    while !self.is_at_end() && self.peek() != '\n' {
                        self.advance();
                    }
                }
                '/' if self.peek_next() == Some('*') => {
                    let comment_start = self.current;
                    self.advance();
                    self.advance();
                    let mut terminated = false;
                    while !self.is_at_end() {
                        if self.peek() == '*' && self.peek_next() == Some('/') {
                            self.advance();
                            self.advance();
                            terminated = true;
                            break;
                        }
                        self.advance();
                    }
                    if !terminated {
                        let span = Span::new(self.offset_of(comment_start), self.source_len);
                        self.diagnostics.push(
                            Diagnostic::error_with_code(
                                codes::UNTERMINATED_COMMENT,
                                "Unterminated multi-line comment",
                                span,
                            )
                            .with_label("comment starts here")
                            .with_help("add '*/' to close the comment"),
                        );
                    }
                }
                _ => return,
            }
        }
    }

    fn identifier(&mut self) -> Token {
        while !self.is_at_end() && (self.peek().is_alphanumeric() || self.peek() == '_') {
            self.advance();
        }
        let text = self.current_text();
        let kind = TokenKind::is_keyword(&text).unwrap_or(TokenKind::Identifier);
        self.make_token(kind, text)
    }

    // === Cursor helpers ===

    pub(super) fn is_at_end(&self) -> bool {
        self.current >= self.chars.len()
    }

    pub(super) fn advance(&mut self) -> char {
        let c = self.chars[self.current].1;
        self.current += 1;
        c
    }

    pub(super) fn peek(&self) -> char {
        self.chars.get(self.current).map(|(_, c)| *c).unwrap_or('\0')
    }

    pub(super) fn peek_next(&self) -> Option<char> {
        self.chars.get(self.current + 1).map(|(_, c)| *c)
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.is_at_end() || self.peek() != expected {
            return false;
        }
        self.current += 1;
        true
    }

    /// Byte offset of the character at `index` in `chars`
    pub(super) fn offset_of(&self, index: usize) -> usize {
        self.chars
            .get(index)
            .map(|(offset, _)| *offset)
            .unwrap_or(self.source_len)
    }

    pub(super) fn current_span(&self) -> Span {
        Span::new(self.offset_of(self.start), self.offset_of(self.current))
    }

    pub(super) fn current_text(&self) -> String {
        self.chars[self.start..self.current]
            .iter()
            .map(|(_, c)| *c)
            .collect()
    }

    pub(super) fn make_token(&self, kind: TokenKind, lexeme: impl Into<String>) -> Token {
        Token::new(kind, lexeme, self.current_span())
    }

    pub(super) fn error_token(&mut self, code: &str, message: String) -> Token {
        let span = self.current_span();
        self.diagnostics
            .push(Diagnostic::error_with_code(code, message.clone(), span));
        Token::new(TokenKind::Error, message, span)
    }
}
