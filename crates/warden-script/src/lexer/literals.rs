//! Literal scanning for the lexer

use crate::diagnostic::codes;
use crate::lexer::Lexer;
use crate::token::{Token, TokenKind};

impl Lexer {
    /// Scan a string literal; the token lexeme holds the unescaped value
    pub(super) fn string(&mut self) -> Token {
        let mut value = String::new();
        let mut invalid_escape = None;

        while !self.is_at_end() && self.peek() != '"' {
            if self.peek() == '\\' {
                self.advance();
                if self.is_at_end() {
                    break;
                }
                let escape = self.advance();
                match escape {
                    'n' => value.push('\n'),
                    'r' => value.push('\r'),
                    't' => value.push('\t'),
                    '\\' => value.push('\\'),
                    '"' => value.push('"'),
                    '0' => value.push('\0'),
                    other => {
                        invalid_escape.get_or_insert(other);
                    }
                }
            } else {
                value.push(self.advance());
            }
        }

        if self.is_at_end() {
            return self.error_token(
                codes::UNTERMINATED_STRING,
                "Unterminated string literal".to_string(),
            );
        }
        self.advance(); // closing quote

        match invalid_escape {
            Some(c) => self.error_token(
                codes::INVALID_ESCAPE,
                format!("Invalid escape sequence '\\{}'", c),
            ),
            None => self.make_token(TokenKind::String, value),
        }
    }

    /// Scan an integer or float literal
    pub(super) fn number(&mut self) -> Token {
        while !self.is_at_end() && self.peek().is_ascii_digit() {
            self.advance();
        }

        let mut is_float = false;
        if self.peek() == '.' && self.peek_next().is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            self.advance();
            while !self.is_at_end() && self.peek().is_ascii_digit() {
                self.advance();
            }
        }

        let text = self.current_text();
        if is_float {
            match text.parse::<f64>() {
                Ok(_) => self.make_token(TokenKind::Float, text),
                Err(_) => self.error_token(
                    codes::INVALID_NUMBER,
                    format!("Invalid float literal '{}'", text),
                ),
            }
        } else {
            match text.parse::<i64>() {
                Ok(_) => self.make_token(TokenKind::Int, text),
                Err(_) => self.error_token(
                    codes::INVALID_NUMBER,
                    format!("Integer literal '{}' does not fit in 64 bits", text),
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::diagnostic::codes;
    use crate::lexer::Lexer;
    use crate::token::TokenKind;
    use rstest::rstest;

    #[rstest]
    #[case::plain("\"abc\"", "abc")]
    #[case::escapes("\"a\\n\\t\\\"b\"", "a\n\t\"b")]
    #[case::unicode("\"héllo\"", "héllo")]
    fn test_string_values(#[case] source: &str, #[case] expected: &str) {
        let (tokens, diags) = Lexer::new(source).tokenize();
        assert!(diags.is_empty());
        assert_eq!(tokens[0].kind, TokenKind::String);
        assert_eq!(tokens[0].lexeme, expected);
    }

    #[rstest]
    #[case::int("42", TokenKind::Int)]
    #[case::float("3.25", TokenKind::Float)]
    #[case::max_int("9223372036854775807", TokenKind::Int)]
    fn test_number_kinds(#[case] source: &str, #[case] kind: TokenKind) {
        let (tokens, diags) = Lexer::new(source).tokenize();
        assert!(diags.is_empty());
        assert_eq!(tokens[0].kind, kind);
        assert_eq!(tokens[0].lexeme, source);
    }

    #[test]
    fn test_integer_out_of_range() {
        let (tokens, diags) = Lexer::new("9223372036854775808").tokenize();
        assert_eq!(tokens[0].kind, TokenKind::Error);
        assert_eq!(diags[0].code, codes::INVALID_NUMBER);
    }

    #[test]
    fn test_unterminated_string() {
        let (_, diags) = Lexer::new("\"open").tokenize();
        assert_eq!(diags[0].code, codes::UNTERMINATED_STRING);
    }

    #[test]
    fn test_member_call_is_not_a_float() {
        let (tokens, _) = Lexer::new("1.x").tokenize();
        assert_eq!(tokens[0].kind, TokenKind::Int);
        assert_eq!(tokens[1].kind, TokenKind::Dot);
    }
}
