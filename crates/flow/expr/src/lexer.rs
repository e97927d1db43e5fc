//! Lexer: tokenizes formula text
//!
//! Formulas are single-line, so positions are tracked by column only.

use crate::errors::{ExprError, ExprResult};

/// A token produced by the lexer
#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// The raw text of the token (unescaped for string literals)
    pub text: String,
    /// Column number (1-based)
    pub col: usize,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, col: usize) -> Self {
        Self {
            kind,
            text: text.into(),
            col,
        }
    }
}

/// Token types
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind {
    // Keywords
    True,
    False,
    Null,

    // Identifiers and literals
    Identifier,
    StringLiteral,
    NumberLiteral,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    AndAnd,
    OrOr,
    EqEq,
    NotEq,
    Less,
    LessEq,
    Greater,
    GreaterEq,

    // Structural
    Dot,
    Comma,
    OpenParen,
    CloseParen,
    OpenBracket,
    CloseBracket,

    Eof,
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::True => "true",
            Self::False => "false",
            Self::Null => "null",
            Self::Identifier => "identifier",
            Self::StringLiteral => "string literal",
            Self::NumberLiteral => "number",
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Star => "*",
            Self::Slash => "/",
            Self::Percent => "%",
            Self::Bang => "!",
            Self::AndAnd => "&&",
            Self::OrOr => "||",
            Self::EqEq => "==",
            Self::NotEq => "!=",
            Self::Less => "<",
            Self::LessEq => "<=",
            Self::Greater => ">",
            Self::GreaterEq => ">=",
            Self::Dot => ".",
            Self::Comma => ",",
            Self::OpenParen => "(",
            Self::CloseParen => ")",
            Self::OpenBracket => "[",
            Self::CloseBracket => "]",
            Self::Eof => "end of expression",
        };
        write!(f, "{}", text)
    }
}

/// Lexer for formula text
pub struct Lexer {
    input: Vec<char>,
    pos: usize,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            pos: 0,
        }
    }

    /// Tokenize the entire input
    pub fn tokenize(&mut self) -> ExprResult<Vec<Token>> {
        let mut tokens = Vec::new();

        loop {
            self.skip_whitespace();

            if self.pos >= self.input.len() {
                tokens.push(Token::new(TokenKind::Eof, "", self.col()));
                break;
            }

            let token = self.next_token()?;
            tokens.push(token);
        }

        Ok(tokens)
    }

    fn next_token(&mut self) -> ExprResult<Token> {
        let ch = self.input[self.pos];
        let col = self.col();

        let two = |lexer: &mut Self, kind: TokenKind, text: &str| -> ExprResult<Token> {
            lexer.pos += 2;
            Ok(Token::new(kind, text, col))
        };
        let one = |lexer: &mut Self, kind: TokenKind| -> ExprResult<Token> {
            lexer.pos += 1;
            Ok(Token::new(kind, ch.to_string(), col))
        };

        match ch {
            '&' if self.peek_at(1) == Some('&') => two(self, TokenKind::AndAnd, "&&"),
            '|' if self.peek_at(1) == Some('|') => two(self, TokenKind::OrOr, "||"),
            '=' if self.peek_at(1) == Some('=') => two(self, TokenKind::EqEq, "=="),
            '!' if self.peek_at(1) == Some('=') => two(self, TokenKind::NotEq, "!="),
            '<' if self.peek_at(1) == Some('=') => two(self, TokenKind::LessEq, "<="),
            '>' if self.peek_at(1) == Some('=') => two(self, TokenKind::GreaterEq, ">="),
            '+' => one(self, TokenKind::Plus),
            '-' => one(self, TokenKind::Minus),
            '*' => one(self, TokenKind::Star),
            '/' => one(self, TokenKind::Slash),
            '%' => one(self, TokenKind::Percent),
            '!' => one(self, TokenKind::Bang),
            '<' => one(self, TokenKind::Less),
            '>' => one(self, TokenKind::Greater),
            '.' => one(self, TokenKind::Dot),
            ',' => one(self, TokenKind::Comma),
            '(' => one(self, TokenKind::OpenParen),
            ')' => one(self, TokenKind::CloseParen),
            '[' => one(self, TokenKind::OpenBracket),
            ']' => one(self, TokenKind::CloseBracket),
            '"' | '\'' => self.read_string_literal(ch),
            c if c.is_ascii_digit() => Ok(self.read_number()),
            c if c.is_ascii_alphabetic() || c == '_' => Ok(self.read_identifier_or_keyword()),
            _ => Err(ExprError::ParseError {
                col,
                message: format!("Unexpected character: '{}'", ch),
            }),
        }
    }

    fn read_string_literal(&mut self, quote: char) -> ExprResult<Token> {
        let col = self.col();
        self.pos += 1; // opening quote

        let mut text = String::new();
        while self.pos < self.input.len() && self.input[self.pos] != quote {
            if self.input[self.pos] == '\\' {
                if let Some(next) = self.peek_at(1) {
                    self.pos += 1;
                    text.push(match next {
                        'n' => '\n',
                        't' => '\t',
                        other => other,
                    });
                    self.pos += 1;
                    continue;
                }
            }
            text.push(self.input[self.pos]);
            self.pos += 1;
        }

        if self.pos >= self.input.len() {
            return Err(ExprError::ParseError {
                col,
                message: "Unterminated string literal".into(),
            });
        }

        self.pos += 1; // closing quote
        Ok(Token::new(TokenKind::StringLiteral, text, col))
    }

    fn read_number(&mut self) -> Token {
        let col = self.col();
        let mut text = String::new();

        while self.pos < self.input.len() && self.input[self.pos].is_ascii_digit() {
            text.push(self.input[self.pos]);
            self.pos += 1;
        }

        // A fraction needs a digit after the dot; `1.x` stays member access
        if self.peek_at(0) == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            text.push('.');
            self.pos += 1;
            while self.pos < self.input.len() && self.input[self.pos].is_ascii_digit() {
                text.push(self.input[self.pos]);
                self.pos += 1;
            }
        }

        Token::new(TokenKind::NumberLiteral, text, col)
    }

    fn read_identifier_or_keyword(&mut self) -> Token {
        let col = self.col();
        let mut text = String::new();

        while self.pos < self.input.len()
            && (self.input[self.pos].is_ascii_alphanumeric() || self.input[self.pos] == '_')
        {
            text.push(self.input[self.pos]);
            self.pos += 1;
        }

        let kind = match text.as_str() {
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "null" => TokenKind::Null,
            _ => TokenKind::Identifier,
        };

        Token::new(kind, text, col)
    }

    fn skip_whitespace(&mut self) {
        while self.pos < self.input.len() && self.input[self.pos].is_whitespace() {
            self.pos += 1;
        }
    }

    fn col(&self) -> usize {
        self.pos + 1
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.input.get(self.pos + offset).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        Lexer::new(input)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_arithmetic_tokens() {
        assert_eq!(
            kinds("(a + b) / 2"),
            vec![
                TokenKind::OpenParen,
                TokenKind::Identifier,
                TokenKind::Plus,
                TokenKind::Identifier,
                TokenKind::CloseParen,
                TokenKind::Slash,
                TokenKind::NumberLiteral,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_two_char_operators() {
        assert_eq!(
            kinds("a >= 1 && b != 2 || !c"),
            vec![
                TokenKind::Identifier,
                TokenKind::GreaterEq,
                TokenKind::NumberLiteral,
                TokenKind::AndAnd,
                TokenKind::Identifier,
                TokenKind::NotEq,
                TokenKind::NumberLiteral,
                TokenKind::OrOr,
                TokenKind::Bang,
                TokenKind::Identifier,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_number_and_member_access() {
        let tokens = Lexer::new("2.5 + value.amount").tokenize().unwrap();
        assert_eq!(tokens[0].text, "2.5");
        assert_eq!(tokens[3].kind, TokenKind::Dot);
        assert_eq!(tokens[4].text, "amount");
    }

    #[test]
    fn test_string_literals() {
        let tokens = Lexer::new(r#"'it\'s' + "ok""#).tokenize().unwrap();
        assert_eq!(tokens[0].kind, TokenKind::StringLiteral);
        assert_eq!(tokens[0].text, "it's");
        assert_eq!(tokens[2].text, "ok");
    }

    #[test]
    fn test_keywords() {
        assert_eq!(
            kinds("true false null"),
            vec![TokenKind::True, TokenKind::False, TokenKind::Null, TokenKind::Eof]
        );
    }

    #[test]
    fn test_unterminated_string() {
        let err = Lexer::new("'open").tokenize().unwrap_err();
        assert!(matches!(err, ExprError::ParseError { col: 1, .. }));
    }

    #[test]
    fn test_unexpected_character() {
        let err = Lexer::new("a ; b").tokenize().unwrap_err();
        assert!(matches!(err, ExprError::ParseError { col: 3, .. }));
    }
}
