//! Parser: recursive descent over the formula grammar
//!
//! ```text
//! expr       := or
//! or         := and ( "||" and )*
//! and        := equality ( "&&" equality )*
//! equality   := comparison ( ( "==" | "!=" ) comparison )*
//! comparison := additive ( ( "<" | "<=" | ">" | ">=" ) additive )*
//! additive   := term ( ( "+" | "-" ) term )*
//! term       := unary ( ( "*" | "/" | "%" ) unary )*
//! unary      := ( "!" | "-" ) unary | postfix
//! postfix    := primary ( "." ident | "[" expr "]" )*
//! primary    := number | string | true | false | null
//!             | ident | ident "(" args? ")" | "(" expr ")" | "[" args? "]"
//! ```

use crate::ast::{BinaryOp, Expr, UnaryOp};
use crate::errors::{ExprError, ExprResult};
use crate::lexer::{Lexer, Token, TokenKind};
use serde_json::Value;

/// Parser for formula text
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    /// Parse formula text into an expression tree
    pub fn parse(input: &str) -> ExprResult<Expr> {
        let tokens = Lexer::new(input).tokenize()?;
        let mut parser = Self { tokens, pos: 0 };
        let expr = parser.parse_expr()?;
        if !parser.check(TokenKind::Eof) {
            let tok = parser.peek();
            return Err(ExprError::UnexpectedToken {
                col: tok.col,
                expected: "end of expression".into(),
                found: tok.text.clone(),
            });
        }
        Ok(expr)
    }

    fn parse_expr(&mut self) -> ExprResult<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> ExprResult<Expr> {
        let mut lhs = self.parse_and()?;
        while self.eat(TokenKind::OrOr) {
            let rhs = self.parse_and()?;
            lhs = binary(BinaryOp::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> ExprResult<Expr> {
        let mut lhs = self.parse_equality()?;
        while self.eat(TokenKind::AndAnd) {
            let rhs = self.parse_equality()?;
            lhs = binary(BinaryOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> ExprResult<Expr> {
        let mut lhs = self.parse_comparison()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::EqEq => BinaryOp::Eq,
                TokenKind::NotEq => BinaryOp::NotEq,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_comparison()?;
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> ExprResult<Expr> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Less => BinaryOp::Less,
                TokenKind::LessEq => BinaryOp::LessEq,
                TokenKind::Greater => BinaryOp::Greater,
                TokenKind::GreaterEq => BinaryOp::GreaterEq,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_additive()?;
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> ExprResult<Expr> {
        let mut lhs = self.parse_term()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_term()?;
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_term(&mut self) -> ExprResult<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Rem,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> ExprResult<Expr> {
        let op = match self.peek_kind() {
            TokenKind::Bang => UnaryOp::Not,
            TokenKind::Minus => UnaryOp::Neg,
            _ => return self.parse_postfix(),
        };
        self.advance();
        let operand = self.parse_unary()?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn parse_postfix(&mut self) -> ExprResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat(TokenKind::Dot) {
                let name = self.expect(TokenKind::Identifier)?.text.clone();
                expr = Expr::Field {
                    target: Box::new(expr),
                    name,
                };
            } else if self.eat(TokenKind::OpenBracket) {
                let index = self.parse_expr()?;
                self.expect(TokenKind::CloseBracket)?;
                expr = Expr::Index {
                    target: Box::new(expr),
                    index: Box::new(index),
                };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> ExprResult<Expr> {
        let tok = self.peek().clone();
        match tok.kind {
            TokenKind::NumberLiteral => {
                self.advance();
                Ok(Expr::Literal(parse_number(&tok)?))
            }
            TokenKind::StringLiteral => {
                self.advance();
                Ok(Expr::Literal(Value::String(tok.text)))
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::Literal(Value::Bool(true)))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::Literal(Value::Bool(false)))
            }
            TokenKind::Null => {
                self.advance();
                Ok(Expr::Literal(Value::Null))
            }
            TokenKind::Identifier => {
                self.advance();
                if self.eat(TokenKind::OpenParen) {
                    let args = self.parse_args(TokenKind::CloseParen)?;
                    Ok(Expr::Call {
                        function: tok.text,
                        args,
                    })
                } else {
                    Ok(Expr::Identifier(tok.text))
                }
            }
            TokenKind::OpenParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(TokenKind::CloseParen)?;
                Ok(inner)
            }
            TokenKind::OpenBracket => {
                self.advance();
                Ok(Expr::List(self.parse_args(TokenKind::CloseBracket)?))
            }
            TokenKind::Eof => Err(ExprError::UnexpectedEof("an operand".into())),
            _ => Err(ExprError::UnexpectedToken {
                col: tok.col,
                expected: "an operand".into(),
                found: tok.text,
            }),
        }
    }

    /// Comma-separated expressions up to and including `close`
    fn parse_args(&mut self, close: TokenKind) -> ExprResult<Vec<Expr>> {
        let mut args = Vec::new();
        if self.eat(close) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr()?);
            if self.eat(close) {
                return Ok(args);
            }
            self.expect(TokenKind::Comma)?;
        }
    }

    // ── Helpers ──────────────────────────────────────────────────────

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek().kind
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn advance(&mut self) -> &Token {
        let idx = self.pos.min(self.tokens.len() - 1);
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        &self.tokens[idx]
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> ExprResult<&Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else if self.check(TokenKind::Eof) {
            Err(ExprError::UnexpectedEof(kind.to_string()))
        } else {
            let tok = self.peek();
            Err(ExprError::UnexpectedToken {
                col: tok.col,
                expected: kind.to_string(),
                found: tok.text.clone(),
            })
        }
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

fn parse_number(tok: &Token) -> ExprResult<Value> {
    if let Ok(n) = tok.text.parse::<i64>() {
        return Ok(Value::from(n));
    }
    tok.text
        .parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| ExprError::ParseError {
            col: tok.col,
            message: format!("'{}' is not a valid number", tok.text),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ident(name: &str) -> Expr {
        Expr::Identifier(name.into())
    }

    #[test]
    fn test_precedence() {
        let expr = Parser::parse("a + b * 2").unwrap();
        assert_eq!(
            expr,
            binary(
                BinaryOp::Add,
                ident("a"),
                binary(BinaryOp::Mul, ident("b"), Expr::Literal(json!(2)))
            )
        );
    }

    #[test]
    fn test_grouping() {
        let expr = Parser::parse("(a + b) / 2").unwrap();
        assert!(matches!(expr, Expr::Binary { op: BinaryOp::Div, .. }));
    }

    #[test]
    fn test_left_associative() {
        let expr = Parser::parse("10 - 4 - 3").unwrap();
        assert_eq!(
            expr,
            binary(
                BinaryOp::Sub,
                binary(BinaryOp::Sub, Expr::Literal(json!(10)), Expr::Literal(json!(4))),
                Expr::Literal(json!(3))
            )
        );
    }

    #[test]
    fn test_postfix_chain() {
        let expr = Parser::parse("batch[0].amount").unwrap();
        match expr {
            Expr::Field { target, name } => {
                assert_eq!(name, "amount");
                assert!(matches!(*target, Expr::Index { .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_call_and_list() {
        let expr = Parser::parse("max([1, 2], a)").unwrap();
        match expr {
            Expr::Call { function, args } => {
                assert_eq!(function, "max");
                assert_eq!(args.len(), 2);
                assert!(matches!(args[0], Expr::List(ref items) if items.len() == 2));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            Parser::parse("count()").unwrap(),
            Expr::Call {
                function: "count".into(),
                args: vec![]
            }
        );
    }

    #[test]
    fn test_logical_precedence() {
        let expr = Parser::parse("!a || b && c").unwrap();
        match expr {
            Expr::Binary { op, lhs, .. } => {
                assert_eq!(op, BinaryOp::Or);
                assert!(matches!(*lhs, Expr::Unary { op: UnaryOp::Not, .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_float_literal() {
        assert_eq!(Parser::parse("2.5").unwrap(), Expr::Literal(json!(2.5)));
    }

    #[test]
    fn test_trailing_tokens_rejected() {
        let err = Parser::parse("a b").unwrap_err();
        assert!(matches!(err, ExprError::UnexpectedToken { col: 3, .. }));
    }

    #[test]
    fn test_missing_operand() {
        assert!(matches!(
            Parser::parse("a +").unwrap_err(),
            ExprError::UnexpectedEof(_)
        ));
        assert!(matches!(
            Parser::parse("(a").unwrap_err(),
            ExprError::UnexpectedEof(_)
        ));
    }

    #[test]
    fn test_identifiers_collected_once() {
        let expr = Parser::parse("a + b + a * sum(batch)").unwrap();
        assert_eq!(expr.identifiers(), vec!["a", "b", "batch"]);
    }
}
