// src/analyzer/parser/expr.rs
//! Precedence-climbing expression parser.

use super::cursor::{PResult, TokenCursor};
use crate::analyzer::ast::{BinaryOp, Expr, PostfixOp, UnaryOp};
use crate::analyzer::token::{Token, TokenKind};

#[derive(Debug, Clone, Copy, Default)]
pub struct ExpressionParser;

impl ExpressionParser {
    pub fn parse(&self, cursor: &mut TokenCursor<'_>) -> PResult<Expr> {
        cursor.nested(|c| self.parse_binary(c, 1))
    }

    fn parse_binary(&self, cursor: &mut TokenCursor<'_>, min_prec: u8) -> PResult<Expr> {
        let mut lhs = self.parse_unary(cursor)?;

        while let Some((op, width)) = self.peek_binary_op(cursor) {
            let prec = op.precedence();
            if prec < min_prec {
                break;
            }
            for _ in 0..width {
                cursor.bump();
            }
            let rhs = self.parse_binary(cursor, prec + 1)?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }

        Ok(lhs)
    }

    /// The binary operator at the cursor and how many tokens spell it.
    fn peek_binary_op(&self, cursor: &TokenCursor<'_>) -> Option<(BinaryOp, usize)> {
        let op = match cursor.peek_kind(0)? {
            TokenKind::Mul => BinaryOp::Mul,
            TokenKind::Div => BinaryOp::Div,
            TokenKind::Mod => BinaryOp::Mod,
            TokenKind::Plus => BinaryOp::Add,
            TokenKind::Minus => BinaryOp::Sub,
            TokenKind::Shl => BinaryOp::Shl,
            TokenKind::OpenChevron => BinaryOp::Lt,
            TokenKind::Le => BinaryOp::Le,
            TokenKind::Ge => BinaryOp::Ge,
            TokenKind::Eq => BinaryOp::Eq,
            TokenKind::Neq => BinaryOp::Neq,
            TokenKind::BitAnd => BinaryOp::BitAnd,
            TokenKind::BitXor => BinaryOp::BitXor,
            TokenKind::BitOr => BinaryOp::BitOr,
            TokenKind::LogAnd => BinaryOp::LogAnd,
            TokenKind::LogOr => BinaryOp::LogOr,
            TokenKind::CloseChevron => return Some(right_shift_run(cursor)),
            _ => return None,
        };
        Some((op, 1))
    }

    fn parse_unary(&self, cursor: &mut TokenCursor<'_>) -> PResult<Expr> {
        let op = match cursor.peek_kind(0) {
            Some(TokenKind::Minus) => Some(UnaryOp::Neg),
            Some(TokenKind::Plus) => Some(UnaryOp::Plus),
            Some(TokenKind::Not) => Some(UnaryOp::Not),
            Some(TokenKind::Tilde) => Some(UnaryOp::BitNot),
            Some(TokenKind::Increment) => Some(UnaryOp::PreIncrement),
            Some(TokenKind::Decrement) => Some(UnaryOp::PreDecrement),
            _ => None,
        };

        match op {
            Some(op) => {
                cursor.bump();
                let operand = cursor.nested(|c| self.parse_unary(c))?;
                Ok(Expr::Unary {
                    op,
                    operand: Box::new(operand),
                })
            }
            None => self.parse_postfix(cursor),
        }
    }

    fn parse_postfix(&self, cursor: &mut TokenCursor<'_>) -> PResult<Expr> {
        let mut expr = self.parse_primary(cursor)?;

        loop {
            match cursor.peek_kind(0) {
                Some(TokenKind::Dot) => {
                    cursor.bump();
                    let name = cursor.expect_ident("member name")?.value.clone();
                    if cursor.at(TokenKind::OpenParen) {
                        let args = self.parse_args(cursor)?;
                        expr = Expr::Call {
                            target: Some(Box::new(expr)),
                            name,
                            args,
                        };
                    } else {
                        expr = Expr::Field {
                            target: Box::new(expr),
                            name,
                        };
                    }
                }
                Some(TokenKind::OpenBracket) => {
                    cursor.bump();
                    let index = self.parse(cursor)?;
                    cursor.expect(TokenKind::CloseBracket)?;
                    expr = Expr::Index {
                        target: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                Some(TokenKind::Increment) => {
                    cursor.bump();
                    expr = Expr::Postfix {
                        op: PostfixOp::Increment,
                        operand: Box::new(expr),
                    };
                }
                Some(TokenKind::Decrement) => {
                    cursor.bump();
                    expr = Expr::Postfix {
                        op: PostfixOp::Decrement,
                        operand: Box::new(expr),
                    };
                }
                _ => break,
            }
        }

        Ok(expr)
    }

    fn parse_primary(&self, cursor: &mut TokenCursor<'_>) -> PResult<Expr> {
        let Some(token) = cursor.peek() else {
            return cursor.err_here("expression");
        };

        match token.kind {
            kind if kind.is_literal() => {
                cursor.bump();
                Ok(Expr::Literal(token.clone()))
            }
            TokenKind::This => {
                cursor.bump();
                Ok(Expr::This)
            }
            TokenKind::OpenParen => {
                cursor.bump();
                let inner = self.parse(cursor)?;
                cursor.expect(TokenKind::CloseParen)?;
                Ok(inner)
            }
            TokenKind::Ident => {
                cursor.bump();
                if cursor.at(TokenKind::OpenParen) {
                    let args = self.parse_args(cursor)?;
                    Ok(Expr::Call {
                        target: None,
                        name: token.value.clone(),
                        args,
                    })
                } else {
                    Ok(Expr::Name(token.value.clone()))
                }
            }
            _ => cursor.err_here("expression"),
        }
    }

    fn parse_args(&self, cursor: &mut TokenCursor<'_>) -> PResult<Vec<Expr>> {
        cursor.expect(TokenKind::OpenParen)?;
        let mut args = Vec::new();
        if cursor.consume(TokenKind::CloseParen).is_some() {
            return Ok(args);
        }
        loop {
            args.push(self.parse(cursor)?);
            if cursor.consume(TokenKind::Comma).is_none() {
                break;
            }
        }
        cursor.expect(TokenKind::CloseParen)?;
        Ok(args)
    }

    /// True when the tokens up to the next `;` form an expression this parser
    /// accepts. Scans at most `limit` tokens and never consumes.
    pub fn is_simple_expression(&self, cursor: &TokenCursor<'_>, limit: usize) -> bool {
        let mut depth: i32 = 0;
        let mut prev: Option<&Token> = None;

        for offset in 0..limit {
            let Some(token) = cursor.peek_at(offset) else {
                return false;
            };
            let kind = token.kind;

            if kind == TokenKind::Semi && depth == 0 {
                return true;
            }

            let term_like = |k: TokenKind| {
                k.is_literal()
                    || matches!(
                        k,
                        TokenKind::Ident
                            | TokenKind::This
                            | TokenKind::CloseParen
                            | TokenKind::CloseBracket
                    )
            };
            let starts_term = kind.is_literal()
                || matches!(kind, TokenKind::Ident | TokenKind::This | TokenKind::OpenParen);
            if let Some(p) = prev {
                let is_call = p.kind == TokenKind::Ident && kind == TokenKind::OpenParen;
                // Casts, `instanceof` and other juxtapositions.
                if term_like(p.kind) && starts_term && !is_call {
                    return false;
                }
                if p.kind == TokenKind::Dot && kind != TokenKind::Ident {
                    return false;
                }
                // `>>=` arrives as `>` followed by `>=`.
                if p.kind == TokenKind::CloseChevron
                    && kind == TokenKind::Ge
                    && p.file_pos + 1 == token.file_pos
                {
                    return false;
                }
            }

            match kind {
                TokenKind::OpenParen | TokenKind::OpenBracket => depth += 1,
                TokenKind::CloseParen | TokenKind::CloseBracket => {
                    depth -= 1;
                    if depth < 0 {
                        return false;
                    }
                }
                k if k.is_literal() => {}
                TokenKind::Ident
                | TokenKind::This
                | TokenKind::Dot
                | TokenKind::Comma
                | TokenKind::Mul
                | TokenKind::Div
                | TokenKind::Mod
                | TokenKind::Plus
                | TokenKind::Minus
                | TokenKind::Shl
                | TokenKind::OpenChevron
                | TokenKind::CloseChevron
                | TokenKind::Le
                | TokenKind::Ge
                | TokenKind::Eq
                | TokenKind::Neq
                | TokenKind::BitAnd
                | TokenKind::BitXor
                | TokenKind::BitOr
                | TokenKind::LogAnd
                | TokenKind::LogOr
                | TokenKind::Not
                | TokenKind::Tilde
                | TokenKind::Increment
                | TokenKind::Decrement => {}
                _ => return false,
            }

            prev = Some(token);
        }

        false
    }
}

/// `>` alone is less-than's mirror; two or three byte-adjacent `>` are shifts.
fn right_shift_run(cursor: &TokenCursor<'_>) -> (BinaryOp, usize) {
    let mut run = 1;
    while run < 3 {
        match (cursor.peek_at(run - 1), cursor.peek_at(run)) {
            (Some(prev), Some(next))
                if next.kind == TokenKind::CloseChevron && prev.file_pos + 1 == next.file_pos =>
            {
                run += 1
            }
            _ => break,
        }
    }
    match run {
        1 => (BinaryOp::Gt, 1),
        2 => (BinaryOp::Shr, 2),
        _ => (BinaryOp::UShr, 3),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::lexer::tokenize;

    fn parse(src: &str) -> PResult<Expr> {
        let tokens = tokenize(src);
        let mut cursor = TokenCursor::new(&tokens);
        ExpressionParser.parse(&mut cursor)
    }

    fn lit(expr: &Expr) -> &str {
        match expr {
            Expr::Literal(t) => &t.value,
            other => panic!("expected literal, got {:?}", other),
        }
    }

    #[test]
    fn test_multiplication_binds_tighter() {
        let Expr::Binary { op, lhs, rhs } = parse("1 + 2 * 3").unwrap() else {
            panic!("expected binary");
        };
        assert_eq!(op, BinaryOp::Add);
        assert_eq!(lit(&lhs), "1");
        assert!(matches!(*rhs, Expr::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn test_left_associativity() {
        let Expr::Binary { op, lhs, .. } = parse("8 - 4 - 2").unwrap() else {
            panic!("expected binary");
        };
        assert_eq!(op, BinaryOp::Sub);
        assert!(matches!(*lhs, Expr::Binary { op: BinaryOp::Sub, .. }));
    }

    #[test]
    fn test_shifts_compose_from_adjacent_chevrons() {
        assert!(matches!(
            parse("a >> 2").unwrap(),
            Expr::Binary { op: BinaryOp::Shr, .. }
        ));
        assert!(matches!(
            parse("a >>> 2").unwrap(),
            Expr::Binary { op: BinaryOp::UShr, .. }
        ));
        assert!(matches!(
            parse("a > b").unwrap(),
            Expr::Binary { op: BinaryOp::Gt, .. }
        ));
    }

    #[test]
    fn test_calls_indexing_and_postfix() {
        let expr = parse("nums[i++] + list.get(0).size() - -x").unwrap();
        assert!(matches!(expr, Expr::Binary { op: BinaryOp::Sub, .. }));
    }

    #[test]
    fn test_eof_mid_expression_names_expectation() {
        let err = parse("1 +").unwrap_err();
        assert_eq!(err.expected, "expression");
        assert_eq!(err.at_offset, 3);
    }

    #[test]
    fn test_simple_expression_guard() {
        let check = |src: &str| {
            let tokens = tokenize(src);
            let cursor = TokenCursor::new(&tokens);
            ExpressionParser.is_simple_expression(&cursor, 64)
        };
        assert!(check("a + f(b, c[1]);"));
        assert!(check("x >> 1;"));
        assert!(!check("(int) x;"));
        assert!(!check("x instanceof String;"));
        assert!(!check("new int[3];"));
        assert!(!check("a ? b : c;"));
        assert!(!check("x >>= 1;"));
        assert!(!check("a + b"));
    }
}
