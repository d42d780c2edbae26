// src/analyzer/parser/statements.rs
use super::cursor::{PResult, TokenCursor};
use super::expr::ExpressionParser;
use crate::analyzer::ast::{Span, Statement, StatementScope};
use crate::analyzer::token::TokenKind;

/// Tokens scanned ahead of a `return` when deciding whether to parse its value.
const RETURN_LOOKAHEAD: usize = 128;

/// Brace-delimited statement scopes.
///
/// Only the block structure and `return` values are modelled; every other
/// token inside a body is kept as an `Unknown` statement so that arbitrary
/// valid code is accepted.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatementParser {
    expressions: ExpressionParser,
}

impl StatementParser {
    pub fn parse_scope(&self, cursor: &mut TokenCursor<'_>) -> PResult<StatementScope> {
        let begin = cursor.expect(TokenKind::OpenCurly)?.file_pos;
        let mut statements = Vec::new();

        loop {
            match cursor.peek_kind(0) {
                None => return cursor.err_here(TokenKind::CloseCurly.to_string()),
                Some(TokenKind::CloseCurly) => break,
                Some(TokenKind::OpenCurly) => {
                    statements.push(Statement::Scope(cursor.nested(|c| self.parse_scope(c))?));
                }
                Some(TokenKind::Return) => statements.push(self.parse_return(cursor)?),
                Some(_) => {
                    if let Some(token) = cursor.bump() {
                        statements.push(Statement::Unknown(token.clone()));
                    }
                }
            }
        }

        let end = cursor.expect(TokenKind::CloseCurly)?.file_pos;
        Ok(StatementScope {
            span: Span::new(begin, end),
            statements,
        })
    }

    fn parse_return(&self, cursor: &mut TokenCursor<'_>) -> PResult<Statement> {
        let Some(keyword) = cursor.peek().cloned() else {
            return cursor.err_here("'return'");
        };

        let value_follows = cursor.peek_kind(1) != Some(TokenKind::Semi);
        if value_follows {
            let mut lookahead = cursor.clone();
            lookahead.bump();
            if !self.expressions.is_simple_expression(&lookahead, RETURN_LOOKAHEAD) {
                cursor.bump();
                return Ok(Statement::Unknown(keyword));
            }
        }

        cursor.bump();
        let value = if value_follows {
            Some(self.expressions.parse(cursor)?)
        } else {
            None
        };
        cursor.expect(TokenKind::Semi)?;

        Ok(Statement::Return {
            value,
            file_pos: keyword.file_pos,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::ast::Expr;
    use crate::analyzer::lexer::tokenize;

    fn parse_scope(src: &str) -> PResult<StatementScope> {
        let tokens = tokenize(src);
        let mut cursor = TokenCursor::new(&tokens);
        StatementParser::default().parse_scope(&mut cursor)
    }

    #[test]
    fn test_nested_scopes_record_brace_offsets() {
        let src = "{ if (x) { y(); } }";
        let scope = parse_scope(src).unwrap();
        assert_eq!(scope.span, Span::new(0, 18));
        let inner = scope
            .statements
            .iter()
            .find_map(|s| match s {
                Statement::Scope(inner) => Some(inner),
                _ => None,
            })
            .unwrap();
        assert_eq!(inner.span, Span::new(9, 16));
        assert!(scope.span.contains(&inner.span));
    }

    #[test]
    fn test_simple_return_is_parsed() {
        let scope = parse_scope("{ return a + b; }").unwrap();
        assert!(matches!(
            scope.statements[0],
            Statement::Return {
                value: Some(Expr::Binary { .. }),
                file_pos: 2
            }
        ));
    }

    #[test]
    fn test_complex_return_falls_back_to_tokens() {
        let scope = parse_scope("{ return new int[] {1, 2}; }").unwrap();
        assert!(matches!(scope.statements[0], Statement::Unknown(_)));
        assert_eq!(scope.span.end, 27);
    }

    #[test]
    fn test_unclosed_scope_expects_brace() {
        let err = parse_scope("{ int x = 1;").unwrap_err();
        assert_eq!(err.expected, "'}'");
        assert_eq!(err.at_offset, 12);
    }
}
