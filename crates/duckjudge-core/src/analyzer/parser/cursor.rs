// src/analyzer/parser/cursor.rs
use crate::analyzer::token::{Token, TokenKind};
use crate::errors::SyntaxError;

pub type PResult<T> = Result<T, SyntaxError>;

/// Deepest recursion any parser component may reach.
pub const MAX_NESTING: usize = 128;

/// Read position over a token slice with fixed lookahead.
///
/// Every parser component drives the same cursor; none of them ever rewinds it.
#[derive(Debug, Clone)]
pub struct TokenCursor<'t> {
    tokens: &'t [Token],
    pos: usize,
    eof_offset: usize,
    depth: usize,
}

impl<'t> TokenCursor<'t> {
    pub fn new(tokens: &'t [Token]) -> Self {
        let eof_offset = tokens.last().map(|t| t.source_end).unwrap_or(0);
        Self {
            tokens,
            pos: 0,
            eof_offset,
            depth: 0,
        }
    }

    pub fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos)
    }

    pub fn peek_at(&self, offset: usize) -> Option<&'t Token> {
        self.tokens.get(self.pos + offset)
    }

    pub fn peek_kind(&self, offset: usize) -> Option<TokenKind> {
        self.peek_at(offset).map(|t| t.kind)
    }

    pub fn at(&self, kind: TokenKind) -> bool {
        self.peek_kind(0) == Some(kind)
    }

    pub fn is_at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    /// Byte offset of the next token, or of the end of input.
    pub fn offset(&self) -> usize {
        self.peek().map(|t| t.file_pos).unwrap_or(self.eof_offset)
    }

    pub fn bump(&mut self) -> Option<&'t Token> {
        let token = self.tokens.get(self.pos)?;
        self.pos += 1;
        Some(token)
    }

    pub fn consume(&mut self, kind: TokenKind) -> Option<&'t Token> {
        if self.at(kind) {
            self.bump()
        } else {
            None
        }
    }

    pub fn expect(&mut self, kind: TokenKind) -> PResult<&'t Token> {
        match self.consume(kind) {
            Some(token) => Ok(token),
            None => self.err_here(kind.to_string()),
        }
    }

    pub fn expect_ident(&mut self, what: &str) -> PResult<&'t Token> {
        match self.consume(TokenKind::Ident) {
            Some(token) => Ok(token),
            None => self.err_here(what),
        }
    }

    pub fn err_here<T>(&self, expected: impl Into<String>) -> PResult<T> {
        Err(SyntaxError::new(expected, self.offset()))
    }

    /// Runs `f` one nesting level deeper, failing instead of recursing past
    /// [`MAX_NESTING`].
    pub fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        if self.depth >= MAX_NESTING {
            return self.err_here("less deeply nested code");
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    /// Skips a balanced `open ... close` group starting at the current token.
    pub fn skip_balanced(&mut self, open: TokenKind, close: TokenKind) -> PResult<()> {
        self.expect(open)?;
        let mut depth = 1usize;
        while depth > 0 {
            match self.bump() {
                Some(t) if t.kind == open => depth += 1,
                Some(t) if t.kind == close => depth -= 1,
                Some(_) => {}
                None => return self.err_here(close.to_string()),
            }
        }
        Ok(())
    }

    /// Parses `a.b.c`, returning the dotted name.
    pub fn qualified_name(&mut self, what: &str) -> PResult<String> {
        let mut name = self.expect_ident(what)?.value.clone();
        while self.at(TokenKind::Dot) && self.peek_kind(1) == Some(TokenKind::Ident) {
            self.bump();
            if let Some(segment) = self.bump() {
                name.push('.');
                name.push_str(&segment.value);
            }
        }
        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::lexer::tokenize;

    #[test]
    fn test_expect_reports_offset_of_offending_token() {
        let tokens = tokenize("class 42");
        let mut cursor = TokenCursor::new(&tokens);
        cursor.expect(TokenKind::Class).unwrap();
        let err = cursor.expect_ident("class name").unwrap_err();
        assert_eq!(err, SyntaxError::new("class name", 6));
    }

    #[test]
    fn test_eof_errors_name_what_was_expected() {
        let tokens = tokenize("(a, b");
        let mut cursor = TokenCursor::new(&tokens);
        let err = cursor
            .skip_balanced(TokenKind::OpenParen, TokenKind::CloseParen)
            .unwrap_err();
        assert_eq!(err.expected, "')'");
        assert_eq!(err.at_offset, 5);
    }

    #[test]
    fn test_nesting_is_bounded() {
        let tokens = tokenize("x");
        let mut cursor = TokenCursor::new(&tokens);
        fn dive(cursor: &mut TokenCursor<'_>, levels: usize) -> PResult<usize> {
            if levels == 0 {
                return Ok(0);
            }
            cursor.nested(|c| dive(c, levels - 1)).map(|n| n + 1)
        }
        assert_eq!(dive(&mut cursor, MAX_NESTING).unwrap(), MAX_NESTING);
        let err = dive(&mut cursor, MAX_NESTING + 1).unwrap_err();
        assert_eq!(err.expected, "less deeply nested code");
    }

    #[test]
    fn test_qualified_name_stops_before_wildcard() {
        let tokens = tokenize("java.util.*;");
        let mut cursor = TokenCursor::new(&tokens);
        assert_eq!(cursor.qualified_name("package").unwrap(), "java.util");
        assert!(cursor.at(TokenKind::Dot));
    }

    #[test]
    fn test_end_of_input_offset_follows_the_source_text() {
        let tokens = tokenize("x = \"abc\"");
        let mut cursor = TokenCursor::new(&tokens);
        while cursor.bump().is_some() {}
        assert_eq!(cursor.offset(), 9);

        let tokens = tokenize("long x = 0x1FL");
        let mut cursor = TokenCursor::new(&tokens);
        let err = cursor
            .skip_balanced(TokenKind::Long, TokenKind::Semi)
            .unwrap_err();
        assert_eq!(err.at_offset, 14);
    }
}
