// src/analyzer/lexer.rs
//! Tokenizer for submitted Java sources.
//!
//! The lexer is total: it never fails, whatever bytes it is handed. Characters
//! it does not recognise come out as single-character `Ident` tokens and are
//! left for the parser to reject. Numeric literals are normalised here (radix
//! prefixes resolved to decimal, `_` separators and type suffixes dropped) so
//! nothing downstream re-parses numeric text.
//!
//! `>` is always emitted on its own. Nested generic arguments close with `>>`
//! and `>>>`, so shift operators are composed later by the expression parser
//! from byte-adjacent `>` tokens.

use super::token::{Token, TokenKind};

/// Operators and separators, longest spelling first.
const OPERATORS: &[(&str, TokenKind)] = &[
    ("...", TokenKind::Ellipsis),
    ("<<=", TokenKind::ShlAssign),
    ("::", TokenKind::DoubleColon),
    ("->", TokenKind::Arrow),
    ("==", TokenKind::Eq),
    ("!=", TokenKind::Neq),
    ("<=", TokenKind::Le),
    (">=", TokenKind::Ge),
    ("&&", TokenKind::LogAnd),
    ("||", TokenKind::LogOr),
    ("++", TokenKind::Increment),
    ("--", TokenKind::Decrement),
    ("+=", TokenKind::PlusAssign),
    ("-=", TokenKind::MinusAssign),
    ("*=", TokenKind::MulAssign),
    ("/=", TokenKind::DivAssign),
    ("%=", TokenKind::ModAssign),
    ("&=", TokenKind::AndAssign),
    ("|=", TokenKind::OrAssign),
    ("^=", TokenKind::XorAssign),
    ("<<", TokenKind::Shl),
    ("{", TokenKind::OpenCurly),
    ("}", TokenKind::CloseCurly),
    ("[", TokenKind::OpenBracket),
    ("]", TokenKind::CloseBracket),
    ("(", TokenKind::OpenParen),
    (")", TokenKind::CloseParen),
    (";", TokenKind::Semi),
    (",", TokenKind::Comma),
    (".", TokenKind::Dot),
    ("@", TokenKind::At),
    ("?", TokenKind::Question),
    (":", TokenKind::Colon),
    ("=", TokenKind::Assign),
    ("!", TokenKind::Not),
    ("~", TokenKind::Tilde),
    ("+", TokenKind::Plus),
    ("-", TokenKind::Minus),
    ("*", TokenKind::Mul),
    ("/", TokenKind::Div),
    ("%", TokenKind::Mod),
    ("<", TokenKind::OpenChevron),
    (">", TokenKind::CloseChevron),
    ("&", TokenKind::BitAnd),
    ("|", TokenKind::BitOr),
    ("^", TokenKind::BitXor),
];

pub fn tokenize(source: &str) -> Vec<Token> {
    Lexer::new(source).run()
}

#[derive(Debug, Clone)]
pub struct Lexer<'a> {
    src: &'a str,
    i: usize,
    len: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            src,
            i: 0,
            len: src.len(),
        }
    }

    fn peek(&self) -> Option<char> {
        if self.i >= self.len {
            return None;
        }
        self.src[self.i..].chars().next()
    }

    fn peek_nth(&self, n: usize) -> Option<char> {
        if self.i >= self.len {
            return None;
        }
        self.src[self.i..].chars().nth(n)
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.i += ch.len_utf8();
        Some(ch)
    }

    fn starts_with(&self, s: &str) -> bool {
        self.i < self.len && self.src[self.i..].starts_with(s)
    }

    fn eat_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let start = self.i;
        while matches!(self.peek(), Some(c) if pred(c)) {
            self.bump();
        }
        &self.src[start..self.i]
    }

    pub fn run(mut self) -> Vec<Token> {
        let mut tokens = Vec::new();

        while let Some(c) = self.peek() {
            let start = self.i;

            if c.is_whitespace() {
                self.bump();
                continue;
            }
            if self.starts_with("//") {
                self.eat_while(|c| c != '\n');
                continue;
            }
            if self.starts_with("/*") {
                self.skip_block_comment();
                continue;
            }

            let mut token = if c == '"' {
                self.lex_string(start)
            } else if c == '\'' {
                self.lex_char(start)
            } else if c.is_ascii_digit()
                || (c == '.' && matches!(self.peek_nth(1), Some(d) if d.is_ascii_digit()))
            {
                self.lex_number(start)
            } else if is_ident_start(c) {
                let word = self.eat_while(is_ident_continue);
                let kind = TokenKind::keyword(word).unwrap_or(TokenKind::Ident);
                Token::new(kind, word, start)
            } else if let Some(&(spelling, kind)) =
                OPERATORS.iter().find(|(spelling, _)| self.starts_with(spelling))
            {
                self.i += spelling.len();
                Token::new(kind, spelling, start)
            } else {
                self.bump();
                Token::new(TokenKind::Ident, &self.src[start..self.i], start)
            };
            token.source_end = self.i;

            tokens.push(token);
        }

        tokens
    }

    fn skip_block_comment(&mut self) {
        self.i += 2;
        while self.i < self.len {
            if self.starts_with("*/") {
                self.i += 2;
                return;
            }
            self.bump();
        }
    }

    fn lex_string(&mut self, start: usize) -> Token {
        if self.starts_with("\"\"\"") {
            self.i += 3;
            let body_start = self.i;
            while self.i < self.len && !self.starts_with("\"\"\"") {
                if self.bump() == Some('\\') {
                    self.bump();
                }
            }
            let body = &self.src[body_start..self.i.min(self.len)];
            if self.starts_with("\"\"\"") {
                self.i += 3;
            }
            return Token::new(TokenKind::StringLit, body, start);
        }

        self.bump();
        let body_start = self.i;
        let mut body_end = self.len;
        while let Some(c) = self.peek() {
            match c {
                '\\' => {
                    self.bump();
                    self.bump();
                }
                '"' => {
                    body_end = self.i;
                    self.bump();
                    break;
                }
                '\n' => {
                    body_end = self.i;
                    break;
                }
                _ => {
                    self.bump();
                }
            }
        }
        Token::new(
            TokenKind::StringLit,
            &self.src[body_start..body_end.min(self.len)],
            start,
        )
    }

    fn lex_char(&mut self, start: usize) -> Token {
        self.bump();
        let body_start = self.i;
        let mut body_end = self.len;
        while let Some(c) = self.peek() {
            match c {
                '\\' => {
                    self.bump();
                    self.bump();
                }
                '\'' => {
                    body_end = self.i;
                    self.bump();
                    break;
                }
                '\n' => {
                    body_end = self.i;
                    break;
                }
                _ => {
                    self.bump();
                }
            }
        }
        Token::new(
            TokenKind::CharLit,
            &self.src[body_start..body_end.min(self.len)],
            start,
        )
    }

    fn lex_number(&mut self, start: usize) -> Token {
        if self.starts_with("0x") || self.starts_with("0X") {
            return self.lex_radix(start, 16);
        }
        if self.starts_with("0b") || self.starts_with("0B") {
            return self.lex_radix(start, 2);
        }

        let int_part = self.eat_while(|c| c.is_ascii_digit() || c == '_');
        let mut text: String = int_part.chars().filter(|&c| c != '_').collect();
        let mut fractional = false;

        // `1.` is a complete double literal, so the dot belongs to the number
        // even when no digits follow it.
        let digit_follows = matches!(self.peek_nth(1), Some(d) if d.is_ascii_digit());
        if self.peek() == Some('.') && (digit_follows || !int_part.is_empty()) && !self.starts_with("...") {
            self.bump();
            let frac = self.eat_while(|c| c.is_ascii_digit() || c == '_');
            text.push('.');
            text.extend(frac.chars().filter(|&c| c != '_'));
            if frac.is_empty() {
                text.push('0');
            }
            fractional = true;
        }

        if matches!(self.peek(), Some('e') | Some('E')) {
            let sign_len = usize::from(matches!(self.peek_nth(1), Some('+') | Some('-')));
            if matches!(self.peek_nth(1 + sign_len), Some(d) if d.is_ascii_digit()) {
                let exp_start = self.i;
                self.i += 1 + sign_len;
                self.eat_while(|c| c.is_ascii_digit());
                text.push_str(&self.src[exp_start..self.i]);
                fractional = true;
            }
        }

        if text.starts_with('.') {
            text.insert(0, '0');
        }

        let kind = match self.peek() {
            Some('l') | Some('L') if !fractional => {
                self.bump();
                TokenKind::LongLit
            }
            Some('f') | Some('F') => {
                self.bump();
                TokenKind::FloatLit
            }
            Some('d') | Some('D') => {
                self.bump();
                TokenKind::DoubleLit
            }
            _ if fractional => TokenKind::DoubleLit,
            _ => TokenKind::IntLit,
        };

        if matches!(kind, TokenKind::IntLit | TokenKind::LongLit) && is_octal_literal(&text) {
            if let Ok(value) = u128::from_str_radix(&text[1..], 8) {
                text = value.to_string();
            }
        }

        Token::new(kind, text, start)
    }

    fn lex_radix(&mut self, start: usize, radix: u32) -> Token {
        self.i += 2;
        let digits = self.eat_while(|c| c.is_ascii_hexdigit() || c == '_');
        let cleaned: String = digits.chars().filter(|&c| c != '_').collect();

        // Hexadecimal floating point keeps its spelling.
        if radix == 16 && matches!(self.peek(), Some('.') | Some('p') | Some('P')) {
            self.eat_while(|c| c.is_ascii_hexdigit() || matches!(c, '.' | 'p' | 'P' | '+' | '-'));
            let kind = match self.peek() {
                Some('f') | Some('F') => {
                    self.bump();
                    TokenKind::FloatLit
                }
                Some('d') | Some('D') => {
                    self.bump();
                    TokenKind::DoubleLit
                }
                _ => TokenKind::DoubleLit,
            };
            return Token::new(kind, &self.src[start..self.i], start);
        }

        let kind = if matches!(self.peek(), Some('l') | Some('L')) {
            self.bump();
            TokenKind::LongLit
        } else {
            TokenKind::IntLit
        };

        let value = u128::from_str_radix(&cleaned, radix)
            .map(|v| v.to_string())
            .unwrap_or_else(|_| self.src[start..self.i].to_string());
        Token::new(kind, value, start)
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

fn is_octal_literal(text: &str) -> bool {
    text.len() > 1 && text.starts_with('0') && text.chars().all(|c| ('0'..='7').contains(&c))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_minimal_class() {
        let tokens = tokenize("public class Test {}");
        assert_eq!(tokens.len(), 5);
        assert_eq!(
            tokens.iter().map(|t| t.kind).collect::<Vec<_>>(),
            vec![
                TokenKind::Public,
                TokenKind::Class,
                TokenKind::Ident,
                TokenKind::OpenCurly,
                TokenKind::CloseCurly
            ]
        );
        assert_eq!(tokens[2].value, "Test");
        assert_eq!(tokens[3].file_pos, 18);
    }

    #[test]
    fn test_numeric_normalization() {
        let hex = tokenize("0x1A");
        assert_eq!(hex, vec![Token::spanning(TokenKind::IntLit, "26", 0, 4)]);

        let long = tokenize("123L");
        assert_eq!(long, vec![Token::spanning(TokenKind::LongLit, "123", 0, 4)]);

        let float = tokenize("123.45f");
        assert_eq!(float, vec![Token::spanning(TokenKind::FloatLit, "123.45", 0, 7)]);
    }

    #[test]
    fn test_other_radixes_and_separators() {
        assert_eq!(tokenize("0b101")[0].value, "5");
        assert_eq!(tokenize("017")[0].value, "15");
        assert_eq!(tokenize("1_000_000")[0].value, "1000000");
        assert_eq!(tokenize("0xFFL")[0], Token::spanning(TokenKind::LongLit, "255", 0, 5));
        assert_eq!(tokenize("1e3")[0].kind, TokenKind::DoubleLit);
        assert_eq!(tokenize("2.5d")[0], Token::spanning(TokenKind::DoubleLit, "2.5", 0, 4));
        assert_eq!(tokenize("0")[0], Token::new(TokenKind::IntLit, "0", 0));
    }

    #[test]
    fn test_trailing_dot_makes_a_double() {
        assert_eq!(tokenize("1.")[0], Token::spanning(TokenKind::DoubleLit, "1.0", 0, 2));
        assert_eq!(tokenize("3.f")[0], Token::spanning(TokenKind::FloatLit, "3.0", 0, 3));
        assert_eq!(tokenize("2.e3")[0].value, "2.0e3");
        assert_eq!(
            kinds("x = 1.;"),
            vec![TokenKind::Ident, TokenKind::Assign, TokenKind::DoubleLit, TokenKind::Semi]
        );
    }

    #[test]
    fn test_tokens_span_their_source_text() {
        let tokens = tokenize("s = \"a\\n\" + 017;");
        let string = &tokens[2];
        assert_eq!((string.value.as_str(), string.file_pos, string.source_end), ("a\\n", 4, 9));
        let octal = &tokens[4];
        assert_eq!((octal.value.as_str(), octal.file_pos, octal.source_end), ("15", 12, 15));
    }

    #[test]
    fn test_comments_are_dropped() {
        let src = "int /* block { */ x; // trailing }\n";
        assert_eq!(
            kinds(src),
            vec![TokenKind::Int, TokenKind::Ident, TokenKind::Semi]
        );
    }

    #[test]
    fn test_longest_operator_match() {
        assert_eq!(
            kinds("a <<= b != c && d++"),
            vec![
                TokenKind::Ident,
                TokenKind::ShlAssign,
                TokenKind::Ident,
                TokenKind::Neq,
                TokenKind::Ident,
                TokenKind::LogAnd,
                TokenKind::Ident,
                TokenKind::Increment
            ]
        );
    }

    #[test]
    fn test_closing_generics_stay_split() {
        let tokens = tokenize("List<List<Integer>>");
        let closers: Vec<_> = tokens
            .iter()
            .filter(|t| t.kind == TokenKind::CloseChevron)
            .map(|t| t.file_pos)
            .collect();
        assert_eq!(closers, vec![17, 18]);
    }

    #[test]
    fn test_strings_and_chars() {
        let tokens = tokenize(r#"String s = "a \"}\" b"; char c = '\'';"#);
        let string = tokens.iter().find(|t| t.kind == TokenKind::StringLit).unwrap();
        assert_eq!(string.value, r#"a \"}\" b"#);
        let ch = tokens.iter().find(|t| t.kind == TokenKind::CharLit).unwrap();
        assert_eq!(ch.value, r"\'");
    }

    #[test]
    fn test_unknown_characters_become_ident_tokens() {
        let tokens = tokenize("int # x");
        assert_eq!(tokens[1], Token::new(TokenKind::Ident, "#", 4));
    }

    #[test]
    fn test_unterminated_input_is_total() {
        for src in ["\"never closed", "/* open", "'x", "0x", "class A { \u{1F600} ", "\\"] {
            let _ = tokenize(src);
        }
        assert_eq!(tokenize("\"abc").len(), 1);
        assert!(tokenize("/* only a comment").is_empty());
    }

    #[test]
    fn test_arbitrary_bytes_terminate() {
        let bytes: Vec<u8> = (0u8..=255).cycle().take(4096).collect();
        let text = String::from_utf8_lossy(&bytes);
        let tokens = tokenize(&text);
        assert!(tokens.iter().all(|t| t.file_pos < text.len()));
    }
}
