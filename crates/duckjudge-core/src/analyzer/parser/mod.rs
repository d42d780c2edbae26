// src/analyzer/parser/mod.rs
//! Recursive-descent parser producing a [`CompilationUnit`].
//!
//! The grammar is split over small component parsers that share one
//! [`TokenCursor`]. Every decision is made with a fixed number of tokens of
//! lookahead, except the bounded scan ahead of `return` values.

mod cursor;
mod declarations;
mod expr;
mod members;
mod modifiers;
mod statements;
mod types;

pub use cursor::{PResult, TokenCursor};
pub use declarations::{CompilationUnitParser, TypeDeclParser};
pub use expr::ExpressionParser;
pub use members::MemberParser;
pub use modifiers::{Modifiers, ModifierParser};
pub use statements::StatementParser;
pub use types::TypeParser;

use super::ast::CompilationUnit;
use super::lexer::tokenize;
use super::token::Token;
use crate::errors::SyntaxError;

#[derive(Debug, Clone, Copy, Default)]
pub struct Parser {
    unit: CompilationUnitParser,
}

impl Parser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(&self, tokens: &[Token]) -> Result<CompilationUnit, SyntaxError> {
        self.unit.parse(tokens)
    }

    pub fn parse_source(&self, source: &str) -> Result<CompilationUnit, SyntaxError> {
        self.parse(&tokenize(source))
    }
}

pub fn parse(tokens: &[Token]) -> Result<CompilationUnit, SyntaxError> {
    Parser::new().parse(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::ast::{Statement, TypeMember, TypeRef};

    const SOLUTION: &str = r#"
import java.util.*;

public class Solution {
    private static final int LIMIT = 1 << 10;

    public static int add(int a, int b) {
        return a + b;
    }

    static List<Map<String, Integer>> group(String[] words) {
        List<Map<String, Integer>> out = new ArrayList<>();
        for (String w : words) {
            if (w.length() >> 1 > 0) { out.add(new HashMap<>()); }
        }
        return out;
    }

    public static void main(String[] args) {
        System.out.println(add(1, 2));
    }
}
"#;

    #[test]
    fn test_full_program() {
        let unit = Parser::new().parse_source(SOLUTION).unwrap();
        let solution = unit.top_level().next().unwrap();
        assert_eq!(solution.name, "Solution");
        assert_eq!(solution.functions().count(), 3);
        assert!(matches!(solution.members[0], TypeMember::Var(_)));

        let group = solution.functions().find(|f| f.name == "group").unwrap();
        let TypeRef::Named { args, .. } = group.return_type.as_ref().unwrap() else {
            panic!("expected a named return type");
        };
        assert_eq!(args.len(), 1);

        let add = solution.functions().find(|f| f.name == "add").unwrap();
        let body = add.body.as_ref().unwrap();
        assert!(matches!(body.statements[0], Statement::Return { value: Some(_), .. }));
        assert_eq!(body.span.slice(SOLUTION).chars().next(), Some('{'));
        assert_eq!(solution.scope.slice(SOLUTION).chars().last(), Some('}'));
    }

    #[test]
    fn test_error_offset_points_at_offending_token() {
        let src = "public class A { void f( { } }";
        let err = Parser::new().parse_source(src).unwrap_err();
        assert_eq!(err.at_offset, src.find("( {").unwrap() + 2);
    }

    #[test]
    fn test_runaway_nesting_is_a_syntax_error() {
        let src = format!("class A {{ void f() {}", "{".repeat(10_000));
        let err = Parser::new().parse_source(&src).unwrap_err();
        assert_eq!(err.expected, "less deeply nested code");
    }

    #[test]
    fn test_empty_source_parses_to_empty_unit() {
        let unit = parse(&[]).unwrap();
        assert!(unit.types.is_empty());
    }
}
