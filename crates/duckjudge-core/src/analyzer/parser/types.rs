// src/analyzer/parser/types.rs
use super::cursor::{PResult, TokenCursor};
use super::modifiers::ModifierParser;
use crate::analyzer::ast::{GenericParam, PrimitiveType, TypeArg, TypeRef, WildcardBound};
use crate::analyzer::token::TokenKind;

/// Types, type arguments and generic parameter lists.
#[derive(Debug, Clone, Copy, Default)]
pub struct TypeParser {
    annotations: ModifierParser,
}

impl TypeParser {
    pub fn starts_type(&self, cursor: &TokenCursor<'_>) -> bool {
        match cursor.peek_kind(0) {
            Some(kind) => kind.is_primitive() || kind == TokenKind::Ident || kind == TokenKind::Void,
            None => false,
        }
    }

    /// A value type: primitive or reference, with trailing `[]` dimensions.
    pub fn parse_type(&self, cursor: &mut TokenCursor<'_>) -> PResult<TypeRef> {
        while cursor.at(TokenKind::At) {
            self.annotations.skip_annotation(cursor)?;
        }

        let base = match cursor.peek_kind(0) {
            Some(kind) if kind.is_primitive() => {
                cursor.bump();
                TypeRef::Primitive(primitive(kind))
            }
            Some(TokenKind::Ident) => self.parse_class_type(cursor)?,
            _ => return cursor.err_here("type"),
        };

        let dims = self.parse_dims(cursor);
        Ok(base.with_dims(dims))
    }

    /// Like [`parse_type`](Self::parse_type) but also accepts `void`.
    pub fn parse_return_type(&self, cursor: &mut TokenCursor<'_>) -> PResult<TypeRef> {
        if cursor.consume(TokenKind::Void).is_some() {
            return Ok(TypeRef::Void);
        }
        self.parse_type(cursor)
    }

    /// Counts `[]` pairs.
    pub fn parse_dims(&self, cursor: &mut TokenCursor<'_>) -> usize {
        let mut dims = 0;
        while cursor.at(TokenKind::OpenBracket)
            && cursor.peek_kind(1) == Some(TokenKind::CloseBracket)
        {
            cursor.bump();
            cursor.bump();
            dims += 1;
        }
        dims
    }

    fn parse_class_type(&self, cursor: &mut TokenCursor<'_>) -> PResult<TypeRef> {
        let mut name = cursor.expect_ident("type name")?.value.clone();
        let mut args = self.parse_optional_type_args(cursor)?;

        while cursor.at(TokenKind::Dot) && cursor.peek_kind(1) == Some(TokenKind::Ident) {
            cursor.bump();
            if let Some(segment) = cursor.bump() {
                name.push('.');
                name.push_str(&segment.value);
            }
            args = self.parse_optional_type_args(cursor)?;
        }

        Ok(TypeRef::Named { name, args })
    }

    fn parse_optional_type_args(&self, cursor: &mut TokenCursor<'_>) -> PResult<Vec<TypeArg>> {
        if cursor.at(TokenKind::OpenChevron) {
            self.parse_type_args(cursor)
        } else {
            Ok(Vec::new())
        }
    }

    /// `<A, ? extends B, ? super C>`; `<>` yields an empty list.
    pub fn parse_type_args(&self, cursor: &mut TokenCursor<'_>) -> PResult<Vec<TypeArg>> {
        cursor.expect(TokenKind::OpenChevron)?;
        let mut args = Vec::new();
        if cursor.consume(TokenKind::CloseChevron).is_some() {
            return Ok(args);
        }

        loop {
            if cursor.consume(TokenKind::Question).is_some() {
                let bound = if cursor.consume(TokenKind::Extends).is_some() {
                    Some((WildcardBound::Extends, cursor.nested(|c| self.parse_type(c))?))
                } else if cursor.at(TokenKind::Ident) && cursor.peek().map(|t| t.value.as_str()) == Some("super") {
                    cursor.bump();
                    Some((WildcardBound::Super, cursor.nested(|c| self.parse_type(c))?))
                } else {
                    None
                };
                args.push(TypeArg::Wildcard(bound));
            } else {
                args.push(TypeArg::Type(cursor.nested(|c| self.parse_type(c))?));
            }

            if cursor.consume(TokenKind::Comma).is_none() {
                break;
            }
        }

        cursor.expect(TokenKind::CloseChevron)?;
        Ok(args)
    }

    /// `<T, U extends Comparable<U> & Serializable>`.
    pub fn parse_generic_params(&self, cursor: &mut TokenCursor<'_>) -> PResult<Vec<GenericParam>> {
        if !cursor.at(TokenKind::OpenChevron) {
            return Ok(Vec::new());
        }
        cursor.bump();

        let mut params = Vec::new();
        loop {
            let name = cursor.expect_ident("type parameter")?.value.clone();
            let mut bounds = Vec::new();
            if cursor.consume(TokenKind::Extends).is_some() {
                bounds.push(self.parse_type(cursor)?);
                while cursor.consume(TokenKind::BitAnd).is_some() {
                    bounds.push(self.parse_type(cursor)?);
                }
            }
            params.push(GenericParam { name, bounds });

            if cursor.consume(TokenKind::Comma).is_none() {
                break;
            }
        }

        cursor.expect(TokenKind::CloseChevron)?;
        Ok(params)
    }

    /// Comma separated type list, as after `implements` or `throws`.
    pub fn parse_type_list(&self, cursor: &mut TokenCursor<'_>) -> PResult<Vec<TypeRef>> {
        let mut types = vec![self.parse_type(cursor)?];
        while cursor.consume(TokenKind::Comma).is_some() {
            types.push(self.parse_type(cursor)?);
        }
        Ok(types)
    }
}

fn primitive(kind: TokenKind) -> PrimitiveType {
    match kind {
        TokenKind::Byte => PrimitiveType::Byte,
        TokenKind::Short => PrimitiveType::Short,
        TokenKind::Long => PrimitiveType::Long,
        TokenKind::Float => PrimitiveType::Float,
        TokenKind::Double => PrimitiveType::Double,
        TokenKind::Char => PrimitiveType::Char,
        TokenKind::Boolean => PrimitiveType::Boolean,
        _ => PrimitiveType::Int,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::lexer::tokenize;

    fn parse_type(src: &str) -> PResult<TypeRef> {
        let tokens = tokenize(src);
        let mut cursor = TokenCursor::new(&tokens);
        TypeParser::default().parse_type(&mut cursor)
    }

    #[test]
    fn test_string_array() {
        assert_eq!(
            parse_type("String[]").unwrap(),
            TypeRef::named("String").with_dims(1)
        );
    }

    #[test]
    fn test_nested_generics_close_with_split_chevrons() {
        let ty = parse_type("Map<String, List<List<Integer>>>").unwrap();
        let TypeRef::Named { name, args } = ty else {
            panic!("expected a named type");
        };
        assert_eq!(name, "Map");
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn test_wildcards_and_qualified_names() {
        let ty = parse_type("java.util.List<? extends Number>").unwrap();
        assert_eq!(ty.simple_name(), Some("List"));
        let TypeRef::Named { args, .. } = ty else {
            panic!("expected a named type");
        };
        assert!(matches!(
            args[0],
            TypeArg::Wildcard(Some((WildcardBound::Extends, _)))
        ));
    }

    #[test]
    fn test_generic_params_with_bounds() {
        let tokens = tokenize("<T extends Comparable<T> & Cloneable, U>");
        let mut cursor = TokenCursor::new(&tokens);
        let params = TypeParser::default().parse_generic_params(&mut cursor).unwrap();
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].bounds.len(), 2);
        assert!(cursor.is_at_end());
    }

    #[test]
    fn test_missing_type_names_expectation() {
        let err = parse_type("= 3").unwrap_err();
        assert_eq!(err.expected, "type");
        assert_eq!(err.at_offset, 0);
    }
}
