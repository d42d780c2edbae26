// src/analyzer/parser/members.rs
use super::cursor::{PResult, TokenCursor};
use super::modifiers::{Modifiers, ModifierParser, FIELD_MODIFIERS, METHOD_MODIFIERS};
use super::statements::StatementParser;
use super::types::TypeParser;
use crate::analyzer::ast::{
    FuncDecl, GenericParam, Modifier, Param, TypeArena, TypeId, TypeMember, TypeRef, VarDecl,
};
use crate::analyzer::token::TokenKind;

/// Methods, constructors, fields and initializer blocks.
///
/// Nested type declarations are left to the declaration parser, which calls
/// back into this one for everything else in a type body.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemberParser {
    annotations: ModifierParser,
    types: TypeParser,
    statements: StatementParser,
}

impl MemberParser {
    /// Parses one member whose modifiers have already been consumed.
    ///
    /// `owner` must already be allocated in `arena`; its name distinguishes
    /// constructors from methods.
    pub fn parse_member(
        &self,
        cursor: &mut TokenCursor<'_>,
        arena: &TypeArena,
        owner: TypeId,
        mods: Modifiers,
    ) -> PResult<Vec<TypeMember>> {
        let file_pos = cursor.offset();

        if cursor.at(TokenKind::OpenCurly) {
            mods.check_legal(&[Modifier::Static])?;
            let block = self.statements.parse_scope(cursor)?;
            return Ok(vec![TypeMember::Initializer(block)]);
        }

        let generics = self.types.parse_generic_params(cursor)?;

        let owner_name = arena.get(owner).name.as_str();
        let names_owner = cursor.peek().is_some_and(|t| {
            t.kind == TokenKind::Ident && t.value == owner_name
        });
        let is_constructor = names_owner && cursor.peek_kind(1) == Some(TokenKind::OpenParen);

        if is_constructor {
            mods.check_legal(&[])?;
            let name = cursor.expect_ident("constructor name")?.value.clone();
            let func = self.finish_method(cursor, owner, mods, generics, None, name, file_pos)?;
            return Ok(vec![TypeMember::Func(func)]);
        }

        // Compact canonical constructor of a record: `Point { ... }`.
        if names_owner && generics.is_empty() && cursor.peek_kind(1) == Some(TokenKind::OpenCurly) {
            mods.check_legal(&[])?;
            let name = cursor.expect_ident("constructor name")?.value.clone();
            let body = self.statements.parse_scope(cursor)?;
            return Ok(vec![TypeMember::Func(FuncDecl {
                owner,
                access: mods.access,
                modifiers: mods.into_list(),
                generics,
                return_type: None,
                name,
                params: Vec::new(),
                throws: Vec::new(),
                body: Some(body),
                file_pos,
            })]);
        }

        let ty = self.types.parse_return_type(cursor)?;
        let name = cursor.expect_ident("member name")?.value.clone();

        if cursor.at(TokenKind::OpenParen) {
            mods.check_legal(METHOD_MODIFIERS)?;
            let func = self.finish_method(cursor, owner, mods, generics, Some(ty), name, file_pos)?;
            return Ok(vec![TypeMember::Func(func)]);
        }

        if ty == TypeRef::Void || !generics.is_empty() {
            return cursor.err_here(TokenKind::OpenParen.to_string());
        }
        mods.check_legal(FIELD_MODIFIERS)?;
        self.finish_fields(cursor, owner, mods, ty, name, file_pos)
    }

    #[allow(clippy::too_many_arguments)]
    fn finish_method(
        &self,
        cursor: &mut TokenCursor<'_>,
        owner: TypeId,
        mods: Modifiers,
        generics: Vec<GenericParam>,
        return_type: Option<TypeRef>,
        name: String,
        file_pos: usize,
    ) -> PResult<FuncDecl> {
        let params = self.parse_params(cursor)?;

        // Legacy `int f()[]` form.
        let extra_dims = self.types.parse_dims(cursor);
        let return_type = return_type.map(|t| t.with_dims(extra_dims));

        let throws = if cursor.consume(TokenKind::Throws).is_some() {
            self.types.parse_type_list(cursor)?
        } else {
            Vec::new()
        };

        // Annotation element default value: `String name() default "";`.
        if cursor.consume(TokenKind::Default).is_some() {
            self.skip_initializer(cursor)?;
        }

        let body = if cursor.consume(TokenKind::Semi).is_some() {
            None
        } else if cursor.at(TokenKind::OpenCurly) {
            Some(self.statements.parse_scope(cursor)?)
        } else {
            return cursor.err_here("method body");
        };

        Ok(FuncDecl {
            owner,
            access: mods.access,
            modifiers: mods.into_list(),
            generics,
            return_type,
            name,
            params,
            throws,
            body,
            file_pos,
        })
    }

    pub fn parse_params(&self, cursor: &mut TokenCursor<'_>) -> PResult<Vec<Param>> {
        cursor.expect(TokenKind::OpenParen)?;
        let mut params = Vec::new();
        if cursor.consume(TokenKind::CloseParen).is_some() {
            return Ok(params);
        }

        loop {
            let mut is_final = false;
            loop {
                if cursor.at(TokenKind::At) {
                    self.annotations.skip_annotation(cursor)?;
                } else if cursor.consume(TokenKind::Final).is_some() {
                    is_final = true;
                } else {
                    break;
                }
            }

            let ty = self.types.parse_type(cursor)?;
            let varargs = cursor.consume(TokenKind::Ellipsis).is_some();
            let name = cursor.expect_ident("parameter name")?.value.clone();
            let dims = self.types.parse_dims(cursor);

            params.push(Param {
                ty: ty.with_dims(dims),
                name,
                is_final,
                varargs,
            });

            if cursor.consume(TokenKind::Comma).is_none() {
                break;
            }
        }

        cursor.expect(TokenKind::CloseParen)?;
        Ok(params)
    }

    /// `T a, b[], c = ...;`. Declarators after the first initializer are not
    /// recorded, since initializers are skipped up to the terminating `;`.
    fn finish_fields(
        &self,
        cursor: &mut TokenCursor<'_>,
        owner: TypeId,
        mods: Modifiers,
        ty: TypeRef,
        first_name: String,
        file_pos: usize,
    ) -> PResult<Vec<TypeMember>> {
        let modifiers = mods.list.iter().map(|(m, _)| *m).collect::<Vec<_>>();
        let mut members = Vec::new();
        let mut name = first_name;
        let mut pos = file_pos;

        loop {
            let dims = self.types.parse_dims(cursor);
            let has_initializer = cursor.consume(TokenKind::Assign).is_some();
            if has_initializer {
                self.skip_initializer(cursor)?;
            }

            members.push(TypeMember::Var(VarDecl {
                owner,
                access: mods.access,
                modifiers: modifiers.clone(),
                ty: ty.clone().with_dims(dims),
                name,
                has_initializer,
                file_pos: pos,
            }));

            if has_initializer || cursor.consume(TokenKind::Comma).is_none() {
                break;
            }
            pos = cursor.offset();
            name = cursor.expect_ident("field name")?.value.clone();
        }

        cursor.expect(TokenKind::Semi)?;
        Ok(members)
    }

    fn skip_initializer(&self, cursor: &mut TokenCursor<'_>) -> PResult<()> {
        let mut depth = 0usize;
        loop {
            match cursor.peek_kind(0) {
                None => return cursor.err_here(TokenKind::Semi.to_string()),
                Some(TokenKind::Semi) if depth == 0 => return Ok(()),
                Some(TokenKind::OpenParen | TokenKind::OpenBracket | TokenKind::OpenCurly) => {
                    depth += 1;
                }
                Some(TokenKind::CloseParen | TokenKind::CloseBracket | TokenKind::CloseCurly) => {
                    if depth == 0 {
                        return cursor.err_here(TokenKind::Semi.to_string());
                    }
                    depth -= 1;
                }
                Some(_) => {}
            }
            cursor.bump();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::ast::{AccessModifier, TypeDecl, TypeKind, Span};
    use crate::analyzer::lexer::tokenize;

    fn arena_with(name: &str) -> (TypeArena, TypeId) {
        let mut arena = TypeArena::default();
        let id = arena.alloc(TypeDecl {
            id: TypeId(0),
            kind: TypeKind::Class,
            access: AccessModifier::Public,
            modifiers: Vec::new(),
            name: name.to_string(),
            generics: Vec::new(),
            extends: Vec::new(),
            implements: Vec::new(),
            scope: Span::new(0, 0),
            members: Vec::new(),
            enclosing: None,
        });
        (arena, id)
    }

    fn parse_member(src: &str) -> PResult<Vec<TypeMember>> {
        let (arena, owner) = arena_with("Solution");
        let tokens = tokenize(src);
        let mut cursor = TokenCursor::new(&tokens);
        let parser = MemberParser::default();
        let mods = parser.annotations.parse(&mut cursor)?;
        parser.parse_member(&mut cursor, &arena, owner, mods)
    }

    #[test]
    fn test_main_method() {
        let members = parse_member("public static void main(String[] args) { }").unwrap();
        let TypeMember::Func(main) = &members[0] else {
            panic!("expected a method");
        };
        assert_eq!(main.name, "main");
        assert!(main.is_static());
        assert_eq!(main.return_type, Some(TypeRef::Void));
        assert_eq!(main.params[0].ty, TypeRef::named("String").with_dims(1));
        assert_eq!(main.body.as_ref().unwrap().span, Span::new(39, 41));
    }

    #[test]
    fn test_constructor_is_recognised_by_owner_name() {
        let members = parse_member("Solution(int n) { this.n = n; }").unwrap();
        let TypeMember::Func(ctor) = &members[0] else {
            panic!("expected a constructor");
        };
        assert!(ctor.is_constructor());
    }

    #[test]
    fn test_generic_method_with_throws() {
        let members =
            parse_member("public <T extends Comparable<T>> T max(List<T> xs) throws Exception { return xs.get(0); }")
                .unwrap();
        let TypeMember::Func(f) = &members[0] else {
            panic!("expected a method");
        };
        assert_eq!(f.generics.len(), 1);
        assert_eq!(f.throws.len(), 1);
    }

    #[test]
    fn test_varargs_and_c_style_dims() {
        let members = parse_member("static int sum(final int... xs, String names[]) { return 0; }").unwrap();
        let TypeMember::Func(f) = &members[0] else {
            panic!("expected a method");
        };
        assert!(f.params[0].varargs && f.params[0].is_final);
        assert_eq!(f.params[1].ty, TypeRef::named("String").with_dims(1));
    }

    #[test]
    fn test_fields_with_initializers() {
        let members = parse_member("private final Map<String, Integer> seen = new HashMap<>(), other;").unwrap();
        assert_eq!(members.len(), 1);
        let TypeMember::Var(v) = &members[0] else {
            panic!("expected a field");
        };
        assert!(v.has_initializer);

        let members = parse_member("int a, b[];").unwrap();
        assert_eq!(members.len(), 2);
    }

    #[test]
    fn test_illegal_field_modifier() {
        let err = parse_member("abstract int x;").unwrap_err();
        assert_eq!(err.expected, "legal modifier");
        assert_eq!(err.at_offset, 0);
    }

    #[test]
    fn test_abstract_method_without_body() {
        let members = parse_member("abstract int size();").unwrap();
        let TypeMember::Func(f) = &members[0] else {
            panic!("expected a method");
        };
        assert!(f.body.is_none());
    }

    #[test]
    fn test_compact_record_constructor() {
        let members = parse_member("public Solution { if (n < 0) throw new IllegalArgumentException(); }").unwrap();
        let TypeMember::Func(ctor) = &members[0] else {
            panic!("expected a constructor");
        };
        assert!(ctor.is_constructor());
        assert_eq!(ctor.access, AccessModifier::Public);
        assert!(ctor.params.is_empty());
        assert!(ctor.body.is_some());
    }

    #[test]
    fn test_annotation_element_with_default() {
        let members = parse_member("String[] names() default { \"a\", \"b\" };").unwrap();
        let TypeMember::Func(element) = &members[0] else {
            panic!("expected an annotation element");
        };
        assert_eq!(element.name, "names");
        assert!(element.body.is_none());

        let members = parse_member("int level() default 1 << 2;").unwrap();
        assert_eq!(members.len(), 1);
    }
}
