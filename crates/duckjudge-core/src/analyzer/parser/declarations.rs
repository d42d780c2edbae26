// src/analyzer/parser/declarations.rs
use super::cursor::{PResult, TokenCursor};
use super::members::MemberParser;
use super::modifiers::{
    Modifiers, ModifierParser, CLASS_MODIFIERS, INTERFACE_MODIFIERS, NESTED_INTERFACE_MODIFIERS,
};
use super::types::TypeParser;
use crate::analyzer::ast::{CompilationUnit, Import, Span, TypeArena, TypeDecl, TypeId, TypeKind, TypeMember};
use crate::analyzer::token::{Token, TokenKind};

/// Class, interface and enum declarations, including nested ones.
#[derive(Debug, Clone, Copy, Default)]
pub struct TypeDeclParser {
    modifiers: ModifierParser,
    types: TypeParser,
    members: MemberParser,
}

impl TypeDeclParser {
    /// True when the cursor sits on a type declaration keyword.
    pub fn starts_declaration(&self, cursor: &TokenCursor<'_>) -> bool {
        match cursor.peek_kind(0) {
            Some(TokenKind::Class | TokenKind::Interface | TokenKind::Enum) => true,
            Some(TokenKind::At) => cursor.peek_kind(1) == Some(TokenKind::Interface),
            Some(TokenKind::Ident) => is_record_header(cursor),
            _ => false,
        }
    }

    /// Parses one declaration whose modifiers were already consumed and
    /// allocates it, with its nested types, in `arena`.
    pub fn parse_type_decl(
        &self,
        cursor: &mut TokenCursor<'_>,
        arena: &mut TypeArena,
        mods: Modifiers,
        enclosing: Option<TypeId>,
    ) -> PResult<TypeId> {
        let kind = match cursor.peek_kind(0) {
            Some(TokenKind::Class) => TypeKind::Class,
            Some(TokenKind::Interface) => TypeKind::Interface,
            Some(TokenKind::Enum) => TypeKind::Enum,
            Some(TokenKind::At) if cursor.peek_kind(1) == Some(TokenKind::Interface) => {
                cursor.bump();
                TypeKind::Interface
            }
            Some(TokenKind::Ident) if is_record_header(cursor) => TypeKind::Class,
            _ => return cursor.err_here("class or interface declaration"),
        };
        cursor.bump();

        let legal = match (kind, enclosing) {
            (TypeKind::Interface, None) => INTERFACE_MODIFIERS,
            (TypeKind::Interface, Some(_)) => NESTED_INTERFACE_MODIFIERS,
            _ => CLASS_MODIFIERS,
        };
        mods.check_legal(legal)?;

        let name = cursor.expect_ident("type name")?.value.clone();
        let generics = self.types.parse_generic_params(cursor)?;

        // Record components.
        if cursor.at(TokenKind::OpenParen) {
            cursor.skip_balanced(TokenKind::OpenParen, TokenKind::CloseParen)?;
        }

        let mut extends = Vec::new();
        let mut implements = Vec::new();
        if cursor.consume(TokenKind::Extends).is_some() {
            extends = self.types.parse_type_list(cursor)?;
        }
        if cursor.consume(TokenKind::Implements).is_some() {
            implements = self.types.parse_type_list(cursor)?;
        }
        if cursor.peek().is_some_and(|t| t.kind == TokenKind::Ident && t.value == "permits") {
            cursor.bump();
            self.types.parse_type_list(cursor)?;
        }

        let id = arena.alloc(TypeDecl {
            id: TypeId(0),
            kind,
            access: mods.access,
            modifiers: mods.into_list(),
            name,
            generics,
            extends,
            implements,
            scope: Span::new(0, 0),
            members: Vec::new(),
            enclosing,
        });

        let begin = cursor.expect(TokenKind::OpenCurly)?.file_pos;
        if kind == TypeKind::Enum {
            skip_enum_constants(cursor)?;
        }

        let mut members = Vec::new();
        loop {
            match cursor.peek_kind(0) {
                None => return cursor.err_here(TokenKind::CloseCurly.to_string()),
                Some(TokenKind::CloseCurly) => break,
                Some(TokenKind::Semi) => {
                    cursor.bump();
                }
                Some(_) => {
                    let member_mods = self.modifiers.parse(cursor)?;
                    if self.starts_declaration(cursor) {
                        let nested = cursor.nested(|c| self.parse_type_decl(c, arena, member_mods, Some(id)))?;
                        members.push(TypeMember::Nested(nested));
                    } else {
                        members.extend(self.members.parse_member(cursor, arena, id, member_mods)?);
                    }
                }
            }
        }
        let end = cursor.expect(TokenKind::CloseCurly)?.file_pos;

        let decl = arena.get_mut(id);
        decl.scope = Span::new(begin, end);
        decl.members = members;
        Ok(id)
    }
}

/// `record Name(` or `record Name<`; `record` is not reserved.
fn is_record_header(cursor: &TokenCursor<'_>) -> bool {
    cursor.peek().is_some_and(|t| t.value == "record")
        && cursor.peek_kind(1) == Some(TokenKind::Ident)
        && matches!(
            cursor.peek_kind(2),
            Some(TokenKind::OpenParen | TokenKind::OpenChevron)
        )
}

/// Skips enum constants up to the `;` that opens the body declarations, or up
/// to the closing brace when there are none.
fn skip_enum_constants(cursor: &mut TokenCursor<'_>) -> PResult<()> {
    loop {
        match cursor.peek_kind(0) {
            None => return cursor.err_here(TokenKind::CloseCurly.to_string()),
            Some(TokenKind::CloseCurly) => return Ok(()),
            Some(TokenKind::Semi) => {
                cursor.bump();
                return Ok(());
            }
            Some(TokenKind::OpenParen) => {
                cursor.skip_balanced(TokenKind::OpenParen, TokenKind::CloseParen)?;
            }
            Some(TokenKind::OpenCurly) => {
                cursor.skip_balanced(TokenKind::OpenCurly, TokenKind::CloseCurly)?;
            }
            Some(_) => {
                cursor.bump();
            }
        }
    }
}

/// Package clause, imports and top-level type declarations.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompilationUnitParser {
    modifiers: ModifierParser,
    declarations: TypeDeclParser,
}

impl CompilationUnitParser {
    pub fn parse(&self, tokens: &[Token]) -> PResult<CompilationUnit> {
        let mut cursor = TokenCursor::new(tokens);
        let mut unit = CompilationUnit::default();

        if cursor.consume(TokenKind::Package).is_some() {
            unit.package = Some(cursor.qualified_name("package name")?);
            cursor.expect(TokenKind::Semi)?;
        }

        while cursor.consume(TokenKind::Import).is_some() {
            let is_static = cursor.consume(TokenKind::Static).is_some();
            let path = cursor.qualified_name("import path")?;
            let wildcard = cursor.at(TokenKind::Dot) && cursor.peek_kind(1) == Some(TokenKind::Mul);
            if wildcard {
                cursor.bump();
                cursor.bump();
            }
            cursor.expect(TokenKind::Semi)?;
            unit.imports.push(Import {
                path,
                is_static,
                wildcard,
            });
        }

        while !cursor.is_at_end() {
            if cursor.consume(TokenKind::Semi).is_some() {
                continue;
            }
            let mods = self.modifiers.parse(&mut cursor)?;
            let id = self
                .declarations
                .parse_type_decl(&mut cursor, &mut unit.arena, mods, None)?;
            unit.types.push(id);
        }

        Ok(unit)
    }
}
