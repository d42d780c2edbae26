// src/analyzer/parser/modifiers.rs
use super::cursor::{PResult, TokenCursor};
use crate::analyzer::ast::{AccessModifier, Modifier};
use crate::analyzer::token::{Token, TokenKind};
use crate::errors::SyntaxError;

pub const CLASS_MODIFIERS: &[Modifier] = &[
    Modifier::Abstract,
    Modifier::Final,
    Modifier::Strictfp,
    Modifier::Static,
    Modifier::Sealed,
    Modifier::NonSealed,
];
pub const INTERFACE_MODIFIERS: &[Modifier] = &[
    Modifier::Abstract,
    Modifier::Strictfp,
    Modifier::Sealed,
    Modifier::NonSealed,
];
pub const NESTED_INTERFACE_MODIFIERS: &[Modifier] = &[
    Modifier::Abstract,
    Modifier::Strictfp,
    Modifier::Static,
    Modifier::Sealed,
    Modifier::NonSealed,
];
pub const METHOD_MODIFIERS: &[Modifier] = &[
    Modifier::Static,
    Modifier::Final,
    Modifier::Abstract,
    Modifier::Synchronized,
    Modifier::Native,
    Modifier::Strictfp,
    Modifier::Default,
];
pub const FIELD_MODIFIERS: &[Modifier] = &[
    Modifier::Static,
    Modifier::Final,
    Modifier::Transient,
    Modifier::Volatile,
];

/// Access level and modifiers in front of a declaration, with their offsets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Modifiers {
    pub access: AccessModifier,
    pub list: Vec<(Modifier, usize)>,
}

impl Modifiers {
    pub fn contains(&self, modifier: Modifier) -> bool {
        self.list.iter().any(|(m, _)| *m == modifier)
    }

    pub fn check_legal(&self, legal: &[Modifier]) -> PResult<()> {
        match self.list.iter().find(|(m, _)| !legal.contains(m)) {
            Some((_, offset)) => Err(SyntaxError::new("legal modifier", *offset)),
            None => Ok(()),
        }
    }

    pub fn into_list(self) -> Vec<Modifier> {
        self.list.into_iter().map(|(m, _)| m).collect()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ModifierParser;

impl ModifierParser {
    /// Consumes access keywords, modifiers and annotations in any order.
    pub fn parse(&self, cursor: &mut TokenCursor<'_>) -> PResult<Modifiers> {
        let mut mods = Modifiers::default();
        let mut access_seen = false;

        loop {
            let Some(token) = cursor.peek() else { break };

            let access = match token.kind {
                TokenKind::Public => Some(AccessModifier::Public),
                TokenKind::Protected => Some(AccessModifier::Protected),
                TokenKind::Private => Some(AccessModifier::Private),
                _ => None,
            };
            if let Some(access) = access {
                if access_seen {
                    return cursor.err_here("a single access modifier");
                }
                access_seen = true;
                mods.access = access;
                cursor.bump();
                continue;
            }

            if token.kind == TokenKind::At && cursor.peek_kind(1) != Some(TokenKind::Interface) {
                self.skip_annotation(cursor)?;
                continue;
            }

            if let Some((modifier, width)) = contextual_modifier(cursor) {
                mods.list.push((modifier, token.file_pos));
                for _ in 0..width {
                    cursor.bump();
                }
                continue;
            }

            // `default` opens a method modifier only when something declarable follows.
            if token.kind == TokenKind::Default && cursor.peek_kind(1) == Some(TokenKind::Colon) {
                break;
            }

            let modifier = match token.kind {
                TokenKind::Static => Modifier::Static,
                TokenKind::Final => Modifier::Final,
                TokenKind::Abstract => Modifier::Abstract,
                TokenKind::Strictfp => Modifier::Strictfp,
                TokenKind::Synchronized => Modifier::Synchronized,
                TokenKind::Native => Modifier::Native,
                TokenKind::Transient => Modifier::Transient,
                TokenKind::Volatile => Modifier::Volatile,
                TokenKind::Default => Modifier::Default,
                _ => break,
            };
            mods.list.push((modifier, token.file_pos));
            cursor.bump();
        }

        Ok(mods)
    }

    /// `@Name`, `@a.b.Name` or `@Name(...)`.
    pub fn skip_annotation(&self, cursor: &mut TokenCursor<'_>) -> PResult<()> {
        cursor.expect(TokenKind::At)?;
        cursor.qualified_name("annotation name")?;
        if cursor.at(TokenKind::OpenParen) {
            cursor.skip_balanced(TokenKind::OpenParen, TokenKind::CloseParen)?;
        }
        Ok(())
    }
}

/// `sealed` and `non-sealed` are not reserved, so they only count as
/// modifiers right in front of a type declaration or another modifier.
fn contextual_modifier(cursor: &TokenCursor<'_>) -> Option<(Modifier, usize)> {
    let first = cursor.peek()?;
    if first.kind != TokenKind::Ident {
        return None;
    }
    let (modifier, width) = match first.value.as_str() {
        "sealed" => (Modifier::Sealed, 1),
        "non" => {
            let minus = cursor.peek_at(1)?;
            let sealed = cursor.peek_at(2)?;
            let spelled = minus.kind == TokenKind::Minus
                && sealed.kind == TokenKind::Ident
                && sealed.value == "sealed"
                && adjacent(first, minus)
                && adjacent(minus, sealed);
            if !spelled {
                return None;
            }
            (Modifier::NonSealed, 3)
        }
        _ => return None,
    };
    let declarable = match cursor.peek_at(width) {
        Some(next) => match next.kind {
            TokenKind::Class
            | TokenKind::Interface
            | TokenKind::Abstract
            | TokenKind::Static
            | TokenKind::Final
            | TokenKind::Strictfp
            | TokenKind::Public
            | TokenKind::Protected
            | TokenKind::Private
            | TokenKind::At => true,
            TokenKind::Ident => matches!(next.value.as_str(), "sealed" | "non"),
            _ => false,
        },
        None => false,
    };
    declarable.then_some((modifier, width))
}

fn adjacent(left: &Token, right: &Token) -> bool {
    left.source_end == right.file_pos
}
