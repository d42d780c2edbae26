//! Syntax tree for a single compilation unit.
//!
//! Type declarations live in a [`TypeArena`]; members and nested types refer to
//! their declaring type by [`TypeId`] rather than by pointer. Scope-bearing
//! nodes record the byte offsets of their braces in the original source so the
//! harness can splice text without re-printing the tree.

use super::token::Token;

/// Byte offsets of an opening brace and its matching closing brace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub begin: usize,
    pub end: usize,
}

impl Span {
    pub fn new(begin: usize, end: usize) -> Self {
        Self { begin, end }
    }

    pub fn contains(&self, other: &Span) -> bool {
        self.begin <= other.begin && other.end <= self.end
    }

    /// The braces and everything between them.
    pub fn slice<'s>(&self, source: &'s str) -> &'s str {
        &source[self.begin..=self.end]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessModifier {
    Public,
    Protected,
    Private,
    #[default]
    PackagePrivate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modifier {
    Static,
    Final,
    Abstract,
    Strictfp,
    Synchronized,
    Native,
    Transient,
    Volatile,
    Default,
    Sealed,
    NonSealed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveType {
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    Char,
    Boolean,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeRef {
    Void,
    Primitive(PrimitiveType),
    Named { name: String, args: Vec<TypeArg> },
    Array { element: Box<TypeRef>, dims: usize },
}

impl TypeRef {
    pub fn named(name: impl Into<String>) -> Self {
        TypeRef::Named {
            name: name.into(),
            args: Vec::new(),
        }
    }

    /// Wraps `self` in `dims` array dimensions, flattening nested arrays.
    pub fn with_dims(self, dims: usize) -> Self {
        if dims == 0 {
            return self;
        }
        match self {
            TypeRef::Array { element, dims: inner } => TypeRef::Array {
                element,
                dims: inner + dims,
            },
            other => TypeRef::Array {
                element: Box::new(other),
                dims,
            },
        }
    }

    /// Simple name without package qualification or type arguments.
    pub fn simple_name(&self) -> Option<&str> {
        match self {
            TypeRef::Named { name, .. } => name.rsplit('.').next(),
            _ => None,
        }
    }

    /// Structural equality that ignores package qualification.
    pub fn same_shape(&self, other: &TypeRef) -> bool {
        match (self, other) {
            (TypeRef::Void, TypeRef::Void) => true,
            (TypeRef::Primitive(a), TypeRef::Primitive(b)) => a == b,
            (TypeRef::Named { args: a, .. }, TypeRef::Named { args: b, .. }) => {
                self.simple_name() == other.simple_name()
                    && a.len() == b.len()
                    && a.iter().zip(b).all(|(x, y)| x.same_shape(y))
            }
            (
                TypeRef::Array { element: a, dims: da },
                TypeRef::Array { element: b, dims: db },
            ) => da == db && a.same_shape(b),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WildcardBound {
    Extends,
    Super,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeArg {
    Type(TypeRef),
    Wildcard(Option<(WildcardBound, TypeRef)>),
}

impl TypeArg {
    fn same_shape(&self, other: &TypeArg) -> bool {
        match (self, other) {
            (TypeArg::Type(a), TypeArg::Type(b)) => a.same_shape(b),
            (TypeArg::Wildcard(None), TypeArg::Wildcard(None)) => true,
            (TypeArg::Wildcard(Some((ka, a))), TypeArg::Wildcard(Some((kb, b)))) => {
                ka == kb && a.same_shape(b)
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenericParam {
    pub name: String,
    pub bounds: Vec<TypeRef>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub ty: TypeRef,
    pub name: String,
    pub is_final: bool,
    pub varargs: bool,
}

impl Param {
    /// Declared type with varargs folded into one extra array dimension.
    pub fn effective_type(&self) -> TypeRef {
        if self.varargs {
            self.ty.clone().with_dims(1)
        } else {
            self.ty.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FuncDecl {
    pub owner: TypeId,
    pub access: AccessModifier,
    pub modifiers: Vec<Modifier>,
    pub generics: Vec<GenericParam>,
    /// `None` for constructors.
    pub return_type: Option<TypeRef>,
    pub name: String,
    pub params: Vec<Param>,
    pub throws: Vec<TypeRef>,
    /// `None` for abstract and interface methods.
    pub body: Option<StatementScope>,
    pub file_pos: usize,
}

impl FuncDecl {
    pub fn is_static(&self) -> bool {
        self.modifiers.contains(&Modifier::Static)
    }

    pub fn is_constructor(&self) -> bool {
        self.return_type.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    pub owner: TypeId,
    pub access: AccessModifier,
    pub modifiers: Vec<Modifier>,
    pub ty: TypeRef,
    pub name: String,
    pub has_initializer: bool,
    pub file_pos: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeMember {
    Func(FuncDecl),
    Var(VarDecl),
    Nested(TypeId),
    Initializer(StatementScope),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Class,
    Interface,
    Enum,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeDecl {
    pub id: TypeId,
    pub kind: TypeKind,
    pub access: AccessModifier,
    pub modifiers: Vec<Modifier>,
    pub name: String,
    pub generics: Vec<GenericParam>,
    pub extends: Vec<TypeRef>,
    pub implements: Vec<TypeRef>,
    pub scope: Span,
    pub members: Vec<TypeMember>,
    pub enclosing: Option<TypeId>,
}

impl TypeDecl {
    pub fn functions(&self) -> impl Iterator<Item = &FuncDecl> {
        self.members.iter().filter_map(|m| match m {
            TypeMember::Func(f) => Some(f),
            _ => None,
        })
    }

    pub fn fields(&self) -> impl Iterator<Item = &VarDecl> {
        self.members.iter().filter_map(|m| match m {
            TypeMember::Var(v) => Some(v),
            _ => None,
        })
    }

    pub fn nested_types(&self) -> impl Iterator<Item = TypeId> + '_ {
        self.members.iter().filter_map(|m| match m {
            TypeMember::Nested(id) => Some(*id),
            _ => None,
        })
    }

    pub fn is_generic_param(&self, name: &str) -> bool {
        self.generics.iter().any(|g| g.name == name)
    }
}

/// Owns every type declaration of a compilation unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypeArena {
    decls: Vec<TypeDecl>,
}

impl TypeArena {
    pub fn alloc(&mut self, mut decl: TypeDecl) -> TypeId {
        let id = TypeId(self.decls.len());
        decl.id = id;
        self.decls.push(decl);
        id
    }

    pub fn get(&self, id: TypeId) -> &TypeDecl {
        &self.decls[id.0]
    }

    pub fn get_mut(&mut self, id: TypeId) -> &mut TypeDecl {
        &mut self.decls[id.0]
    }

    pub fn iter(&self) -> impl Iterator<Item = &TypeDecl> {
        self.decls.iter()
    }

    pub fn len(&self) -> usize {
        self.decls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decls.is_empty()
    }

    /// Resolves a member's declaring type.
    pub fn owner_of(&self, func: &FuncDecl) -> &TypeDecl {
        self.get(func.owner)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatementScope {
    pub span: Span,
    pub statements: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Scope(StatementScope),
    Return { value: Option<Expr>, file_pos: usize },
    Unknown(Token),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
    BitNot,
    PreIncrement,
    PreDecrement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostfixOp {
    Increment,
    Decrement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Mul,
    Div,
    Mod,
    Add,
    Sub,
    Shl,
    Shr,
    UShr,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Neq,
    BitAnd,
    BitXor,
    BitOr,
    LogAnd,
    LogOr,
}

impl BinaryOp {
    pub fn precedence(self) -> u8 {
        match self {
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => 10,
            BinaryOp::Add | BinaryOp::Sub => 9,
            BinaryOp::Shl | BinaryOp::Shr | BinaryOp::UShr => 8,
            BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge => 7,
            BinaryOp::Eq | BinaryOp::Neq => 6,
            BinaryOp::BitAnd => 5,
            BinaryOp::BitXor => 4,
            BinaryOp::BitOr => 3,
            BinaryOp::LogAnd => 2,
            BinaryOp::LogOr => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Token),
    Name(String),
    This,
    Field {
        target: Box<Expr>,
        name: String,
    },
    Call {
        target: Option<Box<Expr>>,
        name: String,
        args: Vec<Expr>,
    },
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Postfix {
        op: PostfixOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    pub path: String,
    pub is_static: bool,
    pub wildcard: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompilationUnit {
    pub package: Option<String>,
    pub imports: Vec<Import>,
    /// Top-level declarations in source order.
    pub types: Vec<TypeId>,
    pub arena: TypeArena,
}

impl CompilationUnit {
    pub fn top_level(&self) -> impl Iterator<Item = &TypeDecl> {
        self.types.iter().map(|id| self.arena.get(*id))
    }
}
