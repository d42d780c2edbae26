use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    // access and modifiers
    Public,
    Private,
    Protected,
    Static,
    Final,
    Abstract,
    Strictfp,
    Synchronized,
    Native,
    Transient,
    Volatile,
    Default,

    // declarations
    Class,
    Interface,
    Enum,
    Extends,
    Implements,
    Throws,
    Package,
    Import,

    // types
    Void,
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    Char,
    Boolean,

    // statements and expressions
    New,
    This,
    Return,
    If,
    Else,
    While,
    For,
    Do,
    Null,

    // literals
    IntLit,
    LongLit,
    FloatLit,
    DoubleLit,
    CharLit,
    StringLit,
    BooleanLit,
    Ident,

    // separators
    OpenCurly,
    CloseCurly,
    OpenBracket,
    CloseBracket,
    OpenParen,
    CloseParen,
    Semi,
    Comma,
    Dot,
    Ellipsis,
    At,
    Question,
    Colon,
    DoubleColon,
    Arrow,

    // operators
    Assign,
    Eq,
    Neq,
    Not,
    Tilde,
    Plus,
    Minus,
    Mul,
    Div,
    Mod,
    Increment,
    Decrement,
    OpenChevron,
    CloseChevron,
    Le,
    Ge,
    Shl,
    BitAnd,
    BitOr,
    BitXor,
    LogAnd,
    LogOr,
    PlusAssign,
    MinusAssign,
    MulAssign,
    DivAssign,
    ModAssign,
    AndAssign,
    OrAssign,
    XorAssign,
    ShlAssign,
}

impl TokenKind {
    pub fn keyword(word: &str) -> Option<TokenKind> {
        let kind = match word {
            "public" => TokenKind::Public,
            "private" => TokenKind::Private,
            "protected" => TokenKind::Protected,
            "static" => TokenKind::Static,
            "final" => TokenKind::Final,
            "abstract" => TokenKind::Abstract,
            "strictfp" => TokenKind::Strictfp,
            "synchronized" => TokenKind::Synchronized,
            "native" => TokenKind::Native,
            "transient" => TokenKind::Transient,
            "volatile" => TokenKind::Volatile,
            "default" => TokenKind::Default,
            "class" => TokenKind::Class,
            "interface" => TokenKind::Interface,
            "enum" => TokenKind::Enum,
            "extends" => TokenKind::Extends,
            "implements" => TokenKind::Implements,
            "throws" => TokenKind::Throws,
            "package" => TokenKind::Package,
            "import" => TokenKind::Import,
            "void" => TokenKind::Void,
            "byte" => TokenKind::Byte,
            "short" => TokenKind::Short,
            "int" => TokenKind::Int,
            "long" => TokenKind::Long,
            "float" => TokenKind::Float,
            "double" => TokenKind::Double,
            "char" => TokenKind::Char,
            "boolean" => TokenKind::Boolean,
            "new" => TokenKind::New,
            "this" => TokenKind::This,
            "return" => TokenKind::Return,
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "while" => TokenKind::While,
            "for" => TokenKind::For,
            "do" => TokenKind::Do,
            "null" => TokenKind::Null,
            "true" | "false" => TokenKind::BooleanLit,
            _ => return None,
        };
        Some(kind)
    }

    pub fn is_literal(self) -> bool {
        matches!(
            self,
            TokenKind::IntLit
                | TokenKind::LongLit
                | TokenKind::FloatLit
                | TokenKind::DoubleLit
                | TokenKind::CharLit
                | TokenKind::StringLit
                | TokenKind::BooleanLit
                | TokenKind::Null
        )
    }

    pub fn is_primitive(self) -> bool {
        matches!(
            self,
            TokenKind::Byte
                | TokenKind::Short
                | TokenKind::Int
                | TokenKind::Long
                | TokenKind::Float
                | TokenKind::Double
                | TokenKind::Char
                | TokenKind::Boolean
        )
    }

    /// Source spelling for fixed tokens, `None` for tokens that carry a value.
    pub fn symbol(self) -> Option<&'static str> {
        let s = match self {
            TokenKind::OpenCurly => "{",
            TokenKind::CloseCurly => "}",
            TokenKind::OpenBracket => "[",
            TokenKind::CloseBracket => "]",
            TokenKind::OpenParen => "(",
            TokenKind::CloseParen => ")",
            TokenKind::Semi => ";",
            TokenKind::Comma => ",",
            TokenKind::Dot => ".",
            TokenKind::Ellipsis => "...",
            TokenKind::At => "@",
            TokenKind::Question => "?",
            TokenKind::Colon => ":",
            TokenKind::DoubleColon => "::",
            TokenKind::Arrow => "->",
            TokenKind::Assign => "=",
            TokenKind::Eq => "==",
            TokenKind::Neq => "!=",
            TokenKind::Not => "!",
            TokenKind::Tilde => "~",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Mul => "*",
            TokenKind::Div => "/",
            TokenKind::Mod => "%",
            TokenKind::Increment => "++",
            TokenKind::Decrement => "--",
            TokenKind::OpenChevron => "<",
            TokenKind::CloseChevron => ">",
            TokenKind::Le => "<=",
            TokenKind::Ge => ">=",
            TokenKind::Shl => "<<",
            TokenKind::BitAnd => "&",
            TokenKind::BitOr => "|",
            TokenKind::BitXor => "^",
            TokenKind::LogAnd => "&&",
            TokenKind::LogOr => "||",
            TokenKind::PlusAssign => "+=",
            TokenKind::MinusAssign => "-=",
            TokenKind::MulAssign => "*=",
            TokenKind::DivAssign => "/=",
            TokenKind::ModAssign => "%=",
            TokenKind::AndAssign => "&=",
            TokenKind::OrAssign => "|=",
            TokenKind::XorAssign => "^=",
            TokenKind::ShlAssign => "<<=",
            _ => return None,
        };
        Some(s)
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.symbol() {
            Some(symbol) => write!(f, "'{}'", symbol),
            None => match self {
                TokenKind::Ident => write!(f, "identifier"),
                TokenKind::IntLit
                | TokenKind::LongLit
                | TokenKind::FloatLit
                | TokenKind::DoubleLit => write!(f, "numeric literal"),
                TokenKind::CharLit => write!(f, "char literal"),
                TokenKind::StringLit => write!(f, "string literal"),
                TokenKind::BooleanLit => write!(f, "boolean literal"),
                keyword => write!(f, "'{}'", format!("{:?}", keyword).to_lowercase()),
            },
        }
    }
}

/// A lexeme with its byte range in the original source.
///
/// `value` may be normalised (string bodies, decimal numerals), so it is not
/// necessarily `source[file_pos..source_end]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub value: String,
    pub file_pos: usize,
    pub source_end: usize,
}

impl Token {
    /// A token whose value is its own spelling.
    pub fn new(kind: TokenKind, value: impl Into<String>, file_pos: usize) -> Self {
        let value = value.into();
        let source_end = file_pos + value.len();
        Self {
            kind,
            value,
            file_pos,
            source_end,
        }
    }

    pub fn spanning(kind: TokenKind, value: impl Into<String>, file_pos: usize, source_end: usize) -> Self {
        Self {
            kind,
            value: value.into(),
            file_pos,
            source_end,
        }
    }
}
