//! Token definitions for the LineScript lexer.

use std::fmt;

use lsc_util::{Span, Symbol};

/// The kind of a lexed token.
#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    // Literals
    /// Decimal integer literal
    Int(i64),
    /// Float literal (requires a decimal point or exponent)
    Float(f64),
    /// Double-quoted string literal, escapes already decoded
    Str(String),
    /// Identifier
    Ident(Symbol),
    /// Dotted name: `.format`, `.stateSpeed`, or a member access `.field`
    DotName(Symbol),

    // Keywords
    Declare,
    Const,
    Fn,
    Func,
    Class,
    Extends,
    Public,
    Protected,
    Private,
    Virtual,
    Override,
    Final,
    Do,
    End,
    If,
    Elif,
    Else,
    While,
    For,
    In,
    Return,
    Break,
    Continue,
    Throws,
    Spawn,
    Await,
    Parallel,
    True,
    False,
    Not,
    And,
    Or,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    StarStar,
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    PercentEq,
    CaretEq,
    StarStarEq,
    PlusPlus,
    MinusMinus,
    Assign,
    EqEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    AndAnd,
    OrOr,
    DotDot,
    Arrow,

    // Punctuation
    Colon,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,

    /// Statement terminator
    Newline,
    /// End of input
    Eof,
}

impl TokenKind {
    /// Short human-readable description for diagnostics.
    pub fn describe(&self) -> &'static str {
        match self {
            TokenKind::Int(_) => "integer literal",
            TokenKind::Float(_) => "float literal",
            TokenKind::Str(_) => "string literal",
            TokenKind::Ident(_) => "identifier",
            TokenKind::DotName(_) => "dotted name",
            TokenKind::Declare => "`declare`",
            TokenKind::Const => "`const`",
            TokenKind::Fn => "`fn`",
            TokenKind::Func => "`func`",
            TokenKind::Class => "`class`",
            TokenKind::Extends => "`extends`",
            TokenKind::Public => "`public`",
            TokenKind::Protected => "`protected`",
            TokenKind::Private => "`private`",
            TokenKind::Virtual => "`virtual`",
            TokenKind::Override => "`override`",
            TokenKind::Final => "`final`",
            TokenKind::Do => "`do`",
            TokenKind::End => "`end`",
            TokenKind::If => "`if`",
            TokenKind::Elif => "`elif`",
            TokenKind::Else => "`else`",
            TokenKind::While => "`while`",
            TokenKind::For => "`for`",
            TokenKind::In => "`in`",
            TokenKind::Return => "`return`",
            TokenKind::Break => "`break`",
            TokenKind::Continue => "`continue`",
            TokenKind::Throws => "`throws`",
            TokenKind::Spawn => "`spawn`",
            TokenKind::Await => "`await`",
            TokenKind::Parallel => "`parallel`",
            TokenKind::True => "`true`",
            TokenKind::False => "`false`",
            TokenKind::Not => "`not`",
            TokenKind::And => "`and`",
            TokenKind::Or => "`or`",
            TokenKind::Plus => "`+`",
            TokenKind::Minus => "`-`",
            TokenKind::Star => "`*`",
            TokenKind::Slash => "`/`",
            TokenKind::Percent => "`%`",
            TokenKind::Caret => "`^`",
            TokenKind::StarStar => "`**`",
            TokenKind::PlusEq => "`+=`",
            TokenKind::MinusEq => "`-=`",
            TokenKind::StarEq => "`*=`",
            TokenKind::SlashEq => "`/=`",
            TokenKind::PercentEq => "`%=`",
            TokenKind::CaretEq => "`^=`",
            TokenKind::StarStarEq => "`**=`",
            TokenKind::PlusPlus => "`++`",
            TokenKind::MinusMinus => "`--`",
            TokenKind::Assign => "`=`",
            TokenKind::EqEq => "`==`",
            TokenKind::NotEq => "`!=`",
            TokenKind::Lt => "`<`",
            TokenKind::LtEq => "`<=`",
            TokenKind::Gt => "`>`",
            TokenKind::GtEq => "`>=`",
            TokenKind::AndAnd => "`&&`",
            TokenKind::OrOr => "`||`",
            TokenKind::DotDot => "`..`",
            TokenKind::Arrow => "`->`",
            TokenKind::Colon => "`:`",
            TokenKind::Comma => "`,`",
            TokenKind::LParen => "`(`",
            TokenKind::RParen => "`)`",
            TokenKind::LBracket => "`[`",
            TokenKind::RBracket => "`]`",
            TokenKind::Newline => "end of line",
            TokenKind::Eof => "end of file",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// A token with its source span.
#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }
}

/// Map an identifier to its keyword token, if it is one.
///
/// The keyword table is fixed; `owned`, `step`, `constructor`, and `flag`
/// are contextual and stay identifiers.
pub fn keyword_from_ident(text: &str) -> Option<TokenKind> {
    let kind = match text {
        "declare" => TokenKind::Declare,
        "const" => TokenKind::Const,
        "fn" => TokenKind::Fn,
        "func" => TokenKind::Func,
        "class" => TokenKind::Class,
        "extends" => TokenKind::Extends,
        "public" => TokenKind::Public,
        "protected" => TokenKind::Protected,
        "private" => TokenKind::Private,
        "virtual" => TokenKind::Virtual,
        "override" => TokenKind::Override,
        "final" => TokenKind::Final,
        "do" => TokenKind::Do,
        "end" => TokenKind::End,
        "if" => TokenKind::If,
        "elif" => TokenKind::Elif,
        "else" => TokenKind::Else,
        "while" => TokenKind::While,
        "for" => TokenKind::For,
        "in" => TokenKind::In,
        "return" => TokenKind::Return,
        "break" => TokenKind::Break,
        "continue" => TokenKind::Continue,
        "throws" => TokenKind::Throws,
        "spawn" => TokenKind::Spawn,
        "await" => TokenKind::Await,
        "parallel" => TokenKind::Parallel,
        "true" => TokenKind::True,
        "false" => TokenKind::False,
        "not" => TokenKind::Not,
        "and" => TokenKind::And,
        "or" => TokenKind::Or,
        _ => return None,
    };
    Some(kind)
}
