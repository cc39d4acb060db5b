use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    // Keywords
    Def,
    Main,
    If,
    Elif,
    Else,
    While,
    For,
    In,
    Range,
    Print,
    Return,
    True,
    False,

    // Literals
    Identifier,
    Number,
    Float,
    String,

    // Operators
    Plus,          // +
    Minus,         // -
    Star,          // *
    StarStar,      // **
    Slash,         // /
    Percent,       // %
    Eq,            // ==
    NotEq,         // !=
    Less,          // <
    Greater,       // >
    LessEq,        // <=
    GreaterEq,     // >=
    Assign,        // =
    PlusAssign,    // +=
    MinusAssign,   // -=
    StarAssign,    // *=
    SlashAssign,   // /=
    PercentAssign, // %=

    // Delimiters
    LParen,   // (
    RParen,   // )
    Colon,    // :
    Comma,    // ,
    LBracket, // [
    RBracket, // ]

    // Structural
    Newline,
    Indent,
    Dedent,

    /// Input no rule matched. Kept in the stream so the parser can report it.
    Error,
}

impl TokenKind {
    pub fn keyword(word: &str) -> Option<Self> {
        let kind = match word {
            "def" => Self::Def,
            "main" => Self::Main,
            "if" => Self::If,
            "elif" => Self::Elif,
            "else" => Self::Else,
            "while" => Self::While,
            "for" => Self::For,
            "in" => Self::In,
            "range" => Self::Range,
            "print" => Self::Print,
            "return" => Self::Return,
            "True" => Self::True,
            "False" => Self::False,
            _ => return None,
        };
        Some(kind)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Def => "DEF",
            Self::Main => "MAIN",
            Self::If => "IF",
            Self::Elif => "ELIF",
            Self::Else => "ELSE",
            Self::While => "WHILE",
            Self::For => "FOR",
            Self::In => "IN",
            Self::Range => "RANGE",
            Self::Print => "PRINT",
            Self::Return => "RETURN",
            Self::True => "TRUE",
            Self::False => "FALSE",
            Self::Identifier => "IDENTIFIER",
            Self::Number => "NUMBER",
            Self::Float => "FLOAT",
            Self::String => "STRING",
            Self::Plus => "PLUS",
            Self::Minus => "MINUS",
            Self::Star => "MULT",
            Self::StarStar => "EXP",
            Self::Slash => "DIV",
            Self::Percent => "MOD",
            Self::Eq => "EQ",
            Self::NotEq => "NEQ",
            Self::Less => "LT",
            Self::Greater => "GT",
            Self::LessEq => "LTE",
            Self::GreaterEq => "GTE",
            Self::Assign => "ASSIGN",
            Self::PlusAssign => "PLUS_ASSIGN",
            Self::MinusAssign => "MINUS_ASSIGN",
            Self::StarAssign => "MULT_ASSIGN",
            Self::SlashAssign => "DIV_ASSIGN",
            Self::PercentAssign => "MOD_ASSIGN",
            Self::LParen => "LPAREN",
            Self::RParen => "RPAREN",
            Self::Colon => "COLON",
            Self::Comma => "COMMA",
            Self::LBracket => "LBRACK",
            Self::RBracket => "RBRACK",
            Self::Newline => "NEWLINE",
            Self::Indent => "INDENT",
            Self::Dedent => "DEDENT",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub lexeme: &'a str,
    pub span: Span,
}

impl<'a> Token<'a> {
    pub fn new(kind: TokenKind, lexeme: &'a str, span: Span) -> Self {
        Self { kind, lexeme, span }
    }

    pub fn line(&self) -> usize {
        self.span.line
    }
}

impl fmt::Display for Token<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TokenKind::Identifier
            | TokenKind::Number
            | TokenKind::Float
            | TokenKind::String
            | TokenKind::Error => write!(f, "{}({})", self.kind, self.lexeme),
            _ => write!(f, "{}", self.kind),
        }
    }
}
