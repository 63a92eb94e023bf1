//! Token definitions

use logos::Logos;

/// IVP token
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\n\r]+")]
#[logos(skip r"//[^\n]*")]
pub enum Token {
    // Declarations
    #[token("var")]
    Var,
    #[token("const")]
    Const,
    #[token("function")]
    Function,
    #[token("procedure")]
    Procedure,
    #[token("returns")]
    Returns,

    // Specifications
    #[token("requires")]
    Requires,
    #[token("ensures")]
    Ensures,
    #[token("modifies")]
    Modifies,
    #[token("free")]
    Free,

    // Statements
    #[token("havoc")]
    Havoc,
    #[token("assume")]
    Assume,
    #[token("assert")]
    Assert,
    #[token("call")]
    Call,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("while")]
    While,

    // Expressions
    #[token("old")]
    Old,
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("div")]
    Div,
    #[token("mod")]
    Mod,

    // Types
    #[token("int")]
    IntTy,
    #[token("bool")]
    BoolTy,

    // Literals
    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    IntLit(i64),
    #[regex(r#""[^"\n]*""#, |lex| { let s = lex.slice(); s[1..s.len() - 1].to_string() })]
    StringLit(String),

    // Identifiers; `$`, `@`, `#`, `.` and `'` let generated names round-trip
    #[regex(r"[A-Za-z_][A-Za-z0-9_$@#.']*", |lex| lex.slice().to_string())]
    Ident(String),

    // Operators
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<")]
    Lt,
    #[token("<=")]
    LtEq,
    #[token(">")]
    Gt,
    #[token(">=")]
    GtEq,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("!")]
    Bang,
    #[token("==>")]
    Implies,
    #[token("<==>")]
    Iff,
    #[token(":=")]
    ColonEq,

    // Delimiters
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{:")]
    LBraceColon,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,

    // Punctuation
    #[token(",")]
    Comma,
    #[token(";")]
    Semi,
    #[token(":")]
    Colon,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::IntLit(n) => write!(f, "{n}"),
            Token::StringLit(s) => write!(f, "\"{s}\""),
            Token::Ident(s) => write!(f, "{s}"),
            other => write!(f, "{other:?}"),
        }
    }
}
