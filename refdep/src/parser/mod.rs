//! Parser implementation using lalrpop

use crate::ast::{Contract, Expr, Program, Span};
use crate::error::{CompileError, Result};
use crate::lexer::{Token, tokenize};


lalrpop_util::lalrpop_mod!(
    #[allow(clippy::all)]
    grammar
);

/// Procedure specification clause, collected before the declaration is built
pub(crate) enum ProcSpec {
    Requires(Contract),
    Ensures(Contract),
    Modifies(Vec<String>),
}

type GrammarError = lalrpop_util::ParseError<usize, Token, &'static str>;

fn to_compile_error(e: GrammarError) -> CompileError {
    let span = match &e {
        lalrpop_util::ParseError::InvalidToken { location } => Span::new(*location, *location + 1),
        lalrpop_util::ParseError::UnrecognizedEof { location, .. } => {
            Span::new(*location, *location + 1)
        }
        lalrpop_util::ParseError::UnrecognizedToken { token, .. } => Span::new(token.0, token.2),
        lalrpop_util::ParseError::ExtraToken { token } => Span::new(token.0, token.2),
        lalrpop_util::ParseError::User { .. } => Span::new(0, 1),
    };
    CompileError::parser(format!("{e}"), span)
}

fn token_triples(tokens: Vec<(Token, Span)>) -> impl Iterator<Item = (usize, Token, usize)> {
    tokens
        .into_iter()
        .map(|(tok, span)| (span.start, tok, span.end))
}

/// Parse tokens into a program
pub fn parse(_filename: &str, _source: &str, tokens: Vec<(Token, Span)>) -> Result<Program> {
    let decls = grammar::ProgramParser::new()
        .parse(token_triples(tokens))
        .map_err(to_compile_error)?;
    Program::from_parsed(decls)
}

/// Tokenize and parse a complete program
pub fn parse_source(filename: &str, source: &str) -> Result<Program> {
    let tokens = tokenize(source)?;
    parse(filename, source, tokens)
}

/// Parse a standalone expression
pub fn parse_expr(source: &str) -> Result<Expr> {
    let tokens = tokenize(source)?;
    grammar::ExprParser::new()
        .parse(token_triples(tokens))
        .map_err(to_compile_error)
}
