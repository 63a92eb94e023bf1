//! Front-end errors and their rendering

use crate::ast::Span;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CompileError>;

/// Front-end error: anything that stops a program from being loaded,
/// resolved or type checked
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("{span}: invalid token: {message}")]
    Lexer { message: String, span: Span },

    #[error("{span}: syntax error: {message}")]
    Parser { message: String, span: Span },

    #[error("{span}: {message}")]
    Type { message: String, span: Span },

    #[error("{message}")]
    Io { message: String },

    #[error("invalid configuration: {message}")]
    Config { message: String },

    /// Name resolution error without a useful span
    #[error("{message}")]
    Resolve { message: String },
}

impl CompileError {
    pub fn lexer(message: impl Into<String>, span: Span) -> Self {
        Self::Lexer {
            message: message.into(),
            span,
        }
    }

    pub fn parser(message: impl Into<String>, span: Span) -> Self {
        Self::Parser {
            message: message.into(),
            span,
        }
    }

    pub fn type_error(message: impl Into<String>, span: Span) -> Self {
        Self::Type {
            message: message.into(),
            span,
        }
    }

    pub fn io_error(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    pub fn config_error(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn resolve_error(message: impl Into<String>) -> Self {
        Self::Resolve {
            message: message.into(),
        }
    }

    pub fn span(&self) -> Option<Span> {
        match self {
            Self::Lexer { span, .. } | Self::Parser { span, .. } | Self::Type { span, .. } => {
                Some(*span).filter(|s| !s.is_synthetic())
            }
            Self::Io { .. } | Self::Config { .. } | Self::Resolve { .. } => None,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Lexer { message, .. } => message,
            Self::Parser { message, .. } => message,
            Self::Type { message, .. } => message,
            Self::Io { message } => message,
            Self::Config { message } => message,
            Self::Resolve { message } => message,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Lexer { .. } => "lexical",
            Self::Parser { .. } => "syntax",
            Self::Type { .. } => "type",
            Self::Io { .. } => "I/O",
            Self::Config { .. } => "configuration",
            Self::Resolve { .. } => "resolution",
        }
    }
}

impl From<std::io::Error> for CompileError {
    fn from(err: std::io::Error) -> Self {
        CompileError::io_error(err.to_string())
    }
}

/// Print `error` to stderr, labelled against `source` when it has a span
pub fn report_error(filename: &str, source: &str, error: &CompileError) {
    use ariadne::{Color, Label, Report, ReportKind, Source};

    let kind = error.kind();
    let printed = if let Some(span) = error.span() {
        Report::build(ReportKind::Error, (filename, span.start..span.end))
            .with_message(format!("{kind} error"))
            .with_label(
                Label::new((filename, span.start..span.end))
                    .with_message(error.message())
                    .with_color(Color::Red),
            )
            .finish()
            .eprint((filename, Source::from(source)))
    } else {
        Report::build(ReportKind::Error, (filename, 0..0))
            .with_message(format!("{kind} error: {}", error.message()))
            .finish()
            .eprint((filename, Source::from(source)))
    };
    if printed.is_err() {
        eprintln!("{kind} error: {}", error.message());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_accessor() {
        let err = CompileError::type_error("bad", Span::new(3, 5));
        assert_eq!(err.span(), Some(Span::new(3, 5)));
        assert_eq!(err.message(), "bad");
        assert!(CompileError::io_error("x").span().is_none());
    }

    #[test]
    fn test_synthetic_span_hidden() {
        let err = CompileError::type_error("in harness", Span::SYNTHETIC);
        assert!(err.span().is_none());
    }

    #[test]
    fn test_display() {
        let err = CompileError::config_error("unknown backend `cvc`");
        assert_eq!(err.to_string(), "invalid configuration: unknown backend `cvc`");
        let err = CompileError::parser("expected `;`", Span::new(7, 8));
        assert_eq!(err.to_string(), "7..8: syntax error: expected `;`");
    }
}
