//! Byte ranges into the source text

use serde::{Deserialize, Serialize};

/// Byte range `start..end` of a node in its source file
///
/// Nodes built by the harness builder or the expander have no source text
/// and carry [`Span::SYNTHETIC`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub const SYNTHETIC: Span = Span { start: 0, end: 0 };

    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn is_synthetic(&self) -> bool {
        *self == Self::SYNTHETIC
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_synthetic() {
            write!(f, "<synthetic>")
        } else {
            write!(f, "{}..{}", self.start, self.end)
        }
    }
}

/// A node paired with where it came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spanned<T> {
    pub node: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(node: T, span: Span) -> Self {
        Self { node, span }
    }

    /// Wrap a node that has no source location
    pub fn synthetic(node: T) -> Self {
        Self::new(node, Span::SYNTHETIC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_nodes() {
        assert!(Span::SYNTHETIC.is_synthetic());
        assert!(!Span::new(1, 2).is_synthetic());
        assert!(Spanned::synthetic("assume").span.is_synthetic());
    }

    #[test]
    fn test_span_display() {
        assert_eq!(Span::new(4, 9).to_string(), "4..9");
        assert_eq!(Span::SYNTHETIC.to_string(), "<synthetic>");
    }
}
