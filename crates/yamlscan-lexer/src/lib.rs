//! yamlscan Lexer
//!
//! Tokenizes YAML source text into a stream of tokens for a downstream parser.
//! Handles block indentation, flow collections, all five scalar styles,
//! node properties (anchors, aliases, tags), comments, directives and
//! document markers, with exact positions on every token.
//!
//! # Example
//!
//! ```
//! use yamlscan_lexer::{tokenize, TokenKind};
//!
//! let tokens = tokenize("a: 1\n").unwrap();
//! assert_eq!(tokens[0].kind, TokenKind::BlockMappingKey(yamlscan_lexer::ScalarStyle::Plain));
//! assert_eq!(tokens[2].value, "1");
//! ```

pub mod scanner;
pub mod token;
pub mod tokenizer;

pub use scanner::{ScanOptions, ScanOutcome, Scanner};
pub use token::{Position, ScalarStyle, Span, Token, TokenKind};
pub use tokenizer::{tokenize, tokenize_bytes, tokenize_with, TokenizeError};

/// Scanner error with the position of the offending input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Scan error at line {}, column {}: {kind}", position.line, position.column)]
pub struct ScanError {
    pub kind: ScanErrorKind,
    pub position: Position,
}

impl ScanError {
    pub fn new(kind: ScanErrorKind, position: Position) -> Self {
        Self { kind, position }
    }

    pub fn line(&self) -> usize {
        self.position.line
    }

    pub fn column(&self) -> usize {
        self.position.column
    }
}

/// The lexical rule a [`ScanError`] reports as violated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScanErrorKind {
    #[error("tabs are not allowed for indentation, use spaces")]
    TabIndentation,

    #[error("indentation mismatch: {width} spaces does not match any outer level")]
    IndentationMismatch { width: usize },

    #[error("unterminated quoted scalar")]
    UnterminatedQuote,

    #[error("invalid escape sequence '\\{0}'")]
    InvalidEscape(String),

    #[error("unexpected '{0}' without a matching open flow collection")]
    UnexpectedFlowEnd(char),

    #[error("unclosed flow collection")]
    UnclosedFlowCollection,

    #[error("malformed {0} name")]
    MalformedName(NameKind),

    #[error("malformed directive: {0}")]
    MalformedDirective(String),

    #[error("invalid block scalar header")]
    InvalidBlockScalarHeader,

    #[error("mapping values are not allowed in this context")]
    MappingValueNotAllowed,

    #[error("block sequence entries are not allowed in this context")]
    BlockEntryNotAllowed,

    #[error("mapping keys are not allowed in this context")]
    KeyNotAllowed,

    #[error("unexpected character '{0}'")]
    UnexpectedCharacter(char),

    #[error("input is not valid UTF-8")]
    InvalidUtf8,
}

/// Which node property a [`ScanErrorKind::MalformedName`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameKind {
    Anchor,
    Alias,
    Tag,
}

impl std::fmt::Display for NameKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            NameKind::Anchor => "anchor",
            NameKind::Alias => "alias",
            NameKind::Tag => "tag",
        })
    }
}
