use serde::Serialize;

/// A point in the source text.
///
/// `line` and `column` are 1-based, with columns counted in characters.
/// `offset` is the 0-based byte offset into the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Position {
    pub line: usize,
    pub column: usize,
    pub offset: usize,
}

impl Position {
    pub fn new(line: usize, column: usize, offset: usize) -> Self {
        Self {
            line,
            column,
            offset,
        }
    }

    /// The position of the first character of a source.
    pub fn start() -> Self {
        Self::new(1, 1, 0)
    }

    /// Position of byte `offset` in `source`, counting lines and columns
    /// from the beginning.
    ///
    /// `offset` must fall on a character boundary of `source`. A leading
    /// byte order mark takes no column, as in the scanner.
    pub(crate) fn locate(source: &str, offset: usize) -> Self {
        let mut position = Self::start();
        let mut chars = source[..offset].chars().peekable();
        if chars.next_if_eq(&crate::scanner::BOM).is_some() {
            position.offset = crate::scanner::BOM.len_utf8();
        }
        while let Some(c) = chars.next() {
            position.offset += c.len_utf8();
            match c {
                '\n' => position.next_line(),
                '\r' if chars.peek() != Some(&'\n') => position.next_line(),
                _ => position.column += 1,
            }
        }
        position
    }

    pub(crate) fn next_line(&mut self) {
        self.line += 1;
        self.column = 1;
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Source range of a token. `end` is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Span {
    pub start: Position,
    pub end: Position,
}

impl Span {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    /// A zero-width span, used for synthesized block-collection tokens.
    pub fn empty(at: Position) -> Self {
        Self { start: at, end: at }
    }

    pub fn is_empty(&self) -> bool {
        self.start.offset == self.end.offset
    }
}

/// Presentation style of a scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ScalarStyle {
    Plain,
    SingleQuoted,
    DoubleQuoted,
    /// `|` block scalar.
    Literal,
    /// `>` block scalar.
    Folded,
}

/// Token classification for YAML source.
///
/// Decoded content lives in [`Token::value`]; the only data a kind carries
/// is the style of an implicit mapping key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TokenKind {
    // Document structure
    DocumentStart, // ---
    DocumentEnd,   // ...
    Directive,     // %YAML 1.2

    // Block collections (zero width, synthesized from indentation)
    BlockSequenceStart,
    BlockMappingStart,
    BlockEnd,

    // Block indicators
    BlockSequenceEntry, // -
    ExplicitKey,        // ?
    /// An implicit key of a block mapping, carrying the key's scalar style.
    BlockMappingKey(ScalarStyle),
    BlockMappingValue, // :

    // Flow collections
    FlowSequenceStart, // [
    FlowSequenceEnd,   // ]
    FlowMappingStart,  // {
    FlowMappingEnd,    // }
    FlowEntry,         // ,
    FlowMappingValue,  // :

    // Scalars
    PlainScalar,
    SingleQuotedScalar,
    DoubleQuotedScalar,
    LiteralScalar,
    FoldedScalar,

    // Node properties
    Anchor, // &name
    Alias,  // *name
    Tag,    // !tag

    Comment,
}

impl TokenKind {
    /// The scalar token kind for a presentation style.
    pub fn scalar(style: ScalarStyle) -> Self {
        match style {
            ScalarStyle::Plain => TokenKind::PlainScalar,
            ScalarStyle::SingleQuoted => TokenKind::SingleQuotedScalar,
            ScalarStyle::DoubleQuoted => TokenKind::DoubleQuotedScalar,
            ScalarStyle::Literal => TokenKind::LiteralScalar,
            ScalarStyle::Folded => TokenKind::FoldedScalar,
        }
    }

    /// Style of the scalar this token carries, keys included.
    pub fn scalar_style(&self) -> Option<ScalarStyle> {
        match self {
            TokenKind::PlainScalar => Some(ScalarStyle::Plain),
            TokenKind::SingleQuotedScalar => Some(ScalarStyle::SingleQuoted),
            TokenKind::DoubleQuotedScalar => Some(ScalarStyle::DoubleQuoted),
            TokenKind::LiteralScalar => Some(ScalarStyle::Literal),
            TokenKind::FoldedScalar => Some(ScalarStyle::Folded),
            TokenKind::BlockMappingKey(style) => Some(*style),
            _ => None,
        }
    }

    pub fn is_block_start(&self) -> bool {
        matches!(
            self,
            TokenKind::BlockSequenceStart | TokenKind::BlockMappingStart
        )
    }

    pub fn is_flow_start(&self) -> bool {
        matches!(
            self,
            TokenKind::FlowSequenceStart | TokenKind::FlowMappingStart
        )
    }

    pub fn is_flow_end(&self) -> bool {
        matches!(self, TokenKind::FlowSequenceEnd | TokenKind::FlowMappingEnd)
    }

    /// Short lowercase name used in diagnostics and the CLI dump.
    pub fn name(&self) -> &'static str {
        match self {
            TokenKind::DocumentStart => "document-start",
            TokenKind::DocumentEnd => "document-end",
            TokenKind::Directive => "directive",
            TokenKind::BlockSequenceStart => "block-sequence-start",
            TokenKind::BlockMappingStart => "block-mapping-start",
            TokenKind::BlockEnd => "block-end",
            TokenKind::BlockSequenceEntry => "block-sequence-entry",
            TokenKind::ExplicitKey => "explicit-key",
            TokenKind::BlockMappingKey(_) => "block-mapping-key",
            TokenKind::BlockMappingValue => "block-mapping-value",
            TokenKind::FlowSequenceStart => "flow-sequence-start",
            TokenKind::FlowSequenceEnd => "flow-sequence-end",
            TokenKind::FlowMappingStart => "flow-mapping-start",
            TokenKind::FlowMappingEnd => "flow-mapping-end",
            TokenKind::FlowEntry => "flow-entry",
            TokenKind::FlowMappingValue => "flow-mapping-value",
            TokenKind::PlainScalar => "plain-scalar",
            TokenKind::SingleQuotedScalar => "single-quoted-scalar",
            TokenKind::DoubleQuotedScalar => "double-quoted-scalar",
            TokenKind::LiteralScalar => "literal-scalar",
            TokenKind::FoldedScalar => "folded-scalar",
            TokenKind::Anchor => "anchor",
            TokenKind::Alias => "alias",
            TokenKind::Tag => "tag",
            TokenKind::Comment => "comment",
        }
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A token produced by the YAML scanner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Token {
    pub kind: TokenKind,
    /// Decoded content: scalar text after escape and folding, names for
    /// anchors and aliases, empty for pure indicators.
    pub value: String,
    /// The exact source slice the token covers.
    pub raw: String,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, value: String, raw: String, span: Span) -> Self {
        Self {
            kind,
            value,
            raw,
            span,
        }
    }

    /// A zero-width token with no content.
    pub fn synthetic(kind: TokenKind, at: Position) -> Self {
        Self::new(kind, String::new(), String::new(), Span::empty(at))
    }
}
