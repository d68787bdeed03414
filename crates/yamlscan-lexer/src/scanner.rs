use std::mem;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::token::{Position, Span, Token, TokenKind};
use crate::{NameKind, ScanError, ScanErrorKind};

pub(crate) const BOM: char = '\u{feff}';

mod scalar;

/// Scanner configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanOptions {
    /// Keep comment tokens in the output instead of dropping them.
    pub emit_comments: bool,
}

impl ScanOptions {
    pub fn with_comments(mut self) -> Self {
        self.emit_comments = true;
        self
    }
}

/// Result of a successful scan step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Tokens produced together by one step. Never empty.
    Group(Vec<Token>),
    /// The whole input has been consumed.
    Exhausted,
}

#[derive(Debug, Clone)]
enum State {
    Scanning,
    Exhausted,
    Failed(ScanError),
}

/// Saved cursor, for lookahead that may have to be undone.
#[derive(Debug, Clone, Copy)]
struct Checkpoint {
    pos: usize,
    cursor: Position,
}

/// YAML source scanner.
///
/// Produces tokens one atomic group at a time from a complete source buffer.
/// Block structure comes from an indentation stack that starts at column 0;
/// a deeper block collection pushes the column of its first entry or key
/// and emits a zero-width start token, and every pop emits `BlockEnd`.
/// Flow collections are tracked by a stack of open brackets, inside which
/// indentation is ignored.
///
/// - `Vec<char>` source for index-based navigation, with a byte offset kept
///   alongside for spans
/// - Lazy, column-based block starts (`- a: 1` opens a mapping at column 3)
/// - Implicit keys found by lookahead on the key's own line
/// - Position tracking on every token
pub struct Scanner<'a> {
    source: &'a str,
    chars: Vec<char>,
    pos: usize,
    cursor: Position,
    indent_stack: Vec<usize>,
    flow_stack: Vec<char>,
    pending: Vec<Token>,
    options: ScanOptions,
    state: State,
    finished: bool,
    at_line_start: bool,
    /// An implicit key, `?`, or `-` may start here.
    key_allowed: bool,
    /// Char index right after a quoted scalar or flow collection in flow
    /// context, where `:` is a value indicator even without a blank.
    adjacent_end: Option<usize>,
    directives_allowed: bool,
    /// A block collection sits at column 0 of the current document.
    root_collection: bool,
}

impl<'a> Scanner<'a> {
    /// Create a new scanner for the given source.
    pub fn new(source: &'a str) -> Self {
        Self::with_options(source, ScanOptions::default())
    }

    /// Create a scanner with explicit options.
    ///
    /// A leading byte order mark is skipped; offsets still count its bytes.
    pub fn with_options(source: &'a str, options: ScanOptions) -> Self {
        let chars: Vec<char> = source.chars().collect();
        let mut cursor = Position::start();
        let mut pos = 0;
        if chars.first() == Some(&BOM) {
            pos = 1;
            cursor.offset = BOM.len_utf8();
        }
        Self {
            source,
            chars,
            pos,
            cursor,
            indent_stack: vec![0],
            flow_stack: Vec::new(),
            pending: Vec::new(),
            options,
            state: State::Scanning,
            finished: false,
            at_line_start: true,
            key_allowed: true,
            adjacent_end: None,
            directives_allowed: true,
            root_collection: false,
        }
    }

    /// Tokenize the entire source, discarding tokens scanned before an error.
    pub fn tokenize(source: &str) -> Result<Vec<Token>, ScanError> {
        crate::tokenizer::tokenize(source).map_err(|e| e.error)
    }

    pub fn position(&self) -> Position {
        self.cursor
    }

    /// Number of currently open flow collections.
    pub fn flow_depth(&self) -> usize {
        self.flow_stack.len()
    }

    /// Columns of the open block levels, outermost first.
    pub fn indent_stack(&self) -> &[usize] {
        &self.indent_stack
    }

    /// Scan the next atomic group of tokens.
    ///
    /// After exhaustion every call returns `Exhausted`; after an error every
    /// call returns that error again.
    pub fn scan_step(&mut self) -> Result<ScanOutcome, ScanError> {
        match &self.state {
            State::Exhausted => return Ok(ScanOutcome::Exhausted),
            State::Failed(error) => return Err(error.clone()),
            State::Scanning => {}
        }

        while self.pending.is_empty() {
            if self.finished {
                self.state = State::Exhausted;
                return Ok(ScanOutcome::Exhausted);
            }
            if let Err(error) = self.fetch_next() {
                debug!(%error, "scan failed");
                self.pending.clear();
                self.state = State::Failed(error.clone());
                return Err(error);
            }
        }

        let group = mem::take(&mut self.pending);
        trace!(
            line = group[0].span.start.line,
            column = group[0].span.start.column,
            first = %group[0].kind,
            len = group.len(),
            "scan step"
        );
        Ok(ScanOutcome::Group(group))
    }

    /// Consume input until at least one token is pending or the input ends.
    /// Whitespace, line breaks and dropped comments leave nothing pending.
    fn fetch_next(&mut self) -> Result<(), ScanError> {
        if self.at_line_start {
            self.at_line_start = false;
            if self.flow_depth() == 0 {
                self.handle_indentation()?;
            }
        }

        self.skip_blanks();

        let Some(ch) = self.peek() else {
            return self.fetch_stream_end();
        };

        match ch {
            '\n' | '\r' => {
                self.skip_break();
                self.at_line_start = true;
                return Ok(());
            }
            '#' if self.preceded_by_blank() => {
                self.scan_comment();
                return Ok(());
            }
            _ => {}
        }

        if self.cursor.column == 1 {
            if ch == '%' && self.flow_depth() == 0 {
                return self.scan_directive();
            }
            if self.at_document_marker("---") {
                return self.fetch_document_marker(TokenKind::DocumentStart);
            }
            if self.at_document_marker("...") {
                return self.fetch_document_marker(TokenKind::DocumentEnd);
            }
        }

        self.directives_allowed = false;

        match ch {
            '[' | '{' => self.fetch_flow_start(ch),
            ']' | '}' => self.fetch_flow_end(ch),
            ',' if self.flow_depth() > 0 => self.fetch_flow_entry(),
            '-' if is_blankz(self.peek_nth(1)) => self.fetch_block_entry(),
            '?' if is_blankz(self.peek_nth(1)) => self.fetch_explicit_key(),
            ':' if self.at_value_indicator() => self.fetch_value_indicator(),
            '|' | '>' if self.flow_depth() == 0 => self.fetch_block_scalar(ch),
            '&' | '!' | '*' | '\'' | '"' => self.fetch_node(),
            c if self.can_start_plain(c) => self.fetch_node(),
            c => Err(self.error(ScanErrorKind::UnexpectedCharacter(c))),
        }
    }

    // --- Indentation ---

    /// Handle indentation at the start of a block-context line.
    /// Counts leading spaces and closes every block level deeper than them.
    fn handle_indentation(&mut self) -> Result<(), ScanError> {
        let mut width = 0;
        while self.peek() == Some(' ') {
            self.advance();
            width += 1;
        }

        if self.peek() == Some('\t') {
            // Tabs may pad blank and comment-only lines.
            let mut ahead = 0;
            while matches!(self.peek_nth(ahead), Some(' ' | '\t')) {
                ahead += 1;
            }
            if matches!(self.peek_nth(ahead), None | Some('\n' | '\r' | '#')) {
                return Ok(());
            }
            return Err(self.error(ScanErrorKind::TabIndentation));
        }

        // Blank and comment-only lines don't affect indentation
        if matches!(self.peek(), None | Some('\n' | '\r' | '#')) {
            return Ok(());
        }

        self.key_allowed = true;
        self.unroll_indent(width)
    }

    /// Pop every level deeper than `width`, emitting `BlockEnd` per pop.
    fn unroll_indent(&mut self, width: usize) -> Result<(), ScanError> {
        let mut popped = 0;
        while self.indent_stack.len() > 1 && self.top_indent() > width {
            self.indent_stack.pop();
            self.pending
                .push(Token::synthetic(TokenKind::BlockEnd, self.cursor));
            popped += 1;
        }

        if popped > 0 {
            debug!(line = self.cursor.line, width, popped, "dedent");
            if self.top_indent() != width {
                return Err(self.error(ScanErrorKind::IndentationMismatch { width }));
            }
        }
        Ok(())
    }

    /// Open a block collection at `at` if it is deeper than the current
    /// level. Returns the start token for the caller to place in its group.
    fn roll_indent(&mut self, at: Position, kind: TokenKind) -> Option<Token> {
        if self.flow_depth() > 0 {
            return None;
        }
        let width = at.column - 1;
        if width > self.top_indent() {
            self.indent_stack.push(width);
            Some(Token::synthetic(kind, at))
        } else {
            if self.indent_stack.len() == 1 {
                self.root_collection = true;
            }
            None
        }
    }

    /// Close every open block level.
    fn close_blocks(&mut self) {
        while self.indent_stack.len() > 1 {
            self.indent_stack.pop();
            self.pending
                .push(Token::synthetic(TokenKind::BlockEnd, self.cursor));
        }
    }

    fn top_indent(&self) -> usize {
        self.indent_stack.last().copied().unwrap_or(0)
    }

    // --- Structure ---

    fn fetch_stream_end(&mut self) -> Result<(), ScanError> {
        if self.flow_depth() > 0 {
            return Err(self.error(ScanErrorKind::UnclosedFlowCollection));
        }
        self.close_blocks();
        self.finished = true;
        Ok(())
    }

    fn at_document_marker(&self, marker: &str) -> bool {
        marker
            .chars()
            .enumerate()
            .all(|(i, m)| self.peek_nth(i) == Some(m))
            && is_blankz(self.peek_nth(3))
    }

    /// Scan `---` or `...`. Both close every open collection.
    fn fetch_document_marker(&mut self, kind: TokenKind) -> Result<(), ScanError> {
        if self.flow_depth() > 0 {
            return Err(self.error(ScanErrorKind::UnclosedFlowCollection));
        }
        self.close_blocks();

        let start = self.cursor;
        for _ in 0..3 {
            self.advance();
        }
        self.push_token(kind, String::new(), start);
        debug!(line = start.line, %kind, "document marker");

        self.key_allowed = false;
        self.root_collection = false;
        self.adjacent_end = None;
        self.directives_allowed = kind == TokenKind::DocumentEnd;
        Ok(())
    }

    fn fetch_flow_start(&mut self, bracket: char) -> Result<(), ScanError> {
        let start = self.cursor;
        self.advance();
        self.flow_stack.push(bracket);

        let kind = if bracket == '[' {
            TokenKind::FlowSequenceStart
        } else {
            TokenKind::FlowMappingStart
        };
        self.push_token(kind, String::new(), start);
        self.key_allowed = true;
        Ok(())
    }

    fn fetch_flow_end(&mut self, bracket: char) -> Result<(), ScanError> {
        let opener = if bracket == ']' { '[' } else { '{' };
        if self.flow_stack.last() != Some(&opener) {
            return Err(self.error(ScanErrorKind::UnexpectedFlowEnd(bracket)));
        }

        let start = self.cursor;
        self.advance();
        self.flow_stack.pop();

        let kind = if bracket == ']' {
            TokenKind::FlowSequenceEnd
        } else {
            TokenKind::FlowMappingEnd
        };
        self.push_token(kind, String::new(), start);
        self.key_allowed = false;
        self.adjacent_end = Some(self.pos);
        Ok(())
    }

    fn fetch_flow_entry(&mut self) -> Result<(), ScanError> {
        let start = self.cursor;
        self.advance();
        self.push_token(TokenKind::FlowEntry, String::new(), start);
        self.key_allowed = true;
        Ok(())
    }

    fn fetch_block_entry(&mut self) -> Result<(), ScanError> {
        if self.flow_depth() > 0 || !self.key_allowed {
            return Err(self.error(ScanErrorKind::BlockEntryNotAllowed));
        }

        let start = self.cursor;
        if let Some(token) = self.roll_indent(start, TokenKind::BlockSequenceStart) {
            self.emit(token);
        }
        self.advance();
        self.push_token(TokenKind::BlockSequenceEntry, String::new(), start);
        self.key_allowed = true;
        Ok(())
    }

    fn fetch_explicit_key(&mut self) -> Result<(), ScanError> {
        let start = self.cursor;
        if self.flow_depth() == 0 {
            if !self.key_allowed {
                return Err(self.error(ScanErrorKind::KeyNotAllowed));
            }
            if let Some(token) = self.roll_indent(start, TokenKind::BlockMappingStart) {
                self.emit(token);
            }
        }
        self.advance();
        self.push_token(TokenKind::ExplicitKey, String::new(), start);
        self.key_allowed = true;
        Ok(())
    }

    /// `:` on its own: a flow value indicator, or in block context the value
    /// of an explicit or empty key.
    fn fetch_value_indicator(&mut self) -> Result<(), ScanError> {
        let start = self.cursor;
        if self.flow_depth() > 0 {
            self.advance();
            self.push_token(TokenKind::FlowMappingValue, String::new(), start);
            self.key_allowed = true;
            return Ok(());
        }

        if !self.key_allowed {
            return Err(self.error(ScanErrorKind::MappingValueNotAllowed));
        }
        if let Some(token) = self.roll_indent(start, TokenKind::BlockMappingStart) {
            self.emit(token);
        }
        self.advance();
        self.push_token(TokenKind::BlockMappingValue, String::new(), start);
        self.key_allowed = true;
        Ok(())
    }

    /// Scan a node's properties and, when it follows on the same line, its
    /// scalar or alias. In block context a scalar followed by `: ` becomes an
    /// implicit key, emitted together with its value indicator and the block
    /// mapping start it may open.
    fn fetch_node(&mut self) -> Result<(), ScanError> {
        let node_start = self.cursor;
        let mut properties = Vec::new();
        while matches!(self.peek(), Some('&' | '!')) {
            properties.push(self.scan_property()?);
            self.skip_blanks();
        }

        let (content, single_line) = match self.peek() {
            Some('*') => (self.scan_name(TokenKind::Alias, NameKind::Alias)?, true),
            Some(quote @ ('\'' | '"')) => self.scan_quoted(quote)?,
            Some(c) if !is_break(c) && self.can_start_plain(c) && !self.at_value_indicator() => {
                self.scan_plain()?
            }
            _ => {
                // Properties of a collection or of a block scalar.
                for token in properties {
                    self.emit(token);
                }
                self.key_allowed = false;
                return Ok(());
            }
        };

        if self.flow_depth() == 0 {
            self.skip_blanks();
            if self.peek() == Some(':') && is_blankz(self.peek_nth(1)) {
                if !single_line || !self.key_allowed {
                    return Err(self.error(ScanErrorKind::MappingValueNotAllowed));
                }
                return self.fetch_implicit_key(node_start, properties, content);
            }
        }

        for token in properties {
            self.emit(token);
        }
        self.emit(content);
        self.key_allowed = false;
        Ok(())
    }

    fn fetch_implicit_key(
        &mut self,
        node_start: Position,
        properties: Vec<Token>,
        mut key: Token,
    ) -> Result<(), ScanError> {
        if let Some(style) = key.kind.scalar_style() {
            key.kind = TokenKind::BlockMappingKey(style);
        }

        if let Some(token) = self.roll_indent(node_start, TokenKind::BlockMappingStart) {
            self.emit(token);
        }
        for token in properties {
            self.emit(token);
        }
        self.emit(key);

        let colon = self.cursor;
        self.advance();
        self.push_token(TokenKind::BlockMappingValue, String::new(), colon);
        self.key_allowed = false;
        Ok(())
    }

    // --- Node properties ---

    fn scan_property(&mut self) -> Result<Token, ScanError> {
        if self.peek() == Some('&') {
            self.scan_name(TokenKind::Anchor, NameKind::Anchor)
        } else {
            self.scan_tag()
        }
    }

    /// Scan `&name` or `*name`. The value is the name without its sigil.
    fn scan_name(&mut self, kind: TokenKind, name_kind: NameKind) -> Result<Token, ScanError> {
        let start = self.cursor;
        self.advance(); // consume sigil

        let name_start = self.cursor.offset;
        while let Some(c) = self.peek() {
            if is_blank(c) || is_break(c) || is_flow_indicator(c) {
                break;
            }
            self.advance();
        }

        let name = &self.source[name_start..self.cursor.offset];
        if name.is_empty() || !self.at_property_end() {
            return Err(ScanError::new(ScanErrorKind::MalformedName(name_kind), start));
        }
        Ok(self.token(kind, name.to_string(), start))
    }

    /// Scan a tag: `!`, `!suffix`, `!!suffix`, `!handle!suffix` or
    /// `!<verbatim>`. The value is the tag as written.
    fn scan_tag(&mut self) -> Result<Token, ScanError> {
        let start = self.cursor;
        let malformed = ScanError::new(ScanErrorKind::MalformedName(NameKind::Tag), start);
        self.advance(); // consume '!'

        if self.peek() == Some('<') {
            self.advance();
            let uri_start = self.pos;
            loop {
                match self.peek() {
                    Some('>') => break,
                    Some(c) if !is_blank(c) && !is_break(c) => {
                        self.advance();
                    }
                    _ => return Err(malformed),
                }
            }
            if self.pos == uri_start {
                return Err(malformed);
            }
            self.advance(); // consume '>'
        } else {
            let suffix_required = if self.peek() == Some('!') {
                self.advance();
                true
            } else {
                let mut word = 0;
                while self
                    .peek_nth(word)
                    .is_some_and(|c| c.is_ascii_alphanumeric() || c == '-')
                {
                    word += 1;
                }
                if word > 0 && self.peek_nth(word) == Some('!') {
                    for _ in 0..=word {
                        self.advance();
                    }
                    true
                } else {
                    false
                }
            };

            let suffix_start = self.pos;
            while self.peek().is_some_and(is_tag_char) {
                self.advance();
            }
            if suffix_required && self.pos == suffix_start {
                return Err(malformed);
            }
        }

        if !self.at_property_end() {
            return Err(malformed);
        }
        let text = self.source[start.offset..self.cursor.offset].to_string();
        Ok(self.token(TokenKind::Tag, text, start))
    }

    /// A property must be followed by a separator, or in flow context by
    /// the end of an entry.
    fn at_property_end(&self) -> bool {
        match self.peek() {
            None => true,
            Some(c) if is_blank(c) || is_break(c) => true,
            Some(',' | ']' | '}') => self.flow_depth() > 0,
            Some(_) => false,
        }
    }

    // --- Directives and comments ---

    /// Scan a `%` directive line. A trailing comment is left for the next step.
    fn scan_directive(&mut self) -> Result<(), ScanError> {
        let start = self.cursor;
        if !self.directives_allowed {
            return Err(ScanError::new(
                ScanErrorKind::MalformedDirective(
                    "directives must precede the document start marker".into(),
                ),
                start,
            ));
        }
        self.advance(); // consume '%'

        let body_start = self.cursor.offset;
        let mut end = self.cursor;
        let mut words: Vec<&'a str> = Vec::new();
        let source = self.source;
        loop {
            self.skip_blanks();
            match self.peek() {
                None | Some('\n' | '\r') => break,
                Some('#') if self.preceded_by_blank() => break,
                Some(_) => {}
            }
            let word_start = self.cursor.offset;
            while self.peek().is_some_and(|c| !is_blank(c) && !is_break(c)) {
                self.advance();
            }
            end = self.cursor;
            words.push(&source[word_start..end.offset]);
        }

        let starts_with_name = source[body_start..]
            .chars()
            .next()
            .is_some_and(|c| !is_blank(c) && !is_break(c));
        if let Err(reason) = check_directive(&words, starts_with_name) {
            return Err(ScanError::new(ScanErrorKind::MalformedDirective(reason), start));
        }

        let value = source[body_start..end.offset].to_string();
        let token = Token::new(
            TokenKind::Directive,
            value,
            source[start.offset..end.offset].to_string(),
            Span::new(start, end),
        );
        debug!(line = start.line, directive = %token.value, "directive");
        self.emit(token);
        Ok(())
    }

    /// Scan a comment (`# ...`) to the end of the line.
    fn scan_comment(&mut self) {
        let start = self.cursor;
        self.advance(); // consume '#'

        // Skip optional space after #
        if self.peek() == Some(' ') {
            self.advance();
        }

        let text_start = self.cursor.offset;
        while self.peek().is_some_and(|c| !is_break(c)) {
            self.advance();
        }
        let text = self.source[text_start..self.cursor.offset].to_string();
        self.push_token(TokenKind::Comment, text, start);
    }

    // --- Classification ---

    /// Whether a `:` at the cursor is a value indicator rather than scalar text.
    /// In flow context a `:` after a quoted scalar or a closed collection
    /// counts even without a following blank, blanks in between allowed.
    fn at_value_indicator(&self) -> bool {
        if self.peek() != Some(':') {
            return false;
        }
        let next = self.peek_nth(1);
        if is_blankz(next) {
            return true;
        }
        self.flow_depth() > 0
            && (next.is_some_and(is_flow_indicator) || self.follows_adjacent_end())
    }

    fn follows_adjacent_end(&self) -> bool {
        self.adjacent_end.is_some_and(|end| {
            end <= self.pos && self.chars[end..self.pos].iter().all(|&c| is_blank(c))
        })
    }

    /// Whether a plain scalar may start with `ch` at the cursor.
    fn can_start_plain(&self, ch: char) -> bool {
        match ch {
            '-' | '?' | ':' => {
                let next = self.peek_nth(1);
                !is_blankz(next) && !(self.flow_depth() > 0 && next.is_some_and(is_flow_indicator))
            }
            ',' | '[' | ']' | '{' | '}' | '#' | '&' | '*' | '!' | '|' | '>' | '\'' | '"' | '%'
            | '@' | '`' => false,
            c => !is_blank(c) && !is_break(c),
        }
    }

    // --- Helpers ---

    fn token(&self, kind: TokenKind, value: String, start: Position) -> Token {
        let end = self.cursor;
        Token::new(
            kind,
            value,
            self.source[start.offset..end.offset].to_string(),
            Span::new(start, end),
        )
    }

    fn push_token(&mut self, kind: TokenKind, value: String, start: Position) {
        let token = self.token(kind, value, start);
        self.emit(token);
    }

    fn emit(&mut self, token: Token) {
        if token.kind == TokenKind::Comment && !self.options.emit_comments {
            return;
        }
        self.pending.push(token);
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_nth(&self, n: usize) -> Option<char> {
        self.chars.get(self.pos + n).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = *self.chars.get(self.pos)?;
        self.pos += 1;
        self.cursor.offset += c.len_utf8();
        match c {
            '\n' => self.cursor.next_line(),
            // \r\n counts once, on the \n
            '\r' if self.peek() != Some('\n') => self.cursor.next_line(),
            _ => self.cursor.column += 1,
        }
        Some(c)
    }

    /// Consume one line break (`\n`, `\r\n` or `\r`). Returns whether one was there.
    fn skip_break(&mut self) -> bool {
        match self.peek() {
            Some('\r') => {
                self.advance();
                if self.peek() == Some('\n') {
                    self.advance();
                }
                true
            }
            Some('\n') => {
                self.advance();
                true
            }
            _ => false,
        }
    }

    fn skip_blanks(&mut self) {
        while self.peek().is_some_and(is_blank) {
            self.advance();
        }
    }

    fn preceded_by_blank(&self) -> bool {
        self.cursor.column == 1
            || self
                .chars
                .get(self.pos - 1)
                .is_some_and(|&c| is_blank(c) || is_break(c))
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            pos: self.pos,
            cursor: self.cursor,
        }
    }

    fn restore(&mut self, checkpoint: Checkpoint) {
        self.pos = checkpoint.pos;
        self.cursor = checkpoint.cursor;
    }

    fn error(&self, kind: ScanErrorKind) -> ScanError {
        ScanError::new(kind, self.cursor)
    }
}

/// Validate the words of a directive line: the name, then its parameters.
fn check_directive(words: &[&str], starts_with_name: bool) -> Result<(), String> {
    let Some((name, params)) = words.split_first().filter(|_| starts_with_name) else {
        return Err("missing directive name".into());
    };

    match *name {
        "YAML" => {
            let [version] = params else {
                return Err("%YAML takes exactly one version parameter".into());
            };
            let valid = version.split_once('.').is_some_and(|(major, minor)| {
                !major.is_empty()
                    && !minor.is_empty()
                    && major.chars().all(|c| c.is_ascii_digit())
                    && minor.chars().all(|c| c.is_ascii_digit())
            });
            if valid {
                Ok(())
            } else {
                Err(format!("invalid %YAML version '{version}'"))
            }
        }
        "TAG" => {
            let [handle, prefix] = params else {
                return Err("%TAG takes a handle and a prefix".into());
            };
            if !is_tag_handle(handle) {
                return Err(format!("invalid tag handle '{handle}'"));
            }
            if prefix.starts_with(is_flow_indicator) {
                return Err(format!("invalid tag prefix '{prefix}'"));
            }
            Ok(())
        }
        // Reserved directives are passed through for the parser to ignore.
        _ => Ok(()),
    }
}

/// `!`, `!!` or `!word!`.
fn is_tag_handle(handle: &str) -> bool {
    match handle.strip_prefix('!').and_then(|h| h.strip_suffix('!')) {
        Some(word) => word.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'),
        None => handle == "!",
    }
}

fn is_blank(c: char) -> bool {
    c == ' ' || c == '\t'
}

fn is_break(c: char) -> bool {
    c == '\n' || c == '\r'
}

/// Blank, line break, or end of input.
fn is_blankz(c: Option<char>) -> bool {
    c.map_or(true, |c| is_blank(c) || is_break(c))
}

fn is_flow_indicator(c: char) -> bool {
    matches!(c, ',' | '[' | ']' | '{' | '}')
}

fn is_tag_char(c: char) -> bool {
    !is_blank(c) && !is_break(c) && !is_flow_indicator(c) && c != '!'
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ScalarStyle;
    use pretty_assertions::assert_eq;

    const KEY: TokenKind = TokenKind::BlockMappingKey(ScalarStyle::Plain);

    /// Helper: tokenize and return token kinds (ignoring spans).
    fn kinds(source: &str) -> Vec<TokenKind> {
        Scanner::tokenize(source)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    /// Helper: tokenize and panic on error.
    fn tokens(source: &str) -> Vec<Token> {
        Scanner::tokenize(source).unwrap()
    }

    fn error(source: &str) -> ScanError {
        Scanner::tokenize(source).unwrap_err()
    }

    fn values(source: &str) -> Vec<String> {
        tokens(source).into_iter().map(|t| t.value).collect()
    }

    // =========================================================================
    // Structure: empty input, comments, groups
    // =========================================================================

    #[test]
    fn test_empty_source() {
        assert!(tokens("").is_empty());
        assert!(tokens("\n\n").is_empty());
        assert!(tokens("   \n").is_empty());
    }

    #[test]
    fn test_comments_dropped_by_default() {
        assert!(tokens("# only a comment\n").is_empty());
        assert_eq!(
            kinds("a: 1 # note\n"),
            vec![KEY, TokenKind::BlockMappingValue, TokenKind::PlainScalar]
        );
    }

    #[test]
    fn test_comments_emitted_when_enabled() {
        let options = ScanOptions::default().with_comments();
        let mut scanner = Scanner::with_options("# top\na: 1 # trailing\n", options);
        let mut toks = Vec::new();
        while let ScanOutcome::Group(group) = scanner.scan_step().unwrap() {
            toks.extend(group);
        }
        let summary: Vec<_> = toks.iter().map(|t| (t.kind, t.value.as_str())).collect();
        assert_eq!(
            summary,
            vec![
                (TokenKind::Comment, "top"),
                (KEY, "a"),
                (TokenKind::BlockMappingValue, ""),
                (TokenKind::PlainScalar, "1"),
                (TokenKind::Comment, "trailing"),
            ]
        );
        assert_eq!(toks[4].raw, "# trailing");
    }

    #[test]
    fn test_comment_needs_preceding_blank() {
        assert_eq!(values("a#b\n"), vec!["a#b"]);
        assert_eq!(
            error("\"a\"#b\n").kind,
            ScanErrorKind::UnexpectedCharacter('#')
        );
    }

    #[test]
    fn test_scan_step_groups() {
        let mut scanner = Scanner::new("a:\n  b: 1\n");
        let mut groups = Vec::new();
        while let ScanOutcome::Group(group) = scanner.scan_step().unwrap() {
            groups.push(group.into_iter().map(|t| t.kind).collect::<Vec<_>>());
            if groups.len() == 2 {
                assert_eq!(scanner.indent_stack(), &[0, 2]);
            }
        }
        assert_eq!(
            groups,
            vec![
                vec![KEY, TokenKind::BlockMappingValue],
                vec![TokenKind::BlockMappingStart, KEY, TokenKind::BlockMappingValue],
                vec![TokenKind::PlainScalar],
                vec![TokenKind::BlockEnd],
            ]
        );
        assert_eq!(scanner.scan_step(), Ok(ScanOutcome::Exhausted));
        assert_eq!(scanner.scan_step(), Ok(ScanOutcome::Exhausted));
        assert_eq!(scanner.indent_stack(), &[0]);
    }

    #[test]
    fn test_position_follows_steps() {
        let mut scanner = Scanner::new("- a\n- b\n");
        assert_eq!(scanner.position(), Position::new(1, 1, 0));
        scanner.scan_step().unwrap();
        assert_eq!(scanner.position(), Position::new(1, 2, 1));
        while let ScanOutcome::Group(_) = scanner.scan_step().unwrap() {}
        assert_eq!(scanner.position(), Position::new(3, 1, 8));
    }

    #[test]
    fn test_byte_order_mark_skipped() {
        assert_eq!(Scanner::new("\u{feff}").position(), Position::new(1, 1, 3));
        let toks = tokens("\u{feff}a: 1");
        assert_eq!(toks[0].kind, KEY);
        assert_eq!(toks[0].value, "a");
        assert_eq!(toks[0].span.start, Position::new(1, 1, 3));
        assert_eq!(toks[2].span.start, Position::new(1, 4, 6));
        assert!(tokens("\u{feff}# only a comment\n").is_empty());
    }

    #[test]
    fn test_failed_scanner_repeats_error() {
        let mut scanner = Scanner::new("a: 1\n]");
        assert!(matches!(scanner.scan_step(), Ok(ScanOutcome::Group(_))));
        assert!(matches!(scanner.scan_step(), Ok(ScanOutcome::Group(_))));
        let first = scanner.scan_step().unwrap_err();
        assert_eq!(first.kind, ScanErrorKind::UnexpectedFlowEnd(']'));
        assert_eq!(scanner.scan_step(), Err(first));
    }

    // =========================================================================
    // Block mappings and sequences
    // =========================================================================

    #[test]
    fn test_plain_mapping() {
        let toks = tokens("a: 1\nb: 2\n");
        let summary: Vec<_> = toks.iter().map(|t| (t.kind, t.value.as_str())).collect();
        assert_eq!(
            summary,
            vec![
                (KEY, "a"),
                (TokenKind::BlockMappingValue, ""),
                (TokenKind::PlainScalar, "1"),
                (KEY, "b"),
                (TokenKind::BlockMappingValue, ""),
                (TokenKind::PlainScalar, "2"),
            ]
        );
    }

    #[test]
    fn test_sequence() {
        let toks = tokens("- x\n- y\n");
        let summary: Vec<_> = toks.iter().map(|t| (t.kind, t.value.as_str())).collect();
        assert_eq!(
            summary,
            vec![
                (TokenKind::BlockSequenceEntry, ""),
                (TokenKind::PlainScalar, "x"),
                (TokenKind::BlockSequenceEntry, ""),
                (TokenKind::PlainScalar, "y"),
            ]
        );
    }

    #[test]
    fn test_nested_mapping_balances() {
        assert_eq!(
            kinds("a:\n  b: 1\nc: 2\n"),
            vec![
                KEY,
                TokenKind::BlockMappingValue,
                TokenKind::BlockMappingStart,
                KEY,
                TokenKind::BlockMappingValue,
                TokenKind::PlainScalar,
                TokenKind::BlockEnd,
                KEY,
                TokenKind::BlockMappingValue,
                TokenKind::PlainScalar,
            ]
        );
    }

    #[test]
    fn test_nested_sequence_closed_at_eof() {
        assert_eq!(
            kinds("items:\n  - a\n  - b"),
            vec![
                KEY,
                TokenKind::BlockMappingValue,
                TokenKind::BlockSequenceStart,
                TokenKind::BlockSequenceEntry,
                TokenKind::PlainScalar,
                TokenKind::BlockSequenceEntry,
                TokenKind::PlainScalar,
                TokenKind::BlockEnd,
            ]
        );
    }

    #[test]
    fn test_compact_mapping_in_sequence() {
        assert_eq!(
            kinds("- a: 1\n  b: 2\n- c\n"),
            vec![
                TokenKind::BlockSequenceEntry,
                TokenKind::BlockMappingStart,
                KEY,
                TokenKind::BlockMappingValue,
                TokenKind::PlainScalar,
                KEY,
                TokenKind::BlockMappingValue,
                TokenKind::PlainScalar,
                TokenKind::BlockEnd,
                TokenKind::BlockSequenceEntry,
                TokenKind::PlainScalar,
            ]
        );
    }

    #[test]
    fn test_compact_nested_sequence() {
        assert_eq!(
            kinds("- - x\n"),
            vec![
                TokenKind::BlockSequenceEntry,
                TokenKind::BlockSequenceStart,
                TokenKind::BlockSequenceEntry,
                TokenKind::PlainScalar,
                TokenKind::BlockEnd,
            ]
        );
    }

    #[test]
    fn test_indentless_sequence_value() {
        assert_eq!(
            kinds("a:\n- x\n- y\nb: 1\n"),
            vec![
                KEY,
                TokenKind::BlockMappingValue,
                TokenKind::BlockSequenceEntry,
                TokenKind::PlainScalar,
                TokenKind::BlockSequenceEntry,
                TokenKind::PlainScalar,
                KEY,
                TokenKind::BlockMappingValue,
                TokenKind::PlainScalar,
            ]
        );
    }

    #[test]
    fn test_explicit_key() {
        assert_eq!(
            kinds("? a\n: b\n"),
            vec![
                TokenKind::ExplicitKey,
                TokenKind::PlainScalar,
                TokenKind::BlockMappingValue,
                TokenKind::PlainScalar,
            ]
        );
    }

    #[test]
    fn test_quoted_keys_carry_style() {
        let toks = tokens("\"a b\": 1\n'c': 2\n");
        assert_eq!(toks[0].kind, TokenKind::BlockMappingKey(ScalarStyle::DoubleQuoted));
        assert_eq!(toks[0].value, "a b");
        assert_eq!(toks[3].kind, TokenKind::BlockMappingKey(ScalarStyle::SingleQuoted));
    }

    #[test]
    fn test_key_positions() {
        let toks = tokens("key: value");
        assert_eq!(toks[0].span, Span::new(Position::new(1, 1, 0), Position::new(1, 4, 3)));
        assert_eq!(toks[1].span.start, Position::new(1, 4, 3));
        assert_eq!(toks[2].span.start, Position::new(1, 6, 5));
        assert_eq!(toks[2].raw, "value");
    }

    #[test]
    fn test_crlf_line_endings() {
        let toks = tokens("a: 1\r\nb: 2\r\n");
        assert_eq!(toks.len(), 6);
        assert_eq!(toks[3].span.start, Position::new(2, 1, 6));
    }

    // =========================================================================
    // Flow collections
    // =========================================================================

    #[test]
    fn test_flow_sequence() {
        let toks = tokens("[1, 2, 3]");
        let summary: Vec<_> = toks.iter().map(|t| (t.kind, t.value.as_str())).collect();
        assert_eq!(
            summary,
            vec![
                (TokenKind::FlowSequenceStart, ""),
                (TokenKind::PlainScalar, "1"),
                (TokenKind::FlowEntry, ""),
                (TokenKind::PlainScalar, "2"),
                (TokenKind::FlowEntry, ""),
                (TokenKind::PlainScalar, "3"),
                (TokenKind::FlowSequenceEnd, ""),
            ]
        );
    }

    #[test]
    fn test_flow_mapping_json_style() {
        assert_eq!(
            kinds("{a: 1, \"b\":2}"),
            vec![
                TokenKind::FlowMappingStart,
                TokenKind::PlainScalar,
                TokenKind::FlowMappingValue,
                TokenKind::PlainScalar,
                TokenKind::FlowEntry,
                TokenKind::DoubleQuotedScalar,
                TokenKind::FlowMappingValue,
                TokenKind::PlainScalar,
                TokenKind::FlowMappingEnd,
            ]
        );
    }

    #[test]
    fn test_value_after_closed_flow_key() {
        assert_eq!(
            kinds("[[a]:b]"),
            vec![
                TokenKind::FlowSequenceStart,
                TokenKind::FlowSequenceStart,
                TokenKind::PlainScalar,
                TokenKind::FlowSequenceEnd,
                TokenKind::FlowMappingValue,
                TokenKind::PlainScalar,
                TokenKind::FlowSequenceEnd,
            ]
        );
    }

    #[test]
    fn test_value_after_quoted_key_and_blank() {
        assert_eq!(
            kinds("{\"a\" :b}"),
            vec![
                TokenKind::FlowMappingStart,
                TokenKind::DoubleQuotedScalar,
                TokenKind::FlowMappingValue,
                TokenKind::PlainScalar,
                TokenKind::FlowMappingEnd,
            ]
        );
        assert_eq!(values("{a :b}"), vec!["", "a :b", ""]);
    }

    #[test]
    fn test_flow_spans_lines_without_indentation() {
        assert_eq!(
            kinds("a: [1,\n2]\nb: 3\n"),
            vec![
                KEY,
                TokenKind::BlockMappingValue,
                TokenKind::FlowSequenceStart,
                TokenKind::PlainScalar,
                TokenKind::FlowEntry,
                TokenKind::PlainScalar,
                TokenKind::FlowSequenceEnd,
                KEY,
                TokenKind::BlockMappingValue,
                TokenKind::PlainScalar,
            ]
        );
    }

    #[test]
    fn test_flow_depth_tracking() {
        let mut scanner = Scanner::new("[[a]]");
        scanner.scan_step().unwrap();
        assert_eq!(scanner.flow_depth(), 1);
        scanner.scan_step().unwrap();
        assert_eq!(scanner.flow_depth(), 2);
        while let ScanOutcome::Group(_) = scanner.scan_step().unwrap() {}
        assert_eq!(scanner.flow_depth(), 0);
    }

    #[test]
    fn test_unexpected_flow_end() {
        let err = error("a: ]");
        assert_eq!(err.kind, ScanErrorKind::UnexpectedFlowEnd(']'));
        assert_eq!(err.position, Position::new(1, 4, 3));
        assert_eq!(error("[a}").kind, ScanErrorKind::UnexpectedFlowEnd('}'));
    }

    #[test]
    fn test_unclosed_flow_collection() {
        assert_eq!(error("[a, b").kind, ScanErrorKind::UnclosedFlowCollection);
        assert_eq!(error("{a: 1\n---\n").kind, ScanErrorKind::UnclosedFlowCollection);
    }

    #[test]
    fn test_block_entry_in_flow_is_error() {
        assert_eq!(error("[- a]").kind, ScanErrorKind::BlockEntryNotAllowed);
        assert_eq!(values("[-1]"), vec!["", "-1", ""]);
    }

    // =========================================================================
    // Properties
    // =========================================================================

    #[test]
    fn test_anchor_and_alias() {
        let toks = tokens("base: &b {x: 1}\nother: *b\n");
        assert_eq!(toks[2].kind, TokenKind::Anchor);
        assert_eq!(toks[2].value, "b");
        assert_eq!(toks[2].raw, "&b");
        let alias = toks.last().unwrap();
        assert_eq!(alias.kind, TokenKind::Alias);
        assert_eq!(alias.value, "b");
    }

    #[test]
    fn test_alias_as_key() {
        assert_eq!(
            kinds("*a : 1\n"),
            vec![TokenKind::Alias, TokenKind::BlockMappingValue, TokenKind::PlainScalar]
        );
    }

    #[test]
    fn test_properties_before_key() {
        assert_eq!(
            kinds("- &x !k a: 1\n"),
            vec![
                TokenKind::BlockSequenceEntry,
                TokenKind::BlockMappingStart,
                TokenKind::Anchor,
                TokenKind::Tag,
                KEY,
                TokenKind::BlockMappingValue,
                TokenKind::PlainScalar,
                TokenKind::BlockEnd,
            ]
        );
    }

    #[test]
    fn test_tag_forms() {
        let source = "- !!str a\n- !local b\n- !e!tag c\n- !<tag:x.org,2002:y> d\n- ! e\n";
        let tags: Vec<_> = tokens(source)
            .into_iter()
            .filter(|t| t.kind == TokenKind::Tag)
            .map(|t| t.value)
            .collect();
        assert_eq!(tags, vec!["!!str", "!local", "!e!tag", "!<tag:x.org,2002:y>", "!"]);
    }

    #[test]
    fn test_tag_in_flow() {
        assert_eq!(
            kinds("[!!int 1, !x]"),
            vec![
                TokenKind::FlowSequenceStart,
                TokenKind::Tag,
                TokenKind::PlainScalar,
                TokenKind::FlowEntry,
                TokenKind::Tag,
                TokenKind::FlowSequenceEnd,
            ]
        );
    }

    #[test]
    fn test_malformed_names() {
        let err = error("a: & x\n");
        assert_eq!(err.kind, ScanErrorKind::MalformedName(NameKind::Anchor));
        assert_eq!(err.position.column, 4);
        assert_eq!(error("a: *\n").kind, ScanErrorKind::MalformedName(NameKind::Alias));
        assert_eq!(error("a: &x[ 1\n").kind, ScanErrorKind::MalformedName(NameKind::Anchor));
        assert_eq!(error("a: !! x\n").kind, ScanErrorKind::MalformedName(NameKind::Tag));
        assert_eq!(error("a: !<> x\n").kind, ScanErrorKind::MalformedName(NameKind::Tag));
        assert_eq!(error("a: !<x\n").kind, ScanErrorKind::MalformedName(NameKind::Tag));
    }

    // =========================================================================
    // Documents and directives
    // =========================================================================

    #[test]
    fn test_document_markers() {
        let toks = tokens("%YAML 1.2\n---\na: 1\n...\n");
        let summary: Vec<_> = toks.iter().map(|t| (t.kind, t.value.as_str())).collect();
        assert_eq!(
            summary,
            vec![
                (TokenKind::Directive, "YAML 1.2"),
                (TokenKind::DocumentStart, ""),
                (KEY, "a"),
                (TokenKind::BlockMappingValue, ""),
                (TokenKind::PlainScalar, "1"),
                (TokenKind::DocumentEnd, ""),
            ]
        );
        assert_eq!(toks[0].raw, "%YAML 1.2");
        assert_eq!(toks[1].raw, "---");
    }

    #[test]
    fn test_document_start_closes_blocks() {
        assert_eq!(
            kinds("a:\n  b: 1\n---\n- x\n"),
            vec![
                KEY,
                TokenKind::BlockMappingValue,
                TokenKind::BlockMappingStart,
                KEY,
                TokenKind::BlockMappingValue,
                TokenKind::PlainScalar,
                TokenKind::BlockEnd,
                TokenKind::DocumentStart,
                TokenKind::BlockSequenceEntry,
                TokenKind::PlainScalar,
            ]
        );
    }

    #[test]
    fn test_dashes_inside_line_are_scalar() {
        assert_eq!(values("a: ---x\n"), vec!["a", "", "---x"]);
        assert_eq!(values("--- text\n"), vec!["", "text"]);
    }

    #[test]
    fn test_key_after_document_start_same_line() {
        assert_eq!(error("--- a: b\n").kind, ScanErrorKind::MappingValueNotAllowed);
    }

    #[test]
    fn test_tag_directive() {
        let toks = tokens("%TAG !e! tag:example.com,2000:\n--- !e!foo x\n");
        assert_eq!(toks[0].value, "TAG !e! tag:example.com,2000:");
        assert_eq!(toks[2].value, "!e!foo");
    }

    #[test]
    fn test_reserved_directive_and_comment() {
        let options = ScanOptions::default().with_comments();
        let mut scanner = Scanner::with_options("%FOO bar baz # c\n---\n", options);
        let ScanOutcome::Group(group) = scanner.scan_step().unwrap() else {
            panic!("expected a directive");
        };
        assert_eq!(group[0].value, "FOO bar baz");
        assert_eq!(group[0].raw, "%FOO bar baz");
        let ScanOutcome::Group(group) = scanner.scan_step().unwrap() else {
            panic!("expected a comment");
        };
        assert_eq!(group[0].kind, TokenKind::Comment);
    }

    #[test]
    fn test_malformed_directives() {
        let sources = [
            "%YAML\n",
            "%YAML 1\n",
            "%YAML 1.2 1.3\n",
            "% YAML 1.2\n",
            "%TAG !e! \n",
            "%TAG e tag:x\n",
        ];
        for source in sources {
            assert!(
                matches!(error(source).kind, ScanErrorKind::MalformedDirective(_)),
                "{source:?}"
            );
        }
    }

    #[test]
    fn test_directive_after_content() {
        let err = error("a: 1\n%YAML 1.2\n");
        assert!(matches!(err.kind, ScanErrorKind::MalformedDirective(_)));
        assert_eq!(err.position, Position::new(2, 1, 5));
    }

    #[test]
    fn test_directive_allowed_after_document_end() {
        assert_eq!(
            kinds("a\n...\n%YAML 1.2\n---\nb\n"),
            vec![
                TokenKind::PlainScalar,
                TokenKind::DocumentEnd,
                TokenKind::Directive,
                TokenKind::DocumentStart,
                TokenKind::PlainScalar,
            ]
        );
    }

    // =========================================================================
    // Errors
    // =========================================================================

    #[test]
    fn test_malformed_dedent() {
        let source = "a:\n  b:\n    c: 1\n   d: 2\n";
        let err = crate::tokenize(source).unwrap_err();
        assert_eq!(err.error.kind, ScanErrorKind::IndentationMismatch { width: 3 });
        assert_eq!(err.error.position, Position::new(4, 4, 20));
        assert!(err.error.to_string().contains("indentation mismatch"));
        assert!(err.tokens.iter().all(|t| t.span.start.line < 4));
        assert_eq!(err.tokens.len(), 9);
    }

    #[test]
    fn test_unterminated_quote_at_end_of_input() {
        let err = error("'abc");
        assert_eq!(err.kind, ScanErrorKind::UnterminatedQuote);
        assert_eq!(err.position, Position::new(1, 5, 4));
        assert_eq!(
            err.to_string(),
            "Scan error at line 1, column 5: unterminated quoted scalar"
        );
    }

    #[test]
    fn test_tab_indentation() {
        let err = error("a:\n\tb: 1\n");
        assert_eq!(err.kind, ScanErrorKind::TabIndentation);
        assert_eq!(err.position, Position::new(2, 1, 3));
        assert_eq!(kinds("a: 1\n\t\nb: 2\n").len(), 6);
        assert_eq!(kinds("a: 1\n \t# c\n").len(), 3);
    }

    #[test]
    fn test_tab_separation_in_flow() {
        assert_eq!(values("[a,\n\tb]"), vec!["", "a", "", "b", ""]);
    }

    #[test]
    fn test_mapping_value_not_allowed() {
        assert_eq!(error("a: b: c\n").kind, ScanErrorKind::MappingValueNotAllowed);
        assert_eq!(error("a\n b: c\n").kind, ScanErrorKind::MappingValueNotAllowed);
    }

    #[test]
    fn test_block_entry_not_allowed_after_key() {
        assert_eq!(error("a: - b\n").kind, ScanErrorKind::BlockEntryNotAllowed);
    }

    #[test]
    fn test_unexpected_characters() {
        assert_eq!(error("@foo\n").kind, ScanErrorKind::UnexpectedCharacter('@'));
        assert_eq!(error("a: `x`\n").kind, ScanErrorKind::UnexpectedCharacter('`'));
        assert_eq!(error("[|]").kind, ScanErrorKind::UnexpectedCharacter('|'));
        assert_eq!(error(", b\n").kind, ScanErrorKind::UnexpectedCharacter(','));
        assert_eq!(values("a, b\n"), vec!["a, b"]);
    }

    #[test]
    fn test_explicit_key_after_value() {
        let err = error("a: ? b\n");
        assert_eq!(err.kind, ScanErrorKind::KeyNotAllowed);
        assert_eq!((err.line(), err.column()), (1, 4));
        assert_eq!(err.position.offset, 3);
    }
}
