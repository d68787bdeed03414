//! Scalar scanning: plain, quoted and block styles.
//!
//! Each scanner returns the finished token plus, for the inline styles,
//! whether the scalar stayed on one line (only single-line scalars may be
//! implicit keys).

use super::{is_blank, is_blankz, is_break, is_flow_indicator, Scanner};
use crate::token::{Position, ScalarStyle, Span, Token, TokenKind};
use crate::{ScanError, ScanErrorKind};

/// Trailing line break handling of a block scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Chomping {
    /// `-`: no trailing breaks.
    Strip,
    /// Default: a single trailing break.
    Clip,
    /// `+`: every trailing break.
    Keep,
}

/// One line of a block scalar body. `text` is `None` for an empty line.
#[derive(Debug)]
struct BodyLine {
    text: Option<String>,
    broken: bool,
}

impl<'a> Scanner<'a> {
    // --- Plain ---

    pub(super) fn scan_plain(&mut self) -> Result<(Token, bool), ScanError> {
        let start = self.cursor;
        let mut end = self.cursor;
        let mut value = String::new();
        let mut single_line = true;

        loop {
            let mut blanks = String::new();
            while let Some(c) = self.peek() {
                if is_break(c) {
                    break;
                }
                if is_blank(c) {
                    blanks.push(c);
                    self.advance();
                    continue;
                }
                if c == '#' && self.preceded_by_blank() {
                    break;
                }
                if c == ':' && self.ends_plain_at(self.peek_nth(1)) {
                    break;
                }
                if self.flow_depth() > 0 && is_flow_indicator(c) {
                    break;
                }
                value.push_str(&blanks);
                blanks.clear();
                value.push(c);
                self.advance();
                end = self.cursor;
            }

            if !self.peek().is_some_and(is_break) {
                break;
            }

            let checkpoint = self.checkpoint();
            let (breaks, width) = self.skip_line_breaks();
            if !self.continues_plain(width) {
                self.restore(checkpoint);
                break;
            }
            fold_breaks(&mut value, breaks);
            single_line = false;
        }

        let token = Token::new(
            TokenKind::PlainScalar,
            value,
            self.source[start.offset..end.offset].to_string(),
            Span::new(start, end),
        );
        Ok((token, single_line))
    }

    /// Whether a `:` followed by `next` ends a plain scalar.
    fn ends_plain_at(&self, next: Option<char>) -> bool {
        is_blankz(next) || (self.flow_depth() > 0 && next.is_some_and(is_flow_indicator))
    }

    /// Consume one or more line breaks and the leading whitespace after them.
    /// Returns the break count and the space width of the last line.
    fn skip_line_breaks(&mut self) -> (usize, usize) {
        let mut breaks = 0;
        loop {
            self.skip_break();
            breaks += 1;

            let mut width = 0;
            while self.peek() == Some(' ') {
                self.advance();
                width += 1;
            }
            self.skip_blanks();

            if !self.peek().is_some_and(is_break) {
                return (breaks, width);
            }
        }
    }

    /// Whether the line the cursor is on continues a multi-line plain scalar.
    fn continues_plain(&self, width: usize) -> bool {
        let Some(c) = self.peek() else {
            return false;
        };
        if c == '#' {
            return false;
        }
        if self.cursor.column == 1
            && (self.at_document_marker("---") || self.at_document_marker("..."))
        {
            return false;
        }
        if self.flow_depth() > 0 {
            return !is_flow_indicator(c) && !self.at_value_indicator();
        }
        width >= self.continuation_indent() && !self.at_value_indicator()
    }

    /// Smallest indentation of a line that still belongs to the current node.
    fn continuation_indent(&self) -> usize {
        if self.indent_stack.len() == 1 && !self.root_collection {
            0
        } else {
            self.top_indent() + 1
        }
    }

    // --- Quoted ---

    pub(super) fn scan_quoted(&mut self, quote: char) -> Result<(Token, bool), ScanError> {
        let start = self.cursor;
        self.advance(); // opening quote

        let mut value = String::new();
        let mut single_line = true;

        loop {
            let mut blanks = String::new();
            loop {
                let Some(c) = self.peek() else {
                    return Err(self.error(ScanErrorKind::UnterminatedQuote));
                };
                if is_break(c) {
                    break;
                }
                if is_blank(c) {
                    blanks.push(c);
                    self.advance();
                    continue;
                }

                value.push_str(&blanks);
                blanks.clear();

                if quote == '\'' && c == '\'' && self.peek_nth(1) == Some('\'') {
                    value.push('\'');
                    self.advance();
                    self.advance();
                } else if c == quote {
                    self.advance();
                    return Ok((self.finish_quoted(quote, value, start), single_line));
                } else if quote == '"' && c == '\\' {
                    if self.peek_nth(1).is_some_and(is_break) {
                        self.scan_escaped_break(&mut value);
                        single_line = false;
                    } else {
                        self.scan_escape(&mut value)?;
                    }
                } else {
                    value.push(c);
                    self.advance();
                }
            }

            // Trailing blanks before a break are dropped.
            let (breaks, _) = self.skip_line_breaks();
            if self.cursor.column == 1
                && (self.at_document_marker("---") || self.at_document_marker("..."))
            {
                return Err(self.error(ScanErrorKind::UnterminatedQuote));
            }
            fold_breaks(&mut value, breaks);
            single_line = false;
        }
    }

    fn finish_quoted(&mut self, quote: char, value: String, start: Position) -> Token {
        if self.flow_depth() > 0 {
            self.adjacent_end = Some(self.pos);
        }
        let style = if quote == '\'' {
            ScalarStyle::SingleQuoted
        } else {
            ScalarStyle::DoubleQuoted
        };
        self.token(TokenKind::scalar(style), value, start)
    }

    /// `\` at the end of a line joins it to the next one without a space.
    /// Empty lines in between still produce newlines.
    fn scan_escaped_break(&mut self, value: &mut String) {
        self.advance(); // '\'
        let (breaks, _) = self.skip_line_breaks();
        for _ in 1..breaks {
            value.push('\n');
        }
    }

    fn scan_escape(&mut self, value: &mut String) -> Result<(), ScanError> {
        let at = self.cursor;
        self.advance(); // '\'

        let Some(c) = self.peek() else {
            return Err(self.error(ScanErrorKind::UnterminatedQuote));
        };
        let decoded = match c {
            '0' => '\0',
            'a' => '\x07',
            'b' => '\x08',
            't' | '\t' => '\t',
            'n' => '\n',
            'v' => '\x0b',
            'f' => '\x0c',
            'r' => '\r',
            'e' => '\x1b',
            ' ' => ' ',
            '"' => '"',
            '/' => '/',
            '\\' => '\\',
            'N' => '\u{85}',
            '_' => '\u{a0}',
            'L' => '\u{2028}',
            'P' => '\u{2029}',
            'x' => return self.scan_hex_escape(2, at, value),
            'u' => return self.scan_hex_escape(4, at, value),
            'U' => return self.scan_hex_escape(8, at, value),
            other => {
                return Err(ScanError::new(
                    ScanErrorKind::InvalidEscape(other.to_string()),
                    at,
                ))
            }
        };
        self.advance();
        value.push(decoded);
        Ok(())
    }

    /// `\xXX`, `\uXXXX` or `\UXXXXXXXX`, cursor on the letter. A `\u` high
    /// surrogate must be followed by a `\u` low surrogate.
    fn scan_hex_escape(
        &mut self,
        digits: usize,
        at: Position,
        value: &mut String,
    ) -> Result<(), ScanError> {
        let Some(mut code) = self.hex_at(1, digits) else {
            return Err(self.invalid_escape(at, digits));
        };
        let mut len = 1 + digits;

        if digits == 4 && (0xD800..0xDC00).contains(&code) {
            let low = (self.peek_nth(len) == Some('\\') && self.peek_nth(len + 1) == Some('u'))
                .then(|| self.hex_at(len + 2, 4))
                .flatten()
                .filter(|low| (0xDC00..0xE000).contains(low));
            let Some(low) = low else {
                return Err(self.invalid_escape(at, digits));
            };
            code = 0x10000 + ((code - 0xD800) << 10) + (low - 0xDC00);
            len += 6;
        }

        let Some(ch) = char::from_u32(code) else {
            return Err(self.invalid_escape(at, digits));
        };
        for _ in 0..len {
            self.advance();
        }
        value.push(ch);
        Ok(())
    }

    /// Parse `n` hex digits starting `offset` chars past the cursor.
    fn hex_at(&self, offset: usize, n: usize) -> Option<u32> {
        (0..n).try_fold(0u32, |acc, i| {
            let digit = self.peek_nth(offset + i)?.to_digit(16)?;
            Some(acc * 16 + digit)
        })
    }

    fn invalid_escape(&self, at: Position, digits: usize) -> ScanError {
        let text: String = (0..=digits)
            .map_while(|i| self.peek_nth(i))
            .take_while(|&c| !is_break(c) && c != '"')
            .collect();
        ScanError::new(ScanErrorKind::InvalidEscape(text), at)
    }

    // --- Block ---

    pub(super) fn fetch_block_scalar(&mut self, indicator: char) -> Result<(), ScanError> {
        let start = self.cursor;
        self.advance();

        let mut chomping = None;
        let mut increment = None;
        loop {
            match self.peek() {
                Some('-') if chomping.is_none() => chomping = Some(Chomping::Strip),
                Some('+') if chomping.is_none() => chomping = Some(Chomping::Keep),
                Some(d @ '1'..='9') if increment.is_none() => {
                    increment = d.to_digit(10).map(|d| d as usize)
                }
                _ => break,
            }
            self.advance();
        }
        let chomping = chomping.unwrap_or(Chomping::Clip);

        let mut header_end = self.cursor;
        self.skip_blanks();
        if self.peek() == Some('#') && self.preceded_by_blank() {
            while self.peek().is_some_and(|c| !is_break(c)) {
                self.advance();
            }
            header_end = self.cursor;
        }
        if !is_blankz(self.peek()) {
            return Err(self.error(ScanErrorKind::InvalidBlockScalarHeader));
        }

        let min_indent = self.continuation_indent();
        let mut indent = increment.map(|m| min_indent + m - 1);
        let mut lines: Vec<BodyLine> = Vec::new();
        let mut end = header_end;

        let mut at_break = self.skip_break();
        while at_break {
            let mut spaces = 0;
            while self.peek_nth(spaces) == Some(' ') {
                spaces += 1;
            }
            let rest = self.peek_nth(spaces);

            if spaces == 0 && (self.at_document_marker("---") || self.at_document_marker("...")) {
                self.at_line_start = true;
                break;
            }

            let blank = is_blankz(rest) && !rest.is_some_and(is_blank);
            if blank && indent.map_or(true, |n| spaces <= n) {
                for _ in 0..spaces {
                    self.advance();
                }
                at_break = self.skip_break();
                if at_break {
                    lines.push(BodyLine {
                        text: None,
                        broken: true,
                    });
                }
                continue;
            }

            let n = *indent.get_or_insert(spaces.max(min_indent));
            if spaces < n {
                self.at_line_start = true;
                break;
            }

            for _ in 0..n {
                self.advance();
            }
            let text_start = self.cursor.offset;
            while self.peek().is_some_and(|c| !is_break(c)) {
                self.advance();
            }
            let text = self.source[text_start..self.cursor.offset].to_string();
            end = self.cursor;
            at_break = self.skip_break();
            lines.push(BodyLine {
                text: Some(text),
                broken: at_break,
            });
        }

        let style = if indicator == '|' {
            ScalarStyle::Literal
        } else {
            ScalarStyle::Folded
        };
        let value = block_value(&lines, style, chomping);
        let token = Token::new(
            TokenKind::scalar(style),
            value,
            self.source[start.offset..end.offset].to_string(),
            Span::new(start, end),
        );
        self.emit(token);
        self.key_allowed = false;
        Ok(())
    }
}

/// Line folding shared by plain and quoted scalars: a single break becomes
/// a space, `n` breaks become `n - 1` newlines.
fn fold_breaks(value: &mut String, breaks: usize) {
    if breaks == 1 {
        value.push(' ');
    } else {
        for _ in 1..breaks {
            value.push('\n');
        }
    }
}

/// Lines starting with whitespace after the body indentation are never folded.
fn more_indented(text: &str) -> bool {
    text.starts_with([' ', '\t'])
}

fn block_value(lines: &[BodyLine], style: ScalarStyle, chomping: Chomping) -> String {
    let trailing_breaks = |from: usize| lines[from..].iter().filter(|l| l.broken).count();

    let Some(last) = lines.iter().rposition(|l| l.text.is_some()) else {
        return match chomping {
            Chomping::Keep => "\n".repeat(trailing_breaks(0)),
            _ => String::new(),
        };
    };

    let mut value = String::new();
    let mut previous: Option<&str> = None;
    let mut empties = 0;
    for line in &lines[..=last] {
        let Some(text) = line.text.as_deref() else {
            empties += 1;
            continue;
        };
        match previous {
            None => value.push_str(&"\n".repeat(empties)),
            Some(prev) => {
                let folds = style == ScalarStyle::Folded
                    && !more_indented(prev)
                    && !more_indented(text);
                if folds && empties == 0 {
                    value.push(' ');
                } else if folds {
                    value.push_str(&"\n".repeat(empties));
                } else {
                    value.push_str(&"\n".repeat(empties + 1));
                }
            }
        }
        value.push_str(text);
        previous = Some(text);
        empties = 0;
    }

    match chomping {
        Chomping::Strip => {}
        Chomping::Clip => {
            if lines[last].broken {
                value.push('\n');
            }
        }
        Chomping::Keep => {
            value.push_str(&"\n".repeat(trailing_breaks(last)));
        }
    }
    value
}
