//! Whole-input tokenization on top of [`Scanner::scan_step`].

use tracing::debug;

use crate::scanner::{ScanOptions, ScanOutcome, Scanner};
use crate::token::{Position, Token};
use crate::{ScanError, ScanErrorKind};

/// A scan failure together with the tokens produced before it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{error}")]
pub struct TokenizeError {
    #[source]
    pub error: ScanError,
    /// Tokens of every step that completed before the error.
    pub tokens: Vec<Token>,
}

/// Tokenize `source` with default options (comments dropped).
pub fn tokenize(source: &str) -> Result<Vec<Token>, TokenizeError> {
    tokenize_with(source, ScanOptions::default())
}

pub fn tokenize_with(source: &str, options: ScanOptions) -> Result<Vec<Token>, TokenizeError> {
    let mut scanner = Scanner::with_options(source, options);
    let mut tokens = Vec::new();
    loop {
        match scanner.scan_step() {
            Ok(ScanOutcome::Group(group)) => tokens.extend(group),
            Ok(ScanOutcome::Exhausted) => return Ok(tokens),
            Err(error) => {
                debug!(%error, partial = tokens.len(), "tokenize failed");
                return Err(TokenizeError { error, tokens });
            }
        }
    }
}

/// Tokenize raw bytes. Invalid UTF-8 is reported at the first bad byte
/// before any scanning happens.
pub fn tokenize_bytes(bytes: &[u8], options: ScanOptions) -> Result<Vec<Token>, TokenizeError> {
    let source = std::str::from_utf8(bytes).map_err(|e| {
        let valid = e.valid_up_to();
        // The valid prefix is UTF-8, so it can be located like any source.
        let prefix = std::str::from_utf8(&bytes[..valid]).unwrap_or_default();
        TokenizeError {
            error: ScanError::new(ScanErrorKind::InvalidUtf8, Position::locate(prefix, valid)),
            tokens: Vec::new(),
        }
    })?;
    tokenize_with(source, options)
}
