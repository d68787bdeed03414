//! WASM bindings for the yamlscan tokenizer.
//!
//! Exposes `tokenize()` to JavaScript via wasm-bindgen.
//! Returns a JS object `{ tokens, error }`; scan errors are reported in
//! `error` next to the tokens scanned before them instead of being thrown.

use wasm_bindgen::prelude::*;
use yamlscan_lexer::{tokenize_with, ScanError, ScanOptions, Token};

/// Tokenize YAML source.
///
/// Returns `{ tokens: Token[], error: null | { message, line, column, offset } }`.
/// Throws only if the result cannot be converted to JS values.
#[wasm_bindgen]
pub fn tokenize(source: &str, emit_comments: bool) -> Result<JsValue, JsError> {
    let (tokens, error) = scan(source, emit_comments);

    let tokens = serde_wasm_bindgen::to_value(&tokens)
        .map_err(|e| JsError::new(&format!("Failed to convert tokens: {e}")))?;
    let error = match error {
        Some(error) => error_object(&error)?.into(),
        None => JsValue::NULL,
    };

    let js_obj = js_sys::Object::new();
    set(&js_obj, "tokens", &tokens)?;
    set(&js_obj, "error", &error)?;
    Ok(js_obj.into())
}

/// Get the tokenizer version.
#[wasm_bindgen]
pub fn version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// Run the scanner, keeping the partial token list on failure.
fn scan(source: &str, emit_comments: bool) -> (Vec<Token>, Option<ScanError>) {
    let options = ScanOptions { emit_comments };
    match tokenize_with(source, options) {
        Ok(tokens) => (tokens, None),
        Err(e) => (e.tokens, Some(e.error)),
    }
}

fn error_object(error: &ScanError) -> Result<js_sys::Object, JsError> {
    let obj = js_sys::Object::new();
    set(&obj, "message", &error.kind.to_string().into())?;
    set(&obj, "line", &(error.position.line as u32).into())?;
    set(&obj, "column", &(error.position.column as u32).into())?;
    set(&obj, "offset", &(error.position.offset as u32).into())?;
    Ok(obj)
}

fn set(obj: &js_sys::Object, key: &str, value: &JsValue) -> Result<(), JsError> {
    js_sys::Reflect::set(obj, &key.into(), value)
        .map(|_| ())
        .map_err(|_| JsError::new(&format!("Failed to set {key} property")))
}
