/// Template tokenizer for `{{ ... }}` expressions
///
/// Splits a parameter string into alternating text and code chunks. A
/// backslash immediately before `{{` or `}}` makes the delimiter literal text.

use crate::expression::ExpressionError;

/// Upper bound on code fragments in one template
pub const MAX_CODE_CHUNKS: usize = 1000;

/// One piece of a template
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    /// Literal text, emitted as-is
    Text(String),
    /// Code between `{{` and `}}`, trimmed; may be empty
    Code(String),
}

/// Tokenize a template into chunks
///
/// Empty text chunks are dropped, empty code chunks are kept. An opening
/// `{{` with no closing `}}` is treated as text.
pub fn tokenize(template: &str) -> Result<Vec<Chunk>, ExpressionError> {
    let mut chunks = Vec::new();
    let mut text = String::new();
    let mut code_chunks = 0usize;
    let mut rest = template;

    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix("\\{{") {
            text.push_str("{{");
            rest = after;
            continue;
        }
        if let Some(after) = rest.strip_prefix("\\}}") {
            text.push_str("}}");
            rest = after;
            continue;
        }
        if let Some(after) = rest.strip_prefix("{{") {
            if let Some((code, remaining)) = scan_code(after) {
                if !text.is_empty() {
                    chunks.push(Chunk::Text(std::mem::take(&mut text)));
                }
                code_chunks += 1;
                if code_chunks > MAX_CODE_CHUNKS {
                    return Err(ExpressionError::Tokenize(format!(
                        "template contains more than {MAX_CODE_CHUNKS} expressions"
                    )));
                }
                chunks.push(Chunk::Code(code.trim().to_string()));
                rest = remaining;
                continue;
            }
            // Unterminated: the rest of the template is text
            text.push_str(rest);
            break;
        }

        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            text.push(c);
        }
        rest = chars.as_str();
    }

    if !text.is_empty() {
        chunks.push(Chunk::Text(text));
    }
    Ok(chunks)
}

/// Find the closing `}}`, unescaping `\}}` and `\{{` inside the code
fn scan_code(input: &str) -> Option<(String, &str)> {
    let mut code = String::new();
    let mut rest = input;

    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix("\\}}") {
            code.push_str("}}");
            rest = after;
        } else if let Some(after) = rest.strip_prefix("\\{{") {
            code.push_str("{{");
            rest = after;
        } else if let Some(after) = rest.strip_prefix("}}") {
            return Some((code, after));
        } else {
            let mut chars = rest.chars();
            if let Some(c) = chars.next() {
                code.push(c);
            }
            rest = chars.as_str();
        }
    }
    None
}
