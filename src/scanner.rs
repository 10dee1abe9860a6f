//! Text-level placeholder scanning for flat `{{ expr }}` strings.
//!
//! Used where a full template parse is overkill, such as output filename
//! patterns. The scan is purely lexical: quoted literals are dropped, filter
//! names after `|` are dropped, and every remaining dotted identifier chain
//! counts as a reference.

use std::collections::BTreeSet;

use crate::value::Namespace;

const KEYWORDS: [&str; 10] = [
    "true",
    "false",
    "null",
    "undefined",
    "and",
    "or",
    "not",
    "in",
    "if",
    "else",
];

#[inline]
fn is_keyword(token: &str) -> bool {
    KEYWORDS.contains(&token)
}

#[inline]
const fn is_ident_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_'
}

#[inline]
const fn is_ident_continue(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_'
}

/// Yields the inner text of every `{{ ... }}` span that contains no `}`.
fn interpolations(text: &str) -> impl Iterator<Item = &str> {
    let mut rest = text;
    std::iter::from_fn(move || {
        loop {
            let start = rest.find("{{")?;
            let body_start = start + 2;
            let body_len = rest[body_start..].find('}').unwrap_or(rest.len() - body_start);
            let body_end = body_start + body_len;

            if body_len > 0 && rest[body_end..].starts_with("}}") {
                let body = &rest[body_start..body_end];
                rest = &rest[body_end + 2..];
                return Some(body.trim());
            }
            rest = &rest[start + 1..];
        }
    })
}

/// Removes `'...'`, `"..."` and `` `...` `` literals, honoring backslash escapes.
///
/// An unterminated quote is kept as ordinary text.
fn strip_string_literals(expr: &str) -> String {
    let mut out = String::with_capacity(expr.len());
    let mut rest = expr;

    while let Some(ch) = rest.chars().next() {
        if matches!(ch, '"' | '\'' | '`') {
            if let Some(len) = quoted_len(rest, ch) {
                rest = &rest[len..];
                continue;
            }
        }
        out.push(ch);
        rest = &rest[ch.len_utf8()..];
    }
    out
}

/// Byte length of the quoted literal at the start of `text`, closing quote included.
fn quoted_len(text: &str, quote: char) -> Option<usize> {
    let mut chars = text.char_indices().skip(1);
    while let Some((idx, ch)) = chars.next() {
        match ch {
            '\n' => return None,
            '\\' => {
                if chars.next().is_none_or(|(_, escaped)| escaped == '\n') {
                    return None;
                }
            }
            c if c == quote => return Some(idx + c.len_utf8()),
            _ => {}
        }
    }
    None
}

/// Replaces `| name` with `|`, keeping whatever follows the filter name.
fn strip_filter_names(expr: &str) -> String {
    let mut out = String::with_capacity(expr.len());
    let mut rest = expr;

    while let Some(pipe) = rest.find('|') {
        out.push_str(&rest[..=pipe]);
        rest = &rest[pipe + 1..];

        let after_ws = rest.trim_start();
        if after_ws.starts_with(is_ident_start) {
            let name_len = after_ws
                .find(|c: char| !is_ident_continue(c))
                .unwrap_or(after_ws.len());
            rest = &after_ws[name_len..];
        }
    }
    out.push_str(rest);
    out
}

/// Every `ident(.ident)*` run in `expr`, scanned left to right.
fn identifier_chains(expr: &str) -> Vec<&str> {
    let bytes = expr.as_bytes();
    let mut chains = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        if !is_ident_start(char::from(bytes[pos])) {
            pos += 1;
            continue;
        }

        let start = pos;
        loop {
            while pos < bytes.len() && is_ident_continue(char::from(bytes[pos])) {
                pos += 1;
            }
            let continues = bytes.get(pos) == Some(&b'.')
                && bytes
                    .get(pos + 1)
                    .is_some_and(|&next| is_ident_start(char::from(next)));
            if !continues {
                break;
            }
            pos += 1;
        }
        chains.push(&expr[start..pos]);
    }
    chains
}

fn is_simple_path(expr: &str) -> bool {
    let mut chars = expr.chars();
    chars.next().is_some_and(is_ident_start)
        && chars.all(|c| is_ident_continue(c) || c == '.')
}

fn collect_expression_paths(expr: &str, paths: &mut BTreeSet<String>) {
    let primary = expr.split('|').next().unwrap_or_default().trim();
    if is_simple_path(primary) && !is_keyword(primary) {
        paths.insert(primary.to_owned());
    }

    let sanitized = strip_filter_names(&strip_string_literals(expr));
    for token in identifier_chains(&sanitized) {
        if !is_keyword(token) {
            paths.insert(token.to_owned());
        }
    }
}

/// Collects every variable path referenced from `{{ ... }}` spans in `text`.
///
/// ```
/// use publishpipe::extract_referenced_paths;
///
/// let paths = extract_referenced_paths(r#"{{ a.b }} and {{ "literal" }} and {{ c | f("d.e") }}"#);
/// assert_eq!(paths.into_iter().collect::<Vec<_>>(), ["a.b", "c"]);
/// ```
pub fn extract_referenced_paths(text: &str) -> BTreeSet<String> {
    let mut paths = BTreeSet::new();
    for expr in interpolations(text) {
        collect_expression_paths(expr, &mut paths);
    }
    paths
}

/// Referenced paths in `text` that have no value in `namespace`, sorted.
pub fn find_missing_in_text(text: &str, namespace: &Namespace) -> Vec<String> {
    extract_referenced_paths(text)
        .into_iter()
        .filter(|path| !namespace.has_value_at(path))
        .collect()
}
