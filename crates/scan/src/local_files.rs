//! Discovery of files a notebook expects to find next to itself.

use crate::scanner::{Leaf, LeafTree};
use std::collections::BTreeSet;

/// Calls whose first argument is a path
const PATH_CALLS: &[&str] = &["read", "Path"];

/// `read_*` readers that take something other than a path
const NON_PATH_READERS: &[&str] = &["read_sql"];

fn is_path_call(name: &str) -> bool {
    PATH_CALLS.contains(&name)
        || (name.starts_with("read_") && !NON_PATH_READERS.contains(&name))
}

/// String arguments passed to `Path(...)`, `read(...)` or `read_*(...)`,
/// either positionally (first argument) or as a keyword argument in first
/// position, e.g. `read(fp="nb.ipynb")`. Non-literal arguments are skipped.
pub fn local_files(tree: &LeafTree) -> BTreeSet<String> {
    tree.leaves()
        .filter(|leaf| leaf.is_string())
        .filter(|leaf| is_path_argument(*leaf))
        .filter_map(|leaf| decode_string_literal(leaf.value()))
        .collect()
}

fn is_path_argument(string: Leaf<'_>) -> bool {
    let Some(prev) = string.prev() else {
        return false;
    };

    // positional: name ( "..."
    if prev.is("(") {
        return string
            .step_back(2)
            .is_some_and(|callee| callee.is_name() && is_path_call(callee.value()));
    }

    // keyword: name ( kw = "..."
    if prev.is("=") {
        let keyword = string.step_back(2);
        let paren = string.step_back(3);
        let callee = string.step_back(4);
        return matches!(
            (keyword, paren, callee),
            (Some(kw), Some(p), Some(c))
                if kw.is_name() && p.is("(") && c.is_name() && is_path_call(c.value())
        );
    }

    false
}

/// Every string literal in the tree. With `raw` the token text is kept
/// verbatim (prefix and quotes included), otherwise prefix and quotes are
/// stripped without interpreting escapes.
pub fn string_literals(tree: &LeafTree, raw: bool) -> BTreeSet<String> {
    tree.leaves()
        .filter(|leaf| leaf.is_string())
        .map(|leaf| literal_text(leaf, raw))
        .collect()
}

/// String literals that look like file system paths: two or more path
/// segments, or a file extension. Subscript keys (`rcParams['a.b']`) and
/// text containing whitespace are not paths.
pub fn paths(tree: &LeafTree, raw: bool) -> BTreeSet<String> {
    tree.leaves()
        .filter(|leaf| leaf.is_string())
        .filter(|leaf| !leaf.prev().is_some_and(|p| p.is("[")))
        .filter(|leaf| looks_like_path(&literal_text(*leaf, false)))
        .map(|leaf| literal_text(leaf, raw))
        .collect()
}

fn literal_text(leaf: Leaf<'_>, raw: bool) -> String {
    let value = leaf.value();
    if raw {
        return value.to_string();
    }
    split_literal(value)
        .map(|(_, _, body)| body.to_string())
        .unwrap_or_else(|| value.to_string())
}

fn looks_like_path(text: &str) -> bool {
    if text.is_empty() || text.chars().any(char::is_whitespace) {
        return false;
    }

    let segments: Vec<&str> = text
        .split(['/', '\\'])
        .filter(|segment| !segment.is_empty())
        .collect();

    if segments.len() >= 2 {
        return true;
    }

    segments.last().is_some_and(|name| has_extension(name))
}

fn has_extension(name: &str) -> bool {
    match name.rfind('.') {
        Some(i) if i > 0 && i + 1 < name.len() => name[i + 1..]
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_'),
        _ => false,
    }
}

/// Splits a literal token into (prefix, quote, body)
fn split_literal(token: &str) -> Option<(&str, &str, &str)> {
    let quote_start = token.find(['\'', '"'])?;
    let (prefix, rest) = token.split_at(quote_start);
    if !prefix.chars().all(|c| matches!(c.to_ascii_lowercase(), 'r' | 'u' | 'b' | 'f')) {
        return None;
    }

    let quote = if rest.starts_with("\"\"\"") {
        "\"\"\""
    } else if rest.starts_with("'''") {
        "'''"
    } else {
        &rest[..1]
    };

    let body = rest.strip_prefix(quote)?.strip_suffix(quote)?;
    Some((prefix, quote, body))
}

/// Value of a Python string literal token. f-strings are not literals and
/// give None.
pub fn decode_string_literal(token: &str) -> Option<String> {
    let (prefix, _, body) = split_literal(token)?;
    let prefix = prefix.to_ascii_lowercase();
    if prefix.contains('f') {
        return None;
    }
    if prefix.contains('r') {
        return Some(body.to_string());
    }
    Some(unescape(body))
}

fn unescape(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let Some(next) = chars.next() else {
            out.push('\\');
            break;
        };
        match next {
            '\n' => {}
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            'a' => out.push('\u{07}'),
            'b' => out.push('\u{08}'),
            'f' => out.push('\u{0c}'),
            'v' => out.push('\u{0b}'),
            '0'..='7' => {
                let mut digits = String::from(next);
                while digits.len() < 3 {
                    match chars.peek() {
                        Some(d @ '0'..='7') => {
                            digits.push(*d);
                            chars.next();
                        }
                        _ => break,
                    }
                }
                push_code_point(&mut out, u32::from_str_radix(&digits, 8).ok(), &digits);
            }
            'x' | 'u' | 'U' => {
                let width = match next {
                    'x' => 2,
                    'u' => 4,
                    _ => 8,
                };
                let digits: String = (0..width).filter_map(|_| chars.next()).collect();
                let code = (digits.len() == width)
                    .then(|| u32::from_str_radix(&digits, 16).ok())
                    .flatten();
                push_code_point(&mut out, code, &format!("{next}{digits}"));
            }
            other => {
                // unknown escapes are kept as written
                out.push('\\');
                out.push(other);
            }
        }
    }

    out
}

fn push_code_point(out: &mut String, code: Option<u32>, original: &str) {
    match code.and_then(char::from_u32) {
        Some(ch) => out.push(ch),
        None => {
            out.push('\\');
            out.push_str(original);
        }
    }
}
