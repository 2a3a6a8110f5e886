use crate::SELF_PACKAGE;
use once_cell::sync::Lazy;
use regex::Regex;

// `+ : / .` are part of the class so `git+https://...` is consumed (and then
// dropped) instead of truncating the match halfway.
static PIP_INSTALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"pip install ([\w \-+:/.]+)").expect("valid pip install pattern")
});

/// Requirements named by `pip install ...` directives anywhere in `text`.
///
/// Options (`-U`, `--upgrade`) and VCS specs (`git+https://...`) are dropped,
/// as is this tool's own package. Tokens may carry version specifiers. The
/// result can contain duplicates; callers collect it into a set.
pub fn extract_from_plain_text(text: &str) -> Vec<String> {
    PIP_INSTALL
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .flat_map(|m| m.as_str().split_whitespace())
        .filter(|token| !token.starts_with('-'))
        .filter(|token| !token.contains('+'))
        .filter(|token| *token != SELF_PACKAGE)
        .map(str::to_string)
        .collect()
}
