//! Function Call Matching
//!
//! A call matches a declaration when both reduce to the same canonical text.
//! Declarations turn their `{{param}}` placeholders into a neutral token; calls
//! turn every argument (string literal, element locator, variable reference)
//! into the same token. A match that only holds after ignoring case is an
//! authoring error.

use once_cell::sync::Lazy;
use regex::Regex;

const TOKEN: &str = "{}";

/// Single or double quoted string, with backslash escapes.
pub static STRING_LITERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"'(?:[^'\\]|\\.)*'|"(?:[^"\\]|\\.)*""#).unwrap());

/// Bracketed element locator, e.g. `[4th 'Login' button]`.
pub static ELEMENT_FINDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[(?:[^\[\]\\]|\\.)*\]").unwrap());

/// `{var}` or `{{var}}`.
pub static VARIABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{[^{}\\]+\}\}|\{[^{}\\]+\}").unwrap());

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// One argument slot: literal, locator or variable reference.
const ARGUMENT: &str = r#"'(?:[^'\\]|\\.)*'|"(?:[^"\\]|\\.)*"|\[(?:[^\[\]\\]|\\.)*\]|\{\{[^{}\\]+\}\}|\{[^{}\\]+\}"#;

/// Result of comparing a call with a declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionMatch {
    Exact,
    /// Texts are equal only when case is ignored.
    CaseMismatch,
    None,
}

fn normalize(text: &str) -> String {
    let collapsed = WHITESPACE.replace_all(text.trim(), " ");
    unescape(&collapsed)
}

fn unescape(text: &str) -> String {
    text.replace("\\\\", "\\")
        .replace("\\'", "'")
        .replace("\\\"", "\"")
}

pub fn canonical_declaration(text: &str) -> String {
    let replaced = VARIABLE.replace_all(text.trim(), TOKEN);
    normalize(&replaced)
}

pub fn canonical_call(text: &str) -> String {
    let text = STRING_LITERAL.replace_all(text.trim(), TOKEN);
    let text = ELEMENT_FINDER.replace_all(&text, TOKEN);
    let text = VARIABLE.replace_all(&text, TOKEN);
    normalize(&text)
}

pub fn match_function(call_text: &str, declaration_text: &str) -> FunctionMatch {
    let call = canonical_call(call_text);
    let declaration = canonical_declaration(declaration_text);

    if call == declaration {
        FunctionMatch::Exact
    } else if call.to_lowercase() == declaration.to_lowercase() {
        FunctionMatch::CaseMismatch
    } else {
        FunctionMatch::None
    }
}

/// Removes one layer of matching quotes and unescapes the content.
pub fn strip_quotes(text: &str) -> String {
    let text = text.trim();
    let quoted = text.len() >= 2
        && ((text.starts_with('\'') && text.ends_with('\''))
            || (text.starts_with('"') && text.ends_with('"')));

    if quoted {
        unescape(&text[1..text.len() - 1])
    } else {
        text.to_string()
    }
}

pub fn is_string_literal(text: &str) -> bool {
    STRING_LITERAL
        .find(text.trim())
        .map(|m| m.start() == 0 && m.end() == text.trim().len())
        .unwrap_or(false)
}

/// Value passed for a function parameter.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub enum ArgumentValue {
    Literal(String),
    ElementFinder(String),
    Variable { name: String, is_local: bool },
}

/// A declaration parameter bound to a call argument.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct FunctionArgument {
    pub name: String,
    pub value: ArgumentValue,
}

/// Parses `{name}` / `{{name}}` into its name and locality.
pub fn parse_variable(text: &str) -> Option<(String, bool)> {
    let text = text.trim();
    if let Some(inner) = text.strip_prefix("{{").and_then(|t| t.strip_suffix("}}")) {
        return Some((inner.trim().to_string(), true));
    }
    text.strip_prefix('{')
        .and_then(|t| t.strip_suffix('}'))
        .map(|inner| (inner.trim().to_string(), false))
}

fn argument_value(text: &str) -> ArgumentValue {
    if text.starts_with('[') {
        ArgumentValue::ElementFinder(text.to_string())
    } else if let Some((name, is_local)) = parse_variable(text) {
        ArgumentValue::Variable { name, is_local }
    } else {
        ArgumentValue::Literal(strip_quotes(text))
    }
}

/// Pairs each `{{param}}` in the declaration with the call argument at the same position.
///
/// Returns an empty list if the texts do not line up.
pub fn extract_arguments(declaration_text: &str, call_text: &str) -> Vec<FunctionArgument> {
    let declaration = declaration_text.trim();
    let mut pattern = String::from(r"^\s*");
    let mut names = Vec::new();
    let mut last = 0;

    for m in VARIABLE.find_iter(declaration) {
        pattern.push_str(&literal_pattern(&declaration[last..m.start()]));
        pattern.push('(');
        pattern.push_str(ARGUMENT);
        pattern.push(')');
        names.push(parse_variable(m.as_str()).map(|(n, _)| n).unwrap_or_default());
        last = m.end();
    }
    pattern.push_str(&literal_pattern(&declaration[last..]));
    pattern.push_str(r"\s*$");

    if names.is_empty() {
        return Vec::new();
    }

    let Ok(re) = Regex::new(&pattern) else {
        return Vec::new();
    };
    let Some(caps) = re.captures(call_text) else {
        return Vec::new();
    };

    names
        .into_iter()
        .enumerate()
        .filter_map(|(i, name)| {
            caps.get(i + 1).map(|m| FunctionArgument {
                name,
                value: argument_value(m.as_str()),
            })
        })
        .collect()
}

fn literal_pattern(segment: &str) -> String {
    let escaped = regex::escape(segment);
    WHITESPACE.replace_all(&escaped, r"\s+").into_owned()
}
