use std::collections::HashMap;

use super::Dialect;
use crate::error::{OrmError, OrmResult};
use crate::value::Value;

/// Replace `:name` and `:...name` references with the dialect's placeholders.
///
/// Returns the rewritten SQL and the ordered values to bind: every native
/// parameter first, then named values in order of first appearance.
///
/// - `:...name` expands an array value into one placeholder per element
/// - references inside string literals and quoted identifiers are left alone
/// - `::type` casts are left alone
/// - a reference to a name missing from `named` is a [`OrmError::ParameterNotFound`]
pub fn escape_query_with_parameters(
    dialect: Dialect,
    sql: &str,
    named: &HashMap<String, Value>,
    native: &[Value],
) -> OrmResult<(String, Vec<Value>)> {
    let mut values: Vec<Value> = native.to_vec();
    let mut placeholders: HashMap<String, String> = HashMap::new();
    let mut out = String::with_capacity(sql.len());

    let (open_quote, close_quote) = dialect.quote_chars();
    let chars: Vec<char> = sql.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c == '\'' {
            let end = skip_quoted(&chars, i, '\'', true);
            out.extend(&chars[i..end]);
            i = end;
            continue;
        }
        if c == open_quote || c == '"' {
            let close = if c == open_quote { close_quote } else { '"' };
            let end = skip_quoted(&chars, i, close, true);
            out.extend(&chars[i..end]);
            i = end;
            continue;
        }
        if c != ':' {
            out.push(c);
            i += 1;
            continue;
        }

        // `::cast`
        if chars.get(i + 1) == Some(&':') {
            out.push_str("::");
            i += 2;
            while i < chars.len() && is_name_char(chars[i]) {
                out.push(chars[i]);
                i += 1;
            }
            continue;
        }

        let spread = chars[i + 1..].starts_with(&['.', '.', '.']);
        let name_start = if spread { i + 4 } else { i + 1 };
        let starts_name = chars
            .get(name_start)
            .is_some_and(|ch| ch.is_ascii_alphabetic() || *ch == '_');
        if !starts_name {
            out.push(c);
            i += 1;
            continue;
        }

        let mut name_end = name_start;
        while name_end < chars.len() && (is_name_char(chars[name_end]) || chars[name_end] == '.') {
            name_end += 1;
        }
        while name_end > name_start && chars[name_end - 1] == '.' {
            name_end -= 1;
        }
        let name: String = chars[name_start..name_end].iter().collect();
        let value = named
            .get(&name)
            .ok_or_else(|| OrmError::ParameterNotFound { name: name.clone() })?;

        if spread {
            let items = match value {
                Value::Array(items) => items.clone(),
                other => vec![other.clone()],
            };
            if items.is_empty() {
                out.push_str("NULL");
            } else {
                let rendered: Vec<String> = items
                    .into_iter()
                    .map(|item| {
                        values.push(item);
                        dialect.create_parameter(values.len() - 1)
                    })
                    .collect();
                out.push_str(&rendered.join(", "));
            }
        } else if let Some(existing) = dialect
            .reuses_placeholders()
            .then(|| placeholders.get(&name))
            .flatten()
        {
            out.push_str(existing);
        } else {
            values.push(value.clone());
            let placeholder = dialect.create_parameter(values.len() - 1);
            placeholders.insert(name, placeholder.clone());
            out.push_str(&placeholder);
        }

        i = name_end;
    }

    Ok((out, values))
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Index just past a quoted run starting at `start`.
///
/// With `doubled_escape`, two closing characters in a row are an escaped quote.
fn skip_quoted(chars: &[char], start: usize, close: char, doubled_escape: bool) -> usize {
    let mut i = start + 1;
    while i < chars.len() {
        if chars[i] == close {
            if doubled_escape && chars.get(i + 1) == Some(&close) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    chars.len()
}
