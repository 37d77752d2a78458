//! Translation of `alias.propertyPath` references inside raw SQL fragments.

use super::alias::AliasRegistry;
use crate::dialect::Dialect;

/// Rewrite every `alias.property.path` whose alias is bound to an entity and
/// whose path names exactly one column into `"alias"."column"`.
///
/// String literals, quoted identifiers, parameter references (`:name`,
/// `@name`, `$1`) and function calls are left untouched, as are chains that
/// do not resolve.
pub(crate) fn replace_property_names(sql: &str, dialect: Dialect, aliases: &AliasRegistry) -> String {
    replace_property_names_in(sql, dialect, aliases, true)
}

/// Same as [`replace_property_names`]; without `prefix_alias` only the column
/// name is written, as UPDATE and DELETE statements need.
pub(crate) fn replace_property_names_in(sql: &str, dialect: Dialect, aliases: &AliasRegistry, prefix_alias: bool) -> String {
    if aliases.iter().all(|a| !a.has_metadata()) {
        return sql.to_string();
    }

    let (open_quote, close_quote) = dialect.quote_chars();
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c == '\'' {
            let end = skip_quoted(&chars, i, '\'');
            out.extend(&chars[i..end]);
            i = end;
            continue;
        }
        if c == open_quote || c == '"' || c == '`' {
            let close = if c == open_quote { close_quote } else { c };
            let end = skip_quoted(&chars, i, close);
            out.extend(&chars[i..end]);
            i = end;
            continue;
        }

        let starts_ident = c.is_ascii_alphabetic() || c == '_';
        let preceded = i > 0 && (matches!(chars[i - 1], ':' | '@' | '$' | '.') || is_name_char(chars[i - 1]));
        if !starts_ident || preceded {
            out.push(c);
            i += 1;
            continue;
        }

        let end = chain_end(&chars, i);
        let chain: String = chars[i..end].iter().collect();
        let is_call = chars.get(end) == Some(&'(');
        match (!is_call).then(|| resolve(&chain, dialect, aliases, prefix_alias)).flatten() {
            Some(replacement) => out.push_str(&replacement),
            None => out.push_str(&chain),
        }
        i = end;
    }

    out
}

fn resolve(chain: &str, dialect: Dialect, aliases: &AliasRegistry, prefix_alias: bool) -> Option<String> {
    let (alias_name, path) = chain.split_once('.')?;
    let alias = aliases.find(alias_name)?;
    let metadata = alias.metadata.as_ref()?;
    let columns = metadata.find_columns_with_property_path(path);
    match columns.as_slice() {
        [column] if !prefix_alias => Some(dialect.escape(&column.database_name)),
        [column] => Some(format!(
            "{}.{}",
            dialect.escape(alias_name),
            dialect.escape(&column.database_name)
        )),
        _ => None,
    }
}

/// End of `ident(.ident)*` starting at `start`.
fn chain_end(chars: &[char], start: usize) -> usize {
    let mut end = start;
    loop {
        while end < chars.len() && is_name_char(chars[end]) {
            end += 1;
        }
        let continues = chars.get(end) == Some(&'.')
            && chars
                .get(end + 1)
                .is_some_and(|ch| ch.is_ascii_alphabetic() || *ch == '_');
        if !continues {
            return end;
        }
        end += 1;
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn skip_quoted(chars: &[char], start: usize, close: char) -> usize {
    let mut i = start + 1;
    while i < chars.len() {
        if chars[i] == close {
            if chars.get(i + 1) == Some(&close) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    chars.len()
}
