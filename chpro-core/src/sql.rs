//! `{key}` placeholder substitution for SQL fragments
//!
//! Only for statements assembled from configuration and table definitions.
//! User data goes through bound query parameters, never through this.

use std::collections::HashMap;
use std::fmt::Display;

/// Replace every `{key}` present in `context` by the value's string form.
///
/// Unknown tokens are kept verbatim. Substituted values are not re-scanned.
pub fn format_sql_template<V: Display>(template: &str, context: &HashMap<&str, V>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find(['{', '}']) {
            Some(close) if after.as_bytes()[close] == b'}' => {
                let key = &after[..close];
                match context.get(key) {
                    Some(value) => out.push_str(&value.to_string()),
                    None => {
                        out.push('{');
                        out.push_str(key);
                        out.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            // Unterminated or nested brace: emit the `{` literally and go on
            _ => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Build a template context from `(key, value)` pairs.
pub fn sql_context<'a, V: Display>(
    pairs: impl IntoIterator<Item = (&'a str, V)>,
) -> HashMap<&'a str, V> {
    pairs.into_iter().collect()
}
