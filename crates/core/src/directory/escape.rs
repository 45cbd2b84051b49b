//! Escaping of values interpolated into LDAP filter strings (RFC 4515).

use std::borrow::Cow;

use super::formatter::Template;
use crate::errors::DirectoryError;

/// Characters replaced by `\` + lowercase hex code.
const SPECIAL_CHARACTERS: &[char] = &['*', '(', ')', '\\', '&', '|', '<', '>', '~', '!', ':'];

/// Escape one substitution value. Values without special characters are
/// returned unchanged.
pub fn escape_value(value: &str) -> Cow<'_, str> {
    if !value.contains(SPECIAL_CHARACTERS) {
        return Cow::Borrowed(value);
    }
    let mut escaped = String::with_capacity(value.len() + 8);
    for c in value.chars() {
        if SPECIAL_CHARACTERS.contains(&c) {
            escaped.push_str(&format!("\\{:x}", c as u32));
        } else {
            escaped.push(c);
        }
    }
    Cow::Owned(escaped)
}

/// Fill the `{name}` placeholders of a filter template with escaped values.
///
/// ```
/// use dirsync_core::directory::escape::format_query;
///
/// let filter = format_query("(cn={group})", &[("group", "R&D (EMEA)")]).unwrap();
/// assert_eq!(filter, r"(cn=R\26D \28EMEA\29)");
/// ```
pub fn format_query(template: &str, args: &[(&str, &str)]) -> Result<String, DirectoryError> {
    let escaped: Vec<(&str, Cow<'_, str>)> = args
        .iter()
        .map(|(name, value)| (*name, escape_value(value)))
        .collect();
    Template::parse(template)?.fill(|name| {
        escaped
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_ref())
    })
}
