//! Distinguished-name parsing and scope checks.

use tracing::debug;

use crate::errors::DirectoryError;

/// One `attribute=value` component of a DN, with the value unescaped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rdn {
    pub attribute: String,
    pub value: String,
}

impl Rdn {
    /// Lowercased `attr=value` form used for comparisons.
    fn normalized(&self) -> (String, String) {
        (
            self.attribute.to_lowercase(),
            self.value.trim().to_lowercase(),
        )
    }
}

/// Split a DN into its RDNs, leftmost first.
///
/// Handles `\,`-style and `\2C`-style escapes and quoted values. Multi-valued
/// RDNs (`cn=a+uid=b`) are kept as a single component whose value contains
/// the `+`.
pub fn parse_dn(dn: &str) -> Result<Vec<Rdn>, DirectoryError> {
    let invalid = || DirectoryError::InvalidDn(dn.to_string());
    let mut rdns = Vec::new();
    if dn.trim().is_empty() {
        return Ok(rdns);
    }

    let mut attribute = String::new();
    let mut value: Vec<u8> = Vec::new();
    let mut in_value = false;
    let mut quoted = false;
    let bytes = dn.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b'\\' => {
                let next = *bytes.get(i + 1).ok_or_else(invalid)?;
                let hex = bytes
                    .get(i + 1..i + 3)
                    .and_then(|h| std::str::from_utf8(h).ok())
                    .and_then(|h| u8::from_str_radix(h, 16).ok());
                let target = if in_value { &mut value } else { return Err(invalid()) };
                match hex {
                    Some(decoded) => {
                        target.push(decoded);
                        i += 3;
                    }
                    None => {
                        target.push(next);
                        i += 2;
                    }
                }
                continue;
            }
            b'"' if in_value => quoted = !quoted,
            b'=' if !in_value => in_value = true,
            b',' | b';' if !quoted => {
                rdns.push(finish_rdn(&attribute, &value, in_value).ok_or_else(invalid)?);
                attribute.clear();
                value.clear();
                in_value = false;
            }
            _ if in_value => value.push(b),
            _ => attribute.push(b as char),
        }
        i += 1;
    }
    if quoted {
        return Err(invalid());
    }
    rdns.push(finish_rdn(&attribute, &value, in_value).ok_or_else(invalid)?);
    Ok(rdns)
}

fn finish_rdn(attribute: &str, value: &[u8], in_value: bool) -> Option<Rdn> {
    let attribute = attribute.trim();
    if !in_value || attribute.is_empty() {
        return None;
    }
    let value = String::from_utf8(value.to_vec()).ok()?;
    Some(Rdn {
        attribute: attribute.to_string(),
        value: value.trim().to_string(),
    })
}

/// Whether the string parses as a DN with at least one component.
pub fn looks_like_dn(candidate: &str) -> bool {
    matches!(parse_dn(candidate), Ok(rdns) if !rdns.is_empty())
}

/// Whether `dn` lies at or below `base_dn`, comparing parsed components
/// case-insensitively. Unparseable input is out of scope.
pub fn is_within_scope(base_dn: &str, dn: &str) -> bool {
    let (base, target) = match (parse_dn(base_dn), parse_dn(dn)) {
        (Ok(base), Ok(target)) => (base, target),
        _ => {
            debug!(base_dn, dn, "unparseable DN treated as out of scope");
            return false;
        }
    };
    if base.len() > target.len() {
        return false;
    }
    let suffix = &target[target.len() - base.len()..];
    base.iter()
        .zip(suffix)
        .all(|(b, t)| b.normalized() == t.normalized())
}

/// Value of the leftmost RDN, e.g. `Sales` for `cn=Sales,ou=Groups,dc=x`.
pub fn leading_value(dn: &str) -> Option<String> {
    parse_dn(dn)
        .ok()?
        .into_iter()
        .next()
        .map(|rdn| rdn.value)
        .filter(|v| !v.is_empty())
}
