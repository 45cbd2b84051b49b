//! Raw attribute maps as returned per directory entry.
//!
//! Values are kept as raw bytes until a formatter or the record builder asks
//! for them, at which point they are decoded with the configured
//! [`StringEncoding`]. LDAP attribute names are case-insensitive, so lookups
//! here are too.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::DirectoryError;

/// Character encoding used to decode attribute values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StringEncoding {
    #[default]
    #[serde(rename = "utf8", alias = "utf-8", alias = "UTF-8")]
    Utf8,
    #[serde(rename = "ascii", alias = "us-ascii")]
    Ascii,
    #[serde(rename = "latin1", alias = "iso-8859-1", alias = "latin-1")]
    Latin1,
}

impl StringEncoding {
    /// Decode one raw value of `attribute`.
    ///
    /// A value that is not valid in this encoding is reported as
    /// [`DirectoryError::Encoding`]; callers treat that as data corruption.
    pub fn decode(&self, attribute: &str, raw: &[u8]) -> Result<String, DirectoryError> {
        let invalid = || DirectoryError::Encoding {
            attribute: attribute.to_string(),
            encoding: self.to_string(),
        };
        match self {
            Self::Utf8 => std::str::from_utf8(raw)
                .map(str::to_string)
                .map_err(|_| invalid()),
            Self::Ascii => {
                if raw.is_ascii() {
                    Ok(raw.iter().map(|&b| b as char).collect())
                } else {
                    Err(invalid())
                }
            }
            Self::Latin1 => Ok(raw.iter().map(|&b| b as char).collect()),
        }
    }
}

impl fmt::Display for StringEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Utf8 => write!(f, "utf8"),
            Self::Ascii => write!(f, "ascii"),
            Self::Latin1 => write!(f, "latin1"),
        }
    }
}

/// Attribute name to ordered raw values, for one directory entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawAttributes {
    /// Keyed by lowercased attribute name.
    values: BTreeMap<String, Vec<Vec<u8>>>,
}

impl RawAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one value to `name`.
    pub fn push(&mut self, name: &str, value: impl Into<Vec<u8>>) {
        self.values
            .entry(name.to_ascii_lowercase())
            .or_default()
            .push(value.into());
    }

    /// Replace all values of `name`.
    pub fn set<V: Into<Vec<u8>>>(&mut self, name: &str, values: impl IntoIterator<Item = V>) {
        self.values.insert(
            name.to_ascii_lowercase(),
            values.into_iter().map(Into::into).collect(),
        );
    }

    /// First raw value, or `None` when the attribute is absent or has no
    /// values.
    pub fn first(&self, name: &str) -> Option<&[u8]> {
        self.all(name).first().map(Vec::as_slice)
    }

    /// All raw values; empty when the attribute is absent.
    pub fn all(&self, name: &str) -> &[Vec<u8>] {
        self.values
            .get(&name.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn contains(&self, name: &str) -> bool {
        !self.all(name).is_empty()
    }

    /// First value decoded with `encoding`.
    pub fn first_str(
        &self,
        name: &str,
        encoding: StringEncoding,
    ) -> Result<Option<String>, DirectoryError> {
        self.first(name)
            .map(|raw| encoding.decode(name, raw))
            .transpose()
    }

    /// All values decoded with `encoding`.
    pub fn all_str(
        &self,
        name: &str,
        encoding: StringEncoding,
    ) -> Result<Vec<String>, DirectoryError> {
        self.all(name)
            .iter()
            .map(|raw| encoding.decode(name, raw))
            .collect()
    }

    /// Lowercased names of every attribute present.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Keep only the named attributes. An empty list keeps everything.
    pub fn retain_named(&mut self, wanted: &[String]) {
        if wanted.is_empty() {
            return;
        }
        self.values
            .retain(|name, _| wanted.iter().any(|w| w.eq_ignore_ascii_case(name)));
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for RawAttributes
where
    K: AsRef<str>,
    V: Into<Vec<u8>>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut attrs = Self::new();
        for (name, value) in iter {
            attrs.push(name.as_ref(), value);
        }
        attrs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        let attrs: RawAttributes = [("givenName", "Ada"), ("MAIL", "ada@example.com")]
            .into_iter()
            .collect();
        assert_eq!(attrs.first("givenname"), Some(&b"Ada"[..]));
        assert_eq!(
            attrs.first_str("mail", StringEncoding::Utf8).unwrap().as_deref(),
            Some("ada@example.com")
        );
    }

    #[test]
    fn test_multi_valued_keeps_order() {
        let attrs: RawAttributes = [("member", "cn=b"), ("member", "cn=a")]
            .into_iter()
            .collect();
        assert_eq!(
            attrs.all_str("member", StringEncoding::Utf8).unwrap(),
            vec!["cn=b", "cn=a"]
        );
        assert!(attrs.all("missing").is_empty());
    }

    #[test]
    fn test_empty_value_list_is_absent() {
        let mut attrs = RawAttributes::new();
        attrs.set("mail", Vec::<Vec<u8>>::new());
        assert!(!attrs.contains("mail"));
        assert_eq!(attrs.first("mail"), None);
    }

    #[test]
    fn test_decode_errors() {
        let mut attrs = RawAttributes::new();
        attrs.push("cn", vec![0xE9, 0x74, 0xE9]);

        let err = attrs.first_str("cn", StringEncoding::Utf8).unwrap_err();
        assert!(matches!(err, DirectoryError::Encoding { ref attribute, .. } if attribute == "cn"));
        assert!(attrs.first_str("cn", StringEncoding::Ascii).is_err());
        assert_eq!(
            attrs.first_str("cn", StringEncoding::Latin1).unwrap().as_deref(),
            Some("été")
        );
    }

    #[test]
    fn test_retain_named() {
        let mut attrs: RawAttributes = [("mail", "a"), ("sn", "b"), ("cn", "c")]
            .into_iter()
            .collect();
        attrs.retain_named(&["Mail".to_string(), "sn".to_string()]);
        assert_eq!(attrs.names().collect::<Vec<_>>(), vec!["mail", "sn"]);
    }
}
