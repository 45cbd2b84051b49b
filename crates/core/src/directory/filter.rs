//! LDAP search filters: syntax checks and in-process evaluation.
//!
//! Parsing is delegated to `ldap3`, which encodes a filter string into the
//! BER structure it would send to the server. Configured filters are checked
//! once at startup so a typo surfaces as a configuration error instead of a
//! failed search. [`Filter`] decodes that structure into a tree that the
//! in-memory directory evaluates with [`Filter::matches`].

use ldap3::asn1::{ASNTag, StructureTag, TagClass, PL};

use super::attributes::RawAttributes;
use crate::errors::DirectoryError;

/// Active Directory matching rule: bitwise AND.
const RULE_BIT_AND: &str = "1.2.840.113556.1.4.803";
/// Active Directory matching rule: bitwise OR.
const RULE_BIT_OR: &str = "1.2.840.113556.1.4.804";

// Context tags of the RFC 4511 Filter CHOICE.
const TAG_AND: u64 = 0;
const TAG_OR: u64 = 1;
const TAG_NOT: u64 = 2;
const TAG_EQUAL: u64 = 3;
const TAG_SUBSTRINGS: u64 = 4;
const TAG_GREATER_OR_EQUAL: u64 = 5;
const TAG_LESS_OR_EQUAL: u64 = 6;
const TAG_PRESENT: u64 = 7;
const TAG_APPROX: u64 = 8;
const TAG_EXTENSIBLE: u64 = 9;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Equal(String, String),
    Present(String),
    Substring {
        attribute: String,
        initial: Option<String>,
        any: Vec<String>,
        last: Option<String>,
    },
    GreaterOrEqual(String, String),
    LessOrEqual(String, String),
    Approx(String, String),
    Extensible {
        attribute: Option<String>,
        rule: Option<String>,
        value: String,
    },
}

impl Filter {
    /// Parse `source` into an evaluable tree.
    pub fn parse(source: &str) -> Result<Self, DirectoryError> {
        let tag = ldap3::parse_filter(source)
            .map_err(|()| invalid(source, "not a valid RFC 4515 filter"))?
            .into_structure();
        decode(tag).ok_or_else(|| invalid(source, "unsupported filter structure"))
    }

    /// Evaluate against one entry. Values compare case-insensitively.
    pub fn matches(&self, attributes: &RawAttributes) -> bool {
        match self {
            Self::And(items) => items.iter().all(|f| f.matches(attributes)),
            Self::Or(items) => items.iter().any(|f| f.matches(attributes)),
            Self::Not(inner) => !inner.matches(attributes),
            // Every entry carries objectClass.
            Self::Present(attr) => {
                attr.eq_ignore_ascii_case("objectClass") || attributes.contains(attr)
            }
            Self::Equal(attr, want) | Self::Approx(attr, want) => {
                values(attributes, attr).any(|v| v.eq_ignore_ascii_case(want))
            }
            Self::GreaterOrEqual(attr, bound) => {
                values(attributes, attr).any(|v| compare(&v, bound).is_ge())
            }
            Self::LessOrEqual(attr, bound) => {
                values(attributes, attr).any(|v| compare(&v, bound).is_le())
            }
            Self::Substring {
                attribute,
                initial,
                any,
                last,
            } => values(attributes, attribute)
                .any(|v| substring_match(&v.to_lowercase(), initial, any, last)),
            Self::Extensible {
                attribute: Some(attr),
                rule,
                value,
            } => {
                let wanted: Option<u64> = value.parse().ok();
                values(attributes, attr).any(|v| match (rule.as_deref(), wanted) {
                    (Some(RULE_BIT_AND), Some(bits)) => {
                        v.parse::<u64>().map(|n| (n & bits) == bits).unwrap_or(false)
                    }
                    (Some(RULE_BIT_OR), Some(bits)) => {
                        v.parse::<u64>().map(|n| (n & bits) != 0).unwrap_or(false)
                    }
                    (None, _) => v.eq_ignore_ascii_case(value),
                    _ => false,
                })
            }
            Self::Extensible { attribute: None, .. } => false,
        }
    }
}

/// Check that `source` is a filter the LDAP client can encode.
pub fn check(source: &str) -> Result<(), DirectoryError> {
    ldap3::parse_filter(source)
        .map(|_| ())
        .map_err(|()| invalid(source, "not a valid RFC 4515 filter"))
}

fn invalid(source: &str, detail: &str) -> DirectoryError {
    DirectoryError::Filter {
        filter: source.to_string(),
        detail: detail.to_string(),
    }
}

fn values<'a>(attributes: &'a RawAttributes, attr: &str) -> impl Iterator<Item = String> + 'a {
    attributes
        .all(attr)
        .iter()
        .map(|raw| String::from_utf8_lossy(raw).into_owned())
}

fn compare(value: &str, bound: &str) -> std::cmp::Ordering {
    match (value.parse::<i64>(), bound.parse::<i64>()) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => value.to_lowercase().cmp(&bound.to_lowercase()),
    }
}

fn substring_match(
    value: &str,
    initial: &Option<String>,
    any: &[String],
    last: &Option<String>,
) -> bool {
    let mut rest = value;
    if let Some(prefix) = initial {
        match rest.strip_prefix(prefix.to_lowercase().as_str()) {
            Some(r) => rest = r,
            None => return false,
        }
    }
    for part in any {
        let part = part.to_lowercase();
        match rest.find(&part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    match last {
        Some(suffix) => rest.ends_with(&suffix.to_lowercase()),
        None => true,
    }
}

// ---------------------------------------------------------------------------
// BER decoding
// ---------------------------------------------------------------------------

fn text(bytes: Vec<u8>) -> String {
    String::from_utf8_lossy(&bytes).into_owned()
}

fn primitive(tag: StructureTag) -> Option<Vec<u8>> {
    tag.expect_primitive()
}

/// `AttributeValueAssertion`: attribute description, then value.
fn assertion(items: Vec<StructureTag>) -> Option<(String, String)> {
    let mut items = items.into_iter();
    let attribute = text(primitive(items.next()?)?);
    let value = text(primitive(items.next()?)?);
    Some((attribute, value))
}

fn decode_all(items: Vec<StructureTag>) -> Option<Vec<Filter>> {
    items.into_iter().map(decode).collect()
}

fn decode(tag: StructureTag) -> Option<Filter> {
    if tag.class != TagClass::Context {
        return None;
    }
    let filter = match (tag.id, tag.payload) {
        (TAG_AND, PL::C(items)) => Filter::And(decode_all(items)?),
        (TAG_OR, PL::C(items)) => Filter::Or(decode_all(items)?),
        (TAG_NOT, PL::C(mut items)) if items.len() == 1 => {
            Filter::Not(Box::new(decode(items.remove(0))?))
        }
        (TAG_EQUAL, PL::C(items)) => {
            let (attr, value) = assertion(items)?;
            Filter::Equal(attr, value)
        }
        (TAG_GREATER_OR_EQUAL, PL::C(items)) => {
            let (attr, value) = assertion(items)?;
            Filter::GreaterOrEqual(attr, value)
        }
        (TAG_LESS_OR_EQUAL, PL::C(items)) => {
            let (attr, value) = assertion(items)?;
            Filter::LessOrEqual(attr, value)
        }
        (TAG_APPROX, PL::C(items)) => {
            let (attr, value) = assertion(items)?;
            Filter::Approx(attr, value)
        }
        (TAG_PRESENT, PL::P(attr)) => Filter::Present(text(attr)),
        (TAG_SUBSTRINGS, PL::C(items)) => {
            let mut items = items.into_iter();
            let attribute = text(primitive(items.next()?)?);
            let (mut initial, mut any, mut last) = (None, Vec::new(), None);
            for part in items.next()?.expect_constructed()? {
                let id = part.id;
                let value = text(primitive(part)?);
                match id {
                    0 => initial = Some(value),
                    1 => any.push(value),
                    2 => last = Some(value),
                    _ => return None,
                }
            }
            Filter::Substring {
                attribute,
                initial,
                any,
                last,
            }
        }
        (TAG_EXTENSIBLE, PL::C(items)) => {
            let (mut rule, mut attribute, mut value) = (None, None, None);
            for part in items {
                match (part.id, part.payload) {
                    (1, PL::P(bytes)) => rule = Some(text(bytes)),
                    (2, PL::P(bytes)) => attribute = Some(text(bytes)),
                    (3, PL::P(bytes)) => value = Some(text(bytes)),
                    // dnAttributes: DN components are not matched in memory.
                    (4, _) => {}
                    _ => return None,
                }
            }
            Filter::Extensible {
                attribute,
                rule,
                value: value?,
            }
        }
        _ => return None,
    };
    Some(filter)
}
