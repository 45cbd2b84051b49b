//! Builds canonical [`UserRecord`]s from raw directory entries.
//!
//! Every user field is rendered from its own [`AttributeFormatter`]. Entries
//! that cannot produce a valid record (no email, unknown identity type) are
//! skipped with a warning rather than failing the run.

use std::collections::BTreeMap;

use regex_lite::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use super::attributes::{RawAttributes, StringEncoding};
use super::cache::DedupCache;
use super::dn;
use super::formatter::{AttributeFormatter, Rendered};
use crate::config::{DirectoryConfig, IdentityKey};
use crate::errors::{ConfigError, DirectoryError};
use crate::models::{IdentityType, UserRecord};

/// Group memberships are read from this attribute for `member_groups`.
const MEMBER_OF: &str = "memberOf";

#[derive(Debug, Clone)]
pub struct UserRecordBuilder {
    encoding: StringEncoding,
    identity_key: IdentityKey,
    default_identity_type: IdentityType,
    email: AttributeFormatter,
    identity_type: AttributeFormatter,
    username: AttributeFormatter,
    domain: AttributeFormatter,
    given_name: AttributeFormatter,
    surname: AttributeFormatter,
    country: AttributeFormatter,
    group_filters: Vec<Regex>,
}

impl UserRecordBuilder {
    pub fn from_config(config: &DirectoryConfig) -> Result<Self, ConfigError> {
        let formatter = |field: &str, format: Option<&str>| {
            AttributeFormatter::new(format).map_err(|e| ConfigError::InvalidValue {
                field: format!("directory.{field}"),
                detail: e.to_string(),
            })
        };
        let group_filters = config
            .additional_group_filters
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| ConfigError::InvalidValue {
                    field: "directory.additional_group_filters".into(),
                    detail: format!("'{pattern}': {e}"),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            encoding: config.string_encoding,
            identity_key: config.identity_key.clone(),
            default_identity_type: config.default_identity_type()?,
            email: formatter("user_email_format", Some(config.user_email_format.as_str()))?,
            identity_type: formatter(
                "user_identity_type_format",
                config.user_identity_type_format.as_deref(),
            )?,
            username: formatter("user_username_format", config.user_username_format.as_deref())?,
            domain: formatter("user_domain_format", config.user_domain_format.as_deref())?,
            given_name: formatter(
                "user_given_name_format",
                config.user_given_name_format.as_deref(),
            )?,
            surname: formatter("user_surname_format", config.user_surname_format.as_deref())?,
            country: formatter(
                "user_country_code_format",
                config.user_country_code_format.as_deref(),
            )?,
            group_filters,
        })
    }

    fn formatters(&self) -> [&AttributeFormatter; 7] {
        [
            &self.given_name,
            &self.surname,
            &self.country,
            &self.identity_type,
            &self.email,
            &self.username,
            &self.domain,
        ]
    }

    /// Attributes every user search must return, without duplicates.
    pub fn requested_attributes(&self, extended: &[String]) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        let mut add = |name: &str| {
            if !names.iter().any(|n| n.eq_ignore_ascii_case(name)) {
                names.push(name.to_string());
            }
        };
        for formatter in self.formatters() {
            for name in formatter.attribute_names() {
                add(name);
            }
        }
        add(MEMBER_OF);
        if let IdentityKey::Attribute(attr) = &self.identity_key {
            add(attr);
        }
        for name in extended {
            add(name);
        }
        names
    }

    /// Identity key of an entry: its DN, or the first value of the
    /// configured unique attribute (`None` when that attribute is absent).
    pub fn identity_key(
        &self,
        dn: &str,
        attributes: &RawAttributes,
    ) -> Result<Option<String>, DirectoryError> {
        match &self.identity_key {
            IdentityKey::Dn => Ok(Some(dn.to_string())),
            IdentityKey::Attribute(attr) => Ok(attributes
                .first_str(attr, self.encoding)?
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())),
        }
    }

    /// Return the identity key of the record for this entry, building and
    /// caching it on first sight. `None` means the entry was skipped.
    pub fn resolve(
        &self,
        cache: &mut DedupCache,
        dn: &str,
        attributes: &RawAttributes,
        extended: &[String],
    ) -> Result<Option<String>, DirectoryError> {
        let Some(key) = self.identity_key(dn, attributes)? else {
            warn!(dn, "skipping user without an identity key attribute");
            return Ok(None);
        };
        if cache.contains(&key) {
            debug!(dn, key = %key, "user already built");
            return Ok(Some(key));
        }
        match self.build(dn, &key, attributes, extended)? {
            Some(record) => {
                cache.put(&key, record);
                Ok(Some(key))
            }
            None => Ok(None),
        }
    }

    /// Build a record without consulting any cache.
    pub fn build(
        &self,
        dn: &str,
        key: &str,
        attributes: &RawAttributes,
        extended: &[String],
    ) -> Result<Option<UserRecord>, DirectoryError> {
        let mut snapshot: BTreeMap<String, Value> = BTreeMap::new();

        let email = match self.email.render(attributes, self.encoding)? {
            Rendered::Value(v) if !v.trim().is_empty() => v.trim().to_string(),
            Rendered::Missing(attr) => {
                warn!(dn, attribute = %attr, "skipping user: empty email attribute");
                return Ok(None);
            }
            _ => {
                warn!(dn, "skipping user: empty email");
                return Ok(None);
            }
        };
        snapshot.insert("email".into(), Value::String(email.clone()));

        let identity_type = match self.identity_type.render(attributes, self.encoding)? {
            Rendered::Value(raw) if !raw.trim().is_empty() => {
                snapshot.insert("identity_type".into(), Value::String(raw.clone()));
                match raw.parse::<IdentityType>() {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        warn!(dn, error = %e, "skipping user");
                        return Ok(None);
                    }
                }
            }
            rendered => {
                if let Some(attr) = rendered.missing() {
                    warn!(
                        dn,
                        attribute = attr,
                        default = %self.default_identity_type,
                        "no identity type attribute, using default"
                    );
                }
                snapshot.insert("identity_type".into(), Value::Null);
                self.default_identity_type
            }
        };

        let rendered_username = self.username.render(attributes, self.encoding)?;
        let username_value = trimmed(rendered_username.value());
        snapshot.insert("username".into(), optional(username_value.as_deref()));
        let username = match username_value {
            Some(username) => username,
            None => {
                if let Some(attr) = rendered_username.missing() {
                    warn!(dn, attribute = attr, email = %email, "no username attribute, using email");
                }
                email.clone()
            }
        };

        let rendered_domain = self.domain.render(attributes, self.encoding)?;
        let domain_value = trimmed(rendered_domain.value());
        snapshot.insert("domain".into(), optional(domain_value.as_deref()));
        let domain = match domain_value {
            Some(domain) => Some(domain),
            None if username != email => match email.split_once('@') {
                Some((_, domain)) => Some(domain.to_string()),
                None => {
                    warn!(dn, email = %email, "email has no '@', domain left empty");
                    None
                }
            },
            None => {
                if let Some(attr) = rendered_domain.missing() {
                    warn!(dn, attribute = attr, "no domain attribute");
                }
                None
            }
        };

        let firstname = self.optional_field(dn, "givenName", &self.given_name, attributes, &mut snapshot)?;
        let lastname = self.optional_field(dn, "sn", &self.surname, attributes, &mut snapshot)?;
        let country = self
            .country
            .render(attributes, self.encoding)?
            .into_value();
        snapshot.insert("c".into(), optional(country.as_deref()));
        let country = country.map(|c| c.to_uppercase());

        let member_groups = if self.group_filters.is_empty() {
            Vec::new()
        } else {
            self.member_groups(attributes)?
        };

        for name in extended {
            let values = attributes.all_str(name, self.encoding)?;
            let value = if values.is_empty() {
                Value::Null
            } else {
                Value::Array(values.into_iter().map(Value::String).collect())
            };
            snapshot.insert(name.clone(), value);
        }

        Ok(Some(UserRecord {
            identity_key: key.to_string(),
            identity_type,
            email,
            username,
            domain,
            firstname,
            lastname,
            country,
            groups: Vec::new(),
            member_groups,
            source_attributes: snapshot,
        }))
    }

    fn optional_field(
        &self,
        dn: &str,
        label: &str,
        formatter: &AttributeFormatter,
        attributes: &RawAttributes,
        snapshot: &mut BTreeMap<String, Value>,
    ) -> Result<Option<String>, DirectoryError> {
        let rendered = formatter.render(attributes, self.encoding)?;
        if let Some(attr) = rendered.missing() {
            warn!(dn, field = label, attribute = attr, "attribute missing");
        }
        let value = rendered.into_value();
        snapshot.insert(label.to_string(), optional(value.as_deref()));
        Ok(value)
    }

    /// Leading CN of each `memberOf` group matching an additional group filter.
    fn member_groups(&self, attributes: &RawAttributes) -> Result<Vec<String>, DirectoryError> {
        let mut groups = Vec::new();
        for group_dn in attributes.all_str(MEMBER_OF, self.encoding)? {
            let Some(name) = dn::leading_value(&group_dn) else {
                continue;
            };
            if self.group_filters.iter().any(|re| re.is_match(&name)) && !groups.contains(&name) {
                groups.push(name);
            }
        }
        Ok(groups)
    }
}

fn trimmed(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn optional(value: Option<&str>) -> Value {
    value.map_or(Value::Null, |v| Value::String(v.to_string()))
}
