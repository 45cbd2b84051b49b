//! TOML-based configuration system for dirsync.
//!
//! The bind password is stored as a `password_env` field that references an
//! environment variable name. The actual secret is resolved at runtime via
//! [`AppConfig::resolve_env_vars`].

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::directory::attributes::StringEncoding;
use crate::directory::filter;
use crate::directory::formatter::Template;
use crate::errors::ConfigError;
use crate::models::IdentityType;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Directory server connection settings.
    pub connection: ConnectionConfig,

    /// Search, group and attribute-mapping settings.
    pub directory: DirectoryConfig,

    /// What to resolve on each run.
    #[serde(default)]
    pub sync: SyncConfig,
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// Bind mode used after connecting.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    Anonymous,
    #[default]
    Simple,
}

/// Directory server connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Server URL (`ldap://host:389`, `ldaps://host`) or bare host name.
    pub host: String,

    /// Bind DN or user principal. Without one the bind is anonymous.
    #[serde(default)]
    pub username: Option<String>,

    /// Environment variable holding the bind password.
    #[serde(default)]
    pub password_env: Option<String>,

    #[serde(default)]
    pub authentication_method: AuthMethod,

    /// Verify the server certificate on TLS connections.
    #[serde(default)]
    pub require_tls_cert: bool,

    /// Upgrade a plain `ldap://` connection with StartTLS.
    #[serde(default)]
    pub starttls: bool,

    /// Seconds to wait for the TCP/TLS connection.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Resolved password (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub password: Option<String>,
}

fn default_connect_timeout() -> u64 {
    30
}

impl ConnectionConfig {
    /// The bind mode actually used: anonymous whenever no username is set.
    pub fn effective_auth_method(&self) -> AuthMethod {
        match (&self.username, self.authentication_method) {
            (None, AuthMethod::Simple) => {
                info!("username not specified, overriding authentication method to 'anonymous'");
                AuthMethod::Anonymous
            }
            (_, method) => method,
        }
    }

    /// Server URL with an `ldap://` scheme added to bare host names.
    pub fn url(&self) -> String {
        if self.host.contains("://") {
            self.host.clone()
        } else {
            format!("ldap://{}", self.host)
        }
    }
}

// ---------------------------------------------------------------------------
// Directory
// ---------------------------------------------------------------------------

/// How a user entry is identified across queries within a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IdentityKey {
    /// The entry's distinguished name.
    #[default]
    Dn,
    /// The first value of a stable unique attribute such as `uid`.
    Attribute(String),
}

/// Forward membership lookup via an attribute on the group entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwoStepsLookup {
    /// Attribute listing members (`member`, `uniqueMember`, `memberUid`).
    pub group_member_attribute_name: String,

    /// Expand members that are themselves groups.
    #[serde(default)]
    pub nested_group: bool,
}

/// Search, group and attribute-mapping settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Base of every search; members outside it are ignored.
    pub base_dn: String,

    /// Filter selecting user entries.
    #[serde(default = "default_all_users_filter")]
    pub all_users_filter: String,

    /// Filter locating a group by name; `{group}` is the escaped name.
    #[serde(default = "default_group_filter_format")]
    pub group_filter_format: String,

    /// Member filter for reverse lookup; `{group_dn}` is the escaped group DN.
    /// Defaults to `(memberOf={group_dn})` when two-step lookup is off.
    #[serde(default)]
    pub group_member_filter_format: Option<String>,

    /// Enables forward membership lookup.
    #[serde(default)]
    pub two_steps_lookup: Option<TwoStepsLookup>,

    #[serde(default)]
    pub string_encoding: StringEncoding,

    /// Entries per page; 0 disables paging.
    #[serde(default = "default_page_size")]
    pub search_page_size: u32,

    #[serde(default)]
    pub identity_key: IdentityKey,

    /// Identity type for users without one (default `enterpriseID`).
    #[serde(default)]
    pub user_identity_type: Option<String>,

    #[serde(default)]
    pub user_identity_type_format: Option<String>,

    #[serde(default = "default_email_format")]
    pub user_email_format: String,

    #[serde(default)]
    pub user_username_format: Option<String>,

    #[serde(default)]
    pub user_domain_format: Option<String>,

    #[serde(default = "default_given_name_format")]
    pub user_given_name_format: Option<String>,

    #[serde(default = "default_surname_format")]
    pub user_surname_format: Option<String>,

    #[serde(default = "default_country_code_format")]
    pub user_country_code_format: Option<String>,

    /// Regular expressions selecting `memberOf` groups to record per user.
    #[serde(default)]
    pub additional_group_filters: Vec<String>,

    /// Extra attributes copied into each record's source snapshot.
    #[serde(default)]
    pub extended_attributes: Vec<String>,
}

fn default_all_users_filter() -> String {
    "(&(objectClass=user)(objectCategory=person)(!(userAccountControl:1.2.840.113556.1.4.803:=2)))"
        .into()
}
fn default_group_filter_format() -> String {
    "(&(|(objectCategory=group)(objectClass=groupOfNames)(objectClass=posixGroup))(cn={group}))"
        .into()
}
fn default_page_size() -> u32 {
    200
}
fn default_email_format() -> String {
    "{mail}".into()
}
fn default_given_name_format() -> Option<String> {
    Some("{givenName}".into())
}
fn default_surname_format() -> Option<String> {
    Some("{sn}".into())
}
fn default_country_code_format() -> Option<String> {
    Some("{c}".into())
}

impl DirectoryConfig {
    /// Minimal config with every default applied.
    pub fn new(base_dn: impl Into<String>) -> Self {
        Self {
            base_dn: base_dn.into(),
            all_users_filter: default_all_users_filter(),
            group_filter_format: default_group_filter_format(),
            group_member_filter_format: None,
            two_steps_lookup: None,
            string_encoding: StringEncoding::default(),
            search_page_size: default_page_size(),
            identity_key: IdentityKey::default(),
            user_identity_type: None,
            user_identity_type_format: None,
            user_email_format: default_email_format(),
            user_username_format: None,
            user_domain_format: None,
            user_given_name_format: default_given_name_format(),
            user_surname_format: default_surname_format(),
            user_country_code_format: default_country_code_format(),
            additional_group_filters: Vec::new(),
            extended_attributes: Vec::new(),
        }
    }

    /// Default identity type for records, parsed from `user_identity_type`.
    pub fn default_identity_type(&self) -> Result<IdentityType, ConfigError> {
        match &self.user_identity_type {
            None => Ok(IdentityType::default()),
            Some(raw) => raw.parse().map_err(|e| ConfigError::InvalidValue {
                field: "directory.user_identity_type".into(),
                detail: format!("{e}"),
            }),
        }
    }

    /// Member filter for reverse lookup, with its default applied.
    pub fn member_filter_format(&self) -> &str {
        self.group_member_filter_format
            .as_deref()
            .unwrap_or("(memberOf={group_dn})")
    }

    /// Check option combinations and syntax before any search is issued.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_dn.trim().is_empty() {
            return Err(ConfigError::MissingValue {
                field: "directory.base_dn".into(),
            });
        }
        if let Some(two_steps) = &self.two_steps_lookup {
            if self.group_member_filter_format.is_some() {
                return Err(ConfigError::Conflict {
                    first: "two_steps_lookup.group_member_attribute_name".into(),
                    second: "group_member_filter_format".into(),
                });
            }
            if two_steps.group_member_attribute_name.trim().is_empty() {
                return Err(ConfigError::MissingValue {
                    field: "directory.two_steps_lookup.group_member_attribute_name".into(),
                });
            }
        }
        if let IdentityKey::Attribute(name) = &self.identity_key {
            if name.trim().is_empty() {
                return Err(ConfigError::MissingValue {
                    field: "directory.identity_key.attribute".into(),
                });
            }
        }

        filter::check(&wrap_filter(&self.all_users_filter))
            .map_err(|e| invalid("directory.all_users_filter", e))?;
        let group_filter = crate::directory::escape::format_query(
            &self.group_filter_format,
            &[("group", "sample")],
        )
        .map_err(|e| invalid("directory.group_filter_format", e))?;
        filter::check(&group_filter).map_err(|e| invalid("directory.group_filter_format", e))?;
        if self.two_steps_lookup.is_none() {
            let member_filter = crate::directory::escape::format_query(
                self.member_filter_format(),
                &[("group_dn", "cn=sample")],
            )
            .map_err(|e| invalid("directory.group_member_filter_format", e))?;
            filter::check(&wrap_filter(&member_filter))
                .map_err(|e| invalid("directory.group_member_filter_format", e))?;
        }

        for (field, template) in [
            ("directory.user_email_format", Some(&self.user_email_format)),
            ("directory.user_identity_type_format", self.user_identity_type_format.as_ref()),
            ("directory.user_username_format", self.user_username_format.as_ref()),
            ("directory.user_domain_format", self.user_domain_format.as_ref()),
            ("directory.user_given_name_format", self.user_given_name_format.as_ref()),
            ("directory.user_surname_format", self.user_surname_format.as_ref()),
            ("directory.user_country_code_format", self.user_country_code_format.as_ref()),
        ] {
            if let Some(template) = template {
                Template::parse(template).map_err(|e| invalid(field, e))?;
            }
        }
        for pattern in &self.additional_group_filters {
            regex_lite::Regex::new(pattern)
                .map_err(|e| invalid("directory.additional_group_filters", e))?;
        }
        self.default_identity_type()?;
        Ok(())
    }
}

/// Parenthesise a filter fragment unless it already is.
pub(crate) fn wrap_filter(filter: &str) -> String {
    let trimmed = filter.trim();
    if trimmed.starts_with('(') {
        trimmed.to_string()
    } else {
        format!("({trimmed})")
    }
}

fn invalid(field: &str, detail: impl std::fmt::Display) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.into(),
        detail: detail.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Sync behaviour
// ---------------------------------------------------------------------------

/// What a resolution run covers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Group names whose members are resolved, in processing order.
    #[serde(default)]
    pub groups: Vec<String>,

    /// Also load every user matched by `all_users_filter`.
    #[serde(default = "default_true")]
    pub all_users: bool,
}

fn default_true() -> bool {
    true
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            groups: Vec::new(),
            all_users: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    ///
    /// This does **not** resolve environment variables -- call
    /// [`resolve_env_vars`](Self::resolve_env_vars) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Resolve `password_env` into `connection.password`.
    ///
    /// A missing variable logs a warning; [`validate`](Self::validate)
    /// decides whether the password was required.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        info!("resolving environment variable references in config");

        if let Some(ref env_name) = self.connection.password_env {
            self.connection.password =
                resolve_optional_env(env_name, "connection.password_env");
        }

        debug!("environment variable resolution complete");
        Ok(())
    }

    /// Validate that all required fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connection.host.trim().is_empty() {
            return Err(ConfigError::MissingValue {
                field: "connection.host".into(),
            });
        }
        if self.connection.effective_auth_method() == AuthMethod::Simple
            && self.connection.password.is_none()
        {
            return Err(ConfigError::MissingValue {
                field: "connection.password_env".into(),
            });
        }
        self.directory.validate()
    }

    /// Convenience: load, resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }
}

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs a warning and returns `None` if the variable is unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_toml() -> &'static str {
        r#"
[logging]
level = "debug"

[connection]
host = "ldaps://ldap.example.com"
username = "cn=reader,dc=example,dc=com"
password_env = "DIRSYNC_TEST_UNUSED_PW"
require_tls_cert = true

[directory]
base_dn = "dc=example,dc=com"
all_users_filter = "(objectClass=inetOrgPerson)"
search_page_size = 50
identity_key = { attribute = "uid" }
user_identity_type = "federatedID"
user_username_format = "{uid}"
user_domain_format = "example.com"
additional_group_filters = ["^Eng.*"]
extended_attributes = ["employeeNumber"]
string_encoding = "utf-8"

[directory.two_steps_lookup]
group_member_attribute_name = "member"
nested_group = true

[sync]
groups = ["Engineering", "Sales"]
all_users = false
"#
    }

    #[test]
    fn test_parse_full_config() {
        let config: AppConfig = toml::from_str(sample_toml()).expect("failed to parse toml");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.connection.url(), "ldaps://ldap.example.com");
        assert_eq!(config.directory.search_page_size, 50);
        assert_eq!(config.directory.identity_key, IdentityKey::Attribute("uid".into()));
        assert_eq!(config.directory.string_encoding, StringEncoding::Utf8);
        let two_steps = config.directory.two_steps_lookup.as_ref().unwrap();
        assert_eq!(two_steps.group_member_attribute_name, "member");
        assert!(two_steps.nested_group);
        assert_eq!(config.sync.groups, vec!["Engineering", "Sales"]);
        assert!(!config.sync.all_users);
        assert!(config.directory.validate().is_ok());
    }

    #[test]
    fn test_defaults() {
        let minimal = r#"
[connection]
host = "ldap.example.com"
[directory]
base_dn = "dc=example,dc=com"
"#;
        let config: AppConfig = toml::from_str(minimal).unwrap();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.connection.url(), "ldap://ldap.example.com");
        assert_eq!(config.connection.authentication_method, AuthMethod::Simple);
        assert_eq!(config.connection.effective_auth_method(), AuthMethod::Anonymous);
        assert_eq!(config.directory.search_page_size, 200);
        assert_eq!(config.directory.identity_key, IdentityKey::Dn);
        assert_eq!(config.directory.user_email_format, "{mail}");
        assert_eq!(config.directory.member_filter_format(), "(memberOf={group_dn})");
        assert_eq!(
            config.directory.default_identity_type().unwrap(),
            IdentityType::EnterpriseId
        );
        assert!(config.sync.all_users);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dirsync.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(sample_toml().as_bytes()).unwrap();

        let config = AppConfig::load_from_file(&path).expect("load_from_file failed");
        assert_eq!(config.directory.base_dn, "dc=example,dc=com");
    }

    #[test]
    fn test_file_not_found() {
        let result = AppConfig::load_from_file("/nonexistent/dirsync.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_two_steps_conflicts_with_member_filter() {
        let mut config = DirectoryConfig::new("dc=example,dc=com");
        config.two_steps_lookup = Some(TwoStepsLookup {
            group_member_attribute_name: "member".into(),
            nested_group: false,
        });
        config.group_member_filter_format = Some("(memberOf={group_dn})".into());
        assert!(matches!(config.validate(), Err(ConfigError::Conflict { .. })));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = DirectoryConfig::new("  ");
        assert!(matches!(config.validate(), Err(ConfigError::MissingValue { .. })));

        config.base_dn = "dc=example,dc=com".into();
        config.all_users_filter = "(&(objectClass=user)".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "directory.all_users_filter"
        ));

        let mut config = DirectoryConfig::new("dc=example,dc=com");
        config.user_identity_type = Some("guestID".into());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "directory.user_identity_type"
        ));

        let mut config = DirectoryConfig::new("dc=example,dc=com");
        config.user_username_format = Some("{uid".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unwrapped_filters_are_accepted() {
        let mut config = DirectoryConfig::new("dc=example,dc=com");
        config.all_users_filter = "objectClass=person".into();
        config.group_member_filter_format = Some("memberOf={group_dn}".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_simple_bind_requires_password() {
        let toml_str = r#"
[connection]
host = "ldap.example.com"
username = "reader"
password_env = "DIRSYNC_TEST_PW_NOT_SET"
[directory]
base_dn = "dc=example,dc=com"
"#;
        let mut config: AppConfig = toml::from_str(toml_str).unwrap();
        config.resolve_env_vars().unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingValue { ref field }) if field == "connection.password_env"
        ));
    }

    #[test]
    fn test_resolve_env_vars() {
        std::env::set_var("DIRSYNC_TEST_BIND_PW", "s3cret");

        let toml_str = r#"
[connection]
host = "ldap.example.com"
username = "reader"
password_env = "DIRSYNC_TEST_BIND_PW"
[directory]
base_dn = "dc=example,dc=com"
"#;
        let mut config: AppConfig = toml::from_str(toml_str).unwrap();
        config.resolve_env_vars().unwrap();
        assert_eq!(config.connection.password.as_deref(), Some("s3cret"));
        assert!(config.validate().is_ok());

        std::env::remove_var("DIRSYNC_TEST_BIND_PW");
    }
}
