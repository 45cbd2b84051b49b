//! Error types for the dirsync core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them for callers that want a single
//! error type.
//!
//! Record validation problems (missing email, unknown identity type) are not
//! represented here: those entries are skipped with a logged warning.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Export(#[from] ExportError),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation. All of them are raised
/// before any directory search begins.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A required option is absent or empty.
    #[error("missing required configuration value '{field}'")]
    MissingValue { field: String },

    /// Two options were set that cannot be combined.
    #[error("cannot define both '{first}' and '{second}' in config")]
    Conflict { first: String, second: String },

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Directory errors
// ---------------------------------------------------------------------------

/// Errors from the directory transport and the resolution engine.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// The directory server could not be reached.
    #[error("LDAP connection failure to '{host}': {detail}")]
    Connection { host: String, detail: String },

    /// The server rejected the bind.
    #[error("LDAP bind failed for '{user}': {detail}")]
    Bind { user: String, detail: String },

    /// A search request (or one page of it) failed.
    #[error("LDAP search failed (base '{base}', filter '{filter}'): {detail}")]
    Search {
        base: String,
        filter: String,
        detail: String,
    },

    /// The search base does not exist (result code 32).
    #[error("no such object: '{base}'")]
    NoSuchObject { base: String },

    /// A filter string could not be parsed.
    #[error("malformed LDAP filter '{filter}': {detail}")]
    Filter { filter: String, detail: String },

    /// A placeholder template could not be parsed or filled in.
    #[error("malformed template '{template}': {detail}")]
    Template { template: String, detail: String },

    /// A distinguished name could not be parsed.
    #[error("malformed distinguished name '{0}'")]
    InvalidDn(String),

    /// An attribute value is not valid in the configured string encoding.
    #[error("encoding error in value of attribute '{attribute}' (expected {encoding})")]
    Encoding { attribute: String, encoding: String },

    /// The group filter matched no entry.
    #[error("no group found for: {0}")]
    GroupNotFound(String),

    /// The group filter matched more than one entry.
    #[error("multiple LDAP groups ({count}) found for: {group}")]
    AmbiguousGroup { group: String, count: usize },

    /// The membership attribute of a group entry could not be read.
    #[error("unable to read members of '{group_dn}': {detail}")]
    GroupLookup { group_dn: String, detail: String },

    /// A single member identifier resolved to more than one user entry.
    #[error("unexpected multiple LDAP objects found for member: {0}")]
    DuplicateMember(String),
}

// ---------------------------------------------------------------------------
// Record errors
// ---------------------------------------------------------------------------

/// An identity type string outside the fixed enumeration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unrecognized identity type '{0}' (expected adobeID, enterpriseID or federatedID)")]
pub struct UnknownIdentityType(pub String);

// ---------------------------------------------------------------------------
// Export errors
// ---------------------------------------------------------------------------

/// Errors from writing resolved records out.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("CSV export failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON export failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("export I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
