//! Domain model types produced by a resolution run.
//!
//! These types bridge the resolution engine, the exporters and the CLI.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::UnknownIdentityType;

// ---------------------------------------------------------------------------
// Identity type
// ---------------------------------------------------------------------------

/// Kind of account the downstream system provisions for a user.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum IdentityType {
    #[serde(rename = "adobeID")]
    AdobeId,
    #[default]
    #[serde(rename = "enterpriseID")]
    EnterpriseId,
    #[serde(rename = "federatedID")]
    FederatedId,
}

impl IdentityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AdobeId => "adobeID",
            Self::EnterpriseId => "enterpriseID",
            Self::FederatedId => "federatedID",
        }
    }
}

impl FromStr for IdentityType {
    type Err = UnknownIdentityType;

    /// Case-insensitive; surrounding whitespace is ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "adobeid" => Ok(Self::AdobeId),
            "enterpriseid" => Ok(Self::EnterpriseId),
            "federatedid" => Ok(Self::FederatedId),
            _ => Err(UnknownIdentityType(s.to_string())),
        }
    }
}

impl std::fmt::Display for IdentityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// User record
// ---------------------------------------------------------------------------

/// Canonical user record built from one directory entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserRecord {
    /// DN or unique attribute value, depending on configuration.
    pub identity_key: String,
    pub identity_type: IdentityType,
    pub email: String,
    pub username: String,
    pub domain: Option<String>,
    pub firstname: Option<String>,
    pub lastname: Option<String>,
    /// Upper-cased country code.
    pub country: Option<String>,
    /// Requested groups this user was found in, in discovery order.
    pub groups: Vec<String>,
    /// `memberOf` groups selected by the additional group filters.
    pub member_groups: Vec<String>,
    /// Rendered field values plus extended attribute values.
    pub source_attributes: BTreeMap<String, serde_json::Value>,
}

impl UserRecord {
    /// Append a group unless it is already recorded. Returns whether it was added.
    pub fn add_group(&mut self, group: &str) -> bool {
        if self.groups.iter().any(|g| g == group) {
            return false;
        }
        self.groups.push(group.to_string());
        true
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// A requested group that could not be resolved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupFailure {
    pub group: String,
    pub reason: String,
}

/// Counters describing one resolution run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionStats {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total_users: usize,
    /// Users with at least one requested group.
    pub grouped_users: usize,
    pub ungrouped_users: usize,
    pub groups_resolved: usize,
    /// Entries skipped because no valid record could be built from them.
    pub skipped_entries: usize,
}

impl ResolutionStats {
    pub fn duration_secs(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}

/// Result of [`crate::directory::connector::DirectoryConnector::load_users_and_groups`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    /// Records in first-seen order.
    pub users: Vec<UserRecord>,
    pub failed_groups: Vec<GroupFailure>,
    pub stats: ResolutionStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_type_parse_is_case_insensitive() {
        assert_eq!("federatedID".parse::<IdentityType>().unwrap(), IdentityType::FederatedId);
        assert_eq!("ADOBEID".parse::<IdentityType>().unwrap(), IdentityType::AdobeId);
        assert_eq!(" enterpriseid ".parse::<IdentityType>().unwrap(), IdentityType::EnterpriseId);
        assert!("guestID".parse::<IdentityType>().is_err());
    }

    #[test]
    fn test_identity_type_serde_uses_canonical_names() {
        let json = serde_json::to_string(&IdentityType::FederatedId).unwrap();
        assert_eq!(json, "\"federatedID\"");
        assert_eq!(IdentityType::default().to_string(), "enterpriseID");
    }

    #[test]
    fn test_add_group_ignores_duplicates() {
        let mut record = UserRecord {
            identity_key: "uid=a,dc=x".into(),
            identity_type: IdentityType::EnterpriseId,
            email: "a@x.com".into(),
            username: "a@x.com".into(),
            domain: None,
            firstname: None,
            lastname: None,
            country: None,
            groups: Vec::new(),
            member_groups: Vec::new(),
            source_attributes: BTreeMap::new(),
        };
        assert!(record.add_group("Sales"));
        assert!(!record.add_group("Sales"));
        assert!(record.add_group("Engineering"));
        assert_eq!(record.groups, vec!["Sales", "Engineering"]);
    }
}
