//! End-to-end resolution tests.
//!
//! These tests drive the real `DirectoryConnector` over an in-process
//! `MemoryDirectory` populated with an Active Directory style tree:
//! - users under `ou=People`, one of them disabled
//! - groups under `ou=Groups`, with `member` and `memberOf` kept in step
//! - a handful of entries outside the base DN
//!
//! No network I/O.

use dirsync_core::config::{DirectoryConfig, IdentityKey, TwoStepsLookup};
use dirsync_core::directory::{DirectoryConnector, MemoryDirectory, RawAttributes};
use dirsync_core::errors::{CoreError, DirectoryError};
use dirsync_core::export;
use dirsync_core::models::{Resolution, UserRecord};

const BASE: &str = "dc=example,dc=com";

// ===========================================================================
// Helpers
// ===========================================================================

fn user_dn(uid: &str) -> String {
    format!("cn={uid},ou=People,{BASE}")
}

fn group_dn(cn: &str) -> String {
    format!("cn={cn},ou=Groups,{BASE}")
}

struct Fixture {
    dir: MemoryDirectory,
}

impl Fixture {
    fn new() -> Self {
        let mut dir = MemoryDirectory::new();
        dir.add_entry(BASE, [("objectClass", "domain")].into_iter().collect());
        Self { dir }
    }

    /// An enabled AD user; `mail` may be empty to omit the attribute.
    fn user(&mut self, uid: &str, mail: &str, groups: &[&str]) -> String {
        self.user_with(uid, mail, groups, "512")
    }

    fn user_with(&mut self, uid: &str, mail: &str, groups: &[&str], account_control: &str) -> String {
        let dn = user_dn(uid);
        let mut attrs: RawAttributes = [
            ("objectClass", "user"),
            ("objectCategory", "person"),
            ("sAMAccountName", uid),
            ("givenName", uid),
            ("sn", "Tester"),
            ("userAccountControl", account_control),
        ]
        .into_iter()
        .collect();
        if !mail.is_empty() {
            attrs.push("mail", mail);
        }
        for group in groups {
            attrs.push("memberOf", group_dn(group).as_str());
        }
        self.dir.add_entry(&dn, attrs);
        dn
    }

    fn group(&mut self, cn: &str, members: &[String]) -> String {
        let dn = group_dn(cn);
        let mut attrs: RawAttributes = [("objectClass", "group"), ("objectCategory", "group"), ("cn", cn)]
            .into_iter()
            .collect();
        for member in members {
            attrs.push("member", member.as_str());
        }
        self.dir.add_entry(&dn, attrs);
        dn
    }

    fn connector(self, config: &DirectoryConfig) -> DirectoryConnector<MemoryDirectory> {
        DirectoryConnector::new(self.dir, config).expect("valid config")
    }
}

fn groups(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

fn find<'a>(resolution: &'a Resolution, email: &str) -> &'a UserRecord {
    resolution
        .users
        .iter()
        .find(|u| u.email == email)
        .unwrap_or_else(|| panic!("no record for {email}"))
}

fn two_steps(nested: bool) -> DirectoryConfig {
    let mut config = DirectoryConfig::new(BASE);
    config.two_steps_lookup = Some(TwoStepsLookup {
        group_member_attribute_name: "member".into(),
        nested_group: nested,
    });
    config
}

// ===========================================================================
// All users
// ===========================================================================

#[test]
fn all_users_skips_entries_without_email() {
    let mut fx = Fixture::new();
    fx.user("ada", "ada@example.com", &[]);
    fx.user("bob", "", &[]);
    fx.user("cyd", "cyd@example.com", &[]);

    let mut connector = fx.connector(&DirectoryConfig::new(BASE));
    let resolution = connector.load_users_and_groups(&[], &[], true).unwrap();

    assert_eq!(resolution.users.len(), 2);
    assert_eq!(resolution.stats.skipped_entries, 1);
    assert_eq!(resolution.stats.ungrouped_users, 2);
    assert!(resolution.failed_groups.is_empty());
}

#[test]
fn all_users_filter_excludes_disabled_accounts() {
    let mut fx = Fixture::new();
    fx.user("ada", "ada@example.com", &[]);
    fx.user_with("old", "old@example.com", &[], "514");

    let mut connector = fx.connector(&DirectoryConfig::new(BASE));
    let resolution = connector.load_users_and_groups(&[], &[], true).unwrap();
    let emails: Vec<&str> = resolution.users.iter().map(|u| u.email.as_str()).collect();
    assert_eq!(emails, vec!["ada@example.com"]);
}

#[test]
fn all_users_pages_through_large_directories() {
    let mut fx = Fixture::new();
    for i in 0..23 {
        fx.user(&format!("user{i:02}"), &format!("user{i:02}@example.com"), &[]);
    }
    let mut config = DirectoryConfig::new(BASE);
    config.search_page_size = 5;

    let mut connector = fx.connector(&config);
    let resolution = connector.load_users_and_groups(&[], &[], true).unwrap();
    assert_eq!(resolution.users.len(), 23);

    let paged_requests = connector
        .transport()
        .requests()
        .iter()
        .filter(|r| r.page_size == Some(5))
        .count();
    assert_eq!(paged_requests, 5);
}

#[test]
fn all_users_failure_is_fatal() {
    let mut fx = Fixture::new();
    fx.user("ada", "ada@example.com", &[]);
    fx.dir.fail_searches_under(BASE);

    let mut connector = fx.connector(&DirectoryConfig::new(BASE));
    let err = connector.load_users_and_groups(&[], &[], true).unwrap_err();
    assert!(matches!(err, CoreError::Directory(_)));
}

// ===========================================================================
// Filter strategy
// ===========================================================================

#[test]
fn user_in_two_groups_is_built_once_with_both_groups() {
    let mut fx = Fixture::new();
    fx.group("Sales", &[]);
    fx.group("Engineering", &[]);
    fx.user("ada", "ada@example.com", &["Sales", "Engineering"]);
    fx.user("bob", "bob@example.com", &["Sales"]);

    let mut connector = fx.connector(&DirectoryConfig::new(BASE));
    let resolution = connector
        .load_users_and_groups(&groups(&["Sales", "Engineering"]), &[], false)
        .unwrap();

    assert_eq!(resolution.users.len(), 2);
    assert_eq!(find(&resolution, "ada@example.com").groups, vec!["Sales", "Engineering"]);
    assert_eq!(find(&resolution, "bob@example.com").groups, vec!["Sales"]);
    assert_eq!(resolution.stats.groups_resolved, 2);
}

#[test]
fn cached_user_keeps_original_build_and_gains_group() {
    let mut fx = Fixture::new();
    fx.group("Engineering", &[]);
    fx.user("ada", "ada@example.com", &["Engineering"]);
    fx.user("bob", "bob@example.com", &[]);

    let mut config = DirectoryConfig::new(BASE);
    config.extended_attributes = vec!["sAMAccountName".into()];
    let extended = config.extended_attributes.clone();
    let mut connector = fx.connector(&config);
    let resolution = connector
        .load_users_and_groups(&groups(&["Engineering"]), &extended, true)
        .unwrap();

    assert_eq!(resolution.users.len(), 2);
    let ada = find(&resolution, "ada@example.com");
    assert_eq!(ada.groups, vec!["Engineering"]);
    assert_eq!(ada.firstname.as_deref(), Some("ada"));
    assert_eq!(ada.source_attributes["sAMAccountName"], serde_json::json!(["ada"]));
    assert_eq!(resolution.stats.grouped_users, 1);
    assert_eq!(resolution.stats.ungrouped_users, 1);
    // Records come back in first-seen order.
    assert_eq!(resolution.users[0].email, "ada@example.com");
}

#[test]
fn missing_group_is_reported_and_run_continues() {
    let mut fx = Fixture::new();
    fx.group("Sales", &[]);
    fx.user("ada", "ada@example.com", &["Sales"]);

    let mut connector = fx.connector(&DirectoryConfig::new(BASE));
    let resolution = connector
        .load_users_and_groups(&groups(&["Marketing", "Sales"]), &[], false)
        .unwrap();

    assert_eq!(resolution.failed_groups.len(), 1);
    assert_eq!(resolution.failed_groups[0].group, "Marketing");
    assert!(resolution.failed_groups[0].reason.contains("no group found for: Marketing"));
    assert_eq!(find(&resolution, "ada@example.com").groups, vec!["Sales"]);
}

#[test]
fn group_order_does_not_change_memberships() {
    let build = || {
        let mut fx = Fixture::new();
        fx.group("Sales", &[]);
        fx.group("Engineering", &[]);
        fx.user("ada", "ada@example.com", &["Sales", "Engineering"]);
        fx.user("bob", "bob@example.com", &["Engineering"]);
        fx.user("cyd", "cyd@example.com", &["Sales"]);
        fx.connector(&DirectoryConfig::new(BASE))
    };
    let memberships = |resolution: &Resolution| {
        let mut pairs: Vec<(String, Vec<String>)> = resolution
            .users
            .iter()
            .map(|u| {
                let mut groups = u.groups.clone();
                groups.sort();
                (u.email.clone(), groups)
            })
            .collect();
        pairs.sort();
        pairs
    };

    let forward = build()
        .load_users_and_groups(&groups(&["Sales", "Engineering"]), &[], false)
        .unwrap();
    let reverse = build()
        .load_users_and_groups(&groups(&["Engineering", "Sales"]), &[], false)
        .unwrap();
    assert_eq!(memberships(&forward), memberships(&reverse));
    assert_eq!(forward.users.len(), 3);
}

#[test]
fn encoding_error_inside_a_group_aborts_the_run() {
    let mut fx = Fixture::new();
    fx.group("Sales", &[]);
    fx.group("Engineering", &[]);
    fx.user("ada", "ada@example.com", &["Sales"]);
    let mut broken: RawAttributes = [
        ("objectClass", "user"),
        ("objectCategory", "person"),
        ("userAccountControl", "512"),
    ]
    .into_iter()
    .collect();
    broken.push("mail", vec![0xff, 0xfe, 0x40]);
    broken.push("memberOf", group_dn("Engineering").as_str());
    fx.dir.add_entry(&user_dn("broken"), broken);

    let mut connector = fx.connector(&DirectoryConfig::new(BASE));
    let err = connector
        .load_users_and_groups(&groups(&["Sales", "Engineering"]), &[], false)
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::Directory(DirectoryError::Encoding { ref attribute, .. }) if attribute == "mail"
    ));
}

// ===========================================================================
// Traversal strategy
// ===========================================================================

#[test]
fn traversal_member_lookup_failure_is_reported_for_the_group() {
    let mut fx = Fixture::new();
    let ada = fx.user("ada", "ada@example.com", &[]);
    fx.group("Engineering", &[ada]);
    let cyd = fx.user("cyd", "cyd@example.com", &[]);
    fx.group("Support", &[cyd]);
    fx.dir.fail_searches_under(&user_dn("ada"));

    let mut connector = fx.connector(&two_steps(false));
    let resolution = connector
        .load_users_and_groups(&groups(&["Engineering", "Support"]), &[], false)
        .unwrap();

    assert_eq!(resolution.failed_groups.len(), 1);
    assert_eq!(resolution.failed_groups[0].group, "Engineering");
    assert_eq!(resolution.stats.groups_resolved, 1);
    assert_eq!(find(&resolution, "cyd@example.com").groups, vec!["Support"]);
}

#[test]
fn traversal_with_attribute_identity_reads_dn_members() {
    let mut fx = Fixture::new();
    let ada = fx.user("ada", "ada@example.com", &[]);
    let bob = fx.user("bob", "bob@example.com", &[]);
    fx.group("Engineering", &[ada, bob]);

    let mut config = two_steps(false);
    config.identity_key = IdentityKey::Attribute("sAMAccountName".into());
    let mut connector = fx.connector(&config);
    let resolution = connector
        .load_users_and_groups(&groups(&["Engineering"]), &[], true)
        .unwrap();

    assert_eq!(resolution.users.len(), 2);
    assert!(resolution.failed_groups.is_empty());
    let ada = find(&resolution, "ada@example.com");
    assert_eq!(ada.identity_key, "ada");
    assert_eq!(ada.groups, vec!["Engineering"]);
    assert_eq!(find(&resolution, "bob@example.com").groups, vec!["Engineering"]);
}

#[test]
fn traversal_drops_members_outside_base_dn() {
    let mut fx = Fixture::new();
    let ada = fx.user("ada", "ada@example.com", &[]);
    let outsider = "cn=eve,ou=People,dc=partner,dc=org".to_string();
    fx.dir.add_entry(
        &outsider,
        [
            ("objectClass", "user"),
            ("objectCategory", "person"),
            ("mail", "eve@partner.org"),
            ("userAccountControl", "512"),
        ]
        .into_iter()
        .collect(),
    );
    fx.group("Engineering", &[ada, outsider]);

    let mut connector = fx.connector(&two_steps(false));
    let resolution = connector
        .load_users_and_groups(&groups(&["Engineering"]), &[], false)
        .unwrap();

    assert_eq!(resolution.users.len(), 1);
    assert_eq!(resolution.users[0].email, "ada@example.com");
    assert_eq!(resolution.users[0].groups, vec!["Engineering"]);
}

#[test]
fn nested_groups_with_cycle_resolve_each_user_once() {
    let mut fx = Fixture::new();
    let ada = fx.user("ada", "ada@example.com", &[]);
    let bob = fx.user("bob", "bob@example.com", &[]);
    let cyd = fx.user("cyd", "cyd@example.com", &[]);
    fx.group("Platform", &[ada.clone(), group_dn("Infra")]);
    fx.group("Infra", &[bob, group_dn("Platform"), ada]);
    fx.group("Other", &[cyd]);

    let mut connector = fx.connector(&two_steps(true));
    let resolution = connector
        .load_users_and_groups(&groups(&["Platform"]), &[], false)
        .unwrap();

    let mut emails: Vec<&str> = resolution.users.iter().map(|u| u.email.as_str()).collect();
    emails.sort();
    assert_eq!(emails, vec!["ada@example.com", "bob@example.com"]);
    assert!(resolution.users.iter().all(|u| u.groups == vec!["Platform"]));
}

#[test]
fn traversal_by_unique_attribute_dedups_with_all_users() {
    let mut fx = Fixture::new();
    fx.user("ada", "ada@example.com", &[]);
    fx.user("bob", "bob@example.com", &[]);
    fx.dir.add_entry(
        &group_dn("Posix"),
        [
            ("objectClass", "posixGroup"),
            ("cn", "Posix"),
            ("memberUid", "ada"),
            ("memberUid", "nobody"),
        ]
        .into_iter()
        .collect(),
    );

    let mut config = DirectoryConfig::new(BASE);
    config.identity_key = IdentityKey::Attribute("sAMAccountName".into());
    config.two_steps_lookup = Some(TwoStepsLookup {
        group_member_attribute_name: "memberUid".into(),
        nested_group: false,
    });
    let mut connector = fx.connector(&config);
    let resolution = connector
        .load_users_and_groups(&groups(&["Posix"]), &[], true)
        .unwrap();

    assert_eq!(resolution.users.len(), 2);
    let ada = find(&resolution, "ada@example.com");
    assert_eq!(ada.identity_key, "ada");
    assert_eq!(ada.groups, vec!["Posix"]);
    assert!(find(&resolution, "bob@example.com").groups.is_empty());
}

// ===========================================================================
// Export
// ===========================================================================

#[test]
fn resolution_exports_to_csv() {
    let mut fx = Fixture::new();
    fx.group("Sales", &[]);
    fx.user("zed", "zed@example.com", &["Sales"]);
    fx.user("ada", "ada@example.com", &[]);

    let mut connector = fx.connector(&DirectoryConfig::new(BASE));
    let resolution = connector
        .load_users_and_groups(&groups(&["Sales"]), &[], true)
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("users.csv");
    export::write_csv(std::fs::File::create(&path).unwrap(), &resolution.users).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[1].starts_with("ada,Tester,ada@example.com,,,enterpriseID"));
    assert!(lines[2].starts_with("zed,Tester,zed@example.com,,Sales,enterpriseID"));
}
