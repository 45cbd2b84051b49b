//! Group membership resolution.
//!
//! A group is first located by name ([`GroupResolver::find_group_dn`]); its
//! members are then found either with a reverse filter over user entries
//! ([`FilterStrategy`]) or by reading a membership attribute off the group
//! entry and following it ([`TraversalStrategy`]).

use std::collections::HashSet;
use std::vec;

use tracing::{debug, info, trace, warn};

use super::attributes::{RawAttributes, StringEncoding};
use super::dn;
use super::escape::{escape_value, format_query};
use super::paged::PagedSearch;
use super::transport::{DirectoryTransport, SearchRequest};
use crate::config::{wrap_filter, DirectoryConfig, IdentityKey};
use crate::errors::DirectoryError;

/// Filter used when reading an entry by DN.
const ANY_OBJECT: &str = "(objectClass=*)";

/// Options shared by both strategies.
#[derive(Debug, Clone)]
pub struct ResolverContext {
    pub base_dn: String,
    pub all_users_filter: String,
    pub group_filter_format: String,
    pub page_size: u32,
    pub encoding: StringEncoding,
    pub identity_key: IdentityKey,
}

impl ResolverContext {
    pub fn from_config(config: &DirectoryConfig) -> Self {
        Self {
            base_dn: config.base_dn.clone(),
            all_users_filter: config.all_users_filter.clone(),
            group_filter_format: config.group_filter_format.clone(),
            page_size: config.search_page_size,
            encoding: config.string_encoding,
            identity_key: config.identity_key.clone(),
        }
    }
}

/// Reverse lookup: user entries carrying a back-reference to the group.
#[derive(Debug, Clone)]
pub struct FilterStrategy {
    pub member_filter_format: String,
}

/// Forward lookup: the group's membership attribute, optionally recursing
/// into members that are groups themselves.
#[derive(Debug, Clone)]
pub struct TraversalStrategy {
    pub member_attribute: String,
    pub nested: bool,
}

#[derive(Debug, Clone)]
pub enum GroupResolver {
    Filter(FilterStrategy),
    Traversal(TraversalStrategy),
}

impl GroupResolver {
    pub fn from_config(config: &DirectoryConfig) -> Self {
        match &config.two_steps_lookup {
            Some(two_steps) => Self::Traversal(TraversalStrategy {
                member_attribute: two_steps.group_member_attribute_name.clone(),
                nested: two_steps.nested_group,
            }),
            None => Self::Filter(FilterStrategy {
                member_filter_format: config.member_filter_format().to_string(),
            }),
        }
    }

    /// DN of the single group entry matching `group`.
    pub fn find_group_dn<T: DirectoryTransport + ?Sized>(
        transport: &mut T,
        ctx: &ResolverContext,
        group: &str,
    ) -> Result<String, DirectoryError> {
        let filter = format_query(&ctx.group_filter_format, &[("group", group)])?;
        let request = SearchRequest::subtree(&ctx.base_dn, &filter, vec!["1.1".into()]);
        let mut dns = Vec::new();
        for item in PagedSearch::new(transport, request, 0) {
            let (dn, _) = item?;
            dns.push(dn);
        }
        match dns.len() {
            0 => Err(DirectoryError::GroupNotFound(group.to_string())),
            1 => {
                let group_dn = dns.remove(0);
                debug!(group, group_dn = %group_dn, "group located");
                Ok(group_dn)
            }
            count => Err(DirectoryError::AmbiguousGroup {
                group: group.to_string(),
                count,
            }),
        }
    }

    /// Locate `group` and hand every member user entry to `visit`, returning
    /// the number of entries visited. Member entries are fetched with
    /// `attributes`.
    pub fn resolve_members<T, F>(
        &self,
        transport: &mut T,
        ctx: &ResolverContext,
        group: &str,
        attributes: &[String],
        mut visit: F,
    ) -> Result<usize, DirectoryError>
    where
        T: DirectoryTransport + ?Sized,
        F: FnMut(String, RawAttributes) -> Result<(), DirectoryError>,
    {
        let group_dn = Self::find_group_dn(transport, ctx, group)?;
        match self {
            Self::Filter(strategy) => {
                strategy.resolve(transport, ctx, &group_dn, attributes, &mut visit)
            }
            Self::Traversal(strategy) => {
                strategy.resolve(transport, ctx, &group_dn, attributes, &mut visit)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Filter strategy
// ---------------------------------------------------------------------------

impl FilterStrategy {
    /// `(&<member filter><all users filter>)` for one group.
    pub fn member_filter(&self, ctx: &ResolverContext, group_dn: &str) -> Result<String, DirectoryError> {
        let member_filter = format_query(&self.member_filter_format, &[("group_dn", group_dn)])?;
        Ok(format!(
            "(&{}{})",
            wrap_filter(&member_filter),
            wrap_filter(&ctx.all_users_filter)
        ))
    }

    fn resolve<T, F>(
        &self,
        transport: &mut T,
        ctx: &ResolverContext,
        group_dn: &str,
        attributes: &[String],
        visit: &mut F,
    ) -> Result<usize, DirectoryError>
    where
        T: DirectoryTransport + ?Sized,
        F: FnMut(String, RawAttributes) -> Result<(), DirectoryError>,
    {
        let filter = self.member_filter(ctx, group_dn)?;
        let request = SearchRequest::subtree(&ctx.base_dn, &filter, attributes.to_vec());
        let mut visited = 0;
        for item in PagedSearch::new(transport, request, ctx.page_size) {
            let (dn, attrs) = item?;
            visit(dn, attrs)?;
            visited += 1;
        }
        Ok(visited)
    }
}

// ---------------------------------------------------------------------------
// Traversal strategy
// ---------------------------------------------------------------------------

/// Pending members of one group entry.
struct Frame {
    members: vec::IntoIter<String>,
    /// The nested group these members belong to, emitted once they are done.
    owner: Option<String>,
}

impl TraversalStrategy {
    /// Membership attribute values of the entry at `entry_dn`, or `None` when
    /// no such entry exists.
    fn read_members<T: DirectoryTransport + ?Sized>(
        &self,
        transport: &mut T,
        ctx: &ResolverContext,
        entry_dn: &str,
    ) -> Result<Option<Vec<String>>, DirectoryError> {
        let request =
            SearchRequest::base_object(entry_dn, ANY_OBJECT, vec![self.member_attribute.clone()]);
        let mut search = PagedSearch::new(transport, request, 0);
        match search.next() {
            Some(Ok((_, attrs))) => attrs.all_str(&self.member_attribute, ctx.encoding).map(Some),
            Some(Err(DirectoryError::NoSuchObject { .. })) | None => Ok(None),
            Some(Err(e)) => Err(DirectoryError::GroupLookup {
                group_dn: entry_dn.to_string(),
                detail: e.to_string(),
            }),
        }
    }

    /// Every member identifier reachable from `group_dn`, each at most once.
    ///
    /// With nesting enabled, the members of a nested group come before the
    /// nested group's own identifier. A nested entry that does not exist is
    /// yielded as a plain member; any other read failure is returned.
    pub fn member_identifiers<T: DirectoryTransport + ?Sized>(
        &self,
        transport: &mut T,
        ctx: &ResolverContext,
        group_dn: &str,
    ) -> Result<Vec<String>, DirectoryError> {
        let top = self
            .read_members(transport, ctx, group_dn)?
            .ok_or_else(|| DirectoryError::GroupLookup {
                group_dn: group_dn.to_string(),
                detail: "entry not found".into(),
            })?;
        let mut visited: HashSet<String> = HashSet::new();
        let mut identifiers = Vec::new();
        let mut stack = vec![Frame {
            members: top.into_iter(),
            owner: None,
        }];

        while let Some(frame) = stack.last_mut() {
            let Some(member) = frame.members.next() else {
                if let Some(owner) = stack.pop().and_then(|f| f.owner) {
                    identifiers.push(owner);
                }
                continue;
            };
            if !visited.insert(member.clone()) {
                trace!(member = %member, "member already visited");
                continue;
            }
            if !self.nested || !dn::looks_like_dn(&member) {
                identifiers.push(member);
                continue;
            }
            match self.read_members(transport, ctx, &member)? {
                Some(nested) => stack.push(Frame {
                    members: nested.into_iter(),
                    owner: Some(member),
                }),
                None => {
                    warn!(member = %member, "nested member entry not found");
                    identifiers.push(member);
                }
            }
        }
        Ok(identifiers)
    }

    /// Look up the user entry behind one member identifier. DNs are read
    /// directly; anything else is matched against the unique identity
    /// attribute.
    fn member_request(
        &self,
        ctx: &ResolverContext,
        identifier: &str,
        attributes: &[String],
    ) -> Option<SearchRequest> {
        if dn::looks_like_dn(identifier) {
            if !dn::is_within_scope(&ctx.base_dn, identifier) {
                debug!(member = identifier, base_dn = %ctx.base_dn, "member outside base DN, skipped");
                return None;
            }
            return Some(SearchRequest::base_object(
                identifier,
                &wrap_filter(&ctx.all_users_filter),
                attributes.to_vec(),
            ));
        }
        match &ctx.identity_key {
            IdentityKey::Attribute(attr) => {
                let filter = format!(
                    "(&({}={}){})",
                    attr,
                    escape_value(identifier),
                    wrap_filter(&ctx.all_users_filter)
                );
                Some(SearchRequest::subtree(&ctx.base_dn, &filter, attributes.to_vec()))
            }
            IdentityKey::Dn => {
                warn!(
                    member = identifier,
                    attribute = %self.member_attribute,
                    "member is not a DN and no unique identity attribute is configured, skipped"
                );
                None
            }
        }
    }

    fn resolve<T, F>(
        &self,
        transport: &mut T,
        ctx: &ResolverContext,
        group_dn: &str,
        attributes: &[String],
        visit: &mut F,
    ) -> Result<usize, DirectoryError>
    where
        T: DirectoryTransport + ?Sized,
        F: FnMut(String, RawAttributes) -> Result<(), DirectoryError>,
    {
        let identifiers = self.member_identifiers(transport, ctx, group_dn)?;
        info!(group_dn, count = identifiers.len(), "membership attribute read");

        let mut visited = 0;
        for identifier in identifiers {
            let Some(request) = self.member_request(ctx, &identifier, attributes) else {
                continue;
            };
            let mut entries = Vec::new();
            for item in PagedSearch::new(transport, request, 0) {
                match item {
                    Ok(entry) => entries.push(entry),
                    Err(DirectoryError::NoSuchObject { .. }) => {
                        warn!(member = %identifier, "member entry does not exist, skipped");
                    }
                    Err(e) => return Err(e),
                }
            }
            if entries.len() > 1 {
                return Err(DirectoryError::DuplicateMember(identifier));
            }
            match entries.pop() {
                Some((dn, attrs)) => {
                    visit(dn, attrs)?;
                    visited += 1;
                }
                None => trace!(member = %identifier, "member is not a user entry"),
            }
        }
        Ok(visited)
    }
}
