//! Orchestration of one resolution run.
//!
//! [`DirectoryConnector`] ties the pieces together: the all-users search
//! seeds the [`DedupCache`], then each requested group is resolved with the
//! configured [`GroupResolver`] and its members gain the group name.

use chrono::Utc;
use tracing::{debug, info, warn};

use super::builder::UserRecordBuilder;
use super::cache::DedupCache;
use super::groups::{GroupResolver, ResolverContext};
use super::paged::PagedSearch;
use super::transport::{DirectoryTransport, SearchRequest};
use crate::config::{wrap_filter, DirectoryConfig};
use crate::errors::{ConfigError, CoreError, DirectoryError};
use crate::models::{GroupFailure, Resolution, ResolutionStats};

pub struct DirectoryConnector<T: DirectoryTransport> {
    transport: T,
    context: ResolverContext,
    resolver: GroupResolver,
    builder: UserRecordBuilder,
}

impl<T: DirectoryTransport> DirectoryConnector<T> {
    /// Validate `config` and prepare a connector over an open transport.
    pub fn new(transport: T, config: &DirectoryConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let resolver = GroupResolver::from_config(config);
        match &resolver {
            GroupResolver::Filter(strategy) => {
                debug!(member_filter = %strategy.member_filter_format, "using reverse member filter")
            }
            GroupResolver::Traversal(strategy) => debug!(
                member_attribute = %strategy.member_attribute,
                nested = strategy.nested,
                "using two-step membership lookup"
            ),
        }
        Ok(Self {
            transport,
            context: ResolverContext::from_config(config),
            resolver,
            builder: UserRecordBuilder::from_config(config)?,
        })
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Resolve all users (optionally) and the members of each group.
    ///
    /// A failure while reading all users aborts the run. A group that cannot
    /// be resolved is reported in [`Resolution::failed_groups`] and the run
    /// continues with the next group. Encoding errors always abort.
    pub fn load_users_and_groups(
        &mut self,
        groups: &[String],
        extended_attributes: &[String],
        all_users: bool,
    ) -> Result<Resolution, CoreError> {
        let started_at = Utc::now();
        let mut cache = DedupCache::new();
        let mut skipped_entries = 0usize;
        let attributes = self.builder.requested_attributes(extended_attributes);

        if all_users {
            let request = SearchRequest::subtree(
                &self.context.base_dn,
                &wrap_filter(&self.context.all_users_filter),
                attributes.clone(),
            );
            for item in PagedSearch::new(&mut self.transport, request, self.context.page_size) {
                let (dn, attrs) = item?;
                if self
                    .builder
                    .resolve(&mut cache, &dn, &attrs, extended_attributes)?
                    .is_none()
                {
                    skipped_entries += 1;
                }
            }
            info!(count = cache.len(), skipped = skipped_entries, "all users loaded");
        }

        let mut failed_groups = Vec::new();
        let mut groups_resolved = 0usize;
        for group in groups {
            let mut members = 0usize;
            let builder = &self.builder;
            let outcome = self.resolver.resolve_members(
                &mut self.transport,
                &self.context,
                group,
                &attributes,
                |dn, attrs| {
                    match builder.resolve(&mut cache, &dn, &attrs, extended_attributes)? {
                        Some(key) => {
                            cache.append_group(&key, group);
                            members += 1;
                        }
                        None => skipped_entries += 1,
                    }
                    Ok(())
                },
            );
            match outcome {
                Ok(_) => {
                    groups_resolved += 1;
                    info!(group = %group, count = members, "users in group");
                }
                Err(e @ DirectoryError::Encoding { .. }) => return Err(e.into()),
                Err(e) => {
                    warn!(group = %group, error = %e, "skipping group");
                    failed_groups.push(GroupFailure {
                        group: group.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let users = cache.into_records();
        let grouped_users = users.iter().filter(|u| !u.groups.is_empty()).count();
        let ungrouped_users = users.len() - grouped_users;
        if !groups.is_empty() {
            debug!(count = grouped_users, "users in any group");
            debug!(count = ungrouped_users, "users not in any group");
        }
        info!(total = users.len(), "total users loaded");

        Ok(Resolution {
            stats: ResolutionStats {
                started_at,
                finished_at: Utc::now(),
                total_users: users.len(),
                grouped_users,
                ungrouped_users,
                groups_resolved,
                skipped_entries,
            },
            users,
            failed_groups,
        })
    }
}
