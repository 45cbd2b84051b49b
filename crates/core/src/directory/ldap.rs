//! [`DirectoryTransport`] over a live LDAP server, built on the synchronous
//! `ldap3` client.
//!
//! Paging uses the simple paged results control (RFC 2696). A paged search
//! is abandoned by re-sending it with a page size of zero and the last
//! cookie.

use std::time::Duration;

use ldap3::controls::{Control, ControlType, PagedResults};
use ldap3::{LdapConn, LdapConnSettings, LdapResult, ResultEntry, Scope, SearchEntry};
use tracing::{debug, info, trace, warn};

use super::attributes::RawAttributes;
use super::transport::{
    DirectoryEntry, DirectoryTransport, Paging, PagingCursor, SearchItem, SearchPage,
    SearchRequest, SearchScope,
};
use crate::config::{AuthMethod, ConnectionConfig};
use crate::errors::DirectoryError;

/// Result codes that end a search with whatever was returned so far:
/// sizeLimitExceeded, adminLimitExceeded, referral.
const PARTIAL_RESULT_CODES: &[u32] = &[4, 11, 10];

/// Result code for partial results on LDAPv2-era servers.
const PARTIAL_RESULTS_V2: u32 = 9;

const NO_SUCH_OBJECT: u32 = 32;

pub struct LdapTransport {
    conn: LdapConn,
    url: String,
}

impl LdapTransport {
    /// Open a connection and bind according to `config`.
    pub fn connect(config: &ConnectionConfig) -> Result<Self, DirectoryError> {
        let url = config.url();
        let settings = LdapConnSettings::new()
            .set_conn_timeout(Duration::from_secs(config.connect_timeout_secs))
            .set_starttls(config.starttls)
            .set_no_tls_verify(!config.require_tls_cert);

        info!(url = %url, starttls = config.starttls, "connecting to LDAP server");
        let mut conn =
            LdapConn::with_settings(settings, &url).map_err(|e| DirectoryError::Connection {
                host: url.clone(),
                detail: e.to_string(),
            })?;

        match config.effective_auth_method() {
            AuthMethod::Anonymous => debug!("using anonymous bind"),
            AuthMethod::Simple => {
                let user = config.username.as_deref().unwrap_or_default();
                let password = config.password.as_deref().unwrap_or_default();
                conn.simple_bind(user, password)
                    .and_then(|res| res.success())
                    .map_err(|e| DirectoryError::Bind {
                        user: user.to_string(),
                        detail: e.to_string(),
                    })?;
                debug!(user, "simple bind succeeded");
            }
        }
        info!(url = %url, "connected to LDAP server");
        Ok(Self { conn, url })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn scope_of(scope: SearchScope) -> Scope {
    match scope {
        SearchScope::Base => Scope::Base,
        SearchScope::OneLevel => Scope::OneLevel,
        SearchScope::Subtree => Scope::Subtree,
    }
}

/// Text and binary values of an entry as one raw attribute map.
fn raw_attributes(entry: SearchEntry) -> RawAttributes {
    let mut attributes = RawAttributes::new();
    for (name, values) in entry.attrs {
        attributes.set(&name, values);
    }
    for (name, values) in entry.bin_attrs {
        for value in values {
            attributes.push(&name, value);
        }
    }
    attributes
}

/// `None` for intermediate responses, which carry no entry.
fn convert(entry: ResultEntry) -> Option<SearchItem> {
    if entry.is_intermediate() {
        trace!("skipping intermediate response");
        return None;
    }
    if entry.is_ref() {
        return Some(SearchItem::Referral(ldap3::parse_refs(entry.0)));
    }
    let entry = SearchEntry::construct(entry);
    Some(SearchItem::Entry(DirectoryEntry {
        dn: entry.dn.clone(),
        attributes: raw_attributes(entry),
    }))
}

/// Cookie from the paged results response control, if any.
fn response_cookie(result: &LdapResult) -> Option<PagingCursor> {
    result.ctrls.iter().find_map(|ctrl| match ctrl {
        Control(Some(ControlType::PagedResults), raw) => {
            let paged: PagedResults = raw.parse();
            Some(PagingCursor::new(paged.cookie))
        }
        _ => None,
    })
}

impl DirectoryTransport for LdapTransport {
    fn search(
        &mut self,
        request: &SearchRequest,
        paging: Option<Paging<'_>>,
    ) -> Result<SearchPage, DirectoryError> {
        let attributes: Vec<&str> = request.attributes.iter().map(String::as_str).collect();
        let scope = scope_of(request.scope);

        let outcome = match paging {
            Some(paging) => {
                let control = PagedResults {
                    size: i32::try_from(paging.size).unwrap_or(i32::MAX),
                    cookie: paging
                        .cursor
                        .map(|c| c.as_bytes().to_vec())
                        .unwrap_or_default(),
                };
                self.conn
                    .with_controls(control)
                    .search(&request.base, scope, &request.filter, attributes)
            }
            None => self
                .conn
                .search(&request.base, scope, &request.filter, attributes),
        };
        let ldap3::SearchResult(entries, result) = outcome.map_err(|e| request.failure(e))?;

        let partial = match result.rc {
            0 => false,
            rc if rc == PARTIAL_RESULTS_V2 || PARTIAL_RESULT_CODES.contains(&rc) => {
                warn!(
                    base = %request.base,
                    filter = %request.filter,
                    rc,
                    text = %result.text,
                    "search returned partial results"
                );
                true
            }
            NO_SUCH_OBJECT => {
                return Err(DirectoryError::NoSuchObject {
                    base: request.base.clone(),
                });
            }
            rc => {
                return Err(request.failure(format!("rc={rc} {}", result.text)));
            }
        };

        let cursor = if paging.is_some() {
            response_cookie(&result)
        } else {
            None
        };
        debug!(
            base = %request.base,
            returned = entries.len(),
            more = cursor.as_ref().is_some_and(|c| !c.is_empty()),
            "search page received"
        );

        Ok(SearchPage {
            items: entries.into_iter().filter_map(convert).collect(),
            cursor,
            partial,
        })
    }

    fn abandon(
        &mut self,
        request: &SearchRequest,
        cursor: &PagingCursor,
    ) -> Result<(), DirectoryError> {
        let control = PagedResults {
            size: 0,
            cookie: cursor.as_bytes().to_vec(),
        };
        self.conn
            .with_controls(control)
            .search(&request.base, scope_of(request.scope), &request.filter, vec!["1.1"])
            .map_err(|e| request.failure(e))?;
        debug!(base = %request.base, "paged search abandoned");
        Ok(())
    }
}

impl Drop for LdapTransport {
    fn drop(&mut self) {
        if let Err(e) = self.conn.unbind() {
            debug!(url = %self.url, error = %e, "unbind failed");
        }
    }
}
