//! An in-process directory implementing [`DirectoryTransport`].
//!
//! Entries are held in insertion order and searched with real filter
//! evaluation and scope rules. Paging cookies are decimal offsets. Failures,
//! repeated cookies and partial results can be injected for tests.

use tracing::debug;

use super::attributes::RawAttributes;
use super::dn;
use super::filter::Filter;
use super::transport::{
    DirectoryEntry, DirectoryTransport, Paging, PagingCursor, SearchItem, SearchPage,
    SearchRequest, SearchScope,
};
use crate::errors::DirectoryError;

/// A search as the directory received it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub request: SearchRequest,
    pub page_size: Option<u32>,
    pub cursor: Option<PagingCursor>,
}

#[derive(Debug, Default)]
pub struct MemoryDirectory {
    items: Vec<SearchItem>,
    failing_bases: Vec<String>,
    repeat_cookies: bool,
    partial_after: Option<usize>,
    requests: Vec<RecordedRequest>,
    abandoned: Vec<PagingCursor>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_entry(&mut self, dn: &str, attributes: RawAttributes) {
        self.items.push(SearchItem::Entry(DirectoryEntry {
            dn: dn.to_string(),
            attributes,
        }));
    }

    /// A continuation reference returned with every subtree search.
    pub fn add_referral(&mut self, url: &str) {
        self.items.push(SearchItem::Referral(vec![url.to_string()]));
    }

    /// Make every search whose base lies under `base` fail.
    pub fn fail_searches_under(&mut self, base: &str) {
        self.failing_bases.push(base.to_string());
    }

    /// Echo the incoming cookie back instead of advancing it.
    pub fn repeat_cookies(&mut self, repeat: bool) {
        self.repeat_cookies = repeat;
    }

    /// Report partial results once `limit` matching entries have been
    /// returned. Unpaged searches are cut at `limit`; a paged response
    /// reaching it is flagged partial but keeps its entries and cookie.
    pub fn partial_after(&mut self, limit: usize) {
        self.partial_after = Some(limit);
    }

    pub fn requests(&self) -> &[RecordedRequest] {
        &self.requests
    }

    pub fn abandoned(&self) -> &[PagingCursor] {
        &self.abandoned
    }

    fn base_exists(&self, base: &str) -> bool {
        self.entries()
            .any(|e| dn::is_within_scope(base, &e.dn))
    }

    fn entries(&self) -> impl Iterator<Item = &DirectoryEntry> {
        self.items.iter().filter_map(|item| match item {
            SearchItem::Entry(entry) => Some(entry),
            SearchItem::Referral(_) => None,
        })
    }

    fn in_scope(request: &SearchRequest, entry_dn: &str) -> bool {
        if entry_dn.is_empty() {
            // Nameless entries surface from subtree searches only.
            return request.scope == SearchScope::Subtree;
        }
        let Ok(base) = dn::parse_dn(&request.base) else {
            return false;
        };
        let Ok(entry) = dn::parse_dn(entry_dn) else {
            return false;
        };
        let depth = entry.len() as isize - base.len() as isize;
        let allowed = match request.scope {
            SearchScope::Base => depth == 0,
            SearchScope::OneLevel => depth == 1,
            SearchScope::Subtree => depth >= 0,
        };
        allowed && dn::is_within_scope(&request.base, entry_dn)
    }
}

impl DirectoryTransport for MemoryDirectory {
    fn search(
        &mut self,
        request: &SearchRequest,
        paging: Option<Paging<'_>>,
    ) -> Result<SearchPage, DirectoryError> {
        self.requests.push(RecordedRequest {
            request: request.clone(),
            page_size: paging.map(|p| p.size),
            cursor: paging.and_then(|p| p.cursor.cloned()),
        });

        if self
            .failing_bases
            .iter()
            .any(|base| dn::is_within_scope(base, &request.base))
        {
            return Err(request.failure("server unavailable"));
        }
        if !self.base_exists(&request.base) {
            return Err(DirectoryError::NoSuchObject {
                base: request.base.clone(),
            });
        }
        let filter = Filter::parse(&request.filter).map_err(|e| request.failure(e))?;

        let mut matched: Vec<SearchItem> = Vec::new();
        for item in &self.items {
            match item {
                SearchItem::Entry(entry) => {
                    if Self::in_scope(request, &entry.dn) && filter.matches(&entry.attributes) {
                        let mut attributes = entry.attributes.clone();
                        if request.attributes.iter().any(|a| a == "1.1") {
                            attributes = RawAttributes::new();
                        } else {
                            attributes.retain_named(&request.attributes);
                        }
                        matched.push(SearchItem::Entry(DirectoryEntry {
                            dn: entry.dn.clone(),
                            attributes,
                        }));
                    }
                }
                SearchItem::Referral(_) if request.scope == SearchScope::Subtree => {
                    matched.push(item.clone());
                }
                SearchItem::Referral(_) => {}
            }
        }

        let Some(paging) = paging else {
            let partial = self.partial_after.is_some_and(|limit| matched.len() > limit);
            if let Some(limit) = self.partial_after.filter(|_| partial) {
                matched.truncate(limit);
            }
            return Ok(SearchPage {
                items: matched,
                cursor: None,
                partial,
            });
        };

        let offset = match paging.cursor {
            Some(cursor) => std::str::from_utf8(cursor.as_bytes())
                .ok()
                .and_then(|s| s.parse::<usize>().ok())
                .ok_or_else(|| request.failure("invalid paging cookie"))?,
            None => 0,
        };
        let size = paging.size.max(1) as usize;
        let end = (offset + size).min(matched.len());
        let items: Vec<SearchItem> = matched
            .get(offset..end)
            .map(<[SearchItem]>::to_vec)
            .unwrap_or_default();

        let cursor = if self.repeat_cookies && paging.cursor.is_some() {
            paging.cursor.cloned()
        } else if end < matched.len() {
            Some(PagingCursor::new(end.to_string()))
        } else {
            None
        };
        debug!(
            base = %request.base,
            offset,
            returned = items.len(),
            "memory directory page"
        );

        Ok(SearchPage {
            items,
            cursor,
            partial: self.partial_after.is_some_and(|limit| end >= limit),
        })
    }

    fn abandon(
        &mut self,
        _request: &SearchRequest,
        cursor: &PagingCursor,
    ) -> Result<(), DirectoryError> {
        self.abandoned.push(cursor.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MemoryDirectory {
        let mut dir = MemoryDirectory::new();
        dir.add_entry("dc=example,dc=com", [("objectClass", "domain")].into_iter().collect());
        dir.add_entry(
            "ou=People,dc=example,dc=com",
            [("objectClass", "organizationalUnit")].into_iter().collect(),
        );
        dir.add_entry(
            "uid=jdoe,ou=People,dc=example,dc=com",
            [("objectClass", "person"), ("uid", "jdoe"), ("mail", "jdoe@example.com")]
                .into_iter()
                .collect(),
        );
        dir
    }

    #[test]
    fn test_scopes() {
        let mut dir = sample();
        let all = SearchRequest::subtree("dc=example,dc=com", "(objectClass=*)", vec![]);
        assert_eq!(dir.search(&all, None).unwrap().items.len(), 3);

        let one = SearchRequest {
            scope: SearchScope::OneLevel,
            ..all.clone()
        };
        assert_eq!(dir.search(&one, None).unwrap().items.len(), 1);

        let base = SearchRequest::base_object(
            "uid=jdoe,ou=People,dc=example,dc=com",
            "(objectClass=*)",
            vec!["mail".into()],
        );
        let page = dir.search(&base, None).unwrap();
        let SearchItem::Entry(entry) = &page.items[0] else {
            panic!("expected entry");
        };
        assert_eq!(entry.attributes.names().collect::<Vec<_>>(), vec!["mail"]);
    }

    #[test]
    fn test_partial_results_cut_unpaged_search() {
        let mut dir = sample();
        dir.partial_after(2);
        let all = SearchRequest::subtree("dc=example,dc=com", "(objectClass=*)", vec![]);
        let page = dir.search(&all, None).unwrap();
        assert!(page.partial);
        assert_eq!(page.items.len(), 2);
    }

    #[test]
    fn test_missing_base_is_an_error() {
        let mut dir = sample();
        let request = SearchRequest::base_object("jdoe", "(objectClass=*)", vec![]);
        let err = dir.search(&request, None).unwrap_err();
        assert!(matches!(err, DirectoryError::NoSuchObject { ref base } if base == "jdoe"));
    }
}
