//! The contract the resolution engine needs from a directory server.
//!
//! Connection setup, bind and TLS belong to the implementation
//! ([`super::ldap::LdapTransport`]); the engine only issues searches and
//! abandons paged searches it stops reading.

use std::fmt;

use super::attributes::RawAttributes;
use crate::errors::DirectoryError;

/// How deep below the base a search reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    /// The base entry only.
    Base,
    /// Direct children of the base.
    OneLevel,
    /// The base and everything below it.
    Subtree,
}

/// One search, independent of paging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub base: String,
    pub scope: SearchScope,
    pub filter: String,
    /// Attributes to return. Empty requests all user attributes; `1.1`
    /// requests none.
    pub attributes: Vec<String>,
}

impl SearchRequest {
    pub fn subtree(base: &str, filter: &str, attributes: Vec<String>) -> Self {
        Self {
            base: base.to_string(),
            scope: SearchScope::Subtree,
            filter: filter.to_string(),
            attributes,
        }
    }

    pub fn base_object(base: &str, filter: &str, attributes: Vec<String>) -> Self {
        Self {
            base: base.to_string(),
            scope: SearchScope::Base,
            filter: filter.to_string(),
            attributes,
        }
    }

    /// Build the error reported when this request fails.
    pub fn failure(&self, detail: impl fmt::Display) -> DirectoryError {
        DirectoryError::Search {
            base: self.base.clone(),
            filter: self.filter.clone(),
            detail: detail.to_string(),
        }
    }
}

/// Server-issued continuation token for a paged search. Never interpreted.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PagingCursor(Vec<u8>);

impl PagingCursor {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// An empty cookie signals the last page.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for PagingCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PagingCursor({} bytes)", self.0.len())
    }
}

/// Paging parameters for one page request.
#[derive(Debug, Clone, Copy)]
pub struct Paging<'a> {
    pub size: u32,
    /// `None` on the first page.
    pub cursor: Option<&'a PagingCursor>,
}

/// A directory entry returned by a search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub dn: String,
    pub attributes: RawAttributes,
}

/// One item of a search response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchItem {
    Entry(DirectoryEntry),
    /// A continuation reference to another server.
    Referral(Vec<String>),
}

/// One page of results.
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub items: Vec<SearchItem>,
    /// Cookie for the next page; `None` or empty when the search is done.
    pub cursor: Option<PagingCursor>,
    /// The server returned fewer results than exist (e.g. a referral or
    /// partial-results code).
    pub partial: bool,
}

/// Directory operations the resolution engine depends on.
pub trait DirectoryTransport {
    /// Run one search request, or one page of it when `paging` is given.
    fn search(
        &mut self,
        request: &SearchRequest,
        paging: Option<Paging<'_>>,
    ) -> Result<SearchPage, DirectoryError>;

    /// Release the server-side state behind `cursor`.
    fn abandon(
        &mut self,
        request: &SearchRequest,
        cursor: &PagingCursor,
    ) -> Result<(), DirectoryError>;
}

impl<T: DirectoryTransport + ?Sized> DirectoryTransport for Box<T> {
    fn search(
        &mut self,
        request: &SearchRequest,
        paging: Option<Paging<'_>>,
    ) -> Result<SearchPage, DirectoryError> {
        (**self).search(request, paging)
    }

    fn abandon(
        &mut self,
        request: &SearchRequest,
        cursor: &PagingCursor,
    ) -> Result<(), DirectoryError> {
        (**self).abandon(request, cursor)
    }
}
