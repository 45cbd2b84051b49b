//! Lazy iteration over a paged directory search.
//!
//! [`PagedSearch`] requests one page at a time and hands out entries as they
//! are consumed. Dropping it before the last page abandons the server-side
//! cursor.

use std::collections::HashSet;
use std::vec;

use tracing::{debug, trace, warn};

use super::attributes::RawAttributes;
use super::transport::{DirectoryTransport, Paging, PagingCursor, SearchItem, SearchRequest};
use crate::errors::DirectoryError;

enum State {
    /// No request issued yet.
    Idle,
    /// Draining a page; `next` is the cursor for the following page.
    HasPage {
        items: vec::IntoIter<SearchItem>,
        next: Option<PagingCursor>,
    },
    Exhausted,
}

/// Single-pass iterator of `(dn, attributes)` over every page of a search.
///
/// A page size of zero issues one unpaged search. A failed request yields
/// the error once and ends the iteration.
pub struct PagedSearch<'t, T: DirectoryTransport + ?Sized> {
    transport: &'t mut T,
    request: SearchRequest,
    page_size: u32,
    state: State,
    seen_cursors: HashSet<PagingCursor>,
    pages: usize,
}

impl<'t, T: DirectoryTransport + ?Sized> PagedSearch<'t, T> {
    pub fn new(transport: &'t mut T, request: SearchRequest, page_size: u32) -> Self {
        Self {
            transport,
            request,
            page_size,
            state: State::Idle,
            seen_cursors: HashSet::new(),
            pages: 0,
        }
    }

    pub fn request(&self) -> &SearchRequest {
        &self.request
    }

    /// Number of page requests issued so far.
    pub fn pages_requested(&self) -> usize {
        self.pages
    }

    fn request_page(&mut self, cursor: Option<PagingCursor>) -> Result<(), DirectoryError> {
        let paging = (self.page_size > 0).then(|| Paging {
            size: self.page_size,
            cursor: cursor.as_ref(),
        });
        self.pages += 1;
        trace!(
            base = %self.request.base,
            filter = %self.request.filter,
            page = self.pages,
            "requesting page"
        );

        let page = match self.transport.search(&self.request, paging) {
            Ok(page) => page,
            Err(e) => {
                self.state = State::Exhausted;
                return Err(e);
            }
        };

        let next = match page.cursor {
            Some(next) if self.page_size > 0 && !next.is_empty() => {
                if page.partial {
                    warn!(
                        base = %self.request.base,
                        filter = %self.request.filter,
                        "server returned partial results, stopping search"
                    );
                    self.abandon_quietly(&next);
                    None
                } else if !self.seen_cursors.insert(next.clone()) {
                    warn!(
                        base = %self.request.base,
                        filter = %self.request.filter,
                        page = self.pages,
                        "server repeated a paging cookie, stopping search"
                    );
                    self.abandon_quietly(&next);
                    None
                } else {
                    Some(next)
                }
            }
            _ => {
                if page.partial {
                    debug!(base = %self.request.base, "server returned partial results");
                }
                None
            }
        };

        self.state = State::HasPage {
            items: page.items.into_iter(),
            next,
        };
        Ok(())
    }

    fn abandon_quietly(&mut self, cursor: &PagingCursor) {
        if let Err(e) = self.transport.abandon(&self.request, cursor) {
            warn!(base = %self.request.base, error = %e, "failed to abandon paged search");
        }
    }
}

impl<T: DirectoryTransport + ?Sized> Iterator for PagedSearch<'_, T> {
    type Item = Result<(String, RawAttributes), DirectoryError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match &mut self.state {
                State::Idle => {
                    if let Err(e) = self.request_page(None) {
                        return Some(Err(e));
                    }
                }
                State::HasPage { items, next } => match items.next() {
                    Some(SearchItem::Entry(entry)) => {
                        if entry.dn.is_empty() {
                            trace!("skipping entry without a DN");
                            continue;
                        }
                        return Some(Ok((entry.dn, entry.attributes)));
                    }
                    Some(SearchItem::Referral(urls)) => {
                        debug!(?urls, "ignoring search referral");
                    }
                    None => match next.take() {
                        Some(cursor) => {
                            if let Err(e) = self.request_page(Some(cursor)) {
                                return Some(Err(e));
                            }
                        }
                        None => self.state = State::Exhausted,
                    },
                },
                State::Exhausted => return None,
            }
        }
    }
}

impl<T: DirectoryTransport + ?Sized> Drop for PagedSearch<'_, T> {
    fn drop(&mut self) {
        if let State::HasPage {
            next: Some(cursor), ..
        } = &self.state
        {
            debug!(base = %self.request.base, "abandoning unfinished paged search");
            if let Err(e) = self.transport.abandon(&self.request, cursor) {
                warn!(base = %self.request.base, error = %e, "failed to abandon paged search");
            }
        }
    }
}
