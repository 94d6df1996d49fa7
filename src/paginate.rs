//! Continuation-token pagination over Azure DevOps list endpoints.
//!
//! [`fetch`] returns a [`Paginator`], a lazy sequence of batches: nothing is
//! requested until [`Paginator::next_batch`] is awaited, and each call fetches
//! exactly one page. The caller maps and upserts a batch before pulling the
//! next one.

use serde_json::Value;
use tracing::{debug, info};

use crate::contract::DevOpsSource;
use crate::error::SyncError;
use crate::rate_limit::RateLimiter;

#[derive(Debug)]
enum Cursor {
    First,
    Next(String),
    Done,
}

/// Lazy, finite sequence of pages for one path.
pub struct Paginator<'a, S: ?Sized> {
    source: &'a S,
    limiter: &'a RateLimiter,
    path: String,
    cursor: Cursor,
    pages: usize,
}

/// Start paging through `path`. A fresh call starts again from the first page.
pub fn fetch<'a, S>(source: &'a S, limiter: &'a RateLimiter, path: impl Into<String>) -> Paginator<'a, S>
where
    S: DevOpsSource + ?Sized,
{
    Paginator {
        source,
        limiter,
        path: path.into(),
        cursor: Cursor::First,
        pages: 0,
    }
}

impl<'a, S> Paginator<'a, S>
where
    S: DevOpsSource + ?Sized,
{
    /// Fetch the next page.
    ///
    /// Returns `Ok(None)` once the previous page came back without a
    /// continuation token. A batch may be empty. After an error the sequence
    /// is finished.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<Value>>, SyncError> {
        let token = match std::mem::replace(&mut self.cursor, Cursor::Done) {
            Cursor::Done => return Ok(None),
            Cursor::First => {
                info!(path = %self.path, "Requesting data");
                None
            }
            Cursor::Next(token) => Some(token),
        };

        self.limiter.acquire().await;
        let page = self.source.get_page(&self.path, token).await?;
        self.pages += 1;

        match page.continuation_token {
            Some(next) if !next.is_empty() => self.cursor = Cursor::Next(next),
            _ => info!(path = %self.path, pages = self.pages, "Fetched all pages"),
        }
        debug!(path = %self.path, page = self.pages, records = page.records.len(), "Fetched page");

        Ok(Some(page.records))
    }

    /// Number of pages fetched so far.
    pub fn pages(&self) -> usize {
        self.pages
    }
}
