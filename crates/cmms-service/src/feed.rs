//! # Paged Feeds
//!
//! Lazy, finite, restartable sequences over keyset-paged store queries:
//! the due-PM list, the audit export and the stock-ledger export.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  feed.next() ──► buffer empty? ──yes──► source.fetch(after = position)  │
//! │        │                                     │                          │
//! │        │                          short page ──► exhausted after drain  │
//! │        ▼                                                                │
//! │  pop item, position = cursor_of(item)                                   │
//! │                                                                         │
//! │  feed.rewind()           ──► back to the starting cursor                │
//! │  Feed::starting_after(c) ──► resume a previous export from `c`          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each page is read in its own short transaction, so a long export never
//! holds a transaction open. Rows committed behind the cursor after it has
//! passed are not revisited; rows committed ahead of it are picked up.

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::trace;

use cmms_core::schedule::{due_by, status_at};
use cmms_core::store::{DueCursor, LogCursor, Store, StoreTx};
use cmms_core::{AuditEntry, CoreResult, PmSchedule, StockTransaction};

/// A keyset-paged query.
#[async_trait]
pub trait PageSource: Send + Sync {
    type Item: Send;
    type Cursor: Clone + Send + Sync;

    /// Up to `limit` items strictly after `after`, in cursor order.
    async fn fetch(&self, after: Option<&Self::Cursor>, limit: usize) -> CoreResult<Vec<Self::Item>>;

    fn cursor_of(&self, item: &Self::Item) -> Self::Cursor;
}

pub struct Feed<P: PageSource> {
    source: P,
    page_size: usize,
    start: Option<P::Cursor>,
    position: Option<P::Cursor>,
    buffer: VecDeque<P::Item>,
    exhausted: bool,
}

impl<P: PageSource> Feed<P> {
    pub fn new(source: P, page_size: usize) -> Self {
        Feed {
            source,
            page_size: page_size.max(1),
            start: None,
            position: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Starts (and rewinds) after `cursor` instead of at the beginning.
    pub fn starting_after(mut self, cursor: P::Cursor) -> Self {
        self.start = Some(cursor.clone());
        self.position = Some(cursor);
        self.buffer.clear();
        self.exhausted = false;
        self
    }

    /// Cursor of the last item handed out.
    pub fn position(&self) -> Option<&P::Cursor> {
        self.position.as_ref()
    }

    pub fn rewind(&mut self) {
        self.position = self.start.clone();
        self.buffer.clear();
        self.exhausted = false;
    }

    pub async fn next(&mut self) -> CoreResult<Option<P::Item>> {
        if self.buffer.is_empty() && !self.exhausted {
            let page = self
                .source
                .fetch(self.position.as_ref(), self.page_size)
                .await?;
            trace!(rows = page.len(), "Fetched feed page");
            if page.len() < self.page_size {
                self.exhausted = true;
            }
            self.buffer.extend(page);
        }

        match self.buffer.pop_front() {
            Some(item) => {
                self.position = Some(self.source.cursor_of(&item));
                Ok(Some(item))
            }
            None => Ok(None),
        }
    }

    /// Drains the rest of the feed.
    pub async fn collect_all(&mut self) -> CoreResult<Vec<P::Item>> {
        let mut items = Vec::new();
        while let Some(item) = self.next().await? {
            items.push(item);
        }
        Ok(items)
    }
}

// =============================================================================
// Sources
// =============================================================================

/// Active schedules due by `as_of + window`, by (next_due, equipment, id).
pub struct DueSource<S: Store> {
    store: S,
    as_of: DateTime<Utc>,
    due_by: DateTime<Utc>,
    due_soon_days: i64,
}

impl<S: Store> DueSource<S> {
    pub fn new(
        store: S,
        as_of: DateTime<Utc>,
        window: Duration,
        due_soon_days: i64,
    ) -> CoreResult<Self> {
        Ok(DueSource {
            store,
            as_of,
            due_by: due_by(as_of, window)?,
            due_soon_days,
        })
    }
}

#[async_trait]
impl<S: Store> PageSource for DueSource<S> {
    type Item = PmSchedule;
    type Cursor = DueCursor;

    async fn fetch(&self, after: Option<&DueCursor>, limit: usize) -> CoreResult<Vec<PmSchedule>> {
        let mut tx = self.store.begin_read().await?;
        let page = tx.due_schedules_page(self.due_by, after, limit).await;
        tx.rollback().await?;
        Ok(page?
            .into_iter()
            .map(|mut s| {
                s.status = status_at(s.next_due, self.as_of, self.due_soon_days);
                s
            })
            .collect())
    }

    fn cursor_of(&self, item: &PmSchedule) -> DueCursor {
        DueCursor::of(item)
    }
}

/// The full audit trail by (recorded_at, id).
pub struct AuditSource<S: Store> {
    store: S,
}

impl<S: Store> AuditSource<S> {
    pub fn new(store: S) -> Self {
        AuditSource { store }
    }
}

#[async_trait]
impl<S: Store> PageSource for AuditSource<S> {
    type Item = AuditEntry;
    type Cursor = LogCursor;

    async fn fetch(&self, after: Option<&LogCursor>, limit: usize) -> CoreResult<Vec<AuditEntry>> {
        let mut tx = self.store.begin_read().await?;
        let page = tx.audit_page(after, limit).await;
        tx.rollback().await?;
        page
    }

    fn cursor_of(&self, item: &AuditEntry) -> LogCursor {
        LogCursor::of_audit(item)
    }
}

/// Stock transactions by (recorded_at, id), for one part or all.
pub struct StockSource<S: Store> {
    store: S,
    part_id: Option<String>,
}

impl<S: Store> StockSource<S> {
    pub fn new(store: S, part_id: Option<String>) -> Self {
        StockSource { store, part_id }
    }
}

#[async_trait]
impl<S: Store> PageSource for StockSource<S> {
    type Item = StockTransaction;
    type Cursor = LogCursor;

    async fn fetch(
        &self,
        after: Option<&LogCursor>,
        limit: usize,
    ) -> CoreResult<Vec<StockTransaction>> {
        let mut tx = self.store.begin_read().await?;
        let page = tx
            .stock_transactions_page(self.part_id.as_deref(), after, limit)
            .await;
        tx.rollback().await?;
        page
    }

    fn cursor_of(&self, item: &StockTransaction) -> LogCursor {
        LogCursor::of_stock(item)
    }
}

pub type DueFeed<S> = Feed<DueSource<S>>;
pub type AuditFeed<S> = Feed<AuditSource<S>>;
pub type StockFeed<S> = Feed<StockSource<S>>;
