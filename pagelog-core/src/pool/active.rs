//! The single live page of one stream

use super::AppendOnlyPage;
use crate::{Lsn, Timestamp};
use parking_lot::RwLock;
use std::sync::Arc;

/// Builds a fresh empty page
pub type NewPage<P> = Box<dyn Fn() -> P + Send + Sync>;

/// Thread-safe wrapper around exactly one live page.
///
/// Writers take the write lock only for the duration of an append. Readers
/// get an `Arc` snapshot; a writer that finds a snapshot still outstanding
/// copies the page before mutating it, so snapshots never change under a
/// reader.
pub struct ActivePage<P: AppendOnlyPage> {
    page: RwLock<Arc<P>>,
    new_page: NewPage<P>,
}

impl<P: AppendOnlyPage> ActivePage<P> {
    /// Create a new active page
    pub fn new(new_page: NewPage<P>) -> Self {
        let page = Arc::new(new_page());
        Self {
            page: RwLock::new(page),
            new_page,
        }
    }

    /// Append a record. If this append fills the page, the detached page is
    /// handed to `on_seal` before the write lock is released.
    pub fn append(&self, lsn: Lsn, record: P::Record, on_seal: impl FnOnce(Arc<P>)) -> bool {
        let mut guard = self.page.write();

        let page = Arc::make_mut(&mut *guard);
        page.append(record);
        page.update_lsn(lsn);

        if page.is_full() {
            on_seal(self.swap(&mut guard));
            true
        } else {
            false
        }
    }

    /// Immutable view of the current page
    pub fn snapshot(&self) -> Arc<P> {
        self.page.read().clone()
    }

    /// Seal the page if it holds data that started before `boundary`
    pub fn rotate_if_older_than_and_not_empty(
        &self,
        boundary: Timestamp,
        on_seal: impl FnOnce(Arc<P>),
    ) -> bool {
        let mut guard = self.page.write();
        match guard.range() {
            Some(range) if range.start < boundary => {
                on_seal(self.swap(&mut guard));
                true
            }
            _ => false,
        }
    }

    /// Seal the page if it holds any data
    pub fn rotate_if_non_empty(&self, on_seal: impl FnOnce(Arc<P>)) -> bool {
        let mut guard = self.page.write();
        if guard.is_empty() {
            return false;
        }
        on_seal(self.swap(&mut guard));
        true
    }

    fn swap(&self, current: &mut Arc<P>) -> Arc<P> {
        std::mem::replace(current, Arc::new((self.new_page)()))
    }
}
