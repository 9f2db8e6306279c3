//! Pagination types for listing orders.

use ord_types::Order;
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;
use crate::store::OrderStore;

/// Request for one page of [`OrderStore::find_all`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindAllPage {
    /// Cursor returned by the previous page, or `0` to start.
    pub offset: u64,
    /// Maximum number of index members to examine. `0` lets the backend
    /// pick its default count.
    pub size: usize,
}

impl FindAllPage {
    /// First page of a listing.
    pub fn first(size: usize) -> Self {
        Self { offset: 0, size }
    }

    /// The page that continues from `cursor`.
    pub fn after(cursor: u64, size: usize) -> Self {
        Self {
            offset: cursor,
            size,
        }
    }
}

/// One page of orders plus the cursor to continue from.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindResult {
    pub orders: Vec<Order>,
    /// Continuation cursor. `0` means the listing is exhausted.
    pub cursor: u64,
}

impl FindResult {
    /// `true` when no further page exists.
    ///
    /// An empty page with a non-zero cursor is not exhausted.
    pub fn is_exhausted(&self) -> bool {
        self.cursor == 0
    }
}

/// Iterator over every page of a listing, following cursors until the
/// backend reports exhaustion.
///
/// Yields pages as they come, including empty intermediate ones. Stops after
/// the first error.
pub struct Pages<'a> {
    store: &'a OrderStore,
    size: usize,
    next: Option<u64>,
}

impl<'a> Pages<'a> {
    pub(crate) fn new(store: &'a OrderStore, size: usize) -> Self {
        Self {
            store,
            size,
            next: Some(0),
        }
    }
}

impl Iterator for Pages<'_> {
    type Item = StoreResult<Vec<Order>>;

    fn next(&mut self) -> Option<Self::Item> {
        let offset = self.next.take()?;
        match self.store.find_all(FindAllPage::after(offset, self.size)) {
            Ok(page) => {
                if !page.is_exhausted() {
                    self.next = Some(page.cursor);
                }
                Some(Ok(page.orders))
            }
            Err(e) => Some(Err(e)),
        }
    }
}
