//! Latest borrowing status per book, with change notifications
//!
//! The borrow context publishes here; UIs and other observers either read the
//! current status or [`subscribe`](BookRegistry::subscribe) to a broadcast of
//! every change.

use crate::types::{BookId, BookStatus, BookStatusEvent};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Broadcast buffer; slow subscribers past this many events see `Lagged`
const EVENT_BUFFER: usize = 1000;

/// Status of every book currently known to the application
///
/// Cloning is cheap; clones share state and the broadcast channel.
#[derive(Clone, Debug)]
pub struct BookRegistry {
    statuses: Arc<DashMap<BookId, BookStatus>>,
    event_tx: broadcast::Sender<BookStatusEvent>,
}

impl Default for BookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BookRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        let (event_tx, _rx) = broadcast::channel(EVENT_BUFFER);
        Self {
            statuses: Arc::new(DashMap::new()),
            event_tx,
        }
    }

    /// Subscribe to status changes
    ///
    /// # Example
    ///
    /// ```no_run
    /// use book_borrow::registry::BookRegistry;
    ///
    /// # async fn example(registry: BookRegistry) {
    /// let mut events = registry.subscribe();
    /// tokio::spawn(async move {
    ///     while let Ok(event) = events.recv().await {
    ///         tracing::info!(book_id = %event.id, status = ?event.status, "book status");
    ///     }
    /// });
    /// # }
    /// ```
    pub fn subscribe(&self) -> broadcast::Receiver<BookStatusEvent> {
        self.event_tx.subscribe()
    }

    /// Current status of a book
    pub fn status(&self, id: &BookId) -> Option<BookStatus> {
        self.statuses.get(id).map(|s| s.value().clone())
    }

    /// Record a new status and notify subscribers
    pub fn update_status(&self, id: &BookId, status: BookStatus) {
        self.statuses.insert(id.clone(), status.clone());
        // No subscribers is fine; the status is still recorded
        self.event_tx
            .send(BookStatusEvent {
                id: id.clone(),
                status,
            })
            .ok();
    }

    /// Forget a book
    pub fn remove(&self, id: &BookId) -> Option<BookStatus> {
        self.statuses.remove(id).map(|(_, status)| status)
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn updates_are_recorded_and_broadcast() {
        let registry = BookRegistry::new();
        let mut events = registry.subscribe();
        let id = BookId::from_entry_id("urn:1");

        registry.update_status(&id, BookStatus::RequestingLoan);
        registry.update_status(&id, BookStatus::Loaned);

        assert_eq!(registry.status(&id), Some(BookStatus::Loaned));
        assert_eq!(events.recv().await.unwrap().status, BookStatus::RequestingLoan);
        let second = events.recv().await.unwrap();
        assert_eq!(second.id, id);
        assert_eq!(second.status, BookStatus::Loaned);
    }

    #[test]
    fn update_without_subscribers_is_fine() {
        let registry = BookRegistry::new();
        let id = BookId::from_entry_id("urn:2");
        registry.update_status(&id, BookStatus::Downloaded);
        assert_eq!(registry.remove(&id), Some(BookStatus::Downloaded));
        assert_eq!(registry.status(&id), None);
    }
}
