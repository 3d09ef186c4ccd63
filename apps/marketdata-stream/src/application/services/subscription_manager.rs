//! Subscription Manager
//!
//! Resolves caller-supplied instruments, maintains the desired
//! [`SubscriptionSet`], and forwards changes to the live session when one
//! is open. While disconnected, changes are only recorded; the connection
//! replays the whole set once it is back.

use std::collections::HashSet;
use std::sync::Arc;

use crate::application::ports::{FeedSession, SendError};
use crate::application::services::DirectoryHandle;
use crate::domain::instrument::{BatchError, InstrumentId, InstrumentRef};
use crate::domain::subscription::{
    SharedSubscriptionSet, SubscriptionChanges, SubscriptionRequest,
};

/// Maintains the desired subscription set.
pub struct SubscriptionManager {
    directory: DirectoryHandle,
    subscriptions: SharedSubscriptionSet,
    session: Arc<dyn FeedSession>,
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("instruments", &self.directory.len())
            .field("subscriptions", &self.subscriptions.lock().len())
            .finish_non_exhaustive()
    }
}

impl SubscriptionManager {
    /// Create a manager.
    ///
    /// `subscriptions` must be the same set the connection replays from.
    #[must_use]
    pub fn new(
        directory: DirectoryHandle,
        subscriptions: SharedSubscriptionSet,
        session: Arc<dyn FeedSession>,
    ) -> Self {
        Self {
            directory,
            subscriptions,
            session,
        }
    }

    /// Subscribe to instruments.
    ///
    /// All items are resolved before anything changes. When connected, one
    /// subscribe frame carrying every resolved id is sent.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError`] for the first item that fails to resolve; the
    /// set is left untouched.
    pub fn subscribe<I, T>(&self, items: I) -> Result<SubscriptionChanges, BatchError>
    where
        I: IntoIterator<Item = T>,
        T: Into<InstrumentRef>,
    {
        let ids = self.resolve(items)?;
        if ids.is_empty() {
            return Ok(SubscriptionChanges::default());
        }

        let mut set = self.subscriptions.lock();
        let added = set.insert_all(ids.iter().copied());
        let sent = self.forward(SubscriptionRequest::subscribe(ids));
        let total = set.len();
        drop(set);

        tracing::info!(added = added.len(), total, sent, "Subscribed to instruments");

        Ok(SubscriptionChanges {
            added,
            removed: Vec::new(),
            sent,
        })
    }

    /// Unsubscribe from instruments.
    ///
    /// Ids that are not subscribed are ignored. When connected and at least
    /// one id was removed, an unsubscribe frame carrying the removed ids is
    /// sent.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError`] for the first item that fails to resolve; the
    /// set is left untouched.
    pub fn unsubscribe<I, T>(&self, items: I) -> Result<SubscriptionChanges, BatchError>
    where
        I: IntoIterator<Item = T>,
        T: Into<InstrumentRef>,
    {
        let ids = self.resolve(items)?;

        let mut set = self.subscriptions.lock();
        let removed = set.remove_all(ids);
        let sent =
            !removed.is_empty() && self.forward(SubscriptionRequest::unsubscribe(removed.clone()));
        let total = set.len();
        drop(set);

        if removed.is_empty() {
            tracing::debug!("Unsubscribe left the subscription set unchanged");
        } else {
            tracing::info!(removed = removed.len(), total, sent, "Unsubscribed from instruments");
        }

        Ok(SubscriptionChanges {
            added: Vec::new(),
            removed,
            sent,
        })
    }

    /// Currently subscribed ids in ascending order.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<InstrumentId> {
        self.subscriptions.lock().snapshot()
    }

    /// Number of subscribed instruments.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    /// The directory handle used for resolution.
    #[must_use]
    pub const fn directory(&self) -> &DirectoryHandle {
        &self.directory
    }

    /// Resolve against the current snapshot, dropping repeated ids.
    fn resolve<I, T>(&self, items: I) -> Result<Vec<InstrumentId>, BatchError>
    where
        I: IntoIterator<Item = T>,
        T: Into<InstrumentRef>,
    {
        let items: Vec<InstrumentRef> = items.into_iter().map(Into::into).collect();
        let resolved = self.directory.load().resolve_all(&items)?;

        let mut seen = HashSet::with_capacity(resolved.len());
        Ok(resolved.into_iter().filter(|id| seen.insert(*id)).collect())
    }

    /// Hand a request to the session if one is open. Called with the set lock held.
    fn forward(&self, request: SubscriptionRequest) -> bool {
        if !self.session.is_connected() {
            return false;
        }
        match self.session.send_request(request) {
            Ok(()) => true,
            Err(SendError::NotConnected) => {
                tracing::debug!("Session closed before control frame was queued");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use mockall::predicate::eq;

    use super::*;
    use crate::application::ports::MockFeedSession;
    use crate::domain::instrument::{InstrumentDirectory, InstrumentError, InstrumentRecord};
    use crate::domain::subscription::SubscriptionSet;

    fn directory() -> DirectoryHandle {
        DirectoryHandle::new(InstrumentDirectory::from_records([
            InstrumentRecord::new("NSECM", "RELIANCE", 100),
            InstrumentRecord::new("NSECM", "TCS", 200),
            InstrumentRecord::new("NSECM", "INFY", 300),
        ]))
    }

    fn manager(session: MockFeedSession) -> SubscriptionManager {
        SubscriptionManager::new(directory(), SubscriptionSet::shared(), Arc::new(session))
    }

    fn disconnected() -> MockFeedSession {
        let mut session = MockFeedSession::new();
        session.expect_is_connected().return_const(false);
        session.expect_send_request().never();
        session
    }

    #[test]
    fn subscribe_while_disconnected_records_only() {
        let manager = manager(disconnected());

        let changes = manager.subscribe(["NSECM|RELIANCE", "200"]).unwrap();

        assert_eq!(changes.added, vec![100, 200]);
        assert!(!changes.sent);
        assert_eq!(manager.subscriptions(), vec![100, 200]);
    }

    #[test]
    fn subscribe_while_connected_sends_all_resolved_ids() {
        let mut session = MockFeedSession::new();
        session.expect_is_connected().return_const(true);
        session
            .expect_send_request()
            .with(eq(SubscriptionRequest::subscribe(vec![100])))
            .times(1)
            .returning(|_| Ok(()));
        session
            .expect_send_request()
            .with(eq(SubscriptionRequest::subscribe(vec![100, 200])))
            .times(1)
            .returning(|_| Ok(()));
        let manager = manager(session);

        manager.subscribe([100_i64]).unwrap();
        let changes = manager.subscribe([100_i64, 200, 100]).unwrap();

        assert_eq!(changes.added, vec![200]);
        assert!(changes.sent);
    }

    #[test]
    fn unsubscribe_sends_only_removed_ids() {
        let mut session = MockFeedSession::new();
        session.expect_is_connected().return_const(true);
        session
            .expect_send_request()
            .with(eq(SubscriptionRequest::subscribe(vec![100, 200])))
            .times(1)
            .returning(|_| Ok(()));
        session
            .expect_send_request()
            .with(eq(SubscriptionRequest::unsubscribe(vec![200])))
            .times(1)
            .returning(|_| Ok(()));
        let manager = manager(session);

        manager.subscribe([100_i64, 200]).unwrap();
        let changes = manager.unsubscribe(["NSECM|TCS", "NSECM|INFY"]).unwrap();

        assert_eq!(changes.removed, vec![200]);
        assert!(changes.sent);
        assert_eq!(manager.subscriptions(), vec![100]);
    }

    #[test]
    fn unsubscribe_of_absent_id_is_silent() {
        let mut session = MockFeedSession::new();
        session.expect_is_connected().return_const(true);
        session.expect_send_request().never();
        let manager = manager(session);

        let changes = manager.unsubscribe([300_i64]).unwrap();

        assert!(changes.is_empty());
        assert!(!changes.sent);
    }

    #[test]
    fn resolution_failure_leaves_set_untouched() {
        let manager = manager(disconnected());
        manager.subscribe([100_i64]).unwrap();

        let err = manager.subscribe(["NSECM|TCS", "NSECM|UNKNOWN"]).unwrap_err();

        assert_eq!(err.index, 1);
        assert_eq!(
            err.source,
            InstrumentError::SymbolNotFound("NSECM|UNKNOWN".to_string())
        );
        assert_eq!(manager.subscriptions(), vec![100]);
    }

    #[test]
    fn dropped_session_is_not_an_error() {
        let mut session = MockFeedSession::new();
        session.expect_is_connected().return_const(true);
        session
            .expect_send_request()
            .returning(|_| Err(SendError::NotConnected));
        let manager = manager(session);

        let changes = manager.subscribe([300_i64]).unwrap();

        assert_eq!(changes.added, vec![300]);
        assert!(!changes.sent);
    }

    #[test]
    fn empty_subscribe_is_a_no_op() {
        let manager = manager(disconnected());
        let changes = manager.subscribe(Vec::<InstrumentRef>::new()).unwrap();
        assert!(changes.is_empty());
        assert_eq!(manager.subscription_count(), 0);
    }

    #[test]
    fn resolution_follows_directory_replacement() {
        let manager = manager(disconnected());
        assert!(manager.subscribe(["NSECM|HDFC"]).is_err());

        manager
            .directory()
            .replace(InstrumentDirectory::from_records([InstrumentRecord::new(
                "NSECM", "HDFC", 400,
            )]));

        assert_eq!(manager.subscribe(["NSECM|HDFC"]).unwrap().added, vec![400]);
    }
}
