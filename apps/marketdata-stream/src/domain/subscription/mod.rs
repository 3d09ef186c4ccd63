//! Subscription Tracking Types
//!
//! Domain types for the desired set of instrument subscriptions and the
//! control messages that express changes to it.
//!
//! # Design
//!
//! The subscription set is the single source of truth for what the client
//! wants to receive. It is updated whether or not a connection is live, and
//! its full contents are replayed to the feed on every (re)connect. Only
//! additions and removals that actually change the set are reported back,
//! so callers can decide whether a control message is worth sending.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::domain::instrument::InstrumentId;

// =============================================================================
// Subscription Set
// =============================================================================

/// The set of instrument ids the client wants to receive.
///
/// Ordered so replay frames are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionSet {
    ids: BTreeSet<InstrumentId>,
}

/// Subscription set shared between the manager and the connection.
///
/// The connection holds this lock while queueing the replay frame so a
/// concurrent subscribe cannot slip between replay and session install.
pub type SharedSubscriptionSet = Arc<Mutex<SubscriptionSet>>;

impl SubscriptionSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty set wrapped for sharing.
    #[must_use]
    pub fn shared() -> SharedSubscriptionSet {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Add ids, returning those that were not already present.
    pub fn insert_all(&mut self, ids: impl IntoIterator<Item = InstrumentId>) -> Vec<InstrumentId> {
        ids.into_iter().filter(|id| self.ids.insert(*id)).collect()
    }

    /// Remove ids, returning those that were present.
    pub fn remove_all(&mut self, ids: impl IntoIterator<Item = InstrumentId>) -> Vec<InstrumentId> {
        ids.into_iter().filter(|id| self.ids.remove(id)).collect()
    }

    /// Whether an id is in the set.
    #[must_use]
    pub fn contains(&self, id: InstrumentId) -> bool {
        self.ids.contains(&id)
    }

    /// Number of subscribed instruments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Ids in ascending order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<InstrumentId> {
        self.ids.iter().copied().collect()
    }

    /// Control request that re-establishes this set on a fresh session.
    ///
    /// Returns `None` when there is nothing to replay.
    #[must_use]
    pub fn replay_request(&self) -> Option<SubscriptionRequest> {
        (!self.is_empty()).then(|| SubscriptionRequest::subscribe(self.snapshot()))
    }
}

// =============================================================================
// Subscription Changes
// =============================================================================

/// Net effect of one subscribe or unsubscribe call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionChanges {
    /// Ids that entered the set.
    pub added: Vec<InstrumentId>,
    /// Ids that left the set.
    pub removed: Vec<InstrumentId>,
    /// Whether a control message was handed to a live session.
    pub sent: bool,
}

impl SubscriptionChanges {
    /// Check if the set changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

// =============================================================================
// Control Messages
// =============================================================================

/// Direction of a subscription control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionAction {
    /// Start receiving ticks.
    Subscribe,
    /// Stop receiving ticks.
    Unsubscribe,
}

/// Control message sent to the feed as a JSON text frame.
///
/// Serializes as `{"action":"subscribe","instrumentIds":[...]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRequest {
    /// Subscribe or unsubscribe.
    pub action: SubscriptionAction,
    /// Ids the action applies to.
    pub instrument_ids: Vec<InstrumentId>,
}

impl SubscriptionRequest {
    /// Build a subscribe request.
    #[must_use]
    pub const fn subscribe(instrument_ids: Vec<InstrumentId>) -> Self {
        Self {
            action: SubscriptionAction::Subscribe,
            instrument_ids,
        }
    }

    /// Build an unsubscribe request.
    #[must_use]
    pub const fn unsubscribe(instrument_ids: Vec<InstrumentId>) -> Self {
        Self {
            action: SubscriptionAction::Unsubscribe,
            instrument_ids,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
