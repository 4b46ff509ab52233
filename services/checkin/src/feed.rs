//! Ledger change feed
//!
//! Every write to the check-in ledger is published here. Readers take a
//! [`LedgerSubscription`] scoped to one session; the subscription is a
//! token that is released when it is dropped or explicitly unsubscribed.

use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::Checkin;

/// A single ledger mutation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LedgerChange {
    Inserted { record: Checkin },
    Updated { record: Checkin },
    Deleted { id: Uuid, session_id: Uuid },
}

impl LedgerChange {
    pub fn session_id(&self) -> Uuid {
        match self {
            LedgerChange::Inserted { record } | LedgerChange::Updated { record } => {
                record.session_id
            }
            LedgerChange::Deleted { session_id, .. } => *session_id,
        }
    }
}

/// What a subscriber receives
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Change(LedgerChange),
    /// The subscriber fell behind and `n` changes were dropped; views
    /// built from the feed must be reloaded
    Lagged(u64),
}

/// Broadcast hub for ledger changes
#[derive(Clone)]
pub struct LedgerFeed {
    tx: broadcast::Sender<LedgerChange>,
}

impl LedgerFeed {
    /// Create a feed buffering up to `capacity` changes per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        info!("Ledger feed initialized with capacity {}", capacity);
        Self { tx }
    }

    /// Publish a change, ignoring the case where nobody is listening
    pub fn publish(&self, change: LedgerChange) {
        match self.tx.send(change) {
            Ok(count) => debug!("Published ledger change to {} subscribers", count),
            Err(_) => debug!("Ledger change published with no subscribers"),
        }
    }

    /// Subscribe to the changes of one session
    pub fn subscribe(&self, session_id: Uuid) -> LedgerSubscription {
        let subscription = LedgerSubscription {
            token: Uuid::new_v4(),
            session_id,
            rx: self.tx.subscribe(),
        };
        info!(
            "Ledger subscription {} acquired for session {}",
            subscription.token, session_id
        );
        subscription
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// A live subscription to one session's ledger changes
pub struct LedgerSubscription {
    token: Uuid,
    session_id: Uuid,
    rx: broadcast::Receiver<LedgerChange>,
}

impl LedgerSubscription {
    pub fn token(&self) -> Uuid {
        self.token
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Wait for the next change of this session
    ///
    /// Returns `None` once the feed is closed.
    pub async fn recv(&mut self) -> Option<FeedEvent> {
        loop {
            match self.rx.recv().await {
                Ok(change) if change.session_id() == self.session_id => {
                    return Some(FeedEvent::Change(change));
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(n)) => {
                    warn!("Ledger subscription {} lagged by {} changes", self.token, n);
                    return Some(FeedEvent::Lagged(n));
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Take the next already-buffered change of this session, if any
    pub fn try_recv(&mut self) -> Option<FeedEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(change) if change.session_id() == self.session_id => {
                    return Some(FeedEvent::Change(change));
                }
                Ok(_) => continue,
                Err(TryRecvError::Lagged(n)) => {
                    warn!("Ledger subscription {} lagged by {} changes", self.token, n);
                    return Some(FeedEvent::Lagged(n));
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Turn the subscription into a stream; dropping the stream releases it
    pub fn into_stream(self) -> impl Stream<Item = FeedEvent> + Send + 'static {
        stream::unfold(self, |mut subscription| async move {
            subscription
                .recv()
                .await
                .map(|event| (event, subscription))
        })
    }

    /// Release the subscription
    pub fn unsubscribe(self) {}
}

impl Drop for LedgerSubscription {
    fn drop(&mut self) {
        info!(
            "Ledger subscription {} released for session {}",
            self.token, self.session_id
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn checkin(session_id: Uuid) -> Checkin {
        Checkin {
            id: Uuid::new_v4(),
            session_id,
            child_id: Some(Uuid::new_v4()),
            location_id: Uuid::new_v4(),
            household_id: Some(Uuid::new_v4()),
            security_code: "0420".to_string(),
            is_guest: false,
            guest_name: None,
            guest_birth_year: None,
            guest_parent_name: None,
            guest_parent_phone: None,
            guest_allergies: None,
            guest_notes: None,
            checked_in_at: Utc::now(),
            checked_in_by: None,
            checked_out_at: None,
            checked_out_by: None,
        }
    }

    #[tokio::test]
    async fn subscription_only_sees_its_session() {
        let feed = LedgerFeed::new(16);
        let session_a = Uuid::new_v4();
        let session_b = Uuid::new_v4();
        let mut sub = feed.subscribe(session_a);

        feed.publish(LedgerChange::Inserted { record: checkin(session_b) });
        let mine = checkin(session_a);
        feed.publish(LedgerChange::Inserted { record: mine.clone() });

        assert_eq!(
            sub.recv().await,
            Some(FeedEvent::Change(LedgerChange::Inserted { record: mine }))
        );
        assert_eq!(sub.try_recv(), None);
    }

    #[test]
    fn dropping_subscription_releases_receiver() {
        let feed = LedgerFeed::new(4);
        let sub = feed.subscribe(Uuid::new_v4());
        assert_eq!(feed.subscriber_count(), 1);

        sub.unsubscribe();
        assert_eq!(feed.subscriber_count(), 0);

        {
            let _scoped = feed.subscribe(Uuid::new_v4());
            assert_eq!(feed.subscriber_count(), 1);
        }
        assert_eq!(feed.subscriber_count(), 0);
    }

    #[test]
    fn slow_subscriber_is_told_it_lagged() {
        let feed = LedgerFeed::new(2);
        let session = Uuid::new_v4();
        let mut sub = feed.subscribe(session);

        for _ in 0..5 {
            feed.publish(LedgerChange::Inserted { record: checkin(session) });
        }

        assert_eq!(sub.try_recv(), Some(FeedEvent::Lagged(3)));
        assert!(matches!(sub.try_recv(), Some(FeedEvent::Change(_))));
    }

    #[test]
    fn change_payload_uses_op_tag() {
        let id = Uuid::new_v4();
        let session_id = Uuid::new_v4();
        let json = serde_json::to_value(LedgerChange::Deleted { id, session_id }).unwrap();
        assert_eq!(json["op"], "deleted");
        assert_eq!(json["id"], id.to_string());
    }
}
