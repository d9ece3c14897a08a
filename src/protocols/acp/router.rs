//! Notification router: per-topic subscriber channels.
//!
//! Each subscription owns an unbounded receiver. Unsubscribing (or `clear`)
//! drops the sender, so the subscriber's `recv` returns `None` and it can
//! tell it was detached.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, Mutex};

use super::message::Notification;
use super::methods::{METHOD_SESSION_COMPLETE, METHOD_SESSION_UPDATE};
use super::update_mapping::{parse_session_complete_params, parse_session_update_params};
use crate::api::types::{SessionCompleteEvent, SessionUpdateEvent};

pub type SubscriptionId = u64;

/// Receiving end of a topic subscription.
pub struct Subscription<T> {
    id: SubscriptionId,
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> Subscription<T> {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Next event, or `None` once the subscription was revoked.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

struct Topic<T> {
    subscribers: Mutex<HashMap<SubscriptionId, mpsc::UnboundedSender<T>>>,
}

impl<T: Clone> Topic<T> {
    fn new() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    async fn subscribe(&self, id: SubscriptionId) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().await.insert(id, tx);
        Subscription { id, rx }
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.lock().await.remove(&id).is_some()
    }

    /// Deliver to every live subscriber, pruning ones whose receiver was dropped.
    async fn publish(&self, event: T) -> usize {
        let mut subscribers = self.subscribers.lock().await;
        subscribers.retain(|_, tx| tx.send(event.clone()).is_ok());
        subscribers.len()
    }

    async fn clear(&self) -> usize {
        let mut subscribers = self.subscribers.lock().await;
        let count = subscribers.len();
        subscribers.clear();
        count
    }

    async fn len(&self) -> usize {
        self.subscribers.lock().await.len()
    }
}

pub struct NotificationRouter {
    next_id: AtomicU64,
    updates: Topic<SessionUpdateEvent>,
    completions: Topic<SessionCompleteEvent>,
}

impl Default for NotificationRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationRouter {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            updates: Topic::new(),
            completions: Topic::new(),
        }
    }

    pub async fn subscribe_session_updates(&self) -> Subscription<SessionUpdateEvent> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.updates.subscribe(id).await
    }

    pub async fn subscribe_session_complete(&self) -> Subscription<SessionCompleteEvent> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.completions.subscribe(id).await
    }

    /// Revoke one subscription on whichever topic holds it.
    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.updates.unsubscribe(id).await || self.completions.unsubscribe(id).await
    }

    /// Re-publish a notification to its topic. Unknown methods are ignored.
    pub async fn handle_notification(&self, notification: Notification) {
        let params = notification.params.unwrap_or(serde_json::Value::Null);

        match notification.method.as_str() {
            METHOD_SESSION_UPDATE => {
                let event = parse_session_update_params(params);
                let delivered = self.updates.publish(event).await;
                log::trace!("Published session/update to {delivered} subscriber(s)");
            }
            METHOD_SESSION_COMPLETE => {
                let event = parse_session_complete_params(params);
                let delivered = self.completions.publish(event).await;
                log::debug!("Published session/complete to {delivered} subscriber(s)");
            }
            other => {
                log::debug!("Ignoring unknown notification method: {other}");
            }
        }
    }

    /// Detach every subscriber on every topic.
    pub async fn clear(&self) -> usize {
        self.updates.clear().await + self.completions.clear().await
    }

    pub async fn subscriber_count(&self) -> usize {
        self.updates.len().await + self.completions.len().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::types::SessionUpdateKind;
    use serde_json::json;

    fn notification(method: &str, params: serde_json::Value) -> Notification {
        Notification {
            method: method.to_string(),
            params: Some(params),
        }
    }

    #[tokio::test]
    async fn test_update_reaches_all_subscribers() {
        let router = NotificationRouter::new();
        let mut first = router.subscribe_session_updates().await;
        let mut second = router.subscribe_session_updates().await;

        router
            .handle_notification(notification(
                METHOD_SESSION_UPDATE,
                json!({"sessionId": "s", "update": {"type": "text", "text": "hi"}}),
            ))
            .await;

        let a = first.recv().await.unwrap();
        let b = second.recv().await.unwrap();
        assert_eq!(a.kind, SessionUpdateKind::Text);
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_topics_are_separate() {
        let router = NotificationRouter::new();
        let mut updates = router.subscribe_session_updates().await;
        let mut completions = router.subscribe_session_complete().await;

        router
            .handle_notification(notification(METHOD_SESSION_COMPLETE, json!({"sessionId": "s"})))
            .await;

        assert!(updates.try_recv().is_none());
        let event = completions.recv().await.unwrap();
        assert_eq!(event.session_id.as_deref(), Some("s"));
    }

    #[tokio::test]
    async fn test_unknown_method_is_ignored() {
        let router = NotificationRouter::new();
        let mut updates = router.subscribe_session_updates().await;

        router
            .handle_notification(notification("session/telemetry", json!({})))
            .await;

        assert!(updates.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_unsubscribe_closes_channel() {
        let router = NotificationRouter::new();
        let mut updates = router.subscribe_session_updates().await;

        assert!(router.unsubscribe(updates.id()).await);
        assert!(!router.unsubscribe(updates.id()).await);
        assert!(updates.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_clear_detaches_everyone() {
        let router = NotificationRouter::new();
        let mut updates = router.subscribe_session_updates().await;
        let mut completions = router.subscribe_session_complete().await;

        assert_eq!(router.clear().await, 2);

        assert_eq!(router.subscriber_count().await, 0);
        assert!(updates.recv().await.is_none());
        assert!(completions.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_dropped_subscription_is_pruned() {
        let router = NotificationRouter::new();
        let updates = router.subscribe_session_updates().await;
        drop(updates);

        router
            .handle_notification(notification(METHOD_SESSION_UPDATE, json!({"type": "thought"})))
            .await;

        assert_eq!(router.subscriber_count().await, 0);
    }
}
