//! Callback bridge
//!
//! The native dial callback carries a single pointer-sized correlation value.
//! [`CallbackBridge`] hands those values out and routes each notification to
//! the session that registered it. Sessions are held weakly; a token whose
//! session is gone or unregistered is dropped on the floor.

use crate::native::{DialNotification, DialNotificationSink};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

/// Correlation token passed through the native callback id
pub type Token = usize;

/// Receiver of routed notifications
pub trait CallbackTarget: Send + Sync {
    fn on_notification(&self, notification: DialNotification);
}

// Process-wide so tokens stay unique across bridges. The native backend
// keys its trampoline table on them. Zero reads as "no callback id".
static NEXT_TOKEN: AtomicUsize = AtomicUsize::new(1);

/// Token -> session table shared by every dial of one client
pub struct CallbackBridge {
    sessions: Mutex<HashMap<Token, Weak<dyn CallbackTarget>>>,
}

impl Default for CallbackBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl CallbackBridge {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn next_token(&self) -> Token {
        NEXT_TOKEN.fetch_add(1, Ordering::Relaxed)
    }

    pub fn register(&self, token: Token, target: Weak<dyn CallbackTarget>) {
        log::trace!("bridge: register token {}", token);
        self.sessions.lock().insert(token, target);
    }

    pub fn lookup(&self, token: Token) -> Option<Arc<dyn CallbackTarget>> {
        self.sessions.lock().get(&token).and_then(Weak::upgrade)
    }

    /// Returns whether the token was registered
    pub fn unregister(&self, token: Token) -> bool {
        let removed = self.sessions.lock().remove(&token).is_some();
        if removed {
            log::trace!("bridge: unregister token {}", token);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DialNotificationSink for CallbackBridge {
    fn notify(&self, notification: DialNotification) {
        // Lock released before the session runs
        let target = self.lookup(notification.callback_id);
        match target {
            Some(target) => target.on_notification(notification),
            None => log::trace!(
                "bridge: ignoring notification for unknown token {} (state {:#x})",
                notification.callback_id,
                notification.state
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[derive(Default)]
    struct Counter {
        hits: AtomicU32,
    }

    impl CallbackTarget for Counter {
        fn on_notification(&self, _notification: DialNotification) {
            self.hits.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn notification(token: Token) -> DialNotification {
        DialNotification {
            callback_id: token,
            sub_entry: 1,
            handle: 0x10,
            state: 3,
            error: 0,
            extended_error: 0,
        }
    }

    fn register(bridge: &CallbackBridge, target: &Arc<Counter>) -> Token {
        let token = bridge.next_token();
        let target: Arc<dyn CallbackTarget> = target.clone();
        bridge.register(token, Arc::downgrade(&target));
        token
    }

    #[test]
    fn test_tokens_are_distinct_and_nonzero() {
        let bridge = CallbackBridge::new();
        let a = bridge.next_token();
        let b = bridge.next_token();
        assert_ne!(a, 0);
        assert_ne!(a, b);
    }

    #[test]
    fn test_tokens_are_unique_across_bridges() {
        let first = CallbackBridge::new();
        let second = CallbackBridge::new();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..16 {
            assert!(seen.insert(first.next_token()));
            assert!(seen.insert(second.next_token()));
        }
        assert!(!seen.contains(&0));
    }

    #[test]
    fn test_routes_to_registered_session() {
        let bridge = CallbackBridge::new();
        let first = Arc::new(Counter::default());
        let second = Arc::new(Counter::default());
        let t1 = register(&bridge, &first);
        let t2 = register(&bridge, &second);

        bridge.notify(notification(t1));
        bridge.notify(notification(t1));
        bridge.notify(notification(t2));
        assert_eq!(first.hits.load(Ordering::SeqCst), 2);
        assert_eq!(second.hits.load(Ordering::SeqCst), 1);
        assert_eq!(bridge.len(), 2);
    }

    #[test]
    fn test_unregistered_token_is_noop() {
        let bridge = CallbackBridge::new();
        let session = Arc::new(Counter::default());
        let token = register(&bridge, &session);
        assert!(bridge.unregister(token));
        assert!(!bridge.unregister(token));

        bridge.notify(notification(token));
        bridge.notify(notification(9999));
        assert_eq!(session.hits.load(Ordering::SeqCst), 0);
        assert!(bridge.is_empty());
    }

    #[test]
    fn test_dropped_session_is_not_resurrected() {
        let bridge = CallbackBridge::new();
        let session = Arc::new(Counter::default());
        let token = register(&bridge, &session);
        drop(session);
        assert!(bridge.lookup(token).is_none());
        bridge.notify(notification(token));
    }

    #[test]
    fn test_concurrent_sessions_do_not_serialize() {
        let bridge = Arc::new(CallbackBridge::new());
        let sessions: Vec<_> = (0..4).map(|_| Arc::new(Counter::default())).collect();
        let tokens: Vec<_> = sessions.iter().map(|s| register(&bridge, s)).collect();

        let threads: Vec<_> = tokens
            .iter()
            .map(|&token| {
                let bridge = Arc::clone(&bridge);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        bridge.notify(notification(token));
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        for s in &sessions {
            assert_eq!(s.hits.load(Ordering::SeqCst), 100);
        }
    }
}
