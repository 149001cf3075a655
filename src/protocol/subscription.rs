use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::Result;
use crate::protocol::wire::kind;
use crate::transport::{Address, Message, QUEUE_KEY, Transport};

/// How long an unanswered subscribe request is kept before it is dropped.
pub const SUBSCRIPTION_TIMEOUT: Duration = Duration::from_secs(30);
/// How often an unanswered subscribe request is resent.
pub const RESEND_PERIOD: Duration = Duration::from_secs(1);

/// Consumes the parsed body of a topic message.
pub type Handler<S> = Box<dyn FnMut(&mut S, &Value) -> Result<()> + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestState {
    Pending {
        created: Instant,
        last_sent: Option<Instant>,
    },
    Satisfied,
    Expired,
}

struct Subscription<S> {
    handler: Handler<S>,
    state: RequestState,
}

/// Receiving side of the mailing-list protocol.
///
/// Tracks which `(source, topic)` pairs this agent wants, keeps resending
/// `subscribe` until the source answers, and routes topic messages to
/// their handler. Timing uses the wall clock, not simulated time.
pub struct Subscriptions<S> {
    entries: HashMap<(Address, String), Subscription<S>>,
}

impl<S> Default for Subscriptions<S> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<S> Subscriptions<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares interest in `topic` from `source`.
    ///
    /// The handler is installed (replacing any previous one). A new request
    /// is created unless one is already pending or satisfied; an expired
    /// request is recreated. The request goes out on the next
    /// [`Subscriptions::poll`].
    pub fn subscribe_to<F>(&mut self, source: Address, topic: &str, handler: F)
    where
        F: FnMut(&mut S, &Value) -> Result<()> + Send + 'static,
    {
        let now = Instant::now();
        let fresh = RequestState::Pending {
            created: now,
            last_sent: None,
        };
        match self.entries.entry((source, topic.to_string())) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                entry.handler = Box::new(handler);
                if entry.state == RequestState::Expired {
                    entry.state = fresh;
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Subscription {
                    handler: Box::new(handler),
                    state: fresh,
                });
            }
        }
    }

    /// Sends due subscribe requests and drops the ones older than
    /// [`SUBSCRIPTION_TIMEOUT`].
    ///
    /// # Returns
    ///
    /// Number of requests sent.
    pub fn poll(&mut self, now: Instant, own_address: &Address, transport: &dyn Transport) -> usize {
        let mut sent = 0;
        for ((source, topic), entry) in &mut self.entries {
            let RequestState::Pending { created, last_sent } = entry.state else {
                continue;
            };
            if now.saturating_duration_since(created) >= SUBSCRIPTION_TIMEOUT {
                warn!(%source, topic, "subscription unanswered, giving up");
                entry.state = RequestState::Expired;
                continue;
            }
            let due = last_sent.is_none_or(|t| now.saturating_duration_since(t) >= RESEND_PERIOD);
            if !due {
                continue;
            }
            let mut request = Message::of_kind(kind::SUBSCRIBE)
                .with_to(source.clone())
                .with_metadata(QUEUE_KEY, topic);
            request.sender = Some(own_address.clone());
            transport.send(request);
            entry.state = RequestState::Pending {
                created,
                last_sent: Some(now),
            };
            sent += 1;
        }
        sent
    }

    /// Routes a topic message to its handler.
    ///
    /// The topic is the message `type`. Messages from unknown
    /// `(source, topic)` pairs are ignored. Malformed bodies are logged and
    /// dropped. A matching message satisfies the pending request.
    ///
    /// # Returns
    ///
    /// `true` when a handler consumed the message.
    pub fn handle_published(&mut self, message: &Message, state: &mut S) -> bool {
        let (Some(sender), Some(topic)) = (message.sender.as_ref(), message.kind()) else {
            return false;
        };
        let bare_key = (sender.bare(), topic.to_string());
        let key = if self.entries.contains_key(&bare_key) {
            bare_key
        } else {
            (sender.clone(), topic.to_string())
        };
        let Some(entry) = self.entries.get_mut(&key) else {
            return false;
        };
        entry.state = RequestState::Satisfied;

        let body = match message.json_body() {
            Ok(body) => body,
            Err(e) => {
                warn!(%sender, topic, error = %e, "malformed body dropped");
                return false;
            }
        };
        if let Err(e) = (entry.handler)(state, &body) {
            warn!(%sender, topic, error = %e, "handler rejected message");
            return false;
        }
        debug!(%sender, topic, "handled");
        true
    }

    pub fn is_pending(&self, source: &Address, topic: &str) -> bool {
        self.state_of(source, topic)
            .is_some_and(|s| matches!(s, RequestState::Pending { .. }))
    }

    pub fn is_satisfied(&self, source: &Address, topic: &str) -> bool {
        self.state_of(source, topic) == Some(RequestState::Satisfied)
    }

    /// Returns `true` when the request timed out without any answer.
    pub fn is_expired(&self, source: &Address, topic: &str) -> bool {
        self.state_of(source, topic) == Some(RequestState::Expired)
    }

    fn state_of(&self, source: &Address, topic: &str) -> Option<RequestState> {
        self.entries
            .get(&(source.clone(), topic.to_string()))
            .map(|e| e.state)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Message>>);

    impl Transport for Recorder {
        fn send(&self, message: Message) {
            self.0.lock().unwrap().push(message);
        }
    }

    impl Recorder {
        fn count(&self) -> usize {
            self.0.lock().unwrap().len()
        }
    }

    fn addr(s: &str) -> Address {
        Address::parse(s).unwrap()
    }

    fn published(from: &str, topic: &str, body: &str) -> Message {
        Message {
            sender: Some(addr(from)),
            body: body.to_string(),
            ..Message::of_kind(topic)
        }
    }

    fn store_value(state: &mut f64, body: &Value) -> Result<()> {
        *state = body["value"].as_f64().unwrap_or_default();
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn resends_every_period_until_answered() {
        let me = addr("me@test");
        let transport = Recorder::default();
        let mut subs: Subscriptions<f64> = Subscriptions::new();
        subs.subscribe_to(addr("src@test"), "level", store_value);

        assert_eq!(subs.poll(Instant::now(), &me, &transport), 1);
        assert_eq!(subs.poll(Instant::now(), &me, &transport), 0);

        tokio::time::advance(RESEND_PERIOD).await;
        assert_eq!(subs.poll(Instant::now(), &me, &transport), 1);

        let mut state = 0.0;
        assert!(subs.handle_published(&published("src@test", "level", r#"{"value": 4.0}"#), &mut state));
        assert_eq!(state, 4.0);
        assert!(subs.is_satisfied(&addr("src@test"), "level"));

        tokio::time::advance(RESEND_PERIOD * 5).await;
        assert_eq!(subs.poll(Instant::now(), &me, &transport), 0);
        assert_eq!(transport.count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_request_expires_and_is_not_retried() {
        let me = addr("me@test");
        let transport = Recorder::default();
        let mut subs: Subscriptions<f64> = Subscriptions::new();
        let source = addr("silent@test");
        subs.subscribe_to(source.clone(), "level", store_value);
        subs.poll(Instant::now(), &me, &transport);

        tokio::time::advance(SUBSCRIPTION_TIMEOUT).await;
        assert_eq!(subs.poll(Instant::now(), &me, &transport), 0);
        assert!(subs.is_expired(&source, "level"));

        let before = transport.count();
        tokio::time::advance(RESEND_PERIOD * 3).await;
        subs.poll(Instant::now(), &me, &transport);
        assert_eq!(transport.count(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn subscribe_to_is_noop_while_pending() {
        let mut subs: Subscriptions<f64> = Subscriptions::new();
        subs.subscribe_to(addr("src@test"), "level", store_value);
        subs.subscribe_to(addr("src@test"), "level", store_value);

        let transport = Recorder::default();
        assert_eq!(subs.poll(Instant::now(), &addr("me@test"), &transport), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn resubscribing_replaces_the_handler() {
        let mut subs: Subscriptions<f64> = Subscriptions::new();
        subs.subscribe_to(addr("src@test"), "level", store_value);
        subs.subscribe_to(addr("src@test"), "level", |state: &mut f64, body: &Value| {
            *state = body["value"].as_f64().unwrap_or_default() * 2.0;
            Ok(())
        });

        let transport = Recorder::default();
        assert_eq!(subs.poll(Instant::now(), &addr("me@test"), &transport), 1);
        let mut state = 0.0;
        assert!(subs.handle_published(&published("src@test", "level", r#"{"value": 4.0}"#), &mut state));
        assert_eq!(state, 8.0);
    }

    #[test]
    fn ignores_unknown_source_and_topic() {
        let mut subs: Subscriptions<f64> = Subscriptions::new();
        subs.subscribe_to(addr("src@test"), "level", store_value);
        let mut state = 1.0;

        assert!(!subs.handle_published(&published("other@test", "level", "{}"), &mut state));
        assert!(!subs.handle_published(&published("src@test", "other", "{}"), &mut state));
        assert_eq!(state, 1.0);
    }

    #[test]
    fn malformed_body_is_dropped() {
        let mut subs: Subscriptions<f64> = Subscriptions::new();
        subs.subscribe_to(addr("src@test"), "level", store_value);
        let mut state = 1.0;

        assert!(!subs.handle_published(&published("src@test", "level", "{oops"), &mut state));
        assert_eq!(state, 1.0);
    }

    #[test]
    fn handler_errors_are_contained() {
        let mut subs: Subscriptions<f64> = Subscriptions::new();
        subs.subscribe_to(addr("src@test"), "level", |_: &mut f64, body: &Value| {
            serde_json::from_value::<crate::protocol::wire::SetpointCommand>(body.clone())?;
            Ok(())
        });
        let mut state = 0.0;
        let msg = published("src@test", "level", &json!({"unexpected": true}).to_string());
        assert!(!subs.handle_published(&msg, &mut state));
    }
}
