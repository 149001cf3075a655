use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::error::{GridError, Result};
use crate::protocol::wire::kind;
use crate::transport::{Address, Message, Transport};

/// Builds the current message of a topic from the owner's state.
///
/// Receives a seed message (destination already filled in) and returns it
/// fully populated. Must be a pure function of the state.
pub type Producer<S> = Box<dyn Fn(&S, Message) -> Result<Message> + Send + Sync>;

/// A named topic: its subscribers and how to build its message.
pub struct MailingList<S> {
    subscribers: HashSet<Address>,
    producer: Producer<S>,
}

impl<S> MailingList<S> {
    pub fn subscribers(&self) -> impl Iterator<Item = &Address> {
        self.subscribers.iter()
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

/// Publishing side of the mailing-list protocol, owned by one agent.
///
/// `S` is the state the topic producers read from. The publisher is kept
/// next to that state rather than inside it, so an agent can hand out
/// `&state` while mutating the subscriber sets.
pub struct Publisher<S> {
    owner: Address,
    topics: HashMap<String, MailingList<S>>,
}

impl<S> Publisher<S> {
    pub fn new(owner: Address) -> Self {
        Self {
            owner,
            topics: HashMap::new(),
        }
    }

    pub fn owner(&self) -> &Address {
        &self.owner
    }

    /// Registers a topic with its producer.
    ///
    /// Returns `false` and keeps the existing producer when `name` is
    /// already registered.
    pub fn register_topic<F>(&mut self, name: &str, producer: F) -> bool
    where
        F: Fn(&S, Message) -> Result<Message> + Send + Sync + 'static,
    {
        if self.topics.contains_key(name) {
            debug!(topic = name, "topic already registered");
            return false;
        }
        self.topics.insert(
            name.to_string(),
            MailingList {
                subscribers: HashSet::new(),
                producer: Box::new(producer),
            },
        );
        true
    }

    pub fn topic(&self, name: &str) -> Option<&MailingList<S>> {
        self.topics.get(name)
    }

    pub fn has_subscribers(&self, name: &str) -> bool {
        self.topics.get(name).is_some_and(|t| !t.is_empty())
    }

    /// Handles an inbound `subscribe` for `topic` from `sender`.
    ///
    /// A new subscriber is added and immediately sent one instance of the
    /// topic's current message. A repeated subscribe is a no-op. Unknown
    /// topics are logged and dropped.
    ///
    /// # Returns
    ///
    /// `true` when `sender` was newly added.
    pub fn handle_subscribe(
        &mut self,
        sender: &Address,
        topic: &str,
        state: &S,
        transport: &dyn Transport,
    ) -> bool {
        let Some(list) = self.topics.get_mut(topic) else {
            warn!(%sender, topic, "subscribe for unknown topic dropped");
            return false;
        };
        if !list.subscribers.insert(sender.clone()) {
            return false;
        }
        debug!(%sender, topic, "new subscriber");
        if let Err(e) = self.publish(topic, Some(sender), state, transport) {
            warn!(%sender, topic, error = %e, "initial sync failed");
        }
        true
    }

    /// Handles a raw message if it is a `subscribe` request.
    ///
    /// Returns `true` when the message was a subscribe (handled or dropped).
    pub fn handle_message(&mut self, message: &Message, state: &S, transport: &dyn Transport) -> bool {
        if message.kind() != Some(kind::SUBSCRIBE) {
            return false;
        }
        let (Some(sender), Some(topic)) = (message.sender.as_ref(), message.metadata(crate::transport::QUEUE_KEY)) else {
            warn!("malformed subscribe dropped: missing sender or queue");
            return true;
        };
        let topic = topic.to_string();
        self.handle_subscribe(sender, &topic, state, transport);
        true
    }

    /// Sends the topic's current message to `recipient`, or to every
    /// subscriber when `recipient` is `None`.
    ///
    /// Each recipient gets its own message instance.
    ///
    /// # Errors
    ///
    /// Returns `GridError::UnknownTopic` if `topic` is not registered, or
    /// the producer's error.
    ///
    /// # Returns
    ///
    /// The number of messages handed to the transport.
    pub fn publish(
        &self,
        topic: &str,
        recipient: Option<&Address>,
        state: &S,
        transport: &dyn Transport,
    ) -> Result<usize> {
        let list = self
            .topics
            .get(topic)
            .ok_or_else(|| GridError::UnknownTopic(topic.to_string()))?;

        let recipients: Vec<&Address> = match recipient {
            Some(r) => vec![r],
            None => list.subscribers.iter().collect(),
        };
        for to in &recipients {
            let seed = Message::default().with_to((*to).clone());
            let mut message = (list.producer)(state, seed)?;
            message.to = Some((*to).clone());
            message.sender = Some(self.owner.clone());
            transport.send(message);
        }
        Ok(recipients.len())
    }
}
