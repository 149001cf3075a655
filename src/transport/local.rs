use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use super::{Address, Message, Transport};
use crate::error::{GridError, Result};

/// In-process transport routing messages to tokio mpsc mailboxes.
///
/// Each registered address owns one unbounded channel, so per
/// sender-to-recipient order is preserved while nothing orders messages
/// from different senders.
#[derive(Debug, Default)]
pub struct LocalTransport {
    routes: RwLock<HashMap<Address, mpsc::UnboundedSender<Message>>>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `address` and returns the mailbox receiving its messages.
    ///
    /// # Errors
    ///
    /// Returns `GridError::DuplicateAddress` if the address is taken.
    pub fn register(&self, address: &Address) -> Result<Mailbox> {
        let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
        if routes.contains_key(address) {
            return Err(GridError::DuplicateAddress(address.to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        routes.insert(address.clone(), tx);
        Ok(Mailbox {
            address: address.clone(),
            rx,
        })
    }

    /// Removes the route for `address`; later messages to it are dropped.
    pub fn deregister(&self, address: &Address) {
        self.routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(address);
    }

    pub fn is_registered(&self, address: &Address) -> bool {
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(address)
    }
}

impl Transport for LocalTransport {
    fn send(&self, message: Message) {
        let Some(to) = message.to.clone() else {
            warn!(kind = ?message.kind(), "dropping message without destination");
            return;
        };
        let routes = self.routes.read().unwrap_or_else(PoisonError::into_inner);
        let route = routes.get(&to).or_else(|| routes.get(&to.bare()));
        match route {
            Some(tx) => {
                trace!(%to, kind = ?message.kind(), "deliver");
                let message_kind = message.kind().map(str::to_string);
                if tx.send(message).is_err() {
                    debug!(%to, kind = ?message_kind, "recipient stopped, message dropped");
                }
            }
            None => warn!(%to, kind = ?message.kind(), "unknown recipient, message dropped"),
        }
    }
}

/// Receiving end of an agent's address.
#[derive(Debug)]
pub struct Mailbox {
    address: Address,
    rx: mpsc::UnboundedReceiver<Message>,
}

impl Mailbox {
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Waits up to `timeout` for the next message.
    ///
    /// Returns `None` on timeout or when every sender is gone.
    pub async fn receive(&mut self, timeout: Duration) -> Option<Message> {
        tokio::time::timeout(timeout, self.rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Returns an already-queued message without waiting.
    pub fn try_receive(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }
}
