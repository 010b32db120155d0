//! The seam between lookups and the network.

use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::actor::{ActorMessage, LookupId};
use crate::common::{Contact, Id, LookupRequest, LookupResponse};
use crate::core::lookup::LookupEvent;

/// Sends lookup requests to remote contacts.
///
/// Implementations own the wire encoding and the transport. For every call to
/// [MessageDispatcher::send], the `handler` must eventually be completed with
/// either [ResponseHandler::response] or [ResponseHandler::timeout]. Dropping
/// it without doing either counts as a timeout.
pub trait MessageDispatcher: Send + 'static {
    /// Send `request` to `contact`, giving up after `timeout`.
    fn send(
        &self,
        contact: &Contact,
        request: LookupRequest,
        timeout: Duration,
        handler: ResponseHandler,
    );
}

impl<D: MessageDispatcher + Sync> MessageDispatcher for std::sync::Arc<D> {
    fn send(
        &self,
        contact: &Contact,
        request: LookupRequest,
        timeout: Duration,
        handler: ResponseHandler,
    ) {
        (**self).send(contact, request, timeout, handler)
    }
}

/// Routes the outcome of one request back to the lookup that sent it.
///
/// Completing it consumes it, so each request resolves at most once.
pub struct ResponseHandler {
    lookup: LookupId,
    contact: Id,
    destination: SocketAddr,
    sent_at: Instant,
    sender: flume::WeakSender<ActorMessage>,
    completed: bool,
}

impl ResponseHandler {
    pub(crate) fn new(
        lookup: LookupId,
        contact: &Contact,
        sender: flume::WeakSender<ActorMessage>,
    ) -> Self {
        ResponseHandler {
            lookup,
            contact: *contact.id(),
            destination: contact.address(),
            sent_at: Instant::now(),
            sender,
            completed: false,
        }
    }

    // === Getters ===

    /// Id of the contact the request was sent to.
    pub fn contact(&self) -> &Id {
        &self.contact
    }

    pub fn destination(&self) -> SocketAddr {
        self.destination
    }

    pub fn sent_at(&self) -> Instant {
        self.sent_at
    }

    // === Public Methods ===

    /// Deliver the response, received from `source`.
    pub fn response(mut self, source: SocketAddr, response: LookupResponse) {
        let event = LookupEvent::Response {
            contact: self.contact,
            source,
            response,
            elapsed: self.sent_at.elapsed(),
        };

        self.deliver(event);
    }

    /// The contact didn't respond in time.
    pub fn timeout(mut self) {
        self.deliver_timeout();
    }

    // === Private Methods ===

    fn deliver_timeout(&mut self) {
        let event = LookupEvent::Timeout {
            contact: self.contact,
            destination: self.destination,
            elapsed: self.sent_at.elapsed(),
        };

        self.deliver(event);
    }

    fn deliver(&mut self, event: LookupEvent) {
        if self.completed {
            return;
        }
        self.completed = true;

        match self.sender.upgrade() {
            Some(sender) => {
                let _ = sender.send(ActorMessage::Event {
                    lookup: self.lookup,
                    event,
                });
            }
            None => trace!(contact = ?self.contact, "Dht was shutdown, dropping lookup event"),
        }
    }
}

impl fmt::Debug for ResponseHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseHandler")
            .field("lookup", &self.lookup)
            .field("contact", &self.contact)
            .field("destination", &self.destination)
            .field("completed", &self.completed)
            .finish()
    }
}

impl Drop for ResponseHandler {
    fn drop(&mut self) {
        if !self.completed {
            self.deliver_timeout();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler(sender: &flume::Sender<ActorMessage>, contact: &Contact) -> ResponseHandler {
        ResponseHandler::new(7, contact, sender.downgrade())
    }

    #[test]
    fn response_is_routed_to_lookup() {
        let (sender, receiver) = flume::unbounded();
        let contact = Contact::random();

        handler(&sender, &contact).response(
            contact.address(),
            LookupResponse::nodes(contact.clone(), vec![], None),
        );

        match receiver.try_recv() {
            Ok(ActorMessage::Event {
                lookup,
                event: LookupEvent::Response { contact: id, .. },
            }) => {
                assert_eq!(lookup, 7);
                assert_eq!(&id, contact.id());
            }
            _ => panic!("expected a response event"),
        }

        // Exactly once.
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn dropped_handler_is_a_timeout() {
        let (sender, receiver) = flume::unbounded();
        let contact = Contact::random();

        drop(handler(&sender, &contact));

        match receiver.try_recv() {
            Ok(ActorMessage::Event {
                event: LookupEvent::Timeout { destination, .. },
                ..
            }) => assert_eq!(destination, contact.address()),
            _ => panic!("expected a timeout event"),
        }

        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn explicit_timeout_is_delivered_once() {
        let (sender, receiver) = flume::unbounded();
        let contact = Contact::random();

        handler(&sender, &contact).timeout();

        assert!(matches!(
            receiver.try_recv(),
            Ok(ActorMessage::Event {
                event: LookupEvent::Timeout { .. },
                ..
            })
        ));
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn no_panic_after_shutdown() {
        let (sender, receiver) = flume::unbounded::<ActorMessage>();
        let contact = Contact::random();
        let handler = handler(&sender, &contact);

        drop(sender);
        drop(receiver);

        handler.timeout();
    }
}
