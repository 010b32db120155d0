//! Dht node.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::{
    actor::{Actor, ActorMessage, Info, MessageDispatcher, ResponseSender},
    common::{Config, Contact, Id, RoutingTable, SharedRoutingTable},
    core::lookup::{NodeLookupResult, ValueLookupResult},
    DhtWasShutdown, Error,
};

#[derive(Clone)]
/// Kadwalk Dht node.
///
/// Cheap to clone, every clone talks to the same actor thread, which stops
/// once [Dht::shutdown] is called or every clone is dropped.
pub struct Dht {
    pub(crate) sender: flume::Sender<ActorMessage>,
    routing_table: SharedRoutingTable,
}

impl fmt::Debug for Dht {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dht")
            .field("routing_table", &self.routing_table)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default, Clone)]
/// A builder for the [Dht] node.
pub struct DhtBuilder {
    config: Config,
    contacts: Vec<Contact>,
}

impl DhtBuilder {
    /// Replace all settings at once.
    pub fn config(&mut self, config: Config) -> &mut Self {
        self.config = config;

        self
    }

    /// Set the replication parameter, see [Config::k].
    pub fn k(&mut self, k: usize) -> &mut Self {
        self.config.k = k;

        self
    }

    /// Set the number of concurrent requests of both node and value lookups.
    pub fn parallelism(&mut self, parallelism: usize) -> &mut Self {
        self.config.node_lookup_parallelism = parallelism;
        self.config.value_lookup_parallelism = parallelism;

        self
    }

    /// Set the time budget of both node and value lookups, [Duration::ZERO] disables it.
    pub fn lookup_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.config.node_lookup_timeout = timeout;
        self.config.value_lookup_timeout = timeout;

        self
    }

    /// Set the request timeout for contacts without round trip history.
    pub fn request_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.config.request_timeout = timeout;

        self
    }

    /// Known contacts to seed the routing table with.
    pub fn bootstrap(&mut self, contacts: &[Contact]) -> &mut Self {
        self.contacts = contacts.to_vec();

        self
    }

    /// Create a Dht node for the `local` contact, sending requests through `dispatcher`.
    pub fn build<D: MessageDispatcher>(&self, local: Contact, dispatcher: D) -> Result<Dht, Error> {
        let mut routing_table = RoutingTable::with_config(local, &self.config);

        for contact in &self.contacts {
            routing_table.add(contact.clone(), false);
        }

        Dht::with_routing_table(self.config.clone(), routing_table, dispatcher)
    }
}

impl Dht {
    /// Create a new Dht node for the `local` contact with an empty routing table.
    pub fn new<D: MessageDispatcher>(config: Config, local: Contact, dispatcher: D) -> Result<Self, Error> {
        let routing_table = RoutingTable::with_config(local, &config);

        Self::with_routing_table(config, routing_table, dispatcher)
    }

    /// Returns a builder to edit settings before creating a Dht node.
    pub fn builder() -> DhtBuilder {
        DhtBuilder::default()
    }

    /// Create a new Dht node around an existing routing table.
    pub fn with_routing_table<D: MessageDispatcher>(
        config: Config,
        routing_table: RoutingTable,
        dispatcher: D,
    ) -> Result<Self, Error> {
        config.validate()?;

        let (sender, receiver) = flume::unbounded();
        let routing_table: SharedRoutingTable = Arc::new(RwLock::new(routing_table));

        let actor = Actor::new(config, routing_table.clone(), dispatcher, sender.downgrade());

        thread::Builder::new()
            .name("Kadwalk Dht actor thread".to_string())
            .spawn(move || actor.run(receiver))?;

        Ok(Dht {
            sender,
            routing_table,
        })
    }

    // === Getters ===

    /// Information and statistics about this [Dht] node.
    pub fn info(&self) -> Result<Info, DhtWasShutdown> {
        let (sender, receiver) = flume::bounded::<Info>(1);

        self.sender
            .send(ActorMessage::Info(sender))
            .map_err(|_| DhtWasShutdown)?;

        receiver.recv().map_err(|_| DhtWasShutdown)
    }

    /// The routing table shared with the actor thread, for request handlers
    /// and inspection.
    pub fn routing_table(&self) -> SharedRoutingTable {
        self.routing_table.clone()
    }

    // === Public Methods ===

    /// Add a contact learned out of band, returns `true` if it is now in a bucket.
    pub fn add_contact(&self, contact: Contact) -> bool {
        self.routing_table
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .add(contact, false)
    }

    /// Shutdown the actor thread loop.
    ///
    /// Running lookups finish right away with what they found so far.
    pub fn shutdown(&mut self) {
        let (sender, receiver) = flume::bounded::<()>(1);

        let _ = self.sender.send(ActorMessage::Shutdown(sender));
        let _ = receiver.recv();
    }

    /// Wait until a lookup of our own [Id] finds at least one other responder.
    pub fn bootstrapped(&self) -> Result<bool, DhtWasShutdown> {
        let info = self.info()?;
        let result = self.find_node(*info.id())?;

        let bootstrapped = result.responders.iter().any(|r| !r.contact.is_local());
        debug!(bootstrapped, "Bootstrapping lookup done");

        Ok(bootstrapped)
    }

    // === Lookups ===

    /// Find the `k` closest responding contacts to the target.
    pub fn find_node(&self, target: Id) -> Result<NodeLookupResult, DhtWasShutdown> {
        let (sender, receiver) = flume::bounded::<NodeLookupResult>(1);

        self.sender
            .send(ActorMessage::Lookup(target, ResponseSender::Nodes(sender)))
            .map_err(|_| DhtWasShutdown)?;

        receiver.recv().map_err(|_| DhtWasShutdown)
    }

    /// Find values stored under the key, stopping at the first responder that has any.
    pub fn find_value(&self, key: Id) -> Result<ValueLookupResult, DhtWasShutdown> {
        let (sender, receiver) = flume::bounded::<ValueLookupResult>(1);

        self.sender
            .send(ActorMessage::Lookup(key, ResponseSender::Values(sender)))
            .map_err(|_| DhtWasShutdown)?;

        receiver.recv().map_err(|_| DhtWasShutdown)
    }
}

#[cfg(test)]
mod test {
    use std::net::SocketAddr;

    use super::*;
    use crate::actor::ResponseHandler;
    use crate::common::LookupRequest;

    /// Never answers, every request times out when its handler is dropped.
    struct Unreachable;

    impl MessageDispatcher for Unreachable {
        fn send(&self, _: &Contact, _: LookupRequest, _: Duration, _: ResponseHandler) {}
    }

    fn local() -> Contact {
        Contact::local(Id::random(), SocketAddr::from(([127, 0, 0, 1], 6881)))
    }

    #[test]
    fn shutdown() {
        let mut dht = Dht::new(Config::default(), local(), Unreachable).unwrap();

        let clone = dht.clone();

        dht.shutdown();

        assert!(matches!(clone.info(), Err(DhtWasShutdown)));
        assert!(matches!(clone.find_node(Id::random()), Err(DhtWasShutdown)));
    }

    #[test]
    fn rejects_invalid_config() {
        let config = Config {
            k: 0,
            ..Default::default()
        };

        assert!(matches!(
            Dht::new(config, local(), Unreachable),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn lookup_with_empty_routing_table() {
        let local = local();
        let dht = Dht::new(Config::default(), local.clone(), Unreachable).unwrap();

        let result = dht.find_node(Id::random()).unwrap();
        assert_eq!(result.contacts(), vec![local]);

        let result = dht.find_value(Id::random()).unwrap();
        assert!(!result.is_found());

        assert!(!dht.bootstrapped().unwrap());
    }

    #[test]
    fn unreachable_contacts_time_out() {
        let dht = Dht::builder()
            .bootstrap(&[Contact::random(), Contact::random()])
            .build(local(), Unreachable)
            .unwrap();

        assert_eq!(dht.routing_table().read().unwrap().size(), 2);

        let result = dht.find_node(Id::random()).unwrap();

        assert_eq!(result.responders.len(), 1);
        assert_eq!(result.statistics.timeouts, 2);

        let info = dht.info().unwrap();
        assert_eq!(info.completed_lookups(), 1);
        assert_eq!(info.active_lookups(), 0);
    }
}
