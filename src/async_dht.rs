//! AsyncDht node.

use crate::{
    actor::{ActorMessage, Info, ResponseSender},
    common::{Id, SharedRoutingTable},
    core::lookup::{NodeLookupResult, ValueLookupResult},
    dht::Dht,
    DhtWasShutdown,
};

impl Dht {
    /// Return an async version of the Dht client.
    pub fn as_async(self) -> AsyncDht {
        AsyncDht(self)
    }
}

#[derive(Debug, Clone)]
/// Async version of the Dht node.
pub struct AsyncDht(Dht);

impl AsyncDht {
    // === Getters ===

    /// Information and statistics about this [Dht] node.
    pub async fn info(&self) -> Result<Info, DhtWasShutdown> {
        let (sender, receiver) = flume::bounded::<Info>(1);

        self.0
            .sender
            .send(ActorMessage::Info(sender))
            .map_err(|_| DhtWasShutdown)?;

        receiver.recv_async().await.map_err(|_| DhtWasShutdown)
    }

    /// See [Dht::routing_table].
    pub fn routing_table(&self) -> SharedRoutingTable {
        self.0.routing_table()
    }

    // === Public Methods ===

    /// Shutdown the actor thread loop.
    pub async fn shutdown(&mut self) {
        let (sender, receiver) = flume::bounded::<()>(1);

        let _ = self.0.sender.send(ActorMessage::Shutdown(sender));
        let _ = receiver.recv_async().await;
    }

    /// Wait until a lookup of our own [Id] finds at least one other responder.
    pub async fn bootstrapped(&self) -> Result<bool, DhtWasShutdown> {
        let info = self.info().await?;

        let result = self.find_node(*info.id()).await?;

        Ok(result.responders.iter().any(|r| !r.contact.is_local()))
    }

    // === Lookups ===

    /// See [Dht::find_node].
    pub async fn find_node(&self, target: Id) -> Result<NodeLookupResult, DhtWasShutdown> {
        let (sender, receiver) = flume::bounded::<NodeLookupResult>(1);

        self.0
            .sender
            .send(ActorMessage::Lookup(target, ResponseSender::Nodes(sender)))
            .map_err(|_| DhtWasShutdown)?;

        receiver.recv_async().await.map_err(|_| DhtWasShutdown)
    }

    /// See [Dht::find_value].
    pub async fn find_value(&self, key: Id) -> Result<ValueLookupResult, DhtWasShutdown> {
        let (sender, receiver) = flume::bounded::<ValueLookupResult>(1);

        self.0
            .sender
            .send(ActorMessage::Lookup(key, ResponseSender::Values(sender)))
            .map_err(|_| DhtWasShutdown)?;

        receiver.recv_async().await.map_err(|_| DhtWasShutdown)
    }
}
