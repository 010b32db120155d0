//! Actor implementation - I/O orchestration layer for the DHT.
//!
//! A single thread owns every running [Lookup], so lookups never need their
//! own locks. Responses and timeouts reach it as messages, through the
//! [ResponseHandler]s handed to the [MessageDispatcher].

pub(crate) mod dispatcher;
mod info;

use std::collections::HashMap;
use std::sync::{PoisonError, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use flume::RecvTimeoutError;
use tracing::{debug, trace};

use crate::common::{Config, Contact, Id, LookupKind, RoutingTable, SharedRoutingTable};
use crate::core::lookup::{
    Lookup, LookupEvent, LookupOutcome, NodeLookupResult, Outgoing, ValueLookupResult,
};
use crate::core::statistics::DhtStatistics;

pub use dispatcher::{MessageDispatcher, ResponseHandler};
pub use info::Info;

/// Identifies a running lookup inside the actor.
pub(crate) type LookupId = u64;

pub(crate) enum ActorMessage {
    Lookup(Id, ResponseSender),
    Event {
        lookup: LookupId,
        event: LookupEvent,
    },
    Info(flume::Sender<Info>),
    Shutdown(flume::Sender<()>),
}

pub(crate) enum ResponseSender {
    Nodes(flume::Sender<NodeLookupResult>),
    Values(flume::Sender<ValueLookupResult>),
}

impl ResponseSender {
    fn kind(&self) -> LookupKind {
        match self {
            ResponseSender::Nodes(_) => LookupKind::Node,
            ResponseSender::Values(_) => LookupKind::Value,
        }
    }

    fn send(&self, outcome: LookupOutcome) {
        match (self, outcome) {
            (ResponseSender::Nodes(sender), LookupOutcome::Nodes(result)) => {
                let _ = sender.send(result);
            }
            (ResponseSender::Values(sender), LookupOutcome::Values(result)) => {
                let _ = sender.send(result);
            }
            (_, outcome) => {
                debug!(target = ?outcome.target(), "Dropping lookup outcome of another kind")
            }
        }
    }
}

struct RunningLookup {
    lookup: Lookup,
    sender: ResponseSender,
}

/// Internal Actor running in the Dht thread loop.
pub(crate) struct Actor<D> {
    config: Config,
    local: Contact,
    routing_table: SharedRoutingTable,
    dispatcher: D,
    /// Handed to [ResponseHandler]s, without keeping the channel open.
    sender: flume::WeakSender<ActorMessage>,

    lookups: HashMap<LookupId, RunningLookup>,
    next_lookup_id: LookupId,

    statistics: DhtStatistics,
}

impl<D> Actor<D> {
    // === Getters ===

    pub fn local(&self) -> &Contact {
        &self.local
    }

    pub fn routing_table_size(&self) -> usize {
        read_table(&self.routing_table).size()
    }

    pub fn active_lookups(&self) -> usize {
        self.lookups.len()
    }

    pub fn statistics(&self) -> &DhtStatistics {
        &self.statistics
    }

    /// Returns a thread safe and lightweight summary of this node's
    /// information and statistics.
    pub fn info(&self) -> Info {
        Info::from(self)
    }

    /// Earliest time at which a running lookup runs out of time.
    fn next_deadline(&self) -> Option<Instant> {
        self.lookups
            .values()
            .filter_map(|running| running.lookup.deadline())
            .min()
    }
}

impl<D: MessageDispatcher> Actor<D> {
    pub fn new(
        config: Config,
        routing_table: SharedRoutingTable,
        dispatcher: D,
        sender: flume::WeakSender<ActorMessage>,
    ) -> Self {
        let local = read_table(&routing_table).local().clone();

        Actor {
            config,
            local,
            routing_table,
            dispatcher,
            sender,

            lookups: HashMap::new(),
            next_lookup_id: 0,

            statistics: DhtStatistics::new(),
        }
    }

    /// Process messages until shutdown, or until every [crate::Dht] handle is dropped.
    pub fn run(mut self, receiver: flume::Receiver<ActorMessage>) {
        debug!(id = ?self.local.id(), "Dht actor thread started");

        let mut shutdown_ack = None;

        loop {
            let received = match self.next_deadline() {
                Some(deadline) => match receiver.recv_deadline(deadline) {
                    Ok(message) => Some(message),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                },
                None => match receiver.recv() {
                    Ok(message) => Some(message),
                    Err(_) => break,
                },
            };

            if let Some(message) = received {
                match message {
                    ActorMessage::Shutdown(sender) => {
                        self.shutdown();
                        shutdown_ack = Some(sender);
                        break;
                    }
                    message => self.handle_message(message),
                }
            }

            self.poll_timeouts(Instant::now());
        }

        // Pending requests fail with DhtWasShutdown once their reply senders are dropped.
        let dropped = receiver.drain().count();
        drop(receiver);

        debug!(id = ?self.local.id(), dropped, "Dht actor thread stopped");

        if let Some(ack) = shutdown_ack {
            let _ = ack.send(());
        }
    }

    // === Private Methods ===

    fn handle_message(&mut self, message: ActorMessage) {
        match message {
            ActorMessage::Lookup(target, sender) => self.start_lookup(target, sender),
            ActorMessage::Event { lookup, event } => self.handle_event(lookup, event),
            ActorMessage::Info(sender) => {
                let _ = sender.send(self.info());
            }
            ActorMessage::Shutdown(_) => {}
        }
    }

    fn start_lookup(&mut self, target: Id, sender: ResponseSender) {
        let kind = sender.kind();
        let id = self.next_lookup_id;
        self.next_lookup_id = self.next_lookup_id.wrapping_add(1);

        let mut lookup = Lookup::new(
            kind,
            target,
            self.local.clone(),
            self.config.lookup_config(kind),
        );

        let mut outgoing = Vec::new();
        let outcome = lookup.start(
            Instant::now(),
            &read_table(&self.routing_table),
            &mut outgoing,
        );

        if let Some(outcome) = outcome {
            self.complete(outcome, &sender);
            return;
        }

        self.lookups.insert(id, RunningLookup { lookup, sender });
        self.dispatch(id, outgoing);
    }

    fn handle_event(&mut self, id: LookupId, event: LookupEvent) {
        let Some(running) = self.lookups.get_mut(&id) else {
            // The lookup is gone, but the routing table still learns about the failure.
            if let LookupEvent::Timeout { contact, .. } = &event {
                write_table(&self.routing_table).handle_failure(contact);
            }
            trace!(lookup = id, contact = ?event.contact(), "Event for a finished lookup");
            return;
        };

        let mut outgoing = Vec::new();
        let outcome = running.lookup.handle_event(
            Instant::now(),
            &mut write_table(&self.routing_table),
            event,
            &mut outgoing,
        );

        match outcome {
            Some(outcome) => {
                if let Some(running) = self.lookups.remove(&id) {
                    self.complete(outcome, &running.sender);
                }
            }
            None => self.dispatch(id, outgoing),
        }
    }

    /// Send requests outside of any routing table lock.
    fn dispatch(&mut self, id: LookupId, outgoing: Vec<Outgoing>) {
        if outgoing.is_empty() {
            return;
        }

        let timeouts: Vec<Duration> = {
            let table = read_table(&self.routing_table);

            outgoing
                .iter()
                .map(|Outgoing { contact, .. }| {
                    table
                        .get(contact.id())
                        .unwrap_or(contact)
                        .adaptive_timeout(self.config.request_timeout, self.config.min_request_timeout)
                })
                .collect()
        };

        for (Outgoing { contact, request, hop }, timeout) in outgoing.into_iter().zip(timeouts) {
            trace!(lookup = id, contact = ?contact.id(), hop, ?timeout, "Dispatching request");

            let handler = ResponseHandler::new(id, &contact, self.sender.clone());
            self.dispatcher.send(&contact, request, timeout, handler);
        }
    }

    fn poll_timeouts(&mut self, now: Instant) {
        let expired: Vec<LookupId> = self
            .lookups
            .iter()
            .filter(|(_, running)| running.lookup.deadline().is_some_and(|deadline| deadline <= now))
            .map(|(id, _)| *id)
            .collect();

        for id in expired {
            if let Some(mut running) = self.lookups.remove(&id) {
                if let Some(outcome) = running.lookup.poll_timeout(now) {
                    self.complete(outcome, &running.sender);
                }
            }
        }
    }

    fn complete(&mut self, outcome: LookupOutcome, sender: &ResponseSender) {
        let (kind, found) = match &outcome {
            LookupOutcome::Nodes(_) => (LookupKind::Node, false),
            LookupOutcome::Values(result) => (LookupKind::Value, result.is_found()),
        };

        self.statistics
            .record(*outcome.target(), kind, found, *outcome.statistics());

        sender.send(outcome);
    }

    /// Finish every running lookup with whatever it found so far.
    fn shutdown(&mut self) {
        let now = Instant::now();

        for (_, mut running) in self.lookups.drain() {
            if let Some(outcome) = running.lookup.cancel(now) {
                running.sender.send(outcome);
            }
        }
    }
}

fn read_table(table: &SharedRoutingTable) -> RwLockReadGuard<'_, RoutingTable> {
    table.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_table(table: &SharedRoutingTable) -> RwLockWriteGuard<'_, RoutingTable> {
    table.write().unwrap_or_else(PoisonError::into_inner)
}
