//! Iterative Kademlia lookup, node and value variants.
//!
//! A [Lookup] does no I/O on its own. Requests it wants to send are pushed to
//! an outgoing queue, and responses or timeouts are fed back in as
//! [LookupEvent]s by whoever drives it (see [crate::actor]).

use std::collections::{BTreeMap, HashMap, HashSet};
use std::mem;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::common::{
    ClosestContacts, Contact, DhtValue, Id, LookupConfig, LookupKind, LookupRequest,
    LookupResponse, QueryKey, ResponseBody, RoutingTable,
};
use crate::core::statistics::LookupStatistics;

#[derive(Debug, Clone)]
/// A request a [Lookup] wants to send.
pub struct Outgoing {
    pub contact: Contact,
    pub request: LookupRequest,
    /// Iteration of the lookup this request belongs to.
    pub hop: u32,
}

#[derive(Debug)]
/// Outcome of a request sent on behalf of a lookup.
pub enum LookupEvent {
    Response {
        /// Id of the contact the request was sent to.
        contact: Id,
        /// Address the response came from.
        source: SocketAddr,
        response: LookupResponse,
        elapsed: Duration,
    },
    Timeout {
        contact: Id,
        destination: SocketAddr,
        elapsed: Duration,
    },
}

impl LookupEvent {
    pub fn contact(&self) -> &Id {
        match self {
            LookupEvent::Response { contact, .. } => contact,
            LookupEvent::Timeout { contact, .. } => contact,
        }
    }
}

#[derive(Debug, Clone)]
/// One of the closest contacts that responded to a node lookup.
pub struct Responder {
    pub contact: Contact,
    /// Token needed to store values at this contact, if it handed one out.
    pub query_key: Option<QueryKey>,
}

#[derive(Debug, Clone)]
/// Result of a node lookup.
pub struct NodeLookupResult {
    pub target: Id,
    /// Up to `k` closest responders, ordered by ascending distance to the target.
    pub responders: Vec<Responder>,
    /// Remote contacts that claimed our own [Id].
    pub collisions: Vec<Contact>,
    pub statistics: LookupStatistics,
}

impl NodeLookupResult {
    /// The closest contacts, without their query keys.
    pub fn contacts(&self) -> Vec<Contact> {
        self.responders.iter().map(|r| r.contact.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.responders.is_empty()
    }
}

#[derive(Debug, Clone)]
/// Result of a value lookup.
pub struct ValueLookupResult {
    pub key: Id,
    /// Values from the first contact that had any, empty if none was found.
    pub values: Vec<DhtValue>,
    /// Closest responders at the time the lookup finished.
    pub responders: Vec<Responder>,
    pub statistics: LookupStatistics,
}

impl ValueLookupResult {
    pub fn is_found(&self) -> bool {
        !self.values.is_empty()
    }
}

#[derive(Debug, Clone)]
pub enum LookupOutcome {
    Nodes(NodeLookupResult),
    Values(ValueLookupResult),
}

impl LookupOutcome {
    pub fn target(&self) -> &Id {
        match self {
            LookupOutcome::Nodes(result) => &result.target,
            LookupOutcome::Values(result) => &result.key,
        }
    }

    pub fn statistics(&self) -> &LookupStatistics {
        match self {
            LookupOutcome::Nodes(result) => &result.statistics,
            LookupOutcome::Values(result) => &result.statistics,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LookupState {
    Created,
    Active,
    Finished,
}

#[derive(Debug)]
/// An iterative process of concurrently sending a request to the closest known contacts
/// to the target, learning closer contacts from their responses, and repeating until the
/// `k` closest responders are known, a value is found, or the time budget runs out.
pub struct Lookup {
    kind: LookupKind,
    target: Id,
    /// Furthest possible id from the target.
    furthest: Id,
    local: Contact,
    config: LookupConfig,

    state: LookupState,
    started_at: Option<Instant>,

    /// Contacts that were sent a request, including the local contact.
    queried: HashSet<Id>,
    /// Requests with no response or timeout yet.
    inflight: HashMap<Id, Contact>,
    /// Contacts picked from the routing table at start.
    seeded: HashSet<Id>,
    /// Iteration at which each request was sent.
    hops: HashMap<Id, u32>,
    /// Candidates that were never sent a request, closest first.
    to_query: ClosestContacts,
    /// Up to `k` closest responders, by their XOR distance to the target.
    responses: BTreeMap<Id, Responder>,

    active_searches: usize,
    max_hop: u32,

    values: Vec<DhtValue>,
    collisions: Vec<Contact>,
    statistics: LookupStatistics,

    outcome: Option<LookupOutcome>,
}

impl Lookup {
    pub fn new(kind: LookupKind, target: Id, local: Contact, config: LookupConfig) -> Self {
        trace!(?target, ?kind, "New lookup");

        Lookup {
            kind,
            target,
            furthest: target.invert(),
            local,
            config,

            state: LookupState::Created,
            started_at: None,

            queried: HashSet::new(),
            inflight: HashMap::new(),
            seeded: HashSet::new(),
            hops: HashMap::new(),
            to_query: ClosestContacts::new(target),
            responses: BTreeMap::new(),

            active_searches: 0,
            max_hop: 0,

            values: Vec::new(),
            collisions: Vec::new(),
            statistics: LookupStatistics::default(),

            outcome: None,
        }
    }

    // === Getters ===

    pub fn kind(&self) -> LookupKind {
        self.kind
    }

    pub fn target(&self) -> &Id {
        &self.target
    }

    pub fn is_finished(&self) -> bool {
        self.state == LookupState::Finished
    }

    /// Number of requests sent and not yet answered nor timed out.
    pub fn active_searches(&self) -> usize {
        self.active_searches
    }

    pub fn has_queried(&self, id: &Id) -> bool {
        self.queried.contains(id)
    }

    /// Iteration at which the request to this contact was sent.
    pub fn hop_of(&self, id: &Id) -> Option<u32> {
        self.hops.get(id).copied()
    }

    /// Closest responders so far, ordered by ascending distance to the target.
    pub fn responders(&self) -> impl Iterator<Item = &Contact> {
        self.responses.values().map(|r| &r.contact)
    }

    pub fn statistics(&self) -> &LookupStatistics {
        &self.statistics
    }

    /// Time at which this lookup gives up, if it has a time budget.
    pub fn deadline(&self) -> Option<Instant> {
        if self.state != LookupState::Active || self.config.timeout.is_zero() {
            return None;
        }

        self.started_at.map(|started_at| started_at + self.config.timeout)
    }

    // === Public Methods ===

    /// Seed the lookup from the routing table and send the first requests.
    ///
    /// Returns the outcome if the lookup finished right away, for example
    /// with an empty routing table.
    pub fn start(
        &mut self,
        now: Instant,
        table: &RoutingTable,
        outgoing: &mut Vec<Outgoing>,
    ) -> Option<LookupOutcome> {
        if self.state != LookupState::Created {
            debug!(target = ?self.target, "Lookup already started");
            return None;
        }

        self.state = LookupState::Active;
        self.started_at = Some(now);

        for contact in table.select(&self.target, self.config.k, false, false) {
            self.seeded.insert(*contact.id());
            self.add_candidate(contact);
        }

        // The local contact is part of the answer, but never sent a request.
        self.queried.insert(*self.local.id());
        self.add_responder(self.local.clone(), None);

        debug!(
            target = ?self.target,
            kind = ?self.kind,
            seeds = self.to_query.len(),
            "Starting lookup"
        );

        if self.to_query.is_empty() {
            debug!(target = ?self.target, "No candidates to start from");
            self.finish(now);
        } else {
            for contact in self.to_query.take_closest(self.config.parallelism) {
                self.dispatch(contact, 0, outgoing);
            }
        }

        self.outcome.take()
    }

    /// Feed the outcome of a request back to this lookup, updating the routing table
    /// with what was learned.
    ///
    /// Returns the outcome if this event finished the lookup.
    pub fn handle_event(
        &mut self,
        now: Instant,
        table: &mut RoutingTable,
        event: LookupEvent,
        outgoing: &mut Vec<Outgoing>,
    ) -> Option<LookupOutcome> {
        match event {
            LookupEvent::Response {
                contact,
                source,
                response,
                elapsed,
            } => self.handle_response(now, table, contact, source, response, elapsed, outgoing),
            LookupEvent::Timeout {
                contact,
                destination,
                elapsed,
            } => self.handle_timeout(now, table, contact, destination, elapsed, outgoing),
        }

        self.outcome.take()
    }

    /// Finish the lookup if its time budget has run out.
    pub fn poll_timeout(&mut self, now: Instant) -> Option<LookupOutcome> {
        if self.state == LookupState::Active && self.is_timed_out(now) {
            debug!(target = ?self.target, "Lookup timed out");
            self.finish(now);
        }

        self.outcome.take()
    }

    /// Stop the lookup and return what it found so far.
    pub fn cancel(&mut self, now: Instant) -> Option<LookupOutcome> {
        self.finish(now);

        self.outcome.take()
    }

    // === Private Methods ===

    #[allow(clippy::too_many_arguments)]
    fn handle_response(
        &mut self,
        now: Instant,
        table: &mut RoutingTable,
        id: Id,
        source: SocketAddr,
        response: LookupResponse,
        elapsed: Duration,
        outgoing: &mut Vec<Outgoing>,
    ) {
        let Some(queried) = self.inflight.remove(&id) else {
            if self.queried.contains(&id) {
                trace!(?id, ?source, "Ignoring duplicate or late response");
            } else {
                debug!(?id, ?source, "Ignoring unsolicited response");
            }
            return;
        };

        self.active_searches = self.active_searches.saturating_sub(1);

        if self.state == LookupState::Finished {
            trace!(?id, "Response after lookup finished");
            return;
        }

        self.statistics.add_reply(elapsed);

        let hop = self.hops.get(&id).copied().unwrap_or(0);

        let mut responder = if response.responder.id() == &id {
            response.responder
        } else {
            debug!(
                expected = ?id,
                got = ?response.responder.id(),
                "Responder id mismatch, keeping the queried contact"
            );
            queried
        };

        responder.reconcile_address(source);
        responder.set_round_trip_time(elapsed);
        responder.mark_alive_at(now);

        table.add(responder.clone(), true);

        match response.body {
            ResponseBody::Values(values) if self.kind.is_value_lookup() => {
                if values.is_empty() {
                    warn!(?id, target = ?self.target, "Empty value response");
                    self.step(now, hop, outgoing);
                } else {
                    debug!(
                        ?id,
                        target = ?self.target,
                        values = values.len(),
                        "Found values"
                    );
                    self.values = values;
                    self.max_hop = self.max_hop.max(hop + 1);
                    self.finish(now);
                }
            }
            ResponseBody::Values(_) => {
                debug!(?id, "Value response to a node lookup");
                self.step(now, hop, outgoing);
            }
            ResponseBody::Nodes {
                contacts,
                query_key,
            } => {
                let has_contacts = !contacts.is_empty();

                for contact in contacts {
                    self.learn(table, contact);
                }

                if has_contacts || self.config.accept_empty_responses {
                    self.add_responder(responder, query_key);
                }

                self.step(now, hop + 1, outgoing);
            }
        }
    }

    fn handle_timeout(
        &mut self,
        now: Instant,
        table: &mut RoutingTable,
        id: Id,
        destination: SocketAddr,
        elapsed: Duration,
        outgoing: &mut Vec<Outgoing>,
    ) {
        table.handle_failure(&id);

        if self.inflight.remove(&id).is_none() {
            trace!(?id, ?destination, "Ignoring timeout of a request this lookup isn't waiting for");
            return;
        }

        self.active_searches = self.active_searches.saturating_sub(1);

        if self.state == LookupState::Finished {
            return;
        }

        trace!(?id, ?destination, ?elapsed, "Request timed out");

        self.statistics.add_timeout(self.seeded.contains(&id));

        // A timeout doesn't take the lookup any deeper.
        let hop = self.hops.get(&id).copied().unwrap_or(0);
        self.step(now, hop, outgoing);
    }

    /// Scrub a contact learned from a response, and keep it as a candidate if new.
    fn learn(&mut self, table: &mut RoutingTable, contact: Contact) {
        if contact.id() == self.local.id() {
            if contact.address() != self.local.address() {
                debug!(?contact, "Contact claims our own id");
                self.collisions.push(contact);
            }
            return;
        }

        if !contact.has_valid_address() {
            debug!(?contact, "Ignoring contact with an invalid address");
            return;
        }

        if self.queried.contains(contact.id()) || self.to_query.contains(contact.id()) {
            return;
        }

        self.to_query.add(contact.clone());
        table.add(contact, false);
    }

    fn add_candidate(&mut self, contact: Contact) -> bool {
        if contact.id() == self.local.id() || self.queried.contains(contact.id()) {
            return false;
        }

        self.to_query.add(contact)
    }

    fn add_responder(&mut self, contact: Contact, query_key: Option<QueryKey>) {
        let distance = contact.id().xor(&self.target);

        self.responses.insert(distance, Responder { contact, query_key });

        if self.responses.len() > self.config.k {
            if let Some((_, evicted)) = self.responses.pop_last() {
                trace!(contact = ?evicted.contact, "Evicting furthest responder");
            }
        }
    }

    /// Furthest of the closest responders, or the furthest possible id.
    fn worst_responder(&self) -> Id {
        self.responses
            .values()
            .next_back()
            .map(|r| *r.contact.id())
            .unwrap_or(self.furthest)
    }

    fn is_timed_out(&self, now: Instant) -> bool {
        if self.config.timeout.is_zero() {
            return false;
        }

        self.started_at
            .map(|started_at| now.saturating_duration_since(started_at) >= self.config.timeout)
            .unwrap_or(false)
    }

    /// Decide whether to wait, finish, or send more requests.
    fn step(&mut self, now: Instant, hop: u32, outgoing: &mut Vec<Outgoing>) {
        if self.state != LookupState::Active {
            return;
        }

        self.max_hop = self.max_hop.max(hop);

        if self.is_timed_out(now) {
            debug!(target = ?self.target, "Lookup timed out");
            self.finish(now);
            return;
        }

        if self.active_searches == 0 {
            if self.to_query.is_empty() {
                debug!(target = ?self.target, "No more candidates");
                self.finish(now);
                return;
            }

            if &self.target != self.local.id()
                && self.responses.contains_key(&Id::min())
            {
                debug!(target = ?self.target, "Target itself responded");
                self.finish(now);
                return;
            }
        }

        if self.responses.len() >= self.config.k {
            let worst = self.worst_responder();

            let converged = match self.to_query.first() {
                Some(best) => !best.id().is_nearer_to(&self.target, &worst),
                None => true,
            };

            if converged {
                if self.active_searches == 0 {
                    debug!(target = ?self.target, "Lookup converged");
                    self.finish(now);
                }
                return;
            }
        }

        let need = self.config.parallelism.saturating_sub(self.active_searches);

        for contact in self.to_query.take_closest(need) {
            self.dispatch(contact, hop, outgoing);
        }
    }

    fn dispatch(&mut self, contact: Contact, hop: u32, outgoing: &mut Vec<Outgoing>) {
        let id = *contact.id();

        self.queried.insert(id);
        self.hops.insert(id, hop);
        self.inflight.insert(id, contact.clone());
        self.active_searches += 1;
        self.statistics.add_request();

        trace!(?id, hop, target = ?self.target, "Sending lookup request");

        outgoing.push(Outgoing {
            contact,
            request: self.kind.create_request(self.target),
            hop,
        });
    }

    /// Terminate once, building the outcome.
    fn finish(&mut self, now: Instant) {
        if self.state == LookupState::Finished {
            return;
        }

        self.state = LookupState::Finished;

        self.statistics.hops = self.max_hop;
        self.statistics.elapsed = self
            .started_at
            .map(|started_at| now.saturating_duration_since(started_at))
            .unwrap_or_default();

        let responders = mem::take(&mut self.responses).into_values().collect();

        debug!(
            target = ?self.target,
            kind = ?self.kind,
            requests = self.statistics.requests,
            replies = self.statistics.replies,
            timeouts = self.statistics.timeouts,
            hops = self.statistics.hops,
            "Lookup finished"
        );

        self.outcome = Some(match self.kind {
            LookupKind::Node => LookupOutcome::Nodes(NodeLookupResult {
                target: self.target,
                responders,
                collisions: mem::take(&mut self.collisions),
                statistics: self.statistics,
            }),
            LookupKind::Value => LookupOutcome::Values(ValueLookupResult {
                key: self.target,
                values: mem::take(&mut self.values),
                responders,
                statistics: self.statistics,
            }),
        });
    }
}
