//! Routing-relevant state of a remote peer.
use std::{
    fmt::{self, Debug, Formatter},
    hash::{Hash, Hasher},
    net::{IpAddr, SocketAddr},
    time::{Duration, Instant},
};

use crate::common::Id;

/// Number of consecutive failures after which a contact that has responded
/// at least once is considered dead.
pub const MAX_ALIVE_NODE_FAILURES: u32 = 4;
/// Number of consecutive failures after which a contact that never responded
/// is considered dead.
pub const MAX_UNKNOWN_NODE_FAILURES: u32 = 2;
/// Multiplier applied to the last round trip time to derive a request timeout.
pub const RTT_TIMEOUT_FACTOR: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Liveness of a [Contact].
pub enum ContactState {
    /// Learned about, but never confirmed.
    Unknown,
    /// Responded to our last request.
    Alive,
    /// Failed too often, or announced its shutdown.
    Dead,
}

#[derive(Clone)]
/// A remote peer as seen by the routing table and by lookups.
///
/// Two contacts are equal if they share the same [Id], regardless of their
/// addresses, except that the local contact is never equal to a remote one.
pub struct Contact {
    id: Id,
    /// Address as reported by the peer itself.
    advertised_address: SocketAddr,
    /// Address we actually talk to.
    address: SocketAddr,
    instance_id: u8,
    round_trip_time: Option<Duration>,
    last_seen: Option<Instant>,
    last_failure: Option<Instant>,
    failures: u32,
    state: ContactState,
    firewalled: bool,
    shutdown: bool,
    local: bool,
}

impl Contact {
    /// Creates a remote contact in the [ContactState::Unknown] state.
    pub fn new(id: Id, address: SocketAddr) -> Contact {
        Contact {
            id,
            advertised_address: address,
            address,
            instance_id: 0,
            round_trip_time: None,
            last_seen: None,
            last_failure: None,
            failures: 0,
            state: ContactState::Unknown,
            firewalled: false,
            shutdown: false,
            local: false,
        }
    }

    /// Creates the contact representing this node.
    pub fn local(id: Id, address: SocketAddr) -> Contact {
        Contact {
            local: true,
            state: ContactState::Alive,
            last_seen: Some(Instant::now()),
            ..Contact::new(id, address)
        }
    }

    #[cfg(test)]
    /// Create a random remote contact on a loopback address.
    pub fn random() -> Contact {
        use rand::Rng;

        let port = rand::thread_rng().gen_range(1024..u16::MAX);

        Contact::new(Id::random(), SocketAddr::from(([127, 0, 0, 1], port)))
    }

    // === Options ===

    pub fn with_instance_id(mut self, instance_id: u8) -> Self {
        self.instance_id = instance_id;
        self
    }

    pub fn with_firewalled(mut self, firewalled: bool) -> Self {
        self.firewalled = firewalled;
        self
    }

    // === Getters ===

    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn advertised_address(&self) -> SocketAddr {
        self.advertised_address
    }

    pub fn instance_id(&self) -> u8 {
        self.instance_id
    }

    pub fn round_trip_time(&self) -> Option<Duration> {
        self.round_trip_time
    }

    /// Last time this contact responded to us.
    pub fn last_seen(&self) -> Option<Instant> {
        self.last_seen
    }

    pub fn last_failure(&self) -> Option<Instant> {
        self.last_failure
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn state(&self) -> ContactState {
        self.state
    }

    pub fn is_alive(&self) -> bool {
        self.state == ContactState::Alive
    }

    pub fn is_dead(&self) -> bool {
        self.state == ContactState::Dead
    }

    pub fn is_unknown(&self) -> bool {
        self.state == ContactState::Unknown
    }

    /// Returns `true` if this contact responded at least once.
    pub fn has_been_alive(&self) -> bool {
        self.last_seen.is_some()
    }

    pub fn is_firewalled(&self) -> bool {
        self.firewalled
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown
    }

    pub fn is_local(&self) -> bool {
        self.local
    }

    /// Returns `true` if the address can be sent to, ie. neither the ip
    /// is unspecified nor the port is zero.
    pub fn has_valid_address(&self) -> bool {
        self.address.port() != 0 && !self.address.ip().is_unspecified()
    }

    // === Public Methods ===

    /// Reconcile the self-reported address with the `observed` source address
    /// of a message we received from this contact.
    ///
    /// The observed address wins, unless it is a private or local address, in
    /// which case the observed ip is combined with the advertised port. An
    /// advertised port of zero marks the contact as firewalled.
    pub fn reconcile_address(&mut self, observed: SocketAddr) {
        let advertised_port = self.advertised_address.port();

        if advertised_port == 0 {
            self.firewalled = true;
            self.address = observed;
        } else if is_private(&observed.ip()) {
            self.address = SocketAddr::new(observed.ip(), advertised_port);
        } else {
            self.address = observed;
        }
    }

    /// Record a successful round trip.
    pub fn mark_alive(&mut self) {
        self.mark_alive_at(Instant::now())
    }

    pub(crate) fn mark_alive_at(&mut self, now: Instant) {
        if self.shutdown {
            return;
        }

        self.state = ContactState::Alive;
        self.failures = 0;
        self.last_seen = Some(now);
    }

    pub fn set_round_trip_time(&mut self, round_trip_time: Duration) {
        self.round_trip_time = Some(round_trip_time);
    }

    /// Record a failed request to this contact.
    pub fn handle_failure(&mut self) {
        self.handle_failure_at(Instant::now())
    }

    pub(crate) fn handle_failure_at(&mut self, now: Instant) {
        self.failures = self.failures.saturating_add(1);
        self.last_failure = Some(now);

        if self.shutdown {
            return;
        }

        let max_failures = if self.has_been_alive() {
            MAX_ALIVE_NODE_FAILURES
        } else {
            MAX_UNKNOWN_NODE_FAILURES
        };

        if self.failures >= max_failures {
            self.state = ContactState::Dead;
        } else if self.state == ContactState::Alive {
            self.state = ContactState::Unknown;
        }
    }

    /// The contact told us it is going away.
    pub fn shutdown(&mut self) {
        self.shutdown = true;
        self.state = ContactState::Dead;
    }

    /// Reset the liveness of this contact, keeping its history.
    pub fn unknown(&mut self) {
        if !self.shutdown {
            self.state = ContactState::Unknown;
            self.failures = 0;
        }
    }

    /// Per-contact request timeout, a multiple of the last round trip time
    /// bounded by `min` and `default`.
    ///
    /// Contacts without round trip history, or that are not alive, use `default`.
    pub fn adaptive_timeout(&self, default: Duration, min: Duration) -> Duration {
        match self.round_trip_time {
            Some(rtt) if self.is_alive() => rtt
                .saturating_mul(RTT_TIMEOUT_FACTOR)
                .min(default)
                .max(min),
            _ => default,
        }
    }

    /// Fold newer observations of the same peer into this contact.
    ///
    /// This contact is the long lived one, `other` is a fresh observation that
    /// may carry less history.
    pub fn merge(&mut self, other: &Contact) {
        debug_assert_eq!(self.id, other.id);

        if other.instance_id != self.instance_id {
            // The peer restarted, its failure history is no longer relevant.
            self.instance_id = other.instance_id;
            self.failures = 0;
            self.shutdown = false;
            self.state = other.state;
            self.set_addresses_from(other);
        } else if other.is_alive() {
            self.set_addresses_from(other);
        }

        if other.round_trip_time.is_some() {
            self.round_trip_time = other.round_trip_time;
        }

        self.last_seen = self.last_seen.max(other.last_seen);
        self.last_failure = self.last_failure.max(other.last_failure);

        if other.shutdown {
            self.shutdown();
        } else if other.is_alive() && !self.shutdown {
            self.state = ContactState::Alive;
            self.failures = 0;
        }
    }

    // === Private Methods ===

    fn set_addresses_from(&mut self, other: &Contact) {
        self.advertised_address = other.advertised_address;
        self.address = other.address;
        self.firewalled = other.firewalled;
    }
}

/// Private, loopback, link-local or otherwise non routable addresses.
fn is_private(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ip) => {
            ip.is_private() || ip.is_loopback() || ip.is_link_local() || ip.is_unspecified()
        }
        IpAddr::V6(ip) => {
            let first = ip.segments()[0];

            ip.is_loopback()
                || ip.is_unspecified()
                // Unique local fc00::/7
                || (first & 0xfe00) == 0xfc00
                // Link local fe80::/10
                || (first & 0xffc0) == 0xfe80
        }
    }
}

impl PartialEq for Contact {
    fn eq(&self, other: &Self) -> bool {
        self.local == other.local && self.id == other.id
    }
}

impl Eq for Contact {}

impl Hash for Contact {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
        self.local.hash(state);
    }
}

impl Debug for Contact {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Contact")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("state", &self.state)
            .field("failures", &self.failures)
            .field("firewalled", &self.firewalled)
            .finish()
    }
}
