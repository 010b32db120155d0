//! Simplified Kademlia routing table

use std::collections::BTreeMap;
use std::slice::Iter;
use std::sync::{Arc, RwLock};

use tracing::{debug, trace};

use crate::common::{ClosestContacts, Config, Contact, Id};

/// K = the default maximum size of a k-bucket.
pub const MAX_BUCKET_SIZE_K: usize = 20;
/// Default maximum size of a bucket's replacement cache.
pub const DEFAULT_REPLACEMENT_CACHE_SIZE: usize = 16;
/// Default number of failures in a row, without any successful contact in between,
/// after which we assume we are the ones offline and stop counting failures.
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: usize = 100;

/// A [RoutingTable] shared between concurrent lookups and request handlers.
pub type SharedRoutingTable = Arc<RwLock<RoutingTable>>;

#[derive(Debug, Clone)]
/// Simplified Kademlia routing table
///
/// Contacts are grouped in buckets by their [Id::distance] to the local node.
pub struct RoutingTable {
    local: Contact,
    bucket_size: usize,
    cache_size: usize,
    max_consecutive_failures: usize,
    consecutive_failures: usize,
    buckets: BTreeMap<u8, KBucket>,
}

impl RoutingTable {
    /// Create a new [RoutingTable] around the local contact.
    pub fn new(local: Contact) -> Self {
        RoutingTable {
            local,
            bucket_size: MAX_BUCKET_SIZE_K,
            cache_size: DEFAULT_REPLACEMENT_CACHE_SIZE,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            consecutive_failures: 0,
            buckets: BTreeMap::new(),
        }
    }

    /// Create a new [RoutingTable] using the sizes in `config`.
    pub fn with_config(local: Contact, config: &Config) -> Self {
        Self::new(local)
            .with_bucket_size(config.k)
            .with_cache_size(config.replacement_cache_size)
            .with_max_consecutive_failures(config.max_consecutive_failures)
    }

    // === Options ===

    pub fn with_bucket_size(mut self, k: usize) -> Self {
        self.bucket_size = k;
        self
    }

    pub fn with_cache_size(mut self, cache_size: usize) -> Self {
        self.cache_size = cache_size;
        self
    }

    pub fn with_max_consecutive_failures(mut self, max: usize) -> Self {
        self.max_consecutive_failures = max;
        self
    }

    // === Getters ===

    /// Returns the [Id] of this node, where the distance is measured from.
    pub fn id(&self) -> &Id {
        self.local.id()
    }

    /// Returns the [Contact] of this node.
    pub fn local(&self) -> &Contact {
        &self.local
    }

    pub fn bucket_size(&self) -> usize {
        self.bucket_size
    }

    /// Returns the contact with this id if it is in a bucket or in a cache.
    pub fn get(&self, id: &Id) -> Option<&Contact> {
        self.buckets
            .get(&self.local.id().distance(id))
            .and_then(|bucket| bucket.get(id))
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.get(id).is_some()
    }

    /// Returns `true` if no bucket has any member.
    pub fn is_empty(&self) -> bool {
        self.buckets.values().all(|bucket| bucket.is_empty())
    }

    /// Number of bucket members, whatever their state, excluding replacement caches.
    pub fn size(&self) -> usize {
        self.buckets
            .values()
            .fold(0, |acc, bucket| acc + bucket.contacts.len())
    }

    /// Returns an iterator over the bucket members, excluding replacement caches.
    pub fn contacts(&self) -> impl Iterator<Item = &Contact> {
        self.buckets.values().flat_map(|bucket| bucket.iter())
    }

    /// Returns an iterator over the replacement caches of all buckets.
    pub fn cached_contacts(&self) -> impl Iterator<Item = &Contact> {
        self.buckets.values().flat_map(|bucket| bucket.cache.iter())
    }

    // === Public Methods ===

    /// Insert or refresh a contact. If `is_alive` is true, the contact just
    /// responded to us and is marked alive.
    ///
    /// Returns `true` if the contact is now a live member of a bucket.
    pub fn add(&mut self, mut contact: Contact, is_alive: bool) -> bool {
        let distance = self.local.id().distance(contact.id());

        if distance == 0 {
            // Do not add self to the routing_table
            return false;
        }

        if contact.is_firewalled() {
            trace!(?contact, "Not adding a firewalled contact");
            return false;
        }

        if is_alive {
            contact.mark_alive();
            self.consecutive_failures = 0;
        }

        let (bucket_size, cache_size) = (self.bucket_size, self.cache_size);

        self.buckets
            .entry(distance)
            .or_insert_with(|| KBucket::new(bucket_size, cache_size))
            .add(contact)
    }

    /// Record that the contact with this id failed to respond.
    ///
    /// Contacts that die are removed, and replaced by the most recently seen
    /// contact from their bucket's replacement cache.
    pub fn handle_failure(&mut self, id: &Id) {
        let distance = self.local.id().distance(id);

        if distance == 0 {
            return;
        }

        let Some(bucket) = self.buckets.get_mut(&distance) else {
            return;
        };

        if !bucket.contains_any(id) {
            return;
        }

        // Ignore failure if we start getting to many disconnections in a row
        if self.consecutive_failures >= self.max_consecutive_failures {
            debug!(
                consecutive_failures = self.consecutive_failures,
                "Ignoring contact failure, we are probably disconnected"
            );
            return;
        }
        self.consecutive_failures += 1;

        bucket.handle_failure(id);
    }

    /// Remove a contact from this routing table, including its replacement cache.
    pub fn remove(&mut self, id: &Id) {
        let distance = self.local.id().distance(id);

        if let Some(bucket) = self.buckets.get_mut(&distance) {
            bucket.remove(id)
        }
    }

    /// Return up to `count` contacts ordered by ascending distance to `target`.
    ///
    /// If `alive_only` is true, only [Contact::is_alive] contacts are returned.
    /// If `include_local` is true, the local contact is part of the result,
    /// if it is closer than the last returned contact.
    pub fn select(
        &self,
        target: &Id,
        count: usize,
        alive_only: bool,
        include_local: bool,
    ) -> Vec<Contact> {
        let mut closest = ClosestContacts::new(*target);

        for contact in self.contacts() {
            if !alive_only || contact.is_alive() {
                closest.add(contact.clone());
            }
        }

        if include_local {
            closest.add(self.local.clone());
        }

        closest.truncate(count);
        closest.into_iter().collect()
    }
}

/// Kbuckets are similar to LRU caches that checks and evicts unresponsive contacts,
/// without dropping any responsive contacts in the process.
#[derive(Debug, Clone)]
pub struct KBucket {
    k: usize,
    cache_size: usize,
    /// Contacts in the k-bucket, sorted by the least recently seen.
    contacts: Vec<Contact>,
    /// Replacement candidates, sorted by the least recently seen.
    cache: Vec<Contact>,
}

impl KBucket {
    pub fn new(k: usize, cache_size: usize) -> Self {
        KBucket {
            k,
            cache_size,
            contacts: Vec::with_capacity(k),
            cache: Vec::with_capacity(cache_size),
        }
    }

    // === Getters ===

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.contacts.len() >= self.k
    }

    pub fn iter(&self) -> Iter<'_, Contact> {
        self.contacts.iter()
    }

    pub fn cached(&self) -> Iter<'_, Contact> {
        self.cache.iter()
    }

    pub fn get(&self, id: &Id) -> Option<&Contact> {
        self.contacts
            .iter()
            .chain(self.cache.iter())
            .find(|c| c.id() == id)
    }

    // === Public Methods ===

    pub fn add(&mut self, incoming: Contact) -> bool {
        if let Some(index) = self.contacts.iter().position(|c| c.id() == incoming.id()) {
            return self.update(index, incoming);
        }

        if let Some(index) = self.cache.iter().position(|c| c.id() == incoming.id()) {
            let mut cached = self.cache.remove(index);
            cached.merge(&incoming);

            if !self.is_full() {
                self.push(cached);
                return true;
            }

            self.cache.push(cached);
            return false;
        }

        if !self.is_full() {
            self.push(incoming);
            return true;
        }

        if incoming.is_alive() {
            // Replace the least recently seen contact that isn't confirmed alive.
            if let Some(index) = self.contacts.iter().position(|c| !c.is_alive()) {
                let replaced = self.contacts.remove(index);
                trace!(?replaced, ?incoming, "Replacing contact");

                self.push(incoming);
                return true;
            }
        }

        if self.cache_size == 0 {
            return false;
        }

        trace!(?incoming, "Adding contact to replacement cache");

        if self.cache.len() >= self.cache_size {
            self.cache.remove(0);
        }
        self.cache.push(incoming);

        false
    }

    pub fn remove(&mut self, id: &Id) {
        self.contacts.retain(|contact| contact.id() != id);
        self.cache.retain(|contact| contact.id() != id);
    }

    // === Private Methods ===

    fn contains_any(&self, id: &Id) -> bool {
        self.get(id).is_some()
    }

    fn push(&mut self, contact: Contact) {
        self.contacts.push(contact);
    }

    /// A contact that isn't alive never replaces a live one, unless it is the
    /// same address or a newer instance of the same peer.
    fn update(&mut self, index: usize, incoming: Contact) -> bool {
        let existing = &self.contacts[index];

        if existing.is_alive()
            && existing.address() != incoming.address()
            && existing.instance_id() == incoming.instance_id()
        {
            trace!(?existing, ?incoming, "Ignoring conflicting contact");
            return false;
        }

        let mut contact = self.contacts.remove(index);
        contact.merge(&incoming);

        self.push(contact);

        true
    }

    fn handle_failure(&mut self, id: &Id) {
        if let Some(index) = self.contacts.iter().position(|c| c.id() == id) {
            let contact = &mut self.contacts[index];
            contact.handle_failure();

            if contact.is_dead() {
                let dead = self.contacts.remove(index);
                trace!(?dead, "Removing dead contact");

                if let Some(mut replacement) = self.cache.pop() {
                    replacement.unknown();
                    trace!(?replacement, "Promoting cached contact");
                    self.push(replacement);
                }
            }
        } else if let Some(index) = self.cache.iter().position(|c| c.id() == id) {
            let contact = &mut self.cache[index];
            contact.handle_failure();

            if contact.is_dead() {
                self.cache.remove(index);
            }
        }
    }
}

impl Default for KBucket {
    fn default() -> Self {
        Self::new(MAX_BUCKET_SIZE_K, DEFAULT_REPLACEMENT_CACHE_SIZE)
    }
}
