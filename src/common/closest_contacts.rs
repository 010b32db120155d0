use std::vec::IntoIter;

use crate::common::{Contact, Id};

#[derive(Debug, Clone)]
/// Set of contacts kept sorted by ascending XOR distance to a target.
pub struct ClosestContacts {
    target: Id,
    contacts: Vec<Contact>,
}

impl ClosestContacts {
    pub fn new(target: Id) -> Self {
        Self {
            target,
            contacts: Vec::with_capacity(200),
        }
    }

    // === Getters ===

    pub fn target(&self) -> Id {
        self.target
    }

    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    /// Closest contact to the target.
    pub fn first(&self) -> Option<&Contact> {
        self.contacts.first()
    }

    /// Furthest contact from the target.
    pub fn last(&self) -> Option<&Contact> {
        self.contacts.last()
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.position(id).is_ok()
    }

    // === Public Methods ===

    /// Insert a contact, returns `false` if a contact with the same [Id] exists.
    pub fn add(&mut self, contact: Contact) -> bool {
        match self.position(contact.id()) {
            Ok(_) => false,
            Err(pos) => {
                self.contacts.insert(pos, contact);
                true
            }
        }
    }

    pub fn remove(&mut self, id: &Id) -> Option<Contact> {
        self.position(id).ok().map(|pos| self.contacts.remove(pos))
    }

    /// Remove and return up to `count` contacts closest to the target.
    pub fn take_closest(&mut self, count: usize) -> Vec<Contact> {
        let count = count.min(self.contacts.len());

        self.contacts.drain(..count).collect()
    }

    pub fn truncate(&mut self, len: usize) {
        self.contacts.truncate(len)
    }

    // === Private Methods ===

    fn position(&self, id: &Id) -> Result<usize, usize> {
        self.contacts
            .binary_search_by(|probe| probe.id().cmp_distance(id, &self.target))
    }
}

impl IntoIterator for ClosestContacts {
    type Item = Contact;
    type IntoIter = IntoIter<Contact>;

    fn into_iter(self) -> Self::IntoIter {
        self.contacts.into_iter()
    }
}

impl<'a> IntoIterator for &'a ClosestContacts {
    type Item = &'a Contact;
    type IntoIter = std::slice::Iter<'a, Contact>;

    fn into_iter(self) -> Self::IntoIter {
        self.contacts.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add() {
        let target = Id::random();

        let mut closest = ClosestContacts::new(target);

        for _ in 0..10 {
            let contact = Contact::random();
            assert!(closest.add(contact.clone()));
            assert!(!closest.add(contact));
        }

        assert_eq!(closest.len(), 10);

        let distances = closest
            .contacts()
            .iter()
            .map(|c| c.id().xor(&target))
            .collect::<Vec<_>>();

        let mut sorted = distances.clone();
        sorted.sort();

        assert_eq!(sorted, distances);
    }

    #[test]
    fn take_closest_in_order() {
        let target = Id::random();
        let mut closest = ClosestContacts::new(target);

        for _ in 0..5 {
            closest.add(Contact::random());
        }

        let expected: Vec<Id> = closest.contacts()[..3].iter().map(|c| *c.id()).collect();
        let taken: Vec<Id> = closest.take_closest(3).iter().map(|c| *c.id()).collect();

        assert_eq!(taken, expected);
        assert_eq!(closest.len(), 2);
        assert_eq!(closest.take_closest(10).len(), 2);
        assert!(closest.is_empty());
    }

    #[test]
    fn remove_and_contains() {
        let mut closest = ClosestContacts::new(Id::random());
        let contact = Contact::random();

        closest.add(contact.clone());
        assert!(closest.contains(contact.id()));

        assert_eq!(closest.remove(contact.id()), Some(contact.clone()));
        assert!(!closest.contains(contact.id()));
        assert_eq!(closest.remove(contact.id()), None);
    }
}
