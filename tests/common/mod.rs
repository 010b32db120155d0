#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use kadwalk::{
    Bytes, ClosestContacts, Contact, DhtValue, Id, LookupRequest, LookupResponse,
    MessageDispatcher, ResponseHandler,
};

pub fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn local() -> Contact {
    Contact::local(Id::random(), SocketAddr::from(([127, 0, 0, 1], 6881)))
}

struct SimulatedNode {
    contact: Contact,
    values: Vec<DhtValue>,
    online: bool,
}

#[derive(Default)]
struct State {
    nodes: HashMap<Id, SimulatedNode>,
    requests: usize,
}

/// An in memory network where every node knows every other node, and answers
/// synchronously from inside [MessageDispatcher::send].
#[derive(Clone, Default)]
pub struct SimulatedNetwork {
    state: Arc<Mutex<State>>,
}

impl SimulatedNetwork {
    pub fn new(size: usize) -> Self {
        let network = SimulatedNetwork::default();

        {
            let mut state = network.state.lock().unwrap();

            for i in 0..size {
                let address = SocketAddr::from(([10, 0, (i >> 8) as u8, i as u8], 6000 + i as u16));
                let contact = Contact::new(Id::random(), address);

                state.nodes.insert(
                    *contact.id(),
                    SimulatedNode {
                        contact,
                        values: Vec::new(),
                        online: true,
                    },
                );
            }
        }

        network
    }

    pub fn contacts(&self) -> Vec<Contact> {
        let state = self.state.lock().unwrap();

        state.nodes.values().map(|node| node.contact.clone()).collect()
    }

    pub fn online_contacts(&self) -> Vec<Contact> {
        let state = self.state.lock().unwrap();

        state
            .nodes
            .values()
            .filter(|node| node.online)
            .map(|node| node.contact.clone())
            .collect()
    }

    /// Any `count` contacts, to bootstrap from.
    pub fn some_contacts(&self, count: usize) -> Vec<Contact> {
        self.contacts().into_iter().take(count).collect()
    }

    /// The closest nodes to `target`, by ascending distance.
    pub fn closest(&self, target: &Id, count: usize) -> Vec<Contact> {
        closest(self.contacts(), target, count)
    }

    pub fn set_online(&self, id: &Id, online: bool) {
        if let Some(node) = self.state.lock().unwrap().nodes.get_mut(id) {
            node.online = online;
        }
    }

    /// Store a value at the `replicas` closest nodes to the key.
    pub fn store(&self, key: Id, data: &'static [u8], replicas: usize) -> Vec<Contact> {
        let holders = self.closest(&key, replicas);
        let mut state = self.state.lock().unwrap();

        for holder in &holders {
            if let Some(node) = state.nodes.get_mut(holder.id()) {
                node.values.push(DhtValue {
                    key,
                    creator: *holder.id(),
                    data: Bytes::from_static(data),
                });
            }
        }

        holders
    }

    pub fn requests(&self) -> usize {
        self.state.lock().unwrap().requests
    }
}

pub fn closest(contacts: Vec<Contact>, target: &Id, count: usize) -> Vec<Contact> {
    let mut closest = ClosestContacts::new(*target);

    for contact in contacts {
        closest.add(contact);
    }

    closest.truncate(count);
    closest.into_iter().collect()
}

pub fn ids(contacts: &[Contact]) -> Vec<Id> {
    contacts.iter().map(|c| *c.id()).collect()
}

impl MessageDispatcher for SimulatedNetwork {
    fn send(
        &self,
        contact: &Contact,
        request: LookupRequest,
        _timeout: Duration,
        handler: ResponseHandler,
    ) {
        let response = {
            let mut state = self.state.lock().unwrap();
            state.requests += 1;

            let Some(node) = state.nodes.get(contact.id()).filter(|node| node.online) else {
                handler.timeout();
                return;
            };

            let responder = node.contact.clone();

            match request {
                LookupRequest::FindValue { key } if node.values.iter().any(|v| v.key == key) => {
                    let values = node.values.iter().filter(|v| v.key == key).cloned().collect();

                    LookupResponse::values(responder, values)
                }
                request => {
                    let others = state
                        .nodes
                        .values()
                        .filter(|other| other.contact.id() != responder.id())
                        .map(|other| other.contact.clone())
                        .collect();

                    let contacts = closest(others, request.target(), 20);

                    LookupResponse::nodes(responder, contacts, None)
                }
            }
        };

        handler.response(response.responder.address(), response);
    }
}

/// Never answers, and never drops the handlers either.
#[derive(Clone, Default)]
pub struct BlackHole {
    handlers: Arc<Mutex<Vec<ResponseHandler>>>,
}

impl BlackHole {
    pub fn pending(&self) -> usize {
        self.handlers.lock().unwrap().len()
    }
}

impl MessageDispatcher for BlackHole {
    fn send(&self, _: &Contact, _: LookupRequest, _: Duration, handler: ResponseHandler) {
        self.handlers.lock().unwrap().push(handler);
    }
}
