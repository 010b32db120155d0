//! Lookup requests and responses exchanged with the message dispatcher.
//!
//! Their wire encoding belongs to the dispatcher, these are only the parts
//! a lookup needs to read.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::common::{Contact, Id};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
/// What a lookup is looking for.
pub enum LookupKind {
    /// The closest nodes to a target, `FIND_NODE`.
    Node,
    /// Values stored under a key, `FIND_VALUE`.
    Value,
}

impl LookupKind {
    /// Create the protocol request that this lookup sends to every contact.
    pub fn create_request(&self, target: Id) -> LookupRequest {
        match self {
            LookupKind::Node => LookupRequest::FindNode { target },
            LookupKind::Value => LookupRequest::FindValue { key: target },
        }
    }

    pub fn is_value_lookup(&self) -> bool {
        matches!(self, LookupKind::Value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LookupRequest {
    FindNode { target: Id },
    FindValue { key: Id },
}

impl LookupRequest {
    pub fn target(&self) -> &Id {
        match self {
            LookupRequest::FindNode { target } => target,
            LookupRequest::FindValue { key } => key,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
/// Opaque token a responder hands out, needed to later store values at it.
pub struct QueryKey(pub Bytes);

impl QueryKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// A value found by a value lookup.
pub struct DhtValue {
    /// The key this value is stored under.
    pub key: Id,
    /// Id of the node that originally stored it.
    pub creator: Id,
    pub data: Bytes,
}

#[derive(Debug, Clone)]
/// A response to a [LookupRequest].
pub struct LookupResponse {
    /// The responder, as it describes itself.
    pub responder: Contact,
    pub body: ResponseBody,
}

#[derive(Debug, Clone)]
pub enum ResponseBody {
    /// Closer contacts the responder knows about.
    Nodes {
        contacts: Vec<Contact>,
        query_key: Option<QueryKey>,
    },
    /// Values the responder has stored under the key.
    Values(Vec<DhtValue>),
}

impl LookupResponse {
    pub fn nodes(responder: Contact, contacts: Vec<Contact>, query_key: Option<QueryKey>) -> Self {
        LookupResponse {
            responder,
            body: ResponseBody::Nodes {
                contacts,
                query_key,
            },
        }
    }

    pub fn values(responder: Contact, values: Vec<DhtValue>) -> Self {
        LookupResponse {
            responder,
            body: ResponseBody::Values(values),
        }
    }
}
