#![doc = include_str!("../README.md")]
//! ## Feature flags
#![doc = document_features::document_features!()]
//!

// Public modules
mod common;

mod actor;
#[cfg(feature = "async")]
pub mod async_dht;
mod core;
mod dht;
mod error;

pub use crate::common::*;

pub use actor::{Info, MessageDispatcher, ResponseHandler};
pub use crate::core::lookup::{
    Lookup, LookupEvent, LookupOutcome, NodeLookupResult, Outgoing, Responder, ValueLookupResult,
};
pub use crate::core::statistics::{DhtStatistics, LookupStatistics};
pub use dht::{Dht, DhtBuilder};
pub use error::{DhtWasShutdown, Error};

pub use bytes::Bytes;
