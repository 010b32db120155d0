//! Core DHT logic - pure computation with no direct I/O.
//!
//! Contains the iterative [lookup] driver and [statistics] helpers.
//! All I/O orchestration lives in `actor/`, which calls into this module.

pub(crate) mod lookup;
pub(crate) mod statistics;
