use std::time::Duration;

use crate::common::{Contact, Id};

use super::Actor;

/// Information and statistics about this Dht node.
#[derive(Debug, Clone)]
pub struct Info {
    local: Contact,
    routing_table_size: usize,
    active_lookups: usize,
    completed_lookups: usize,
    average_hops: f64,
    average_elapsed: Duration,
    value_success_rate: f64,
}

impl Info {
    /// This Node's [Id]
    pub fn id(&self) -> &Id {
        self.local.id()
    }

    /// This node's own [Contact].
    pub fn local(&self) -> &Contact {
        &self.local
    }

    /// Number of live contacts in the routing table.
    pub fn routing_table_size(&self) -> usize {
        self.routing_table_size
    }

    /// Lookups currently in progress.
    pub fn active_lookups(&self) -> usize {
        self.active_lookups
    }

    /// Number of recently completed lookups the averages below are computed over.
    pub fn completed_lookups(&self) -> usize {
        self.completed_lookups
    }

    pub fn average_hops(&self) -> f64 {
        self.average_hops
    }

    pub fn average_elapsed(&self) -> Duration {
        self.average_elapsed
    }

    /// Share of recent value lookups that found a value.
    pub fn value_success_rate(&self) -> f64 {
        self.value_success_rate
    }
}

impl<D> From<&Actor<D>> for Info {
    fn from(actor: &Actor<D>) -> Self {
        let statistics = actor.statistics();

        Self {
            local: actor.local().clone(),
            routing_table_size: actor.routing_table_size(),
            active_lookups: actor.active_lookups(),
            completed_lookups: statistics.samples(),
            average_hops: statistics.average_hops(),
            average_elapsed: statistics.average_elapsed(),
            value_success_rate: statistics.value_success_rate(),
        }
    }
}
