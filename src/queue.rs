// Copyright (c) 2025, The Stagelink Authors
// MIT License
// All rights reserved.

//! # Queue Definitions
//!
//! Builder for queue declarations and queue-to-exchange bindings. A queue definition
//! optionally carries a dead-letter-exchange pointer; `queue_arguments` materializes it
//! as the `x-dead-letter-exchange` argument the broker understands. The pointer is
//! injected by the topology layer when a worker enables dead-lettering, never set by
//! workers directly.

use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use std::collections::BTreeMap;

/// Queue argument carrying the dead-letter exchange name
pub const AMQP_HEADERS_DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";

/// Definition of a queue with its declaration flags.
#[derive(Debug, Clone, Default)]
pub struct QueueDefinition {
    pub(crate) name: String,
    pub(crate) durable: bool,
    pub(crate) delete: bool,
    pub(crate) exclusive: bool,
    pub(crate) passive: bool,
    pub(crate) no_wait: bool,
    pub(crate) dead_letter_exchange: Option<String>,
}

impl QueueDefinition {
    /// Creates a queue definition with the given name and default flags.
    pub fn new(name: &str) -> QueueDefinition {
        QueueDefinition {
            name: name.to_owned(),
            ..QueueDefinition::default()
        }
    }

    /// The queue name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Makes the queue durable, persisting across broker restarts.
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    /// Sets the queue to auto-delete when no longer used.
    pub fn delete(mut self) -> Self {
        self.delete = true;
        self
    }

    /// Makes the queue exclusive to the connection.
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    /// Makes the declaration passive: check existence without creating.
    pub fn passive(mut self) -> Self {
        self.passive = true;
        self
    }

    /// Sets the no-wait flag, making the declaration non-blocking.
    pub fn no_wait(mut self) -> Self {
        self.no_wait = true;
        self
    }

    /// Attaches a dead-letter exchange: messages rejected from this queue are rerouted
    /// to the named exchange instead of being discarded.
    pub fn dead_letter_exchange(mut self, exchange: &str) -> Self {
        self.dead_letter_exchange = Some(exchange.to_owned());
        self
    }

    /// Renames this definition, keeping every flag. Used to derive the dead-letter
    /// shadow queue from the primary one.
    pub(crate) fn renamed(&self, name: String) -> Self {
        let mut def = self.clone();
        def.name = name;
        def.dead_letter_exchange = None;
        def
    }
}

/// Materializes the declaration arguments for a queue definition.
pub(crate) fn queue_arguments(def: &QueueDefinition) -> FieldTable {
    let mut args = BTreeMap::new();

    if let Some(dlx) = &def.dead_letter_exchange {
        args.insert(
            ShortString::from(AMQP_HEADERS_DEAD_LETTER_EXCHANGE),
            AMQPValue::LongString(LongString::from(dlx.clone())),
        );
    }

    FieldTable::from(args)
}

/// A (queue, exchange, routing key) triple connecting a queue to an exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueBinding {
    pub(crate) queue_name: String,
    pub(crate) exchange_name: String,
    pub(crate) routing_key: String,
}

impl QueueBinding {
    /// Creates a binding for the given queue; exchange and routing key start empty.
    pub fn new(queue: &str) -> QueueBinding {
        QueueBinding {
            queue_name: queue.to_owned(),
            ..QueueBinding::default()
        }
    }

    /// Sets the exchange to bind the queue to.
    pub fn exchange(mut self, exchange: &str) -> Self {
        self.exchange_name = exchange.to_owned();
        self
    }

    /// Sets the routing key for the binding.
    pub fn routing_key(mut self, key: &str) -> Self {
        self.routing_key = key.to_owned();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arguments_empty_without_dead_letter() {
        let def = QueueDefinition::new("download.http").durable();

        assert!(queue_arguments(&def).inner().is_empty());
    }

    #[test]
    fn arguments_carry_dead_letter_exchange() {
        let def = QueueDefinition::new("download.http")
            .durable()
            .dead_letter_exchange("releases.deadletter");

        let args = queue_arguments(&def);
        let value = args
            .inner()
            .get(AMQP_HEADERS_DEAD_LETTER_EXCHANGE)
            .expect("dead-letter argument missing");
        assert_eq!(
            value,
            &AMQPValue::LongString(LongString::from("releases.deadletter"))
        );
    }

    #[test]
    fn renamed_drops_dead_letter_pointer() {
        let def = QueueDefinition::new("download.http")
            .durable()
            .dead_letter_exchange("releases.deadletter");
        let shadow = def.renamed("download.http.deadletter".to_owned());

        assert_eq!(shadow.name(), "download.http.deadletter");
        assert!(shadow.durable);
        assert!(shadow.dead_letter_exchange.is_none());
    }
}
