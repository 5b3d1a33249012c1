// Copyright (c) 2025, The Stagelink Authors
// MIT License
// All rights reserved.

//! # Topology Declaration
//!
//! Declares exchanges, queues and bindings on the broker, and synthesizes the
//! dead-letter shadow topology for workers that enable it.
//!
//! Declaration bookkeeping lives on the `TopologyManager` instance, created alongside
//! the connection and dropped with it. Exchange declaration is idempotent per
//! connection: a name is declared at most once, and a conflicting redeclaration at the
//! broker is a configuration bug surfaced as `DeclareExchangeError`. Queue declaration
//! is always issued — it is cheap and server-side idempotent — and the name is only
//! recorded for bookkeeping.
//!
//! The wire calls go through the `Backend` trait so topology rules are testable
//! without a running broker.

use crate::{
    errors::AmqpError,
    exchange::ExchangeDefinition,
    queue::{queue_arguments, QueueBinding, QueueDefinition},
};
use async_trait::async_trait;
use lapin::{
    options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions},
    types::FieldTable,
    BasicProperties, Channel,
};
use std::{collections::HashSet, sync::Arc};
use tokio::sync::Mutex;
use tracing::{debug, error};

/// Suffix appended to a primary exchange/queue name to derive its dead-letter shadow
pub const DEAD_LETTER_SUFFIX: &str = ".deadletter";

/// The wire operations topology logic needs from a channel.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Backend: Send + Sync {
    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), AmqpError>;

    async fn declare_queue(
        &self,
        def: &QueueDefinition,
        args: FieldTable,
    ) -> Result<String, AmqpError>;

    async fn bind_queue(&self, binding: &QueueBinding) -> Result<(), AmqpError>;

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        props: BasicProperties,
    ) -> Result<(), AmqpError>;
}

/// `Backend` implementation over a live lapin channel.
pub struct LapinBackend {
    channel: Arc<Channel>,
}

impl LapinBackend {
    pub fn new(channel: Arc<Channel>) -> LapinBackend {
        LapinBackend { channel }
    }
}

#[async_trait]
impl Backend for LapinBackend {
    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), AmqpError> {
        debug!(name = def.name(), "creating exchange");

        match self
            .channel
            .exchange_declare(
                def.name(),
                (&def.kind).into(),
                ExchangeDeclareOptions {
                    passive: def.passive,
                    durable: def.durable,
                    auto_delete: def.delete,
                    internal: def.internal,
                    nowait: def.no_wait,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    name = def.name(),
                    "error to declare the exchange"
                );
                Err(AmqpError::DeclareExchangeError(def.name().to_owned()))
            }
            _ => Ok(()),
        }
    }

    async fn declare_queue(
        &self,
        def: &QueueDefinition,
        args: FieldTable,
    ) -> Result<String, AmqpError> {
        debug!(name = def.name(), "creating queue");

        match self
            .channel
            .queue_declare(
                def.name(),
                QueueDeclareOptions {
                    passive: def.passive,
                    durable: def.durable,
                    exclusive: def.exclusive,
                    auto_delete: def.delete,
                    nowait: def.no_wait,
                },
                args,
            )
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    name = def.name(),
                    "error to declare the queue"
                );
                Err(AmqpError::DeclareQueueError(def.name().to_owned()))
            }
            Ok(queue) => Ok(queue.name().as_str().to_owned()),
        }
    }

    async fn bind_queue(&self, binding: &QueueBinding) -> Result<(), AmqpError> {
        debug!(
            queue = binding.queue_name,
            exchange = binding.exchange_name,
            routing_key = binding.routing_key,
            "binding queue to exchange"
        );

        match self
            .channel
            .queue_bind(
                &binding.queue_name,
                &binding.exchange_name,
                &binding.routing_key,
                QueueBindOptions { nowait: false },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to bind queue to exchange");
                Err(AmqpError::BindError(
                    binding.queue_name.clone(),
                    binding.exchange_name.clone(),
                ))
            }
            _ => Ok(()),
        }
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        props: BasicProperties,
    ) -> Result<(), AmqpError> {
        match self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                lapin::options::BasicPublishOptions {
                    immediate: false,
                    mandatory: false,
                },
                payload,
                props,
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), exchange, "error publishing message");
                Err(AmqpError::PublishError(exchange.to_owned()))
            }
            _ => Ok(()),
        }
    }
}

/// The synthesized shadow topology for a dead-lettered worker queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterPair {
    pub exchange: String,
    pub queue: String,
}

impl DeadLetterPair {
    /// Derives the shadow names for a worker queue. The exchange base is the worker's
    /// exchange when it has one, else the queue name.
    pub fn derive(exchange: Option<&str>, queue: &str) -> DeadLetterPair {
        DeadLetterPair {
            exchange: format!("{}{}", exchange.unwrap_or(queue), DEAD_LETTER_SUFFIX),
            queue: format!("{}{}", queue, DEAD_LETTER_SUFFIX),
        }
    }
}

/// Owns declaration bookkeeping for one connection.
pub struct TopologyManager {
    backend: Arc<dyn Backend>,
    declared_exchanges: Mutex<HashSet<String>>,
    declared_queues: Mutex<HashSet<String>>,
}

impl TopologyManager {
    pub fn new(backend: Arc<dyn Backend>) -> TopologyManager {
        TopologyManager {
            backend,
            declared_exchanges: Mutex::new(HashSet::new()),
            declared_queues: Mutex::new(HashSet::new()),
        }
    }

    pub(crate) fn backend(&self) -> Arc<dyn Backend> {
        self.backend.clone()
    }

    /// Declares an exchange, at most once per connection. Redeclaring the same name is
    /// a no-op here; a same-name declaration with conflicting attributes is rejected by
    /// the broker and surfaces as `DeclareExchangeError`.
    pub async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), AmqpError> {
        let mut declared = self.declared_exchanges.lock().await;
        if declared.contains(def.name()) {
            debug!(name = def.name(), "exchange already declared on this connection");
            return Ok(());
        }

        self.backend.declare_exchange(def).await?;
        declared.insert(def.name().to_owned());
        Ok(())
    }

    /// Declares a queue. Unlike exchanges this always issues the declaration — the
    /// broker treats it as idempotent — and the local record is bookkeeping only.
    pub async fn declare_queue(&self, def: &QueueDefinition) -> Result<String, AmqpError> {
        let name = self
            .backend
            .declare_queue(def, queue_arguments(def))
            .await?;

        self.declared_queues.lock().await.insert(name.clone());
        Ok(name)
    }

    /// Binds a queue to an exchange with a routing key.
    pub async fn bind(&self, binding: &QueueBinding) -> Result<(), AmqpError> {
        self.backend.bind_queue(binding).await
    }

    /// Declares the dead-letter shadow topology for a worker queue: a shadow exchange
    /// and queue suffixed with `.deadletter`, bound with the worker's routing key.
    /// Returns the pair so the caller can point the primary queue's
    /// `x-dead-letter-exchange` argument at the shadow exchange. Installed before the
    /// primary queue is declared.
    pub async fn install_dead_letter(
        &self,
        exchange: Option<&ExchangeDefinition>,
        queue: &QueueDefinition,
        routing_key: &str,
    ) -> Result<DeadLetterPair, AmqpError> {
        let pair = DeadLetterPair::derive(exchange.map(ExchangeDefinition::name), queue.name());

        let shadow_exchange = match exchange {
            Some(def) => def.renamed(pair.exchange.clone()),
            None => ExchangeDefinition::new(&pair.exchange).durable(),
        };
        self.declare_exchange(&shadow_exchange).await?;
        self.declare_queue(&queue.renamed(pair.queue.clone())).await?;
        self.bind(
            &QueueBinding::new(&pair.queue)
                .exchange(&pair.exchange)
                .routing_key(routing_key),
        )
        .await?;

        Ok(pair)
    }
}
