// Copyright (c) 2025, The Stagelink Authors
// MIT License
// All rights reserved.

//! # Broker Client
//!
//! The facade a worker process drives: exactly one connection and one channel, a
//! topology manager scoped to that connection, publishers for follow-up messages, and
//! the blocking consume loop.
//!
//! `consume` is the process's main loop. It installs the worker's topology (including
//! the dead-letter shadow pair when enabled), registers the consumer with manual
//! acknowledgment, and dispatches deliveries until no registration remains on the
//! channel. There is no internal parallelism: horizontal concurrency comes from
//! running more processes against the same queue (competing consumers).
//!
//! A failed ack or reject terminates the loop with the error. A channel that failed
//! mid-acknowledgment cannot safely settle deliveries it handed out earlier, so the
//! process exits and the supervisor decides respawn policy.

use crate::{
    channel::new_amqp_channel,
    config::BrokerConfig,
    consumer::dispatch,
    errors::AmqpError,
    exchange::ExchangeDefinition,
    handler::{TopologyDefaults, Worker},
    publisher::AmqpPublisher,
    queue::{QueueBinding, QueueDefinition},
    topology::{Backend, LapinBackend, TopologyManager},
};
use futures_util::StreamExt;
use lapin::{options::BasicConsumeOptions, types::FieldTable, Channel, Connection};
use opentelemetry::global;
use std::sync::Arc;
use tracing::{debug, error};

/// Name of the topic exchange the pipeline stages route through
pub const DEFAULT_EXCHANGE: &str = "releases";

/// One process's handle on the broker.
pub struct BrokerClient {
    _connection: Arc<Connection>,
    channel: Arc<Channel>,
    topology: Arc<TopologyManager>,
}

impl BrokerClient {
    /// Connects to the broker and opens the process's channel. No retry: an
    /// unreachable broker or rejected credentials is fatal here, and respawn policy
    /// belongs to the process supervisor.
    pub async fn connect(cfg: &BrokerConfig) -> Result<BrokerClient, AmqpError> {
        let (connection, channel) = new_amqp_channel(cfg).await?;
        let backend: Arc<dyn Backend> = Arc::new(LapinBackend::new(channel.clone()));

        Ok(BrokerClient {
            _connection: connection,
            channel,
            topology: Arc::new(TopologyManager::new(backend)),
        })
    }

    /// The topology manager scoped to this connection.
    pub fn topology(&self) -> Arc<TopologyManager> {
        self.topology.clone()
    }

    /// The option templates worker topologies are seeded with: the durable pipeline
    /// topic exchange and a durable queue.
    pub fn defaults(&self) -> TopologyDefaults {
        TopologyDefaults {
            exchange: ExchangeDefinition::new(DEFAULT_EXCHANGE).durable(),
            queue: QueueDefinition::new("").durable(),
        }
    }

    /// A publisher bound to the pipeline exchange, for enqueueing follow-up stages.
    pub fn publisher(&self) -> Arc<AmqpPublisher> {
        AmqpPublisher::new(self.topology.clone(), self.defaults().exchange)
    }

    /// Subscribes the worker and blocks dispatching deliveries.
    ///
    /// Setup order matters: the dead-letter pair must exist before the primary queue
    /// is declared with its `x-dead-letter-exchange` argument, and the queue must be
    /// bound before deliveries are consumed.
    ///
    /// Returns `Ok(())` when the delivery stream ends (no registrations remain on the
    /// channel) and an error when registration or an ack/reject wire call fails.
    pub async fn consume(&self, worker: Arc<dyn Worker>) -> Result<(), AmqpError> {
        let topology = worker.topology(&self.defaults());

        let mut queue = topology.queue.clone();
        if topology.dead_letter {
            let pair = self
                .topology
                .install_dead_letter(topology.exchange.as_ref(), &queue, &topology.routing_key)
                .await?;
            queue = queue.dead_letter_exchange(&pair.exchange);
        }

        self.topology.declare_queue(&queue).await?;

        if let Some(exchange) = &topology.exchange {
            self.topology.declare_exchange(exchange).await?;
            self.topology
                .bind(
                    &QueueBinding::new(queue.name())
                        .exchange(exchange.name())
                        .routing_key(&topology.routing_key),
                )
                .await?;
        }

        let mut consumer = match self
            .channel
            .basic_consume(
                queue.name(),
                &topology.consumer_tag,
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: false,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    queue = queue.name(),
                    "error to create the consumer"
                );
                Err(AmqpError::ConsumerRegistrationError(queue.name().to_owned()))
            }
            Ok(c) => Ok(c),
        }?;

        debug!(
            queue = queue.name(),
            tag = topology.consumer_tag.as_str(),
            stage = worker.stage(),
            "consumer registered, waiting for deliveries"
        );

        let spawned = tokio::spawn({
            async move {
                let tracer = global::tracer("amqp consumer");

                while let Some(result) = consumer.next().await {
                    match result {
                        Ok(delivery) => {
                            dispatch(
                                &tracer,
                                worker.as_ref(),
                                &delivery.properties,
                                delivery.exchange.as_str(),
                                delivery.routing_key.as_str(),
                                delivery.redelivered,
                                &delivery.data,
                                &delivery,
                            )
                            .await?;
                        }
                        Err(err) => {
                            error!(error = err.to_string(), "errors consume msg");
                            return Err(AmqpError::ConsumeError(err.to_string()));
                        }
                    }
                }

                Ok(())
            }
        })
        .await;

        match spawned {
            Ok(result) => result,
            Err(err) => Err(AmqpError::ConsumeError(err.to_string())),
        }
    }
}
