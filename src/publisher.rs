// Copyright (c) 2025, The Stagelink Authors
// MIT License
// All rights reserved.

//! # Message Publisher
//!
//! Publishes stage records to the pipeline exchange. Records are serialized to
//! canonical UTF-8 JSON, marked `text/plain` (the pipeline's wire convention), stamped
//! with a v4 message id and the stage name, and carry the current trace context in
//! their headers.
//!
//! Two variants with different topology-ownership assumptions:
//!
//! - `publish_durable` declares the exchange, a durable stage queue and the binding
//!   before publishing, so the message survives even if the consuming side has never
//!   started;
//! - `publish` assumes topology already exists — cheaper, but the message is lost when
//!   the exchange or queue is missing.
//!
//! Workers receive the `Publisher` trait rather than the concrete type, so follow-up
//! publishes are observable in tests.

use crate::{
    errors::AmqpError,
    exchange::ExchangeDefinition,
    otel,
    queue::{QueueBinding, QueueDefinition},
    topology::{Backend, TopologyManager},
};
use async_trait::async_trait;
use lapin::{
    types::{AMQPValue, FieldTable, ShortString},
    BasicProperties,
};
use opentelemetry::Context;
use serde_json::Value;
use std::{collections::BTreeMap, sync::Arc};
use tracing::error;
use uuid::Uuid;

/// Content type marking the pipeline's UTF-8 JSON records
pub const PLAIN_CONTENT_TYPE: &str = "text/plain";

/// Enqueues follow-up messages for downstream stages.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Fire-and-forget publish to the given stage's routing key. Assumes the topology
    /// already exists.
    async fn publish(&self, stage: &str, record: &Value) -> Result<(), AmqpError>;

    /// Publish that first declares the exchange, a durable queue named after the
    /// stage, and their binding, so the message is not lost when the consumer side
    /// has not started yet.
    async fn publish_durable(&self, stage: &str, record: &Value) -> Result<(), AmqpError>;
}

/// `Publisher` implementation bound to one pipeline exchange.
pub struct AmqpPublisher {
    backend: Arc<dyn Backend>,
    topology: Arc<TopologyManager>,
    exchange: ExchangeDefinition,
}

impl AmqpPublisher {
    pub fn new(
        topology: Arc<TopologyManager>,
        exchange: ExchangeDefinition,
    ) -> Arc<AmqpPublisher> {
        Arc::new(AmqpPublisher {
            backend: topology.backend(),
            topology,
            exchange,
        })
    }

    fn properties(&self, stage: &str) -> BasicProperties {
        let mut headers = BTreeMap::<ShortString, AMQPValue>::default();
        otel::inject(&Context::current(), &mut headers);

        BasicProperties::default()
            .with_content_type(ShortString::from(PLAIN_CONTENT_TYPE))
            .with_type(ShortString::from(stage))
            .with_message_id(ShortString::from(Uuid::new_v4().to_string()))
            .with_headers(FieldTable::from(headers))
    }
}

#[async_trait]
impl Publisher for AmqpPublisher {
    async fn publish(&self, stage: &str, record: &Value) -> Result<(), AmqpError> {
        let payload = match serde_json::to_vec(record) {
            Ok(bytes) => bytes,
            Err(err) => {
                error!(error = err.to_string(), stage, "unserializable record");
                return Err(AmqpError::PublishError(self.exchange.name().to_owned()));
            }
        };

        self.backend
            .publish(self.exchange.name(), stage, &payload, self.properties(stage))
            .await
    }

    async fn publish_durable(&self, stage: &str, record: &Value) -> Result<(), AmqpError> {
        self.topology.declare_exchange(&self.exchange).await?;
        self.topology
            .declare_queue(&QueueDefinition::new(stage).durable())
            .await?;
        self.topology
            .bind(
                &QueueBinding::new(stage)
                    .exchange(self.exchange.name())
                    .routing_key(stage),
            )
            .await?;

        self.publish(stage, record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::MockBackend;
    use serde_json::json;

    fn publisher(mock: MockBackend) -> Arc<AmqpPublisher> {
        let topology = Arc::new(TopologyManager::new(Arc::new(mock)));
        AmqpPublisher::new(topology, ExchangeDefinition::new("releases").durable())
    }

    #[tokio::test]
    async fn publish_serializes_record_and_marks_plain_text() {
        let record = json!({"project": "curl", "versionId": 7});
        let expected = serde_json::to_vec(&record).unwrap();

        let mut mock = MockBackend::new();
        mock.expect_publish()
            .withf(move |exchange, routing_key, payload, props| {
                exchange == "releases"
                    && routing_key == "download.http"
                    && payload == expected.as_slice()
                    && props.content_type().as_ref().map(ShortString::as_str)
                        == Some(PLAIN_CONTENT_TYPE)
                    && props.kind().as_ref().map(ShortString::as_str) == Some("download.http")
                    && props.message_id().is_some()
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        publisher(mock)
            .publish("download.http", &record)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn fire_and_forget_declares_nothing() {
        let mut mock = MockBackend::new();
        mock.expect_declare_exchange().times(0);
        mock.expect_declare_queue().times(0);
        mock.expect_bind_queue().times(0);
        mock.expect_publish().times(1).returning(|_, _, _, _| Ok(()));

        publisher(mock)
            .publish("download.http", &json!({"project": "curl"}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn durable_publish_installs_topology_first() {
        let mut mock = MockBackend::new();
        mock.expect_declare_exchange()
            .withf(|def| def.name() == "releases")
            .times(1)
            .returning(|_| Ok(()));
        mock.expect_declare_queue()
            .withf(|def, _| def.name() == "download.http")
            .times(1)
            .returning(|def, _| Ok(def.name().to_owned()));
        mock.expect_bind_queue()
            .withf(|binding| {
                *binding
                    == QueueBinding::new("download.http")
                        .exchange("releases")
                        .routing_key("download.http")
            })
            .times(1)
            .returning(|_| Ok(()));
        mock.expect_publish().times(1).returning(|_, _, _, _| Ok(()));

        publisher(mock)
            .publish_durable("download.http", &json!({"project": "curl"}))
            .await
            .unwrap();
    }
}
